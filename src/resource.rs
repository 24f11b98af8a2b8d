// Script resource records, handles and reference counting

use crate::event::{OwnerMailbox, ScriptEvent};
use crate::worker::WorkItem;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Process-unique identifier for a loaded script.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Observable lifecycle state of a script resource.
///
/// Maintained by the owning worker; readable from any thread through the
/// handle. `Ready` and `Processing` alternate as messages arrive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptStatus {
    /// Load item enqueued, compilation not yet run
    Loading,
    /// Compiled and idle, waiting for messages
    Ready,
    /// A message is executing inside the interpreter right now
    Processing,
    /// Compilation failed; the resource is already destroyed
    LoadFailed,
    /// Interpreter-side state has been released
    Destroyed,
}

const STATUS_LOADING: u8 = 0;
const STATUS_READY: u8 = 1;
const STATUS_PROCESSING: u8 = 2;
const STATUS_LOAD_FAILED: u8 = 3;
const STATUS_DESTROYED: u8 = 4;

impl ScriptStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            STATUS_READY => ScriptStatus::Ready,
            STATUS_PROCESSING => ScriptStatus::Processing,
            STATUS_LOAD_FAILED => ScriptStatus::LoadFailed,
            STATUS_DESTROYED => ScriptStatus::Destroyed,
            _ => ScriptStatus::Loading,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ScriptStatus::Loading => STATUS_LOADING,
            ScriptStatus::Ready => STATUS_READY,
            ScriptStatus::Processing => STATUS_PROCESSING,
            ScriptStatus::LoadFailed => STATUS_LOAD_FAILED,
            ScriptStatus::Destroyed => STATUS_DESTROYED,
        }
    }
}

// The refcount and the pending-destruction flag live in one atomic word so
// the flag is set under the same atomic operation as the final decrement.
const DEFUNCT: usize = 1 << (usize::BITS - 1);
const COUNT_MASK: usize = DEFUNCT - 1;

/// Shared bookkeeping for one loaded script.
///
/// Reachable from the host-side [`ScriptHandle`], from in-flight work items
/// and from the pool's resource table. The compiled state itself lives inside
/// the owning worker's interpreter and is only ever touched by that thread; a
/// record is never rebound to a different worker after creation.
pub(crate) struct ScriptRecord {
    pub(crate) id: ResourceId,
    pub(crate) name: String,
    pub(crate) owner: OwnerMailbox,
    pub(crate) worker: usize,
    queue: mpsc::UnboundedSender<WorkItem>,
    refs: AtomicUsize,
    status: AtomicU8,
}

impl ScriptRecord {
    /// Create a record with refcount 2: one for the handle returned to the
    /// caller, one for the in-flight load item.
    pub(crate) fn new(
        id: ResourceId,
        name: &str,
        owner: OwnerMailbox,
        worker: usize,
        queue: mpsc::UnboundedSender<WorkItem>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            owner,
            worker,
            queue,
            refs: AtomicUsize::new(2),
            status: AtomicU8::new(STATUS_LOADING),
        }
    }

    /// Take a new counted reference for an in-flight work item.
    ///
    /// Fails once the resource is pending destruction: reviving a resource
    /// after it reached zero is forbidden, so a `send` that lost the race
    /// against release-to-zero observes `ResourceGone` here.
    pub(crate) fn add_ref(&self) -> bool {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                if v & DEFUNCT != 0 {
                    None
                } else {
                    Some(v + 1)
                }
            })
            .is_ok()
    }

    /// Unconditional increment for cloning an already-held reference.
    ///
    /// The holder owns a reference, so the count is nonzero and no revival
    /// can occur even if the defunct flag is already set.
    fn clone_ref(&self) {
        let prev = self.refs.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev & COUNT_MASK > 0, "cloned a dead reference");
    }

    /// Drop one counted reference.
    ///
    /// The decrement that observes the count reaching zero sets the defunct
    /// flag in the same atomic update and schedules destruction on the owning
    /// worker - never on the releasing thread, because only the worker may
    /// mutate its interpreter. If the flag was already set (compile failure,
    /// pool teardown) cleanup has happened elsewhere and this is a pure
    /// decrement.
    pub(crate) fn release(self: &Arc<Self>) {
        let prev = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                let count = v & COUNT_MASK;
                debug_assert!(count > 0, "refcount underflow");
                if count == 1 && v & DEFUNCT == 0 {
                    Some(DEFUNCT)
                } else {
                    Some(v.wrapping_sub(1))
                }
            })
            .unwrap_or_else(|v| v);

        if prev & DEFUNCT == 0 && prev & COUNT_MASK == 1 {
            // Queue closure during teardown is fine: the interpreter is
            // dropped wholesale when its worker exits.
            let _ = self.queue.send(WorkItem::Destroy {
                record: Arc::clone(self),
            });
        }
    }

    /// Set the defunct flag without touching the count. Returns true when
    /// this call was the one that set it.
    pub(crate) fn mark_defunct(&self) -> bool {
        self.refs.fetch_or(DEFUNCT, Ordering::AcqRel) & DEFUNCT == 0
    }

    pub(crate) fn is_defunct(&self) -> bool {
        self.refs.load(Ordering::Acquire) & DEFUNCT != 0
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire) & COUNT_MASK
    }

    pub(crate) fn status(&self) -> ScriptStatus {
        ScriptStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: ScriptStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    pub(crate) fn queue(&self) -> &mpsc::UnboundedSender<WorkItem> {
        &self.queue
    }

    /// Fire-and-forget delivery to the owner identity.
    pub(crate) fn notify(&self, event: ScriptEvent) {
        if self.owner.send(event).is_err() {
            tracing::debug!(id = %self.id, "owner mailbox closed, dropping event");
        }
    }
}

/// Host-side strong reference to a loaded script.
///
/// Cloning takes an additional reference; dropping releases it. When the last
/// reference (handle or in-flight work item) goes away the resource is
/// scheduled for destruction on its owning worker and any later send against
/// its id fails with `ResourceGone`.
pub struct ScriptHandle {
    record: Arc<ScriptRecord>,
}

impl ScriptHandle {
    pub(crate) fn new(record: Arc<ScriptRecord>) -> Self {
        Self { record }
    }

    pub fn id(&self) -> ResourceId {
        self.record.id
    }

    /// The name/tag supplied at load time
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Index of the worker this script is bound to
    pub fn worker(&self) -> usize {
        self.record.worker
    }

    pub fn status(&self) -> ScriptStatus {
        self.record.status()
    }
}

impl Clone for ScriptHandle {
    fn clone(&self) -> Self {
        self.record.clone_ref();
        Self {
            record: Arc::clone(&self.record),
        }
    }
}

impl Drop for ScriptHandle {
    fn drop(&mut self) {
        self.record.release();
    }
}

impl fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .field("status", &self.record.status())
            .finish()
    }
}
