// Pool manager: worker set, resource table, dispatch and teardown

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::event::OwnerMailbox;
use crate::payload::Payload;
use crate::resource::{ResourceId, ScriptHandle, ScriptRecord, ScriptStatus};
use crate::worker::{self, WorkItem, WorkerHandle};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// How teardown treats work still sitting in worker queues.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownMode {
    /// Finish every queued item before stopping
    Drain,
    /// Reject queued items with `ResourceGone` instead of executing them
    Immediate,
}

/// State shared between the pool front-end and its worker threads.
///
/// The resource table is the only state touched by multiple threads
/// concurrently (behind a fine-grained lock); interpreters and queues are
/// single-owner by construction.
pub(crate) struct PoolShared {
    table: RwLock<HashMap<ResourceId, Arc<ScriptRecord>>>,
    next_id: AtomicU64,
    cursor: AtomicUsize,
    discard: AtomicBool,
    // Shutdown gate. `load`/`send` hold the read side across the check and
    // the enqueue; `shutdown` flips it under the write side before the
    // teardown sentinels go out, so no item can be enqueued behind a
    // sentinel.
    down: RwLock<bool>,
}

impl PoolShared {
    fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cursor: AtomicUsize::new(0),
            discard: AtomicBool::new(false),
            down: RwLock::new(false),
        }
    }

    pub(crate) fn get(&self, id: ResourceId) -> Option<Arc<ScriptRecord>> {
        self.table.read().get(&id).cloned()
    }

    pub(crate) fn remove(&self, id: ResourceId) {
        self.table.write().remove(&id);
    }

    pub(crate) fn discarding(&self) -> bool {
        self.discard.load(Ordering::Acquire)
    }
}

/// A process-wide pool of isolated script-execution workers.
///
/// Each worker thread owns one embedded interpreter and a private FIFO
/// queue; scripts are assigned to a worker round-robin at load time and
/// never rebound afterwards. The pool is an explicit context object: create
/// it at startup, pass it where scripts are loaded, tear it down (or drop
/// it) at exit.
pub struct ScriptPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<WorkerHandle>>,
    worker_count: usize,
    config: PoolConfig,
}

impl ScriptPool {
    /// Start the pool, spawning `config.effective_workers()` workers, each
    /// with its own interpreter. If any worker fails to start, the ones
    /// already running are torn down and the startup error is returned.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let shared = Arc::new(PoolShared::new());
        let count = config.effective_workers();
        let mut workers: Vec<WorkerHandle> = Vec::with_capacity(count);

        for index in 0..count {
            match worker::spawn(index, &config, Arc::clone(&shared)) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    for w in workers.iter() {
                        let _ = w.queue.send(WorkItem::Shutdown);
                    }
                    for w in workers.iter_mut() {
                        w.join();
                    }
                    return Err(err);
                }
            }
        }

        tracing::debug!(workers = count, "script pool initialized");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_count: count,
            config,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Load a script and return its handle immediately; compilation runs
    /// asynchronously on the assigned worker. Exactly one event follows on
    /// the owner mailbox: `Loaded` or `LoadFailed`.
    ///
    /// Fails synchronously with `BadInput` when the source is empty or not
    /// UTF-8, or when the owner mailbox can no longer be delivered to.
    pub fn load(
        &self,
        source: impl Into<Payload>,
        owner: OwnerMailbox,
        name: &str,
    ) -> Result<ScriptHandle, PoolError> {
        // Held across the enqueue below; see `PoolShared::down`.
        let down = self.shared.down.read();
        if *down {
            return Err(PoolError::Shutdown);
        }

        let source = source.into();
        if source.is_empty() {
            return Err(PoolError::BadInput("script source is empty".to_string()));
        }
        if source.as_utf8().is_err() {
            return Err(PoolError::BadInput(
                "script source is not valid UTF-8".to_string(),
            ));
        }
        if owner.is_closed() {
            return Err(PoolError::BadInput(
                "owner mailbox is not addressable".to_string(),
            ));
        }

        let id = ResourceId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let index = self.shared.cursor.fetch_add(1, Ordering::Relaxed) % self.worker_count;
        let queue = self.workers.lock()[index].queue.clone();

        let record = Arc::new(ScriptRecord::new(id, name, owner, index, queue));
        self.shared.table.write().insert(id, Arc::clone(&record));

        let item = WorkItem::Load {
            record: Arc::clone(&record),
            source,
        };
        if record.queue().send(item).is_err() {
            self.shared.remove(id);
            return Err(PoolError::Shutdown);
        }

        tracing::debug!(%id, worker = index, %name, "script load enqueued");
        Ok(ScriptHandle::new(record))
    }

    /// Enqueue a message for a loaded script. Exactly one event follows on
    /// the owner mailbox: `Reply`, `RuntimeError` or `ResourceGone`.
    ///
    /// Fails with `ResourceGone` when the id was never created, already
    /// destroyed, or pending destruction - even if the destroy instruction
    /// has not executed yet. A queue failure is `Allocation`, distinguishable
    /// from `ResourceGone` because it is transient.
    pub fn send(&self, id: ResourceId, payload: impl Into<Payload>) -> Result<(), PoolError> {
        // Held across the enqueue below; see `PoolShared::down`.
        let down = self.shared.down.read();
        if *down {
            return Err(PoolError::Shutdown);
        }

        let record = self.shared.get(id).ok_or(PoolError::ResourceGone)?;
        if !record.add_ref() {
            return Err(PoolError::ResourceGone);
        }

        let item = WorkItem::Send {
            record: Arc::clone(&record),
            payload: payload.into(),
        };
        if record.queue().send(item).is_err() {
            // Roll back the in-flight reference taken above.
            record.release();
            return Err(PoolError::Allocation("worker queue unavailable".to_string()));
        }
        Ok(())
    }

    /// Tear the pool down: stop every worker, then release all resource
    /// records regardless of outstanding refcount. Idempotent; also runs on
    /// drop. Outstanding handles stay valid to hold but any further `send`
    /// against them yields `ResourceGone`.
    pub fn shutdown(&self, mode: ShutdownMode) {
        {
            // Waits out any `load`/`send` that already passed its gate check;
            // once the write guard is held their items are in the queues and
            // will drain ahead of the sentinels.
            let mut down = self.shared.down.write();
            if *down {
                return;
            }
            *down = true;
        }

        if mode == ShutdownMode::Immediate {
            self.shared.discard.store(true, Ordering::Release);
            // Queued items observe the defunct flag and report ResourceGone
            // instead of executing.
            for record in self.shared.table.read().values() {
                record.mark_defunct();
            }
        }

        let mut workers = self.workers.lock();
        for w in workers.iter() {
            let _ = w.queue.send(WorkItem::Shutdown);
        }
        for w in workers.iter_mut() {
            w.join();
        }

        // Workers are gone; release every record still in the table.
        let records: Vec<Arc<ScriptRecord>> = {
            let mut table = self.shared.table.write();
            table.drain().map(|(_, record)| record).collect()
        };
        for record in &records {
            record.mark_defunct();
            record.set_status(ScriptStatus::Destroyed);
        }

        tracing::debug!(mode = ?mode, released = records.len(), "script pool torn down");
    }
}

impl Drop for ScriptPool {
    fn drop(&mut self) {
        let mode = if self.config.drain_on_drop {
            ShutdownMode::Drain
        } else {
            ShutdownMode::Immediate
        };
        self.shutdown(mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::mailbox;

    #[test]
    fn empty_source_is_bad_input() {
        let pool = ScriptPool::new(PoolConfig::default()).unwrap();
        let (owner, _rx) = mailbox();
        let err = pool.load("", owner, "script").unwrap_err();
        assert!(matches!(err, PoolError::BadInput(_)));
    }

    #[test]
    fn non_utf8_source_is_bad_input() {
        let pool = ScriptPool::new(PoolConfig::default()).unwrap();
        let (owner, _rx) = mailbox();
        let err = pool
            .load(Payload::new(vec![0xff, 0xfe]), owner, "script")
            .unwrap_err();
        assert!(matches!(err, PoolError::BadInput(_)));
    }

    #[test]
    fn closed_owner_mailbox_is_bad_input() {
        let pool = ScriptPool::new(PoolConfig::default()).unwrap();
        let (owner, rx) = mailbox();
        drop(rx);
        let err = pool.load("return 1", owner, "script").unwrap_err();
        assert!(matches!(err, PoolError::BadInput(_)));
    }

    #[test]
    fn unknown_resource_id_is_gone() {
        let pool = ScriptPool::new(PoolConfig::default()).unwrap();
        let err = pool.send(ResourceId(999), "hello").unwrap_err();
        assert!(matches!(err, PoolError::ResourceGone));
    }

    #[test]
    fn round_robin_assignment_cycles_workers() {
        let pool = ScriptPool::new(PoolConfig {
            workers: 2,
            ..Default::default()
        })
        .unwrap();
        let (owner, _rx) = mailbox();

        let a = pool.load("return 1", owner.clone(), "a").unwrap();
        let b = pool.load("return 2", owner.clone(), "b").unwrap();
        let c = pool.load("return 3", owner, "c").unwrap();

        assert_eq!(a.worker(), 0);
        assert_eq!(b.worker(), 1);
        assert_eq!(c.worker(), 0);
    }

    #[test]
    fn shutdown_is_idempotent_and_blocks_new_work() {
        let pool = ScriptPool::new(PoolConfig::default()).unwrap();
        pool.shutdown(ShutdownMode::Drain);
        pool.shutdown(ShutdownMode::Drain);

        let (owner, _rx) = mailbox();
        assert!(matches!(
            pool.load("return 1", owner, "script"),
            Err(PoolError::Shutdown)
        ));
        assert!(matches!(
            pool.send(ResourceId(1), "x"),
            Err(PoolError::Shutdown)
        ));
    }

    #[test]
    fn teardown_marks_surviving_handles_destroyed() {
        let pool = ScriptPool::new(PoolConfig::default()).unwrap();
        let (owner, _rx) = mailbox();
        let handle = pool.load("return 1", owner, "script").unwrap();

        pool.shutdown(ShutdownMode::Drain);
        assert_eq!(handle.status(), ScriptStatus::Destroyed);
    }

    #[test]
    fn zero_worker_hint_still_starts_one() {
        let pool = ScriptPool::new(PoolConfig {
            workers: 0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(pool.worker_count(), 1);
    }
}
