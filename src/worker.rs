// Worker threads: one interpreter, one FIFO queue, strictly serial execution

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::event::ScriptEvent;
use crate::interpreter::Interpreter;
use crate::payload::Payload;
use crate::pool::PoolShared;
use crate::resource::{ScriptRecord, ScriptStatus};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// A queued unit of work, consumed exactly once by the worker it was
/// enqueued on. `Load` and `Send` each hold one counted reference to their
/// record, released after the outcome has been reported.
pub(crate) enum WorkItem {
    Load {
        record: Arc<ScriptRecord>,
        source: Payload,
    },
    Send {
        record: Arc<ScriptRecord>,
        payload: Payload,
    },
    /// Scheduled by the release that took the refcount to zero; always runs
    /// on the owning worker so only that thread mutates interpreter state.
    Destroy { record: Arc<ScriptRecord> },
    /// Teardown sentinel. The pool's shutdown gate orders every load/send
    /// enqueue ahead of it, so breaking on the sentinel drains the backlog
    /// without dropping accepted work.
    Shutdown,
}

/// Owning reference to a spawned worker: its queue plus the join handle.
pub(crate) struct WorkerHandle {
    pub(crate) queue: mpsc::UnboundedSender<WorkItem>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("worker thread panicked during shutdown");
            }
        }
    }
}

/// Spawn a worker thread owning one freshly-started interpreter.
///
/// Interpreter startup runs on the new thread (QuickJS state is `!Send`) and
/// reports back through an init channel, so a pool that cannot start all its
/// workers fails synchronously with `Allocation`.
pub(crate) fn spawn(
    index: usize,
    config: &PoolConfig,
    shared: Arc<PoolShared>,
) -> Result<WorkerHandle, PoolError> {
    let (queue, rx) = mpsc::unbounded_channel();
    let (init_tx, init_rx) = std::sync::mpsc::channel();
    let config = config.clone();

    let thread = std::thread::Builder::new()
        .name(format!("script-worker-{index}"))
        .spawn(move || {
            let interpreter = match Interpreter::new(&config) {
                Ok(interpreter) => {
                    let _ = init_tx.send(Ok(()));
                    interpreter
                }
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            Worker {
                index,
                interpreter,
                shared,
            }
            .run(rx);
        })
        .map_err(|e| PoolError::Allocation(format!("failed to spawn worker thread: {e}")))?;

    match init_rx.recv() {
        Ok(Ok(())) => Ok(WorkerHandle {
            queue,
            thread: Some(thread),
        }),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(PoolError::Allocation(
            "worker thread exited during startup".to_string(),
        )),
    }
}

/// Dedicated execution context: one interpreter, one queue, one thread.
///
/// Items execute strictly in enqueue order and each produces exactly one
/// outcome toward the record's owner. The sequential loop is the mechanism
/// that makes the non-thread-safe interpreter safe to use.
struct Worker {
    index: usize,
    interpreter: Interpreter,
    shared: Arc<PoolShared>,
}

impl Worker {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkItem>) {
        tracing::debug!(worker = self.index, "worker started");

        while let Some(item) = rx.blocking_recv() {
            match item {
                WorkItem::Load { record, source } => {
                    if self.shared.discarding() {
                        self.reject(&record);
                    } else {
                        self.execute_load(&record, &source);
                    }
                    record.release();
                }
                WorkItem::Send { record, payload } => {
                    if self.shared.discarding() {
                        self.reject(&record);
                    } else {
                        self.execute_send(&record, &payload);
                    }
                    record.release();
                }
                WorkItem::Destroy { record } => self.execute_destroy(&record),
                WorkItem::Shutdown => break,
            }
        }

        tracing::debug!(
            worker = self.index,
            scripts = self.interpreter.script_count(),
            "worker stopping, releasing interpreter"
        );
    }

    fn execute_load(&mut self, record: &Arc<ScriptRecord>, source: &Payload) {
        // The pool may have defuncted the record between enqueue and
        // execution (teardown); compiling it would create state nobody can
        // ever use.
        if record.is_defunct() {
            self.reject(record);
            return;
        }

        let text = match source.as_utf8() {
            Ok(text) => text,
            Err(e) => {
                self.fail_load(record, format!("script source is not UTF-8: {e}"));
                return;
            }
        };

        match self.interpreter.compile(record.id, text) {
            Ok(()) => {
                record.set_status(ScriptStatus::Ready);
                tracing::debug!(worker = self.index, id = %record.id, name = %record.name, "script loaded");
                record.notify(ScriptEvent::Loaded { id: record.id });
            }
            Err(err) => self.fail_load(record, err.to_string()),
        }
    }

    /// Compile failure: the resource is destroyed immediately, never left
    /// half-initialized. The defunct flag makes later sends fail with
    /// `ResourceGone` while the host handle still holds its reference.
    fn fail_load(&mut self, record: &Arc<ScriptRecord>, message: String) {
        record.mark_defunct();
        record.set_status(ScriptStatus::LoadFailed);
        self.interpreter.drop_script(record.id);
        self.shared.remove(record.id);
        tracing::debug!(worker = self.index, id = %record.id, %message, "script failed to load");
        record.notify(ScriptEvent::LoadFailed {
            id: record.id,
            message,
        });
    }

    fn execute_send(&mut self, record: &Arc<ScriptRecord>, payload: &Payload) {
        // Destroyed between enqueue and execution: report, never silently drop.
        if record.is_defunct() {
            self.reject(record);
            return;
        }

        record.set_status(ScriptStatus::Processing);
        match self.interpreter.invoke(record.id, payload) {
            Ok(reply) => {
                record.set_status(ScriptStatus::Ready);
                record.notify(ScriptEvent::Reply {
                    id: record.id,
                    payload: reply,
                });
            }
            Err(PoolError::ResourceGone) => {
                record.notify(ScriptEvent::ResourceGone { id: record.id });
            }
            Err(err) => {
                // The script raised; compiled state is intact and usable.
                record.set_status(ScriptStatus::Ready);
                record.notify(ScriptEvent::RuntimeError {
                    id: record.id,
                    message: err.to_string(),
                });
            }
        }
    }

    fn execute_destroy(&mut self, record: &Arc<ScriptRecord>) {
        let existed = self.interpreter.drop_script(record.id);
        self.shared.remove(record.id);
        record.set_status(ScriptStatus::Destroyed);
        tracing::debug!(worker = self.index, id = %record.id, existed, "script destroyed");
    }

    fn reject(&self, record: &Arc<ScriptRecord>) {
        record.notify(ScriptEvent::ResourceGone { id: record.id });
    }
}
