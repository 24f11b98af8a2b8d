//! Isolated worker pool for embedded QuickJS script execution.
//!
//! A [`ScriptPool`] owns a fixed set of worker threads, each driving one
//! private QuickJS interpreter through a FIFO queue. Callers hand over opaque
//! script sources and messages; results come back asynchronously as
//! [`ScriptEvent`]s on the owner mailbox captured at load time. QuickJS
//! contexts are `!Send`, so isolation is by construction: one interpreter per
//! worker, never shared, never rebound.
//!
//! ```no_run
//! use scriptpool::{mailbox, PoolConfig, ScriptPool};
//!
//! # async fn demo() -> Result<(), scriptpool::PoolError> {
//! let pool = ScriptPool::new(PoolConfig { workers: 2, ..Default::default() })?;
//! let (owner, mut events) = mailbox();
//!
//! let script = pool.load("return 1+1", owner, "adder")?;
//! pool.send(script.id(), "")?;
//!
//! // Loaded, then Reply { payload: "2" }
//! let _loaded = events.recv().await;
//! let _reply = events.recv().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod event;
mod interpreter;
mod payload;
mod pool;
mod resource;
mod worker;

pub use config::PoolConfig;
pub use error::PoolError;
pub use event::{mailbox, OwnerMailbox, ScriptEvent};
pub use payload::Payload;
pub use pool::{ScriptPool, ShutdownMode};
pub use resource::{ResourceId, ScriptHandle, ScriptStatus};
