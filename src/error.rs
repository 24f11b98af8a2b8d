// Error taxonomy for pool operations

use thiserror::Error;

/// Unified error type for script pool operations.
///
/// Only `BadInput`, `ResourceGone`, `Allocation` and `Shutdown` are returned
/// synchronously from pool calls. `Compile` and `Runtime` surface
/// asynchronously as [`ScriptEvent`](crate::ScriptEvent)s on the owner
/// mailbox; they appear here because the interpreter reports through the same
/// taxonomy.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Malformed request shape - rejected at the call boundary, never retried
    #[error("bad input: {0}")]
    BadInput(String),

    /// Script failed to parse or compile; the resource never becomes usable
    #[error("compile error: {0}")]
    Compile(String),

    /// Script executed but raised; the resource remains usable
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Target resource was destroyed or never existed
    #[error("resource gone")]
    ResourceGone,

    /// Transient resource exhaustion during allocation or enqueue
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// The pool has been torn down
    #[error("pool is shut down")]
    Shutdown,
}

impl PoolError {
    /// Stable tag for the embedding boundary, mirroring the error atoms of
    /// the wire protocol (`badarg`, `compile_error`, `memory`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            PoolError::BadInput(_) => "badarg",
            PoolError::Compile(_) => "compile_error",
            PoolError::Runtime(_) => "runtime_error",
            PoolError::ResourceGone => "resource_gone",
            PoolError::Allocation(_) => "memory",
            PoolError::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            PoolError::BadInput("not a binary".to_string()).to_string(),
            "bad input: not a binary"
        );
        assert_eq!(
            PoolError::Compile("unexpected token".to_string()).to_string(),
            "compile error: unexpected token"
        );
        assert_eq!(PoolError::ResourceGone.to_string(), "resource gone");
        assert_eq!(PoolError::Shutdown.to_string(), "pool is shut down");
    }

    #[test]
    fn boundary_kinds_are_stable() {
        assert_eq!(PoolError::BadInput(String::new()).kind(), "badarg");
        assert_eq!(PoolError::Compile(String::new()).kind(), "compile_error");
        assert_eq!(PoolError::Runtime(String::new()).kind(), "runtime_error");
        assert_eq!(PoolError::ResourceGone.kind(), "resource_gone");
        assert_eq!(PoolError::Allocation(String::new()).kind(), "memory");
        assert_eq!(PoolError::Shutdown.kind(), "shutdown");
    }
}
