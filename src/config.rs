// Pool configuration

use std::time::Duration;

/// Configuration for a [`ScriptPool`](crate::ScriptPool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads to spawn. `0` is treated as `1`: the pool
    /// always makes progress with at least one worker.
    pub workers: usize,

    /// Memory limit per interpreter in bytes
    pub memory_limit: usize,

    /// Execution budget per message; a script exceeding it is interrupted
    /// and reported as a runtime error
    pub cpu_time_limit: Duration,

    /// Whether dropping the pool drains queued work before stopping. When
    /// false, queued items are rejected instead of executed.
    pub drain_on_drop: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            memory_limit: 32 * 1024 * 1024, // 32MB
            cpu_time_limit: Duration::from_secs(30),
            drain_on_drop: true,
        }
    }
}

impl PoolConfig {
    /// Worker count with the zero-hint fallback applied
    pub fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.memory_limit, 32 * 1024 * 1024);
        assert_eq!(config.cpu_time_limit, Duration::from_secs(30));
        assert!(config.drain_on_drop);
    }

    #[test]
    fn zero_workers_falls_back_to_one() {
        let config = PoolConfig {
            workers: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_workers(), 1);
    }

    #[test]
    fn explicit_worker_count_is_kept() {
        let config = PoolConfig {
            workers: 4,
            ..Default::default()
        };
        assert_eq!(config.effective_workers(), 4);
    }
}
