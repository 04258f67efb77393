use std::time::Duration;

/// Background worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of jobs executing at once (default: `4`).
    pub concurrency: usize,
    /// Dispatcher poll interval in milliseconds (default: `1000`).
    pub poll_interval_ms: u64,
    /// Capacity of the submission-to-pool handoff queue (default: `256`).
    pub handoff_capacity: usize,
    /// A running job whose heartbeat is older than this is failed by the
    /// watchdog (default: `300`).
    pub stale_after_secs: u64,
    /// How often the watchdog scans for stale jobs (default: `60`).
    pub watchdog_interval_secs: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default |
    /// |---------------------------------|---------|
    /// | `WORKER_CONCURRENCY`            | `4`     |
    /// | `WORKER_POLL_INTERVAL_MS`       | `1000`  |
    /// | `WORKER_HANDOFF_CAPACITY`       | `256`   |
    /// | `WORKER_STALE_AFTER_SECS`       | `300`   |
    /// | `WORKER_WATCHDOG_INTERVAL_SECS` | `60`    |
    pub fn from_env() -> Self {
        let concurrency: usize = std::env::var("WORKER_CONCURRENCY")
            .unwrap_or_else(|_| "4".into())
            .parse()
            .expect("WORKER_CONCURRENCY must be a valid usize");

        let poll_interval_ms: u64 = std::env::var("WORKER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("WORKER_POLL_INTERVAL_MS must be a valid u64");

        let handoff_capacity: usize = std::env::var("WORKER_HANDOFF_CAPACITY")
            .unwrap_or_else(|_| "256".into())
            .parse()
            .expect("WORKER_HANDOFF_CAPACITY must be a valid usize");

        let stale_after_secs: u64 = std::env::var("WORKER_STALE_AFTER_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("WORKER_STALE_AFTER_SECS must be a valid u64");

        let watchdog_interval_secs: u64 = std::env::var("WORKER_WATCHDOG_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("WORKER_WATCHDOG_INTERVAL_SECS must be a valid u64");

        Self {
            concurrency: concurrency.max(1),
            poll_interval_ms,
            handoff_capacity: handoff_capacity.max(1),
            stale_after_secs,
            watchdog_interval_secs,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }

    /// Interval at which a runner refreshes the heartbeat of its job while a
    /// step is in flight: a quarter of the stale threshold, at least 1s.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs((self.stale_after_secs / 4).max(1))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 1000,
            handoff_capacity: 256,
            stale_after_secs: 300,
            watchdog_interval_secs: 60,
        }
    }
}
