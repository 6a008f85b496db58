use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_RETRY_WARN_THRESHOLD: u32 = 3;
pub const DEFAULT_STATUS_TIMEOUT_MS: u64 = 10_000;

/// Lee una variable de entorno y la parsea; si no está o no parsea, usa el default.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cada cuánto se revisa si el job terminó o fue cancelado
    pub poll_interval: Duration,
    /// A partir de cuántos fallos de un mismo elemento se avisa en el log
    pub retry_warn_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            retry_warn_threshold: DEFAULT_RETRY_WARN_THRESHOLD,
        }
    }
}

impl SchedulerConfig {
    /// SCHEDULER_POLL_MS, RETRY_WARN_THRESHOLD
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_millis(env_or(
                "SCHEDULER_POLL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            retry_warn_threshold: env_or("RETRY_WARN_THRESHOLD", DEFAULT_RETRY_WARN_THRESHOLD),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Tiempo máximo para que un worker recién conectado conteste su estado
    pub status_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            status_timeout: Duration::from_millis(DEFAULT_STATUS_TIMEOUT_MS),
        }
    }
}

impl PoolConfig {
    /// STATUS_TIMEOUT_MS
    pub fn from_env() -> Self {
        Self {
            status_timeout: Duration::from_millis(env_or(
                "STATUS_TIMEOUT_MS",
                DEFAULT_STATUS_TIMEOUT_MS,
            )),
        }
    }
}
