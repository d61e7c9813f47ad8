//! Defaults for node-only configuration keys. Game defaults live in
//! `tenspot_types`.

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_JSON: bool = false;

pub const DEFAULT_POSTGRES_POOL_SIZE: usize = 4;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 50;
pub const DEFAULT_RETRY_MAX_MS: u64 = 1_000;
