use parley_core::wire::DEFAULT_MAX_FRAME_BYTES;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 1;
pub const DEFAULT_BACKOFF_CAP_SECS: u64 = 10;
pub const DEFAULT_CONFIRM_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;
pub const DEFAULT_UPDATE_CAPACITY: usize = 256;

/// Tunables for one engine instance. `Default` draws a fresh conversation id
/// and uses the stock backoff, timeout, and channel sizes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub conversation_id: String,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Consecutive reconnect attempts before the engine gives up.
    /// None retries forever.
    pub max_retries: Option<u32>,
    pub confirm_timeout: Duration,
    pub max_frame_bytes: usize,
    pub command_capacity: usize,
    pub update_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            backoff_base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
            backoff_cap: Duration::from_secs(DEFAULT_BACKOFF_CAP_SECS),
            max_retries: None,
            confirm_timeout: Duration::from_secs(DEFAULT_CONFIRM_TIMEOUT_SECS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            update_capacity: DEFAULT_UPDATE_CAPACITY,
        }
    }
}
