use std::time::Duration;

use sibwire::BLOCK_SIZE;

/// Smallest block that still leaves room for a response header.
pub const MIN_BLOCK_SIZE: usize = 16;

/// Knobs for a single call session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Largest block sent in one transaction.
    pub block_size: usize,
    /// Total attempts per primitive when the channel reports saturation.
    pub max_attempts: u32,
    /// Pause between saturation retries.
    pub retry_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            max_attempts: 10,
            retry_delay: Duration::from_millis(10),
        }
    }
}

impl TransportConfig {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(MIN_BLOCK_SIZE);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}
