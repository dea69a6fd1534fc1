use std::time::Duration;

/// Default byte length at which the accumulation buffer is flushed.
pub const DEFAULT_MAX_SEND_BLOCK_SIZE: usize = 65535;

/// Default capacity of the pending-send queue.
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Capacity of the pending-send queue, at least 1.
    pub send_queue_size: usize,
    /// Deadline applied to each transport write issued by the send task.
    /// `None` lets a flush block indefinitely.
    pub async_send_timeout: Option<Duration>,
    /// Buffered length at or above which the send task flushes even if more
    /// objects are queued.
    pub max_send_block_size: usize,
}

impl SocketConfig {
    pub fn new() -> Self {
        Self {
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
            async_send_timeout: None,
            max_send_block_size: DEFAULT_MAX_SEND_BLOCK_SIZE,
        }
    }

    pub fn with_send_queue_size(mut self, size: usize) -> Self {
        self.send_queue_size = size.max(1);
        self
    }

    pub fn with_async_send_timeout(mut self, timeout: Duration) -> Self {
        self.async_send_timeout = Some(timeout);
        self
    }

    pub fn with_max_send_block_size(mut self, size: usize) -> Self {
        self.max_send_block_size = size.max(1);
        self
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SocketConfig::default();
        assert_eq!(config.send_queue_size, 1);
        assert_eq!(config.async_send_timeout, None);
        assert_eq!(config.max_send_block_size, 65535);
    }

    #[test]
    fn test_sizes_are_clamped() {
        let config = SocketConfig::new()
            .with_send_queue_size(0)
            .with_max_send_block_size(0);
        assert_eq!(config.send_queue_size, 1);
        assert_eq!(config.max_send_block_size, 1);
    }

    #[test]
    fn test_builder_setters() {
        let config = SocketConfig::new()
            .with_send_queue_size(1000)
            .with_async_send_timeout(Duration::from_secs(3))
            .with_max_send_block_size(64);
        assert_eq!(config.send_queue_size, 1000);
        assert_eq!(config.async_send_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.max_send_block_size, 64);
    }
}
