//! Engine configuration.
//!
//! All settings have defaults taken from `causerie_shared::constants`, so an
//! engine can be built with `EngineConfig::default()` for tests and local
//! development.

use causerie_shared::constants::{
    DEFAULT_PAGE_SIZE, EVENT_CHANNEL_CAPACITY, LOCK_SHARDS, MAX_MESSAGE_LEN, MAX_PAGE_SIZE,
    PRESENCE_QUEUE_DEPTH,
};
use causerie_shared::permissions::PermissionPolicy;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Role default table for plain members of groups and channels.
    pub permissions: PermissionPolicy,

    /// Maximum text length of a message, in characters.
    pub max_message_len: usize,

    /// History page size used when the caller does not ask for one.
    pub default_page_size: usize,

    /// Upper bound applied to every history read.
    pub max_page_size: usize,

    /// Per-subscriber presence queue depth.
    pub presence_queue_depth: usize,

    /// Capacity of the outbound event channel. Slow consumers lag and lose
    /// events rather than slowing the engine down.
    pub event_capacity: usize,

    /// Number of shards in the keyed lock arena.
    pub lock_shards: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            permissions: PermissionPolicy::default(),
            max_message_len: MAX_MESSAGE_LEN,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            presence_queue_depth: PRESENCE_QUEUE_DEPTH,
            event_capacity: EVENT_CHANNEL_CAPACITY,
            lock_shards: LOCK_SHARDS,
        }
    }
}

impl EngineConfig {
    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        let config = EngineConfig::default();
        assert_eq!(config.page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(10_000)), MAX_PAGE_SIZE);
    }
}
