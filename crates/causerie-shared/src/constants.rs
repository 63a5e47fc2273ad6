/// Application name
pub const APP_NAME: &str = "Causerie";

/// Maximum text length of a message, in characters
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Default number of messages returned by a history read
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Upper bound on the number of messages a history read may return
pub const MAX_PAGE_SIZE: usize = 100;

/// Per-subscriber queue depth for presence events; overflow is dropped
pub const PRESENCE_QUEUE_DEPTH: usize = 64;

/// Capacity of the outbound engine event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Number of shards in the keyed lock arena
pub const LOCK_SHARDS: usize = 16;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Header carrying the authenticated actor id, set by the auth layer
pub const ACTOR_HEADER: &str = "x-actor-id";
