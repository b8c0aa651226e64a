/// Default real-time endpoint
pub const DEFAULT_WS_URL: &str = "ws://localhost:3001";

/// Reconnect attempts before the session gives up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base delay for linear reconnect backoff, in milliseconds
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 3000;

/// How long a transmitted message may stay `sent` before a delivery timeout
/// is reported, in milliseconds
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 30_000;

/// Interval between client heartbeats while the link is open, in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// How often the session purges expired disappearing messages, in milliseconds
pub const DEFAULT_PURGE_INTERVAL_MS: u64 = 60_000;

/// Maximum number of search results returned
pub const MAX_SEARCH_RESULTS: usize = 100;

/// Query parameter carrying the session token on the connect URL
pub const TOKEN_QUERY_PARAM: &str = "token";

/// BLAKE3 key derivation context for hidden-chat password digests
pub const KDF_CONTEXT_HIDDEN_CHAT: &str = "courier-hidden-chat-v1";
