/// Application name
pub const APP_NAME: &str = "murmur";

/// How long an acknowledged emit waits for its reply.
pub const EMIT_TIMEOUT_SECS: u64 = 10;

/// Quiet interval after the last keystroke before `typing-stop` is sent.
pub const TYPING_QUIET_MILLIS: u64 = 2_000;

/// An inbound typing flag is considered cleared after this long without an update.
pub const TYPING_GRACE_MILLIS: u64 = 6_000;

/// Maximum number of notifications retained client-side.
pub const MAX_RETAINED_NOTIFICATIONS: usize = 50;

/// First reconnect delay; doubles on each consecutive failure.
pub const RECONNECT_BASE_DELAY_MILLIS: u64 = 500;

/// Upper bound for the reconnect delay.
pub const RECONNECT_MAX_DELAY_MILLIS: u64 = 10_000;

/// Consecutive failed connect attempts before the session gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Messages per REST history page.
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 30;

/// Capacity of the session driver's command channel.
pub const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Default socket endpoint (local development backend).
pub const DEFAULT_SOCKET_URL: &str = "ws://127.0.0.1:5000/socket";

/// Default REST base URL (local development backend).
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";
