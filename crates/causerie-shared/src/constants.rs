/// Prefix of client-assigned placeholder message identifiers.
/// Hub-assigned identifiers never start with this.
pub const LOCAL_ID_PREFIX: &str = "local:";

/// Sentinel error string the hub returns when the sender is muted or banned.
/// On receipt the client short-circuits further sends locally for
/// `MUTE_COOLDOWN_SECS` without contacting the hub again.
pub const ERR_SENDER_MUTED: &str = "sender is muted";

/// Local send cooldown after a mute/ban rejection, in seconds.
pub const MUTE_COOLDOWN_SECS: u64 = 60;

/// Inactivity window after which the emitting client sends the typing stop
/// signal, in seconds. The receiving side has no expiry of its own.
pub const TYPING_STOP_SECS: u64 = 3;

/// Number of messages a linkman's in-memory map is trimmed to on focus.
pub const FOCUS_TRIM_LIMIT: usize = 50;

/// Below this held-message count, focusing a linkman triggers a history
/// backfill request.
pub const HISTORY_BACKFILL_THRESHOLD: usize = 15;

/// Interval of the foreground update-history tick, in seconds.
pub const UPDATE_HISTORY_INTERVAL_SECS: u64 = 30;

/// Interval of the focused-group online-member poll, in seconds.
pub const ONLINE_POLL_INTERVAL_SECS: u64 = 60;

/// Default hub WebSocket endpoint.
pub const DEFAULT_HUB_URL: &str = "ws://127.0.0.1:9200/hub";

/// mpsc buffer sizes for the channel task.
pub const CHANNEL_COMMAND_BUFFER: usize = 256;
pub const CHANNEL_NOTIFICATION_BUFFER: usize = 256;
