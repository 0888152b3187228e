/// Largest clip payload carried inline in `clip.data` (64 KiB).
/// Anything bigger travels out-of-band and is referenced by `clip.upload_url`.
pub const MAX_INLINE_BYTES: usize = 64 * 1024;

/// Default per-device outbound mailbox capacity
pub const DEFAULT_MAILBOX_CAPACITY: usize = 32;

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// WebSocket endpoint path
pub const WS_PATH: &str = "/ws";

/// Envelope `type` discriminators
pub const TYPE_HELLO: &str = "hello";
pub const TYPE_CLIP: &str = "clip";
