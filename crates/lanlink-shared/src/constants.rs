/// Application name
pub const APP_NAME: &str = "Lanlink";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_CONVERSATION_KEY: &str = "lanlink-conversation-key-v1";
pub const KDF_CONTEXT_AUTH_TOKEN: &str = "lanlink-auth-token-v1";

/// Marker mixed into group conversation keys so a group key can never
/// collide with a direct key for the same identifier strings.
pub const GROUP_KEY_MARKER: &str = "group";

/// Secret used when no `MESSAGE_SECRET` is configured.  Development only;
/// anyone who knows this constant can derive every conversation key.
pub const DEFAULT_MESSAGE_SECRET: &str = "fallback-message-secret";

/// SSID recorded when the client does not report one.
pub const UNKNOWN_SSID: &str = "Unknown Network";

/// A user's network history keeps only this many most-recent entries.
pub const NETWORK_HISTORY_LIMIT: u32 = 50;

/// Inactive groups are deleted once their last activity is older than this.
pub const GROUP_RETENTION_HOURS: i64 = 24;

/// How often the stale-group reaper runs.
pub const REAP_INTERVAL_SECS: u64 = 3600;

/// Default WebSocket / HTTP listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Subnet substituted for loopback clients when loopback testing is enabled.
pub const LOOPBACK_TEST_ADDR: &str = "192.168.1.100";
