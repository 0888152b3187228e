//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use clipsync_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MAILBOX_CAPACITY};
use clipsync_shared::UserId;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Human-readable name for this relay, reported by `/info`.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Per-device outbound mailbox capacity.
    /// Env: `MAILBOX_CAPACITY`
    /// Default: `32`
    pub mailbox_capacity: usize,

    /// How long a new connection may take to send its hello.
    /// Env: `HANDSHAKE_TIMEOUT_SECS`
    /// Default: `10`
    pub handshake_timeout: Duration,

    /// Largest WebSocket message accepted from a device. Leaves room for a
    /// base64-encoded 64 KiB inline clip plus its envelope.
    /// Env: `MAX_FRAME_BYTES`
    /// Default: 256 KiB
    pub max_frame_bytes: usize,

    /// Sustained clips per second a single connection may send.
    /// Env: `CLIP_RATE_PER_SEC`
    /// Default: `0` (unlimited; every clip is fanned out)
    pub clip_rate_per_sec: f64,

    /// Burst of clips a single connection may send at once. Only used
    /// when `clip_rate_per_sec` is positive.
    /// Env: `CLIP_BURST`
    /// Default: `40`
    pub clip_burst: f64,

    /// Fixed `token -> user` table.
    /// Env: `AUTH_TOKENS` (`token=user,token2=user2`)
    /// Default: unset, every non-empty token is its own user (dev only).
    pub auth_tokens: Option<HashMap<String, UserId>>,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            instance_name: "clipsync relay".to_string(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            handshake_timeout: Duration::from_secs(10),
            max_frame_bytes: 256 * 1024,
            clip_rate_per_sec: 0.0,
            clip_burst: 40.0,
            auth_tokens: None,
            admin_token: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("instance_name", &self.instance_name)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("clip_rate_per_sec", &self.clip_rate_per_sec)
            .field("clip_burst", &self.clip_burst)
            .field("auth_tokens", &self.auth_tokens.as_ref().map(|t| t.len()))
            .field("admin_enabled", &self.admin_token.is_some())
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        parse_into(&lookup, "MAILBOX_CAPACITY", &mut config.mailbox_capacity);
        if config.mailbox_capacity == 0 {
            tracing::warn!("MAILBOX_CAPACITY must be positive, using default");
            config.mailbox_capacity = DEFAULT_MAILBOX_CAPACITY;
        }

        let mut timeout_secs = config.handshake_timeout.as_secs();
        parse_into(&lookup, "HANDSHAKE_TIMEOUT_SECS", &mut timeout_secs);
        config.handshake_timeout = Duration::from_secs(timeout_secs.max(1));

        parse_into(&lookup, "MAX_FRAME_BYTES", &mut config.max_frame_bytes);
        parse_into(&lookup, "CLIP_RATE_PER_SEC", &mut config.clip_rate_per_sec);
        parse_into(&lookup, "CLIP_BURST", &mut config.clip_burst);

        if let Some(raw) = lookup("AUTH_TOKENS") {
            match parse_auth_tokens(&raw) {
                Ok(tokens) if !tokens.is_empty() => config.auth_tokens = Some(tokens),
                Ok(_) => tracing::warn!("AUTH_TOKENS is empty, ignoring"),
                Err(e) => tracing::warn!(error = %e, "Invalid AUTH_TOKENS, ignoring"),
            }
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
        }
    }
}

/// Parse `token=user,token2=user2` into a lookup table.
fn parse_auth_tokens(raw: &str) -> Result<HashMap<String, UserId>, String> {
    let mut tokens = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (token, user) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected token=user, got {pair:?}"))?;
        let (token, user) = (token.trim(), user.trim());
        if token.is_empty() || user.is_empty() {
            return Err(format!("empty token or user in {pair:?}"));
        }
        tokens.insert(token.to_string(), UserId::new(user));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.mailbox_capacity, 32);
        assert_eq!(config.clip_rate_per_sec, 0.0);
        assert!(config.auth_tokens.is_none());
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("MAILBOX_CAPACITY", "8"),
            ("HANDSHAKE_TIMEOUT_SECS", "3"),
            ("CLIP_RATE_PER_SEC", "5"),
            ("CLIP_BURST", "10"),
            ("AUTH_TOKENS", "abc=alice, def=bob"),
            ("ADMIN_TOKEN", "root"),
        ]));

        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.mailbox_capacity, 8);
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.clip_rate_per_sec, 5.0);
        assert_eq!(config.clip_burst, 10.0);
        let tokens = config.auth_tokens.unwrap();
        assert_eq!(tokens.get("def"), Some(&UserId::new("bob")));
        assert_eq!(config.admin_token.as_deref(), Some("root"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("MAILBOX_CAPACITY", "0"),
            ("AUTH_TOKENS", "missing-separator"),
            ("ADMIN_TOKEN", ""),
        ]));

        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.mailbox_capacity, DEFAULT_MAILBOX_CAPACITY);
        assert!(config.auth_tokens.is_none());
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_parse_auth_tokens() {
        let tokens = parse_auth_tokens("t1=u1,,t2 = u2 ").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens["t2"], UserId::new("u2"));

        assert!(parse_auth_tokens("t1=").is_err());
    }
}
