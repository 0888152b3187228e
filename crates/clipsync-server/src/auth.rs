//! Token → user resolution for the WebSocket handshake.
//!
//! The relay never decides *how* a user authenticates; it only asks an
//! [`Authenticator`] which user a hello token belongs to.

use std::collections::HashMap;

use clipsync_shared::UserId;

/// Resolve a hello token to the user it authenticates.
///
/// Must be cheap and side-effect free: it runs inline in the handshake.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<UserId>;
}

/// Development mode: any non-empty token is accepted as the user id itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenIsUser;

impl Authenticator for TokenIsUser {
    fn authenticate(&self, token: &str) -> Option<UserId> {
        if token.is_empty() {
            return None;
        }
        Some(UserId::new(token))
    }
}

/// Fixed token table loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, UserId>,
}

impl StaticTokens {
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }
}

impl Authenticator for StaticTokens {
    fn authenticate(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).cloned()
    }
}
