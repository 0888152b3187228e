use std::borrow::Cow;

use axum::extract::ws::{close_code, CloseFrame};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use clipsync_shared::ProtocolError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Why the relay is ending a WebSocket session, mapped onto close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Clean end of session (1000).
    Normal,
    /// Bad or missing handshake, malformed message (1002).
    Protocol(&'static str),
    /// Authentication rejected (1008).
    Policy(&'static str),
    /// Unexpected server-side failure (1011).
    Internal(&'static str),
}

impl CloseReason {
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::Normal => close_code::NORMAL,
            CloseReason::Protocol(_) => close_code::PROTOCOL,
            CloseReason::Policy(_) => close_code::POLICY,
            CloseReason::Internal(_) => close_code::ERROR,
        }
    }

    pub fn detail(&self) -> &'static str {
        match self {
            CloseReason::Normal => "",
            CloseReason::Protocol(detail)
            | CloseReason::Policy(detail)
            | CloseReason::Internal(detail) => *detail,
        }
    }

    pub fn into_frame(self) -> CloseFrame<'static> {
        CloseFrame {
            code: self.code(),
            reason: Cow::Borrowed(self.detail()),
        }
    }
}

/// Ways the hello exchange can fail before a device joins its room.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("No hello within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Peer went away before saying hello")]
    Disconnected,

    #[error("Transport error: {0}")]
    Transport(#[from] axum::Error),

    #[error("Binary frame where a JSON hello was expected")]
    Binary,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Token rejected")]
    Rejected,

    #[error("Server shutting down")]
    Shutdown,
}

impl HandshakeError {
    /// Close signal to send, or `None` when the socket is already gone.
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self {
            HandshakeError::Disconnected | HandshakeError::Transport(_) => None,
            HandshakeError::Shutdown => Some(CloseReason::Normal),
            HandshakeError::Rejected => Some(CloseReason::Policy("auth")),
            HandshakeError::Protocol(ProtocolError::MissingDeviceId) => {
                Some(CloseReason::Protocol("need device_id"))
            }
            HandshakeError::Timeout(_)
            | HandshakeError::Binary
            | HandshakeError::Protocol(_) => Some(CloseReason::Protocol("need hello")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseReason::Normal.code(), 1000);
        assert_eq!(CloseReason::Protocol("x").code(), 1002);
        assert_eq!(CloseReason::Policy("x").code(), 1008);
        assert_eq!(CloseReason::Internal("x").code(), 1011);
    }

    #[test]
    fn test_handshake_error_mapping() {
        assert_eq!(
            HandshakeError::Rejected.close_reason(),
            Some(CloseReason::Policy("auth"))
        );
        assert_eq!(
            HandshakeError::Protocol(ProtocolError::MissingDeviceId).close_reason(),
            Some(CloseReason::Protocol("need device_id"))
        );
        assert_eq!(
            HandshakeError::Protocol(ProtocolError::MissingHello).close_reason(),
            Some(CloseReason::Protocol("need hello"))
        );
        assert_eq!(HandshakeError::Disconnected.close_reason(), None);
    }

    #[test]
    fn test_server_error_status() {
        let response = ServerError::Forbidden("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
