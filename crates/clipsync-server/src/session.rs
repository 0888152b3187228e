//! Per-connection protocol state machine.
//!
//! Every accepted socket goes `AwaitingHandshake -> Joined -> Closing` and
//! never back. The first frame must be a hello; after it the device joins
//! its user's room, a writer task takes sole ownership of the sink, and the
//! receive loop forwards clips into the hub until something ends the
//! session. Teardown always runs through [`Hub::leave`], which ends the
//! writer's mailbox; the writer then sends the one and only close frame.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use clipsync_shared::{Clip, DeviceId, Envelope, Message, UserId};

use crate::api::AppState;
use crate::error::{CloseReason, HandshakeError};
use crate::hub::{Hub, Mailbox};
use crate::rate_limit::ClipThrottle;

/// How long teardown waits for the writer to flush its close frame.
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Drive one upgraded socket to completion.
pub async fn run(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let span = info_span!("session", conn = %Uuid::new_v4(), peer = %peer);
    drive(socket, state).instrument(span).await
}

async fn drive(mut socket: WebSocket, state: AppState) {
    let cancel = state.shutdown.child_token();

    // -----------------------------------------------------------------------
    // AwaitingHandshake
    // -----------------------------------------------------------------------
    let (user_id, device_id) = match handshake(&mut socket, &state, &cancel).await {
        Ok(identity) => identity,
        Err(e) => {
            match e.close_reason() {
                Some(reason) => {
                    warn!(error = %e, code = reason.code(), "Handshake failed");
                    if let Err(e) = socket.send(WsMessage::Close(Some(reason.into_frame()))).await {
                        debug!(error = %e, "Could not send close frame");
                    }
                }
                None => debug!(error = %e, "Connection ended before handshake"),
            }
            return;
        }
    };

    // -----------------------------------------------------------------------
    // Joined
    // -----------------------------------------------------------------------
    let (mailbox, registration) = state.hub.join(user_id.clone(), device_id.clone()).await;
    debug!(epoch = registration.epoch(), "Handshake complete");

    let (sink, stream) = socket.split();
    let (close_tx, close_rx) = oneshot::channel();
    let mut writer = tokio::spawn(
        write_loop(sink, mailbox, close_rx, cancel.clone()).instrument(Span::current()),
    );

    let reason = read_loop(stream, &state, &user_id, &device_id, &cancel).await;

    // -----------------------------------------------------------------------
    // Closing
    // -----------------------------------------------------------------------
    // The writer may already be gone; then there is nobody left to tell.
    let _ = close_tx.send(reason);
    state.hub.leave(registration).await;

    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        warn!("Writer stalled during teardown, aborting");
        writer.abort();
    }

    info!(
        user = %user_id,
        device = %device_id,
        code = reason.code(),
        "Session closed"
    );
}

async fn handshake(
    socket: &mut WebSocket,
    state: &AppState,
    cancel: &CancellationToken,
) -> Result<(UserId, DeviceId), HandshakeError> {
    let timeout = state.config.handshake_timeout;

    let text = tokio::select! {
        _ = cancel.cancelled() => return Err(HandshakeError::Shutdown),
        first = tokio::time::timeout(timeout, first_text(socket)) => {
            first.map_err(|_| HandshakeError::Timeout(timeout))??
        }
    };

    let hello = Envelope::from_json(&text)?.into_hello()?;
    let device_id = hello.device_id()?;
    let user_id = state
        .authenticator
        .authenticate(&hello.token)
        .ok_or(HandshakeError::Rejected)?;

    if !hello.user_id.is_empty() && hello.user_id != user_id.as_str() {
        debug!(
            claimed = %hello.user_id,
            user = %user_id,
            "Ignoring client-supplied user_id"
        );
    }

    Ok((user_id, device_id))
}

/// First text frame, skipping control frames.
async fn first_text(socket: &mut WebSocket) -> Result<String, HandshakeError> {
    loop {
        match socket.recv().await {
            Some(Ok(WsMessage::Text(text))) => return Ok(text),
            Some(Ok(WsMessage::Binary(_))) => return Err(HandshakeError::Binary),
            Some(Ok(WsMessage::Close(_))) | None => return Err(HandshakeError::Disconnected),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(HandshakeError::Transport(e)),
        }
    }
}

/// Decode inbound envelopes until the session ends, returning why it ended.
///
/// Never writes to the socket.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    user_id: &UserId,
    device_id: &DeviceId,
    cancel: &CancellationToken,
) -> CloseReason {
    let mut throttle =
        ClipThrottle::from_limits(state.config.clip_rate_per_sec, state.config.clip_burst);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return CloseReason::Normal,
            frame = stream.next() => frame,
        };

        let text = match frame {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Binary(_))) => {
                warn!("Binary frame from device");
                return CloseReason::Protocol("text frames only");
            }
            Some(Ok(WsMessage::Close(_))) | None => return CloseReason::Normal,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "Receive failed");
                return CloseReason::Normal;
            }
        };

        let envelope = match Envelope::from_json(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Malformed envelope");
                return CloseReason::Protocol("malformed message");
            }
        };

        match envelope.into_message() {
            Message::Clip(clip) => {
                if let Err(reason) =
                    forward_clip(clip, &mut throttle, &state.hub, user_id, device_id).await
                {
                    return reason;
                }
            }
            Message::Hello(_) => debug!("Ignoring repeated hello"),
            Message::Unknown(kind) => debug!(kind = %kind, "Ignoring envelope"),
        }
    }
}

async fn forward_clip(
    clip: Clip,
    throttle: &mut Option<ClipThrottle>,
    hub: &Hub,
    user_id: &UserId,
    device_id: &DeviceId,
) -> Result<(), CloseReason> {
    if let Err(e) = clip.check_inline_threshold() {
        warn!(msg_id = %clip.msg_id, error = %e, "Inline data over threshold");
        return Err(CloseReason::Protocol("inline data too large"));
    }

    if let Some(throttle) = throttle.as_mut() {
        if !throttle.try_acquire() {
            warn!(msg_id = %clip.msg_id, "Clip rate exceeded, dropping");
            return Ok(());
        }
    }

    let msg_id = clip.msg_id.clone();
    let payload = Envelope::clip(clip.stamped(device_id))
        .to_json()
        .map_err(|e| {
            error!(msg_id = %msg_id, error = %e, "Failed to encode clip");
            CloseReason::Internal("encode failure")
        })?;

    debug!(msg_id = %msg_id, bytes = payload.len(), "Forwarding clip");
    hub.broadcast(user_id, device_id, Bytes::from(payload)).await;
    Ok(())
}

/// Sole owner of the sink: drains the mailbox, then sends the close frame.
async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut mailbox: Mailbox,
    mut close_rx: oneshot::Receiver<CloseReason>,
    cancel: CancellationToken,
) {
    while let Some(payload) = mailbox.recv().await {
        if let Err(e) = sink.send(to_frame(payload)).await {
            debug!(error = %e, "Send failed, ending session");
            cancel.cancel();
            return;
        }
    }

    // End-of-stream: either our own leave (reason recorded just before it)
    // or a newer connection for the same device took over the registration.
    let reason = close_rx.try_recv().unwrap_or(CloseReason::Normal);
    if let Err(e) = sink.send(WsMessage::Close(Some(reason.into_frame()))).await {
        debug!(error = %e, "Could not send close frame");
    }

    // A superseded connection must stop forwarding even if the peer never
    // answers the close.
    cancel.cancel();
}

fn to_frame(payload: Bytes) -> WsMessage {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => WsMessage::Text(text),
        Err(e) => WsMessage::Binary(e.into_bytes()),
    }
}
