use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, State},
    http::{HeaderMap, Method},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use clipsync_shared::constants::{MAX_INLINE_BYTES, WS_PATH};
use clipsync_shared::{DeviceId, UserId};

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::{Hub, HubStats};
use crate::session;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub authenticator: Arc<dyn Authenticator>,
    pub config: Arc<ServerConfig>,
    /// Cancelled on shutdown; every session watches a child of it.
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ServerConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            hub: Arc::new(Hub::new(config.mailbox_capacity)),
            authenticator,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route(WS_PATH, get(ws_upgrade))
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/admin/status", get(admin_status))
        .route("/admin/rooms/:user_id", get(admin_room))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    max_inline_bytes: usize,
    mailbox_capacity: usize,
}

#[derive(Serialize)]
struct AdminStatusResponse {
    name: String,
    started_at: DateTime<Utc>,
    uptime_secs: i64,
    #[serde(flatten)]
    hub: HubStats,
}

#[derive(Serialize)]
struct AdminRoomResponse {
    user_id: UserId,
    devices: Vec<DeviceId>,
}

async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.max_message_size(state.config.max_frame_bytes)
        .on_failed_upgrade(move |e| {
            warn!(peer = %addr, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| session::run(socket, addr, state))
}

async fn health_check() -> &'static str {
    "ok"
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        max_inline_bytes: MAX_INLINE_BYTES,
        mailbox_capacity: state.hub.mailbox_capacity(),
    })
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    Ok(Json(AdminStatusResponse {
        name: state.config.instance_name.clone(),
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        hub: state.hub.stats().await,
    }))
}

async fn admin_room(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<AdminRoomResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let user_id = UserId::new(user_id);
    let devices = state.hub.devices(&user_id).await;
    if devices.is_empty() {
        return Err(ServerError::NotFound(format!("No room for user {user_id}")));
    }

    Ok(Json(AdminRoomResponse { user_id, devices }))
}

/// Bind `addr` and serve until `state.shutdown` is cancelled.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting relay server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::TokenIsUser;

    fn state_with_admin(admin_token: Option<&str>) -> AppState {
        let config = ServerConfig {
            instance_name: "test relay".into(),
            admin_token: admin_token.map(str::to_string),
            ..ServerConfig::default()
        };
        AppState::new(config, Arc::new(TokenIsUser))
    }

    async fn fetch(app: Router, uri: &str, bearer: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = bearer {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_ok() {
        let app = build_router(state_with_admin(None));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_info_reports_limits() {
        let (status, json) = fetch(build_router(state_with_admin(None)), "/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "test relay");
        assert_eq!(json["max_inline_bytes"], 65536);
        assert_eq!(json["mailbox_capacity"], 32);
    }

    #[tokio::test]
    async fn test_admin_disabled_without_token() {
        let (status, json) =
            fetch(build_router(state_with_admin(None)), "/admin/status", Some("x")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(json["error"].as_str().unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn test_admin_rejects_wrong_token() {
        let app = build_router(state_with_admin(Some("root")));
        let (status, _) = fetch(app, "/admin/status", Some("wrong")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_status_and_rooms() {
        let state = state_with_admin(Some("root"));
        let (_mailbox, _registration) = state
            .hub
            .join(UserId::new("u1"), DeviceId::new("laptop"))
            .await;

        let (status, json) = fetch(build_router(state.clone()), "/admin/status", Some("root")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["rooms"], 1);
        assert_eq!(json["devices"], 1);

        let (status, json) =
            fetch(build_router(state.clone()), "/admin/rooms/u1", Some("root")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["devices"], serde_json::json!(["laptop"]));

        let (status, _) = fetch(build_router(state), "/admin/rooms/u2", Some("root")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
