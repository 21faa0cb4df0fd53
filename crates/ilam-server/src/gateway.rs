//! HTTP gateway.
//!
//! | Method    | Path    | Action                                  |
//! |-----------|---------|-----------------------------------------|
//! | `GET`     | `/`     | status snapshot                         |
//! | `GET`     | `/<id>` | upgrade to a relay session              |
//! | `POST`    | `/<id>` | write the body to `<id>`'s connection   |
//! | `OPTIONS` | any     | CORS preflight (`204`)                  |
//!
//! Anything else is `405`.

use std::sync::Arc;

use axum::Router;
use axum::extract::{FromRequestParts, Request, State, WebSocketUpgrade};
use axum::http::header::{ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use ilam_core::{ConnectionId, ProtocolError, RelayError};
use metrics::counter;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument, warn};

use crate::auth::Authorizer;
use crate::config::ServerConfig;
use crate::metrics::{RELAY_POSTS_TOTAL, WS_UPGRADES_REJECTED_TOTAL};
use crate::server::ServerHandle;
use crate::status::StatusSnapshot;
use crate::websocket::handler;
use crate::websocket::session::{SessionContext, run_relay_session};

/// Methods advertised in CORS preflight responses.
const ALLOWED_METHODS: &str = "GET, OPTIONS";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registry and uptime, also handed to the authorizer.
    pub handle: ServerHandle,
    /// Authorization hook.
    pub authorizer: Arc<dyn Authorizer>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Inputs for new sessions.
    pub session: Arc<SessionContext>,
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_handler).options(preflight_handler))
        .route(
            "/{id}",
            get(upgrade_handler)
                .post(relay_handler)
                .options(preflight_handler),
        )
        .fallback(fallback_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /
async fn status_handler(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.handle.stats())
}

/// OPTIONS on a routed path.
async fn preflight_handler(State(state): State<AppState>) -> Response {
    preflight(&state.config)
}

/// Paths that name no route (`/a/b`, `/1/`, ...).
async fn fallback_handler(State(state): State<AppState>, method: Method) -> Response {
    if method == Method::OPTIONS {
        preflight(&state.config)
    } else if method == Method::GET || method == Method::POST {
        json_error(StatusCode::BAD_REQUEST, "invalid connection id")
    } else {
        StatusCode::METHOD_NOT_ALLOWED.into_response()
    }
}

/// GET /{id}
#[instrument(skip_all, fields(path = %request.uri().path()))]
async fn upgrade_handler(State(state): State<AppState>, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();

    let id = match authorize(&state, &parts).await {
        Ok(id) => id,
        Err(err) => return reject_upgrade(&err),
    };

    let limit = state.config.max_connections;
    if state.handle.registry().count() >= limit {
        return reject_upgrade(&RelayError::TooManyConnections { limit });
    }

    if !origin_allowed(&state.config.origin, &parts.headers) {
        warn!(connection_id = %id, origin = ?parts.headers.get(ORIGIN), "origin not allowed");
        counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "origin").increment(1);
        return json_error(StatusCode::FORBIDDEN, "origin not allowed");
    }

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            warn!(connection_id = %id, error = %rejection, "websocket upgrade failed");
            counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "handshake").increment(1);
            return rejection.into_response();
        }
    };

    let ctx = Arc::clone(&state.session);
    upgrade
        .max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |error| {
            warn!(connection_id = %id, %error, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let _ = run_relay_session(socket, id, ctx).await;
        })
}

/// POST /{id}
#[instrument(skip_all, fields(path = %request.uri().path()))]
async fn relay_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let id = match authorize(&state, &parts).await {
        Ok(id) => id,
        Err(err) => return relay_error(&err),
    };

    let payload = match axum::body::to_bytes(body, state.config.max_message_size).await {
        Ok(payload) => payload,
        Err(error) => {
            debug!(destination = %id, %error, "failed to read request body");
            counter!(RELAY_POSTS_TOTAL, "outcome" => "bad_body").increment(1);
            return json_error(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let len = payload.len();
    match handler::deliver(state.handle.registry(), id, payload) {
        Ok(()) => {
            debug!(destination = %id, len, "relayed http post");
            counter!(RELAY_POSTS_TOTAL, "outcome" => "delivered").increment(1);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => relay_error(&err),
    }
}

/// Parse the id from the path and run the authorization hook.
async fn authorize(state: &AppState, parts: &Parts) -> Result<ConnectionId, RelayError> {
    let id = ConnectionId::from_path(parts.uri.path()).map_err(ProtocolError::from)?;
    state.authorizer.authorize(&state.handle, parts, id).await?;
    Ok(id)
}

fn origin_allowed(expected: &str, headers: &HeaderMap) -> bool {
    expected.is_empty()
        || headers
            .get(ORIGIN)
            .is_some_and(|origin| origin.as_bytes() == expected.as_bytes())
}

fn preflight(config: &ServerConfig) -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, config.allow_origin().to_owned()),
            (ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS.to_owned()),
        ],
    )
        .into_response()
}

fn reject_upgrade(err: &RelayError) -> Response {
    debug!(error = %err, kind = err.kind(), "upgrade refused");
    counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => err.kind()).increment(1);
    error_response(err)
}

fn relay_error(err: &RelayError) -> Response {
    match err {
        RelayError::Transport { .. } => warn!(error = %err, "http relay failed"),
        _ => debug!(error = %err, kind = err.kind(), "http relay refused"),
    }
    counter!(RELAY_POSTS_TOTAL, "outcome" => err.kind()).increment(1);
    error_response(err)
}

fn error_response(err: &RelayError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_error(status, &err.to_string())
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
