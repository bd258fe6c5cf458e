//! HTTP control surface for the campaign dashboard.
//!
//! Thin handlers over the session registry and group sync; the dashboard
//! polls `/connections/{id}/qr` every couple of seconds during pairing, so
//! every read here is served from in-memory session state.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};
use zapmux_core::types::SessionStatus;
use zapmux_core::ZapError;
use zapmux_session::{GroupSync, SessionRegistry};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    pub group_sync: Arc<GroupSync>,
}

/// Map a domain error onto a status code and an `{"error": ...}` body.
fn error_response(e: ZapError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        ZapError::NotFound(_) => StatusCode::NOT_FOUND,
        ZapError::NotConnected(_) | ZapError::InvalidState(_) => StatusCode::CONFLICT,
        ZapError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": e.to_string()})))
}

fn status_body(id: &str, status: &SessionStatus) -> Value {
    json!({
        "connectionId": id,
        "status": status.status,
        "phoneNumber": status.phone_number,
    })
}

/// `GET /health`: liveness plus how many sessions this instance holds.
async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.registry.list().await.len(),
    }))
}

/// `GET /connections`: every session this instance knows about, with the
/// stored group snapshot size per connection.
async fn list_connections(
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut connections = Vec::new();
    for (id, status) in state.registry.list().await {
        let groups_count = state
            .group_sync
            .snapshot(&id)
            .await
            .map_err(error_response)?
            .len();
        let mut entry = status_body(&id, &status);
        entry["groupsCount"] = json!(groups_count);
        connections.push(entry);
    }
    Ok(Json(json!({"connections": connections})))
}

/// `POST /connections/{id}/connect`: start (or return) the session.
async fn connect(State(state): State<ApiState>, Path(id): Path<String>) -> Json<Value> {
    info!(connection_id = %id, "dashboard requested connect");
    let status = state.registry.connect(&id).await;
    Json(status_body(&id, &status))
}

/// `GET /connections/{id}/qr`: pairing state for the dashboard poller.
///
/// Returns the latest QR only while the session is actually waiting for a
/// scan; any newer QR replaces the old one before it can be served.
async fn qr(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Json<Value> {
    match state.registry.status(&id).await {
        Some(status) => Json(json!({
            "connectionId": id,
            "status": status.status,
            "qr": status.qr.as_ref().map(|qr| qr.code.clone()),
            "qrImage": status.qr.as_ref().and_then(|qr| qr.image.clone()),
            "phoneNumber": status.phone_number,
        })),
        // The poller treats an unknown id as "session gone, stop polling".
        None => Json(json!({"connectionId": id, "status": "not_found"})),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairingCodeRequest {
    phone_number: String,
}

/// `POST /connections/{id}/pairing-code`: phone-number pairing instead of QR.
async fn pairing_code(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<PairingCodeRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let session = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| error_response(ZapError::NotFound(id.clone())))?;

    let code = session
        .request_pairing_code(&body.phone_number)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({"connectionId": id, "code": code})))
}

/// `POST /connections/{id}/disconnect`: graceful stop, credentials kept.
async fn disconnect(State(state): State<ApiState>, Path(id): Path<String>) -> Json<Value> {
    let stopped = state.registry.disconnect(&id).await;
    Json(json!({
        "connectionId": id,
        "status": "disconnected",
        "wasRunning": stopped,
    }))
}

/// `POST /connections/{id}/refresh-groups`: sync now, replace the snapshot.
async fn refresh_groups(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let session = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| error_response(ZapError::NotFound(id.clone())))?;

    let result = state
        .group_sync
        .sync(&session)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "connectionId": id,
        "count": result.count,
        "groups": result.groups,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct GroupsQuery {
    #[serde(default)]
    refresh: bool,
}

/// `GET /connections/{id}/groups`: the stored snapshot; `?refresh=true`
/// syncs from the live socket first.
async fn groups(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<GroupsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if query.refresh {
        let session = state
            .registry
            .get(&id)
            .await
            .ok_or_else(|| error_response(ZapError::NotFound(id.clone())))?;
        state
            .group_sync
            .sync(&session)
            .await
            .map_err(error_response)?;
    }

    let groups = state
        .group_sync
        .snapshot(&id)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "connectionId": id,
        "count": groups.len(),
        "groups": groups,
    })))
}

/// `DELETE /connections/{id}`: stop, forget credentials and groups.
async fn delete_connection(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.registry.destroy(&id).await.map_err(error_response)?;
    state.group_sync.purge(&id).await.map_err(error_response)?;
    info!(connection_id = %id, "connection deleted");
    Ok(Json(json!({"connectionId": id, "status": "deleted"})))
}

/// Build the axum router with shared state.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/connections", get(list_connections))
        .route("/connections/{id}", delete(delete_connection))
        .route("/connections/{id}/connect", post(connect))
        .route("/connections/{id}/qr", get(qr))
        .route("/connections/{id}/pairing-code", post(pairing_code))
        .route("/connections/{id}/disconnect", post(disconnect))
        .route("/connections/{id}/groups", get(groups))
        .route("/connections/{id}/refresh-groups", post(refresh_groups))
        .with_state(state)
}

/// Start the API server and block until shutdown is signalled.
pub async fn serve(
    state: ApiState,
    host: &str,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("control surface listening on {addr}");

    let app = build_router(state);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("API server error: {e}");
        return Err(e.into());
    }
    Ok(())
}
