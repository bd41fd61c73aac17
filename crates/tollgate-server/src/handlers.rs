//! API route handlers.
//!
//! Handlers that touch the filter file or read the event log run on the
//! blocking pool.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::error::{ApiError, Result};
use crate::models::{
    AboutResponse, AddHostRequest, HostChangeResponse, HostsResponse, ReportRequest,
    ReportResponse, SessionEntry, SessionsResponse, StatusResponse,
};
use crate::state::AppState;

fn status_of(state: &AppState) -> StatusResponse {
    let controller = &state.controller;
    let context = controller.context();
    StatusResponse {
        running: controller.is_running(),
        listen_addr: controller.local_addr().map(|addr| addr.to_string()),
        sessions: context.gate().session_count(),
        filter_entries: context.filter().list().len(),
    }
}

/// POST /api/proxy/start - Start accepting proxy connections.
pub async fn start_proxy(State(state): State<AppState>) -> Result<Json<StatusResponse>> {
    let addr = state.controller.start()?;
    info!(%addr, "Proxy started via API");
    Ok(Json(status_of(&state)))
}

/// POST /api/proxy/stop - Stop accepting proxy connections.
///
/// Stopping an idle proxy is not an error.
pub async fn stop_proxy(State(state): State<AppState>) -> Json<StatusResponse> {
    if state.controller.shutdown().await {
        info!("Proxy stopped via API");
    } else {
        debug!("Stop requested while proxy was idle");
    }
    Json(status_of(&state))
}

/// GET /api/proxy/status
pub async fn proxy_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(status_of(&state))
}

/// GET /api/sessions - Logged-in clients, oldest login first.
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    let sessions = state
        .controller
        .sessions()
        .into_iter()
        .map(|(ip, session)| SessionEntry {
            ip: ip.to_string(),
            filter_enabled: session.filter_enabled,
            authenticated_at: session.authenticated_at.to_rfc3339(),
        })
        .collect();
    Json(SessionsResponse { sessions })
}

/// GET /api/hosts - List filter entries in insertion order.
pub async fn list_hosts(State(state): State<AppState>) -> Json<HostsResponse> {
    Json(HostsResponse {
        hosts: state.controller.list_hosts(),
    })
}

/// POST /api/hosts - Add a filter entry.
pub async fn add_host(
    State(state): State<AppState>,
    Json(req): Json<AddHostRequest>,
) -> Result<(StatusCode, Json<HostChangeResponse>)> {
    let host = req.host.trim().to_string();
    if host.is_empty() {
        return Err(ApiError::BadRequest("host must not be empty".to_string()));
    }

    let controller = Arc::clone(&state.controller);
    let entry = host.clone();
    let changed = spawn_blocking(move || controller.add_host(&entry)).await??;
    let status = if changed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(HostChangeResponse {
            host,
            changed,
            hosts: state.controller.list_hosts(),
        }),
    ))
}

/// DELETE /api/hosts/{host} - Remove a filter entry.
pub async fn remove_host(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> Result<Json<HostChangeResponse>> {
    let controller = Arc::clone(&state.controller);
    let entry = host.clone();
    if !spawn_blocking(move || controller.remove_host(&entry)).await?? {
        return Err(ApiError::NotFound(format!("host {host} is not listed")));
    }
    Ok(Json(HostChangeResponse {
        host,
        changed: true,
        hosts: state.controller.list_hosts(),
    }))
}

/// POST /api/reports - Write a report of every log line mentioning an IP.
pub async fn generate_report(
    State(state): State<AppState>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ReportResponse>> {
    let ip = req.ip.trim().to_string();

    let controller = Arc::clone(&state.controller);
    let address = ip.clone();
    let path = spawn_blocking(move || controller.generate_report(&address)).await??;
    Ok(Json(ReportResponse {
        ip,
        path: path.display().to_string(),
    }))
}

/// GET /api/about
pub async fn about(State(state): State<AppState>) -> Json<AboutResponse> {
    Json(AboutResponse {
        about: state.controller.about(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
