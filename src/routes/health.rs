//! Health check endpoints
//!
//! Kubernetes-style probes:
//! - `/health`, `/healthz` - liveness (is the service running?)
//! - `/ready`, `/readyz` - readiness (can it take traffic?)
//!
//! Liveness always returns 200 while the process is up. Readiness requires a
//! usable store, and outside dev mode a configured settlement facilitator.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    /// 'online' or 'degraded' for dashboards
    pub status: &'static str,
    pub version: &'static str,
    pub uptime: u64,
    pub mode: String,
    pub node_id: String,
    pub store: StoreHealth,
    pub facilitator: FacilitatorHealth,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct StoreHealth {
    /// "mongodb" or "memory"
    pub kind: &'static str,
}

#[derive(Serialize)]
pub struct FacilitatorHealth {
    pub configured: bool,
    /// true when settlements run against the built-in dev rail
    pub dev: bool,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let args = &state.args;
    let facilitator_configured = args.facilitator_url.is_some();

    // memory store in production would mean degraded persistence
    let status = if state.store_kind == "mongodb" || args.dev_mode {
        "online"
    } else {
        "degraded"
    };

    HealthResponse {
        healthy: true,
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        mode: if args.dev_mode {
            "development".to_string()
        } else {
            "production".to_string()
        },
        node_id: args.node_id.to_string(),
        store: StoreHealth {
            kind: state.store_kind,
        },
        facilitator: FacilitatorHealth {
            configured: facilitator_configured,
            dev: !facilitator_configured && args.dev_mode,
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Handle liveness probe (`/health`, `/healthz`)
pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state);

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Handle readiness probe (`/ready`, `/readyz`)
pub fn readiness_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state);

    let is_ready = state.args.dev_mode || state.args.facilitator_url.is_some();

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":false,"error":"Serialization failed"}"#.to_string());

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub service: &'static str,
}

/// Handle version endpoint (`/version`)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        service: "tollgate",
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"version":"unknown"}"#.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
