//! HTTP server implementation
//!
//! hyper http1 with TokioIo, hand-routed on `(Method, path)`. Each accepted
//! connection runs on its own task; the pipeline components behind `AppState`
//! are all safe under request-parallel execution.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Args;
use crate::db::TaskStore;
use crate::ingestion::IngestOrchestrator;
use crate::notify::{Notifier, ReputationSink};
use crate::participation::ParticipationGate;
use crate::payment::{PaymentVerifier, SettlementFacilitator};
use crate::rating::RatingService;
use crate::routes::{self, TaskRoute};
use crate::types::TollgateError;

/// Reject bodies beyond this size before doing any work
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn TaskStore>,
    /// "mongodb" or "memory", surfaced by the health endpoints
    pub store_kind: &'static str,
    pub orchestrator: IngestOrchestrator,
    pub gate: ParticipationGate,
    pub rating: RatingService,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        store: Arc<dyn TaskStore>,
        store_kind: &'static str,
        facilitator: Arc<dyn SettlementFacilitator>,
        notifier: Arc<dyn Notifier>,
        reputation: Arc<dyn ReputationSink>,
    ) -> Self {
        let orchestrator = IngestOrchestrator::new(
            Arc::clone(&store),
            PaymentVerifier::new(facilitator),
            args.pricing_config(),
            Duration::from_secs(args.attempt_log_ttl_secs),
        );
        let gate = ParticipationGate::new(Arc::clone(&store));
        let rating = RatingService::new(Arc::clone(&store), notifier, reputation);

        Self {
            args,
            store,
            store_kind,
            orchestrator,
            gate,
            rating,
            started_at: Instant::now(),
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), TollgateError> {
    let listener = TcpListener::bind(state.args.listen)
        .await
        .map_err(|e| TollgateError::Internal(format!("bind {}: {e}", state.args.listen)))?;

    info!(
        "Tollgate listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - settlements run against the built-in dev rail");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    match (method, path.as_str()) {
        // Liveness probe - 200 while the process is up
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            Ok(routes::health_check(state))
        }

        // Readiness probe - 200 only when the service can take traffic
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            Ok(routes::readiness_check(state))
        }

        (Method::GET, "/version") => Ok(routes::version_info()),

        // Operator view of captured settlements with no task
        (Method::GET, "/api/v1/reconciliation") => {
            Ok(routes::handle_reconciliation_list(state).await)
        }

        // Ingestion: the 402 challenge/response flow
        (Method::POST, "/api/v1/tasks") => {
            let request_id = header_value(&req, "x-request-id");
            let payment = header_value(&req, "x-payment");
            let body = match read_body(req).await? {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            Ok(routes::handle_ingest(state, request_id, payment, &body).await)
        }

        // Parametrized task routes
        (method, _) => match (method, TaskRoute::parse(&path)) {
            (Method::GET, Some(TaskRoute::Task(task_id))) => {
                Ok(routes::handle_get_task(state, task_id).await)
            }
            (Method::PATCH, Some(TaskRoute::Status(task_id))) => {
                let task_id = task_id.to_string();
                let body = match read_body(req).await? {
                    Ok(bytes) => bytes,
                    Err(response) => return Ok(response),
                };
                Ok(routes::handle_status_change(state, &task_id, &body).await)
            }
            (Method::POST, Some(TaskRoute::Submissions(task_id))) => {
                let task_id = task_id.to_string();
                let body = match read_body(req).await? {
                    Ok(bytes) => bytes,
                    Err(response) => return Ok(response),
                };
                Ok(routes::handle_submission(state, &task_id, &body).await)
            }
            (Method::POST, Some(TaskRoute::Rating(task_id, participant_id))) => {
                let task_id = task_id.to_string();
                let participant_id = participant_id.to_string();
                let body = match read_body(req).await? {
                    Ok(bytes) => bytes,
                    Err(response) => return Ok(response),
                };
                Ok(routes::handle_rating(state, &task_id, &participant_id, &body).await)
            }
            (_, Some(_)) => Ok(routes::method_not_allowed()),
            (_, None) => Ok(routes::not_found_response(&path)),
        },
    }
}

/// Extract a header as a UTF-8 string, if present
fn header_value(req: &Request<Incoming>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Collect the request body, rejecting oversized payloads
async fn read_body(
    req: Request<Incoming>,
) -> Result<Result<Bytes, Response<Full<Bytes>>>, hyper::Error> {
    let declared = req
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if matches!(declared, Some(len) if len > MAX_BODY_BYTES) {
        return Ok(Err(payload_too_large()));
    }

    let bytes = req.into_body().collect().await?.to_bytes();
    if bytes.len() > MAX_BODY_BYTES {
        return Ok(Err(payload_too_large()));
    }
    Ok(Ok(bytes))
}

fn payload_too_large() -> Response<Full<Bytes>> {
    routes::json_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        &routes::ApiError {
            error: format!("request body exceeds {MAX_BODY_BYTES} bytes"),
            code: "PAYLOAD_TOO_LARGE",
        },
    )
}
