//! `orderfeed serve` - HTTP trigger for feed runs

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use orderfeed_core::{ProgressContext, SHARED_RUNTIME, is_shutdown_requested};
use orderfeed_shopify::{ErrorCategory, PipelineConfig, RunFailure, RunSummary};

use crate::config::Config;

const SERVICE_NAME: &str = "orderfeed";
const ACCEPT_POLL: Duration = Duration::from_millis(500);

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address (default: server.bind from config)
    #[arg(long)]
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    CreateFeed,
    Health,
    MethodNotAllowed,
    NotFound,
}

fn route(method: &Method, path: &str) -> Route {
    match (path.trim_end_matches('/'), method) {
        ("/create_feed", &Method::GET | &Method::POST) => Route::CreateFeed,
        ("/health", &Method::GET) => Route::Health,
        ("/create_feed" | "/health", _) => Route::MethodNotAllowed,
        _ => Route::NotFound,
    }
}

fn failure_status(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::AuthError => StatusCode::UNAUTHORIZED,
        ErrorCategory::FetchError | ErrorCategory::PublishError => StatusCode::BAD_GATEWAY,
        ErrorCategory::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::TransformError
        | ErrorCategory::WriteError
        | ErrorCategory::CheckpointError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Outcome of one triggered run
#[derive(Debug)]
enum RunOutcome {
    Success(RunSummary),
    Failed(RunFailure),
    /// Pipeline could not be assembled from the config
    Setup(String),
}

fn outcome_response(outcome: &RunOutcome) -> (StatusCode, Value) {
    match outcome {
        RunOutcome::Success(summary) => {
            let mut body = json!({ "status": "success" });
            if let (Value::Object(map), Ok(Value::Object(fields))) =
                (&mut body, serde_json::to_value(summary))
            {
                map.extend(fields);
            }
            (StatusCode::OK, body)
        }
        RunOutcome::Failed(failure) => (
            failure_status(failure.category),
            json!({
                "status": "error",
                "category": failure.category,
                "message": failure.message,
                "state": failure.state,
            }),
        ),
        RunOutcome::Setup(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "status": "error",
                "category": "ConfigError",
                "message": message,
            }),
        ),
    }
}

/// Shared server state: the pipeline recipe and the run guard
struct Trigger {
    config: PipelineConfig,
    running: AtomicBool,
}

/// Releases the run slot when dropped
struct RunSlot(Arc<Trigger>);

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

impl Trigger {
    fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Claim the single run slot, or `None` while a run is in flight.
    fn try_claim(self: &Arc<Self>) -> Option<RunSlot> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunSlot(Arc::clone(self)))
    }

    fn execute(&self) -> RunOutcome {
        let pipeline = match self.config.build() {
            Ok(p) => p,
            Err(e) => return RunOutcome::Setup(format!("{e:#}")),
        };
        match pipeline.run(&ProgressContext::hidden()) {
            Ok(summary) => RunOutcome::Success(summary),
            Err(failure) => RunOutcome::Failed(failure),
        }
    }
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

async fn handle(
    trigger: Arc<Trigger>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, body) = match route(req.method(), req.uri().path()) {
        Route::Health => (
            StatusCode::OK,
            json!({ "status": "healthy", "service": SERVICE_NAME }),
        ),
        Route::CreateFeed => create_feed(trigger).await,
        Route::MethodNotAllowed => (
            StatusCode::METHOD_NOT_ALLOWED,
            json!({ "status": "error", "message": "method not allowed" }),
        ),
        Route::NotFound => (
            StatusCode::NOT_FOUND,
            json!({ "status": "error", "message": "not found" }),
        ),
    };
    log::info!("{} {} -> {}", req.method(), req.uri().path(), status.as_u16());
    Ok(json_response(status, &body))
}

async fn create_feed(trigger: Arc<Trigger>) -> (StatusCode, Value) {
    let Some(slot) = trigger.try_claim() else {
        log::warn!("Run requested while another run is in flight");
        return (
            StatusCode::CONFLICT,
            json!({ "status": "error", "category": "Busy", "message": "a run is already in progress" }),
        );
    };

    let joined = tokio::task::spawn_blocking(move || {
        let outcome = slot.0.execute();
        drop(slot);
        outcome
    })
    .await;

    match joined {
        Ok(outcome) => {
            if let RunOutcome::Failed(failure) = &outcome {
                log::error!("Run failed: {failure}");
            }
            outcome_response(&outcome)
        }
        Err(e) => {
            log::error!("Run task aborted: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "status": "error", "category": "Internal", "message": e.to_string() }),
            )
        }
    }
}

async fn serve(listener: TcpListener, trigger: Arc<Trigger>) {
    loop {
        if is_shutdown_requested() {
            log::info!("Shutdown requested, no longer accepting connections");
            break;
        }
        let (stream, peer) = match tokio::time::timeout(ACCEPT_POLL, listener.accept()).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                log::warn!("Accept failed: {e}");
                continue;
            }
            Ok(Ok(conn)) => conn,
        };
        log::debug!("Connection from {peer}");

        let trigger = Arc::clone(&trigger);
        tokio::spawn(async move {
            let service = service_fn(move |req| handle(Arc::clone(&trigger), req));
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                log::debug!("Connection {peer} closed with error: {e}");
            }
        });
    }
}

pub fn run(args: ServeArgs, config: &Config) -> Result<()> {
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address: {bind}"))?;

    let pipeline_config = config.pipeline_config();
    // Fail at startup rather than on the first trigger
    pipeline_config.build().context("Invalid pipeline configuration")?;
    let trigger = Arc::new(Trigger::new(pipeline_config));

    SHARED_RUNTIME.block_on(async {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        log::info!("Listening on http://{addr} (GET|POST /create_feed, GET /health)");
        serve(listener, trigger).await;
        Ok(())
    })
}
