mod config;
mod contacts;
mod dedup;
mod directory;
mod export;
mod listing;
mod metrics;
mod models;
mod normalize;
mod pipeline;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use config::AppConfig;
use dedup::SweepReport;
use eyre::WrapErr;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, ContactInfo, GroupInfo, IngestOutcome, OffersResponse, TextBlockRequest,
};
use pipeline::{Pipeline, PipelineError};
use serde::Serialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    if let Err(err) = run().await {
        error!(target = "watchfeed.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    let config = AppConfig::from_env();
    let pipeline = Pipeline::new(&config);
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    info!(
        target = "watchfeed.api",
        contact_lookup = config.contacts.is_some(),
        dedup_max_entries = config.dedup.max_entries,
        min_dealer_lines = config.parser.min_dealer_lines,
        "pipeline configured"
    );

    let state = AppState {
        pipeline,
        prometheus_handle,
    };
    let app = app(state, config.body_limit);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "watchfeed.api", "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    prometheus_handle: PrometheusHandle,
}

fn app(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/webhook", post(receive_webhook))
        .route("/groups", get(list_groups))
        .route("/contacts", get(list_contacts))
        .route("/listings/parse", post(parse_listings))
        .route("/exports/offers", post(export_offers))
        .route("/dedup", delete(clear_dedup))
        .route("/dedup/sweep", post(sweep_dedup))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Liveness plus freshness of the inbound feed.
///
/// `last_webhook_age_ms` stays `null` until the first webhook is classified, so a stalled
/// provider shows up as a growing age rather than a failing check.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let dedup = &state.pipeline.dedup;
    Json(json!({
        "status": "ok",
        "service": "watchfeed-api-rs",
        "last_webhook_age_ms": state.pipeline.directory.last_webhook_age_ms().await,
        "dedup": dedup.sizes().await,
        "dedup_sweep_pending": dedup.needs_sweep().await,
    }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Accepts one delivery from either webhook family.
///
/// - Method: `POST`
/// - Path: `/webhook`
/// - Response: `IngestOutcome` with `status` of `accepted`, `duplicate` or `ignored`
async fn receive_webhook(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<Json<IngestOutcome>, AppError> {
    crate::metrics::inc_requests("/webhook");
    let outcome = state.pipeline.ingest(raw).await?;
    Ok(Json(outcome))
}

async fn list_groups(State(state): State<AppState>) -> Json<Vec<GroupInfo>> {
    crate::metrics::inc_requests("/groups");
    Json(state.pipeline.directory.groups_snapshot().await)
}

async fn list_contacts(State(state): State<AppState>) -> Json<Vec<ContactInfo>> {
    crate::metrics::inc_requests("/contacts");
    Json(state.pipeline.directory.contacts_snapshot().await)
}

async fn parse_listings(
    State(state): State<AppState>,
    Json(req): Json<TextBlockRequest>,
) -> Json<OffersResponse> {
    crate::metrics::inc_requests("/listings/parse");
    Json(state.pipeline.parser.parse_message(&req.text).into())
}

/// Forces a TTL and capacity pass outside the ingest path.
async fn sweep_dedup(State(state): State<AppState>) -> Json<SweepReport> {
    crate::metrics::inc_requests("/dedup/sweep");
    let report = state.pipeline.dedup.sweep().await;
    crate::metrics::dedup_swept(report);
    info!(
        target = "watchfeed.dedup",
        expired = report.expired,
        evicted = report.evicted,
        "manual sweep"
    );
    Json(report)
}

async fn clear_dedup(State(state): State<AppState>) -> StatusCode {
    crate::metrics::inc_requests("/dedup");
    state.pipeline.dedup.clear().await;
    info!(target = "watchfeed.dedup", "caches cleared");
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
struct ExportOffersResponse {
    messages: usize,
    count: usize,
    offers: Vec<export::ExportOffer>,
}

/// Offers from a pasted chat export, one entry per listing line with its sender and time.
async fn export_offers(
    State(state): State<AppState>,
    Json(req): Json<TextBlockRequest>,
) -> Result<Json<ExportOffersResponse>, AppError> {
    crate::metrics::inc_requests("/exports/offers");
    let messages = export::parse_chat_export(&req.text).len();
    if messages == 0 {
        return Err(PipelineError::invalid_input("export", "no chat messages found").into());
    }
    let offers = export::extract_offers(&state.pipeline.parser, &req.text);
    Ok(Json(ExportOffersResponse {
        messages,
        count: offers.len(),
        offers,
    }))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                info!(
                    target = "watchfeed.api",
                    stage = err.stage(),
                    detail = err.detail(),
                    "request rejected"
                );
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (StatusCode::BAD_REQUEST, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
