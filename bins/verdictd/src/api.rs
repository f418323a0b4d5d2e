// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! HTTP ingress: producers push verdicts and orders, operators read state.
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};
use verdict_engine::{Engine, EngineStats, PartitionStatus};
use verdict_log::{LogError, Payload, Record, Topic};
use verdict_model::{Entity, EntityId, EventTime, ValidationResult};

type AppState = Arc<Engine>;

/// A verdict as posted by a rule service.
#[derive(Debug, Deserialize)]
struct VerdictIn {
    #[serde(flatten)]
    verdict: ValidationResult,
    /// Event time; defaults to receipt time.
    at_ms: Option<i64>,
}

/// An order lifecycle record as posted by the order service.
#[derive(Debug, Deserialize)]
struct OrderIn {
    #[serde(flatten)]
    order: Entity,
    at_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
struct Appended {
    topic: String,
    partition: u32,
    offset: u64,
}

#[derive(Debug, Serialize)]
struct OrderOut {
    #[serde(flatten)]
    order: Entity,
    at_ms: i64,
    offset: u64,
}

#[derive(Debug, Serialize)]
struct Health {
    healthy: bool,
    workers: BTreeMap<String, PartitionStatus>,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Log(LogError),
    Internal(String),
}

impl From<LogError> for ApiError {
    fn from(err: LogError) -> Self {
        Self::Log(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Log(err) => {
                error!(%err, "log append failed");
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            Self::Internal(msg) => {
                error!(%msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn event_time(at_ms: Option<i64>) -> EventTime {
    at_ms.map_or_else(EventTime::now, EventTime::from_millis)
}

/// Append on the blocking pool; segment writes hit the filesystem.
async fn append<V: Payload>(
    topic: Topic<V>,
    key: EntityId,
    value: V,
    at: EventTime,
) -> Result<Record<V>, ApiError> {
    tokio::task::spawn_blocking(move || topic.send(key, value, at))
        .await
        .map_err(|err| ApiError::Internal(format!("append task: {err}")))?
        .map_err(ApiError::from)
}

fn appended<V>(topic: &str, record: &Record<V>) -> (StatusCode, Json<Appended>) {
    (
        StatusCode::ACCEPTED,
        Json(Appended {
            topic: topic.to_owned(),
            partition: record.partition,
            offset: record.offset,
        }),
    )
}

async fn post_validation(
    State(engine): State<AppState>,
    Json(body): Json<VerdictIn>,
) -> Result<impl IntoResponse, ApiError> {
    let topic = engine.broker().validations().clone();
    let key = body.verdict.entity_id.clone();
    let record = append(topic.clone(), key, body.verdict, event_time(body.at_ms)).await?;
    debug!(key = %record.key, offset = record.offset, "verdict accepted");
    Ok(appended(topic.name(), &record))
}

async fn post_order(
    State(engine): State<AppState>,
    Json(body): Json<OrderIn>,
) -> Result<impl IntoResponse, ApiError> {
    let topic = engine.broker().orders().clone();
    let key = body.order.id.clone();
    let record = append(topic.clone(), key, body.order, event_time(body.at_ms)).await?;
    debug!(key = %record.key, offset = record.offset, "order accepted");
    Ok(appended(topic.name(), &record))
}

async fn get_order(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderOut>, ApiError> {
    let key = EntityId::new(id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let record = engine
        .broker()
        .orders()
        .latest(&key)
        .ok_or_else(|| ApiError::NotFound(format!("no order {key}")))?;
    let Record {
        value,
        timestamp,
        offset,
        ..
    } = record;
    let order = value.ok_or_else(|| ApiError::NotFound(format!("order {key} was deleted")))?;
    Ok(Json(OrderOut {
        order,
        at_ms: timestamp.0,
        offset,
    }))
}

async fn stats(State(engine): State<AppState>) -> Json<EngineStats> {
    Json(engine.stats())
}

async fn health(State(engine): State<AppState>) -> impl IntoResponse {
    let workers: BTreeMap<String, PartitionStatus> = engine
        .status()
        .into_iter()
        .map(|(id, status)| (id.to_string(), status))
        .collect();
    let healthy = !workers.values().any(PartitionStatus::is_failed);
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(Health { healthy, workers }))
}

/// Routes served by the daemon.
pub fn router(engine: AppState) -> Router {
    Router::new()
        .route("/validations", post(post_validation))
        .route("/orders", post(post_order))
        .route("/orders/{id}", get(get_order))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}
