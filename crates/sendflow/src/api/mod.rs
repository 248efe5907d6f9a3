use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::api::models::{
    CronQuery, CronResponse, DirectEnqueueRequest, EditQueueRequest, EnqueueDraftsRequest,
    HistoryQuery, ListQueueQuery, ListQueueResponse, RetryRequest, SendRequest,
};
use crate::queue::engine::{QueueEdit, SendEngine, TickOptions};
use crate::queue::error::QueueError;
use crate::queue::model::{QueueItem, QueueStatus, SendSettings};
use crate::queue::report::BatchReport;
use crate::store::{HistoryFilter, HistoryPage, QueueFilter};

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub engine: SendEngine,
    /// When set, the cron route requires `Authorization: Bearer <secret>`.
    pub cron_secret: Option<String>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        // Queue
        .route(
            "/queue",
            get(list_queue).post(enqueue_drafts).put(edit_queue_item),
        )
        .route("/queue/:id", delete(remove_queue_item))
        .route("/queue/direct", post(enqueue_direct))
        // Sending
        .route("/send", post(send))
        .route("/send/retry", post(retry))
        .route("/cron/process-queue", post(process_queue))
        // History / settings
        .route("/history", get(history))
        .route("/settings/send", get(get_settings).put(put_settings))
        // Health
        .route("/health", get(health))
        .with_state(state)
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn queue_err(e: QueueError) -> (StatusCode, String) {
    let status = match &e {
        QueueError::NotFound { .. } => StatusCode::NOT_FOUND,
        QueueError::Validation(_) => StatusCode::BAD_REQUEST,
        QueueError::NotEditable { .. } | QueueError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        QueueError::Provider(_) => StatusCode::BAD_GATEWAY,
        QueueError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "request failed");
    }
    (status, e.to_string())
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, msg.into())
}

pub async fn list_queue(
    State(state): State<ApiState>,
    Query(q): Query<ListQueueQuery>,
) -> ApiResult<ListQueueResponse> {
    let status = match q.status.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(s) => Some(
            s.parse::<QueueStatus>()
                .map_err(|e| bad_request(e.to_string()))?,
        ),
        None => None,
    };

    let filter = QueueFilter {
        status,
        search: q.search,
        created_from: q.from,
        created_to: q.to,
        limit: q.limit,
    };

    let items = state.engine.list_queue(&filter).await.map_err(queue_err)?;
    Ok(Json(ListQueueResponse { items }))
}

pub async fn enqueue_drafts(
    State(state): State<ApiState>,
    Json(body): Json<EnqueueDraftsRequest>,
) -> ApiResult<BatchReport> {
    let report = state
        .engine
        .enqueue_drafts(&body.draft_ids)
        .await
        .map_err(queue_err)?;
    Ok(Json(report))
}

pub async fn edit_queue_item(
    State(state): State<ApiState>,
    Json(body): Json<EditQueueRequest>,
) -> ApiResult<QueueItem> {
    let item = state
        .engine
        .edit(
            body.id,
            QueueEdit {
                subject: body.subject,
                body: body.body,
            },
        )
        .await
        .map_err(queue_err)?;
    Ok(Json(item))
}

pub async fn remove_queue_item(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<QueueItem> {
    let item = state.engine.remove(id).await.map_err(queue_err)?;
    Ok(Json(item))
}

pub async fn enqueue_direct(
    State(state): State<ApiState>,
    Json(body): Json<DirectEnqueueRequest>,
) -> ApiResult<BatchReport> {
    let report = state
        .engine
        .enqueue_direct(&body.company_ids, body.template_id)
        .await
        .map_err(queue_err)?;
    Ok(Json(report))
}

pub async fn send(
    State(state): State<ApiState>,
    Json(body): Json<SendRequest>,
) -> ApiResult<BatchReport> {
    let report = match (body.queue_ids, body.draft_ids) {
        (Some(ids), None) => state.engine.send_queue_items(&ids).await,
        (None, Some(ids)) => state.engine.send_drafts(&ids).await,
        _ => return Err(bad_request("provide exactly one of queue_ids or draft_ids")),
    }
    .map_err(queue_err)?;
    Ok(Json(report))
}

pub async fn retry(
    State(state): State<ApiState>,
    Json(body): Json<RetryRequest>,
) -> ApiResult<BatchReport> {
    let report = state
        .engine
        .retry(&body.queue_ids)
        .await
        .map_err(queue_err)?;
    Ok(Json(report))
}

pub async fn process_queue(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<CronQuery>,
) -> ApiResult<CronResponse> {
    if let Some(secret) = state.cron_secret.as_deref() {
        let expected = format!("Bearer {secret}");
        let given = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if given != expected {
            return Err((StatusCode::UNAUTHORIZED, "unauthorized".into()));
        }
    }

    let settings = state.engine.send_settings().await.map_err(queue_err)?;
    let outcome = state
        .engine
        .tick(
            &settings,
            TickOptions {
                force: q.force.unwrap_or(false),
            },
        )
        .await
        .map_err(queue_err)?;

    Ok(Json(CronResponse::from(outcome)))
}

pub async fn history(
    State(state): State<ApiState>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<HistoryPage> {
    let filter = HistoryFilter {
        search: q.search,
        sent_from: q.from,
        sent_to: q.to,
        page: q.page,
        limit: q.limit,
    };
    let page = state.engine.list_history(&filter).await.map_err(queue_err)?;
    Ok(Json(page))
}

pub async fn get_settings(State(state): State<ApiState>) -> ApiResult<SendSettings> {
    let settings = state.engine.send_settings().await.map_err(queue_err)?;
    Ok(Json(settings))
}

pub async fn put_settings(
    State(state): State<ApiState>,
    Json(body): Json<SendSettings>,
) -> ApiResult<SendSettings> {
    let saved = state
        .engine
        .update_send_settings(body)
        .await
        .map_err(queue_err)?;
    Ok(Json(saved))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
