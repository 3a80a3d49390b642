//! API request handlers

use super::models::{
    DetailQuery, DownloadAllQuery, HealthResponse, ListQuery, ModelStateResponse, ProgressPayload,
};
use super::routes::AppState;
use crate::error::ModelError;
use crate::models::{
    CancelToken, CatalogEntry, GlobalStats, LocalModelView, ModelDetail, ModelMetadata,
    ProgressEvent,
};
use crate::registry::BulkDownloadReport;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// GET /health - Manager health check
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// GET /models?pipeline=<p>&refresh=1 - Catalog listing for a pipeline
pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CatalogEntry>>, ModelError> {
    let pipeline = query.pipeline()?;
    let entries = state.registry.list_models(pipeline, query.refresh()).await?;
    Ok(Json(entries))
}

/// POST /models/refresh?pipeline=<p> - Re-fetch a listing from the hub
pub async fn refresh_models(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CatalogEntry>>, ModelError> {
    let pipeline = query.pipeline()?;
    let entries = state.registry.refresh_models(pipeline).await?;
    Ok(Json(entries))
}

/// GET /models/stats/global - Hub-wide model count
pub async fn global_stats(State(state): State<AppState>) -> Result<Json<GlobalStats>, ModelError> {
    Ok(Json(state.registry.global_stats().await?))
}

/// GET /models/local - Downloaded models
pub async fn local_models(
    State(state): State<AppState>,
) -> Result<Json<Vec<LocalModelView>>, ModelError> {
    let models = state.registry.local_models().await?;
    crate::metrics::update_local_model_count(models.len());
    Ok(Json(models))
}

/// GET /models/active - The active model, or null
pub async fn active_model(
    State(state): State<AppState>,
) -> Result<Json<Option<LocalModelView>>, ModelError> {
    Ok(Json(state.registry.active_model().await?))
}

/// POST /models/download-all?pipeline=<p>&force=true - Bulk download
pub async fn download_all(
    State(state): State<AppState>,
    Query(query): Query<DownloadAllQuery>,
) -> Result<Json<BulkDownloadReport>, ModelError> {
    let pipeline = query.pipeline()?;
    let report = state
        .registry
        .download_pipeline(pipeline, query.force())
        .await?;
    Ok(Json(report))
}

/// GET /models/{id}?refresh=1 - Enriched metadata
pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DetailQuery>,
) -> Result<Json<ModelMetadata>, ModelError> {
    let metadata = state
        .registry
        .model_metadata(&id, query.pipeline.as_deref(), query.refresh())
        .await?;
    Ok(Json(metadata))
}

/// GET /models/{id}/stats - Live detail straight from the hub
pub async fn model_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModelDetail>, ModelError> {
    Ok(Json(state.registry.model_detail(&id).await?))
}

/// GET /models/{id}/state - Unknown / cataloged / downloaded / active
pub async fn model_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModelStateResponse>, ModelError> {
    let model_state = state.registry.model_state(&id).await?;
    Ok(Json(ModelStateResponse {
        id,
        state: model_state,
    }))
}

/// GET /models/{id}/download - Download with server-sent progress
///
/// The download runs in its own task and finishes even if the client goes
/// away; events after a disconnect are dropped.
pub async fn download_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let registry = state.registry.clone();

    tokio::spawn(async move {
        let progress_tx = tx.clone();
        let mut on_progress = move |done: usize, total: usize| {
            let _ = progress_tx.send(ProgressEvent::Progress { done, total });
        };

        let terminal = match registry
            .download(&id, &mut on_progress, &CancelToken::new())
            .await
        {
            Ok(view) => ProgressEvent::Done {
                version: view.record.version,
            },
            Err(e) => ProgressEvent::Error {
                message: e.to_string(),
            },
        };
        let _ = tx.send(terminal);
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| to_sse_event(&event));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &ProgressEvent) -> Result<Event, axum::Error> {
    match event {
        ProgressEvent::Progress { done, total } => Event::default().event("progress").json_data(
            ProgressPayload {
                done: *done,
                total: *total,
                percent: event.percent().unwrap_or(0),
            },
        ),
        ProgressEvent::Done { version } => Ok(Event::default().event("done").data(version)),
        ProgressEvent::Error { message } => Ok(Event::default()
            .event("error")
            .data(message.replace('\r', ""))),
    }
}

/// POST /models/{id}/enable - Activate a downloaded model
pub async fn enable_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ModelError> {
    state.registry.activate(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
