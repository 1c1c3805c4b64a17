//! HTTP handlers
//!
//! Thin adapters: extract identity and payload, call the pipeline or the
//! alert evaluator, wrap the outcome in [`ApiResponse`]. Errors render
//! through `AppError`'s `IntoResponse`.

use super::identity::Identity;
use super::types::{ApiResponse, HealthData, ListQuery};
use crate::error::Result;
use crate::models::{
    CreateAlertRequest, CreateInvestmentIdeaRequest, GenerationRequest, GenerationResult,
    InvestmentIdea, MarketAlertConfig, MarketDataPointInput, TriggeredAlert,
    UpdateInvestmentIdeaRequest,
};
use crate::pipeline::JobStatusView;
use crate::state::AppState;
use crate::validation::{self, ValidationResult};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{debug, info};

type AppStateRef = State<Arc<AppState>>;

/// Health check - GET /health
pub async fn health_check(State(state): AppStateRef) -> Json<ApiResponse<HealthData>> {
    Json(ApiResponse::success_with_data(HealthData {
        version: env!("CARGO_PKG_VERSION").to_string(),
        jurisdictions: state.compliance.jurisdictions(),
        recent_callback_failures: state.dispatcher.recent_failures(),
    }))
}

// ============================================================================
// Jobs
// ============================================================================

/// Submit a generation request - POST /jobs
pub async fn submit_job(
    State(state): AppStateRef,
    Identity(requester): Identity,
    Json(request): Json<GenerationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<JobStatusView>>)> {
    let job = state.pipeline.submit(request, &requester).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success_with_data(JobStatusView::from(&job))),
    ))
}

/// List the caller's jobs - GET /jobs
pub async fn list_jobs(
    State(state): AppStateRef,
    Identity(requester): Identity,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<JobStatusView>>>> {
    let jobs = state.pipeline.list_jobs(&requester, query.limit()).await?;
    Ok(Json(ApiResponse::success_with_data(jobs)))
}

/// Job status - GET /jobs/:id/status
pub async fn job_status(
    State(state): AppStateRef,
    Identity(requester): Identity,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<JobStatusView>>> {
    let status = state.pipeline.get_status(&job_id, &requester).await?;
    Ok(Json(ApiResponse::success_with_data(status)))
}

/// Job results - GET /jobs/:id/results
pub async fn job_results(
    State(state): AppStateRef,
    Identity(requester): Identity,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<GenerationResult>>> {
    let result = state.pipeline.get_result(&job_id, &requester).await?;
    Ok(Json(ApiResponse::success_with_data(result)))
}

/// Cancel a job - DELETE /jobs/:id/cancel
pub async fn cancel_job(
    State(state): AppStateRef,
    Identity(requester): Identity,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<JobStatusView>>> {
    let job = state.pipeline.cancel(&job_id, &requester).await?;
    Ok(Json(ApiResponse::success_with_data(JobStatusView::from(&job))))
}

/// Edit one idea of a completed job - PATCH /jobs/:id/results/:idea_id
pub async fn update_idea(
    State(state): AppStateRef,
    Identity(requester): Identity,
    Path((job_id, idea_id)): Path<(String, String)>,
    Json(update): Json<UpdateInvestmentIdeaRequest>,
) -> Result<Json<ApiResponse<InvestmentIdea>>> {
    let (idea, warnings) = state
        .pipeline
        .update_idea(&job_id, &idea_id, update, &requester)
        .await?;
    Ok(Json(ApiResponse::success_with_data(idea).with_warnings(warnings)))
}

// ============================================================================
// Ideas
// ============================================================================

/// Dry-run validation of an idea payload - POST /ideas/validate
pub async fn validate_idea(
    Identity(requester): Identity,
    Json(request): Json<CreateInvestmentIdeaRequest>,
) -> Json<ApiResponse<ValidationResult>> {
    let result = validation::validate_create_request(&request);
    debug!(
        user = %requester.user_id,
        valid = result.is_valid,
        errors = result.errors.len(),
        "Validated idea payload"
    );
    Json(ApiResponse::success_with_data(result))
}

// ============================================================================
// Market alerts
// ============================================================================

/// Register an alert - POST /alerts
pub async fn create_alert(
    State(state): AppStateRef,
    Identity(requester): Identity,
    Json(request): Json<CreateAlertRequest>,
) -> Result<(StatusCode, Json<ApiResponse<MarketAlertConfig>>)> {
    let mut check = request.clone();
    check.user_id = Some(requester.user_id.clone());
    let warnings = validation::validate_alert_config(&check).into_result()?;

    let config = request.into_config(&requester.user_id)?;
    state.alerts.add_alert(config.clone());
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_data(config).with_warnings(warnings)),
    ))
}

/// The caller's alerts - GET /alerts
pub async fn list_alerts(
    State(state): AppStateRef,
    Identity(requester): Identity,
) -> Json<ApiResponse<Vec<MarketAlertConfig>>> {
    Json(ApiResponse::success_with_data(
        state.alerts.list_for_user(&requester.user_id),
    ))
}

/// Remove an alert - DELETE /alerts/:id
pub async fn delete_alert(
    State(state): AppStateRef,
    Identity(requester): Identity,
    Path(alert_id): Path<String>,
) -> Result<Json<ApiResponse<MarketAlertConfig>>> {
    let removed = state.alerts.remove_alert(&alert_id, &requester.user_id)?;
    Ok(Json(ApiResponse::success_with_data(removed)))
}

/// Feed a market data point - POST /market-data
pub async fn ingest_market_data(
    State(state): AppStateRef,
    Identity(requester): Identity,
    Json(input): Json<MarketDataPointInput>,
) -> Result<Json<ApiResponse<Vec<TriggeredAlert>>>> {
    let point = input.into_point()?;
    let triggered = state.alerts.on_data_point(&point);
    if !triggered.is_empty() {
        info!(
            source = %point.source,
            submitted_by = %requester.user_id,
            symbol = %point.symbol,
            triggered = triggered.len(),
            "Market data triggered alerts"
        );
        state.notify_alerts(&triggered);
    }
    Ok(Json(ApiResponse::success_with_data(triggered)))
}
