//! HTTP server for the job and alert API
//!
//! Provides:
//! - Job submission, status, results, cancellation and idea edits (/jobs/*)
//! - Idea payload validation (/ideas/validate)
//! - Market alert registration and market data ingestion (/alerts, /market-data)
//! - Per-class rate limiting

use super::handlers;
use super::rate_limiter::{rate_limit_middleware, RateLimiterState};
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the router with every route and middleware layer
pub fn router(state: Arc<AppState>) -> Router {
    let rate_limiter = Arc::new(RateLimiterState::new(&state.config.rate_limit));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ================================================================
        // Health check
        // ================================================================
        .route("/health", get(handlers::health_check))
        .route("/", get(handlers::health_check))

        // ================================================================
        // Generation jobs
        // ================================================================
        .route("/jobs", post(handlers::submit_job).get(handlers::list_jobs))
        .route("/jobs/:job_id/status", get(handlers::job_status))
        .route("/jobs/:job_id/results", get(handlers::job_results))
        .route("/jobs/:job_id/results/:idea_id", patch(handlers::update_idea))
        .route("/jobs/:job_id/cancel", delete(handlers::cancel_job))

        // ================================================================
        // Ideas
        // ================================================================
        .route("/ideas/validate", post(handlers::validate_idea))

        // ================================================================
        // Market alerts
        // ================================================================
        .route("/alerts", post(handlers::create_alert).get(handlers::list_alerts))
        .route("/alerts/:alert_id", delete(handlers::delete_alert))
        .route("/market-data", post(handlers::ingest_market_data))

        .with_state(state)
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server manager
pub struct ApiServer {
    state: Arc<AppState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            shutdown_tx: None,
        }
    }

    /// Bind the configured address and serve in a background task
    pub async fn start(&mut self) -> Result<()> {
        let addr = self.state.config.server.addr()?;
        let limits = &self.state.config.rate_limit;
        info!(
            "Rate limits: general={}/s, submission={}/s, ingestion={}/s",
            limits.general, limits.submission, limits.ingestion
        );

        let app = router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        info!("Starting API server on {}", addr);

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("API server shutting down");
            });

            if let Err(e) = server.await {
                error!("API server error: {}", e);
            }
        });

        info!("  POST   http://{}/jobs", addr);
        info!("  GET    http://{}/jobs/{{job_id}}/status", addr);
        info!("  GET    http://{}/jobs/{{job_id}}/results", addr);
        info!("  POST   http://{}/alerts", addr);
        info!("  POST   http://{}/market-data", addr);

        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            info!("API server stop signal sent");
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackEvent;
    use crate::config::{AppConfig, RateLimitConfig};
    use crate::models::{CallbackConfig, CallbackMethod, Requester, RetryPolicy};
    use crate::pipeline::{Advance, TemplateExecutor};
    use crate::store::MemoryJobStore;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state_with(config: AppConfig) -> Arc<AppState> {
        Arc::new(
            AppState::with_parts(
                config,
                Arc::new(MemoryJobStore::new()),
                Arc::new(TemplateExecutor::new()),
            )
            .unwrap(),
        )
    }

    fn state() -> Arc<AppState> {
        state_with(AppConfig::default())
    }

    fn request(method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder
                .header("x-user-id", user)
                .header("x-organization-id", format!("org-{}", user));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn job_body() -> Value {
        json!({
            "parameters": {
                "riskTolerance": "moderate",
                "timeHorizon": "long",
                "ideaCount": 2
            }
        })
    }

    async fn submit(state: &Arc<AppState>, user: &str) -> String {
        let (status, body) = send(state, request(Method::POST, "/jobs", Some(user), Some(job_body()))).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
        body["data"]["jobId"].as_str().unwrap().to_string()
    }

    async fn drive(state: &Arc<AppState>, job_id: &str) {
        for _ in 0..100 {
            if state.pipeline.advance(job_id).await.unwrap() == Advance::Idle {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_health_lists_jurisdictions() {
        let state = state();
        let (status, body) = send(&state, request(Method::GET, "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert!(body["data"]["jurisdictions"].as_array().unwrap().len() > 0);
        assert!(body["data"]["recentCallbackFailures"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_failed_callbacks() {
        let state = state();
        let event = CallbackEvent {
            source_id: "job-unreachable".to_string(),
            callback: CallbackConfig {
                url: "http://127.0.0.1:1/hook".to_string(),
                method: CallbackMethod::Post,
                auth: None,
                retry_policy: RetryPolicy {
                    max_retries: 0,
                    ..Default::default()
                },
                headers: Default::default(),
            },
            payload: json!({ "status": "completed" }),
        };
        assert!(state.dispatcher.deliver(&event).await.is_err());

        let (status, body) = send(&state, request(Method::GET, "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        let failures = body["data"]["recentCallbackFailures"].as_array().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0]["sourceId"], "job-unreachable");
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthenticated() {
        let state = state();
        let (status, _) = send(&state, request(Method::POST, "/jobs", None, Some(job_body()))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_job_is_unprocessable() {
        let state = state();
        let body = json!({ "parameters": { "ideaCount": 50 } });
        let (status, body) = send(&state, request(Method::POST, "/jobs", Some("alice"), Some(body))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!body["errors"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_job_lifecycle_over_http() {
        let state = state();
        let job_id = submit(&state, "alice").await;

        let (status, body) = send(
            &state,
            request(Method::GET, &format!("/jobs/{}/results", job_id), Some("alice"), None),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT, "{}", body);

        let (status, _) = send(
            &state,
            request(Method::GET, &format!("/jobs/{}/status", job_id), Some("mallory"), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        drive(&state, &job_id).await;

        let (status, body) = send(
            &state,
            request(Method::GET, &format!("/jobs/{}/results", job_id), Some("alice"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        let idea_id = body["data"]["ideas"][0]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &state,
            request(
                Method::PATCH,
                &format!("/jobs/{}/results/{}", job_id, idea_id),
                Some("alice"),
                Some(json!({ "title": "Revised title" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"]["title"], "Revised title");

        let (status, body) = send(&state, request(Method::GET, "/jobs?limit=5", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _) = send(
            &state,
            request(Method::DELETE, &format!("/jobs/{}/cancel", job_id), Some("alice"), None),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let state = state();
        let job_id = submit(&state, "alice").await;

        let (status, body) = send(
            &state,
            request(Method::DELETE, &format!("/jobs/{}/cancel", job_id), Some("alice"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "cancelled");
    }

    #[tokio::test]
    async fn test_validate_idea_reports_errors() {
        let state = state();
        let (status, body) = send(
            &state,
            request(Method::POST, "/ideas/validate", Some("alice"), Some(json!({}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isValid"], false);
    }

    #[tokio::test]
    async fn test_alert_fires_from_market_data() {
        let state = state();
        let alert = json!({
            "name": "Breakout",
            "symbol": "acme",
            "dataType": "price",
            "condition": "greater-than",
            "threshold": 100.0,
            "notificationChannels": [
                { "type": "email", "destination": "alice@example.com", "enabled": true }
            ]
        });
        let (status, body) = send(&state, request(Method::POST, "/alerts", Some("alice"), Some(alert))).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let alert_id = body["data"]["id"].as_str().unwrap().to_string();

        let point = json!({
            "id": "tick-1",
            "symbol": "ACME",
            "dataType": "price",
            "timestamp": "2026-01-05T14:30:00Z",
            "value": 101.5,
            "source": "feed",
            "interval": "tick"
        });
        let (status, body) = send(&state, request(Method::POST, "/market-data", Some("feed-bot"), Some(point))).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"][0]["alertId"], alert_id.as_str());

        let recent = state.alerts.recent_for_user("alice", 10);
        assert_eq!(recent.len(), 1);

        let (status, _) = send(
            &state,
            request(Method::DELETE, &format!("/alerts/{}", alert_id), Some("bob"), None),
        )
        .await;
        assert!(status.is_client_error());

        let (status, _) = send(
            &state,
            request(Method::DELETE, &format!("/alerts/{}", alert_id), Some("alice"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&state, request(Method::GET, "/alerts", Some("alice"), None)).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submission_rate_limit() {
        let mut config = AppConfig::default();
        config.rate_limit = RateLimitConfig {
            general: 100,
            submission: 1,
            ingestion: 100,
        };
        let state = state_with(config);
        let app = router(state.clone());

        let first = app
            .clone()
            .oneshot(request(Method::POST, "/jobs", Some("alice"), Some(job_body())))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = app
            .oneshot(request(Method::POST, "/jobs", Some("alice"), Some(job_body())))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("retry-after"));
        assert_eq!(second.headers()["x-ratelimit-type"], "submission");

        let listed = state
            .pipeline
            .list_jobs(&Requester::new("alice"), 10)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_server_start_and_stop() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        let mut server = ApiServer::new(state_with(config));
        server.start().await.unwrap();
        assert!(server.shutdown_tx.is_some());
        server.stop();
        assert!(server.shutdown_tx.is_none());
    }
}
