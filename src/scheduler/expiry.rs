//! Job expiry sweep
//!
//! Non-terminal jobs older than the configured TTL are moved to `expired`
//! on every tick. The sweep interval only bounds how late that happens.

use crate::pipeline::RequestPipeline;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodic task expiring stale jobs
pub struct ExpirySweeper {
    pipeline: Arc<RequestPipeline>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(pipeline: Arc<RequestPipeline>, interval: Duration) -> Self {
        Self { pipeline, interval }
    }

    /// Run one sweep now
    pub async fn sweep(&self) -> usize {
        match self.pipeline.expire_stale(Utc::now()).await {
            Ok(0) => 0,
            Ok(expired) => {
                info!(expired, "Expired stale jobs");
                expired
            }
            Err(e) => {
                warn!("Expiry sweep failed: {}", e);
                0
            }
        }
    }

    /// Start the sweeper; it stops when `shutdown` flips to true
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                ttl_secs = self.pipeline.settings().job_ttl.num_seconds(),
                "Expiry sweeper started"
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Expiry sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::MarketAlertEvaluator;
    use crate::compliance::ComplianceRegistry;
    use crate::models::{GenerationParameters, GenerationRequest, RequestStatus, Requester};
    use crate::pipeline::{PipelineSettings, TemplateExecutor};
    use crate::store::MemoryJobStore;

    fn pipeline(ttl: chrono::Duration) -> Arc<RequestPipeline> {
        Arc::new(RequestPipeline::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(TemplateExecutor::new()),
            Arc::new(ComplianceRegistry::new()),
            Arc::new(MarketAlertEvaluator::new()),
            PipelineSettings {
                job_ttl: ttl,
                ..Default::default()
            },
        ))
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            parameters: GenerationParameters {
                risk_tolerance: Some("high".to_string()),
                time_horizon: Some("short".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sweep_expires_only_stale_jobs() {
        let requester = Requester::new("user-1");

        let fresh = pipeline(chrono::Duration::hours(1));
        let job = fresh.submit(request(), &requester).await.unwrap();
        assert_eq!(ExpirySweeper::new(fresh.clone(), Duration::from_secs(60)).sweep().await, 0);
        assert_eq!(
            fresh.get_status(&job.id, &requester).await.unwrap().status,
            RequestStatus::Queued
        );

        let stale = pipeline(chrono::Duration::zero());
        let job = stale.submit(request(), &requester).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(ExpirySweeper::new(stale.clone(), Duration::from_secs(60)).sweep().await, 1);
        assert_eq!(
            stale.get_status(&job.id, &requester).await.unwrap().status,
            RequestStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let handle = ExpirySweeper::new(
            pipeline(chrono::Duration::hours(1)),
            Duration::from_millis(10),
        )
        .start(rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
