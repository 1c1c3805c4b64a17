//! Background workers that advance queued jobs

use super::{Advance, RequestPipeline};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Fixed set of tokio tasks pulling runnable jobs.
///
/// A job is leased by at most one worker of the pool at a time; the store's
/// conditional writes cover anything running outside the pool.
pub struct WorkerPool {
    pipeline: Arc<RequestPipeline>,
    workers: usize,
    poll_interval: Duration,
    leases: Arc<DashMap<String, ()>>,
}

/// Releases a job lease when dropped
struct Lease {
    leases: Arc<DashMap<String, ()>>,
    job_id: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.leases.remove(&self.job_id);
    }
}

impl WorkerPool {
    pub fn new(pipeline: Arc<RequestPipeline>, workers: usize, poll_interval: Duration) -> Self {
        Self {
            pipeline,
            workers: workers.max(1),
            poll_interval,
            leases: Arc::new(DashMap::new()),
        }
    }

    /// Spawn the workers; they stop when `shutdown` flips to true
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(workers = self.workers, "Starting pipeline workers");
        let pool = Arc::new(self);
        (0..pool.workers)
            .map(|index| {
                let pool = pool.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run(index, shutdown).await })
            })
            .collect()
    }

    fn lease(&self, job_id: &str) -> Option<Lease> {
        match self.leases.entry(job_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(Lease {
                    leases: self.leases.clone(),
                    job_id: job_id.to_string(),
                })
            }
        }
    }

    /// Advance one runnable job; false when there was nothing to do
    async fn tick(&self, index: usize) -> bool {
        let jobs = match self.pipeline.runnable(Utc::now()).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(worker = index, "Failed to list runnable jobs: {}", e);
                return false;
            }
        };

        let Some((job, _lease)) = jobs
            .into_iter()
            .find_map(|job| self.lease(&job.id).map(|lease| (job, lease)))
        else {
            return false;
        };

        match self.pipeline.advance(&job.id).await {
            Ok(Advance::Progressed(status)) => {
                debug!(worker = index, job_id = %job.id, status = %status, "Advanced job");
                true
            }
            Ok(Advance::Abandoned) => true,
            Ok(Advance::Waiting | Advance::Idle) => false,
            Err(e) => {
                error!(worker = index, job_id = %job.id, "Failed to advance job: {}", e);
                false
            }
        }
    }

    async fn run(&self, index: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = index, "Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.tick(index).await {
                continue;
            }

            tokio::select! {
                _ = self.pipeline.work_available() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        debug!(worker = index, "Worker stopped");
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

    fn pipeline() -> Arc<RequestPipeline> {
        Arc::new(RequestPipeline::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(TemplateExecutor::new()),
            Arc::new(ComplianceRegistry::new()),
            Arc::new(MarketAlertEvaluator::new()),
            PipelineSettings::default(),
        ))
    }

    #[test]
    fn test_lease_is_exclusive_until_dropped() {
        let pool = WorkerPool::new(pipeline(), 1, Duration::from_millis(10));
        let lease = pool.lease("job-1");
        assert!(lease.is_some());
        assert!(pool.lease("job-1").is_none());
        drop(lease);
        assert!(pool.lease("job-1").is_some());
    }

    #[tokio::test]
    async fn test_workers_drive_jobs_to_completion() {
        let pipeline = pipeline();
        let requester = Requester::new("user-1");
        let mut ids = Vec::new();
        for _ in 0..3 {
            let request = GenerationRequest {
                parameters: GenerationParameters {
                    risk_tolerance: Some("low".to_string()),
                    time_horizon: Some("medium".to_string()),
                    idea_count: Some(2),
                    ..Default::default()
                },
                ..Default::default()
            };
            ids.push(pipeline.submit(request, &requester).await.unwrap().id);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = WorkerPool::new(pipeline.clone(), 2, Duration::from_millis(5)).start(shutdown_rx);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let mut done = 0;
            for id in &ids {
                let status = pipeline.get_status(id, &requester).await.unwrap();
                if status.status.is_terminal() {
                    assert_eq!(status.status, RequestStatus::Completed);
                    done += 1;
                }
            }
            if done == ids.len() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "workers did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
