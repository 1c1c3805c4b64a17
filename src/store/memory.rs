//! In-process job store

use super::JobStore;
use crate::error::{AppError, Result};
use crate::models::Job;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;

type UserKey = (String, DateTime<Utc>, String);

/// Job store backed by a concurrent map with a per-user time index
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, Job>,
    by_user: RwLock<BTreeSet<UserKey>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &mut Job) -> Result<()> {
        match self.jobs.entry(job.id.clone()) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(format!("Job {} already exists", job.id)))
            }
            Entry::Vacant(slot) => {
                job.version = 1;
                slot.insert(job.clone());
            }
        }

        // Index is updated after the map shard lock is released
        self.by_user
            .write()
            .insert((job.user_id.clone(), job.created_at, job.id.clone()));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.get(id).map(|j| j.value().clone()))
    }

    async fn update(&self, job: &mut Job) -> Result<()> {
        let mut stored = self
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job.id)))?;

        if stored.version != job.version {
            return Err(AppError::Conflict(format!(
                "Job {} is at version {}, write was based on {}",
                job.id, stored.version, job.version
            )));
        }

        job.version += 1;
        *stored = job.clone();
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Job>> {
        let ids: Vec<String> = self
            .by_user
            .read()
            .iter()
            .rev()
            .filter(|(user, _, _)| user == user_id)
            .take(limit)
            .map(|(_, _, id)| id.clone())
            .collect();

        Ok(ids
            .iter()
            .filter_map(|id| self.jobs.get(id).map(|j| j.value().clone()))
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| !j.status.is_terminal())
            .map(|j| j.value().clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[tokio::test]
    async fn test_create_and_get() {
        contract::create_and_get(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        contract::stale_update_conflicts(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        contract::update_missing_is_not_found(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_listing() {
        let store = MemoryJobStore::new();
        contract::listing(&store).await;
        assert_eq!(store.len(), 4);
    }
}
