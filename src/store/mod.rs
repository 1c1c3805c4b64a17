//! Job persistence
//!
//! The store is the only shared mutable resource between workers. Every
//! update is conditional on the version the caller read, so a stale worker
//! gets `AppError::Conflict` instead of overwriting a newer transition.

mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::models::Job;
use async_trait::async_trait;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job; sets `job.version` to 1
    async fn create(&self, job: &mut Job) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Conditional write.
    ///
    /// Succeeds only if the stored version equals `job.version`, in which
    /// case the stored version and `job.version` are both incremented.
    async fn update(&self, job: &mut Job) -> Result<()>;

    /// Jobs owned by `user_id`, newest first
    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Job>>;

    /// Non-terminal jobs, oldest first
    async fn list_active(&self) -> Result<Vec<Job>>;
}
