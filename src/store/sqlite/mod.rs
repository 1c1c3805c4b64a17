//! SQLite job store

mod migrations;

use super::JobStore;
use crate::error::{AppError, Result};
use crate::models::{GenerationResult, Job, RequestStatus};
use crate::security::{SealedBlob, SecurityManager};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

/// Job store persisting JSON documents in SQLite
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
    security: Arc<SecurityManager>,
}

struct Encoded {
    document: String,
    sealed: Option<SealedBlob>,
}

fn timestamp(at: DateTime<Utc>) -> String {
    // Fixed width so lexical order matches time order
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteJobStore {
    pub fn new(path: &Path, security: Arc<SecurityManager>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn, security)
    }

    pub fn in_memory(security: Arc<SecurityManager>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, security)
    }

    fn with_connection(conn: Connection, security: Arc<SecurityManager>) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            security,
        })
    }

    fn encode(&self, job: &Job) -> Result<Encoded> {
        if job.request.confidential {
            if let Some(result) = &job.result {
                let mut public = job.clone();
                public.result = None;
                return Ok(Encoded {
                    document: serde_json::to_string(&public)?,
                    sealed: Some(self.security.seal(result)?),
                });
            }
        }

        Ok(Encoded {
            document: serde_json::to_string(job)?,
            sealed: None,
        })
    }

    fn decode(&self, document: &str, ciphertext: Option<String>, nonce: Option<String>) -> Result<Job> {
        let mut job: Job = serde_json::from_str(document)?;
        if let (Some(ciphertext), Some(nonce)) = (ciphertext, nonce) {
            let result: GenerationResult = self.security.open(&SealedBlob { ciphertext, nonce })?;
            job.result = Some(result);
        }
        Ok(job)
    }

    fn query_jobs(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter()
            .map(|(document, ciphertext, nonce)| self.decode(&document, ciphertext, nonce))
            .collect()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: &mut Job) -> Result<()> {
        let mut stored = job.clone();
        stored.version = 1;
        let encoded = self.encode(&stored)?;
        let (ciphertext, nonce) = encoded
            .sealed
            .map(|s| (Some(s.ciphertext), Some(s.nonce)))
            .unwrap_or((None, None));

        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO jobs (id, user_id, status, created_at, updated_at, version, document, sealed_result, result_nonce)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO NOTHING",
            params![
                stored.id,
                stored.user_id,
                stored.status.as_str(),
                timestamp(stored.created_at),
                timestamp(stored.updated_at),
                stored.version as i64,
                encoded.document,
                ciphertext,
                nonce,
            ],
        )?;

        if inserted == 0 {
            return Err(AppError::Conflict(format!("Job {} already exists", job.id)));
        }
        job.version = 1;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT document, sealed_result, result_nonce FROM jobs WHERE id = ?",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?
        };

        row.map(|(document, ciphertext, nonce)| self.decode(&document, ciphertext, nonce))
            .transpose()
    }

    async fn update(&self, job: &mut Job) -> Result<()> {
        let mut next = job.clone();
        next.version = job.version + 1;
        let encoded = self.encode(&next)?;
        let (ciphertext, nonce) = encoded
            .sealed
            .map(|s| (Some(s.ciphertext), Some(s.nonce)))
            .unwrap_or((None, None));

        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2, version = ?3, document = ?4,
                 sealed_result = ?5, result_nonce = ?6
             WHERE id = ?7 AND version = ?8",
            params![
                next.status.as_str(),
                timestamp(next.updated_at),
                next.version as i64,
                encoded.document,
                ciphertext,
                nonce,
                next.id,
                job.version as i64,
            ],
        )?;

        if changed == 0 {
            let current: Option<i64> = conn
                .query_row("SELECT version FROM jobs WHERE id = ?", [&job.id], |row| row.get(0))
                .optional()?;
            return Err(match current {
                None => AppError::NotFound(format!("Job {} not found", job.id)),
                Some(version) => AppError::Conflict(format!(
                    "Job {} is at version {}, write was based on {}",
                    job.id, version, job.version
                )),
            });
        }

        job.version = next.version;
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Job>> {
        self.query_jobs(
            "SELECT document, sealed_result, result_nonce FROM jobs
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            params![user_id, limit as i64],
        )
    }

    async fn list_active(&self) -> Result<Vec<Job>> {
        let terminal: Vec<&str> = RequestStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.as_str())
            .collect();
        let sql = format!(
            "SELECT document, sealed_result, result_nonce FROM jobs
             WHERE status NOT IN ('{}') ORDER BY created_at ASC, id ASC",
            terminal.join("','")
        );
        self.query_jobs(&sql, params![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationResult, ProcessingMetrics, ResultMetadata};
    use crate::store::contract;
    use tempfile::tempdir;

    fn store() -> SqliteJobStore {
        SqliteJobStore::in_memory(Arc::new(SecurityManager::ephemeral().unwrap())).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        contract::create_and_get(&store()).await;
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        contract::stale_update_conflicts(&store()).await;
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        contract::update_missing_is_not_found(&store()).await;
    }

    #[tokio::test]
    async fn test_listing() {
        contract::listing(&store()).await;
    }

    #[tokio::test]
    async fn test_confidential_result_is_sealed_at_rest() {
        let dir = tempdir().unwrap();
        let security = Arc::new(SecurityManager::new(dir.path()).unwrap());
        let store = SqliteJobStore::new(&dir.path().join("jobs.db"), security).unwrap();

        let mut job = contract::job("u1");
        job.request.confidential = true;
        store.create(&mut job).await.unwrap();

        job.result = Some(GenerationResult {
            request_id: job.id.clone(),
            ideas: Vec::new(),
            metrics: ProcessingMetrics::default(),
            metadata: ResultMetadata {
                jurisdiction: Some("SECRET-MARKER".to_string()),
                ..ResultMetadata::default()
            },
            warnings: Vec::new(),
            generated_at: Utc::now(),
        });
        store.update(&mut job).await.unwrap();

        let document: String = store
            .conn
            .lock()
            .query_row("SELECT document FROM jobs WHERE id = ?", [&job.id], |row| row.get(0))
            .unwrap();
        assert!(!document.contains("SECRET-MARKER"));

        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.result, job.result);
    }
}
