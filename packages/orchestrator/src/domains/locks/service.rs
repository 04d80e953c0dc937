//! Advisory file-lock service.
//!
//! Serializes file writes across concurrent workers. Acquisition is
//! per-path with no partial-success rollback: paths already acquired stay
//! acquired even when others in the same request are blocked, and the
//! caller decides whether to proceed with a subset or release.

use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::common::{ApiError, ApiResult};

use super::models::FileLock;

/// Outcome of a batch acquisition.
#[derive(Debug, Clone, Default)]
pub struct LockOutcome {
    pub acquired: Vec<String>,
    pub blocked: Vec<String>,
}

impl LockOutcome {
    pub fn all_acquired(&self) -> bool {
        self.blocked.is_empty()
    }
}

#[derive(Clone)]
pub struct LockService {
    pool: PgPool,
}

impl LockService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Try to take every path for the worker.
    ///
    /// Per path: one conflict-tolerant insert; on conflict the existing
    /// holder decides: the same worker re-acquiring is a no-op success,
    /// anyone else blocks the path. Duplicate paths in the request are
    /// collapsed.
    pub async fn acquire_locks(
        &self,
        worker_id: Uuid,
        paths: &[String],
    ) -> ApiResult<LockOutcome> {
        let mut outcome = LockOutcome::default();
        let mut seen = std::collections::HashSet::new();

        for path in paths {
            if !seen.insert(path.as_str()) {
                continue;
            }

            if FileLock::try_insert(worker_id, path, &self.pool)
                .await
                .map_err(ApiError::Internal)?
                .is_some()
            {
                outcome.acquired.push(path.clone());
                continue;
            }

            match FileLock::find_by_path(path, &self.pool)
                .await
                .map_err(ApiError::Internal)?
            {
                Some(existing) if existing.worker_id == worker_id => {
                    // Idempotent re-acquisition.
                    outcome.acquired.push(path.clone());
                }
                Some(existing) => {
                    debug!(
                        worker_id = %worker_id,
                        holder = %existing.worker_id,
                        path = %path,
                        "lock blocked"
                    );
                    outcome.blocked.push(path.clone());
                }
                None => {
                    // Holder released between insert and read; one more try.
                    if FileLock::try_insert(worker_id, path, &self.pool)
                        .await
                        .map_err(ApiError::Internal)?
                        .is_some()
                    {
                        outcome.acquired.push(path.clone());
                    } else {
                        outcome.blocked.push(path.clone());
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Release the given paths. Rows owned by other workers are untouched,
    /// so releasing a path you do not hold is a no-op.
    pub async fn release_locks(&self, worker_id: Uuid, paths: &[String]) -> ApiResult<u64> {
        let released = FileLock::delete_for_worker_paths(worker_id, paths, &self.pool)
            .await
            .map_err(ApiError::Internal)?;
        Ok(released)
    }

    /// Release every lock the worker holds. Mandatory on every terminal
    /// worker transition.
    pub async fn release_all_locks(&self, worker_id: Uuid) -> ApiResult<u64> {
        let released = FileLock::delete_all_for_worker(worker_id, &self.pool)
            .await
            .map_err(ApiError::Internal)?;
        if released > 0 {
            debug!(worker_id = %worker_id, count = released, "released all locks");
        }
        Ok(released)
    }

    pub async fn get_locks_for_worker(&self, worker_id: Uuid) -> ApiResult<Vec<FileLock>> {
        FileLock::list_for_worker(worker_id, &self.pool)
            .await
            .map_err(ApiError::Internal)
    }

    pub async fn get_lock_holder(&self, path: &str) -> ApiResult<Option<Uuid>> {
        let lock = FileLock::find_by_path(path, &self.pool)
            .await
            .map_err(ApiError::Internal)?;
        Ok(lock.map(|l| l.worker_id))
    }
}
