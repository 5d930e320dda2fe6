//! In-memory registry of running jobs and restart recovery.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use storyvox_models::{Job, JobId, JobStatus, JobStep, StatusUpdate};
use storyvox_store::{JobStore, StoreError};

use crate::error::EngineResult;
use crate::metrics;

/// Error recorded on jobs that were running when the process stopped.
pub const INTERRUPTED_ERROR: &str = "interrupted by restart";

const RECOVERY_BATCH: u32 = 500;

/// Snapshot of one running job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveJob {
    pub job_id: JobId,
    pub owner: String,
    pub step: JobStep,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
}

struct Entry {
    info: ActiveJob,
    handle: Option<JoinHandle<()>>,
}

/// Job id to current step, start time and task handle.
#[derive(Clone, Default)]
pub struct ActiveJobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, Entry>>>,
}

impl ActiveJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, job: &Job) {
        let mut jobs = self.jobs.write().await;
        jobs.insert(
            job.id.clone(),
            Entry {
                info: ActiveJob {
                    job_id: job.id.clone(),
                    owner: job.owner.clone(),
                    step: job.step,
                    progress: job.progress,
                    started_at: Utc::now(),
                },
                handle: None,
            },
        );
        metrics::record_active_jobs(jobs.len());
    }

    /// Attach the task running a registered job.
    ///
    /// Returns false when the job already finished and was removed.
    pub async fn attach(&self, id: &JobId, handle: JoinHandle<()>) -> bool {
        match self.jobs.write().await.get_mut(id) {
            Some(entry) => {
                entry.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    pub async fn update(&self, id: &JobId, step: JobStep, progress: u8) {
        if let Some(entry) = self.jobs.write().await.get_mut(id) {
            entry.info.step = step;
            entry.info.progress = progress;
        }
    }

    pub async fn remove(&self, id: &JobId) {
        let mut jobs = self.jobs.write().await;
        jobs.remove(id);
        metrics::record_active_jobs(jobs.len());
    }

    pub async fn contains(&self, id: &JobId) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Running jobs, oldest first.
    pub async fn snapshot(&self) -> Vec<ActiveJob> {
        let mut jobs: Vec<ActiveJob> = self
            .jobs
            .read()
            .await
            .values()
            .map(|e| e.info.clone())
            .collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.job_id.cmp(&b.job_id)));
        jobs
    }

    /// Abort every running task. Used on shutdown; the jobs are recovered
    /// as interrupted on the next start.
    pub async fn abort_all(&self) {
        let mut jobs = self.jobs.write().await;
        for (id, entry) in jobs.drain() {
            if let Some(handle) = entry.handle {
                handle.abort();
                info!(job_id = %id, "Aborted running job");
            }
        }
        metrics::record_active_jobs(0);
    }
}

/// Fail every job left `processing` or `pending` by a previous process.
///
/// Must run before new jobs are accepted. Returns the number of jobs failed.
pub async fn recover_interrupted(jobs: &dyn JobStore) -> EngineResult<usize> {
    let mut recovered = 0;
    for status in [JobStatus::Processing, JobStatus::Pending] {
        for job in jobs.list_by_status(status, RECOVERY_BATCH).await? {
            match jobs
                .update_status(&job.id, &StatusUpdate::failed(INTERRUPTED_ERROR))
                .await
            {
                Ok(()) => {
                    recovered += 1;
                    warn!(job_id = %job.id, status = %status, "Marked interrupted job as failed");
                }
                // Finalized between the listing and the write
                Err(StoreError::InvalidTransition(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    if recovered > 0 {
        info!(recovered, "Recovered interrupted jobs");
    }
    Ok(recovered)
}
