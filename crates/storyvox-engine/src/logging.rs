//! Structured job logging.

use tracing::{error, info, warn, Span};

use storyvox_models::{JobId, JobStep};

/// Consistent lifecycle lines for one job run.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, operation = %self.operation, "Job started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, operation = %self.operation, "Job progress: {}", message);
    }

    pub fn log_step(&self, step: JobStep, progress: u8) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            step = %step,
            progress,
            "Job step"
        );
    }

    pub fn log_chunk_warning(&self, chunk: u32, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            chunk,
            "Chunk warning: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, operation = %self.operation, "Job warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, operation = %self.operation, "Job error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(job_id = %self.job_id, operation = %self.operation, "Job completed: {}", message);
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, operation = %self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_carries_job_id() {
        let id = JobId::from_string("job-1");
        let logger = JobLogger::new(&id, "generate");
        assert_eq!(logger.job_id(), "job-1");
    }
}
