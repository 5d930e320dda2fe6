//! Single-worker analysis queue.
//!
//! One background worker drains an in-memory FIFO so at most one analysis
//! is in flight against the rate-limited classifier. Rate-limited tasks are
//! parked for `retry_base_delay × (retry + 1)` and then re-enter the back of
//! the queue; the story stays `processing` while parked.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use storyvox_models::{AnalysisState, AnalysisTask, CurrentTask, QueueStatus, StoryId};
use storyvox_store::{StoreError, StoryStore};

use crate::config::AnalysisQueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::metrics;
use crate::pipeline::AnalysisPipeline;
use crate::rate_limit::RateLimitMatcher;

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<AnalysisTask>,
    current: Option<CurrentTask>,
    /// Stories parked for a delayed retry
    delayed: HashSet<StoryId>,
    running: bool,
}

impl QueueState {
    fn holds(&self, story_id: &StoryId) -> bool {
        self.delayed.contains(story_id)
            || self.current.as_ref().is_some_and(|c| &c.story_id == story_id)
            || self.tasks.iter().any(|t| &t.story_id == story_id)
    }
}

struct Inner {
    config: AnalysisQueueConfig,
    matcher: RateLimitMatcher,
    stories: Arc<dyn StoryStore>,
    pipeline: Arc<dyn AnalysisPipeline>,
    state: Mutex<QueueState>,
    notify: Notify,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the analysis queue. Cheap to clone.
#[derive(Clone)]
pub struct AnalysisQueue {
    inner: Arc<Inner>,
}

impl AnalysisQueue {
    pub fn new(
        config: AnalysisQueueConfig,
        stories: Arc<dyn StoryStore>,
        pipeline: Arc<dyn AnalysisPipeline>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                matcher: RateLimitMatcher::new(&config.rate_limit_signatures),
                config,
                stories,
                pipeline,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                shutdown,
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawn the worker. Calling `start` on a running queue is a no-op.
    pub async fn start(&self) {
        let mut worker = self.inner.worker.lock().await;
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.inner.shutdown.send_replace(false);
        self.inner.state.lock().await.running = true;
        let receiver = self.inner.shutdown.subscribe();
        *worker = Some(tokio::spawn(run_worker(self.inner.clone(), receiver)));
        info!("Analysis queue started");
    }

    /// Cancel the worker and any parked retries.
    ///
    /// A story whose analysis was interrupted keeps its `processing` marker.
    pub async fn stop(&self) {
        self.inner.shutdown.send_replace(true);
        let handle = self.inner.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Analysis worker ended abnormally");
            }
        }
        let mut state = self.inner.state.lock().await;
        if let Some(current) = state.current.take() {
            warn!(story_id = %current.story_id, "Analysis interrupted by shutdown");
        }
        state.running = false;
        info!(depth = state.tasks.len(), "Analysis queue stopped");
    }

    /// Queue a story for analysis and return the new queue depth.
    pub async fn enqueue(&self, task: AnalysisTask) -> QueueResult<usize> {
        let mut state = self.inner.state.lock().await;
        if state.holds(&task.story_id) {
            return Err(QueueError::AlreadyQueued(task.story_id));
        }

        self.inner
            .stories
            .set_analysis_state(&task.story_id, AnalysisState::Queued)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => QueueError::StoryNotFound(task.story_id.clone()),
                other => QueueError::Store(other),
            })?;

        info!(story_id = %task.story_id, position = state.tasks.len() + 1, "Story queued for analysis");
        state.tasks.push_back(task);
        let depth = state.tasks.len();
        drop(state);

        metrics::record_depth(depth);
        self.inner.notify.notify_one();
        Ok(depth)
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock().await;
        QueueStatus {
            depth: state.tasks.len(),
            current_task: state.current.clone(),
            pending_retries: state.delayed.len(),
            running: state.running,
        }
    }
}

async fn run_worker(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    info!("Analysis worker started");
    loop {
        let task = match inner.next_task().await {
            Some(task) => task,
            None => {
                let stopped = tokio::select! {
                    _ = inner.notify.notified() => false,
                    _ = shutdown.wait_for(|stopped| *stopped) => true,
                };
                if stopped {
                    break;
                }
                continue;
            }
        };

        let stopped = tokio::select! {
            _ = inner.process(task) => false,
            _ = shutdown.wait_for(|stopped| *stopped) => true,
        };
        if stopped {
            break;
        }
        inner.state.lock().await.current = None;

        let stopped = tokio::select! {
            _ = tokio::time::sleep(inner.config.dequeue_interval) => false,
            _ = shutdown.wait_for(|stopped| *stopped) => true,
        };
        if stopped {
            break;
        }
    }
    info!("Analysis worker exited");
}

impl Inner {
    async fn next_task(&self) -> Option<AnalysisTask> {
        let mut state = self.state.lock().await;
        let task = state.tasks.pop_front()?;
        state.current = Some(CurrentTask {
            story_id: task.story_id.clone(),
            retry_count: task.retry_count,
            started_at: Utc::now(),
        });
        metrics::record_depth(state.tasks.len());
        Some(task)
    }

    async fn process(self: &Arc<Self>, task: AnalysisTask) {
        let story_id = task.story_id.clone();
        if let Err(e) = self
            .stories
            .set_analysis_state(&story_id, AnalysisState::Processing)
            .await
        {
            warn!(story_id = %story_id, error = %e, "Failed to mark story processing");
        }

        info!(story_id = %story_id, retry_count = task.retry_count, "Analysis started");
        let started = Instant::now();

        match self.pipeline.analyze(&task).await {
            Ok(analysis) => match self.stories.save_analysis(&story_id, &analysis).await {
                Ok(()) => {
                    metrics::record_completed(started.elapsed().as_secs_f64());
                    info!(
                        story_id = %story_id,
                        speakers = analysis.speakers.len(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Analysis completed"
                    );
                }
                Err(e) => {
                    error!(story_id = %story_id, error = %e, "Failed to save analysis");
                    self.fail(&story_id, &format!("failed to save analysis: {}", e), false)
                        .await;
                }
            },
            Err(e) => {
                let rate_limited = self.matcher.matches(e.as_ref());
                if rate_limited && task.retry_count < self.config.max_retries {
                    self.schedule_retry(task).await;
                } else {
                    self.fail(&story_id, &e.to_string(), rate_limited).await;
                }
            }
        }
    }

    async fn fail(&self, story_id: &StoryId, message: &str, rate_limited: bool) {
        metrics::record_failed(rate_limited);
        warn!(story_id = %story_id, error = message, "Analysis failed");
        if let Err(e) = self.stories.fail_analysis(story_id, message).await {
            error!(story_id = %story_id, error = %e, "Failed to record analysis failure");
        }
    }

    async fn schedule_retry(self: &Arc<Self>, task: AnalysisTask) {
        let delay = self.config.retry_delay(task.retry_count);
        let task = task.retried();
        self.state.lock().await.delayed.insert(task.story_id.clone());
        metrics::record_retry();
        warn!(
            story_id = %task.story_id,
            retry_count = task.retry_count,
            delay_secs = delay.as_secs(),
            "Rate limited; analysis retry scheduled"
        );

        let inner = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let mut state = inner.state.lock().await;
                    state.delayed.remove(&task.story_id);
                    state.tasks.push_back(task);
                    metrics::record_depth(state.tasks.len());
                    drop(state);
                    inner.notify.notify_one();
                }
                _ = async { let _ = shutdown.wait_for(|stopped| *stopped).await; } => {
                    inner.state.lock().await.delayed.remove(&task.story_id);
                    warn!(story_id = %task.story_id, "Queue stopped; dropped delayed retry");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyvox_store::MemoryStore;

    struct NeverCalled;

    #[async_trait::async_trait]
    impl AnalysisPipeline for NeverCalled {
        async fn analyze(
            &self,
            _task: &AnalysisTask,
        ) -> Result<storyvox_models::StoryAnalysis, crate::error::PipelineError> {
            Err("not expected".into())
        }
    }

    #[tokio::test]
    async fn test_enqueue_rejects_duplicates_and_missing_stories() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_story(&storyvox_models::Story::new(StoryId::from_string("s1"), "u1", None))
            .await
            .unwrap();
        let queue = AnalysisQueue::new(AnalysisQueueConfig::default(), store.clone(), Arc::new(NeverCalled));

        let depth = queue
            .enqueue(AnalysisTask::new(StoryId::from_string("s1"), "/v/s1.mp4"))
            .await
            .unwrap();
        assert_eq!(depth, 1);

        let story = store.get_story(&StoryId::from_string("s1")).await.unwrap().unwrap();
        assert_eq!(story.analysis_state, AnalysisState::Queued);

        assert!(matches!(
            queue
                .enqueue(AnalysisTask::new(StoryId::from_string("s1"), "/v/s1.mp4"))
                .await,
            Err(QueueError::AlreadyQueued(_))
        ));
        assert!(matches!(
            queue
                .enqueue(AnalysisTask::new(StoryId::from_string("missing"), "/v/x.mp4"))
                .await,
            Err(QueueError::StoryNotFound(_))
        ));

        let status = queue.status().await;
        assert_eq!(status.depth, 1);
        assert!(!status.running);
        assert!(status.current_task.is_none());
    }
}
