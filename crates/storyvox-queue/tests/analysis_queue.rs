//! Queue scenarios under paused time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use storyvox_models::{AnalysisState, AnalysisTask, SpeakerProfile, Story, StoryAnalysis, StoryId};
use storyvox_queue::{AnalysisPipeline, AnalysisQueue, AnalysisQueueConfig, PipelineError};
use storyvox_store::{MemoryStore, StoryStore};

fn analysis() -> StoryAnalysis {
    StoryAnalysis {
        title: "The Fox".to_string(),
        description: "A fox finds a friend".to_string(),
        speakers: vec![SpeakerProfile {
            label: "Narrator".to_string(),
            description: None,
            speech_share: 1.0,
        }],
        spans: vec![],
        analyzed_at: Utc::now(),
    }
}

/// Fails with a rate-limit error every time, recording the retry counts it sees.
#[derive(Default)]
struct AlwaysRateLimited {
    seen: Mutex<Vec<u32>>,
}

#[async_trait]
impl AnalysisPipeline for AlwaysRateLimited {
    async fn analyze(&self, task: &AnalysisTask) -> Result<StoryAnalysis, PipelineError> {
        self.seen.lock().unwrap().push(task.retry_count);
        Err("gemini returned 429: RESOURCE_EXHAUSTED".into())
    }
}

/// Succeeds after a delay, tracking how many runs overlap.
#[derive(Default)]
struct Slow {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    runs: AtomicUsize,
}

#[async_trait]
impl AnalysisPipeline for Slow {
    async fn analyze(&self, _task: &AnalysisTask) -> Result<StoryAnalysis, PipelineError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(analysis())
    }
}

struct BadVideo;

#[async_trait]
impl AnalysisPipeline for BadVideo {
    async fn analyze(&self, _task: &AnalysisTask) -> Result<StoryAnalysis, PipelineError> {
        Err("no audio stream in video".into())
    }
}

async fn store_with(ids: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for id in ids {
        store
            .put_story(&Story::new(StoryId::from_string(*id), "owner-1", None))
            .await
            .unwrap();
    }
    store
}

async fn state(store: &MemoryStore, id: &str) -> Story {
    store
        .get_story(&StoryId::from_string(id))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_task_retries_then_fails() {
    let store = store_with(&["s1"]).await;
    let pipeline = Arc::new(AlwaysRateLimited::default());
    let queue = AnalysisQueue::new(AnalysisQueueConfig::default(), store.clone(), pipeline.clone());
    queue.start().await;

    queue
        .enqueue(AnalysisTask::new(StoryId::from_string("s1"), "/videos/s1.mp4"))
        .await
        .unwrap();

    // First attempt fails; the task is parked with retry_count = 1.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let status = queue.status().await;
    assert_eq!(status.depth, 0);
    assert_eq!(status.pending_retries, 1);
    assert_eq!(state(&store, "s1").await.analysis_state, AnalysisState::Processing);

    // Backoff is 30 s, 60 s, 90 s.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(*pipeline.seen.lock().unwrap(), vec![0, 1]);
    assert_eq!(state(&store, "s1").await.analysis_state, AnalysisState::Processing);

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(*pipeline.seen.lock().unwrap(), vec![0, 1, 2, 3]);

    let story = state(&store, "s1").await;
    assert_eq!(story.analysis_state, AnalysisState::Failed);
    assert!(story.analysis_error.unwrap().contains("429"));
    assert_eq!(queue.status().await.pending_retries, 0);

    queue.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_worker_runs_one_analysis_at_a_time() {
    let store = store_with(&["a", "b", "c"]).await;
    let pipeline = Arc::new(Slow::default());
    let queue = AnalysisQueue::new(AnalysisQueueConfig::default(), store.clone(), pipeline.clone());

    for id in ["a", "b", "c"] {
        queue
            .enqueue(AnalysisTask::new(StoryId::from_string(id), format!("/videos/{}.mp4", id)))
            .await
            .unwrap();
    }
    queue.start().await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    let status = queue.status().await;
    assert_eq!(status.depth, 2);
    assert_eq!(status.current_task.unwrap().story_id, StoryId::from_string("a"));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(pipeline.runs.load(Ordering::SeqCst), 3);
    assert_eq!(pipeline.peak.load(Ordering::SeqCst), 1);
    for id in ["a", "b", "c"] {
        let story = state(&store, id).await;
        assert_eq!(story.analysis_state, AnalysisState::Completed);
        assert_eq!(story.analysis.unwrap().title, "The Fox");
    }

    queue.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_other_errors_fail_immediately() {
    let store = store_with(&["s1"]).await;
    let queue = AnalysisQueue::new(AnalysisQueueConfig::default(), store.clone(), Arc::new(BadVideo));
    queue.start().await;
    queue
        .enqueue(AnalysisTask::new(StoryId::from_string("s1"), "/videos/s1.mp4"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let story = state(&store, "s1").await;
    assert_eq!(story.analysis_state, AnalysisState::Failed);
    assert_eq!(story.analysis_error.as_deref(), Some("no audio stream in video"));
    assert_eq!(queue.status().await.pending_retries, 0);

    queue.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_drops_parked_retry_and_keeps_marker() {
    let store = store_with(&["s1"]).await;
    let queue = AnalysisQueue::new(
        AnalysisQueueConfig::default(),
        store.clone(),
        Arc::new(AlwaysRateLimited::default()),
    );
    queue.start().await;
    queue
        .enqueue(AnalysisTask::new(StoryId::from_string("s1"), "/videos/s1.mp4"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(queue.status().await.pending_retries, 1);

    queue.stop().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let status = queue.status().await;
    assert!(!status.running);
    assert_eq!(status.pending_retries, 0);
    assert_eq!(status.depth, 0);
    assert_eq!(state(&store, "s1").await.analysis_state, AnalysisState::Processing);
}
