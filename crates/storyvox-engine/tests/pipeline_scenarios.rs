//! End-to-end job runs against in-process fakes of the toolchain and
//! providers, with a filesystem artifact store and in-memory stores.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use storyvox_engine::{EngineConfig, EngineError, JobOrchestrator, INTERRUPTED_ERROR};
use storyvox_media::{Codecs, DelayedTrack, MediaResult, MediaToolchain, OverlayLayer};
use storyvox_models::{
    artifact_keys, AvatarRef, Job, JobId, JobPage, JobStatus, JobStep, SpeakerConfig, StatusUpdate,
    StoryId, Transcription, WordTimestamp,
};
use storyvox_providers::{
    AvatarGenerator, AvatarRequest, AvatarTaskStatus, CallLimiter, Classification, PollConfig,
    ProviderError, ProviderResult, ProviderSet, SeparatedStems, SpeakerClassifier,
    SpeechSynthesizer, Transcriber, VocalSeparator,
};
use storyvox_storage::{ArtifactStore, LocalArtifactStore};
use storyvox_store::{JobStore, StoreResult, StoreSet};

// ============================================================================
// Fakes
// ============================================================================

async fn touch(path: &Path) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, b"fake media").await?;
    Ok(())
}

/// One `delay_and_mix` call.
#[derive(Debug, Clone)]
struct Mix {
    tracks: Vec<DelayedTrack>,
    duration: f64,
    output: PathBuf,
}

impl Mix {
    /// The `chunk_NNN` directory the mix was written to.
    fn chunk_dir(&self) -> String {
        self.output
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct FakeToolchain {
    duration: f64,
    mix_delay: Duration,
    extractions: AtomicUsize,
    mixes: Mutex<Vec<Mix>>,
    mixing: AtomicUsize,
    peak_mixing: AtomicUsize,
    overlays: Mutex<Vec<PathBuf>>,
    overlay_layers: Mutex<Vec<usize>>,
    concatenated: Mutex<Vec<PathBuf>>,
}

impl FakeToolchain {
    fn new(duration: f64, mix_delay: Duration) -> Self {
        Self {
            duration,
            mix_delay,
            ..Self::default()
        }
    }

    /// Mixes that produced a chunk's full audio track, in chunk order.
    fn chunk_mixes(&self) -> Vec<Mix> {
        let mut mixes: Vec<Mix> = self
            .mixes
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.output.file_name().is_some_and(|n| n == "audio.wav"))
            .cloned()
            .collect();
        mixes.sort_by_key(Mix::chunk_dir);
        mixes
    }
}

#[async_trait]
impl MediaToolchain for FakeToolchain {
    async fn extract_audio(&self, _video: &Path, output: &Path) -> MediaResult<()> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        touch(output).await
    }

    async fn probe_duration(&self, _media: &Path) -> MediaResult<f64> {
        Ok(self.duration)
    }

    async fn probe_dimensions(&self, _video: &Path) -> MediaResult<(u32, u32)> {
        Ok((1920, 1080))
    }

    async fn probe_codecs(&self, _media: &Path) -> MediaResult<Codecs> {
        Ok(Codecs {
            video: Some("h264".to_string()),
            audio: Some("aac".to_string()),
        })
    }

    async fn cut_audio(&self, _input: &Path, output: &Path, _start: f64, _duration: f64) -> MediaResult<()> {
        touch(output).await
    }

    async fn trim_audio(&self, _input: &Path, output: &Path, max_duration: f64) -> MediaResult<f64> {
        touch(output).await?;
        Ok(max_duration.min(30.0))
    }

    async fn delay_and_mix(&self, tracks: &[DelayedTrack], duration: f64, output: &Path) -> MediaResult<()> {
        let running = self.mixing.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_mixing.fetch_max(running, Ordering::SeqCst);
        if !self.mix_delay.is_zero() {
            tokio::time::sleep(self.mix_delay).await;
        }
        self.mixes.lock().unwrap().push(Mix {
            tracks: tracks.to_vec(),
            duration,
            output: output.to_path_buf(),
        });
        self.mixing.fetch_sub(1, Ordering::SeqCst);
        touch(output).await
    }

    async fn cut_video(&self, _input: &Path, output: &Path, _start: f64, _duration: f64) -> MediaResult<()> {
        touch(output).await
    }

    async fn overlay(&self, base: &Path, layers: &[OverlayLayer], _scale: f64, output: &Path) -> MediaResult<()> {
        self.overlays.lock().unwrap().push(base.to_path_buf());
        self.overlay_layers.lock().unwrap().push(layers.len());
        touch(output).await
    }

    async fn replace_audio(&self, _video: &Path, _audio: &Path, output: &Path) -> MediaResult<()> {
        touch(output).await
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()> {
        self.concatenated.lock().unwrap().extend(inputs.iter().cloned());
        touch(output).await
    }
}

struct FakeTranscriber {
    words: Vec<WordTimestamp>,
    calls: AtomicUsize,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio_url: &str, language: &str) -> ProviderResult<Transcription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Transcription {
            text: self
                .words
                .iter()
                .map(|w| w.word.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            words: self.words.clone(),
            segments: Vec::new(),
            language: Some(language.to_string()),
        })
    }
}

struct FakeSeparator {
    stems: Option<SeparatedStems>,
}

#[async_trait]
impl VocalSeparator for FakeSeparator {
    async fn separate(&self, _audio_url: &str) -> ProviderResult<SeparatedStems> {
        self.stems
            .clone()
            .ok_or_else(|| ProviderError::task_failed("separation model crashed"))
    }
}

struct FakeSpeech {
    fail: bool,
    /// `(voice_id, text)` per call
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, voice_id: &str, text: &str) -> ProviderResult<Vec<u8>> {
        self.calls
            .lock()
            .unwrap()
            .push((voice_id.to_string(), text.to_string()));
        if self.fail {
            return Err(ProviderError::from_status("tts", 400, "unknown voice"));
        }
        Ok(text.as_bytes().to_vec())
    }

    fn extension(&self) -> &'static str {
        "mp3"
    }
}

/// Fails every task whose audio key contains one of `failing`.
struct FakeAvatar {
    video_url: String,
    failing: Vec<String>,
}

#[async_trait]
impl AvatarGenerator for FakeAvatar {
    async fn create_task(&self, request: &AvatarRequest) -> ProviderResult<String> {
        Ok(request.audio_url.clone())
    }

    async fn poll_task(&self, task_id: &str) -> ProviderResult<AvatarTaskStatus> {
        if self.failing.iter().any(|marker| task_id.contains(marker.as_str())) {
            Ok(AvatarTaskStatus::Failed {
                error: "face not detected".to_string(),
            })
        } else {
            Ok(AvatarTaskStatus::Succeeded {
                video_url: self.video_url.clone(),
            })
        }
    }

    fn max_audio_duration(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn poll_config(&self) -> PollConfig {
        PollConfig::new(Duration::from_millis(1), 3)
    }
}

/// Job store that records every status write before delegating.
struct RecordingJobs {
    inner: Arc<dyn JobStore>,
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingJobs {
    fn steps(&self) -> Vec<(JobStep, u8)> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| Some((u.step?, u.progress?)))
            .collect()
    }
}

#[async_trait]
impl JobStore for RecordingJobs {
    async fn create(&self, job: &Job) -> StoreResult<JobId> {
        self.inner.create(job).await
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        self.inner.get(id).await
    }

    async fn update_status(&self, id: &JobId, update: &StatusUpdate) -> StoreResult<()> {
        self.updates.lock().unwrap().push(update.clone());
        self.inner.update_status(id, update).await
    }

    async fn update_field(&self, id: &JobId, name: &str, value: serde_json::Value) -> StoreResult<()> {
        self.inner.update_field(id, name, value).await
    }

    async fn update_fields(&self, id: &JobId, fields: HashMap<String, serde_json::Value>) -> StoreResult<()> {
        self.inner.update_fields(id, fields).await
    }

    async fn list_by_owner(&self, owner: &str, page: u32, page_size: u32) -> StoreResult<JobPage> {
        self.inner.list_by_owner(owner, page, page_size).await
    }

    async fn complete(&self, id: &JobId, final_video_url: &str) -> StoreResult<()> {
        self.inner.complete(id, final_video_url).await
    }

    async fn list_by_status(&self, status: JobStatus, limit: u32) -> StoreResult<Vec<Job>> {
        self.inner.list_by_status(status, limit).await
    }
}

struct UnusedClassifier;

#[async_trait]
impl SpeakerClassifier for UnusedClassifier {
    async fn classify(
        &self,
        _segments: &[storyvox_models::TranscriptSegment],
        _api_key_override: Option<&str>,
    ) -> ProviderResult<Classification> {
        Err(ProviderError::not_configured("classifier"))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    _dir: TempDir,
    source_url: String,
    stores: StoreSet,
    jobs: Arc<RecordingJobs>,
    toolchain: Arc<FakeToolchain>,
    transcriber: Arc<FakeTranscriber>,
    speech: Arc<FakeSpeech>,
    orchestrator: JobOrchestrator,
}

struct Options {
    duration: f64,
    words: Vec<WordTimestamp>,
    separation_fails: bool,
    speech_fails: bool,
    /// Substrings of avatar task ids that fail
    failing_avatars: Vec<String>,
    mix_delay: Duration,
    max_ffmpeg_processes: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            duration: 12.0,
            words: vec![
                WordTimestamp::new("Once", 0.0, 1.0),
                WordTimestamp::new("upon", 1.0, 1.6),
                WordTimestamp::new("time", 1.6, 2.5),
            ],
            separation_fails: false,
            speech_fails: false,
            failing_avatars: Vec::new(),
            mix_delay: Duration::ZERO,
            max_ffmpeg_processes: EngineConfig::default().max_ffmpeg_processes,
        }
    }
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

async fn harness(options: Options) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let inputs = dir.path().join("inputs");
    tokio::fs::create_dir_all(&inputs).await.unwrap();
    for name in ["story.mp4", "vocals.wav", "background.wav", "avatar.mp4"] {
        tokio::fs::write(inputs.join(name), b"fake media").await.unwrap();
    }

    let memory = StoreSet::memory();
    let jobs = Arc::new(RecordingJobs {
        inner: memory.jobs.clone(),
        updates: Mutex::new(Vec::new()),
    });
    let stores = StoreSet {
        jobs: jobs.clone(),
        ..memory
    };
    let toolchain = Arc::new(FakeToolchain::new(options.duration, options.mix_delay));
    let speech = Arc::new(FakeSpeech {
        fail: options.speech_fails,
        calls: Mutex::new(Vec::new()),
    });
    let transcriber = Arc::new(FakeTranscriber {
        words: options.words,
        calls: AtomicUsize::new(0),
    });
    let stems = (!options.separation_fails).then(|| SeparatedStems {
        vocals_url: file_url(&inputs.join("vocals.wav")),
        background_url: file_url(&inputs.join("background.wav")),
    });
    let providers = ProviderSet {
        transcriber: transcriber.clone(),
        separator: Arc::new(FakeSeparator { stems }),
        speech: speech.clone(),
        avatar: Arc::new(FakeAvatar {
            video_url: file_url(&inputs.join("avatar.mp4")),
            failing: options.failing_avatars,
        }),
        classifier: Arc::new(UnusedClassifier),
    };
    let artifacts: Arc<dyn ArtifactStore> =
        Arc::new(LocalArtifactStore::new(dir.path().join("artifacts")));

    let config = EngineConfig {
        retry_base_delay: Duration::from_millis(1),
        max_ffmpeg_processes: options.max_ffmpeg_processes,
        work_dir: dir.path().join("work"),
        ..EngineConfig::default()
    };
    let orchestrator = JobOrchestrator::new(
        stores.clone(),
        providers,
        toolchain.clone(),
        artifacts,
        CallLimiter::new(config.max_external_calls),
        config,
    );

    Harness {
        source_url: file_url(&inputs.join("story.mp4")),
        _dir: dir,
        stores,
        jobs,
        toolchain,
        transcriber,
        speech,
        orchestrator,
    }
}

impl Harness {
    async fn create_job(&self, speakers: Vec<SpeakerConfig>) -> Job {
        let job = Job::new("u1", StoryId::from_string("s1"), self.source_url.clone(), speakers);
        self.stores.jobs.create(&job).await.unwrap();
        job
    }

    async fn reload(&self, job: &Job) -> Job {
        self.stores.jobs.get(&job.id).await.unwrap().unwrap()
    }
}

fn narrator_with_avatar() -> SpeakerConfig {
    SpeakerConfig::narrator("voice-1").with_avatar(AvatarRef {
        avatar_id: "avatar-1".to_string(),
        image_url: "https://cdn.example.com/avatar-1.png".to_string(),
        face_bbox: None,
        ext_bbox: None,
    })
}

fn speaker(label: &str, with_avatar: bool) -> SpeakerConfig {
    let speaker = SpeakerConfig::narrator(format!("voice-{}", label)).with_label(label);
    if !with_avatar {
        return speaker;
    }
    speaker.with_avatar(AvatarRef {
        avatar_id: format!("avatar-{}", label),
        image_url: format!("https://cdn.example.com/{}.png", label),
        face_bbox: None,
        ext_bbox: None,
    })
}

fn three_chunk_words() -> Vec<WordTimestamp> {
    vec![
        WordTimestamp::new("Once", 1.0, 2.0),
        WordTimestamp::new("upon", 2.0, 3.0),
        WordTimestamp::new("The", 31.0, 32.0),
        WordTimestamp::new("fox", 32.0, 33.0),
        WordTimestamp::new("The", 61.0, 62.0),
        WordTimestamp::new("end", 62.0, 63.0),
    ]
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_short_clip_is_one_chunk() {
    let h = harness(Options::default()).await;
    let job = h.create_job(vec![SpeakerConfig::narrator("voice-1")]).await;

    let url = h.orchestrator.run(job.clone()).await.unwrap();

    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.step, JobStep::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.final_video_url.as_deref(), Some(url.as_str()));
    assert!(url.starts_with("file://"));
    assert_eq!(job.chunk_count, Some(1));
    assert!(job.failed_chunks.is_empty());
    for key in [
        artifact_keys::EXTRACTED_AUDIO,
        artifact_keys::VOCALS,
        artifact_keys::BACKGROUND,
        artifact_keys::TRANSCRIPT,
    ] {
        assert!(job.artifact(key).is_some(), "missing artifact {}", key);
    }
    assert!(job.artifact(&artifact_keys::chunk_segment(0)).is_some());

    let subtitles = h.stores.subtitles.list(&job.id, false).await.unwrap();
    assert_eq!(subtitles.len(), 1);
    assert_eq!(subtitles[0].text, "Once upon time");
    assert_eq!(h.toolchain.concatenated.lock().unwrap().len(), 1);
    assert!(h.toolchain.overlays.lock().unwrap().is_empty());
    assert!(h.orchestrator.registry().is_empty().await);
}

#[tokio::test]
async fn test_failed_avatar_falls_back_to_audio_only() {
    let h = harness(Options {
        duration: 90.0,
        words: three_chunk_words(),
        failing_avatars: vec!["/chunks/001/".to_string()],
        ..Options::default()
    })
    .await;
    let job = h.create_job(vec![narrator_with_avatar()]).await;

    h.orchestrator.run(job.clone()).await.unwrap();

    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.chunk_count, Some(3));
    assert_eq!(job.failed_chunks, vec![1]);
    assert!(job.artifact(&artifact_keys::chunk_avatar(0, "narrator")).is_some());
    assert!(job.artifact(&artifact_keys::chunk_avatar(1, "narrator")).is_none());

    let concatenated = h.toolchain.concatenated.lock().unwrap().clone();
    assert_eq!(concatenated.len(), 3);
    assert!(concatenated[0].to_string_lossy().contains("chunk_000"));
    assert!(concatenated[1].to_string_lossy().contains("chunk_001"));
    assert!(concatenated[2].to_string_lossy().contains("chunk_002"));

    let overlays = h.toolchain.overlays.lock().unwrap().clone();
    assert_eq!(overlays.len(), 2);
    assert!(overlays.iter().all(|p| !p.to_string_lossy().contains("chunk_001")));
}

#[tokio::test]
async fn test_separation_failure_is_not_fatal() {
    let h = harness(Options {
        separation_fails: true,
        ..Options::default()
    })
    .await;
    let job = h.create_job(vec![SpeakerConfig::narrator("voice-1")]).await;

    h.orchestrator.run(job.clone()).await.unwrap();

    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.artifact(artifact_keys::BACKGROUND).is_none());
    assert!(job.artifact(artifact_keys::EXTRACTED_AUDIO).is_some());
}

#[tokio::test]
async fn test_no_usable_chunk_fails_job() {
    let h = harness(Options {
        speech_fails: true,
        ..Options::default()
    })
    .await;
    let job = h.create_job(vec![SpeakerConfig::narrator("voice-1")]).await;

    let result = h.orchestrator.run(job.clone()).await;
    assert!(matches!(result, Err(EngineError::NoSuccessfulChunks)));

    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(!job.error.as_deref().unwrap_or_default().is_empty());
    assert_eq!(job.failed_chunks, vec![0]);
    assert!(h.orchestrator.registry().is_empty().await);
}

#[tokio::test]
async fn test_regenerate_skips_preparation() {
    let h = harness(Options::default()).await;
    let first = h.create_job(vec![SpeakerConfig::narrator("voice-1")]).await;
    h.orchestrator.run(first.clone()).await.unwrap();
    let first = h.reload(&first).await;

    let subtitles = h.stores.subtitles.list(&first.id, false).await.unwrap();
    let second = Job::regenerate_from(&first);
    h.stores.jobs.create(&second).await.unwrap();
    h.stores.subtitles.replace_all(&second.id, &subtitles).await.unwrap();

    h.orchestrator.run(second.clone()).await.unwrap();

    let second = h.reload(&second).await;
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.source_job.as_ref(), Some(&first.id));
    assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.toolchain.extractions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_regenerate_without_prepared_audio_fails() {
    let h = harness(Options::default()).await;
    let mut job = h.create_job(vec![SpeakerConfig::narrator("voice-1")]).await;
    job.source_job = Some(storyvox_models::JobId::from_string("gone"));

    let result = h.orchestrator.run(job.clone()).await;
    assert!(matches!(result, Err(EngineError::MissingArtifact(_))));
    assert_eq!(h.reload(&job).await.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_job_finalized_elsewhere_is_left_alone() {
    let h = harness(Options::default()).await;
    let job = h.create_job(vec![SpeakerConfig::narrator("voice-1")]).await;
    h.stores
        .jobs
        .update_status(&job.id, &StatusUpdate::failed(INTERRUPTED_ERROR))
        .await
        .unwrap();

    let result = h.orchestrator.run(job.clone()).await;
    assert!(matches!(result, Err(EngineError::JobFinalized(_))));

    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(INTERRUPTED_ERROR));
    assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_one_failed_speaker_avatar_makes_chunk_audio_only() {
    let h = harness(Options {
        duration: 45.0,
        words: vec![
            WordTimestamp::new("Hello", 1.0, 2.0).with_speaker("fox"),
            WordTimestamp::new("Hoot", 5.0, 6.0).with_speaker("owl"),
            WordTimestamp::new("Again", 31.0, 32.0).with_speaker("fox"),
            WordTimestamp::new("Hoot", 35.0, 36.0).with_speaker("owl"),
        ],
        failing_avatars: vec!["/chunks/000/avatar_input_owl".to_string()],
        ..Options::default()
    })
    .await;
    let job = h
        .create_job(vec![speaker("fox", true), speaker("owl", true)])
        .await;

    h.orchestrator.run(job.clone()).await.unwrap();

    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.chunk_count, Some(2));
    assert_eq!(job.failed_chunks, vec![0]);
    assert!(job.artifact(&artifact_keys::chunk_avatar(0, "fox")).is_some());
    assert!(job.artifact(&artifact_keys::chunk_avatar(0, "owl")).is_none());
    assert!(job.artifact(&artifact_keys::chunk_avatar(1, "fox")).is_some());
    assert!(job.artifact(&artifact_keys::chunk_avatar(1, "owl")).is_some());

    // The surviving fox avatar is not overlaid on its own
    let overlays = h.toolchain.overlays.lock().unwrap().clone();
    assert_eq!(overlays.len(), 1);
    assert!(overlays[0].to_string_lossy().contains("chunk_001"));
    assert_eq!(*h.toolchain.overlay_layers.lock().unwrap(), vec![2]);
    assert_eq!(h.toolchain.concatenated.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_step_and_progress_never_regress() {
    let h = harness(Options {
        duration: 90.0,
        words: three_chunk_words(),
        ..Options::default()
    })
    .await;
    let job = h.create_job(vec![narrator_with_avatar()]).await;

    h.orchestrator.run(job.clone()).await.unwrap();

    let writes = h.jobs.steps();
    assert!(writes.len() > 7, "expected per-chunk progress writes, got {:?}", writes);
    for pair in writes.windows(2) {
        let ((step_a, progress_a), (step_b, progress_b)) = (pair[0], pair[1]);
        assert!(step_b >= step_a, "step went back: {:?}", pair);
        assert!(progress_b >= progress_a, "progress went back: {:?}", pair);
    }

    let mut visited: Vec<JobStep> = writes.iter().map(|(step, _)| *step).collect();
    visited.dedup();
    assert_eq!(
        visited,
        vec![
            JobStep::Init,
            JobStep::ExtractingAudio,
            JobStep::SeparatingVocals,
            JobStep::Transcribing,
            JobStep::GeneratingVoice,
            JobStep::GeneratingAvatar,
            JobStep::CompositingVideo,
        ]
    );
    let compositing_max = writes
        .iter()
        .filter(|(step, _)| *step == JobStep::CompositingVideo)
        .map(|(_, progress)| *progress)
        .max();
    assert_eq!(compositing_max, Some(95));

    let job = h.reload(&job).await;
    assert_eq!((job.step, job.progress), (JobStep::Completed, 100));
}

#[tokio::test]
async fn test_unattributed_lines_go_to_first_enabled_speaker() {
    let h = harness(Options {
        duration: 20.0,
        words: vec![
            WordTimestamp::new("Hello", 1.0, 2.0).with_speaker("fox"),
            WordTimestamp::new("Meanwhile", 5.0, 6.0),
            WordTimestamp::new("Hoot", 9.0, 10.0).with_speaker("owl"),
        ],
        ..Options::default()
    })
    .await;
    let mut owl = speaker("owl", false);
    owl.enabled = false;
    let job = h.create_job(vec![owl, speaker("fox", false)]).await;

    h.orchestrator.run(job.clone()).await.unwrap();

    let mut calls = h.speech.calls.lock().unwrap().clone();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            ("voice-fox".to_string(), "Hello".to_string()),
            ("voice-fox".to_string(), "Meanwhile".to_string()),
        ]
    );

    // The disabled owl's line is silent: background plus two clips
    let mixes = h.toolchain.chunk_mixes();
    assert_eq!(mixes.len(), 1);
    let offsets: Vec<f64> = mixes[0].tracks.iter().map(|t| t.offset).collect();
    assert_eq!(offsets, vec![0.0, 1.0, 5.0]);
}

#[tokio::test]
async fn test_mix_places_clips_at_segment_offsets() {
    let h = harness(Options {
        duration: 45.0,
        words: vec![
            WordTimestamp::new("Once", 1.0, 2.0),
            WordTimestamp::new("upon", 5.0, 6.0),
            WordTimestamp::new("The", 33.0, 34.0),
        ],
        ..Options::default()
    })
    .await;
    let job = h.create_job(vec![SpeakerConfig::narrator("voice-1")]).await;

    h.orchestrator.run(job.clone()).await.unwrap();

    let mixes = h.toolchain.chunk_mixes();
    assert_eq!(mixes.len(), 2);

    let first = &mixes[0];
    assert_eq!(first.chunk_dir(), "chunk_000");
    assert_eq!(first.duration, 30.0);
    let offsets: Vec<f64> = first.tracks.iter().map(|t| t.offset).collect();
    assert_eq!(offsets, vec![0.0, 1.0, 5.0]);
    assert!(first.tracks[0].path.ends_with("chunk_000/background.wav"));
    assert!(first.tracks[1].path.to_string_lossy().contains("clip_00000"));
    assert!(first.tracks[2].path.to_string_lossy().contains("clip_00001"));

    // Offsets are relative to the chunk start, not accumulated clip lengths
    let second = &mixes[1];
    assert_eq!(second.chunk_dir(), "chunk_001");
    assert_eq!(second.duration, 15.0);
    let offsets: Vec<f64> = second.tracks.iter().map(|t| t.offset).collect();
    assert_eq!(offsets, vec![0.0, 3.0]);
}

#[tokio::test]
async fn test_concurrent_mixes_stay_within_process_limit() {
    let words = (0..40)
        .map(|i| {
            let start = i as f64 * 30.0 + 1.0;
            WordTimestamp::new(format!("line{}", i), start, start + 1.0)
        })
        .collect();
    let h = harness(Options {
        duration: 1200.0,
        words,
        mix_delay: Duration::from_millis(50),
        max_ffmpeg_processes: 2,
        ..Options::default()
    })
    .await;
    let job = h.create_job(vec![SpeakerConfig::narrator("voice-1")]).await;

    h.orchestrator.run(job.clone()).await.unwrap();

    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.chunk_count, Some(40));
    assert_eq!(h.toolchain.chunk_mixes().len(), 40);
    assert_eq!(h.toolchain.peak_mixing.load(Ordering::SeqCst), 2);
}
