use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::align::{AlignmentEngine, Timeline};
use crate::assemble::{AssembledTrack, TrackAssembler};
use crate::config::{Config, TargetLanguage};
use crate::error::{DublineError, Result};
use crate::media::{MediaProcessorFactory, MediaProcessorTrait, MuxRequest};
use crate::segment::{SegmentStore, StatusCounts};
use crate::subtitle::SubtitleEmitter;
use crate::synthesis::stage::clip_dir_for;
use crate::synthesis::{SynthesisStage, Synthesizer, SynthesizerFactory};
use crate::transcript;
use crate::translate::{TranslationStage, Translator, TranslatorFactory, check_ollama_availability};
use crate::workers::ProgressFn;

/// Lifecycle of one dubbing job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Created,
    Transcribed,
    Translating,
    Synthesizing,
    Aligning,
    Emitting,
    Assembling,
    Ready,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Transcribed => "transcribed",
            Self::Translating => "translating",
            Self::Synthesizing => "synthesizing",
            Self::Aligning => "aligning",
            Self::Emitting => "emitting",
            Self::Assembling => "assembling",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// `(stage, completed/total)` as published to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub state: JobState,
    pub completed: usize,
    pub total: usize,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            state: JobState::Created,
            completed: 0,
            total: 0,
        }
    }
}

pub fn progress_channel() -> (watch::Sender<JobProgress>, watch::Receiver<JobProgress>) {
    watch::channel(JobProgress::default())
}

/// What to dub and where to put the results
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub transcript_path: PathBuf,
    pub video_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub language: TargetLanguage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOutputs {
    pub subtitle_path: Option<PathBuf>,
    pub track: Option<AssembledTrack>,
    pub video_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub stage: String,
    pub reason: String,
}

/// Everything known about a finished (or failed) job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub transcript_path: PathBuf,
    pub language: TargetLanguage,
    pub state: JobState,
    pub failed_stage: Option<JobState>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: StatusCounts,
    pub failures: Vec<FailureRecord>,
    pub timeline: Option<Timeline>,
    pub outputs: JobOutputs,
}

struct Job {
    id: Uuid,
    state: JobState,
    started_at: DateTime<Utc>,
    progress: Arc<watch::Sender<JobProgress>>,
    store: Option<SegmentStore>,
    timeline: Option<Timeline>,
    outputs: JobOutputs,
}

impl Job {
    fn enter(&mut self, state: JobState, total: usize) {
        info!("Job {}: {} -> {}", self.id, self.state, state);
        self.state = state;
        self.progress.send_replace(JobProgress {
            state,
            completed: 0,
            total,
        });
    }

    fn progress_fn(&self) -> ProgressFn {
        let progress = self.progress.clone();
        Arc::new(move |completed| {
            progress.send_modify(|p| p.completed = completed);
        })
    }

    fn report(&self, request: &JobRequest, error: Option<&DublineError>) -> JobReport {
        let (counts, failures) = match &self.store {
            Some(store) => {
                let failures = store
                    .snapshot()
                    .into_iter()
                    .filter_map(|s| {
                        s.failure.map(|f| FailureRecord {
                            id: s.id,
                            start_ms: s.start_ms,
                            end_ms: s.end_ms,
                            stage: f.stage,
                            reason: f.reason,
                        })
                    })
                    .collect();
                (store.counts(), failures)
            }
            None => (StatusCounts::default(), Vec::new()),
        };

        JobReport {
            job_id: self.id,
            transcript_path: request.transcript_path.clone(),
            language: request.language,
            state: if error.is_some() { JobState::Failed } else { self.state },
            failed_stage: error.map(|_| self.state),
            error: error.map(|e| e.to_string()),
            started_at: self.started_at,
            finished_at: Utc::now(),
            counts,
            failures,
            timeline: self.timeline.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

/// Runs dubbing jobs end to end
pub struct Pipeline {
    config: Config,
    translator: Arc<dyn Translator>,
    synthesizer: Arc<dyn Synthesizer>,
    media: Box<dyn MediaProcessorTrait>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let translator = TranslatorFactory::create_translator(config.translate.clone())?;
        let synthesizer = SynthesizerFactory::create_synthesizer(config.synthesis.clone());
        let media = MediaProcessorFactory::create_processor(config.media.clone());
        Ok(Self::with_services(config, translator, synthesizer, media))
    }

    pub fn with_services(
        config: Config,
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn Synthesizer>,
        media: Box<dyn MediaProcessorTrait>,
    ) -> Self {
        Self {
            config,
            translator,
            synthesizer,
            media,
        }
    }

    /// Verify the translator model is loaded and, when muxing, that ffmpeg runs
    pub async fn check_services(&self, needs_media: bool) -> Result<()> {
        check_ollama_availability(&self.config.translate.endpoint, &self.config.translate.model).await?;
        if needs_media {
            self.media.check_availability().await?;
        }
        Ok(())
    }

    /// Run one job. The report is written next to the outputs whether the
    /// job succeeds or not; fatal errors are returned after that.
    pub async fn run(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
        progress: Arc<watch::Sender<JobProgress>>,
    ) -> Result<JobReport> {
        let mut job = Job {
            id: Uuid::new_v4(),
            state: JobState::Created,
            started_at: Utc::now(),
            progress,
            store: None,
            timeline: None,
            outputs: JobOutputs::default(),
        };
        info!(
            "Job {} created: {} -> {}",
            job.id,
            request.transcript_path.display(),
            request.language.name()
        );

        fs::create_dir_all(&request.output_dir).await?;
        let job_cancel = cancel.child_token();

        let outcome = {
            let execution = self.execute(&mut job, request, &job_cancel);
            tokio::pin!(execution);
            match self.config.pipeline.job_timeout_secs {
                Some(secs) => {
                    tokio::select! {
                        res = &mut execution => res,
                        _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                            warn!("Job exceeded its {}s timeout, cancelling", secs);
                            job_cancel.cancel();
                            // Let in-flight segments settle; whatever finished late is void
                            if let Err(e) = execution.await {
                                debug!("Job stopped after timeout: {}", e);
                            }
                            Err(DublineError::JobTimedOut(secs))
                        }
                    }
                }
                None => execution.await,
            }
        };

        let report_path = request
            .output_dir
            .join(format!("{}.{}.report.json", output_stem(request), request.language.code()));
        job.outputs.report_path = Some(report_path.clone());

        match outcome {
            Ok(()) => {
                let total = job.store.as_ref().map_or(0, |s| s.len());
                job.enter(JobState::Ready, total);
                let report = job.report(request, None);
                write_report(&report, &report_path).await?;
                info!("Job {} ready", job.id);
                Ok(report)
            }
            Err(e) => {
                warn!("Job {} failed during {}: {}", job.id, job.state, e);
                let report = job.report(request, Some(&e));
                job.progress.send_modify(|p| p.state = JobState::Failed);
                if let Err(write_err) = write_report(&report, &report_path).await {
                    warn!("Could not write job report: {}", write_err);
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, job: &mut Job, request: &JobRequest, cancel: &CancellationToken) -> Result<()> {
        let entries = transcript::load_file(&request.transcript_path).await?;
        let store = SegmentStore::load(entries)?;
        if store.is_empty() {
            return Err(DublineError::MalformedTranscript("transcript has no segments".to_string()));
        }
        job.store = Some(store.clone());
        let total = store.len();
        job.enter(JobState::Transcribed, total);

        let pipeline = &self.config.pipeline;
        let work_dir_guard;
        let work_dir = match &pipeline.work_dir {
            Some(dir) => PathBuf::from(dir).join(job.id.to_string()),
            None => {
                work_dir_guard = tempfile::tempdir()?;
                work_dir_guard.path().to_path_buf()
            }
        };

        // Translation
        job.enter(JobState::Translating, total);
        let translation = TranslationStage::new(
            self.translator.clone(),
            request.language,
            pipeline.retry.clone(),
            Duration::from_secs(self.config.translate.request_timeout_secs.max(1)),
            pipeline.workers,
        );
        translation.run(&store, cancel, job.progress_fn()).await;
        self.checkpoint(&store, JobState::Translating, cancel)?;

        // Synthesis
        job.enter(JobState::Synthesizing, store.counts().translated);
        let synthesis = SynthesisStage::new(
            self.synthesizer.clone(),
            request.language,
            self.config.synthesis.voice_for(request.language),
            pipeline.retry.clone(),
            Duration::from_secs(self.config.synthesis.request_timeout_secs.max(1)),
            pipeline.workers,
            self.config.synthesis.sample_rate,
            clip_dir_for(&work_dir),
        );
        synthesis.run(&store, cancel, job.progress_fn()).await?;
        self.checkpoint(&store, JobState::Synthesizing, cancel)?;

        // Alignment, with one speed-adjusted re-render where the backend allows
        job.enter(JobState::Aligning, total);
        let engine = AlignmentEngine::new(self.config.alignment.clone());
        let rate_capable = synthesis.supports_rate();
        let mut timeline = engine.align(&store.snapshot(), rate_capable)?;
        let requests = timeline.speedup_requests();
        if rate_capable && !requests.is_empty() {
            synthesis.resynthesize(&store, requests, cancel, job.progress_fn()).await;
            if cancel.is_cancelled() {
                return Err(DublineError::Cancelled);
            }
            timeline = engine.align(&store.snapshot(), rate_capable)?;
        }
        timeline.apply_to(&store)?;
        job.progress.send_modify(|p| p.completed = total);
        job.timeline = Some(timeline.clone());

        let stem = output_stem(request);
        let code = request.language.code();

        // Subtitles
        job.enter(JobState::Emitting, timeline.entries.len());
        let subtitle_path = request.output_dir.join(format!("{}.{}.srt", stem, code));
        let emitter = SubtitleEmitter::new(&self.config.subtitle, request.language);
        let cues = emitter.write_srt(&timeline, &subtitle_path).await?;
        job.progress.send_modify(|p| p.completed = cues.min(p.total));
        job.outputs.subtitle_path = Some(subtitle_path.clone());

        // Audio track, then the optional mux
        job.enter(JobState::Assembling, timeline.entries.len());
        let audio_path = request.output_dir.join(format!("{}.{}.wav", stem, code));
        let assembler = TrackAssembler::new(self.config.synthesis.sample_rate);
        let track = {
            let timeline = timeline.clone();
            let audio_path = audio_path.clone();
            tokio::task::spawn_blocking(move || assembler.assemble(&timeline, &audio_path))
                .await
                .map_err(|e| DublineError::Media(format!("track assembly task failed: {}", e)))??
        };
        job.outputs.track = Some(track);

        if let Some(video_path) = &request.video_path {
            let extension = video_path.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
            let output_path = request
                .output_dir
                .join(format!("{}.{}.{}", stem, code, extension));
            self.media
                .mux_dubbed_video(MuxRequest {
                    video_path,
                    audio_path: &audio_path,
                    subtitle_path: Some(&subtitle_path),
                    output_path: &output_path,
                    language: request.language,
                })
                .await?;
            job.outputs.video_path = Some(output_path);
        }
        job.progress.send_modify(|p| p.completed = p.total);
        Ok(())
    }

    /// Abort on cancellation or when too many segments have failed
    fn checkpoint(&self, store: &SegmentStore, stage: JobState, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(DublineError::Cancelled);
        }
        let counts = store.counts();
        let ratio = store.failed_ratio();
        if ratio > self.config.pipeline.max_failed_ratio {
            return Err(DublineError::JobUnviable {
                stage: stage.to_string(),
                failed: counts.failed,
                total: counts.total(),
            });
        }
        if counts.failed > 0 {
            info!(
                "{} of {} segments failed after {}, continuing with gaps",
                counts.failed,
                counts.total(),
                stage
            );
        }
        Ok(())
    }

    /// Run a job for every video under `input_dir` that has a sidecar transcript
    pub async fn run_batch(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        language: TargetLanguage,
        cancel: &CancellationToken,
    ) -> Result<Vec<JobReport>> {
        if !input_dir.is_dir() {
            return Err(DublineError::Config("Input path is not a directory".to_string()));
        }

        let jobs = discover_jobs(input_dir, output_dir, language);
        info!("Found {} videos with transcripts to process", jobs.len());

        let mut reports = Vec::new();
        for request in jobs {
            if cancel.is_cancelled() {
                break;
            }
            let (sender, _receiver) = progress_channel();
            match self.run(&request, cancel, Arc::new(sender)).await {
                Ok(report) => {
                    info!("Successfully processed: {}", request.transcript_path.display());
                    reports.push(report);
                }
                Err(DublineError::Cancelled) => return Err(DublineError::Cancelled),
                Err(e) => warn!("Failed to process {}: {}", request.transcript_path.display(), e),
            }
        }
        Ok(reports)
    }
}

const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];
const TRANSCRIPT_EXTENSIONS: [&str; 2] = ["json", "srt"];

/// Pair every video with a transcript of the same stem
fn discover_jobs(input_dir: &Path, output_dir: &Path, language: TargetLanguage) -> Vec<JobRequest> {
    let mut jobs = Vec::new();
    for entry in WalkDir::new(input_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        let is_video = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if !is_video {
            continue;
        }

        let transcript = TRANSCRIPT_EXTENSIONS
            .iter()
            .map(|ext| path.with_extension(ext))
            .find(|candidate| candidate.is_file());
        match transcript {
            Some(transcript_path) => jobs.push(JobRequest {
                transcript_path,
                video_path: Some(path.to_path_buf()),
                output_dir: output_dir.to_path_buf(),
                language,
            }),
            None => warn!("Skipping {}: no transcript next to it", path.display()),
        }
    }
    jobs
}

fn output_stem(request: &JobRequest) -> String {
    request
        .video_path
        .as_deref()
        .unwrap_or(&request.transcript_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dub".to_string())
}

async fn write_report(report: &JobReport, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(report)?;
    fs::write(path, content).await?;
    Ok(())
}
