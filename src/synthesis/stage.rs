use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::TargetLanguage;
use crate::error::{DublineError, Result};
use crate::retry::RetryPolicy;
use crate::segment::{SegmentStatus, SegmentStore, SegmentUpdate};
use crate::workers::{ProgressFn, run_pool};
use super::{Synthesizer, measure_clip};

pub const STAGE_NAME: &str = "synthesizing";

/// Voices every Translated segment and records the measured clip length
pub struct SynthesisStage {
    synthesizer: Arc<dyn Synthesizer>,
    target: TargetLanguage,
    voice: String,
    retry: RetryPolicy,
    call_timeout: Duration,
    workers: usize,
    sample_rate: u32,
    clip_dir: PathBuf,
}

// Everything one task needs, shared by all tasks of a run
struct SynthesisJob {
    synthesizer: Arc<dyn Synthesizer>,
    store: SegmentStore,
    target: TargetLanguage,
    voice: String,
    retry: RetryPolicy,
    call_timeout: Duration,
    sample_rate: u32,
    clip_dir: PathBuf,
    cancel: CancellationToken,
}

impl SynthesisStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        target: TargetLanguage,
        voice: String,
        retry: RetryPolicy,
        call_timeout: Duration,
        workers: usize,
        sample_rate: u32,
        clip_dir: PathBuf,
    ) -> Self {
        Self {
            synthesizer,
            target,
            voice,
            retry,
            call_timeout,
            workers,
            sample_rate,
            clip_dir,
        }
    }

    pub fn supports_rate(&self) -> bool {
        self.synthesizer.supports_rate()
    }

    fn job(&self, store: &SegmentStore, cancel: &CancellationToken) -> Arc<SynthesisJob> {
        Arc::new(SynthesisJob {
            synthesizer: self.synthesizer.clone(),
            store: store.clone(),
            target: self.target,
            voice: self.voice.clone(),
            retry: self.retry.clone(),
            call_timeout: self.call_timeout,
            sample_rate: self.sample_rate,
            clip_dir: self.clip_dir.clone(),
            cancel: cancel.clone(),
        })
    }

    /// Synthesize all Translated segments; each ends Synthesized or Failed.
    pub async fn run(&self, store: &SegmentStore, cancel: &CancellationToken, on_done: ProgressFn) -> Result<()> {
        tokio::fs::create_dir_all(&self.clip_dir).await?;
        let ids = store.ids_with_status(SegmentStatus::Translated);
        info!(
            "Synthesizing {} segments with voice '{}' ({} workers)",
            ids.len(),
            self.voice,
            self.workers
        );

        let job = self.job(store, cancel);
        let undispatched = run_pool(ids, self.workers, cancel, on_done, |id| {
            let job = job.clone();
            async move { job.synthesize_segment(id).await }
        })
        .await;

        for id in undispatched {
            if let Err(e) = store.mark_failed(id, STAGE_NAME, "cancelled") {
                warn!("Could not mark segment {} cancelled: {}", id, e);
            }
        }
        Ok(())
    }

    /// Re-render clips once at the requested speed factors. A failed re-render
    /// keeps the natural-rate clip, which the assembler then truncates.
    pub async fn resynthesize(
        &self,
        store: &SegmentStore,
        requests: Vec<(usize, f64)>,
        cancel: &CancellationToken,
        on_done: ProgressFn,
    ) {
        if requests.is_empty() || !self.supports_rate() {
            return;
        }
        info!("Re-synthesizing {} segments at adjusted speed", requests.len());

        let factors: std::collections::HashMap<usize, f64> = requests.iter().copied().collect();
        let ids = requests.into_iter().map(|(id, _)| id).collect();
        let job = self.job(store, cancel);
        run_pool(ids, self.workers, cancel, on_done, |id| {
            let job = job.clone();
            let factor = factors.get(&id).copied().unwrap_or(1.0);
            async move { job.resynthesize_segment(id, factor).await }
        })
        .await;
    }
}

impl SynthesisJob {
    async fn render(&self, id: usize, text: &str, speed_factor: Option<f64>) -> Result<(Vec<u8>, u64)> {
        let label = format!("synthesize #{}", id);
        let synthesizer = self.synthesizer.as_ref();
        let voice = self.voice.as_str();
        let target = self.target;
        let wav = self
            .retry
            .run(&label, self.call_timeout, &self.cancel, move |_| {
                synthesizer.synthesize(text, target, voice, speed_factor)
            })
            .await?;

        let info = measure_clip(&wav).map_err(|e| match e {
            DublineError::Audio(err) => DublineError::PermanentSegment(format!("unreadable clip: {}", err)),
            other => other,
        })?;
        if info.sample_rate != self.sample_rate {
            return Err(DublineError::PermanentSegment(format!(
                "clip sample rate {} Hz, expected {} Hz",
                info.sample_rate, self.sample_rate
            )));
        }
        if info.duration_ms == 0 {
            return Err(DublineError::PermanentSegment("synthesized clip has zero duration".to_string()));
        }
        Ok((wav, info.duration_ms))
    }

    async fn write_clip(&self, file_name: String, wav: &[u8]) -> Result<PathBuf> {
        let path = self.clip_dir.join(file_name);
        tokio::fs::write(&path, wav).await?;
        Ok(path)
    }

    async fn synthesize_segment(&self, id: usize) {
        let Some(segment) = self.store.get(id) else {
            return;
        };
        let text = segment.translated_text.clone().unwrap_or_default();

        let outcome = match self.render(id, &text, None).await {
            Ok((wav, duration_ms)) => self
                .write_clip(clip_file_name(id, None), &wav)
                .await
                .map(|path| (path, duration_ms)),
            Err(e) => Err(e),
        };

        let update = match outcome {
            Ok((audio_ref, rendered_duration_ms)) => {
                info!(
                    "Segment {}: rendered {}ms for a {}ms window",
                    id,
                    rendered_duration_ms,
                    segment.duration_ms()
                );
                SegmentUpdate::Synthesized {
                    audio_ref,
                    rendered_duration_ms,
                }
            }
            Err(DublineError::Cancelled) => SegmentUpdate::Failed {
                stage: STAGE_NAME.to_string(),
                reason: "cancelled".to_string(),
            },
            Err(e) => {
                warn!("Segment {} synthesis failed: {}", id, e);
                SegmentUpdate::Failed {
                    stage: STAGE_NAME.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        if let Err(e) = self.store.update(id, update) {
            warn!("Could not record synthesis result for segment {}: {}", id, e);
        }
    }

    async fn resynthesize_segment(&self, id: usize, speed_factor: f64) {
        let Some(segment) = self.store.get(id) else {
            return;
        };
        let text = segment.translated_text.clone().unwrap_or_default();

        let result = match self.render(id, &text, Some(speed_factor)).await {
            Ok((wav, duration_ms)) => {
                info!("Segment {}: re-rendered at factor {:.3} to {}ms", id, speed_factor, duration_ms);
                self.write_clip(clip_file_name(id, Some(speed_factor)), &wav).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(audio_ref) => {
                let update = SegmentUpdate::ClipReplaced {
                    audio_ref,
                    speed_factor,
                };
                if let Err(e) = self.store.update(id, update) {
                    warn!("Could not record re-rendered clip for segment {}: {}", id, e);
                }
            }
            Err(e) => warn!("Segment {} re-render failed, keeping truncated clip: {}", id, e),
        }
    }
}

fn clip_file_name(id: usize, speed_factor: Option<f64>) -> String {
    match speed_factor {
        Some(factor) => format!("segment_{:05}_x{:.3}.wav", id, factor),
        None => format!("segment_{:05}.wav", id),
    }
}

/// Directory holding per-segment clips inside a job's work directory
pub fn clip_dir_for(work_dir: &Path) -> PathBuf {
    work_dir.join("clips")
}
