//! Alignment engine: reconciles each segment's source window with the length
//! of its rendered clip and produces one non-overlapping timeline.
//!
//! Segments are walked strictly in order while a signed drift accumulator
//! carries the offset introduced by clips that run longer (or shorter) than
//! the speech they replace. Stretch is capped per segment, and accumulated
//! drift is bounded by hard resync points. All arithmetic is in integer
//! milliseconds, so identical inputs give byte-identical output.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::{AlignmentPolicy, GapFill};
use crate::error::{DublineError, Result};
use crate::segment::{Segment, SegmentStatus, SegmentStore, SegmentUpdate};
use crate::transcript::TranscriptEntry;

/// One placed segment on the output clock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: usize,
    pub source_start_ms: u64,
    pub source_end_ms: u64,
    pub aligned_start_ms: u64,
    pub aligned_end_ms: u64,
    pub text: String,
    pub audio_ref: Option<PathBuf>,
    pub rendered_duration_ms: u64,
    /// Drift carried into the next segment
    pub drift_after_ms: i64,
    /// The clip is longer than its aligned window and gets cut
    pub truncated: bool,
    /// Drift was reset after this segment
    pub resync: bool,
    /// Requested rendering length relative to natural rate, when the backend can honor it
    pub speed_factor: Option<f64>,
}

impl TimelineEntry {
    pub fn aligned_duration_ms(&self) -> u64 {
        self.aligned_end_ms - self.aligned_start_ms
    }
}

/// Source window of a segment that dropped out of the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub id: usize,
    pub start_ms: u64,
    pub end_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub entries: Vec<TimelineEntry>,
    pub gaps: Vec<Gap>,
    /// End of the last source segment
    pub source_end_ms: u64,
}

impl Timeline {
    /// Length the assembled track must cover
    pub fn end_ms(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.aligned_end_ms)
            .unwrap_or(0)
            .max(self.source_end_ms)
    }

    /// Fail with `OverlapDetected` unless entries are ordered and disjoint.
    pub fn check_invariant(&self) -> Result<()> {
        for entry in &self.entries {
            if entry.aligned_end_ms < entry.aligned_start_ms {
                return Err(DublineError::OverlapDetected(format!(
                    "segment {} ends at {}ms before it starts at {}ms",
                    entry.id, entry.aligned_end_ms, entry.aligned_start_ms
                )));
            }
        }
        for pair in self.entries.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.id >= next.id || prev.aligned_end_ms > next.aligned_start_ms {
                return Err(DublineError::OverlapDetected(format!(
                    "segment {} [{}ms, {}ms] collides with segment {} [{}ms, {}ms]",
                    prev.id,
                    prev.aligned_start_ms,
                    prev.aligned_end_ms,
                    next.id,
                    next.aligned_start_ms,
                    next.aligned_end_ms
                )));
            }
        }
        Ok(())
    }

    /// Segments whose clip should be re-rendered faster, with the factor to request
    pub fn speedup_requests(&self) -> Vec<(usize, f64)> {
        self.entries
            .iter()
            .filter_map(|e| e.speed_factor.map(|f| (e.id, f)))
            .collect()
    }

    pub fn resync_count(&self) -> usize {
        self.entries.iter().filter(|e| e.resync).count()
    }

    pub fn truncated_count(&self) -> usize {
        self.entries.iter().filter(|e| e.truncated).count()
    }

    /// Record the aligned window of every placed segment in the store.
    pub fn apply_to(&self, store: &SegmentStore) -> Result<()> {
        for entry in &self.entries {
            store.update(
                entry.id,
                SegmentUpdate::Aligned {
                    start_ms: entry.aligned_start_ms,
                    end_ms: entry.aligned_end_ms,
                },
            )?;
        }
        Ok(())
    }
}

pub struct AlignmentEngine {
    policy: AlignmentPolicy,
}

impl AlignmentEngine {
    pub fn new(policy: AlignmentPolicy) -> Self {
        Self { policy }
    }

    /// Place every non-failed segment. `rate_capable` says whether the
    /// synthesizer can re-render a clip faster instead of having it cut.
    pub fn align(&self, segments: &[Segment], rate_capable: bool) -> Result<Timeline> {
        let max_ratio = self.policy.max_stretch_ratio;
        let max_drift = self.policy.max_drift_ms as i64;

        let mut entries = Vec::with_capacity(segments.len());
        let mut gaps = Vec::new();
        let mut drift: i64 = 0;
        // Start of the earliest failed segment waiting to donate its window
        let mut donated_from: Option<u64> = None;

        for (idx, segment) in segments.iter().enumerate() {
            if !segment.is_settled() {
                return Err(DublineError::NotSettled(segment.id));
            }

            if segment.status == SegmentStatus::Failed {
                gaps.push(Gap {
                    id: segment.id,
                    start_ms: segment.start_ms,
                    end_ms: segment.end_ms,
                });
                if self.policy.gap_fill == GapFill::CompressNext && donated_from.is_none() {
                    donated_from = Some(segment.start_ms);
                }
                continue;
            }

            let rendered = segment
                .rendered_duration_ms
                .ok_or(DublineError::NotSettled(segment.id))?;

            // A donated window first absorbs the delay carried into it; the
            // rest is extra room for this clip. The anchor stays on its own start.
            let mut extra_room = 0;
            if let Some(from) = donated_from.take() {
                let donated = (segment.start_ms - from) as i64;
                let absorbed = drift.clamp(0, donated);
                drift -= absorbed;
                extra_room = (donated - absorbed) as u64;
            }

            let width = segment.end_ms - segment.start_ms;
            let aligned_start = (segment.start_ms as i64 + drift).max(0) as u64;

            let budget = width as f64 * max_ratio + extra_room as f64;
            let over_budget = rendered as f64 > budget;
            let placed = if over_budget {
                (budget.round() as u64).min(rendered)
            } else {
                rendered
            };

            drift += placed as i64 - width as i64;
            let mut aligned_end = aligned_start + placed;
            let mut resync = false;
            let mut trimmed = false;

            if drift.abs() > max_drift {
                resync = true;
                let entered_with = drift;
                match segments.get(idx + 1) {
                    Some(next) if drift > 0 => {
                        if aligned_start < next.start_ms {
                            if aligned_end > next.start_ms {
                                aligned_end = next.start_ms;
                                trimmed = true;
                            }
                            drift = 0;
                        } else {
                            let kept = placed.min(width);
                            trimmed = kept < placed;
                            aligned_end = aligned_start + kept;
                            drift = aligned_end as i64 - next.start_ms as i64;
                        }
                    }
                    _ => drift = 0,
                }
                warn!(
                    "Hard resync after segment {}: drift {}ms exceeds {}ms, carrying {}ms",
                    segment.id, entered_with, max_drift, drift
                );
            }

            let truncated = over_budget || trimmed;
            let speed_factor = match (rate_capable, truncated) {
                (true, true) if trimmed => Some((aligned_end - aligned_start) as f64 / rendered as f64),
                (true, true) => Some(budget / rendered as f64),
                _ => None,
            };

            debug!(
                "Segment {}: source [{}, {}] rendered {}ms -> aligned [{}, {}], drift {}ms",
                segment.id, segment.start_ms, segment.end_ms, rendered, aligned_start, aligned_end, drift
            );

            entries.push(TimelineEntry {
                id: segment.id,
                source_start_ms: segment.start_ms,
                source_end_ms: segment.end_ms,
                aligned_start_ms: aligned_start,
                aligned_end_ms: aligned_end,
                text: segment.translated_text.clone().unwrap_or_default(),
                audio_ref: segment.audio_ref.clone().filter(|p| !p.as_os_str().is_empty()),
                rendered_duration_ms: rendered,
                drift_after_ms: drift,
                truncated,
                resync,
                speed_factor,
            });
        }

        let timeline = Timeline {
            entries,
            gaps,
            source_end_ms: segments.last().map(|s| s.end_ms).unwrap_or(0),
        };
        timeline.check_invariant()?;

        info!(
            "Aligned {} segments ({} gaps, {} truncated, {} resyncs), final drift {}ms",
            timeline.entries.len(),
            timeline.gaps.len(),
            timeline.truncated_count(),
            timeline.resync_count(),
            drift
        );
        Ok(timeline)
    }
}

/// Build settled segments from a transcript and externally measured clip
/// lengths; `None` marks a segment whose synthesis failed.
pub fn segments_from_durations(
    entries: Vec<TranscriptEntry>,
    durations: &[Option<u64>],
) -> Result<Vec<Segment>> {
    if entries.len() != durations.len() {
        return Err(DublineError::MalformedTranscript(format!(
            "{} transcript entries but {} durations",
            entries.len(),
            durations.len()
        )));
    }

    let store = SegmentStore::load(entries)?;
    for (id, duration) in durations.iter().enumerate() {
        let text = store.get(id).map(|s| s.source_text).unwrap_or_default();
        match duration {
            Some(ms) if *ms > 0 => {
                store.update(id, SegmentUpdate::Translated { text })?;
                store.update(
                    id,
                    SegmentUpdate::Synthesized {
                        audio_ref: PathBuf::new(),
                        rendered_duration_ms: *ms,
                    },
                )?;
            }
            _ => store.mark_failed(id, "synthesizing", "no measured duration")?,
        }
    }
    Ok(store.snapshot())
}
