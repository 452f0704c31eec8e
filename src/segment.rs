//! Segment store: the ordered, per-id mutable backbone shared by every stage.
//!
//! Segments are created once from a transcript and never reordered or removed.
//! Each stage writes back through [`SegmentStore::update`], which validates the
//! status transition and applies the change under a single lock, so no reader
//! ever observes a half-updated segment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{DublineError, Result};
use crate::transcript::TranscriptEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentStatus {
    Pending,
    Translated,
    Synthesized,
    Aligned,
    Failed,
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::Translated => "Translated",
            Self::Synthesized => "Synthesized",
            Self::Aligned => "Aligned",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Why and where a segment dropped out of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentFailure {
    pub stage: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub source_text: String,
    pub translated_text: Option<String>,
    pub audio_ref: Option<PathBuf>,
    /// Duration of the clip rendered at natural rate, measured from the artifact
    pub rendered_duration_ms: Option<u64>,
    /// Set once the clip has been re-rendered with a speed-up request
    pub speed_factor: Option<f64>,
    pub aligned_start_ms: Option<u64>,
    pub aligned_end_ms: Option<u64>,
    pub status: SegmentStatus,
    pub failure: Option<SegmentFailure>,
}

impl Segment {
    fn from_entry(id: usize, entry: TranscriptEntry) -> Self {
        Self {
            id,
            start_ms: entry.start_ms,
            end_ms: entry.end_ms,
            source_text: entry.text,
            translated_text: None,
            audio_ref: None,
            rendered_duration_ms: None,
            speed_factor: None,
            aligned_start_ms: None,
            aligned_end_ms: None,
            status: SegmentStatus::Pending,
            failure: None,
        }
    }

    /// Original duration on the source timeline
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    /// Synthesized or Failed: nothing upstream will touch the segment again
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            SegmentStatus::Synthesized | SegmentStatus::Aligned | SegmentStatus::Failed
        )
    }
}

/// Stage-specific changes applied to one segment
#[derive(Debug, Clone)]
pub enum SegmentUpdate {
    Translated {
        text: String,
    },
    Synthesized {
        audio_ref: PathBuf,
        rendered_duration_ms: u64,
    },
    /// A speed-adjusted re-render replaces the clip; the natural-rate
    /// measurement stays the alignment input
    ClipReplaced {
        audio_ref: PathBuf,
        speed_factor: f64,
    },
    Aligned {
        start_ms: u64,
        end_ms: u64,
    },
    Failed {
        stage: String,
        reason: String,
    },
}

impl SegmentUpdate {
    fn target_status(&self, current: SegmentStatus) -> SegmentStatus {
        match self {
            Self::Translated { .. } => SegmentStatus::Translated,
            Self::Synthesized { .. } => SegmentStatus::Synthesized,
            Self::ClipReplaced { .. } => current,
            Self::Aligned { .. } => SegmentStatus::Aligned,
            Self::Failed { .. } => SegmentStatus::Failed,
        }
    }

    fn is_allowed_from(&self, current: SegmentStatus) -> bool {
        use SegmentStatus::*;
        match self {
            Self::Translated { .. } => current == Pending,
            Self::Synthesized { .. } => current == Translated,
            Self::ClipReplaced { .. } => matches!(current, Synthesized | Aligned),
            Self::Aligned { .. } => current == Synthesized,
            Self::Failed { .. } => current != Failed,
        }
    }
}

/// Per-status tally of the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub translated: usize,
    pub synthesized: usize,
    pub aligned: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.translated + self.synthesized + self.aligned + self.failed
    }
}

/// Cloneable handle to the shared segment sequence
#[derive(Debug, Clone)]
pub struct SegmentStore {
    segments: Arc<RwLock<Vec<Segment>>>,
}

impl SegmentStore {
    /// Build the store from transcript entries, rejecting broken timing.
    pub fn load(entries: Vec<TranscriptEntry>) -> Result<Self> {
        let mut previous_end: Option<u64> = None;
        for (idx, entry) in entries.iter().enumerate() {
            if entry.start_ms >= entry.end_ms {
                return Err(DublineError::MalformedTranscript(format!(
                    "segment {} has start {}ms not before end {}ms",
                    idx, entry.start_ms, entry.end_ms
                )));
            }
            if let Some(prev_end) = previous_end {
                if entry.start_ms < prev_end {
                    return Err(DublineError::MalformedTranscript(format!(
                        "segment {} starts at {}ms before segment {} ends at {}ms",
                        idx,
                        entry.start_ms,
                        idx - 1,
                        prev_end
                    )));
                }
            }
            previous_end = Some(entry.end_ms);
        }

        let segments = entries
            .into_iter()
            .enumerate()
            .map(|(id, entry)| Segment::from_entry(id, entry))
            .collect();

        Ok(Self {
            segments: Arc::new(RwLock::new(segments)),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Segment>> {
        self.segments.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Segment>> {
        self.segments.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, id: usize) -> Option<Segment> {
        self.read().get(id).cloned()
    }

    /// Apply one stage's result to segment `id` and transition its status.
    pub fn update(&self, id: usize, update: SegmentUpdate) -> Result<()> {
        let mut segments = self.write();
        let segment = segments
            .get_mut(id)
            .ok_or(DublineError::UnknownSegment(id))?;

        let current = segment.status;
        if !update.is_allowed_from(current) {
            return Err(DublineError::InvalidTransition {
                id,
                from: current.to_string(),
                to: update.target_status(current).to_string(),
            });
        }
        segment.status = update.target_status(current);

        match update {
            SegmentUpdate::Translated { text } => {
                segment.translated_text = Some(text);
            }
            SegmentUpdate::Synthesized {
                audio_ref,
                rendered_duration_ms,
            } => {
                segment.audio_ref = Some(audio_ref);
                segment.rendered_duration_ms = Some(rendered_duration_ms);
            }
            SegmentUpdate::ClipReplaced {
                audio_ref,
                speed_factor,
            } => {
                segment.audio_ref = Some(audio_ref);
                segment.speed_factor = Some(speed_factor);
            }
            SegmentUpdate::Aligned { start_ms, end_ms } => {
                segment.aligned_start_ms = Some(start_ms);
                segment.aligned_end_ms = Some(end_ms);
            }
            SegmentUpdate::Failed { stage, reason } => {
                segment.failure = Some(SegmentFailure { stage, reason });
            }
        }
        Ok(())
    }

    pub fn mark_failed(&self, id: usize, stage: &str, reason: impl Into<String>) -> Result<()> {
        self.update(
            id,
            SegmentUpdate::Failed {
                stage: stage.to_string(),
                reason: reason.into(),
            },
        )
    }

    /// Read-only copy of every segment
    pub fn snapshot(&self) -> Vec<Segment> {
        self.read().clone()
    }

    pub fn ids_with_status(&self, status: SegmentStatus) -> Vec<usize> {
        self.read()
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.id)
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for segment in self.read().iter() {
            match segment.status {
                SegmentStatus::Pending => counts.pending += 1,
                SegmentStatus::Translated => counts.translated += 1,
                SegmentStatus::Synthesized => counts.synthesized += 1,
                SegmentStatus::Aligned => counts.aligned += 1,
                SegmentStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn failed_ratio(&self) -> f64 {
        let counts = self.counts();
        if counts.total() == 0 {
            0.0
        } else {
            counts.failed as f64 / counts.total() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(start_ms: u64, end_ms: u64, text: &str) -> TranscriptEntry {
        TranscriptEntry {
            start_ms,
            end_ms,
            text: text.to_string(),
        }
    }

    fn two_segment_store() -> SegmentStore {
        SegmentStore::load(vec![entry(0, 5_000, "你好"), entry(5_000, 9_000, "世界")]).unwrap()
    }

    #[test]
    fn test_load_assigns_sequential_ids() {
        let store = two_segment_store();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].id, 1);
        assert_eq!(snapshot[1].duration_ms(), 4_000);
        assert!(snapshot.iter().all(|s| s.status == SegmentStatus::Pending));
    }

    #[test]
    fn test_load_rejects_overlap_and_inverted_windows() {
        let overlapping = SegmentStore::load(vec![entry(0, 5_000, "a"), entry(4_999, 6_000, "b")]);
        assert!(matches!(overlapping, Err(DublineError::MalformedTranscript(_))));

        let inverted = SegmentStore::load(vec![entry(3_000, 3_000, "a")]);
        assert!(matches!(inverted, Err(DublineError::MalformedTranscript(_))));

        let unordered = SegmentStore::load(vec![entry(5_000, 6_000, "a"), entry(0, 1_000, "b")]);
        assert!(matches!(unordered, Err(DublineError::MalformedTranscript(_))));
    }

    #[test]
    fn test_update_follows_stage_order() {
        let store = two_segment_store();
        store
            .update(0, SegmentUpdate::Translated { text: "Hello".to_string() })
            .unwrap();
        store
            .update(
                0,
                SegmentUpdate::Synthesized {
                    audio_ref: PathBuf::from("clip_0.wav"),
                    rendered_duration_ms: 4_200,
                },
            )
            .unwrap();

        let segment = store.get(0).unwrap();
        assert_eq!(segment.status, SegmentStatus::Synthesized);
        assert_eq!(segment.rendered_duration_ms, Some(4_200));
        assert_eq!(segment.translated_text.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_skipping_a_stage_is_rejected() {
        let store = two_segment_store();
        let err = store
            .update(
                1,
                SegmentUpdate::Synthesized {
                    audio_ref: PathBuf::from("clip_1.wav"),
                    rendered_duration_ms: 1_000,
                },
            )
            .unwrap_err();
        assert!(matches!(err, DublineError::InvalidTransition { id: 1, .. }));
        assert_eq!(store.get(1).unwrap().status, SegmentStatus::Pending);
    }

    #[test]
    fn test_failed_is_terminal() {
        let store = two_segment_store();
        store.mark_failed(0, "translating", "empty input").unwrap();
        assert!(store.mark_failed(0, "translating", "again").is_err());
        assert!(store
            .update(0, SegmentUpdate::Translated { text: "x".to_string() })
            .is_err());

        let failure = store.get(0).unwrap().failure.unwrap();
        assert_eq!(failure.reason, "empty input");
        assert_eq!(store.ids_with_status(SegmentStatus::Failed), vec![0]);
        assert_eq!(store.failed_ratio(), 0.5);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = two_segment_store();
        let before = store.snapshot();
        store
            .update(1, SegmentUpdate::Translated { text: "World".to_string() })
            .unwrap();
        assert_eq!(before[1].status, SegmentStatus::Pending);
        assert_eq!(store.counts().translated, 1);
        assert_eq!(store.counts().total(), 2);
    }

    #[test]
    fn test_concurrent_updates_by_id() {
        let entries = (0..64).map(|i| entry(i * 1_000, i * 1_000 + 900, "句子")).collect();
        let store = SegmentStore::load(entries).unwrap();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let store = store.clone();
                scope.spawn(move || {
                    for id in (worker..64).step_by(4) {
                        store
                            .update(id as usize, SegmentUpdate::Translated { text: format!("s{}", id) })
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(store.counts().translated, 64);
        assert_eq!(store.get(63).unwrap().translated_text.as_deref(), Some("s63"));
    }
}
