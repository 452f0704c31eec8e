use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::align::{Timeline, TimelineEntry};
use crate::error::{DublineError, Result};

/// Summary of a written track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledTrack {
    pub path: PathBuf,
    pub duration_ms: u64,
    pub clips_placed: usize,
    pub clips_missing: usize,
}

/// Writes placed clips into one continuous 16-bit mono WAV track
pub struct TrackAssembler {
    sample_rate: u32,
}

impl TrackAssembler {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    fn samples_at(&self, ms: u64) -> u64 {
        ms * self.sample_rate as u64 / 1000
    }

    /// Place each clip at its aligned start, cut to its aligned window, with
    /// silence everywhere else. Blocking; run it off the async executor.
    pub fn assemble(&self, timeline: &Timeline, output_path: &Path) -> Result<AssembledTrack> {
        timeline.check_invariant()?;
        info!("Assembling audio track: {}", output_path.display());

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(output_path, spec)?;
        let mut cursor: u64 = 0;
        let mut clips_placed = 0;
        let mut clips_missing = 0;

        for entry in &timeline.entries {
            let offset = self.samples_at(entry.aligned_start_ms);
            let window_end = self.samples_at(entry.aligned_end_ms);
            if offset < cursor {
                return Err(DublineError::OverlapDetected(format!(
                    "segment {} starts at sample {} but the track is already at {}",
                    entry.id, offset, cursor
                )));
            }

            let Some(audio_ref) = &entry.audio_ref else {
                warn!("Segment {} has no clip, leaving silence", entry.id);
                clips_missing += 1;
                continue;
            };

            write_silence(&mut writer, offset - cursor)?;
            cursor = offset;

            let clip = self.read_clip(entry, audio_ref)?;
            let take = (clip.len() as u64).min(window_end - offset) as usize;
            for &sample in &clip[..take] {
                writer.write_sample(sample)?;
            }
            cursor += take as u64;
            clips_placed += 1;
        }

        let total = self.samples_at(timeline.end_ms());
        write_silence(&mut writer, total.saturating_sub(cursor))?;
        writer.finalize()?;

        let duration_ms = total.max(cursor) * 1000 / self.sample_rate as u64;
        info!(
            "Audio track assembled: {}ms, {} clips placed, {} missing",
            duration_ms, clips_placed, clips_missing
        );
        Ok(AssembledTrack {
            path: output_path.to_path_buf(),
            duration_ms,
            clips_placed,
            clips_missing,
        })
    }

    /// Read a clip as mono 16-bit samples
    fn read_clip(&self, entry: &TimelineEntry, path: &Path) -> Result<Vec<i16>> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.sample_rate != self.sample_rate {
            return Err(DublineError::UnsupportedFormat(format!(
                "clip for segment {} is {} Hz, track is {} Hz",
                entry.id, spec.sample_rate, self.sample_rate
            )));
        }

        let interleaved: Vec<i32> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, _) => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i32))
                .collect::<std::result::Result<_, _>>()?,
            (hound::SampleFormat::Int, bits) if bits <= 16 => {
                let shift = 16 - bits as u32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v << shift))
                    .collect::<std::result::Result<_, _>>()?
            }
            (hound::SampleFormat::Int, bits) => {
                let shift = bits as u32 - 16;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v >> shift))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let channels = spec.channels.max(1) as usize;
        Ok(interleaved
            .chunks(channels)
            .map(|frame| (frame.iter().sum::<i32>() / frame.len() as i32) as i16)
            .collect())
    }
}

fn write_silence<W: std::io::Write + std::io::Seek>(writer: &mut hound::WavWriter<W>, samples: u64) -> Result<()> {
    for _ in 0..samples {
        writer.write_sample(0i16)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesis::test_support::wav_bytes;

    const RATE: u32 = 8_000;

    fn entry(id: usize, start: u64, end: u64, audio_ref: Option<PathBuf>) -> TimelineEntry {
        TimelineEntry {
            id,
            source_start_ms: start,
            source_end_ms: end,
            aligned_start_ms: start,
            aligned_end_ms: end,
            text: format!("line {}", id),
            audio_ref,
            rendered_duration_ms: end - start,
            drift_after_ms: 0,
            truncated: false,
            resync: false,
            speed_factor: None,
        }
    }

    fn clip(dir: &Path, name: &str, duration_ms: u64, channels: u16) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, wav_bytes(duration_ms, RATE, channels)).unwrap();
        path
    }

    fn read_track(path: &Path) -> Vec<i16> {
        hound::WavReader::open(path)
            .unwrap()
            .samples::<i16>()
            .map(|s| s.unwrap())
            .collect()
    }

    #[test]
    fn test_clips_land_at_aligned_start_with_silent_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let a = clip(dir.path(), "a.wav", 500, 1);
        let b = clip(dir.path(), "b.wav", 250, 2);
        let timeline = Timeline {
            entries: vec![entry(0, 100, 600, Some(a)), entry(2, 1_000, 1_250, Some(b))],
            gaps: vec![],
            source_end_ms: 2_000,
        };

        let output = dir.path().join("track.wav");
        let track = TrackAssembler::new(RATE).assemble(&timeline, &output).unwrap();

        assert_eq!(track.duration_ms, 2_000);
        assert_eq!(track.clips_placed, 2);
        let samples = read_track(&output);
        assert_eq!(samples.len(), 16_000);
        assert_eq!(samples[799], 0);
        assert_eq!(samples[800], 1_000);
        assert_eq!(samples[4_799], 1_000);
        assert_eq!(samples[4_800], 0);
        // Stereo clip is down-mixed
        assert_eq!(samples[8_000], 1_000);
        assert_eq!(samples[10_000], 0);
    }

    #[test]
    fn test_long_clip_is_cut_to_window() {
        let dir = tempfile::tempdir().unwrap();
        let long = clip(dir.path(), "long.wav", 3_000, 1);
        let timeline = Timeline {
            entries: vec![entry(0, 0, 1_000, Some(long))],
            gaps: vec![],
            source_end_ms: 1_000,
        };

        let output = dir.path().join("track.wav");
        TrackAssembler::new(RATE).assemble(&timeline, &output).unwrap();
        assert_eq!(read_track(&output).len(), 8_000);
    }

    #[test]
    fn test_overlapping_timeline_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = clip(dir.path(), "a.wav", 1_000, 1);
        let timeline = Timeline {
            entries: vec![entry(0, 0, 1_000, Some(a.clone())), entry(1, 900, 1_900, Some(a))],
            gaps: vec![],
            source_end_ms: 1_900,
        };

        let err = TrackAssembler::new(RATE)
            .assemble(&timeline, &dir.path().join("track.wav"))
            .unwrap_err();
        assert!(matches!(err, DublineError::OverlapDetected(_)));
    }

    #[test]
    fn test_sample_rate_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hi.wav");
        std::fs::write(&path, wav_bytes(500, 16_000, 1)).unwrap();
        let timeline = Timeline {
            entries: vec![entry(0, 0, 500, Some(path))],
            gaps: vec![],
            source_end_ms: 500,
        };

        let err = TrackAssembler::new(RATE)
            .assemble(&timeline, &dir.path().join("track.wav"))
            .unwrap_err();
        assert!(matches!(err, DublineError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_missing_clip_leaves_silence() {
        let dir = tempfile::tempdir().unwrap();
        let timeline = Timeline {
            entries: vec![entry(0, 0, 500, None)],
            gaps: vec![],
            source_end_ms: 500,
        };

        let output = dir.path().join("track.wav");
        let track = TrackAssembler::new(RATE).assemble(&timeline, &output).unwrap();
        assert_eq!(track.clips_missing, 1);
        assert!(read_track(&output).iter().all(|&s| s == 0));
    }
}
