use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::align::Timeline;
use crate::config::{SubtitleConfig, TargetLanguage};
use crate::error::Result;

const TRAILING_LINE_EXTRA_MS: u64 = 1_000;

/// One SRT cue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub lines: Vec<String>,
}

/// Turns an aligned timeline into subtitle cues
pub struct SubtitleEmitter {
    min_cue_ms: u64,
    max_lines: usize,
    max_line_chars: usize,
}

impl SubtitleEmitter {
    pub fn new(config: &SubtitleConfig, language: TargetLanguage) -> Self {
        Self {
            min_cue_ms: config.min_cue_ms,
            max_lines: config.max_lines.max(1),
            max_line_chars: config.max_line_chars.unwrap_or_else(|| language.max_line_chars()).max(1),
        }
    }

    /// One cue per placed segment, split into consecutive cues when the
    /// wrapped text exceeds the line budget.
    pub fn emit(&self, timeline: &Timeline) -> Result<Vec<Cue>> {
        timeline.check_invariant()?;

        let mut cues = Vec::new();
        for (i, entry) in timeline.entries.iter().enumerate() {
            let text = entry.text.trim();
            if text.is_empty() {
                continue;
            }

            // Short cues borrow from the gap before the next cue, never from the cue itself
            let next_start = timeline.entries.get(i + 1).map(|next| next.aligned_start_ms);
            let start = entry.aligned_start_ms;
            let mut end = entry.aligned_end_ms;
            if end - start < self.min_cue_ms {
                let wanted = start + self.min_cue_ms;
                end = match next_start {
                    Some(limit) => wanted.min(limit).max(end),
                    None => wanted,
                };
            }

            let lines = wrap_text(text, self.max_line_chars);
            let parts: Vec<&[String]> = lines.chunks(self.max_lines).collect();
            let span = (end - start) / parts.len() as u64;
            for (k, part) in parts.iter().enumerate() {
                let part_start = start + span * k as u64;
                let part_end = match (k + 1 == parts.len(), part.len()) {
                    // A lone trailing line gets half a share plus a second
                    (true, 1) if parts.len() > 1 => (part_start + span / 2 + TRAILING_LINE_EXTRA_MS).min(end),
                    (true, _) => end,
                    _ => part_start + span,
                };
                cues.push(Cue {
                    index: cues.len() + 1,
                    start_ms: part_start,
                    end_ms: part_end,
                    lines: part.to_vec(),
                });
            }
            if parts.len() > 1 {
                debug!("Segment {} split into {} cues", entry.id, parts.len());
            }
        }
        Ok(cues)
    }

    /// Emit and write an SRT file, returning the number of cues
    pub async fn write_srt<P: AsRef<Path>>(&self, timeline: &Timeline, output_path: P) -> Result<usize> {
        let output_path = output_path.as_ref();
        info!("Generating SRT file: {}", output_path.display());

        let cues = self.emit(timeline)?;
        fs::write(output_path, render_srt(&cues)).await?;

        info!("SRT file generated with {} cues", cues.len());
        Ok(cues.len())
    }
}

pub fn render_srt(cues: &[Cue]) -> String {
    let mut srt_content = String::new();
    for cue in cues {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            cue.index,
            format_srt_time(cue.start_ms),
            format_srt_time(cue.end_ms),
            cue.lines.join("\n")
        ));
    }
    srt_content
}

/// Greedy word wrap on character count; words longer than a line are split
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }

        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current_len += word.len();
        current.extend(word);
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// Format milliseconds as SRT time (HH:MM:SS,mmm)
pub fn format_srt_time(total_milliseconds: u64) -> String {
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::TimelineEntry;

    fn entry(id: usize, start: u64, end: u64, text: &str) -> TimelineEntry {
        TimelineEntry {
            id,
            source_start_ms: start,
            source_end_ms: end,
            aligned_start_ms: start,
            aligned_end_ms: end,
            text: text.to_string(),
            audio_ref: None,
            rendered_duration_ms: end - start,
            drift_after_ms: 0,
            truncated: false,
            resync: false,
            speed_factor: None,
        }
    }

    fn timeline(entries: Vec<TimelineEntry>) -> Timeline {
        let source_end_ms = entries.last().map(|e| e.aligned_end_ms).unwrap_or(0);
        Timeline {
            entries,
            gaps: vec![],
            source_end_ms,
        }
    }

    fn emitter() -> SubtitleEmitter {
        SubtitleEmitter::new(&SubtitleConfig::default(), TargetLanguage::English)
    }

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0), "00:00:00,000");
        assert_eq!(format_srt_time(65_123), "00:01:05,123");
        assert_eq!(format_srt_time(3_661_500), "01:01:01,500");
    }

    #[test]
    fn test_cues_follow_aligned_windows() {
        let cues = emitter()
            .emit(&timeline(vec![entry(0, 0, 7_000, "Hello there."), entry(2, 7_000, 10_000, "Bye.")]))
            .unwrap();

        assert_eq!(cues.len(), 2);
        assert_eq!((cues[0].start_ms, cues[0].end_ms), (0, 7_000));
        assert_eq!((cues[1].index, cues[1].start_ms, cues[1].end_ms), (2, 7_000, 10_000));
        assert_eq!(
            render_srt(&cues[..1]),
            "1\n00:00:00,000 --> 00:00:07,000\nHello there.\n\n"
        );
    }

    #[test]
    fn test_min_duration_borrows_only_trailing_gap() {
        let cues = emitter()
            .emit(&timeline(vec![
                entry(0, 0, 300, "Hi."),
                entry(1, 600, 900, "Yes."),
                entry(2, 5_000, 5_200, "Ok."),
            ]))
            .unwrap();

        // Stops at the next cue's start
        assert_eq!((cues[0].start_ms, cues[0].end_ms), (0, 600));
        // Enough trailing gap for the full floor
        assert_eq!((cues[1].start_ms, cues[1].end_ms), (600, 1_600));
        assert_eq!(cues[2].end_ms, 6_000);
        for pair in cues.windows(2) {
            assert!(pair[0].end_ms <= pair[1].start_ms);
        }
    }

    #[test]
    fn test_long_text_splits_with_short_trailing_line() {
        let text = "This translated sentence is deliberately long so that it needs \
                    more than two subtitle lines when wrapped at fifty characters per line.";
        let cues = emitter().emit(&timeline(vec![entry(0, 1_000, 7_000, text)])).unwrap();

        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].lines.len(), 2);
        assert_eq!(cues[1].lines, vec!["wrapped at fifty characters per line."]);
        assert_eq!((cues[0].start_ms, cues[0].end_ms), (1_000, 4_000));
        // Half of the 3s share plus one second
        assert_eq!((cues[1].start_ms, cues[1].end_ms), (4_000, 6_500));
        assert!(cues.iter().flat_map(|c| &c.lines).all(|l| l.chars().count() <= 50));
    }

    #[test]
    fn test_trailing_line_extension_stops_at_window_end() {
        let cues = SubtitleEmitter::new(
            &SubtitleConfig {
                max_lines: 1,
                ..SubtitleConfig::default()
            },
            TargetLanguage::English,
        )
        .emit(&timeline(vec![entry(0, 0, 1_200, "one two")]))
        .unwrap();

        assert_eq!(cues.len(), 1);
        assert_eq!((cues[0].start_ms, cues[0].end_ms), (0, 1_200));

        let cues = SubtitleEmitter::new(
            &SubtitleConfig {
                max_lines: 2,
                max_line_chars: Some(4),
                ..SubtitleConfig::default()
            },
            TargetLanguage::English,
        )
        .emit(&timeline(vec![entry(0, 0, 1_200, "aa bb cc")]))
        .unwrap();

        // Two shares of 600ms; the last line would run to 1900ms without the cap
        assert_eq!(cues.len(), 2);
        assert_eq!((cues[1].start_ms, cues[1].end_ms), (600, 1_200));
        for pair in cues.windows(2) {
            assert!(pair[0].end_ms <= pair[1].start_ms);
        }
    }

    #[test]
    fn test_wrap_text_respects_width() {
        assert_eq!(wrap_text("ein zwei drei", 8), vec!["ein zwei", "drei"]);
        assert_eq!(wrap_text("Donaudampfschiff", 6), vec!["Donaud", "ampfsc", "hiff"]);
        assert_eq!(wrap_text("été à Paris", 40), vec!["été à Paris"]);
        assert!(wrap_text("   ", 10).is_empty());
    }

    #[tokio::test]
    async fn test_write_srt_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fr.srt");
        let emitter = SubtitleEmitter::new(&SubtitleConfig::default(), TargetLanguage::French);
        let count = emitter
            .write_srt(&timeline(vec![entry(0, 0, 2_000, "Bonjour à tous")]), &path)
            .await
            .unwrap();

        assert_eq!(count, 1);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Bonjour à tous"));
    }
}
