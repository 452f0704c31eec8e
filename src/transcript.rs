use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::error::{DublineError, Result};

/// One timestamped unit of source speech as delivered by transcription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

// Plain `{start, end, text}` triples with times in seconds
#[derive(Debug, Clone, Deserialize)]
struct TimedText {
    start: f64,
    end: f64,
    text: String,
}

// Structs for parsing whisper.cpp JSON output
#[derive(Debug, Clone, Deserialize)]
struct WhisperCppOutput {
    transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperCppSegment {
    offsets: WhisperCppOffsets,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperCppOffsets {
    from: i64,
    to: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TranscriptJson {
    Triples(Vec<TimedText>),
    WhisperCpp(WhisperCppOutput),
}

fn seconds_to_ms(seconds: f64, field: &str, idx: usize) -> Result<u64> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(DublineError::MalformedTranscript(format!(
            "entry {} has invalid {} time {}",
            idx, field, seconds
        )));
    }
    Ok((seconds * 1000.0).round() as u64)
}

fn offset_to_ms(offset: i64, field: &str, idx: usize) -> Result<u64> {
    u64::try_from(offset).map_err(|_| {
        DublineError::MalformedTranscript(format!("entry {} has negative {} offset {}", idx, field, offset))
    })
}

/// Parse a JSON transcript: either an array of `{start, end, text}` in seconds
/// or whisper.cpp's `-oj` output with millisecond offsets.
pub fn from_json_str(content: &str) -> Result<Vec<TranscriptEntry>> {
    let parsed: TranscriptJson = serde_json::from_str(content)
        .map_err(|e| DublineError::MalformedTranscript(format!("unrecognized JSON transcript: {}", e)))?;

    match parsed {
        TranscriptJson::Triples(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                Ok(TranscriptEntry {
                    start_ms: seconds_to_ms(item.start, "start", idx)?,
                    end_ms: seconds_to_ms(item.end, "end", idx)?,
                    text: item.text.trim().to_string(),
                })
            })
            .collect(),
        TranscriptJson::WhisperCpp(output) => output
            .transcription
            .into_iter()
            .enumerate()
            .map(|(idx, seg)| {
                Ok(TranscriptEntry {
                    start_ms: offset_to_ms(seg.offsets.from, "start", idx)?,
                    end_ms: offset_to_ms(seg.offsets.to, "end", idx)?,
                    text: seg.text.trim().to_string(),
                })
            })
            .collect(),
    }
}

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too)
fn parse_srt_time(value: &str) -> Option<u64> {
    let value = value.trim();
    let (clock, millis) = value.split_once([',', '.'])?;
    let mut parts = clock.split(':');
    let hours: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    let millis: u64 = millis.trim().parse().ok()?;
    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

/// Parse an SRT file into transcript entries. Multi-line cue text is joined with spaces.
pub fn from_srt_str(content: &str) -> Result<Vec<TranscriptEntry>> {
    let normalized = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut entries = Vec::new();

    for (idx, block) in normalized.split("\n\n").filter(|b| !b.trim().is_empty()).enumerate() {
        let mut lines = block.lines().map(str::trim).filter(|l| !l.is_empty());
        let mut timing = lines.next().ok_or_else(|| {
            DublineError::MalformedTranscript(format!("empty subtitle block {}", idx))
        })?;
        // The numeric counter line is optional
        if !timing.contains("-->") {
            timing = lines.next().unwrap_or_default();
        }
        let (start, end) = timing.split_once("-->").ok_or_else(|| {
            DublineError::MalformedTranscript(format!("block {} has no timing line", idx))
        })?;
        let start_ms = parse_srt_time(start).ok_or_else(|| {
            DublineError::MalformedTranscript(format!("block {} has invalid start '{}'", idx, start.trim()))
        })?;
        // Anything after the end stamp (position hints) is ignored
        let end = end.split_whitespace().next().unwrap_or_default();
        let end_ms = parse_srt_time(end).ok_or_else(|| {
            DublineError::MalformedTranscript(format!("block {} has invalid end '{}'", idx, end))
        })?;

        entries.push(TranscriptEntry {
            start_ms,
            end_ms,
            text: lines.collect::<Vec<_>>().join(" "),
        });
    }

    Ok(entries)
}

/// Load a transcript file, picking the parser by extension.
pub async fn load_file<P: AsRef<Path>>(path: P) -> Result<Vec<TranscriptEntry>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DublineError::FileNotFound(path.display().to_string()));
    }

    let content = fs::read_to_string(path).await?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let entries = match extension.as_str() {
        "json" => from_json_str(&content)?,
        "srt" => from_srt_str(&content)?,
        other => return Err(DublineError::UnsupportedFormat(format!("transcript extension '{}'", other))),
    };

    info!("Loaded {} transcript entries from {}", entries.len(), path.display());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_triples_in_seconds() {
        let entries = from_json_str(
            r#"[{"start": 0.0, "end": 5.0, "text": " 大家好 "}, {"start": 5.0, "end": 9.25, "text": "欢迎"}]"#,
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "大家好");
        assert_eq!(entries[1].start_ms, 5_000);
        assert_eq!(entries[1].end_ms, 9_250);
    }

    #[test]
    fn test_whisper_cpp_output() {
        let entries = from_json_str(
            r#"{
                "result": {"language": "zh"},
                "transcription": [
                    {"timestamps": {"from": "00:00:00,000", "to": "00:00:02,480"},
                     "offsets": {"from": 0, "to": 2480}, "text": " 今天天气很好"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(entries, vec![TranscriptEntry { start_ms: 0, end_ms: 2_480, text: "今天天气很好".to_string() }]);
    }

    #[test]
    fn test_negative_time_is_malformed() {
        let err = from_json_str(r#"[{"start": -1.0, "end": 2.0, "text": "x"}]"#).unwrap_err();
        assert!(matches!(err, DublineError::MalformedTranscript(_)));
    }

    #[test]
    fn test_srt_parsing() {
        let srt = "1\n00:00:01,000 --> 00:00:03,500\n第一行\n第二行\n\n2\n00:01:00,250 --> 00:01:02,000 X1:10\n再见\n";
        let entries = from_srt_str(srt).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "第一行 第二行");
        assert_eq!(entries[0].end_ms, 3_500);
        assert_eq!(entries[1].start_ms, 60_250);
    }

    #[test]
    fn test_srt_time_rejects_garbage() {
        assert_eq!(parse_srt_time("01:02:03,004"), Some(3_723_004));
        assert_eq!(parse_srt_time("00:61:00,000"), None);
        assert_eq!(parse_srt_time("nonsense"), None);
        assert!(from_srt_str("1\n00:00:01 --> 00:00:02\ntext\n").is_err());
    }

    #[tokio::test]
    async fn test_load_file_by_extension() {
        let dir = assert_fs::TempDir::new().unwrap();
        let json = dir.child("talk.json");
        json.write_str(r#"[{"start": 1.0, "end": 2.0, "text": "你好"}]"#).unwrap();
        let srt = dir.child("talk.srt");
        srt.write_str("1\n00:00:01,000 --> 00:00:02,000\n你好\n").unwrap();

        let from_json = load_file(json.path()).await.unwrap();
        let from_srt = load_file(srt.path()).await.unwrap();
        assert_eq!(from_json, from_srt);

        let txt = dir.child("talk.txt");
        txt.write_str("hello").unwrap();
        assert!(matches!(load_file(txt.path()).await, Err(DublineError::UnsupportedFormat(_))));
        assert!(matches!(
            load_file(dir.path().join("missing.json")).await,
            Err(DublineError::FileNotFound(_))
        ));
    }
}
