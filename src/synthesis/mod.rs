// Synthesis stage
//
// - Synthesizer: per-segment text-to-speech capability returning WAV bytes
// - command: external TTS binary driven by an argument template
// - stage: concurrent dispatch of Translated segments, duration measurement,
//   and the one-shot speed-adjusted re-render requested by alignment

pub mod command;
pub mod stage;

use async_trait::async_trait;
use std::io::Cursor;
use std::sync::Arc;

pub use command::CommandSynthesizer;
pub use stage::SynthesisStage;

use crate::config::{SynthesisConfig, TargetLanguage};
use crate::error::{DublineError, Result};

/// Speech synthesis capability consumed by the pipeline
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render `text` and return a complete WAV file.
    ///
    /// `speed_factor` asks for a rendering that lasts `speed_factor` times the
    /// natural-rate length (0.8 means 20% shorter). Backends that cannot
    /// adjust rate ignore it and report so through [`Synthesizer::supports_rate`].
    async fn synthesize(
        &self,
        text: &str,
        language: TargetLanguage,
        voice: &str,
        speed_factor: Option<f64>,
    ) -> Result<Vec<u8>>;

    fn supports_rate(&self) -> bool {
        false
    }
}

/// Factory for creating synthesizer instances
pub struct SynthesizerFactory;

impl SynthesizerFactory {
    /// Create the default synthesizer (external command)
    pub fn create_synthesizer(config: SynthesisConfig) -> Arc<dyn Synthesizer> {
        Arc::new(CommandSynthesizer::new(config))
    }
}

/// Format and length of a rendered clip, read from its WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipInfo {
    pub duration_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Measure a WAV clip held in memory
pub fn measure_clip(wav: &[u8]) -> Result<ClipInfo> {
    let reader = hound::WavReader::new(Cursor::new(wav))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(DublineError::PermanentSegment("clip reports a zero sample rate".to_string()));
    }
    let frames = reader.duration() as u64;
    let rate = spec.sample_rate as u64;
    Ok(ClipInfo {
        duration_ms: (frames * 1000 + rate / 2) / rate,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// WAV bytes of `duration_ms` of a constant tone
    pub fn wav_bytes(duration_ms: u64, sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let frames = duration_ms * sample_rate as u64 / 1000;
            for _ in 0..frames * channels as u64 {
                writer.write_sample(1000i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    /// Synthesizer whose clip length is a function of the text
    pub struct FakeSynthesizer {
        pub sample_rate: u32,
        pub rate_capable: bool,
        pub duration_for: Box<dyn Fn(&str) -> Option<u64> + Send + Sync>,
        pub calls: Mutex<Vec<(String, Option<f64>)>>,
    }

    impl FakeSynthesizer {
        pub fn new(duration_for: impl Fn(&str) -> Option<u64> + Send + Sync + 'static) -> Self {
            Self {
                sample_rate: 8_000,
                rate_capable: false,
                duration_for: Box::new(duration_for),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Synthesizer for FakeSynthesizer {
        async fn synthesize(
            &self,
            text: &str,
            _language: TargetLanguage,
            _voice: &str,
            speed_factor: Option<f64>,
        ) -> Result<Vec<u8>> {
            self.calls.lock().unwrap().push((text.to_string(), speed_factor));
            match (self.duration_for)(text) {
                Some(ms) => {
                    let scaled = (ms as f64 * speed_factor.unwrap_or(1.0)).round() as u64;
                    Ok(wav_bytes(scaled, self.sample_rate, 1))
                }
                None => Err(DublineError::PermanentSegment(format!("cannot voice '{}'", text))),
            }
        }

        fn supports_rate(&self) -> bool {
            self.rate_capable
        }
    }
}
