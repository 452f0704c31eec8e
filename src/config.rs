use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{DublineError, Result};
use crate::retry::RetryPolicy;

// Default values for optional configuration keys
fn default_source_language() -> String {
    "zh".to_string()
}

fn default_translate_timeout_secs() -> u64 {
    60
}

fn default_synthesis_timeout_secs() -> u64 {
    120
}

fn default_sample_rate() -> u32 {
    22_050
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub translate: TranslateConfig,
    pub synthesis: SynthesisConfig,
    pub alignment: AlignmentPolicy,
    pub subtitle: SubtitleConfig,
    pub pipeline: PipelineConfig,
    pub media: MediaConfig,
}

/// Languages a job can dub into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetLanguage {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "fr")]
    French,
    #[serde(rename = "de")]
    German,
}

impl TargetLanguage {
    /// ISO 639-1 code sent to the translator
    pub fn code(&self) -> &'static str {
        match self {
            Self::English => "en",
            Self::French => "fr",
            Self::German => "de",
        }
    }

    /// Locale handed to speech synthesizers
    pub fn locale(&self) -> &'static str {
        match self {
            Self::English => "en-US",
            Self::French => "fr-FR",
            Self::German => "de-DE",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::English => "English",
            Self::French => "French",
            Self::German => "German",
        }
    }

    /// Maximum characters on one subtitle line
    pub fn max_line_chars(&self) -> usize {
        match self {
            Self::English => 50,
            Self::French | Self::German => 40,
        }
    }

    pub fn default_voice(&self, gender: VoiceGender) -> &'static str {
        match (self, gender) {
            (Self::English, VoiceGender::Male) => "Matthew",
            (Self::English, VoiceGender::Female) => "Joanna",
            (Self::French, VoiceGender::Male) => "Mathieu",
            (Self::French, VoiceGender::Female) => "Léa",
            (Self::German, VoiceGender::Male) => "Daniel",
            (Self::German, VoiceGender::Female) => "Vicki",
        }
    }
}

impl fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TargetLanguage {
    type Err = DublineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "en" | "english" => Ok(Self::English),
            "fr" | "french" => Ok(Self::French),
            "de" | "german" => Ok(Self::German),
            other => Err(DublineError::Config(format!(
                "Unsupported target language '{}'. Valid languages: en, fr, de",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    #[default]
    Female,
    Male,
}

impl FromStr for VoiceGender {
    type Err = DublineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "female" | "f" => Ok(Self::Female),
            "male" | "m" => Ok(Self::Male),
            other => Err(DublineError::Config(format!(
                "Invalid voice gender '{}'. Valid values: female, male",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// Ollama endpoint URL
    pub endpoint: String,
    /// LLM model to use for translation
    pub model: String,
    /// Language of the transcript
    #[serde(default = "default_source_language")]
    pub source_language: String,
    /// Timeout for a single translation request
    #[serde(default = "default_translate_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            source_language: default_source_language(),
            request_timeout_secs: default_translate_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Path to the text-to-speech binary (e.g., piper)
    pub binary_path: String,
    /// Argument template. Placeholders: {voice}, {output}, {lang}, {rate}.
    /// The backend is considered rate-capable only when {rate} is present.
    pub args: Vec<String>,
    pub voice_gender: VoiceGender,
    /// Explicit voice, overriding the per-language default
    #[serde(default)]
    pub voice: Option<String>,
    /// Sample rate clips are expected to arrive in
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Timeout for a single synthesis call
    #[serde(default = "default_synthesis_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl SynthesisConfig {
    pub fn voice_for(&self, language: TargetLanguage) -> String {
        self.voice
            .clone()
            .unwrap_or_else(|| language.default_voice(self.voice_gender).to_string())
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            binary_path: "piper".to_string(),
            args: vec![
                "--model".to_string(),
                "{voice}".to_string(),
                "--output_file".to_string(),
                "{output}".to_string(),
            ],
            voice_gender: VoiceGender::Female,
            voice: None,
            sample_rate: default_sample_rate(),
            request_timeout_secs: default_synthesis_timeout_secs(),
        }
    }
}

/// How a failed segment's time slot is treated during alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GapFill {
    /// Keep the original window as silence
    #[default]
    Silence,
    /// Give the window to the next placed segment
    CompressNext,
}

impl FromStr for GapFill {
    type Err = DublineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "silence" => Ok(Self::Silence),
            "compressnext" => Ok(Self::CompressNext),
            other => Err(DublineError::Config(format!(
                "Invalid gap fill '{}'. Valid values: silence, compress-next",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentPolicy {
    /// Largest rendered/original duration ratio placed without truncation
    pub max_stretch_ratio: f64,
    /// Cumulative drift (ms) beyond which a hard resync point is inserted
    pub max_drift_ms: u64,
    pub gap_fill: GapFill,
}

impl Default for AlignmentPolicy {
    fn default() -> Self {
        Self {
            max_stretch_ratio: 1.5,
            max_drift_ms: 2_000,
            gap_fill: GapFill::Silence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    /// Shortest time a cue stays on screen, borrowed from the trailing gap
    pub min_cue_ms: u64,
    /// Lines per cue before it is split into consecutive cues
    pub max_lines: usize,
    /// Override for the per-language line width
    #[serde(default)]
    pub max_line_chars: Option<usize>,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            min_cue_ms: 1_000,
            max_lines: 2,
            max_line_chars: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent translation/synthesis calls
    pub workers: usize,
    /// Fraction of failed segments above which the job is abandoned
    pub max_failed_ratio: f64,
    pub retry: RetryPolicy,
    /// Directory for clips and outputs; a temporary directory when unset
    #[serde(default)]
    pub work_dir: Option<String>,
    /// Upper bound for a whole job
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_failed_ratio: 0.3,
            retry: RetryPolicy::default(),
            work_dir: None,
            job_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Audio codec for the dubbed track inside the container
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Burn subtitles into the picture instead of adding a subtitle stream
    pub burn_subtitles: bool,
    /// Additional options appended before the output path
    pub mux_options: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            burn_subtitles: false,
            mux_options: vec![],
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DublineError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| DublineError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DublineError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| DublineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.alignment.max_stretch_ratio.is_finite() || self.alignment.max_stretch_ratio < 1.0 {
            return Err(DublineError::Config(format!(
                "alignment.max_stretch_ratio must be >= 1.0, got {}",
                self.alignment.max_stretch_ratio
            )));
        }
        if self.pipeline.workers == 0 {
            return Err(DublineError::Config("pipeline.workers must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.pipeline.max_failed_ratio) {
            return Err(DublineError::Config(format!(
                "pipeline.max_failed_ratio must be within [0, 1], got {}",
                self.pipeline.max_failed_ratio
            )));
        }
        if self.pipeline.retry.max_attempts == 0 {
            return Err(DublineError::Config("pipeline.retry.max_attempts must be at least 1".to_string()));
        }
        if self.synthesis.sample_rate == 0 {
            return Err(DublineError::Config("synthesis.sample_rate must be positive".to_string()));
        }
        if self.subtitle.max_lines == 0 {
            return Err(DublineError::Config("subtitle.max_lines must be at least 1".to_string()));
        }
        Ok(())
    }
}
