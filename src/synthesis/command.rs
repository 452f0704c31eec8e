use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::{SynthesisConfig, TargetLanguage};
use crate::error::{DublineError, Result};
use super::Synthesizer;

/// Text-to-speech through an external binary (piper, espeak-ng, ...)
///
/// The text is written to the child's stdin. Arguments come from the
/// configured template with `{voice}`, `{lang}`, `{output}` and `{rate}`
/// substituted; the child must write a WAV file to `{output}`.
pub struct CommandSynthesizer {
    config: SynthesisConfig,
}

impl CommandSynthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    fn render_args(&self, language: TargetLanguage, voice: &str, output: &str, speed_factor: Option<f64>) -> Vec<String> {
        let rate = format!("{:.3}", speed_factor.unwrap_or(1.0));
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{voice}", voice)
                    .replace("{lang}", language.locale())
                    .replace("{output}", output)
                    .replace("{rate}", &rate)
            })
            .collect()
    }
}

#[async_trait]
impl Synthesizer for CommandSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        language: TargetLanguage,
        voice: &str,
        speed_factor: Option<f64>,
    ) -> Result<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(DublineError::PermanentSegment("empty text".to_string()));
        }

        let temp_dir = tempfile::tempdir()?;
        let output_path = temp_dir.path().join("speech.wav");
        let args = self.render_args(language, voice, &output_path.to_string_lossy(), speed_factor);

        debug!("Executing synthesizer: {} {:?}", self.config.binary_path, args);

        let mut child = Command::new(&self.config.binary_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DublineError::PermanentSegment(format!(
                    "Failed to execute synthesizer '{}': {}",
                    self.config.binary_path, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DublineError::TransientService(format!(
                "Synthesizer exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let wav = tokio::fs::read(&output_path).await.map_err(|e| {
            DublineError::PermanentSegment(format!("Synthesizer produced no audio file: {}", e))
        })?;
        if wav.is_empty() {
            return Err(DublineError::PermanentSegment("Synthesizer produced an empty file".to_string()));
        }
        Ok(wav)
    }

    fn supports_rate(&self) -> bool {
        self.config.args.iter().any(|arg| arg.contains("{rate}"))
    }
}
