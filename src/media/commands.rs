use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::config::{MediaConfig, TargetLanguage};
use crate::error::{DublineError, Result};
use super::MuxRequest;

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Select a stream for the output
    pub fn map<S: Into<String>>(self, selector: S) -> Self {
        self.arg("-map").arg(selector)
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Set subtitle codec
    pub fn subtitle_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:s").arg(codec)
    }

    /// Copy video stream
    pub fn copy_video(self) -> Self {
        self.video_codec("copy")
    }

    /// Set audio bitrate
    pub fn audio_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    /// Tag a stream with metadata, e.g. `("s:a:0", "language=eng")`
    pub fn stream_metadata(self, stream: &str, value: &str) -> Self {
        self.arg(format!("-metadata:{}", stream)).arg(value)
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Execute the command
    pub async fn execute(&self) -> Result<String> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DublineError::Media(format!("Failed to execute media processor: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DublineError::Media(format!(
                "{} failed: {}",
                self.description,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Builder for common media processing operations
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Build the muxing command: original picture, dubbed audio and either a
    /// soft subtitle stream or burned-in subtitles.
    pub fn mux_dubbed_video(&self, request: &MuxRequest<'_>, config: &MediaConfig) -> MediaCommand {
        let language = iso639_2(request.language);
        let mut cmd = MediaCommand::new(&self.binary_path, "Dubbed video muxing")
            .overwrite()
            .input(request.video_path)
            .input(request.audio_path);

        let soft_subtitles = request.subtitle_path.filter(|_| !config.burn_subtitles);
        if let Some(subtitle_path) = soft_subtitles {
            cmd = cmd.input(subtitle_path);
        }

        cmd = cmd.map("0:v:0").map("1:a:0");
        cmd = match request.subtitle_path {
            Some(subtitle_path) if config.burn_subtitles => cmd
                .video_filter(format!("subtitles={}", subtitle_path.display()))
                .video_codec("libx264"),
            _ => cmd.copy_video(),
        };
        cmd = cmd
            .audio_codec(config.audio_codec.as_str())
            .audio_bitrate(config.audio_bitrate.as_str())
            .stream_metadata("s:a:0", &format!("language={}", language));

        if soft_subtitles.is_some() {
            cmd = cmd
                .map("2:s:0")
                .subtitle_codec(subtitle_codec_for(request.output_path))
                .stream_metadata("s:s:0", &format!("language={}", language));
        }

        cmd.args(config.mux_options.iter().cloned())
            .output(request.output_path)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }
}

/// Three-letter language tag used in container metadata
pub fn iso639_2(language: TargetLanguage) -> &'static str {
    match language {
        TargetLanguage::English => "eng",
        TargetLanguage::French => "fra",
        TargetLanguage::German => "deu",
    }
}

/// Subtitle stream codec the output container accepts
fn subtitle_codec_for(output_path: &Path) -> &'static str {
    let extension = output_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    match extension.as_deref() {
        Some("mkv") => "srt",
        Some("webm") => "webvtt",
        _ => "mov_text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request<'a>(subtitle: Option<&'a Path>, output: &'a Path) -> MuxRequest<'a> {
        MuxRequest {
            video_path: Path::new("in.mp4"),
            audio_path: Path::new("dub.wav"),
            subtitle_path: subtitle,
            output_path: output,
            language: TargetLanguage::German,
        }
    }

    #[test]
    fn test_mux_with_soft_subtitles() {
        let subs = PathBuf::from("dub.srt");
        let output = PathBuf::from("out.mp4");
        let cmd = MediaCommandBuilder::new("ffmpeg")
            .mux_dubbed_video(&request(Some(&subs), &output), &MediaConfig::default());

        let args = cmd.args.join(" ");
        assert!(args.starts_with("-y -i in.mp4 -i dub.wav -i dub.srt"));
        assert!(args.contains("-map 0:v:0 -map 1:a:0 -c:v copy -c:a aac -b:a 192k"));
        assert!(args.contains("-map 2:s:0 -c:s mov_text -metadata:s:s:0 language=deu"));
        assert_eq!(cmd.args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_mux_burns_subtitles_when_configured() {
        let subs = PathBuf::from("dub.srt");
        let output = PathBuf::from("out.mkv");
        let config = MediaConfig {
            burn_subtitles: true,
            ..MediaConfig::default()
        };
        let cmd = MediaCommandBuilder::new("ffmpeg").mux_dubbed_video(&request(Some(&subs), &output), &config);

        let args = cmd.args.join(" ");
        assert!(args.contains("-vf subtitles=dub.srt -c:v libx264"));
        assert!(!args.contains("-map 2:s:0"));
    }

    #[test]
    fn test_subtitle_codec_follows_container() {
        assert_eq!(subtitle_codec_for(Path::new("a.MKV")), "srt");
        assert_eq!(subtitle_codec_for(Path::new("a.webm")), "webvtt");
        assert_eq!(subtitle_codec_for(Path::new("a.mp4")), "mov_text");
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_media_error() {
        let err = MediaCommand::new("/nonexistent/ffmpeg", "version check")
            .arg("-version")
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, DublineError::Media(_)));
    }
}
