use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::MediaConfig;
use crate::error::{DublineError, Result};
use super::{MediaCommandBuilder, MediaProcessorTrait, MuxRequest};

/// Concrete implementation of media processor (FFmpeg-based)
pub struct MediaProcessorImpl {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    /// Create a new media processor implementation
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path);

        Self {
            config,
            command_builder,
        }
    }
}

#[async_trait]
impl MediaProcessorTrait for MediaProcessorImpl {
    async fn mux_dubbed_video(&self, request: MuxRequest<'_>) -> Result<()> {
        if !request.video_path.exists() {
            return Err(DublineError::FileNotFound(request.video_path.display().to_string()));
        }
        info!(
            "Muxing {} with {} -> {}",
            request.video_path.display(),
            request.audio_path.display(),
            request.output_path.display()
        );

        let command = self.command_builder.mux_dubbed_video(&request, &self.config);
        command.execute().await?;

        info!("Dubbed video written to {}", request.output_path.display());
        Ok(())
    }

    async fn check_availability(&self) -> Result<()> {
        self.get_version_info()
            .await
            .map(|version| info!("Media processor is available: {}", version))
            .map_err(|e| DublineError::Media(format!("Media processor not found: {}", e)))
    }

    async fn get_version_info(&self) -> Result<String> {
        debug!("Getting media processor version information");

        let stdout = self.command_builder.version_check().execute().await?;
        // The first line carries the version
        let first_line = stdout.lines().next().unwrap_or("Unknown version");
        Ok(first_line.to_string())
    }
}
