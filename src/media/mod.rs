// Media processing for the final muxing step
//
// - Processor: ffmpeg-backed implementation of the muxing capability
// - Commands: command builders and abstractions

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::Path;

pub use commands::*;
pub use processor::*;

use crate::config::{MediaConfig, TargetLanguage};
use crate::error::Result;

/// Inputs of one muxing run
#[derive(Debug, Clone, Copy)]
pub struct MuxRequest<'a> {
    pub video_path: &'a Path,
    pub audio_path: &'a Path,
    pub subtitle_path: Option<&'a Path>,
    pub output_path: &'a Path,
    pub language: TargetLanguage,
}

/// Main trait for media processing operations
#[async_trait]
pub trait MediaProcessorTrait: Send + Sync {
    /// Replace the video's audio with the dubbed track and attach subtitles
    async fn mux_dubbed_video(&self, request: MuxRequest<'_>) -> Result<()>;

    /// Check if media processor is available
    async fn check_availability(&self) -> Result<()>;

    /// Get media processor version information
    async fn get_version_info(&self) -> Result<String>;
}

/// Factory for creating media processor instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    /// Create the default media processor implementation (FFmpeg-based)
    pub fn create_processor(config: MediaConfig) -> Box<dyn MediaProcessorTrait> {
        Box::new(processor::MediaProcessorImpl::new(config))
    }
}
