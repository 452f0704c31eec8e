// Translation stage
//
// - Translator: per-segment text translation capability (one call per segment)
// - ollama: Ollama-backed implementation
// - stage: concurrent dispatch of Pending segments with retry and write-back

pub mod ollama;
pub mod stage;

use async_trait::async_trait;
use std::sync::Arc;

pub use ollama::{OllamaTranslator, check_ollama_availability};
pub use stage::TranslationStage;

use crate::config::{TargetLanguage, TranslateConfig};
use crate::error::Result;

/// Text translation capability consumed by the pipeline
///
/// Implementations classify failures: rate limits, timeouts and server errors
/// as `TransientService`, anything that will fail again the same way as
/// `PermanentSegment`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate one segment's source text into `target`
    async fn translate(&self, text: &str, target: TargetLanguage) -> Result<String>;
}

/// Factory for creating translator instances
pub struct TranslatorFactory;

impl TranslatorFactory {
    /// Create the default translator (Ollama-based)
    pub fn create_translator(config: TranslateConfig) -> Result<Arc<dyn Translator>> {
        Ok(Arc::new(OllamaTranslator::new(config)?))
    }
}
