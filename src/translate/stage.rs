use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::TargetLanguage;
use crate::error::DublineError;
use crate::retry::RetryPolicy;
use crate::segment::{SegmentStatus, SegmentStore, SegmentUpdate};
use crate::workers::{ProgressFn, run_pool};
use super::Translator;

pub const STAGE_NAME: &str = "translating";

/// Translates every Pending segment on a bounded pool
pub struct TranslationStage {
    translator: Arc<dyn Translator>,
    target: TargetLanguage,
    retry: RetryPolicy,
    call_timeout: Duration,
    workers: usize,
}

impl TranslationStage {
    pub fn new(
        translator: Arc<dyn Translator>,
        target: TargetLanguage,
        retry: RetryPolicy,
        call_timeout: Duration,
        workers: usize,
    ) -> Self {
        Self {
            translator,
            target,
            retry,
            call_timeout,
            workers,
        }
    }

    /// Translate all Pending segments. Every segment this stage touches ends
    /// up Translated or Failed; segments left undispatched by cancellation are
    /// marked Failed too.
    pub async fn run(&self, store: &SegmentStore, cancel: &CancellationToken, on_done: ProgressFn) {
        let ids = store.ids_with_status(SegmentStatus::Pending);
        info!("Translating {} segments to {} with {} workers", ids.len(), self.target.name(), self.workers);

        let undispatched = run_pool(ids, self.workers, cancel, on_done, |id| {
            let translator = self.translator.clone();
            let store = store.clone();
            let retry = self.retry.clone();
            let cancel = cancel.clone();
            let target = self.target;
            let call_timeout = self.call_timeout;
            async move {
                translate_segment(translator, store, id, target, retry, call_timeout, cancel).await;
            }
        })
        .await;

        for id in undispatched {
            if let Err(e) = store.mark_failed(id, STAGE_NAME, "cancelled") {
                warn!("Could not mark segment {} cancelled: {}", id, e);
            }
        }
    }
}

async fn translate_segment(
    translator: Arc<dyn Translator>,
    store: SegmentStore,
    id: usize,
    target: TargetLanguage,
    retry: RetryPolicy,
    call_timeout: Duration,
    cancel: CancellationToken,
) {
    let Some(segment) = store.get(id) else {
        return;
    };
    let source_text = segment.source_text.trim().to_string();

    let update = if source_text.is_empty() {
        SegmentUpdate::Failed {
            stage: STAGE_NAME.to_string(),
            reason: "empty source text".to_string(),
        }
    } else {
        let label = format!("translate #{}", id);
        let translator = translator.as_ref();
        let text = source_text.as_str();
        match retry
            .run(&label, call_timeout, &cancel, move |_| translator.translate(text, target))
            .await
        {
            Ok(translation) if translation.trim().is_empty() => SegmentUpdate::Failed {
                stage: STAGE_NAME.to_string(),
                reason: "translator returned empty text".to_string(),
            },
            Ok(translation) => {
                info!("Segment {}: {} -> {}", id, source_text, translation.trim());
                SegmentUpdate::Translated {
                    text: translation.trim().to_string(),
                }
            }
            Err(DublineError::Cancelled) => SegmentUpdate::Failed {
                stage: STAGE_NAME.to_string(),
                reason: "cancelled".to_string(),
            },
            Err(e) => {
                warn!("Segment {} translation failed: {}", id, e);
                SegmentUpdate::Failed {
                    stage: STAGE_NAME.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    };

    if let Err(e) = store.update(id, update) {
        warn!("Could not record translation result for segment {}: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::MockTranslator;
    use crate::transcript::TranscriptEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store_with(texts: &[&str]) -> SegmentStore {
        let entries = texts
            .iter()
            .enumerate()
            .map(|(i, text)| TranscriptEntry {
                start_ms: i as u64 * 2_000,
                end_ms: i as u64 * 2_000 + 1_500,
                text: text.to_string(),
            })
            .collect();
        SegmentStore::load(entries).unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_translates_every_pending_segment() {
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .times(3)
            .returning(|text, target| Ok(format!("[{}] {}", target.code(), text)));

        let store = store_with(&["一", "二", "三"]);
        let progress = Arc::new(AtomicUsize::new(0));
        let sink = progress.clone();
        let stage = TranslationStage::new(
            Arc::new(translator),
            TargetLanguage::German,
            fast_retry(),
            Duration::from_secs(1),
            2,
        );
        stage
            .run(&store, &CancellationToken::new(), Arc::new(move |n| sink.store(n, Ordering::SeqCst)))
            .await;

        assert_eq!(store.counts().translated, 3);
        assert_eq!(store.get(1).unwrap().translated_text.as_deref(), Some("[de] 二"));
        assert_eq!(progress.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_and_exhausted_failures_mark_segments_failed() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut translator = MockTranslator::new();
        translator.expect_translate().returning(move |text, _| {
            if text == "坏" {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DublineError::TransientService("503".to_string()))
            } else {
                Ok("fine".to_string())
            }
        });

        let store = store_with(&["好", "坏", "   "]);
        let stage = TranslationStage::new(
            Arc::new(translator),
            TargetLanguage::English,
            fast_retry(),
            Duration::from_secs(1),
            4,
        );
        stage.run(&store, &CancellationToken::new(), Arc::new(|_| {})).await;

        assert_eq!(store.get(0).unwrap().status, SegmentStatus::Translated);
        assert_eq!(store.get(1).unwrap().status, SegmentStatus::Failed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let empty = store.get(2).unwrap();
        assert_eq!(empty.status, SegmentStatus::Failed);
        assert_eq!(empty.failure.unwrap().reason, "empty source text");
    }

    #[tokio::test]
    async fn test_cancelled_stage_leaves_nothing_pending() {
        let mut translator = MockTranslator::new();
        translator.expect_translate().returning(|_, _| Ok("x".to_string()));

        let store = store_with(&["一", "二"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stage = TranslationStage::new(
            Arc::new(translator),
            TargetLanguage::French,
            fast_retry(),
            Duration::from_secs(1),
            1,
        );
        stage.run(&store, &cancel, Arc::new(|_| {})).await;

        assert_eq!(store.counts().pending, 0);
        assert_eq!(store.counts().failed, 2);
        assert_eq!(store.get(0).unwrap().failure.unwrap().reason, "cancelled");
    }
}
