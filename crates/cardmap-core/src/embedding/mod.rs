//! Fused image+text embedding generation.
//!
//! Each admitted card gets one unit-norm vector: the image and the keyword
//! are encoded through the same joint model, each modality vector is
//! L2-normalized, the two are combined as a weighted sum
//! (`image_weight * image + (1 - image_weight) * text`), and the result is
//! re-normalized. The scheme is fixed; changing `image_weight` invalidates
//! previously persisted embedding artifacts.
//!
//! Cards are embedded concurrently behind a semaphore. A failed card is
//! dropped from the pool with a logged reason — one encoder failure never
//! aborts the batch.

pub(crate) mod provider;

pub use provider::{EmbeddingProvider, JinaProvider};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::error::PipelineError;
use crate::llm::retry;
use crate::llm::ImageInput;
use crate::math;
use crate::types::{CardCandidate, EmbeddingRecord};

/// Tuning knobs for a batch embedding run.
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    /// Weight of the image vector in the fusion, in [0, 1]
    pub image_weight: f32,
    /// Maximum concurrent embedding requests
    pub parallel: usize,
    /// Per-card timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum retries per card
    pub retry_attempts: u32,
    /// Base backoff delay in milliseconds
    pub retry_delay_ms: u64,
}

impl From<&EmbeddingConfig> for EmbedOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            image_weight: config.image_weight,
            parallel: config.parallel,
            timeout_ms: config.timeout_ms,
            retry_attempts: config.retry_attempts,
            retry_delay_ms: config.retry_delay_ms,
        }
    }
}

/// A card dropped during embedding, recorded in the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedCard {
    pub card_id: String,
    pub keyword: String,
    pub message: String,
}

/// Engine that turns admitted cards into embedding records.
pub struct EmbeddingEngine {
    provider: Arc<dyn EmbeddingProvider>,
    options: EmbedOptions,
}

/// Keyword normalization applied before text encoding. Recorded in the
/// artifact so downstream consumers see exactly what was encoded.
pub fn normalize_keyword(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

/// Fuse two modality vectors into one unit-norm embedding.
///
/// Both inputs are normalized independently first so neither modality's
/// raw magnitude dominates the sum.
pub fn fuse(image_vec: &[f32], text_vec: &[f32], image_weight: f32) -> Vec<f32> {
    debug_assert_eq!(image_vec.len(), text_vec.len());
    let image_unit = math::l2_normalize(image_vec);
    let text_unit = math::l2_normalize(text_vec);

    let mut fused: Vec<f32> = image_unit
        .iter()
        .zip(text_unit.iter())
        .map(|(i, t)| image_weight * i + (1.0 - image_weight) * t)
        .collect();
    math::l2_normalize_in_place(&mut fused);
    fused
}

impl EmbeddingEngine {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, options: EmbedOptions) -> Self {
        Self { provider, options }
    }

    /// Embed a batch of cards with bounded concurrency.
    ///
    /// Returns the successful records in input order plus the dropped
    /// cards. Tasks are joined in spawn order, so the output is
    /// deterministic regardless of completion order.
    pub async fn embed_batch(
        &self,
        cards: &[CardCandidate],
    ) -> (Vec<EmbeddingRecord>, Vec<DroppedCard>) {
        let semaphore = Arc::new(Semaphore::new(self.options.parallel));
        let mut handles = Vec::with_capacity(cards.len());

        for card in cards {
            let permit = semaphore.clone().acquire_owned().await;
            if permit.is_err() {
                tracing::warn!("Embedding semaphore closed unexpectedly — stopping batch");
                break;
            }
            let permit = permit.unwrap();

            let provider = self.provider.clone();
            let options = self.options.clone();
            let card = card.clone();

            let handle = tokio::spawn(async move {
                let result = embed_single(&provider, &card, &options).await;
                drop(permit);
                match result {
                    Ok(record) => Ok(record),
                    Err(e) => {
                        tracing::warn!("Dropping card {} ({:?}): {e}", card.id, card.keyword);
                        Err(DroppedCard {
                            card_id: card.id,
                            keyword: card.keyword,
                            message: e.to_string(),
                        })
                    }
                }
            });
            handles.push(handle);
        }

        let mut records = Vec::with_capacity(handles.len());
        let mut dropped = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(record)) => records.push(record),
                Ok(Err(drop)) => dropped.push(drop),
                Err(e) => {
                    tracing::error!("Embedding task panicked: {e}");
                }
            }
        }

        tracing::info!(
            "Embedding: {} succeeded, {} dropped",
            records.len(),
            dropped.len()
        );
        (records, dropped)
    }
}

/// Embed one card with retry on transient failures.
async fn embed_single(
    provider: &Arc<dyn EmbeddingProvider>,
    card: &CardCandidate,
    options: &EmbedOptions,
) -> Result<EmbeddingRecord, PipelineError> {
    let bytes = tokio::fs::read(&card.image)
        .await
        .map_err(|e| PipelineError::Embedding {
            message: format!("failed to read image {:?}: {e}", card.image),
            status_code: None,
        })?;
    let format = card
        .image
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();
    let image_input = ImageInput::from_bytes(&bytes, &format);
    let norm_keyword = normalize_keyword(&card.keyword);

    let mut last_error = PipelineError::Embedding {
        message: "no attempt made".to_string(),
        status_code: None,
    };

    for attempt in 0..=options.retry_attempts {
        if attempt > 0 {
            let delay = retry::backoff_duration(attempt - 1, options.retry_delay_ms);
            tracing::debug!(
                "Retry {attempt}/{} for card {} after {delay:?}",
                options.retry_attempts,
                card.id
            );
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(
            std::time::Duration::from_millis(options.timeout_ms),
            encode_pair(provider, &image_input, &norm_keyword),
        )
        .await
        {
            Ok(Ok((image_vec, text_vec))) => {
                if image_vec.len() != text_vec.len() {
                    return Err(PipelineError::Embedding {
                        message: format!(
                            "modality dimension mismatch: image {} vs text {}",
                            image_vec.len(),
                            text_vec.len()
                        ),
                        status_code: None,
                    });
                }
                if image_vec.is_empty() {
                    return Err(PipelineError::Embedding {
                        message: "provider returned empty vector".to_string(),
                        status_code: None,
                    });
                }
                let vector = fuse(&image_vec, &text_vec, options.image_weight);
                return Ok(EmbeddingRecord {
                    card_id: card.id.clone(),
                    vector,
                    norm_keyword,
                    image_ref: card.image.clone(),
                });
            }
            Ok(Err(e)) => {
                let retryable = retry::is_retryable(&e);
                last_error = e;
                if !retryable {
                    break;
                }
            }
            Err(_) => {
                last_error = PipelineError::Timeout {
                    stage: "embedding".to_string(),
                    timeout_ms: options.timeout_ms,
                };
            }
        }
    }

    Err(last_error)
}

/// Encode both modalities for one card.
async fn encode_pair(
    provider: &Arc<dyn EmbeddingProvider>,
    image: &ImageInput,
    keyword: &str,
) -> Result<(Vec<f32>, Vec<f32>), PipelineError> {
    let image_vec = provider.embed_image(image).await?;
    let text_vec = provider.embed_text(keyword).await?;
    Ok((image_vec, text_vec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Deterministic mock provider: vectors derived from input bytes.
    struct MockEmbeddingProvider {
        dim: usize,
        fail_keywords: Vec<String>,
        transient_failures: Arc<AtomicU32>,
        call_count: Arc<AtomicU32>,
        in_flight: Option<(Arc<AtomicU32>, Arc<AtomicU32>)>,
        delay: Option<Duration>,
    }

    impl MockEmbeddingProvider {
        fn new(dim: usize) -> Self {
            Self {
                dim,
                fail_keywords: Vec::new(),
                transient_failures: Arc::new(AtomicU32::new(0)),
                call_count: Arc::new(AtomicU32::new(0)),
                in_flight: None,
                delay: None,
            }
        }

        fn failing_on(mut self, keyword: &str) -> Self {
            self.fail_keywords.push(keyword.to_string());
            self
        }

        /// First `n` calls fail with a retryable 503.
        fn with_transient_failures(self, n: u32) -> Self {
            self.transient_failures.store(n, Ordering::SeqCst);
            self
        }

        fn vector_for(&self, seed: &[u8]) -> Vec<f32> {
            let digest = blake3::hash(seed);
            let bytes = digest.as_bytes();
            (0..self.dim)
                .map(|i| (bytes[i % 32] as f32) / 255.0 + 0.01)
                .collect()
        }

        async fn bookkeeping(&self) -> Result<(), PipelineError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Some((ref in_flight, ref max_concurrent)) = self.in_flight {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(current, Ordering::SeqCst);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some((ref in_flight, _)) = self.in_flight {
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            let remaining = self.transient_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(PipelineError::Embedding {
                    message: "HTTP 503: unavailable".to_string(),
                    status_code: Some(503),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn embed_text(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
            self.bookkeeping().await?;
            if self.fail_keywords.iter().any(|k| k == text) {
                return Err(PipelineError::Embedding {
                    message: "HTTP 400: bad request".to_string(),
                    status_code: Some(400),
                });
            }
            Ok(self.vector_for(text.as_bytes()))
        }

        async fn embed_image(&self, image: &ImageInput) -> Result<Vec<f32>, PipelineError> {
            self.bookkeeping().await?;
            Ok(self.vector_for(image.data.as_bytes()))
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
    }

    fn write_png(path: &Path) {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([10, 200, 50]));
        img.save(path).unwrap();
    }

    fn cards_in(dir: &Path, keywords: &[&str]) -> Vec<CardCandidate> {
        keywords
            .iter()
            .map(|k| {
                let path = dir.join(format!("{k}.png"));
                write_png(&path);
                CardCandidate {
                    id: format!("card_{k}"),
                    keyword: k.to_string(),
                    image: path,
                    topic: None,
                }
            })
            .collect()
    }

    fn fast_options() -> EmbedOptions {
        EmbedOptions {
            image_weight: 0.5,
            parallel: 4,
            timeout_ms: 5000,
            retry_attempts: 0,
            retry_delay_ms: 10,
        }
    }

    #[test]
    fn test_fuse_produces_unit_norm() {
        let fused = fuse(&[3.0, 0.0], &[0.0, 4.0], 0.5);
        let norm: f32 = fused.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_weight_extremes() {
        let image = [1.0, 0.0];
        let text = [0.0, 1.0];

        let all_image = fuse(&image, &text, 1.0);
        assert!((all_image[0] - 1.0).abs() < 1e-6);

        let all_text = fuse(&image, &text, 0.0);
        assert!((all_text[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_keyword() {
        assert_eq!(normalize_keyword("  To Drink "), "to drink");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_embed_batch_success_and_norms() {
        let dir = tempfile::tempdir().unwrap();
        let cards = cards_in(dir.path(), &["apple", "dog", "house"]);
        let engine = EmbeddingEngine::new(
            Arc::new(MockEmbeddingProvider::new(8)),
            fast_options(),
        );

        let (records, dropped) = engine.embed_batch(&cards).await;
        assert_eq!(records.len(), 3);
        assert!(dropped.is_empty());

        for record in &records {
            let norm: f32 = record.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
            assert_eq!(record.vector.len(), 8);
        }
        // Input order preserved
        assert_eq!(records[0].card_id, "card_apple");
        assert_eq!(records[2].card_id, "card_house");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_embed_batch_drops_failed_card_only() {
        let dir = tempfile::tempdir().unwrap();
        let cards = cards_in(dir.path(), &["apple", "cursed", "house"]);
        let engine = EmbeddingEngine::new(
            Arc::new(MockEmbeddingProvider::new(8).failing_on("cursed")),
            fast_options(),
        );

        let (records, dropped) = engine.embed_batch(&cards).await;
        assert_eq!(records.len(), 2);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].card_id, "card_cursed");
        assert!(!records.iter().any(|r| r.card_id == "card_cursed"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_embed_batch_unreadable_image_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut cards = cards_in(dir.path(), &["apple"]);
        cards.push(CardCandidate {
            id: "card_ghost".to_string(),
            keyword: "ghost".to_string(),
            image: PathBuf::from("/nonexistent/ghost.png"),
            topic: None,
        });

        let engine = EmbeddingEngine::new(
            Arc::new(MockEmbeddingProvider::new(8)),
            fast_options(),
        );
        let (records, dropped) = engine.embed_batch(&cards).await;
        assert_eq!(records.len(), 1);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].card_id, "card_ghost");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_embed_retries_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let cards = cards_in(dir.path(), &["apple"]);
        let provider = MockEmbeddingProvider::new(8).with_transient_failures(1);
        let engine = EmbeddingEngine::new(
            Arc::new(provider),
            EmbedOptions {
                retry_attempts: 2,
                retry_delay_ms: 10,
                ..fast_options()
            },
        );

        let (records, dropped) = engine.embed_batch(&cards).await;
        assert_eq!(records.len(), 1);
        assert!(dropped.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_embed_deterministic_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let cards = cards_in(dir.path(), &["apple", "dog"]);

        let engine = EmbeddingEngine::new(
            Arc::new(MockEmbeddingProvider::new(8)),
            fast_options(),
        );
        let (a, _) = engine.embed_batch(&cards).await;
        let (b, _) = engine.embed_batch(&cards).await;

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.card_id, y.card_id);
            assert_eq!(x.vector, y.vector);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_embed_semaphore_bounds_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let cards = cards_in(dir.path(), &["a", "b", "c", "d", "e", "f"]);

        let in_flight = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));
        let mut provider = MockEmbeddingProvider::new(4);
        provider.in_flight = Some((in_flight.clone(), max_concurrent.clone()));
        provider.delay = Some(Duration::from_millis(50));

        let engine = EmbeddingEngine::new(
            Arc::new(provider),
            EmbedOptions {
                parallel: 2,
                ..fast_options()
            },
        );
        let (records, _) = engine.embed_batch(&cards).await;
        assert_eq!(records.len(), 6);
        // Each card makes 2 provider calls but holds a single permit, so at
        // most 2 cards (and their calls) run at once... the calls within a
        // card are sequential, so max in-flight is bounded by parallel.
        assert!(
            max_concurrent.load(Ordering::SeqCst) <= 2,
            "semaphore violated: max concurrent was {}",
            max_concurrent.load(Ordering::SeqCst)
        );
    }
}
