//! Cluster theme tagging.
//!
//! Every leaf cluster gets a short human-readable tag. When vision
//! labeling is enabled the representative images closest to the leaf
//! centroid are sent to the configured provider; otherwise (or when the
//! provider fails) the tag falls back to the most frequent member
//! keyword. A failed leaf never aborts the batch.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::LabelingConfig;
use crate::error::{ConfigError, PipelineError, PipelineResult};
use crate::llm::retry;
use crate::llm::{ImageInput, LabelRequest, VisionProvider, VisionProviderFactory};
use crate::math::dot;
use crate::types::{ClusterLabel, ClusterRecord, EmbeddingRecord, LabelSource};

/// Tuning knobs for a tagging run.
#[derive(Debug, Clone)]
pub struct TagOptions {
    /// Whether to call the vision provider at all
    pub enabled: bool,
    /// Representative images sent per leaf
    pub representatives: usize,
    /// Maximum concurrent provider requests
    pub parallel: usize,
    /// Per-leaf timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum retries per leaf
    pub retry_attempts: u32,
    /// Base backoff delay in milliseconds
    pub retry_delay_ms: u64,
}

impl From<&LabelingConfig> for TagOptions {
    fn from(config: &LabelingConfig) -> Self {
        Self {
            enabled: config.enabled,
            representatives: config.representatives,
            parallel: config.parallel,
            timeout_ms: config.timeout_ms,
            retry_attempts: config.retry_attempts,
            retry_delay_ms: config.retry_delay_ms,
        }
    }
}

/// Most frequent keyword among the members; ties resolve to the
/// lexicographically smallest so the choice is deterministic.
pub fn placeholder_tag(keywords: &[String]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for keyword in keywords {
        *counts.entry(keyword.as_str()).or_insert(0) += 1;
    }
    counts
        .iter()
        .fold(("", 0usize), |(best, best_count), (&kw, &count)| {
            if count > best_count {
                (kw, count)
            } else {
                (best, best_count)
            }
        })
        .0
        .to_string()
}

/// Tidy a raw provider response into a tag: strip wrapping quotes and a
/// trailing period, collapse whitespace, lowercase.
pub fn sanitize_tag(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim_end_matches('.');
    trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Member records of a leaf ordered by similarity to the centroid,
/// highest first; ties keep member order.
fn representatives<'a>(
    leaf: &ClusterRecord,
    index: &HashMap<&str, &'a EmbeddingRecord>,
    count: usize,
) -> Vec<&'a EmbeddingRecord> {
    let mut scored: Vec<(&'a EmbeddingRecord, f32)> = leaf
        .member_card_ids
        .iter()
        .filter_map(|id| index.get(id.as_str()))
        .map(|&record| (record, dot(&record.vector, &leaf.centroid)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(count);
    scored.into_iter().map(|(record, _)| record).collect()
}

/// Tags leaf clusters using a vision provider, with keyword fallback.
pub struct ClusterTagger {
    provider: Option<Arc<dyn VisionProvider>>,
    options: TagOptions,
}

impl ClusterTagger {
    pub fn new(provider: Option<Arc<dyn VisionProvider>>, options: TagOptions) -> Self {
        Self { provider, options }
    }

    /// Build the tagger from config. Resolves provider credentials up
    /// front so a missing key fails before any work is done.
    pub fn from_config(config: &LabelingConfig) -> Result<Self, ConfigError> {
        let provider = if config.enabled {
            Some(Arc::from(VisionProviderFactory::create(config)?))
        } else {
            None
        };
        Ok(Self::new(provider, TagOptions::from(config)))
    }

    /// Tag every leaf of the cluster tree.
    ///
    /// Labels come back ordered by cluster id. Leaves are processed
    /// concurrently behind a semaphore and joined in spawn order.
    pub async fn tag_clusters(
        &self,
        clusters: &[ClusterRecord],
        embeddings: &[EmbeddingRecord],
    ) -> PipelineResult<Vec<ClusterLabel>> {
        let index: HashMap<&str, &EmbeddingRecord> = embeddings
            .iter()
            .map(|record| (record.card_id.as_str(), record))
            .collect();
        let parents: HashSet<usize> = clusters.iter().filter_map(|c| c.parent_id).collect();
        let leaves: Vec<&ClusterRecord> = clusters
            .iter()
            .filter(|c| !parents.contains(&c.cluster_id))
            .collect();

        for leaf in &leaves {
            for card_id in &leaf.member_card_ids {
                if !index.contains_key(card_id.as_str()) {
                    return Err(PipelineError::Labeling {
                        message: format!(
                            "cluster {} references card {card_id} with no embedding",
                            leaf.cluster_id
                        ),
                        status_code: None,
                    });
                }
            }
        }

        let Some(provider) = self.provider.clone() else {
            return Ok(leaves
                .iter()
                .map(|leaf| ClusterLabel {
                    cluster_id: leaf.cluster_id,
                    tag: placeholder_tag(&leaf_keywords(leaf, &index)),
                    source: LabelSource::Placeholder,
                    error: None,
                })
                .collect());
        };

        let semaphore = Arc::new(Semaphore::new(self.options.parallel));
        let mut handles = Vec::with_capacity(leaves.len());

        for leaf in &leaves {
            let permit = semaphore.clone().acquire_owned().await;
            if permit.is_err() {
                tracing::warn!("Labeling semaphore closed unexpectedly — stopping batch");
                break;
            }
            let permit = permit.unwrap();

            let provider = provider.clone();
            let options = self.options.clone();
            let cluster_id = leaf.cluster_id;
            let keywords = leaf_keywords(leaf, &index);
            let reps: Vec<(String, std::path::PathBuf)> = representatives(
                leaf,
                &index,
                self.options.representatives,
            )
            .into_iter()
            .map(|r| (r.norm_keyword.clone(), r.image_ref.clone()))
            .collect();

            let handle = tokio::spawn(async move {
                let result = label_leaf(&provider, cluster_id, &reps, &options).await;
                drop(permit);
                match result {
                    Ok(tag) => ClusterLabel {
                        cluster_id,
                        tag,
                        source: LabelSource::Vision,
                        error: None,
                    },
                    Err(e) => {
                        tracing::warn!("Falling back to keyword tag for cluster {cluster_id}: {e}");
                        ClusterLabel {
                            cluster_id,
                            tag: placeholder_tag(&keywords),
                            source: LabelSource::Fallback,
                            error: Some(e.to_string()),
                        }
                    }
                }
            });
            handles.push(handle);
        }

        let mut labels = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(label) => labels.push(label),
                Err(e) => {
                    return Err(PipelineError::Labeling {
                        message: format!("labeling task panicked: {e}"),
                        status_code: None,
                    });
                }
            }
        }

        let vision = labels
            .iter()
            .filter(|l| matches!(l.source, LabelSource::Vision))
            .count();
        tracing::info!(
            "Tagging: {vision} vision-labeled, {} fallback",
            labels.len() - vision
        );
        Ok(labels)
    }
}

fn leaf_keywords(leaf: &ClusterRecord, index: &HashMap<&str, &EmbeddingRecord>) -> Vec<String> {
    leaf.member_card_ids
        .iter()
        .filter_map(|id| index.get(id.as_str()))
        .map(|record| record.norm_keyword.clone())
        .collect()
}

/// Label one leaf with retry on transient failures.
async fn label_leaf(
    provider: &Arc<dyn VisionProvider>,
    cluster_id: usize,
    reps: &[(String, std::path::PathBuf)],
    options: &TagOptions,
) -> Result<String, PipelineError> {
    let mut images = Vec::with_capacity(reps.len());
    let mut keywords = Vec::with_capacity(reps.len());
    for (keyword, path) in reps {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let format = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("png")
                    .to_lowercase();
                images.push(ImageInput::from_bytes(&bytes, &format));
                keywords.push(keyword.clone());
            }
            Err(e) => {
                tracing::warn!("Skipping unreadable representative {path:?}: {e}");
            }
        }
    }
    if images.is_empty() {
        return Err(PipelineError::Labeling {
            message: format!("no readable representative images for cluster {cluster_id}"),
            status_code: None,
        });
    }

    let request = LabelRequest::theme_label(images, &keywords);

    let mut last_error = PipelineError::Labeling {
        message: "no attempt made".to_string(),
        status_code: None,
    };

    for attempt in 0..=options.retry_attempts {
        if attempt > 0 {
            let delay = retry::backoff_duration(attempt - 1, options.retry_delay_ms);
            tracing::debug!(
                "Retry {attempt}/{} for cluster {cluster_id} after {delay:?}",
                options.retry_attempts
            );
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(
            std::time::Duration::from_millis(options.timeout_ms),
            provider.label(&request),
        )
        .await
        {
            Ok(Ok(response)) => {
                let tag = sanitize_tag(&response.text);
                if tag.is_empty() {
                    return Err(PipelineError::Labeling {
                        message: "provider returned an empty tag".to_string(),
                        status_code: None,
                    });
                }
                return Ok(tag);
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
                    stage: "labeling".to_string(),
                    timeout_ms: options.timeout_ms,
                };
            }
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LabelResponse;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct MockVisionProvider {
        response: String,
        fail_first: u32,
        fail_status: u16,
        calls: AtomicU32,
    }

    impl MockVisionProvider {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                fail_first: 0,
                fail_status: 500,
                calls: AtomicU32::new(0),
            }
        }

        fn failing(response: &str, fail_first: u32, fail_status: u16) -> Self {
            Self {
                response: response.to_string(),
                fail_first,
                fail_status,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl VisionProvider for MockVisionProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn label(&self, _request: &LabelRequest) -> Result<LabelResponse, PipelineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(PipelineError::Labeling {
                    message: format!("mock failure {call}"),
                    status_code: Some(self.fail_status),
                });
            }
            Ok(LabelResponse {
                text: self.response.clone(),
                model: "mock-model".to_string(),
                tokens_used: Some(10),
                latency_ms: 1,
            })
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
    }

    fn write_png(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let img = image::RgbImage::new(4, 4);
        img.save(&path).unwrap();
        path
    }

    fn record(id: &str, keyword: &str, vector: Vec<f32>, image: PathBuf) -> EmbeddingRecord {
        EmbeddingRecord {
            card_id: id.to_string(),
            vector,
            norm_keyword: keyword.to_string(),
            image_ref: image,
        }
    }

    /// Root plus one leaf holding all three cards.
    fn fixture(dir: &Path) -> (Vec<ClusterRecord>, Vec<EmbeddingRecord>) {
        let embeddings = vec![
            record("card_a", "apple", vec![1.0, 0.0], write_png(dir, "a.png")),
            record("card_b", "apple", vec![0.9, 0.1], write_png(dir, "b.png")),
            record("card_c", "pear", vec![0.8, 0.2], write_png(dir, "c.png")),
        ];
        let clusters = vec![
            ClusterRecord {
                cluster_id: 0,
                parent_id: None,
                depth: 0,
                centroid: vec![1.0, 0.0],
                member_card_ids: vec![
                    "card_a".to_string(),
                    "card_b".to_string(),
                    "card_c".to_string(),
                ],
            },
            ClusterRecord {
                cluster_id: 1,
                parent_id: Some(0),
                depth: 1,
                centroid: vec![1.0, 0.0],
                member_card_ids: vec![
                    "card_a".to_string(),
                    "card_b".to_string(),
                    "card_c".to_string(),
                ],
            },
        ];
        (clusters, embeddings)
    }

    fn options() -> TagOptions {
        TagOptions {
            enabled: true,
            representatives: 2,
            parallel: 2,
            timeout_ms: 5_000,
            retry_attempts: 2,
            retry_delay_ms: 1,
        }
    }

    #[test]
    fn test_placeholder_tag_most_frequent() {
        let keywords = vec![
            "pear".to_string(),
            "apple".to_string(),
            "apple".to_string(),
        ];
        assert_eq!(placeholder_tag(&keywords), "apple");
    }

    #[test]
    fn test_placeholder_tag_tie_is_lexicographic() {
        let keywords = vec!["pear".to_string(), "apple".to_string()];
        assert_eq!(placeholder_tag(&keywords), "apple");
    }

    #[test]
    fn test_sanitize_tag() {
        assert_eq!(sanitize_tag("  \"Fresh Fruit.\"  "), "fresh fruit");
        assert_eq!(sanitize_tag("Kitchen\n Tools"), "kitchen tools");
        assert_eq!(sanitize_tag("'animals'"), "animals");
    }

    #[test]
    fn test_representatives_closest_to_centroid() {
        let dir = tempfile::tempdir().unwrap();
        let (clusters, embeddings) = fixture(dir.path());
        let index: HashMap<&str, &EmbeddingRecord> = embeddings
            .iter()
            .map(|r| (r.card_id.as_str(), r))
            .collect();

        let reps = representatives(&clusters[1], &index, 2);
        assert_eq!(reps.len(), 2);
        assert_eq!(reps[0].card_id, "card_a");
        assert_eq!(reps[1].card_id, "card_b");
    }

    #[tokio::test]
    async fn test_disabled_labeling_yields_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let (clusters, embeddings) = fixture(dir.path());
        let tagger = ClusterTagger::new(None, options());

        let labels = tagger.tag_clusters(&clusters, &embeddings).await.unwrap();

        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].cluster_id, 1);
        assert_eq!(labels[0].tag, "apple");
        assert!(matches!(labels[0].source, LabelSource::Placeholder));
    }

    #[tokio::test]
    async fn test_vision_label_applied() {
        let dir = tempfile::tempdir().unwrap();
        let (clusters, embeddings) = fixture(dir.path());
        let provider = Arc::new(MockVisionProvider::new("\"Orchard Fruit.\""));
        let tagger = ClusterTagger::new(Some(provider), options());

        let labels = tagger.tag_clusters(&clusters, &embeddings).await.unwrap();

        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].tag, "orchard fruit");
        assert!(matches!(labels[0].source, LabelSource::Vision));
        assert!(labels[0].error.is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (clusters, embeddings) = fixture(dir.path());
        let provider = Arc::new(MockVisionProvider::failing("Fruit", 1, 503));
        let tagger = ClusterTagger::new(Some(provider.clone()), options());

        let labels = tagger.tag_clusters(&clusters, &embeddings).await.unwrap();

        assert_eq!(labels[0].tag, "fruit");
        assert!(matches!(labels[0].source, LabelSource::Vision));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fall_back_to_keyword() {
        let dir = tempfile::tempdir().unwrap();
        let (clusters, embeddings) = fixture(dir.path());
        let provider = Arc::new(MockVisionProvider::failing("unused", 10, 503));
        let tagger = ClusterTagger::new(Some(provider), options());

        let labels = tagger.tag_clusters(&clusters, &embeddings).await.unwrap();

        assert_eq!(labels[0].tag, "apple");
        assert!(matches!(labels[0].source, LabelSource::Fallback));
        assert!(labels[0].error.as_deref().unwrap().contains("mock failure"));
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (clusters, embeddings) = fixture(dir.path());
        let provider = Arc::new(MockVisionProvider::failing("unused", 10, 400));
        let tagger = ClusterTagger::new(Some(provider.clone()), options());

        let labels = tagger.tag_clusters(&clusters, &embeddings).await.unwrap();

        assert!(matches!(labels[0].source, LabelSource::Fallback));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_embedding_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let (clusters, mut embeddings) = fixture(dir.path());
        embeddings.pop();
        let tagger = ClusterTagger::new(None, options());

        let err = tagger.tag_clusters(&clusters, &embeddings).await.unwrap_err();
        assert!(err.to_string().contains("card_c"));
    }
}
