//! Step sequencing and resume logic.
//!
//! The orchestrator runs the five steps in order, persisting each
//! step's full output before the next one starts. A step whose artifact
//! already exists is skipped on resume, so a crashed or paused run
//! re-executes only what is missing. A run can also be restricted to an
//! explicit subset of steps, recomputing those from their persisted
//! inputs. Credentials for every remote stage about to run are resolved
//! before any work begins.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::artifacts::{
    ArtifactStore, ClusterArtifact, DatasetArtifact, EmbeddingArtifact, FilterArtifact,
    LabelArtifact,
};
use super::run_state::{RunState, Step};
use crate::cluster::cluster_embeddings;
use crate::config::Config;
use crate::embedding::{EmbedOptions, EmbeddingEngine, EmbeddingProvider, JinaProvider};
use crate::error::{PipelineError, PipelineResult, Result};
use crate::filter::ImageFilter;
use crate::llm::VisionProvider;
use crate::manifest::{load_candidates, sample_pool};
use crate::tagging::{ClusterTagger, TagOptions};
use crate::types::{ClusterRecord, DatasetEntry, EmbeddingRecord, LabelSource, RunStats};

/// Drives a full pipeline run against one artifact directory.
pub struct Orchestrator {
    config: Config,
    store: ArtifactStore,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vision_provider: Option<Arc<dyn VisionProvider>>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        let store = ArtifactStore::new(
            config.artifact_dir(),
            config.fingerprint(),
            config.output.pretty,
        );
        Self {
            config,
            store,
            embedding_provider: None,
            vision_provider: None,
        }
    }

    /// Build an orchestrator with explicit providers instead of the ones
    /// the config would construct. Used by embedders of the library and
    /// by tests.
    pub fn with_providers(
        config: Config,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        vision_provider: Option<Arc<dyn VisionProvider>>,
    ) -> Self {
        let mut orchestrator = Self::new(config);
        orchestrator.embedding_provider = Some(embedding_provider);
        orchestrator.vision_provider = vision_provider;
        orchestrator
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the pipeline from `input` (a manifest file or an image
    /// directory) through the final dataset.
    ///
    /// With `overwrite` set, previous progress is discarded and every
    /// step runs fresh. Without it, completed steps are skipped and the
    /// run resumes after the last persisted artifact. Pauses with
    /// [`PipelineError::AwaitingApproval`] when the filter checkpoint is
    /// enabled and not yet approved.
    pub async fn run(&self, input: &Path, overwrite: bool) -> Result<RunStats> {
        self.run_steps(input, overwrite, None).await
    }

    /// Like [`Orchestrator::run`], optionally restricted to a subset of
    /// steps.
    ///
    /// A selection runs exactly the named steps, recomputing each even
    /// when marked complete. Unselected steps never execute; their
    /// persisted artifacts feed the selected ones and a missing input
    /// fails with [`PipelineError::MissingArtifact`]. Stats cover only
    /// the steps touched by this invocation.
    pub async fn run_steps(
        &self,
        input: &Path,
        overwrite: bool,
        steps: Option<&[Step]>,
    ) -> Result<RunStats> {
        self.store.ensure_dir()?;
        let mut state = RunState::load(self.store.dir())?;
        if overwrite {
            state.reset();
        }
        if state.config_fingerprint.is_empty() {
            state.config_fingerprint = self.config.fingerprint();
        } else if state.config_fingerprint != self.config.fingerprint() {
            warn!("resuming a run started under a different configuration");
        }

        let pending: Vec<Step> = Step::all()
            .into_iter()
            .filter(|step| match steps {
                Some(selection) => selection.contains(step),
                None => !state.is_complete(*step),
            })
            .collect();
        let execute = |step: Step| pending.contains(&step);

        // Resolve credentials for every remote stage about to run,
        // before any stage does work.
        let engine = if execute(Step::Embed) {
            let provider: Arc<dyn EmbeddingProvider> = match &self.embedding_provider {
                Some(provider) => provider.clone(),
                None => Arc::new(JinaProvider::from_config(&self.config.embedding)?),
            };
            Some(EmbeddingEngine::new(
                provider,
                EmbedOptions::from(&self.config.embedding),
            ))
        } else {
            None
        };
        let tagger = if execute(Step::Tag) {
            match &self.vision_provider {
                Some(provider) => {
                    let active = self.config.labeling.enabled.then(|| provider.clone());
                    Some(ClusterTagger::new(
                        active,
                        TagOptions::from(&self.config.labeling),
                    ))
                }
                None => Some(ClusterTagger::from_config(&self.config.labeling)?),
            }
        } else {
            None
        };

        let mut stats = RunStats::default();

        // Step 1: filter
        let mut filtered: Option<FilterArtifact> = None;
        if execute(Step::Filter) {
            let started = Instant::now();
            let candidates = load_candidates(input)?;
            let pool = sample_pool(
                candidates,
                self.config.intake.pool_per_topic,
                self.config.intake.seed,
            );
            let filter = ImageFilter::new(&self.config.filter);
            let (admitted, rejected) = filter.filter_batch(pool);
            let artifact = FilterArtifact { admitted, rejected };
            self.store
                .write(Step::Filter.artifact_file(), Step::Filter.name(), &artifact)?;
            state.mark_complete(Step::Filter);
            state.save(self.store.dir())?;
            info!(
                admitted = artifact.admitted.len(),
                rejected = artifact.rejected.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "filter step complete"
            );
            filtered = Some(artifact);
        } else if steps.is_none() {
            info!(step = %Step::Filter, "skipping completed step");
            filtered = Some(self.store.read(Step::Filter.artifact_file())?.data);
        }

        if execute(Step::Embed) && self.config.filter.require_approval && !state.filter_approved {
            state.save(self.store.dir())?;
            return Err(
                PipelineError::AwaitingApproval(self.store.path(Step::Filter.artifact_file()))
                    .into(),
            );
        }

        // Step 2: embed
        let mut embedded: Option<EmbeddingArtifact> = None;
        if execute(Step::Embed) {
            let started = Instant::now();
            let cards = self.upstream(&mut filtered, Step::Filter)?;
            let engine = engine.as_ref().ok_or_else(|| PipelineError::Embedding {
                message: "embedding engine not initialized".to_string(),
                status_code: None,
            })?;
            let (records, dropped) = engine.embed_batch(&cards.admitted).await;
            if records.is_empty() {
                return Err(PipelineError::Embedding {
                    message: "every card failed to embed".to_string(),
                    status_code: None,
                }
                .into());
            }
            let artifact = EmbeddingArtifact { records, dropped };
            self.store
                .write(Step::Embed.artifact_file(), Step::Embed.name(), &artifact)?;
            state.mark_complete(Step::Embed);
            state.save(self.store.dir())?;
            info!(
                embedded = artifact.records.len(),
                dropped = artifact.dropped.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "embed step complete"
            );
            embedded = Some(artifact);
        } else if steps.is_none() {
            info!(step = %Step::Embed, "skipping completed step");
            embedded = Some(self.store.read(Step::Embed.artifact_file())?.data);
        }

        if let Some(artifact) = &filtered {
            stats.admitted = artifact.admitted.len();
            stats.rejected = artifact.rejected.len();
        }
        if let Some(artifact) = &embedded {
            stats.dropped = artifact.dropped.len();
        }

        // Step 3: cluster
        let mut clustered: Option<ClusterArtifact> = None;
        if execute(Step::Cluster) {
            let started = Instant::now();
            let records = &self.upstream(&mut embedded, Step::Embed)?.records;
            let (clusters, cluster_stats) =
                cluster_embeddings(records, &self.config.clustering)?;
            let artifact = ClusterArtifact {
                clusters,
                leaves: cluster_stats.leaves,
            };
            self.store.write(
                Step::Cluster.artifact_file(),
                Step::Cluster.name(),
                &artifact,
            )?;
            state.mark_complete(Step::Cluster);
            state.save(self.store.dir())?;
            info!(
                leaves = artifact.leaves,
                nodes = artifact.clusters.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "cluster step complete"
            );
            clustered = Some(artifact);
        } else if steps.is_none() {
            info!(step = %Step::Cluster, "skipping completed step");
            clustered = Some(self.store.read(Step::Cluster.artifact_file())?.data);
        }
        if let Some(artifact) = &clustered {
            stats.leaves = artifact.leaves;
        }

        // Step 4: tag
        let mut labeled: Option<LabelArtifact> = None;
        if execute(Step::Tag) {
            let started = Instant::now();
            let tagger = tagger.as_ref().ok_or_else(|| PipelineError::Labeling {
                message: "tagger not initialized".to_string(),
                status_code: None,
            })?;
            let clusters = &self.upstream(&mut clustered, Step::Cluster)?.clusters;
            let records = &self.upstream(&mut embedded, Step::Embed)?.records;
            let labels = tagger.tag_clusters(clusters, records).await?;
            let artifact = LabelArtifact { labels };
            self.store
                .write(Step::Tag.artifact_file(), Step::Tag.name(), &artifact)?;
            state.mark_complete(Step::Tag);
            state.save(self.store.dir())?;
            info!(
                labeled = artifact.labels.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tag step complete"
            );
            labeled = Some(artifact);
        } else if steps.is_none() {
            info!(step = %Step::Tag, "skipping completed step");
            labeled = Some(self.store.read(Step::Tag.artifact_file())?.data);
        }
        if let Some(artifact) = &labeled {
            stats.vision_tagged = artifact
                .labels
                .iter()
                .filter(|l| l.source == LabelSource::Vision)
                .count();
        }

        // Step 5: assemble
        if execute(Step::Assemble) {
            let started = Instant::now();
            let clusters = &self.upstream(&mut clustered, Step::Cluster)?.clusters;
            let records = &self.upstream(&mut embedded, Step::Embed)?.records;
            let labels = self.upstream(&mut labeled, Step::Tag)?;
            let entries = assemble_dataset(clusters, labels, records)?;
            let artifact = DatasetArtifact {
                entries,
                generated_at: Utc::now(),
            };
            self.store.write(
                Step::Assemble.artifact_file(),
                Step::Assemble.name(),
                &artifact,
            )?;
            state.mark_complete(Step::Assemble);
            state.save(self.store.dir())?;
            info!(
                entries = artifact.entries.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "assemble step complete"
            );
        } else if steps.is_none() {
            info!(step = %Step::Assemble, "skipping completed step");
        }

        info!(
            admitted = stats.admitted,
            rejected = stats.rejected,
            dropped = stats.dropped,
            leaves = stats.leaves,
            vision_tagged = stats.vision_tagged,
            "pipeline run complete"
        );
        Ok(stats)
    }

    /// The input artifact for a step about to run: the value computed
    /// earlier in this invocation, or the one a previous run persisted.
    fn upstream<'a, T: DeserializeOwned>(
        &self,
        slot: &'a mut Option<T>,
        step: Step,
    ) -> PipelineResult<&'a T> {
        let data = match slot.take() {
            Some(data) => data,
            None => self.store.read::<T>(step.artifact_file())?.data,
        };
        Ok(slot.insert(data))
    }

    /// Mark the filter checkpoint as approved. Fails when there is no
    /// filter artifact to approve.
    pub fn mark_approved(&self) -> Result<()> {
        if !self.store.exists(Step::Filter.artifact_file()) {
            return Err(PipelineError::MissingArtifact(
                self.store.path(Step::Filter.artifact_file()),
            )
            .into());
        }
        let mut state = RunState::load(self.store.dir())?;
        state.filter_approved = true;
        state.save(self.store.dir())?;
        info!("filter output approved");
        Ok(())
    }

    /// Read back the persisted filter artifact for review.
    pub fn filter_artifact(&self) -> Result<FilterArtifact> {
        Ok(self
            .store
            .read::<FilterArtifact>(Step::Filter.artifact_file())?
            .data)
    }
}

/// Join leaves, labels, and embeddings into flat dataset rows, ordered
/// by leaf cluster id then member order.
fn assemble_dataset(
    clusters: &[ClusterRecord],
    labels: &LabelArtifact,
    embeddings: &[EmbeddingRecord],
) -> std::result::Result<Vec<DatasetEntry>, PipelineError> {
    let parents: HashSet<usize> = clusters.iter().filter_map(|c| c.parent_id).collect();
    let tags: HashMap<usize, &str> = labels
        .labels
        .iter()
        .map(|l| (l.cluster_id, l.tag.as_str()))
        .collect();
    let records: HashMap<&str, &EmbeddingRecord> = embeddings
        .iter()
        .map(|r| (r.card_id.as_str(), r))
        .collect();

    let mut entries = Vec::new();
    for cluster in clusters {
        if parents.contains(&cluster.cluster_id) {
            continue;
        }
        let tag = tags
            .get(&cluster.cluster_id)
            .ok_or_else(|| PipelineError::Labeling {
                message: format!("no label for leaf cluster {}", cluster.cluster_id),
                status_code: None,
            })?;
        for card_id in &cluster.member_card_ids {
            let record = records
                .get(card_id.as_str())
                .ok_or_else(|| PipelineError::Clustering(format!(
                    "cluster {} references card {card_id} with no embedding",
                    cluster.cluster_id
                )))?;
            entries.push(DatasetEntry {
                card_id: card_id.clone(),
                keyword: record.norm_keyword.clone(),
                image_ref: record.image_ref.clone(),
                cluster_id: cluster.cluster_id,
                tag: tag.to_string(),
            });
        }
    }
    Ok(entries)
}
