//! Vision-model integration for cluster theme labeling.
//!
//! Provides a provider abstraction over vision-capable chat backends
//! (OpenAI, Anthropic) plus retry classification shared with the embedding
//! stage. The tagging stage drives these providers; nothing here knows
//! about clusters.

pub(crate) mod anthropic;
pub(crate) mod openai;
pub(crate) mod provider;
pub(crate) mod retry;

pub use provider::{
    resolve_env_var, ImageInput, LabelRequest, LabelResponse, VisionProvider,
    VisionProviderFactory,
};
