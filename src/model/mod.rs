//! Model holder
//!
//! Loads a fine-tuned causal language model from a local artifact directory,
//! runs sampling-based generation, and writes the artifact back to disk.

pub mod artifact;
pub mod device;
mod holder;

#[cfg(test)]
pub(crate) mod test_artifact;

pub use artifact::{ArtifactConfig, ArtifactPaths, WeightFormat};
pub use device::{parse_dtype, select_device, DevicePreference};
pub use holder::ModelHandle;

use anyhow::Result;

use crate::generation::GenerationParams;
use crate::tokenizer::EncodedPrompt;

/// Trait for token-level causal language models
///
/// The text generation service only depends on this trait, so it can run
/// against any backend that maps prompt ids to continued ids.
pub trait LanguageModel: Send + Sync {
    /// Continue `prompt` until `max_length` total tokens or `eos_token_id`.
    ///
    /// Returns the attended prompt ids followed by the generated ids.
    fn generate(
        &self,
        prompt: &EncodedPrompt,
        max_length: usize,
        pad_token_id: u32,
        eos_token_id: Option<u32>,
        params: &GenerationParams,
    ) -> Result<Vec<u32>>;

    /// Get the model name/identifier
    fn name(&self) -> &str;

    /// Vocabulary size declared by the model config
    fn vocab_size(&self) -> Option<usize>;

    /// Maximum sequence length (prompt plus continuation)
    fn max_positions(&self) -> usize;
}
