//! Text generation service
//!
//! Glues the tokenizer and the model together: encode, generate, decode.
//! Everything here is synchronous and blocks for the whole generation, so
//! async callers must run it on a blocking worker.

pub mod config;
pub mod request;

pub use config::GenerationParams;
pub use request::GenerationRequest;

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::model::{parse_dtype, select_device, LanguageModel, ModelHandle};
use crate::tokenizer::TokenizerHandle;

/// Generate text for one prompt.
///
/// `model` and `tokenizer` must come from the same artifact directory.
/// The result is the decoded prompt plus continuation with special tokens
/// skipped and surrounding whitespace trimmed.
pub fn generate_text<M: LanguageModel + ?Sized>(
    prompt: &str,
    model: &M,
    tokenizer: &TokenizerHandle,
    max_length: usize,
    params: &GenerationParams,
) -> Result<String> {
    let pad_token_id = tokenizer
        .pad_token_id()
        .or_else(|| tokenizer.eos_token_id())
        .ok_or_else(|| anyhow!("Tokenizer has no pad token"))?;

    let encoded = tokenizer.encode(prompt)?;
    tracing::debug!(
        "Encoded prompt: {} tokens, max_length {}",
        encoded.len(),
        max_length
    );

    let output_ids = model.generate(
        &encoded,
        max_length,
        pad_token_id,
        tokenizer.eos_token_id(),
        params,
    )?;

    let text = tokenizer.decode(&output_ids, true)?;
    Ok(text.trim().to_string())
}

/// Seam between the HTTP layer and the generation service
pub trait TextGenerator: Send + Sync {
    /// Generate text for a validated prompt and max length
    fn generate(&self, prompt: &str, max_length: usize) -> ServiceResult<String>;
}

/// A model and its tokenizer bound to fixed generation parameters
pub struct ModelGenerator {
    model: Arc<dyn LanguageModel>,
    tokenizer: Arc<TokenizerHandle>,
    params: GenerationParams,
}

impl ModelGenerator {
    /// Bind an already-loaded model and tokenizer
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tokenizer: Arc<TokenizerHandle>,
        params: GenerationParams,
    ) -> Self {
        Self {
            model,
            tokenizer,
            params,
        }
    }

    /// Load model and tokenizer from the configured artifact directory.
    ///
    /// Local-only; any failure here is fatal for the caller.
    pub fn load(config: &ServiceConfig) -> ServiceResult<Self> {
        let device = select_device(config.device).map_err(ServiceError::ModelLoad)?;
        let dtype = parse_dtype(&config.dtype).map_err(ServiceError::ModelLoad)?;

        let model = ModelHandle::load(&config.model_dir, &device, dtype)?;
        let tokenizer = TokenizerHandle::load(&config.model_dir)?
            .with_max_length(model.max_positions())
            .map_err(ServiceError::TokenizerLoad)?;

        check_vocab(&model, &tokenizer);
        tracing::info!(
            "Generator ready: {} (max positions {})",
            model.name(),
            model.max_positions()
        );

        Ok(Self::new(
            Arc::new(model),
            Arc::new(tokenizer),
            config.generation.clone(),
        ))
    }

    /// Generation parameters applied to every call
    pub fn params(&self) -> &GenerationParams {
        &self.params
    }
}

impl TextGenerator for ModelGenerator {
    fn generate(&self, prompt: &str, max_length: usize) -> ServiceResult<String> {
        generate_text(
            prompt,
            self.model.as_ref(),
            &self.tokenizer,
            max_length,
            &self.params,
        )
        .map_err(ServiceError::Generation)
    }
}

/// Warn when the tokenizer can emit ids the model has no embedding for.
///
/// Only a partial check: equal sizes do not prove the vocabularies match.
fn check_vocab(model: &dyn LanguageModel, tokenizer: &TokenizerHandle) {
    if let Some(model_vocab) = model.vocab_size() {
        if tokenizer.vocab_size() > model_vocab {
            tracing::warn!(
                "Tokenizer vocabulary ({}) is larger than the model's ({}); are they from the same artifact?",
                tokenizer.vocab_size(),
                model_vocab
            );
        }
    }
}
