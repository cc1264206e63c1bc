//! Tokenizer adapter over HuggingFace `tokenizers`
//!
//! The tokenizer must come from the same artifact directory as the model;
//! a mismatched vocabulary decodes garbage and cannot be detected here.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::error::{ServiceError, ServiceResult};
use crate::model::artifact::{ArtifactConfig, CONFIG_FILE, TOKENIZER_CONFIG_FILE, TOKENIZER_FILE};

/// Special tokens tried, in order, when no config names the eos token
const FALLBACK_EOS_TOKENS: [&str; 4] = ["<|endoftext|>", "</s>", "<|im_end|>", "<eos>"];

/// Tokenizer bound to one artifact directory, with a resolved pad token
pub struct TokenizerHandle {
    tokenizer: Tokenizer,
    eos_token: Option<(String, u32)>,
    max_length: usize,
    /// tokenizer_config.json as found on disk, written back by `save`
    source_config: Option<Map<String, Value>>,
}

impl TokenizerHandle {
    /// Load `tokenizer.json` from an artifact directory and apply the pad
    /// token fallback.
    pub fn load(dir: impl AsRef<Path>) -> ServiceResult<Self> {
        Self::load_inner(dir.as_ref()).map_err(ServiceError::TokenizerLoad)
    }

    fn load_inner(dir: &Path) -> Result<Self> {
        let tokenizer_path = dir.join(TOKENIZER_FILE);
        if !tokenizer_path.is_file() {
            return Err(anyhow!("{} not found in {:?}", TOKENIZER_FILE, dir));
        }

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to parse {:?}: {}", tokenizer_path, e))?;

        let source_config = read_tokenizer_config(dir)?;
        let mut handle = Self {
            tokenizer,
            eos_token: None,
            max_length: usize::MAX,
            source_config,
        };
        handle.eos_token = handle.resolve_eos_token(dir)?;
        handle.ensure_pad_token();

        if handle.pad_token_id().is_none() {
            return Err(anyhow!(
                "Tokenizer in {:?} declares neither a pad token nor an end-of-sequence token",
                dir
            ));
        }

        tracing::info!(
            "Loaded tokenizer: vocab={}, eos={:?}, pad={:?}",
            handle.vocab_size(),
            handle.eos_token.as_ref().map(|(token, _)| token.as_str()),
            handle.pad_token_id()
        );

        Ok(handle)
    }

    /// Set the truncation length (the model's max positions)
    pub fn with_max_length(mut self, max_length: usize) -> Result<Self> {
        self.max_length = max_length.max(1);
        self.tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: self.max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Failed to set truncation: {}", e))?;
        Ok(self)
    }

    /// Truncation length applied by `encode`
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn resolve_eos_token(&self, dir: &Path) -> Result<Option<(String, u32)>> {
        if let Some(source) = &self.source_config {
            let config: TokenizerConfigFile =
                serde_json::from_value(Value::Object(source.clone())).with_context(|| {
                    format!("Failed to parse {:?}", dir.join(TOKENIZER_CONFIG_FILE))
                })?;
            if let Some(token) = config.eos_token.as_ref().and_then(SpecialToken::content) {
                if let Some(id) = self.tokenizer.token_to_id(token) {
                    return Ok(Some((token.to_string(), id)));
                }
                tracing::warn!("eos_token {:?} is not in the vocabulary", token);
            }
        }

        let model_config = dir.join(CONFIG_FILE);
        if model_config.is_file() {
            if let Some(id) = ArtifactConfig::from_file(&model_config)?.eos_token_id() {
                if let Some(token) = self.tokenizer.id_to_token(id) {
                    return Ok(Some((token, id)));
                }
            }
        }

        Ok(self.lookup_fallback_eos())
    }

    fn lookup_fallback_eos(&self) -> Option<(String, u32)> {
        FALLBACK_EOS_TOKENS.iter().find_map(|token| {
            self.tokenizer
                .token_to_id(token)
                .map(|id| (token.to_string(), id))
        })
    }

    /// Set the pad token to the end-of-sequence token when none is declared.
    ///
    /// Idempotent: once a pad token exists (declared or assigned), it is
    /// left untouched. Returns true when this call assigned it.
    pub fn ensure_pad_token(&mut self) -> bool {
        if self.tokenizer.get_padding().is_some() {
            return false;
        }
        let Some((token, id)) = self.eos_token.clone() else {
            return false;
        };

        self.tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            pad_id: id,
            pad_token: token,
            ..Default::default()
        }));
        true
    }

    /// Declared pad token id, if any
    pub fn pad_token_id(&self) -> Option<u32> {
        self.tokenizer.get_padding().map(|p| p.pad_id)
    }

    /// Declared pad token, if any
    pub fn pad_token(&self) -> Option<&str> {
        self.tokenizer.get_padding().map(|p| p.pad_token.as_str())
    }

    /// Resolved end-of-sequence token id
    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token.as_ref().map(|(_, id)| *id)
    }

    /// Encode a prompt with padding and truncation
    pub fn encode(&self, text: &str) -> Result<EncodedPrompt> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        Ok(EncodedPrompt {
            input_ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
        })
    }

    /// Decode token ids back to text
    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| anyhow!("Decoding failed: {}", e))
    }

    /// Vocabulary size including added tokens
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Write `tokenizer.json` (with the resolved padding) into `dir`.
    ///
    /// tokenizer_config.json is copied from the source with only the pad
    /// token set (and the eos token when the source named none).
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        self.tokenizer
            .save(dir.join(TOKENIZER_FILE), false)
            .map_err(|e| anyhow!("Failed to save tokenizer: {}", e))?;

        let mut config = self.source_config.clone().unwrap_or_default();
        if let Some(pad) = self.pad_token() {
            config.insert("pad_token".to_string(), Value::String(pad.to_string()));
        }
        if let Some((token, _)) = &self.eos_token {
            config
                .entry("eos_token")
                .or_insert_with(|| Value::String(token.clone()));
        }
        if !config.is_empty() {
            std::fs::write(
                dir.join(TOKENIZER_CONFIG_FILE),
                serde_json::to_string_pretty(&Value::Object(config))?,
            )?;
        }
        Ok(())
    }
}

/// Prompt ids and attention mask produced by `TokenizerHandle::encode`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPrompt {
    /// Token ids
    pub input_ids: Vec<u32>,
    /// 1 for real tokens, 0 for padding
    pub attention_mask: Vec<u32>,
}

impl EncodedPrompt {
    /// Unpadded prompt (mask of all ones)
    pub fn new(input_ids: Vec<u32>) -> Self {
        let attention_mask = vec![1; input_ids.len()];
        Self {
            input_ids,
            attention_mask,
        }
    }

    /// Number of positions, padding included
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// True when there are no positions at all
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Ids of the attended positions.
    ///
    /// Masked positions must hold `pad_token_id`; anything else means the
    /// ids and mask did not come from the same encoding.
    pub fn attended_ids(&self, pad_token_id: u32) -> Result<Vec<u32>> {
        if self.input_ids.len() != self.attention_mask.len() {
            return Err(anyhow!(
                "input_ids ({}) and attention_mask ({}) differ in length",
                self.input_ids.len(),
                self.attention_mask.len()
            ));
        }

        let mut ids = Vec::with_capacity(self.input_ids.len());
        for (&id, &mask) in self.input_ids.iter().zip(&self.attention_mask) {
            if mask != 0 {
                ids.push(id);
            } else if id != pad_token_id {
                return Err(anyhow!(
                    "Masked position holds token {} instead of pad token {}",
                    id,
                    pad_token_id
                ));
            }
        }
        Ok(ids)
    }
}

fn read_tokenizer_config(dir: &Path) -> Result<Option<Map<String, Value>>> {
    let path = dir.join(TOKENIZER_CONFIG_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let content =
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
    let config: Map<String, Value> =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(Some(config))
}

#[derive(Debug, Deserialize)]
struct TokenizerConfigFile {
    eos_token: Option<SpecialToken>,
}

/// `tokenizer_config.json` stores special tokens either as plain strings or
/// as AddedToken objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpecialToken {
    Plain(String),
    Added { content: String },
}

impl SpecialToken {
    fn content(&self) -> Option<&str> {
        match self {
            Self::Plain(s) | Self::Added { content: s } => Some(s.as_str()),
        }
    }
}
