//! Candle-backed causal language model
//!
//! Supports Qwen2 and Llama checkpoints. The forward pass mutates the KV
//! cache, so the model lives behind a mutex and generations run one at a
//! time per handle.

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{
    Cache as LlamaCache, Config as LlamaRuntimeConfig, Llama, LlamaConfig,
};
use candle_transformers::models::qwen2::{Config as Qwen2Config, ModelForCausalLM as Qwen2Model};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::artifact::{ArtifactConfig, ArtifactPaths, WeightFormat, CONFIG_FILE};
use super::LanguageModel;
use crate::error::{ServiceError, ServiceResult};
use crate::generation::GenerationParams;
use crate::tokenizer::EncodedPrompt;

/// Generation ceiling when config.json does not declare max positions
const DEFAULT_MAX_POSITIONS: usize = 2048;

/// A loaded causal language model.
///
/// Built in one step by [`ModelHandle::load`]; never partially initialised.
pub struct ModelHandle {
    model: Mutex<CausalModel>,
    /// Weights as read from disk (CPU), kept for `save`
    weights: HashMap<String, Tensor>,
    config: ArtifactConfig,
    device: Device,
    dtype: DType,
    max_positions: usize,
    name: String,
}

enum CausalModel {
    Qwen2(Qwen2Model),
    Llama {
        model: Llama,
        config: LlamaRuntimeConfig,
    },
}

/// Per-generation decoding state
enum DecodeState {
    /// KV cache lives inside the model and was cleared
    Internal,
    Llama(LlamaCache),
}

impl CausalModel {
    fn begin(&mut self, dtype: DType, device: &Device) -> Result<DecodeState> {
        match self {
            Self::Qwen2(model) => {
                model.clear_kv_cache();
                Ok(DecodeState::Internal)
            }
            Self::Llama { config, .. } => Ok(DecodeState::Llama(LlamaCache::new(
                true, dtype, config, device,
            )?)),
        }
    }

    fn forward(&mut self, input: &Tensor, offset: usize, state: &mut DecodeState) -> Result<Tensor> {
        match (self, state) {
            (Self::Qwen2(model), DecodeState::Internal) => Ok(model.forward(input, offset)?),
            (Self::Llama { model, .. }, DecodeState::Llama(cache)) => {
                Ok(model.forward(input, offset, cache)?)
            }
            _ => bail!("Decode state does not match the model architecture"),
        }
    }
}

impl ModelHandle {
    /// Load a model from a local artifact directory.
    ///
    /// Never touches the network. Fails with [`ServiceError::ModelLoad`] when
    /// config.json or the weights are missing or cannot be parsed, or the
    /// architecture is unsupported.
    pub fn load(dir: impl AsRef<Path>, device: &Device, dtype: DType) -> ServiceResult<Self> {
        Self::load_inner(dir.as_ref(), device, dtype).map_err(ServiceError::ModelLoad)
    }

    fn load_inner(dir: &Path, device: &Device, dtype: DType) -> Result<Self> {
        let paths = ArtifactPaths::resolve(dir)?;
        let config = paths.read_config()?;
        let arch = config.architecture();

        tracing::info!("Loading model from {:?}", paths.dir);
        tracing::info!("  Architecture: {}", arch);
        tracing::info!("  Weights: {:?} ({})", paths.weights_file, paths.weight_format);
        tracing::info!("  Device: {:?}, dtype: {:?}", device, dtype);

        let weights = read_weights(&paths.weights_file, paths.weight_format)?;
        let vb = VarBuilder::from_tensors(weights.clone(), dtype, device);

        let model = if arch.contains("qwen2") {
            let qwen_config: Qwen2Config =
                serde_json::from_str(&config.raw).context("Failed to parse Qwen2 config")?;
            tracing::info!(
                "Loading Qwen2: vocab={}, hidden={}, layers={}",
                qwen_config.vocab_size,
                qwen_config.hidden_size,
                qwen_config.num_hidden_layers
            );
            CausalModel::Qwen2(
                Qwen2Model::new(&qwen_config, vb).context("Failed to create Qwen2 model")?,
            )
        } else if arch.contains("llama") {
            let llama_config: LlamaConfig =
                serde_json::from_str(&config.raw).context("Failed to parse Llama config")?;
            let llama_config = llama_config.into_config(false);
            tracing::info!(
                "Loading Llama: vocab={}, hidden={}, layers={}",
                llama_config.vocab_size,
                llama_config.hidden_size,
                llama_config.num_hidden_layers
            );
            CausalModel::Llama {
                model: Llama::load(vb, &llama_config).context("Failed to create Llama model")?,
                config: llama_config,
            }
        } else {
            bail!(
                "Unsupported model architecture: {:?}. Supported: qwen2, llama",
                arch
            );
        };

        let max_positions = config
            .max_position_embeddings
            .unwrap_or(DEFAULT_MAX_POSITIONS);
        let name = paths
            .dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "model".to_string());

        tracing::info!("Model loaded successfully");

        Ok(Self {
            model: Mutex::new(model),
            weights,
            config,
            device: device.clone(),
            dtype,
            max_positions,
            name,
        })
    }

    /// Run sampling-based generation for one sequence.
    ///
    /// `max_length` counts the prompt, as in HF `generate`; it is capped at
    /// the model's max positions. A prompt that already reaches `max_length`
    /// still gets one sampled token unless it fills every position.
    /// Decoding stops early at `eos_token_id`. The returned ids are the
    /// prompt followed by the continuation.
    pub fn generate(
        &self,
        prompt: &EncodedPrompt,
        max_length: usize,
        pad_token_id: u32,
        eos_token_id: Option<u32>,
        params: &GenerationParams,
    ) -> Result<Vec<u32>> {
        let mut tokens = prompt.attended_ids(pad_token_id)?;
        if tokens.is_empty() {
            bail!("Prompt has no attended tokens");
        }

        let max_length = target_length(tokens.len(), max_length, self.max_positions);
        if tokens.len() >= max_length {
            tracing::warn!(
                "Prompt length {} fills all {} positions; nothing generated",
                tokens.len(),
                self.max_positions
            );
            return Ok(tokens);
        }

        let mut sampler = params.logits_processor();
        let mut model = self
            .model
            .lock()
            .map_err(|e| anyhow!("Model lock poisoned: {}", e))?;
        let mut state = model.begin(self.dtype, &self.device)?;

        let mut offset = 0;
        while tokens.len() < max_length {
            let context = if offset == 0 {
                &tokens[..]
            } else {
                &tokens[tokens.len() - 1..]
            };
            let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;
            let logits = model.forward(&input, offset, &mut state)?;
            offset += context.len();

            let logits = last_position(logits)?.to_dtype(DType::F32)?;
            let next_token = sampler.sample(&logits)?;
            tokens.push(next_token);

            if Some(next_token) == eos_token_id {
                tracing::debug!("Generation stopped: EOS token");
                break;
            }
        }

        Ok(tokens)
    }

    /// Persist config.json and the weights into `dir`.
    ///
    /// Existing files are overwritten, and weight files of other formats are
    /// removed so that a later `load` reads what was just written.
    pub fn save(&self, dir: impl AsRef<Path>, format: WeightFormat) -> Result<()> {
        let dir = dir.as_ref();
        if !format.is_writable() {
            bail!("Saving in {} format is not supported", format);
        }

        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        std::fs::write(dir.join(CONFIG_FILE), &self.config.raw)
            .context("Failed to write config.json")?;

        let weights_file = dir.join(format.file_name());
        match format {
            WeightFormat::Safetensors => {
                candle_core::safetensors::save(&self.weights, &weights_file)?;
            }
            WeightFormat::Npz => {
                // npy has no bf16
                let tensors = self
                    .weights
                    .iter()
                    .map(|(name, tensor)| {
                        let tensor = match tensor.dtype() {
                            DType::BF16 => tensor.to_dtype(DType::F32)?,
                            _ => tensor.clone(),
                        };
                        Ok((name.as_str(), tensor))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Tensor::write_npz(&tensors, &weights_file)?;
            }
            WeightFormat::PyTorch => bail!("Saving in {} format is not supported", format),
        }

        for other in WeightFormat::LOAD_ORDER.into_iter().filter(|f| *f != format) {
            let stale = dir.join(other.file_name());
            if stale.exists() {
                std::fs::remove_file(&stale)
                    .with_context(|| format!("Failed to remove stale weights: {:?}", stale))?;
            }
        }

        tracing::info!("Saved model to {:?} ({})", dir, format);
        Ok(())
    }
}

impl LanguageModel for ModelHandle {
    fn generate(
        &self,
        prompt: &EncodedPrompt,
        max_length: usize,
        pad_token_id: u32,
        eos_token_id: Option<u32>,
        params: &GenerationParams,
    ) -> Result<Vec<u32>> {
        ModelHandle::generate(self, prompt, max_length, pad_token_id, eos_token_id, params)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn vocab_size(&self) -> Option<usize> {
        self.config.vocab_size
    }

    fn max_positions(&self) -> usize {
        self.max_positions
    }
}

fn read_weights(path: &Path, format: WeightFormat) -> Result<HashMap<String, Tensor>> {
    let weights = match format {
        WeightFormat::Safetensors => candle_core::safetensors::load(path, &Device::Cpu)
            .with_context(|| format!("Failed to load safetensors weights: {:?}", path))?,
        WeightFormat::PyTorch => candle_core::pickle::read_all(path)
            .with_context(|| format!("Failed to load pytorch weights: {:?}", path))?
            .into_iter()
            .collect(),
        WeightFormat::Npz => Tensor::read_npz(path)
            .with_context(|| format!("Failed to load npz weights: {:?}", path))?
            .into_iter()
            .collect(),
    };

    if weights.is_empty() {
        bail!("Weights file {:?} contains no tensors", path);
    }
    Ok(weights)
}

/// Total sequence length to decode up to.
///
/// At least one new token is sampled when positions remain, even if the
/// prompt already reaches `max_length`.
fn target_length(prompt_len: usize, max_length: usize, max_positions: usize) -> usize {
    let target = max_length.min(max_positions);
    if prompt_len >= target {
        tracing::warn!(
            "Prompt length {} reaches max_length {}; sampling a single token",
            prompt_len,
            max_length
        );
        (prompt_len + 1).min(max_positions)
    } else {
        target
    }
}

/// Logits of the last position as a 1-D tensor
fn last_position(logits: Tensor) -> Result<Tensor> {
    let logits = logits.squeeze(0)?;
    let logits = if logits.dims().len() > 1 {
        logits.get(logits.dim(0)? - 1)?
    } else {
        logits
    };
    Ok(logits)
}
