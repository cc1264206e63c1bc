//! Artifact directory layout
//!
//! A trained artifact is a directory holding `config.json`, one weights
//! file and the tokenizer files, all produced by the same training run.
//! Resolution is purely local: nothing here talks to a model hub.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Model configuration file name
pub const CONFIG_FILE: &str = "config.json";
/// Tokenizer definition file name
pub const TOKENIZER_FILE: &str = "tokenizer.json";
/// Optional tokenizer settings (special tokens)
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// Serialization format of the weights file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightFormat {
    /// `model.safetensors`, memory-mappable
    Safetensors,
    /// `pytorch_model.bin`, pickle-based (load only)
    #[serde(rename = "pytorch")]
    PyTorch,
    /// `model.npz`, numpy archive; the legacy non-mmap format used for saving
    Npz,
}

impl WeightFormat {
    /// Load preference order when a directory holds several weight files
    pub const LOAD_ORDER: [WeightFormat; 3] = [Self::Safetensors, Self::PyTorch, Self::Npz];

    /// File name the format is stored under
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Safetensors => "model.safetensors",
            Self::PyTorch => "pytorch_model.bin",
            Self::Npz => "model.npz",
        }
    }

    /// Whether `ModelHandle::save` can write this format
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::PyTorch)
    }
}

impl std::str::FromStr for WeightFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "safetensors" => Ok(Self::Safetensors),
            "pytorch" | "bin" => Ok(Self::PyTorch),
            "npz" => Ok(Self::Npz),
            _ => Err(anyhow!(
                "Invalid weight format: {}. Valid options: safetensors, pytorch, npz",
                s
            )),
        }
    }
}

impl std::fmt::Display for WeightFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safetensors => write!(f, "safetensors"),
            Self::PyTorch => write!(f, "pytorch"),
            Self::Npz => write!(f, "npz"),
        }
    }
}

/// Resolved file set of a local artifact directory
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    /// Root directory
    pub dir: PathBuf,
    /// Path to config.json
    pub config_file: PathBuf,
    /// Path to the weights file
    pub weights_file: PathBuf,
    /// Format of `weights_file`
    pub weight_format: WeightFormat,
    /// Path to tokenizer.json, if present
    pub tokenizer_file: Option<PathBuf>,
    /// Path to tokenizer_config.json, if present
    pub tokenizer_config_file: Option<PathBuf>,
}

impl ArtifactPaths {
    /// Resolve the files of an artifact directory.
    ///
    /// Fails when the directory, `config.json` or every known weights file
    /// is missing. Tokenizer files are optional here; the tokenizer adapter
    /// decides whether their absence is fatal.
    pub fn resolve(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        if !dir.is_dir() {
            return Err(anyhow!("Model directory does not exist: {:?}", dir));
        }

        let config_file = dir.join(CONFIG_FILE);
        if !config_file.is_file() {
            return Err(anyhow!("{} not found in {:?}", CONFIG_FILE, dir));
        }

        let (weight_format, weights_file) = WeightFormat::LOAD_ORDER
            .iter()
            .map(|format| (*format, dir.join(format.file_name())))
            .find(|(_, path)| path.is_file())
            .ok_or_else(|| {
                anyhow!(
                    "No model weights found in {:?} (tried model.safetensors, pytorch_model.bin and model.npz)",
                    dir
                )
            })?;

        let existing = |name: &str| {
            let path = dir.join(name);
            path.is_file().then_some(path)
        };

        Ok(Self {
            tokenizer_file: existing(TOKENIZER_FILE),
            tokenizer_config_file: existing(TOKENIZER_CONFIG_FILE),
            config_file,
            weights_file,
            weight_format,
            dir,
        })
    }

    /// Parse config.json into the architecture-agnostic view
    pub fn read_config(&self) -> Result<ArtifactConfig> {
        ArtifactConfig::from_file(&self.config_file)
    }
}

/// The subset of config.json the service needs before picking an architecture
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    /// Model architectures (e.g. ["Qwen2ForCausalLM"])
    #[serde(default)]
    pub architectures: Vec<String>,

    /// Model type (e.g. "qwen2", "llama")
    pub model_type: Option<String>,

    /// Vocabulary size
    pub vocab_size: Option<usize>,

    /// Maximum position embeddings, used as the generation length ceiling
    pub max_position_embeddings: Option<usize>,

    /// End-of-sequence token id(s)
    pub eos_token_id: Option<serde_json::Value>,

    /// Raw JSON, re-parsed by the architecture-specific config type
    #[serde(skip)]
    pub raw: String,
}

impl ArtifactConfig {
    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_json(raw)
    }

    /// Parse from a JSON string
    pub fn from_json(raw: String) -> Result<Self> {
        let mut config: Self =
            serde_json::from_str(&raw).context("Failed to parse config.json")?;
        config.raw = raw;
        Ok(config)
    }

    /// Lower-cased architecture name used for dispatch
    pub fn architecture(&self) -> String {
        let arch = self.architectures.first().map(String::as_str).unwrap_or("");
        let model_type = self.model_type.as_deref().unwrap_or("");
        format!("{} {}", arch, model_type).trim().to_lowercase()
    }

    /// First end-of-sequence id declared in the config
    pub fn eos_token_id(&self) -> Option<u32> {
        match self.eos_token_id.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64().map(|id| id as u32),
            serde_json::Value::Array(ids) => ids.first()?.as_u64().map(|id| id as u32),
            _ => None,
        }
    }
}
