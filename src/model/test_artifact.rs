//! Tiny on-disk artifacts for tests: randomly initialised one-layer Qwen2
//! and Llama models and a word-level tokenizer sharing an 8-token vocabulary.

use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::llama::{Llama, LlamaConfig};
use candle_transformers::models::qwen2::{Config as Qwen2Config, ModelForCausalLM as Qwen2Model};
use std::path::Path;

use super::artifact::{CONFIG_FILE, TOKENIZER_CONFIG_FILE, TOKENIZER_FILE};

pub const TINY_VOCAB: [&str; 8] = [
    "<|endoftext|>",
    "<unk>",
    "hello",
    "world",
    "what",
    "are",
    "the",
    "symptoms",
];

pub const TINY_CONFIG: &str = r#"{
  "architectures": ["Qwen2ForCausalLM"],
  "model_type": "qwen2",
  "vocab_size": 8,
  "hidden_size": 16,
  "intermediate_size": 32,
  "num_hidden_layers": 1,
  "num_attention_heads": 2,
  "num_key_value_heads": 1,
  "max_position_embeddings": 32,
  "sliding_window": 32,
  "max_window_layers": 1,
  "tie_word_embeddings": false,
  "rope_theta": 10000.0,
  "rms_norm_eps": 1e-6,
  "use_sliding_window": false,
  "hidden_act": "silu",
  "eos_token_id": 0
}"#;

pub const TINY_LLAMA_CONFIG: &str = r#"{
  "architectures": ["LlamaForCausalLM"],
  "model_type": "llama",
  "vocab_size": 8,
  "hidden_size": 16,
  "intermediate_size": 32,
  "num_hidden_layers": 1,
  "num_attention_heads": 2,
  "num_key_value_heads": 1,
  "max_position_embeddings": 32,
  "rms_norm_eps": 1e-6,
  "rope_theta": 10000.0,
  "tie_word_embeddings": false,
  "bos_token_id": 0,
  "eos_token_id": 0
}"#;

/// Write tokenizer.json and tokenizer_config.json
pub fn write_tokenizer(dir: &Path) -> Result<()> {
    write_tokenizer_with_padding(dir, serde_json::Value::Null)
}

/// Same as `write_tokenizer`, with a `padding` section in tokenizer.json
pub fn write_tokenizer_with_padding(dir: &Path, padding: serde_json::Value) -> Result<()> {
    let vocab: serde_json::Map<String, serde_json::Value> = TINY_VOCAB
        .iter()
        .enumerate()
        .map(|(id, token)| (token.to_string(), serde_json::json!(id)))
        .collect();

    let tokenizer = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": padding,
        "added_tokens": [{
            "id": 0,
            "content": "<|endoftext|>",
            "single_word": false,
            "lstrip": false,
            "rstrip": false,
            "normalized": false,
            "special": true
        }],
        "normalizer": null,
        "pre_tokenizer": { "type": "WhitespaceSplit" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "<unk>"
        }
    });

    std::fs::write(dir.join(TOKENIZER_FILE), serde_json::to_string(&tokenizer)?)?;
    std::fs::write(
        dir.join(TOKENIZER_CONFIG_FILE),
        r#"{"eos_token": "<|endoftext|>"}"#,
    )?;
    Ok(())
}

/// Write config.json and random safetensors weights
pub fn write_model(dir: &Path) -> Result<()> {
    std::fs::write(dir.join(CONFIG_FILE), TINY_CONFIG)?;

    let config: Qwen2Config = serde_json::from_str(TINY_CONFIG)?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let _model = Qwen2Model::new(&config, vb)?;
    varmap.save(dir.join("model.safetensors"))?;
    Ok(())
}

/// Write a complete artifact directory
pub fn write_artifact(dir: &Path) -> Result<()> {
    write_model(dir)?;
    write_tokenizer(dir)
}

/// Write config.json and random safetensors weights for a Llama model
pub fn write_llama_model(dir: &Path) -> Result<()> {
    std::fs::write(dir.join(CONFIG_FILE), TINY_LLAMA_CONFIG)?;

    let config: LlamaConfig = serde_json::from_str(TINY_LLAMA_CONFIG)?;
    let config = config.into_config(false);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let _model = Llama::load(vb, &config)?;
    varmap.save(dir.join("model.safetensors"))?;
    Ok(())
}

/// Write a complete Llama artifact directory
pub fn write_llama_artifact(dir: &Path) -> Result<()> {
    write_llama_model(dir)?;
    write_tokenizer(dir)
}
