//! Generation parameters
//!
//! Every sampling knob is an explicit field so that deployments differ by
//! configuration rather than by code.

use anyhow::{anyhow, Result};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use serde::{Deserialize, Serialize};

/// Sampling and length defaults applied to every generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Max total length (prompt + continuation) when a request omits it
    pub default_max_length: usize,

    /// Softmax temperature; 0.0 switches to greedy decoding
    pub temperature: f64,

    /// Nucleus sampling threshold (None = disabled)
    pub top_p: Option<f64>,

    /// Top-k truncation (None = disabled)
    pub top_k: Option<usize>,

    /// Sampler seed; None draws a fresh seed per call, so repeated calls
    /// with the same prompt may differ
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            default_max_length: 16,
            temperature: 0.7,
            top_p: Some(0.95),
            top_k: Some(50),
            seed: None,
        }
    }
}

impl GenerationParams {
    /// Set the default max length
    pub fn with_default_max_length(mut self, max_length: usize) -> Self {
        self.default_max_length = max_length;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set top-p
    pub fn with_top_p(mut self, top_p: Option<f64>) -> Self {
        self.top_p = top_p;
        self
    }

    /// Set top-k
    pub fn with_top_k(mut self, top_k: Option<usize>) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check ranges
    pub fn validate(&self) -> Result<()> {
        if self.default_max_length == 0 {
            return Err(anyhow!("default_max_length must be positive"));
        }
        if !(self.temperature >= 0.0) {
            return Err(anyhow!("temperature must be >= 0, got {}", self.temperature));
        }
        if let Some(p) = self.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(anyhow!("top_p must be in (0, 1], got {}", p));
            }
        }
        if self.top_k == Some(0) {
            return Err(anyhow!("top_k must be positive when set"));
        }
        Ok(())
    }

    /// Sampling strategy for candle's logits processor
    pub fn sampling(&self) -> Sampling {
        let temperature = self.temperature;
        if temperature <= 0.0 {
            return Sampling::ArgMax;
        }
        match (self.top_k, self.top_p) {
            (Some(k), Some(p)) => Sampling::TopKThenTopP { k, p, temperature },
            (Some(k), None) => Sampling::TopK { k, temperature },
            (None, Some(p)) => Sampling::TopP { p, temperature },
            (None, None) => Sampling::All { temperature },
        }
    }

    /// Fresh logits processor for one generation call
    pub fn logits_processor(&self) -> LogitsProcessor {
        let seed = self.seed.unwrap_or_else(rand::random);
        LogitsProcessor::from_sampling(seed, self.sampling())
    }
}
