//! Service configuration
//!
//! All knobs that differed between iterations of the service (default
//! max length, sampling parameters, monitoring) are named fields here with
//! documented defaults. A JSON file can override any subset of them.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::generation::GenerationParams;
use crate::model::{DevicePreference, WeightFormat};

/// Default artifact directory produced by the training pipeline
pub const DEFAULT_MODEL_DIR: &str = "models/causal-lm-finetuned-final";

/// Top-level configuration for the inference service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Local artifact directory (config.json, weights, tokenizer.json)
    pub model_dir: PathBuf,

    /// Device preference (auto, cuda, metal, cpu)
    pub device: DevicePreference,

    /// Model data type ("f32", "f16", "bf16")
    pub dtype: String,

    /// Format used when the model is saved back to disk
    pub save_format: WeightFormat,

    /// HTTP listener settings
    pub server: ServerConfig,

    /// Generation defaults applied to every request
    pub generation: GenerationParams,

    /// Metrics registry and background sampler settings
    pub metrics: MetricsConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            device: DevicePreference::Auto,
            dtype: "f32".to_string(),
            save_format: WeightFormat::Npz,
            server: ServerConfig::default(),
            generation: GenerationParams::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load a config from a JSON file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the artifact directory
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    /// Set the device preference
    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }

    /// Set the default max length used when a request omits it
    pub fn with_default_max_length(mut self, max_length: usize) -> Self {
        self.generation.default_max_length = max_length;
        self
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.generation.validate()?;
        self.metrics.validate()?;
        match self.dtype.as_str() {
            "f32" | "f16" | "bf16" => Ok(()),
            other => Err(anyhow!(
                "Invalid dtype: {}. Valid options: f32, f16, bf16",
                other
            )),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for `TcpListener::bind`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Monitoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Expose `GET /metrics` and run the host sampler
    pub enabled: bool,
    /// Seconds between host samples while sampling succeeds
    pub sample_interval_secs: u64,
    /// Seconds to wait after a failed sample
    pub backoff_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_secs: 15,
            backoff_interval_secs: 60,
        }
    }
}

impl MetricsConfig {
    /// Normal sampling cadence
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    /// Cadence after a sampling error
    pub fn backoff_interval(&self) -> Duration {
        Duration::from_secs(self.backoff_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.sample_interval_secs == 0 || self.backoff_interval_secs == 0 {
            return Err(anyhow!("Metrics sampling intervals must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.generation.default_max_length, 16);
        assert_eq!(config.generation.temperature, 0.7);
        assert_eq!(config.generation.top_p, Some(0.95));
        assert_eq!(config.generation.top_k, Some(50));
        assert!(config.generation.seed.is_none());
        assert_eq!(config.metrics.sample_interval(), Duration::from_secs(15));
        assert_eq!(config.metrics.backoff_interval(), Duration::from_secs(60));
        assert_eq!(config.save_format, WeightFormat::Npz);
        assert_eq!(config.server.bind_addr(), "127.0.0.1:8000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model_dir": "/srv/model", "generation": {{"default_max_length": 50, "top_k": null}}, "server": {{"port": 9090}}}}"#
        )
        .unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/srv/model"));
        assert_eq!(config.generation.default_max_length, 50);
        assert_eq!(config.generation.top_k, None);
        assert_eq!(config.generation.top_p, Some(0.95));
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"generation": {{"default_max_length": 0}}}}"#).unwrap();
        assert!(ServiceConfig::from_file(file.path()).is_err());

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"dtype": "int4"}}"#).unwrap();
        assert!(ServiceConfig::from_file(file.path()).is_err());

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"metrics": {{"backoff_interval_secs": 0}}}}"#).unwrap();
        assert!(ServiceConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ServiceConfig::from_file("/nonexistent/lmserve.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_builder() {
        let config = ServiceConfig::default()
            .with_model_dir("/tmp/artifact")
            .with_device(DevicePreference::Cpu)
            .with_default_max_length(32);
        assert_eq!(config.model_dir, PathBuf::from("/tmp/artifact"));
        assert_eq!(config.device, DevicePreference::Cpu);
        assert_eq!(config.generation.default_max_length, 32);
    }
}
