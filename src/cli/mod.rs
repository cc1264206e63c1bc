//! Command-line interface
//!
//! Provides CLI commands for serve, generate, and export.

use anyhow::{bail, Context, Result};
use candle_core::Device;
use std::path::{Path, PathBuf};

use crate::config::ServiceConfig;
use crate::generation::{GenerationRequest, ModelGenerator, TextGenerator};
use crate::model::{parse_dtype, DevicePreference, ModelHandle, WeightFormat};
use crate::tokenizer::TokenizerHandle;

/// Command-line values that override the config file
#[derive(Debug, Default, Clone)]
pub struct ServeOverrides {
    pub model_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_length: Option<usize>,
    pub device: Option<String>,
    pub no_metrics: bool,
}

/// Merge the optional config file with command-line overrides
pub fn build_serve_config(
    config_path: Option<&Path>,
    overrides: ServeOverrides,
) -> Result<ServiceConfig> {
    let mut config = match config_path {
        Some(path) => {
            tracing::info!("Loading config from {:?}", path);
            ServiceConfig::from_file(path)?
        }
        None => ServiceConfig::default(),
    };

    if let Some(dir) = overrides.model_dir {
        config = config.with_model_dir(dir);
    }
    if let Some(host) = overrides.host {
        config.server.host = host;
    }
    if let Some(port) = overrides.port {
        config.server.port = port;
    }
    if let Some(max_length) = overrides.max_length {
        config = config.with_default_max_length(max_length);
    }
    if let Some(device) = overrides.device {
        config = config.with_device(device.parse::<DevicePreference>()?);
    }
    if overrides.no_metrics {
        config.metrics.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

/// Execute the serve command
pub async fn serve(config_path: Option<PathBuf>, overrides: ServeOverrides) -> Result<()> {
    let config = build_serve_config(config_path.as_deref(), overrides)?;
    crate::server::serve(config).await
}

/// Execute the generate command: one prediction printed to stdout
pub async fn generate(
    prompt: String,
    model_path: PathBuf,
    max_length: usize,
    device: String,
) -> Result<()> {
    tracing::info!("Running one-shot generation");
    tracing::info!("  Model: {:?}", model_path);
    tracing::info!("  Max length: {}", max_length);

    let config = ServiceConfig::default()
        .with_model_dir(model_path)
        .with_device(device.parse::<DevicePreference>()?)
        .with_default_max_length(max_length);
    config.validate()?;

    let request = GenerationRequest::resolve(prompt, None, max_length)?;

    let text = tokio::task::spawn_blocking(move || -> Result<String> {
        let generator = ModelGenerator::load(&config)?;
        Ok(generator.generate(&request.prompt, request.max_length)?)
    })
    .await
    .context("Generation task failed")??;

    println!("{}", text);
    Ok(())
}

/// Weight format for export: the explicit flag, else the config's
/// `save_format` (npz unless a config file says otherwise)
pub fn resolve_export_format(
    config_path: Option<&Path>,
    format: Option<&str>,
) -> Result<WeightFormat> {
    let format = match format {
        Some(format) => format.parse()?,
        None => match config_path {
            Some(path) => ServiceConfig::from_file(path)?.save_format,
            None => ServiceConfig::default().save_format,
        },
    };
    Ok(format)
}

/// Execute the export command: re-save an artifact in another weight format
pub async fn export(
    model_path: PathBuf,
    output: PathBuf,
    config_path: Option<PathBuf>,
    format: Option<String>,
) -> Result<()> {
    let format = resolve_export_format(config_path.as_deref(), format.as_deref())?;
    if !format.is_writable() {
        bail!("Cannot export to {} format; use npz or safetensors", format);
    }

    tracing::info!("Exporting model");
    tracing::info!("  Source: {:?}", model_path);
    tracing::info!("  Output: {:?}", output);
    tracing::info!("  Format: {}", format);

    let target = output.join(format.file_name());
    tokio::task::spawn_blocking(move || export_artifact(&model_path, &output, format))
        .await
        .context("Export task failed")??;

    println!("Exported model to {}", target.display());
    Ok(())
}

/// Load an artifact on CPU and write model and tokenizer into `output`
pub fn export_artifact(model_path: &Path, output: &Path, format: WeightFormat) -> Result<()> {
    let dtype = parse_dtype("f32")?;
    let model = ModelHandle::load(model_path, &Device::Cpu, dtype)?;
    let tokenizer = TokenizerHandle::load(model_path)?;

    model.save(output, format)?;
    tokenizer
        .save(output)
        .with_context(|| format!("Failed to save tokenizer to {:?}", output))?;

    tracing::info!("Export complete");
    Ok(())
}
