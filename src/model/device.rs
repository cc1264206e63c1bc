//! Device and dtype selection for model execution

use anyhow::{anyhow, Result};
use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};

/// Where the model's forward passes run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    Cuda,
    Metal,
    Cpu,
    #[default]
    Auto,
}

impl std::str::FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            "cpu" => Ok(Self::Cpu),
            "auto" => Ok(Self::Auto),
            _ => Err(anyhow!(
                "Invalid device preference: {}. Valid options: cuda, metal, cpu, auto",
                s
            )),
        }
    }
}

impl std::fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
            Self::Cpu => write!(f, "cpu"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Resolve a preference to a concrete device, falling back to CPU when the
/// requested accelerator is unavailable or not compiled in.
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    match preference {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Cuda => Ok(try_cuda().unwrap_or_else(|| {
            tracing::warn!("CUDA requested but unavailable, falling back to CPU");
            Device::Cpu
        })),
        DevicePreference::Metal => Ok(try_metal().unwrap_or_else(|| {
            tracing::warn!("Metal requested but unavailable, falling back to CPU");
            Device::Cpu
        })),
        DevicePreference::Auto => {
            if let Some(device) = try_cuda() {
                tracing::info!("Auto-selected: CUDA GPU");
                return Ok(device);
            }
            if let Some(device) = try_metal() {
                tracing::info!("Auto-selected: Metal GPU");
                return Ok(device);
            }
            tracing::info!("Auto-selected: CPU");
            Ok(Device::Cpu)
        }
    }
}

#[cfg(feature = "cuda")]
fn try_cuda() -> Option<Device> {
    Device::new_cuda(0)
        .map_err(|e| tracing::warn!("CUDA initialization failed: {}", e))
        .ok()
}

#[cfg(not(feature = "cuda"))]
fn try_cuda() -> Option<Device> {
    None
}

#[cfg(feature = "metal")]
fn try_metal() -> Option<Device> {
    Device::new_metal(0)
        .map_err(|e| tracing::warn!("Metal initialization failed: {}", e))
        .ok()
}

#[cfg(not(feature = "metal"))]
fn try_metal() -> Option<Device> {
    None
}

/// Parse a dtype name as used in configs ("f32", "f16", "bf16")
pub fn parse_dtype(name: &str) -> Result<DType> {
    match name {
        "f32" => Ok(DType::F32),
        "f16" => Ok(DType::F16),
        "bf16" => Ok(DType::BF16),
        _ => Err(anyhow!("Unsupported dtype: {}", name)),
    }
}
