//! # lmserve
//!
//! Inference service for a fine-tuned causal language model.
//!
//! ## Overview
//!
//! The crate owns the glue around a trained model artifact: loading it from
//! a local directory, running sampling-based generation, serving it over
//! HTTP with latency instrumentation, and exporting Prometheus metrics.
//! Tensors, model architectures and tokenization are delegated to candle and
//! HuggingFace `tokenizers`.
//!
//! ## Architecture
//!
//! - `model` - Model holder: load, generate, save
//! - `tokenizer` - Tokenizer adapter with pad-token fallback
//! - `generation` - Text generation service and request validation
//! - `metrics` - Metrics registry and background host sampler
//! - `server` - Axum inference endpoint
//! - `config` - Service configuration
//! - `error` - Service error type
//! - `cli` - Command-line interface

pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod metrics;
pub mod model;
pub mod server;
pub mod tokenizer;

// Re-export commonly used types
pub use anyhow::{Error, Result};
pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use generation::{generate_text, GenerationParams, ModelGenerator, TextGenerator};
pub use metrics::MetricsRecorder;
pub use model::{LanguageModel, ModelHandle};
pub use server::{create_router, AppState};
pub use tokenizer::TokenizerHandle;
