//! Metrics recorder
//!
//! Process-wide registry of counters, gauges and the inference latency
//! histogram, exported in Prometheus text format. Every update is a single
//! atomic operation except the labelled validation-check counter, which
//! sits behind a mutex.

pub mod sampler;

pub use sampler::{spawn_sampler, SamplerHandle, SysinfoStats, SystemStats, SystemUsage};

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Upper bounds of the inference latency buckets, in seconds
pub const LATENCY_BUCKETS: [f64; 5] = [0.1, 0.5, 1.0, 2.0, 5.0];

/// Content type of the Prometheus text exposition format
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// `f64` gauge stored as raw bits
#[derive(Debug, Default)]
struct Gauge(AtomicU64);

impl Gauge {
    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Fixed-bucket latency histogram
#[derive(Debug)]
pub struct LatencyHistogram {
    /// Bucket upper bounds in microseconds
    bounds_us: Vec<u64>,
    /// Per-bucket counts; the extra last slot is the overflow bucket
    counts: Vec<AtomicU64>,
    sum_us: AtomicU64,
    total: AtomicU64,
}

impl LatencyHistogram {
    /// Create a histogram with bucket bounds given in seconds
    pub fn new(bounds_secs: &[f64]) -> Self {
        let mut bounds_us: Vec<u64> = bounds_secs
            .iter()
            .map(|secs| (secs * 1_000_000.0).round() as u64)
            .collect();
        bounds_us.sort_unstable();
        let counts = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds_us,
            counts,
            sum_us: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Record one observation
    pub fn observe(&self, duration: Duration) {
        let value_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let idx = self
            .bounds_us
            .iter()
            .position(|&bound| value_us <= bound)
            .unwrap_or(self.bounds_us.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(value_us, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of observations
    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Sum of observations in seconds
    pub fn sum_secs(&self) -> f64 {
        self.sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Non-cumulative count per bucket, overflow last
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.counts
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect()
    }

    fn write_prometheus(&self, out: &mut String, name: &str) {
        let counts = self.bucket_counts();
        let mut cumulative = 0u64;
        for (bound, count) in self.bounds_us.iter().zip(&counts) {
            cumulative += count;
            let le = *bound as f64 / 1_000_000.0;
            let _ = writeln!(out, "{name}_bucket{{le=\"{le:?}\"}} {cumulative}");
        }
        cumulative += counts.last().copied().unwrap_or(0);
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
        let _ = writeln!(out, "{name}_count {}", self.count());
        let _ = writeln!(out, "{name}_sum {:?}", self.sum_secs());
    }
}

/// Central registry for training, validation, inference and host metrics
#[derive(Debug)]
pub struct MetricsRecorder {
    training_steps: AtomicU64,
    training_loss: Gauge,
    validation_loss: Gauge,
    epoch_progress: Gauge,
    /// (check name, "success" | "failure") -> count
    validation_checks: Mutex<BTreeMap<(String, &'static str), u64>>,
    inference_latency: LatencyHistogram,
    cpu_usage_percent: Gauge,
    ram_usage_bytes: Gauge,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            training_steps: AtomicU64::new(0),
            training_loss: Gauge::default(),
            validation_loss: Gauge::default(),
            epoch_progress: Gauge::default(),
            validation_checks: Mutex::new(BTreeMap::new()),
            inference_latency: LatencyHistogram::new(&LATENCY_BUCKETS),
            cpu_usage_percent: Gauge::default(),
            ram_usage_bytes: Gauge::default(),
        }
    }

    /// Count one training step; the loss gauge only moves when a loss is given
    pub fn record_training_step(&self, loss: Option<f64>) {
        self.training_steps.fetch_add(1, Ordering::Relaxed);
        if let Some(loss) = loss {
            self.training_loss.set(loss);
        }
    }

    pub fn record_validation_loss(&self, loss: f64) {
        self.validation_loss.set(loss);
    }

    /// Set epoch progress; values outside [0, 1] are clamped
    pub fn record_epoch_progress(&self, fraction: f64) {
        let clamped = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        if clamped != fraction {
            tracing::warn!("Epoch progress {} outside [0, 1], clamped to {}", fraction, clamped);
        }
        self.epoch_progress.set(clamped);
    }

    /// Count one data-validation check outcome
    pub fn record_validation_check(&self, name: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        let mut checks = self
            .validation_checks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *checks.entry((name.to_string(), status)).or_insert(0) += 1;
    }

    /// Start timing one inference call.
    ///
    /// The observation is recorded when the returned guard is stopped or
    /// dropped, whichever happens first.
    pub fn time_inference(&self) -> InferenceTimer<'_> {
        InferenceTimer {
            histogram: &self.inference_latency,
            start: Instant::now(),
            recorded: false,
        }
    }

    /// Publish one host resource sample
    pub fn set_system_usage(&self, usage: &SystemUsage) {
        self.cpu_usage_percent.set(usage.cpu_percent);
        self.ram_usage_bytes.set(usage.ram_used_bytes as f64);
    }

    pub fn training_steps(&self) -> u64 {
        self.training_steps.load(Ordering::Relaxed)
    }

    pub fn training_loss(&self) -> f64 {
        self.training_loss.get()
    }

    pub fn epoch_progress(&self) -> f64 {
        self.epoch_progress.get()
    }

    pub fn validation_check_count(&self, name: &str, success: bool) -> u64 {
        let status = if success { "success" } else { "failure" };
        self.validation_checks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(name.to_string(), status))
            .copied()
            .unwrap_or(0)
    }

    /// Inference latency histogram
    pub fn inference_latency(&self) -> &LatencyHistogram {
        &self.inference_latency
    }

    pub fn cpu_usage_percent(&self) -> f64 {
        self.cpu_usage_percent.get()
    }

    pub fn ram_usage_bytes(&self) -> f64 {
        self.ram_usage_bytes.get()
    }

    /// Export all metrics in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        write_header(&mut out, "training_steps_total", "Total training steps", "counter");
        let _ = writeln!(out, "training_steps_total {}", self.training_steps());

        write_gauge(&mut out, "training_loss", "Current training loss", self.training_loss.get());
        write_gauge(
            &mut out,
            "validation_loss",
            "Current validation loss",
            self.validation_loss.get(),
        );
        write_gauge(
            &mut out,
            "epoch_progress",
            "Progress through the current epoch (0-1)",
            self.epoch_progress.get(),
        );

        write_header(
            &mut out,
            "data_validation_checks_total",
            "Data validation check outcomes",
            "counter",
        );
        {
            let checks = self
                .validation_checks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for ((name, status), count) in checks.iter() {
                let _ = writeln!(
                    out,
                    "data_validation_checks_total{{check_name=\"{}\",status=\"{}\"}} {}",
                    escape_label(name),
                    status,
                    count
                );
            }
        }

        write_header(
            &mut out,
            "model_inference_latency_seconds",
            "Time spent generating one response",
            "histogram",
        );
        self.inference_latency
            .write_prometheus(&mut out, "model_inference_latency_seconds");

        write_gauge(&mut out, "cpu_usage_percent", "Host CPU usage", self.cpu_usage_percent.get());
        write_gauge(
            &mut out,
            "ram_usage_bytes",
            "Host memory in use",
            self.ram_usage_bytes.get(),
        );

        out
    }
}

/// Records one latency observation on `stop` or drop
#[must_use = "the observation covers the guard's lifetime"]
pub struct InferenceTimer<'a> {
    histogram: &'a LatencyHistogram,
    start: Instant,
    recorded: bool,
}

impl InferenceTimer<'_> {
    /// Record now and return the elapsed time
    pub fn stop(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if !self.recorded {
            self.recorded = true;
            self.histogram.observe(elapsed);
        }
        elapsed
    }
}

impl Drop for InferenceTimer<'_> {
    fn drop(&mut self) {
        self.record();
    }
}

fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn write_gauge(out: &mut String, name: &str, help: &str, value: f64) {
    write_header(out, name, help, "gauge");
    let _ = writeln!(out, "{name} {value:?}");
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
