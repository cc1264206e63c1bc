//! Background host resource sampler
//!
//! Samples CPU and memory usage on a fixed cadence and publishes them as
//! gauges. A failed sample is logged and the next attempt waits for the
//! backoff interval instead; the first successful sample restores the
//! normal cadence.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::MetricsRecorder;
use crate::config::MetricsConfig;

/// One host resource reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemUsage {
    /// Global CPU usage in percent
    pub cpu_percent: f64,
    /// Memory in use, in bytes
    pub ram_used_bytes: u64,
}

/// Source of host resource readings
pub trait SystemStats: Send + 'static {
    fn sample(&mut self) -> Result<SystemUsage>;
}

/// `sysinfo`-backed host stats
pub struct SysinfoStats {
    system: System,
}

impl SysinfoStats {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for SysinfoStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStats for SysinfoStats {
    fn sample(&mut self) -> Result<SystemUsage> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            bail!("Host resource sampling is not supported on this platform");
        }

        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        if self.system.total_memory() == 0 {
            bail!("Memory information unavailable");
        }

        Ok(SystemUsage {
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            ram_used_bytes: self.system.used_memory(),
        })
    }
}

/// Handle to a running sampler task
pub struct SamplerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Stop the sampler and wait for the task to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Metrics sampler task ended abnormally: {}", e);
        }
    }
}

/// Delay before the next sample given the outcome of the last one
pub fn next_interval(sample_ok: bool, config: &MetricsConfig) -> Duration {
    if sample_ok {
        config.sample_interval()
    } else {
        config.backoff_interval()
    }
}

/// Spawn the sampling loop on the current tokio runtime.
///
/// The first sample is taken immediately.
pub fn spawn_sampler<P: SystemStats>(
    metrics: Arc<MetricsRecorder>,
    mut stats: P,
    config: &MetricsConfig,
) -> SamplerHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let config = config.clone();

    let task = tokio::spawn(async move {
        tracing::debug!(
            "Metrics sampler started ({:?} cadence, {:?} backoff)",
            config.sample_interval(),
            config.backoff_interval()
        );

        loop {
            let sample_ok = match stats.sample() {
                Ok(usage) => {
                    metrics.set_system_usage(&usage);
                    true
                }
                Err(e) => {
                    tracing::warn!(
                        "System metrics sampling failed: {:#}; retrying in {:?}",
                        e,
                        config.backoff_interval()
                    );
                    false
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(next_interval(sample_ok, &config)) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        tracing::debug!("Metrics sampler stopped");
    });

    SamplerHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails on the listed (0-based) calls and records when each call ran
    struct ScriptedStats {
        calls: Arc<Mutex<Vec<Instant>>>,
        failing_calls: Vec<usize>,
    }

    impl SystemStats for ScriptedStats {
        fn sample(&mut self) -> Result<SystemUsage> {
            let mut calls = self.calls.lock().unwrap();
            let call = calls.len();
            calls.push(Instant::now());
            if self.failing_calls.contains(&call) {
                return Err(anyhow!("sampling failure"));
            }
            Ok(SystemUsage {
                cpu_percent: 42.0,
                ram_used_bytes: 2048,
            })
        }
    }

    #[test]
    fn test_next_interval() {
        let config = MetricsConfig::default();
        assert_eq!(next_interval(true, &config), Duration::from_secs(15));
        assert_eq!(next_interval(false, &config), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_backs_off_after_error() {
        let metrics = Arc::new(MetricsRecorder::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let stats = ScriptedStats {
            calls: Arc::clone(&calls),
            failing_calls: vec![1],
        };

        let handle = spawn_sampler(Arc::clone(&metrics), stats, &MetricsConfig::default());
        tokio::time::sleep(Duration::from_secs(95)).await;
        handle.shutdown().await;

        let calls = calls.lock().unwrap();
        let gaps: Vec<u64> = calls
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_secs())
            .collect();
        assert_eq!(gaps, vec![15, 60, 15]);
        assert_eq!(metrics.cpu_usage_percent(), 42.0);
        assert_eq!(metrics.ram_usage_bytes(), 2048.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_survives_persistent_errors() {
        let metrics = Arc::new(MetricsRecorder::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let stats = ScriptedStats {
            calls: Arc::clone(&calls),
            failing_calls: (0..10).collect(),
        };

        let handle = spawn_sampler(Arc::clone(&metrics), stats, &MetricsConfig::default());
        tokio::time::sleep(Duration::from_secs(150)).await;
        handle.shutdown().await;

        // t = 0, 60, 120
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(metrics.cpu_usage_percent(), 0.0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_promptly() {
        let metrics = Arc::new(MetricsRecorder::new());
        let handle = spawn_sampler(metrics, SysinfoStats::new(), &MetricsConfig::default());
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }
}
