//! Background host resource sampler
//!
//! A single long-lived task, independent of request handling, that writes
//! one CPU/RAM utilization sample per tick. The sampler is an owned object
//! with an explicit start/stop handle; there is no ambient global state.
//! Per-tick failures are logged and swallowed, never fatal to the loop.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

use crate::models::ResourceSample;
use crate::observability::ServiceMetrics;
use crate::store::ResultStore;

/// Sampler lifecycle. Stopping means a stop was requested and the task is
/// finishing its current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Configuration for the sampling loop.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Tick period (default: 1 second).
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Source of host-wide utilization readings.
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> anyhow::Result<HostReading>;
}

/// One host-wide reading, both values in percent (0-100).
#[derive(Debug, Clone, Copy)]
pub struct HostReading {
    pub cpu_percent: f32,
    pub ram_percent: f32,
}

/// Production probe backed by sysinfo.
///
/// CPU usage is computed from the delta between refreshes, so the first
/// tick after startup reads near zero.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self) -> anyhow::Result<HostReading> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let ram_percent = if total == 0 {
            0.0
        } else {
            self.system.used_memory() as f32 / total as f32 * 100.0
        };

        Ok(HostReading {
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
            ram_percent,
        })
    }
}

struct Active {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owned handle to the background sampling task.
///
/// `start` and `stop` are idempotent; `stop` returns only after the
/// in-flight tick has completed.
pub struct HostSampler {
    store: Arc<dyn ResultStore>,
    metrics: ServiceMetrics,
    config: SamplerConfig,
    probe: Option<Box<dyn ResourceProbe>>,
    state: Arc<AtomicU8>,
    active: Option<Active>,
}

impl HostSampler {
    pub fn new(store: Arc<dyn ResultStore>, metrics: ServiceMetrics, config: SamplerConfig) -> Self {
        Self {
            store,
            metrics,
            config,
            probe: None,
            state: Arc::new(AtomicU8::new(STATE_IDLE)),
            active: None,
        }
    }

    /// Replace the probe used on the next `start`. Tests inject mocks here.
    pub fn with_probe(mut self, probe: Box<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn state(&self) -> SamplerState {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => SamplerState::Running,
            STATE_STOPPING => SamplerState::Stopping,
            STATE_STOPPED => SamplerState::Stopped,
            _ => SamplerState::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SamplerState::Running
    }

    /// Spawn the sampling task. A no-op while the task is already running.
    pub fn start(&mut self) {
        if self.active.is_some() {
            return;
        }

        let probe = self
            .probe
            .take()
            .unwrap_or_else(|| Box::new(SysinfoProbe::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.state.store(STATE_RUNNING, Ordering::SeqCst);
        let task = tokio::spawn(sample_loop(
            probe,
            Arc::clone(&self.store),
            self.metrics.clone(),
            self.config.clone(),
            Arc::clone(&self.state),
            shutdown_rx,
        ));

        self.active = Some(Active {
            shutdown: shutdown_tx,
            task,
        });
    }

    /// Signal the task to stop and wait for it to finish its current tick.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        self.state.store(STATE_STOPPING, Ordering::SeqCst);
        let _ = active.shutdown.send(true);
        if let Err(e) = active.task.await {
            warn!(error = %e, "Sampler task ended abnormally");
            self.state.store(STATE_STOPPED, Ordering::SeqCst);
        }
    }
}

async fn sample_loop(
    mut probe: Box<dyn ResourceProbe>,
    store: Arc<dyn ResultStore>,
    metrics: ServiceMetrics,
    config: SamplerConfig,
    state: Arc<AtomicU8>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_ms = config.interval.as_millis() as u64,
        "Starting resource sampling loop"
    );

    let mut ticker = interval(config.interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match probe.sample() {
                    Ok(reading) => {
                        let sample = ResourceSample {
                            sampled_at: Utc::now(),
                            cpu_percent: reading.cpu_percent,
                            ram_percent: reading.ram_percent,
                        };
                        match store.append_sample(sample).await {
                            Ok(()) => metrics.inc_sample_recorded(),
                            Err(e) => {
                                metrics.inc_sampler_error();
                                warn!(error = %e, "Failed to persist resource sample");
                            }
                        }
                    }
                    Err(e) => {
                        metrics.inc_sampler_error();
                        warn!(error = %e, "Resource probe failed, skipping tick");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Stopping resource sampling loop");
                break;
            }
        }
    }

    state.store(STATE_STOPPED, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::sync::atomic::AtomicUsize;

    /// Probe returning fixed readings, counting calls.
    struct FixedProbe {
        calls: Arc<AtomicUsize>,
    }

    impl ResourceProbe for FixedProbe {
        fn sample(&mut self) -> anyhow::Result<HostReading> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HostReading {
                cpu_percent: 25.0,
                ram_percent: 60.0,
            })
        }
    }

    /// Probe that fails on every other call.
    struct FlakyProbe {
        calls: Arc<AtomicUsize>,
    }

    impl ResourceProbe for FlakyProbe {
        fn sample(&mut self) -> anyhow::Result<HostReading> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                anyhow::bail!("transient probe failure");
            }
            Ok(HostReading {
                cpu_percent: 10.0,
                ram_percent: 50.0,
            })
        }
    }

    fn test_sampler(
        store: &SqliteStore,
        probe: Box<dyn ResourceProbe>,
        interval: Duration,
    ) -> HostSampler {
        HostSampler::new(
            Arc::new(store.clone()),
            ServiceMetrics::new(),
            SamplerConfig { interval },
        )
        .with_probe(probe)
    }

    #[tokio::test]
    async fn test_sampler_records_samples() {
        let store = SqliteStore::open_in_memory().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = Box::new(FixedProbe {
            calls: Arc::clone(&calls),
        });
        let mut sampler = test_sampler(&store, probe, Duration::from_millis(10));

        assert_eq!(sampler.state(), SamplerState::Idle);
        sampler.start();
        assert!(sampler.is_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        sampler.stop().await;

        assert_eq!(sampler.state(), SamplerState::Stopped);
        let samples = store.samples_in_range(None, None).await.unwrap();
        assert!(!samples.is_empty());
        assert!(calls.load(Ordering::SeqCst) >= samples.len());
        assert!(samples.iter().all(|s| s.cpu_percent == 25.0));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let probe = Box::new(FixedProbe {
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let mut sampler = test_sampler(&store, probe, Duration::from_millis(10));

        sampler.start();
        sampler.stop().await;
        sampler.stop().await;

        assert_eq!(sampler.state(), SamplerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_safe() {
        let store = SqliteStore::open_in_memory().unwrap();
        let probe = Box::new(FixedProbe {
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let mut sampler = test_sampler(&store, probe, Duration::from_millis(10));

        sampler.stop().await;
        assert_eq!(sampler.state(), SamplerState::Idle);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let store = SqliteStore::open_in_memory().unwrap();
        let probe = Box::new(FixedProbe {
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let mut sampler = test_sampler(&store, probe, Duration::from_millis(10));

        sampler.start();
        sampler.start();
        assert!(sampler.is_running());
        sampler.stop().await;
    }

    #[tokio::test]
    async fn test_probe_errors_do_not_stop_the_loop() {
        let store = SqliteStore::open_in_memory().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = Box::new(FlakyProbe {
            calls: Arc::clone(&calls),
        });
        let mut sampler = test_sampler(&store, probe, Duration::from_millis(10));

        sampler.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        sampler.stop().await;

        // The loop survived failing ticks and kept sampling.
        assert!(calls.load(Ordering::SeqCst) >= 3);
        let samples = store.samples_in_range(None, None).await.unwrap();
        assert!(!samples.is_empty());
    }
}
