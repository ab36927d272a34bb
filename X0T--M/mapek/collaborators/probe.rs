use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::error::MapekResult;

/// Host utilisation sample, percentages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SystemSample {
    /// Global CPU usage.
    pub cpu_percent: f64,
    /// Used memory over total memory.
    pub memory_percent: f64,
}

/// Host resource probe.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// Takes one sample.
    async fn sample(&self) -> MapekResult<SystemSample>;
}

/// Probe backed by `sysinfo`.
///
/// CPU usage is a delta between two refreshes, so a sample taken sooner
/// than [`MINIMUM_CPU_UPDATE_INTERVAL`] after the previous refresh waits
/// out the remainder first.
pub struct SysinfoProbe {
    system: Mutex<System>,
    last_refresh: Mutex<Instant>,
}

impl std::fmt::Debug for SysinfoProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoProbe").finish_non_exhaustive()
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    /// Creates the probe and primes the CPU counters.
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            last_refresh: Mutex::new(Instant::now()),
        }
    }
}

#[async_trait]
impl SystemProbe for SysinfoProbe {
    async fn sample(&self) -> MapekResult<SystemSample> {
        let since = self.last_refresh.lock().elapsed();
        if let Some(wait) = MINIMUM_CPU_UPDATE_INTERVAL.checked_sub(since) {
            tokio::time::sleep(wait).await;
        }
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();
        *self.last_refresh.lock() = Instant::now();
        let total = system.total_memory();
        #[allow(clippy::cast_precision_loss)]
        let memory_percent = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64 * 100.0
        };
        Ok(SystemSample {
            cpu_percent: f64::from(system.global_cpu_info().cpu_usage()),
            memory_percent,
        })
    }
}

/// Probe returning a fixed sample; 50/50 by default.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    sample: SystemSample,
}

impl Default for FixedProbe {
    fn default() -> Self {
        Self::new(50.0, 50.0)
    }
}

impl FixedProbe {
    /// Creates a probe reporting the given percentages.
    #[must_use]
    pub const fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            sample: SystemSample {
                cpu_percent,
                memory_percent,
            },
        }
    }
}

#[async_trait]
impl SystemProbe for FixedProbe {
    async fn sample(&self) -> MapekResult<SystemSample> {
        Ok(self.sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_probe_defaults_to_half_load() {
        let sample = FixedProbe::default().sample().await.unwrap();
        assert!((sample.cpu_percent - 50.0).abs() < f64::EPSILON);
        assert!((sample.memory_percent - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn sysinfo_probe_reports_percentages() {
        let sample = SysinfoProbe::new().sample().await.unwrap();
        assert!(sample.cpu_percent >= 0.0);
        assert!((0.0..=100.0).contains(&sample.memory_percent));
    }

    #[tokio::test]
    async fn sysinfo_probe_spaces_cpu_refreshes() {
        let started = Instant::now();
        let probe = SysinfoProbe::new();
        probe.sample().await.unwrap();
        assert!(started.elapsed() >= MINIMUM_CPU_UPDATE_INTERVAL);

        probe.sample().await.unwrap();
        assert!(started.elapsed() >= MINIMUM_CPU_UPDATE_INTERVAL * 2);
    }
}
