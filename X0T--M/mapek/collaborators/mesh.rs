use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{directive::RoutePreference, error::MapekResult};

/// Statistics reported by the mesh layer. Missing fields fall back to
/// Monitor defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MeshStatistics {
    /// Reachable peers.
    pub active_peers: Option<f64>,
    /// Mean round-trip latency.
    pub avg_latency_ms: Option<f64>,
    /// Packet loss, percent.
    pub packet_loss_percent: Option<f64>,
    /// Mean time to repair, minutes.
    pub mttr_minutes: Option<f64>,
}

/// Mesh network control surface.
#[async_trait]
pub trait MeshNetwork: Send + Sync {
    /// Current statistics.
    async fn get_statistics(&self) -> MapekResult<MeshStatistics>;

    /// Applies a routing preference; `false` when the mesh rejects it.
    async fn set_route_preference(&self, preference: RoutePreference) -> MapekResult<bool>;

    /// Forces route rediscovery; returns the number of components healed.
    async fn trigger_aggressive_healing(&self) -> MapekResult<usize>;

    /// Checks route freshness ahead of failures.
    async fn trigger_preemptive_checks(&self) -> MapekResult<()>;
}

/// Constant-returning mesh used in tests and standalone runs.
#[derive(Debug)]
pub struct MockMeshManager {
    stats: RwLock<MeshStatistics>,
    accepted: Option<Vec<RoutePreference>>,
    healed_per_call: usize,
    current_preference: RwLock<Option<RoutePreference>>,
    route_calls: AtomicUsize,
    healing_calls: AtomicUsize,
    preemptive_calls: AtomicUsize,
}

impl Default for MockMeshManager {
    fn default() -> Self {
        Self::new(MeshStatistics {
            active_peers: Some(8.0),
            avg_latency_ms: Some(85.0),
            packet_loss_percent: Some(0.5),
            mttr_minutes: Some(3.0),
        })
    }
}

impl MockMeshManager {
    /// Creates a mesh that reports `stats` and accepts every preference.
    #[must_use]
    pub fn new(stats: MeshStatistics) -> Self {
        Self {
            stats: RwLock::new(stats),
            accepted: None,
            healed_per_call: 3,
            current_preference: RwLock::new(None),
            route_calls: AtomicUsize::new(0),
            healing_calls: AtomicUsize::new(0),
            preemptive_calls: AtomicUsize::new(0),
        }
    }

    /// Limits accepted preferences, as a production router would.
    #[must_use]
    pub fn accepting(mut self, preferences: impl IntoIterator<Item = RoutePreference>) -> Self {
        self.accepted = Some(preferences.into_iter().collect());
        self
    }

    /// Components reported healed per aggressive-healing call.
    #[must_use]
    pub const fn healing_yield(mut self, healed: usize) -> Self {
        self.healed_per_call = healed;
        self
    }

    /// Replaces the reported statistics.
    pub fn set_statistics(&self, stats: MeshStatistics) {
        *self.stats.write() = stats;
    }

    /// Preference currently applied.
    #[must_use]
    pub fn route_preference(&self) -> Option<RoutePreference> {
        *self.current_preference.read()
    }

    /// `set_route_preference` invocations.
    #[must_use]
    pub fn route_calls(&self) -> usize {
        self.route_calls.load(Ordering::Relaxed)
    }

    /// `trigger_aggressive_healing` invocations.
    #[must_use]
    pub fn healing_calls(&self) -> usize {
        self.healing_calls.load(Ordering::Relaxed)
    }

    /// `trigger_preemptive_checks` invocations.
    #[must_use]
    pub fn preemptive_calls(&self) -> usize {
        self.preemptive_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MeshNetwork for MockMeshManager {
    async fn get_statistics(&self) -> MapekResult<MeshStatistics> {
        Ok(self.stats.read().clone())
    }

    async fn set_route_preference(&self, preference: RoutePreference) -> MapekResult<bool> {
        self.route_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(accepted) = &self.accepted {
            if !accepted.contains(&preference) {
                tracing::warn!(%preference, "route preference rejected");
                return Ok(false);
            }
        }
        *self.current_preference.write() = Some(preference);
        Ok(true)
    }

    async fn trigger_aggressive_healing(&self) -> MapekResult<usize> {
        self.healing_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.healed_per_call)
    }

    async fn trigger_preemptive_checks(&self) -> MapekResult<()> {
        self.preemptive_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
