//! Seams the loop talks through, each with an in-process implementation.

/// Governance action dispatch.
pub mod dispatch;
/// Gauge sinks and the Prometheus text exporter.
pub mod exporter;
/// Node inventory snapshots.
pub mod inventory;
/// Mesh network statistics and control.
pub mod mesh;
/// Host resource probes.
pub mod probe;
/// Zero-trust validation statistics.
pub mod security;
/// Parallel swarm analysis.
pub mod swarm;

pub use dispatch::{ActionDispatcher, DispatchResult, LocalActionDispatcher};
pub use exporter::{GaugeSink, PrometheusExporter};
pub use inventory::{InMemoryInventory, NodeInventory, NodeRecord, NodeSnapshot};
pub use mesh::{MeshNetwork, MeshStatistics, MockMeshManager};
pub use probe::{FixedProbe, SysinfoProbe, SystemProbe, SystemSample};
pub use security::{StaticZeroTrust, ValidationStats, ZeroTrustValidator};
pub use swarm::{LocalSwarm, SwarmAnalyzer, SwarmTask, SwarmTaskResult};
