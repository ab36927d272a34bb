#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! x0t MAPE-K autonomic loop: monitor, analyze, plan, execute, and knowledge
//! phases over a self-healing mesh, with signed audit and knowledge sinks.

/// Mesh, security, probe, swarm, dispatch, and gauge seams.
#[path = "../collaborators/main.rs"]
pub mod collaborators;

/// Loop configuration.
pub mod config;

/// Content store, audit logger, and knowledge storage.
#[path = "../dao/main.rs"]
pub mod dao;

/// Typed operational directives.
pub mod directive;

/// Scoring engine.
pub mod engine;

/// Error types.
pub mod error;

/// The control loop.
pub mod mapek_loop;

/// Consciousness metrics model.
pub mod metrics;

/// Cycle records and history.
pub mod state;

/// Telemetry helpers.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Runtime entrypoints and wiring.
#[path = "../main.rs"]
pub mod orchestration_entry;

pub use collaborators::{
    ActionDispatcher, GaugeSink, MeshNetwork, MockMeshManager, NodeInventory, PrometheusExporter,
    StaticZeroTrust, SwarmAnalyzer, SystemProbe, ZeroTrustValidator,
};
pub use config::{MapekConfig, ProbeKind};
pub use dao::{AuditLogger, ContentStore, KnowledgeEntry, KnowledgeStorage, MemoryContentStore};
pub use directive::{OperationalDirective, RoutePreference, ScalingAction};
pub use engine::{ConsciousnessEngine, PhiScoringEngine, TrendDirection, TrendReport};
pub use error::{MapekError, MapekResult};
pub use mapek_loop::{MapekLoop, MapekLoopBuilder};
pub use metrics::{ConsciousnessMetrics, ConsciousnessState, RawMetrics};
pub use orchestration_entry::MapekRuntime;
pub use state::{MapekState, StateHistory};
pub use telemetry::{MapekTelemetry, MapekTelemetryBuilder};
