//! Runtime entrypoints wiring the loop from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use shared_event_bus::{EventPublisher, FileEventPublisher, MemoryEventBus};
use tracing::info;

use crate::{
    collaborators::{
        FixedProbe, LocalActionDispatcher, LocalSwarm, MockMeshManager, PrometheusExporter,
        StaticZeroTrust, SysinfoProbe, SystemProbe,
    },
    config::{MapekConfig, ProbeKind},
    dao::{AuditLogger, KnowledgeStorage, LocalProposalBook, MemoryContentStore},
    engine::PhiScoringEngine,
    error::MapekResult,
    mapek_loop::MapekLoop,
    state::MapekState,
    telemetry::MapekTelemetryBuilder,
};

/// Governance actions the bundled dispatcher applies.
pub const SUPPORTED_DAO_ACTIONS: [&str; 3] = ["restart_node", "rebalance_routes", "quarantine_node"];

/// Fully wired loop with its in-process sinks.
#[derive(Debug, Clone)]
pub struct MapekRuntime {
    mapek: Arc<MapekLoop>,
    exporter: Arc<PrometheusExporter>,
    knowledge: KnowledgeStorage,
    proposals: Arc<LocalProposalBook>,
    events: Option<Arc<MemoryEventBus>>,
}

impl MapekRuntime {
    /// Bootstraps the runtime from `config`.
    pub fn bootstrap(config: &MapekConfig) -> Result<Self> {
        config.validate().context("validating mapek config")?;

        let mut events = None;
        let publisher: Arc<dyn EventPublisher> = match &config.telemetry.event_log_path {
            Some(path) => Arc::new(FileEventPublisher::new(path)?),
            None => {
                let bus = Arc::new(MemoryEventBus::new(config.telemetry.event_bus_capacity));
                events = Some(Arc::clone(&bus));
                bus
            }
        };
        let mut telemetry = MapekTelemetryBuilder::new("mapek.runtime")
            .node_id(config.node_id.clone())
            .event_publisher(publisher);
        if let Some(path) = &config.telemetry.log_path {
            telemetry = telemetry.log_path(path.clone());
        }
        let telemetry = telemetry.build().context("building mapek telemetry")?;

        let probe: Arc<dyn SystemProbe> = match config.probe {
            ProbeKind::Sysinfo => Arc::new(SysinfoProbe::new()),
            ProbeKind::Fixed => Arc::new(FixedProbe::default()),
        };

        let store = Arc::new(MemoryContentStore::new());
        let proposals = Arc::new(LocalProposalBook::new());
        let knowledge = KnowledgeStorage::new()
            .with_content_store(store.clone())
            .with_proposal_sink(proposals.clone());
        let exporter = Arc::new(PrometheusExporter::new().with_namespace("x0t"));

        let mut builder = MapekLoop::builder(
            Arc::new(PhiScoringEngine::new()),
            Arc::new(MockMeshManager::default()),
            Arc::new(StaticZeroTrust::default()),
        )
        .node_id(config.node_id.clone())
        .probe(probe)
        .gauges(exporter.clone())
        .swarm(Arc::new(LocalSwarm::with_default_heuristics()))
        .dispatcher(Arc::new(LocalActionDispatcher::new(SUPPORTED_DAO_ACTIONS)))
        .telemetry(telemetry)
        .initial_interval(config.default_interval())
        .error_backoff(config.error_backoff())
        .history_capacity(config.history_capacity)
        .thought_frequency(config.thought_frequency);
        if config.audit.enabled {
            builder = builder.audit(AuditLogger::new(store));
        }
        if config.audit.knowledge {
            builder = builder.knowledge(knowledge.clone());
        }

        info!(node_id = %config.node_id, probe = ?config.probe, "mapek runtime bootstrapped");
        Ok(Self {
            mapek: Arc::new(builder.build()),
            exporter,
            knowledge,
            proposals,
            events,
        })
    }

    /// Runs a single cycle.
    pub async fn run_once(&self) -> MapekResult<MapekState> {
        self.mapek.run_cycle().await
    }

    /// Runs `cycles` cycles, or until [`Self::stop`] when `None`.
    pub async fn run(&self, cycles: Option<u64>) {
        match cycles {
            Some(limit) => self.mapek.start_bounded(limit).await,
            None => self.mapek.start().await,
        }
    }

    /// Stops a running loop.
    pub fn stop(&self) {
        self.mapek.stop();
    }

    /// The loop itself.
    #[must_use]
    pub fn mapek(&self) -> Arc<MapekLoop> {
        Arc::clone(&self.mapek)
    }

    /// Prometheus text exposition of the current gauges.
    #[must_use]
    pub fn render_metrics(&self) -> String {
        self.exporter.render()
    }

    /// Knowledge storage shared with the loop.
    #[must_use]
    pub const fn knowledge(&self) -> &KnowledgeStorage {
        &self.knowledge
    }

    /// Governance proposals raised so far.
    #[must_use]
    pub fn proposals(&self) -> Arc<LocalProposalBook> {
        Arc::clone(&self.proposals)
    }

    /// In-memory event bus, when no event log file is configured.
    #[must_use]
    pub fn events(&self) -> Option<Arc<MemoryEventBus>> {
        self.events.clone()
    }
}
