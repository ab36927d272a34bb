//! The Monitor-Analyze-Plan-Execute-Knowledge control loop.
//!
//! One cycle awaits each phase in turn. A failed cycle is logged and retried
//! after a fixed backoff; the interval between successful cycles comes from
//! the directive the cycle produced.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::json;
use shared_logging::LogLevel;
use tokio::sync::Notify;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    collaborators::{
        ActionDispatcher, FixedProbe, GaugeSink, MeshNetwork, NodeInventory, PrometheusExporter,
        SwarmAnalyzer, SwarmTask, SystemProbe, SystemSample, ZeroTrustValidator,
    },
    dao::{AuditLogger, KnowledgeStorage},
    directive::{OperationalDirective, ScalingAction, DEFAULT_MONITORING_INTERVAL_SEC},
    engine::ConsciousnessEngine,
    error::MapekResult,
    metrics::{ConsciousnessMetrics, ConsciousnessState, RawMetrics},
    state::{MapekState, StateHistory, DEFAULT_HISTORY_CAPACITY},
    telemetry::MapekTelemetry,
};

const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(10);
const DEFAULT_THOUGHT_FREQUENCY: u64 = 10;
const PREMIUM_FAILURE_MESSAGE: &str =
    "Emergency: premium node failure detected. Overriding to aggressive healing.";

/// Builder for [`MapekLoop`].
pub struct MapekLoopBuilder {
    node_id: String,
    engine: Arc<dyn ConsciousnessEngine>,
    mesh: Arc<dyn MeshNetwork>,
    zero_trust: Arc<dyn ZeroTrustValidator>,
    probe: Arc<dyn SystemProbe>,
    gauges: Arc<dyn GaugeSink>,
    inventory: Option<Arc<dyn NodeInventory>>,
    swarm: Option<Arc<dyn SwarmAnalyzer>>,
    dispatcher: Option<Arc<dyn ActionDispatcher>>,
    audit: Option<AuditLogger>,
    knowledge: Option<KnowledgeStorage>,
    telemetry: Option<MapekTelemetry>,
    initial_interval: Duration,
    error_backoff: Duration,
    history_capacity: usize,
    thought_frequency: u64,
}

impl MapekLoopBuilder {
    /// Starts from the three required collaborators.
    #[must_use]
    pub fn new(
        engine: Arc<dyn ConsciousnessEngine>,
        mesh: Arc<dyn MeshNetwork>,
        zero_trust: Arc<dyn ZeroTrustValidator>,
    ) -> Self {
        Self {
            node_id: "node-local".into(),
            engine,
            mesh,
            zero_trust,
            probe: Arc::new(FixedProbe::default()),
            gauges: Arc::new(PrometheusExporter::new()),
            inventory: None,
            swarm: None,
            dispatcher: None,
            audit: None,
            knowledge: None,
            telemetry: None,
            initial_interval: Duration::from_secs(DEFAULT_MONITORING_INTERVAL_SEC),
            error_backoff: DEFAULT_ERROR_BACKOFF,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            thought_frequency: DEFAULT_THOUGHT_FREQUENCY,
        }
    }

    /// Node id used in spans, events, and knowledge entries.
    #[must_use]
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Host probe; a fixed 50/50 probe by default.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn SystemProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Gauge sink for the Knowledge phase.
    #[must_use]
    pub fn gauges(mut self, gauges: Arc<dyn GaugeSink>) -> Self {
        self.gauges = gauges;
        self
    }

    /// Node inventory for offline, trust, and premium counts.
    #[must_use]
    pub fn inventory(mut self, inventory: Arc<dyn NodeInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Swarm used to derive the risk penalty.
    #[must_use]
    pub fn swarm(mut self, swarm: Arc<dyn SwarmAnalyzer>) -> Self {
        self.swarm = Some(swarm);
        self
    }

    /// Dispatcher for governance actions.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Audit logger for critical states.
    #[must_use]
    pub fn audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Knowledge storage mirroring every cycle.
    #[must_use]
    pub fn knowledge(mut self, knowledge: KnowledgeStorage) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Structured log and event sinks.
    #[must_use]
    pub fn telemetry(mut self, telemetry: MapekTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Interval before the first directive overrides it.
    #[must_use]
    pub const fn initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Wait after a failed cycle.
    #[must_use]
    pub const fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Cycle records kept in memory.
    #[must_use]
    pub const fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Produce a system thought every `every` cycles.
    #[must_use]
    pub const fn thought_frequency(mut self, every: u64) -> Self {
        self.thought_frequency = every;
        self
    }

    /// Builds the loop.
    #[must_use]
    pub fn build(self) -> MapekLoop {
        MapekLoop {
            node_id: self.node_id,
            engine: self.engine,
            mesh: self.mesh,
            zero_trust: self.zero_trust,
            probe: self.probe,
            gauges: self.gauges,
            inventory: self.inventory,
            swarm: self.swarm,
            dispatcher: self.dispatcher,
            audit: self.audit,
            knowledge: self.knowledge,
            telemetry: self.telemetry,
            history: RwLock::new(StateHistory::new(self.history_capacity)),
            cycle_count: AtomicU64::new(0),
            loop_interval_secs: AtomicU64::new(self.initial_interval.as_secs().max(1)),
            error_backoff: self.error_backoff,
            thought_frequency: self.thought_frequency.max(1),
            last_thought: RwLock::new(None),
            running: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }
}

/// Autonomic control loop.
pub struct MapekLoop {
    node_id: String,
    engine: Arc<dyn ConsciousnessEngine>,
    mesh: Arc<dyn MeshNetwork>,
    zero_trust: Arc<dyn ZeroTrustValidator>,
    probe: Arc<dyn SystemProbe>,
    gauges: Arc<dyn GaugeSink>,
    inventory: Option<Arc<dyn NodeInventory>>,
    swarm: Option<Arc<dyn SwarmAnalyzer>>,
    dispatcher: Option<Arc<dyn ActionDispatcher>>,
    audit: Option<AuditLogger>,
    knowledge: Option<KnowledgeStorage>,
    telemetry: Option<MapekTelemetry>,
    history: RwLock<StateHistory>,
    cycle_count: AtomicU64,
    loop_interval_secs: AtomicU64,
    error_backoff: Duration,
    thought_frequency: u64,
    last_thought: RwLock<Option<String>>,
    running: AtomicBool,
    wake: Notify,
}

impl std::fmt::Debug for MapekLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapekLoop")
            .field("node_id", &self.node_id)
            .field("cycle_count", &self.cycle_count())
            .field("loop_interval", &self.loop_interval())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl MapekLoop {
    /// Returns a builder.
    #[must_use]
    pub fn builder(
        engine: Arc<dyn ConsciousnessEngine>,
        mesh: Arc<dyn MeshNetwork>,
        zero_trust: Arc<dyn ZeroTrustValidator>,
    ) -> MapekLoopBuilder {
        MapekLoopBuilder::new(engine, mesh, zero_trust)
    }

    /// Runs cycles until [`Self::stop`] is called.
    pub async fn start(&self) {
        self.drive(None).await;
    }

    /// Runs at most `cycles` attempts, failed ones included, then returns.
    pub async fn start_bounded(&self, cycles: u64) {
        self.drive(Some(cycles)).await;
    }

    /// Requests shutdown and interrupts any pending sleep.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        info!(node_id = %self.node_id, "mapek loop stop requested");
    }

    async fn drive(&self, limit: Option<u64>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(node_id = %self.node_id, "mapek loop already running");
            return;
        }
        // A stop() from an earlier run may have left a permit behind.
        let _ = self.wake.notified().now_or_never();
        info!(node_id = %self.node_id, "mapek loop started");

        let mut attempts = 0_u64;
        let exhausted = |attempts: u64| limit.is_some_and(|max| attempts >= max);
        while self.is_running() && !exhausted(attempts) {
            attempts += 1;
            let wait = match self.run_cycle().await {
                Ok(_) => self.loop_interval(),
                Err(err) => {
                    error!(node_id = %self.node_id, error = %err, "mapek cycle failed");
                    if let Some(tel) = &self.telemetry {
                        let payload = json!({ "error": err.to_string() });
                        let _ = tel.log(LogLevel::Error, "mapek.cycle.failed", payload.clone());
                        let _ = tel.publish("mapek.cycle.failed", payload).await;
                    }
                    self.error_backoff
                }
            };
            if exhausted(attempts) {
                break;
            }
            self.sleep_unless_stopped(wait).await;
        }

        self.running.store(false, Ordering::SeqCst);
        info!(node_id = %self.node_id, cycles = self.cycle_count(), "mapek loop stopped");
    }

    async fn sleep_unless_stopped(&self, wait: Duration) {
        if !self.is_running() {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            () = self.wake.notified() => {}
        }
    }

    /// Runs one full cycle and returns the recorded state.
    pub async fn run_cycle(&self) -> MapekResult<MapekState> {
        let started = Instant::now();
        let cycle = self.cycle_count() + 1;
        let node = self.node_id.as_str();

        let raw = self
            .monitor()
            .instrument(info_span!("mapek.monitor", node_id = %node, cycle))
            .await?;
        let metrics = self
            .analyze(raw)
            .instrument(info_span!("mapek.analyze", node_id = %node, cycle))
            .await?;
        let directive = {
            let _span = info_span!("mapek.plan", node_id = %node, cycle).entered();
            self.plan(&metrics)
        };
        let actions = self
            .execute(&directive)
            .instrument(info_span!("mapek.execute", node_id = %node, cycle))
            .await?;
        let state = self
            .knowledge(metrics, directive, actions)
            .instrument(info_span!("mapek.knowledge", node_id = %node, cycle))
            .await;

        let cycle = self.cycle_count.fetch_add(1, Ordering::SeqCst) + 1;
        let duration = started.elapsed();
        info!(
            node_id = %node,
            cycle,
            state = %state.metrics.state,
            phi = format_args!("{:.3}", state.metrics.phi_ratio),
            duration_ms = duration.as_millis(),
            "mapek cycle complete"
        );
        if let Some(tel) = &self.telemetry {
            let payload = json!({
                "cycle": cycle,
                "state": state.metrics.state,
                "phi_ratio": state.metrics.phi_ratio,
                "duration_ms": duration.as_millis(),
                "actions": state.actions_taken,
            });
            let _ = tel.log(LogLevel::Info, "mapek.cycle.completed", payload.clone());
            let _ = tel.publish("mapek.cycle.completed", payload).await;
        }

        if cycle % self.thought_frequency == 0 {
            match self.engine.get_system_thought(&state.metrics) {
                Ok(thought) => {
                    info!(node_id = %node, %thought, "system thought");
                    *self.last_thought.write() = Some(thought);
                }
                Err(err) => warn!(error = %err, "failed to generate system thought"),
            }
        }

        self.loop_interval_secs
            .store(state.directives.monitoring_interval_sec.max(1), Ordering::SeqCst);
        Ok(state)
    }

    #[allow(clippy::cast_precision_loss)]
    async fn monitor(&self) -> MapekResult<RawMetrics> {
        let mut raw = RawMetrics::new();

        let sample = match self.probe.sample().await {
            Ok(sample) => sample,
            Err(err) => {
                warn!(error = %err, "system probe failed, using neutral sample");
                SystemSample {
                    cpu_percent: 50.0,
                    memory_percent: 50.0,
                }
            }
        };
        raw.insert("cpu_percent".into(), sample.cpu_percent);
        raw.insert("memory_percent".into(), sample.memory_percent);

        let mesh = self.mesh.get_statistics().await?;
        raw.insert("mesh_connectivity".into(), mesh.active_peers.unwrap_or(0.0));
        raw.insert("latency_ms".into(), mesh.avg_latency_ms.unwrap_or(100.0));
        raw.insert("packet_loss".into(), mesh.packet_loss_percent.unwrap_or(0.0));
        raw.insert("mttr_minutes".into(), mesh.mttr_minutes.unwrap_or(5.0));

        let zero_trust = self.zero_trust.validation_stats().await?;
        raw.insert(
            "zero_trust_success_rate".into(),
            zero_trust.rate().unwrap_or(0.95),
        );

        let snapshot = match &self.inventory {
            Some(inventory) => match inventory.snapshot().await {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    warn!(error = %err, "node inventory unavailable");
                    None
                }
            },
            None => None,
        };
        match snapshot {
            Some(snapshot) => {
                raw.insert("offline_nodes".into(), snapshot.offline_nodes as f64);
                raw.insert("low_trust_nodes".into(), snapshot.low_trust_nodes as f64);
                raw.insert(
                    "premium_nodes_online".into(),
                    snapshot.premium_nodes_online as f64,
                );
                if snapshot.premium_node_failure {
                    raw.insert("premium_node_failure".into(), 1.0);
                }
            }
            None => {
                raw.insert("offline_nodes".into(), 0.0);
            }
        }

        debug!(metrics = raw.len(), "monitor sample collected");
        Ok(raw)
    }

    async fn analyze(&self, raw: RawMetrics) -> MapekResult<ConsciousnessMetrics> {
        let mut penalty = 0.0_f64;
        if let Some(swarm) = &self.swarm {
            match swarm.execute_parallel(SwarmTask::analysis_set(&raw)).await {
                Ok(results) => {
                    for result in &results {
                        match result.risk_score() {
                            Some(risk) if risk > 0.0 => penalty = penalty.max(risk),
                            Some(_) => {}
                            None if !result.success => debug!(
                                task = %result.task_id,
                                error = result.error.as_deref().unwrap_or("unknown"),
                                "swarm task failed"
                            ),
                            None => {}
                        }
                    }
                    if penalty > 0.0 {
                        info!(penalty = format_args!("{penalty:.2}"), "swarm risk penalty applied");
                    }
                }
                Err(err) => error!(error = %err, "swarm analysis failed"),
            }
        }
        self.engine.get_consciousness_metrics(&raw, penalty)
    }

    fn plan(&self, metrics: &ConsciousnessMetrics) -> OperationalDirective {
        let mut directive = self.engine.get_operational_directive(metrics);

        if metrics.raw("premium_node_failure").unwrap_or(0.0) > 0.0 {
            directive.enable_aggressive_healing = true;
            directive.message = PREMIUM_FAILURE_MESSAGE.into();
            info!("premium SLA override: aggressive healing enabled");
        }

        if metrics.raw("low_trust_nodes").unwrap_or(0.0) > 0.0 {
            directive.audit_required = true;
            info!("low trust nodes detected, scheduling re-attestation");
        }

        let trend = self.engine.get_trend_analysis();
        if metrics.state == ConsciousnessState::Contemplative && trend.is_degrading() {
            directive.preemptive_healing = true;
            warn!(slope = trend.slope, "degrading trend, preparing preemptive healing");
        }
        directive.trend = Some(trend);
        directive
    }

    async fn execute(&self, directive: &OperationalDirective) -> MapekResult<Vec<String>> {
        let mut actions = Vec::new();

        let preference = directive.route_preference;
        if self.mesh.set_route_preference(preference).await? {
            actions.push(format!("route_preference={preference}"));
        }

        if directive.enable_aggressive_healing {
            let healed = self.mesh.trigger_aggressive_healing().await?;
            actions.push(format!("aggressive_healing={healed}_nodes"));
        }

        if directive.preemptive_healing {
            self.mesh.trigger_preemptive_checks().await?;
            actions.push("preemptive_healing_initiated".to_owned());
        }

        if directive.scaling_action != ScalingAction::None {
            Self::handle_scaling(directive.scaling_action);
            actions.push(format!("scaling={}", directive.scaling_action));
        }

        if let Some(dispatcher) = &self.dispatcher {
            for action in &directive.dao_actions {
                let result = dispatcher.dispatch(action).await;
                let status = if result.success { "OK" } else { "FAIL" };
                actions.push(format!("dao:{}={status}", result.action_type));
                if !result.success {
                    warn!(action = %result.action_type, detail = %result.detail, "DAO action failed");
                }
            }
        }

        Ok(actions)
    }

    fn handle_scaling(action: ScalingAction) {
        match action {
            ScalingAction::Optimize => info!("optimizing resource allocation"),
            ScalingAction::EmergencyScale => error!("emergency scaling initiated"),
            ScalingAction::None => {}
        }
    }

    async fn knowledge(
        &self,
        metrics: ConsciousnessMetrics,
        directive: OperationalDirective,
        actions: Vec<String>,
    ) -> MapekState {
        for (name, value) in metrics.to_prometheus_format() {
            self.gauges.set_gauge(&name, value);
        }
        for (name, value) in &metrics.raw_metrics {
            self.gauges.set_gauge(gauge_name(name), *value);
        }

        let state = MapekState::new(metrics, directive, actions);
        self.history.write().push(state.clone());

        if !state.directives.message.is_empty() {
            info!(message = %state.directives.message, "consciousness");
        }

        if let Some(knowledge) = &self.knowledge {
            match serde_json::to_value(&state) {
                Ok(data) => {
                    knowledge.store_mapek_state(data, &self.node_id).await;
                }
                Err(err) => warn!(error = %err, "failed to encode state for knowledge storage"),
            }
        }

        if state.metrics.state.is_critical() {
            self.log_to_dao(&state).await;
        }
        state
    }

    async fn log_to_dao(&self, state: &MapekState) {
        let Some(audit) = &self.audit else {
            info!(
                state = %state.metrics.state,
                phi = state.metrics.phi_ratio,
                "DAO audit simulated, no audit logger attached"
            );
            return;
        };
        let directives = match state.directives.to_value() {
            Ok(value) => value,
            Err(err) => {
                error!(error = %err, "failed to encode directives for audit");
                return;
            }
        };
        let event = json!({
            "state": state.metrics.state,
            "phi_ratio": state.metrics.phi_ratio,
            "directives": directives,
            "actions_taken": state.actions_taken,
            "cycle_timestamp": state.timestamp.to_rfc3339(),
        });
        if let Some(cid) = audit.log_consciousness_event(event).await {
            if let Some(tel) = &self.telemetry {
                let payload = json!({ "cid": cid, "state": state.metrics.state });
                let _ = tel.log(LogLevel::Info, "mapek.audit.logged", payload.clone());
                let _ = tel.publish("mapek.audit.logged", payload).await;
            }
        }
    }

    /// Cycle records, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<MapekState> {
        self.history.read().to_vec()
    }

    /// Most recent cycle record.
    #[must_use]
    pub fn latest(&self) -> Option<MapekState> {
        self.history.read().latest().cloned()
    }

    /// Completed cycles.
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::SeqCst)
    }

    /// Wait before the next cycle.
    #[must_use]
    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_secs.load(Ordering::SeqCst))
    }

    /// Whether `start` is driving cycles.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Most recent system thought.
    #[must_use]
    pub fn last_thought(&self) -> Option<String> {
        self.last_thought.read().clone()
    }

    /// Node id.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

fn gauge_name(raw_key: &str) -> &str {
    match raw_key {
        "latency_ms" => "mesh_latency_ms",
        "cpu_percent" => "system_cpu_percent",
        "memory_percent" => "system_memory_percent",
        "packet_loss" => "mesh_packet_loss_percent",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collaborators::{
            InMemoryInventory, LocalActionDispatcher, LocalSwarm, MeshStatistics,
            MockMeshManager, NodeRecord, StaticZeroTrust,
        },
        dao::{ContentStore, MemoryContentStore},
        directive::{DaoAction, RoutePreference},
        engine::{PhiScoringEngine, TrendReport},
        error::MapekError,
    };
    use async_trait::async_trait;
    use shared_event_bus::MemoryEventBus;

    struct Fixture {
        mesh: Arc<MockMeshManager>,
        gauges: Arc<PrometheusExporter>,
        engine: Arc<PhiScoringEngine>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_mesh(MockMeshManager::default())
        }

        fn with_mesh(mesh: MockMeshManager) -> Self {
            Self {
                mesh: Arc::new(mesh),
                gauges: Arc::new(PrometheusExporter::new()),
                engine: Arc::new(PhiScoringEngine::new()),
            }
        }

        fn builder(&self) -> MapekLoopBuilder {
            MapekLoop::builder(
                self.engine.clone(),
                self.mesh.clone(),
                Arc::new(StaticZeroTrust::default()),
            )
            .node_id("node-test")
            .gauges(self.gauges.clone())
        }
    }

    fn degraded_mesh() -> MockMeshManager {
        MockMeshManager::new(MeshStatistics {
            active_peers: Some(1.0),
            avg_latency_ms: Some(400.0),
            packet_loss_percent: Some(9.0),
            mttr_minutes: Some(14.0),
        })
    }

    #[tokio::test]
    async fn healthy_cycle_optimizes_and_exports_gauges() {
        let fx = Fixture::new();
        let mapek = fx.builder().build();

        let state = mapek.run_cycle().await.unwrap();

        assert_eq!(state.metrics.state, ConsciousnessState::Euphoric);
        assert_eq!(
            state.actions_taken,
            vec!["route_preference=performance", "scaling=optimize"]
        );
        assert!(state.directives.trend.is_some());
        assert_eq!(mapek.cycle_count(), 1);
        assert_eq!(mapek.loop_interval(), Duration::from_secs(120));
        assert_eq!(mapek.history().len(), 1);
        assert_eq!(mapek.latest().unwrap(), state);

        assert!(fx.gauges.gauge("consciousness_phi_ratio").is_some());
        assert_eq!(fx.gauges.gauge("consciousness_state"), Some(4.0));
        assert_eq!(fx.gauges.gauge("mesh_latency_ms"), Some(85.0));
        assert_eq!(fx.gauges.gauge("system_cpu_percent"), Some(50.0));
        assert_eq!(fx.gauges.gauge("mesh_packet_loss_percent"), Some(0.5));
        assert_eq!(fx.gauges.gauge("zero_trust_success_rate"), Some(0.95));
        assert_eq!(fx.gauges.gauge("offline_nodes"), Some(0.0));
        assert!(fx.gauges.gauge("latency_ms").is_none());
    }

    #[tokio::test]
    async fn degraded_mesh_triggers_aggressive_healing() {
        let fx = Fixture::with_mesh(degraded_mesh());
        let mapek = fx
            .builder()
            .probe(Arc::new(FixedProbe::new(97.0, 95.0)))
            .build();

        let state = mapek.run_cycle().await.unwrap();

        assert_eq!(state.metrics.state, ConsciousnessState::Mystical);
        assert_eq!(
            state.actions_taken,
            vec![
                "route_preference=survival",
                "aggressive_healing=3_nodes",
                "scaling=emergency_scale",
            ]
        );
        assert_eq!(fx.mesh.healing_calls(), 1);
        assert_eq!(mapek.loop_interval(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn rejected_route_preference_is_not_recorded() {
        let fx = Fixture::with_mesh(degraded_mesh().accepting([
            RoutePreference::LowLatency,
            RoutePreference::Reliability,
            RoutePreference::Balanced,
        ]));
        let mapek = fx
            .builder()
            .probe(Arc::new(FixedProbe::new(97.0, 95.0)))
            .build();

        let state = mapek.run_cycle().await.unwrap();

        assert_eq!(fx.mesh.route_calls(), 1);
        assert!(!state
            .actions_taken
            .iter()
            .any(|a| a.starts_with("route_preference")));
    }

    #[tokio::test]
    async fn inventory_overrides_plan() {
        let fx = Fixture::new();
        let inventory = InMemoryInventory::new(vec![
            NodeRecord::new("rented").premium().offline(),
            NodeRecord::new("shady").trust(0.2),
        ]);
        let mapek = fx.builder().inventory(Arc::new(inventory)).build();

        let state = mapek.run_cycle().await.unwrap();

        assert!(state.directives.enable_aggressive_healing);
        assert!(state.directives.audit_required);
        assert_eq!(state.directives.message, PREMIUM_FAILURE_MESSAGE);
        assert_eq!(state.metrics.raw("offline_nodes"), Some(1.0));
        assert_eq!(state.metrics.raw("premium_node_failure"), Some(1.0));
        assert!(state
            .actions_taken
            .contains(&"aggressive_healing=3_nodes".to_owned()));
    }

    #[tokio::test]
    async fn swarm_risk_lowers_phi() {
        let baseline = Fixture::new().builder().build().run_cycle().await.unwrap();

        let swarm = LocalSwarm::new()
            .with_handler("security_analysis", |_| Ok(json!({ "risk_score": 0.5 })))
            .with_handler("performance_analysis", |_| {
                Err(MapekError::collaborator("swarm", "worker crashed"))
            })
            .with_handler("oracle_prediction", |_| Ok(json!({ "risk_score": 0.2 })));
        let penalised = Fixture::new()
            .builder()
            .swarm(Arc::new(swarm))
            .build()
            .run_cycle()
            .await
            .unwrap();

        let expected = baseline.metrics.phi_ratio * 0.5;
        assert!((penalised.metrics.phi_ratio - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn contemplative_with_degrading_trend_heals_preemptively() {
        let fx = Fixture::with_mesh(MockMeshManager::new(MeshStatistics {
            active_peers: Some(4.0),
            avg_latency_ms: Some(100.0),
            packet_loss_percent: Some(5.0),
            mttr_minutes: Some(5.0),
        }));
        fx.engine
            .seed_history((0..60).map(|i| 1.6 - f64::from(i) * 0.02));
        let mapek = fx
            .builder()
            .probe(Arc::new(FixedProbe::new(90.0, 90.0)))
            .build();

        let state = mapek.run_cycle().await.unwrap();

        assert_eq!(state.metrics.state, ConsciousnessState::Contemplative);
        assert!(state.directives.preemptive_healing);
        assert!(state
            .actions_taken
            .contains(&"preemptive_healing_initiated".to_owned()));
        assert_eq!(fx.mesh.preemptive_calls(), 1);
    }

    struct GovernedEngine(PhiScoringEngine);

    impl ConsciousnessEngine for GovernedEngine {
        fn get_consciousness_metrics(
            &self,
            raw: &RawMetrics,
            swarm_risk_penalty: f64,
        ) -> MapekResult<ConsciousnessMetrics> {
            self.0.get_consciousness_metrics(raw, swarm_risk_penalty)
        }

        fn get_operational_directive(
            &self,
            metrics: &ConsciousnessMetrics,
        ) -> OperationalDirective {
            let mut directive = self.0.get_operational_directive(metrics);
            directive.dao_actions = vec![
                DaoAction::new("restart_node").with_param("node", json!("n1")),
                DaoAction::new("burn_treasury"),
            ];
            directive
        }

        fn get_trend_analysis(&self) -> TrendReport {
            self.0.get_trend_analysis()
        }

        fn get_system_thought(&self, _metrics: &ConsciousnessMetrics) -> MapekResult<String> {
            Err(MapekError::Engine("no words".into()))
        }
    }

    #[tokio::test]
    async fn dispatches_dao_actions() {
        let dispatcher = Arc::new(LocalActionDispatcher::new(["restart_node"]));
        let mapek = MapekLoop::builder(
            Arc::new(GovernedEngine(PhiScoringEngine::new())),
            Arc::new(MockMeshManager::default()),
            Arc::new(StaticZeroTrust::default()),
        )
        .dispatcher(dispatcher.clone())
        .thought_frequency(1)
        .build();

        let state = mapek.run_cycle().await.unwrap();

        assert!(state
            .actions_taken
            .ends_with(&["dao:restart_node=OK".to_owned(), "dao:burn_treasury=FAIL".to_owned()]));
        assert_eq!(dispatcher.applied().len(), 1);
        assert!(mapek.last_thought().is_none());
    }

    #[tokio::test]
    async fn thoughts_follow_frequency() {
        let mapek = Fixture::new().builder().thought_frequency(2).build();
        mapek.run_cycle().await.unwrap();
        assert!(mapek.last_thought().is_none());
        mapek.run_cycle().await.unwrap();
        assert!(mapek.last_thought().unwrap().contains("phi="));
    }

    #[tokio::test]
    async fn critical_states_are_audited_and_mirrored() {
        let store = Arc::new(MemoryContentStore::new());
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = MapekTelemetry::builder("mapek")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let knowledge = KnowledgeStorage::new().with_content_store(store.clone());
        let mapek = Fixture::new()
            .builder()
            .audit(AuditLogger::new(store.clone()))
            .knowledge(knowledge.clone())
            .telemetry(telemetry)
            .build();

        mapek.run_cycle().await.unwrap();

        assert_eq!(knowledge.len(), 1);
        assert_eq!(store.len(), 2);
        let audited = bus.events_of_type("mapek.audit.logged");
        assert_eq!(audited.len(), 1);
        let cid = audited[0].payload["cid"].as_str().unwrap().to_owned();
        let event: serde_json::Value =
            serde_json::from_str(&store.get(&cid).await.unwrap()).unwrap();
        assert_eq!(event["state"], "EUPHORIC");
        assert!(AuditLogger::verify(&event));
        assert_eq!(bus.events_of_type("mapek.cycle.completed").len(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let mapek = Fixture::new().builder().history_capacity(2).build();
        for _ in 0..3 {
            mapek.run_cycle().await.unwrap();
        }
        assert_eq!(mapek.cycle_count(), 3);
        assert_eq!(mapek.history().len(), 2);
    }

    struct FlakyMesh;

    #[async_trait]
    impl MeshNetwork for FlakyMesh {
        async fn get_statistics(&self) -> MapekResult<MeshStatistics> {
            Err(MapekError::collaborator("mesh", "router offline"))
        }

        async fn set_route_preference(&self, _preference: RoutePreference) -> MapekResult<bool> {
            Ok(false)
        }

        async fn trigger_aggressive_healing(&self) -> MapekResult<usize> {
            Ok(0)
        }

        async fn trigger_preemptive_checks(&self) -> MapekResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_until_stopped() {
        let mapek = Arc::new(Fixture::new().builder().build());
        let runner = {
            let mapek = Arc::clone(&mapek);
            tokio::spawn(async move { mapek.start().await })
        };

        while mapek.cycle_count() < 3 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert!(mapek.is_running());
        mapek.stop();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(!mapek.is_running());
        assert!(mapek.history().len() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycles_back_off_and_report() {
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = MapekTelemetry::builder("mapek")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let mapek = MapekLoop::builder(
            Arc::new(PhiScoringEngine::new()),
            Arc::new(FlakyMesh),
            Arc::new(StaticZeroTrust::default()),
        )
        .telemetry(telemetry)
        .build();

        let started = tokio::time::Instant::now();
        mapek.start_bounded(3).await;

        assert_eq!(mapek.cycle_count(), 0);
        assert!(mapek.history().is_empty());
        assert_eq!(bus.events_of_type("mapek.cycle.failed").len(), 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(20) && waited < Duration::from_secs(21));
        assert!(!mapek.is_running());
    }

    #[tokio::test]
    async fn zero_bounded_run_is_a_no_op() {
        let fx = Fixture::new();
        let mapek = fx.builder().build();
        mapek.start_bounded(0).await;
        assert_eq!(mapek.cycle_count(), 0);
        assert!(mapek.history().is_empty());
        assert!(!mapek.is_running());

        mapek.start_bounded(1).await;
        assert_eq!(mapek.cycle_count(), 1);
    }
}
