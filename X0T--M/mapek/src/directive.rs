//! Operational directives emitted by the Plan phase.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{engine::TrendReport, metrics::ConsciousnessState};

/// Default polling interval when no directive overrides it.
pub const DEFAULT_MONITORING_INTERVAL_SEC: u64 = 60;

/// Route selection preference pushed to the mesh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutePreference {
    /// Favour throughput.
    Performance,
    /// Default mix.
    #[default]
    Balanced,
    /// Favour stable links.
    Reliability,
    /// Keep anything alive.
    Survival,
    /// Favour short paths.
    LowLatency,
}

impl RoutePreference {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Balanced => "balanced",
            Self::Reliability => "reliability",
            Self::Survival => "survival",
            Self::LowLatency => "low_latency",
        }
    }
}

impl fmt::Display for RoutePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capacity action requested by a directive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    /// Leave capacity alone.
    #[default]
    None,
    /// Scale idle resources down.
    Optimize,
    /// Emergency scale-up.
    EmergencyScale,
}

impl ScalingAction {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Optimize => "optimize",
            Self::EmergencyScale => "emergency_scale",
        }
    }
}

impl fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator alert severity attached to a directive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Nothing to report.
    #[default]
    Info,
    /// Degradation worth a look.
    Warning,
    /// Page someone.
    Critical,
}

/// Governance action forwarded to the action dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaoAction {
    /// Action type, e.g. `restart_node`.
    pub action_type: String,
    /// Action parameters.
    #[serde(default)]
    pub params: IndexMap<String, serde_json::Value>,
}

impl DaoAction {
    /// Creates an action without parameters.
    #[must_use]
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            params: IndexMap::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Directive produced for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationalDirective {
    /// State the directive was derived from.
    pub state: ConsciousnessState,
    /// Seconds until the next cycle.
    pub monitoring_interval_sec: u64,
    /// Mesh routing preference.
    pub route_preference: RoutePreference,
    /// Capacity action.
    pub scaling_action: ScalingAction,
    /// Operator alert level.
    pub alert_level: AlertLevel,
    /// Force route rediscovery and node restoration.
    #[serde(default)]
    pub enable_aggressive_healing: bool,
    /// Run preemptive route freshness checks.
    #[serde(default)]
    pub preemptive_healing: bool,
    /// Schedule re-attestation of low-trust nodes.
    #[serde(default)]
    pub audit_required: bool,
    /// Operator-facing message.
    #[serde(default)]
    pub message: String,
    /// Trend attached during planning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendReport>,
    /// Governance actions to dispatch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dao_actions: Vec<DaoAction>,
    /// Free-form keys contributed by custom engines.
    #[serde(default, flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl OperationalDirective {
    /// Baseline directive for a state; engines refine it.
    #[must_use]
    pub fn new(state: ConsciousnessState) -> Self {
        Self {
            state,
            monitoring_interval_sec: DEFAULT_MONITORING_INTERVAL_SEC,
            route_preference: RoutePreference::Balanced,
            scaling_action: ScalingAction::None,
            alert_level: AlertLevel::Info,
            enable_aggressive_healing: false,
            preemptive_healing: false,
            audit_required: false,
            message: String::new(),
            trend: None,
            dao_actions: Vec::new(),
            extra: IndexMap::new(),
        }
    }

    /// Merges free-form keys, later values winning.
    pub fn merge_extra(&mut self, extra: IndexMap<String, serde_json::Value>) {
        self.extra.extend(extra);
    }

    /// JSON object view used by audit and knowledge sinks.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
