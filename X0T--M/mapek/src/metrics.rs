//! Consciousness model produced by the Analyze phase.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Raw metrics gathered by the Monitor phase, keyed by metric name.
pub type RawMetrics = IndexMap<String, f64>;

/// Coarse system-health state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsciousnessState {
    /// Everything well above target.
    Euphoric,
    /// Healthy steady state.
    Harmonic,
    /// Mild degradation, worth watching.
    Contemplative,
    /// Severe degradation.
    Mystical,
}

impl ConsciousnessState {
    /// Upper-case label used in logs and audit payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Euphoric => "EUPHORIC",
            Self::Harmonic => "HARMONIC",
            Self::Contemplative => "CONTEMPLATIVE",
            Self::Mystical => "MYSTICAL",
        }
    }

    /// Gauge encoding: 4 for Euphoric down to 1 for Mystical.
    #[must_use]
    pub const fn as_numeric(self) -> f64 {
        match self {
            Self::Euphoric => 4.0,
            Self::Harmonic => 3.0,
            Self::Contemplative => 2.0,
            Self::Mystical => 1.0,
        }
    }

    /// States that are recorded to the audit trail.
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::Euphoric | Self::Mystical)
    }

    /// States below the healthy band.
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Contemplative | Self::Mystical)
    }
}

impl fmt::Display for ConsciousnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored view of one Monitor sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsciousnessMetrics {
    /// Golden-ratio-relative health score.
    pub phi_ratio: f64,
    /// Discrete state derived from `phi_ratio`.
    pub state: ConsciousnessState,
    /// Alignment with the reference frequency, 0..=1.
    pub frequency_alignment: f64,
    /// Volatility of recent scores, 0..=1.
    pub entropy: f64,
    /// Combined phi/alignment index, 0..=1.
    pub harmony_index: f64,
    /// Mesh-only health score, 0..=1.
    pub mesh_health: f64,
    /// Scoring time.
    pub timestamp: DateTime<Utc>,
    /// The Monitor sample this score was computed from.
    #[serde(default)]
    pub raw_metrics: RawMetrics,
}

impl ConsciousnessMetrics {
    /// Gauge names and values exported to the metrics sink.
    #[must_use]
    pub fn to_prometheus_format(&self) -> IndexMap<String, f64> {
        let mut out = IndexMap::with_capacity(6);
        out.insert("consciousness_phi_ratio".to_owned(), self.phi_ratio);
        out.insert("consciousness_state".to_owned(), self.state.as_numeric());
        out.insert(
            "consciousness_frequency_alignment".to_owned(),
            self.frequency_alignment,
        );
        out.insert("consciousness_entropy".to_owned(), self.entropy);
        out.insert("consciousness_harmony_index".to_owned(), self.harmony_index);
        out.insert("mesh_health_score".to_owned(), self.mesh_health);
        out
    }

    /// Looks up a raw metric.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<f64> {
        self.raw_metrics.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(state: ConsciousnessState) -> ConsciousnessMetrics {
        ConsciousnessMetrics {
            phi_ratio: 1.618,
            state,
            frequency_alignment: 1.0,
            entropy: 0.1,
            harmony_index: 1.0,
            mesh_health: 0.95,
            timestamp: Utc::now(),
            raw_metrics: RawMetrics::new(),
        }
    }

    #[test]
    fn prometheus_format_encodes_state() {
        let gauges = sample(ConsciousnessState::Euphoric).to_prometheus_format();
        assert_eq!(gauges.len(), 6);
        assert!((gauges["consciousness_phi_ratio"] - 1.618).abs() < f64::EPSILON);
        assert!((gauges["consciousness_state"] - 4.0).abs() < f64::EPSILON);
        assert!(gauges.contains_key("mesh_health_score"));
    }

    #[test]
    fn numeric_mapping_is_ordered() {
        let values: Vec<f64> = [
            ConsciousnessState::Mystical,
            ConsciousnessState::Contemplative,
            ConsciousnessState::Harmonic,
            ConsciousnessState::Euphoric,
        ]
        .iter()
        .map(|state| state.as_numeric())
        .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn serializes_upper_case() {
        let json = serde_json::to_string(&ConsciousnessState::Contemplative).unwrap();
        assert_eq!(json, "\"CONTEMPLATIVE\"");
        assert!(ConsciousnessState::Mystical.is_critical());
        assert!(!ConsciousnessState::Harmonic.is_degraded());
    }
}
