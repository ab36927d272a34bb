//! Analyze-phase scoring engine.
//!
//! [`ConsciousnessEngine`] is the seam the loop talks to. [`PhiScoringEngine`]
//! is the deterministic implementation shipped with the crate: it folds the
//! Monitor sample into sub-scores, scales them onto the golden ratio, and
//! maps the result to a [`ConsciousnessState`] and a directive table.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    directive::{AlertLevel, OperationalDirective, RoutePreference, ScalingAction},
    error::MapekResult,
    metrics::{ConsciousnessMetrics, ConsciousnessState, RawMetrics},
};

/// Golden ratio, the score of a perfectly healthy sample.
pub const PHI: f64 = 1.618_033_988_749_895;
/// Reference frequency for alignment scoring.
pub const SACRED_FREQUENCY: f64 = 108.0;
/// Target mean time to repair, minutes.
pub const MTTR_TARGET: f64 = 5.0;

const MAX_HISTORY: usize = 1000;
const TREND_WINDOW: usize = 50;
const STABLE_SLOPE_BAND: f64 = 0.01;
const ENTROPY_WINDOW: usize = 10;
const RECOVERY_WINDOW_SECS: i64 = 60;

/// Direction of the phi trend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    /// Phi rising faster than the stable band.
    Improving,
    /// Phi falling faster than the stable band.
    Degrading,
    /// Phi within the stable band.
    Stable,
    /// Not enough history to fit a slope.
    InsufficientData,
}

/// Least-squares trend over the recent phi window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendReport {
    /// Classified direction.
    pub trend: TrendDirection,
    /// Phi change per sample.
    pub slope: f64,
    /// Most recent phi.
    pub current_phi: f64,
    /// Mean phi over the window.
    pub avg_phi: f64,
    /// Samples considered.
    pub samples: usize,
}

impl TrendReport {
    fn insufficient(samples: usize, current_phi: f64) -> Self {
        Self {
            trend: TrendDirection::InsufficientData,
            slope: 0.0,
            current_phi,
            avg_phi: current_phi,
            samples,
        }
    }

    /// True when the trend is degrading.
    #[must_use]
    pub fn is_degrading(&self) -> bool {
        self.trend == TrendDirection::Degrading
    }
}

/// Scoring engine consulted by the Analyze and Plan phases.
pub trait ConsciousnessEngine: Send + Sync {
    /// Scores a Monitor sample; `swarm_risk_penalty` in 0..=1 lowers the score.
    fn get_consciousness_metrics(
        &self,
        raw: &RawMetrics,
        swarm_risk_penalty: f64,
    ) -> MapekResult<ConsciousnessMetrics>;

    /// Baseline directive for the scored state.
    fn get_operational_directive(&self, metrics: &ConsciousnessMetrics) -> OperationalDirective;

    /// Trend over recent scores.
    fn get_trend_analysis(&self) -> TrendReport;

    /// One-line narrative of the current state.
    fn get_system_thought(&self, metrics: &ConsciousnessMetrics) -> MapekResult<String>;
}

#[derive(Debug, Default)]
struct EngineState {
    phi_history: VecDeque<f64>,
    recovery_mode: bool,
    last_degraded: Option<DateTime<Utc>>,
}

/// Deterministic phi-ratio engine.
#[derive(Debug, Default)]
pub struct PhiScoringEngine {
    state: Mutex<EngineState>,
}

impl PhiScoringEngine {
    /// Creates an engine with empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Preloads phi history, e.g. when restoring from the knowledge store.
    pub fn seed_history(&self, phis: impl IntoIterator<Item = f64>) {
        let mut state = self.state.lock();
        for phi in phis {
            push_bounded(&mut state.phi_history, phi);
        }
    }

    /// Number of scores retained.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.state.lock().phi_history.len()
    }

    /// Whether the relaxed recovery thresholds are active.
    #[must_use]
    pub fn in_recovery(&self) -> bool {
        self.state.lock().recovery_mode
    }

    /// Forces recovery mode on or off.
    pub fn set_recovery(&self, enabled: bool) {
        self.state.lock().recovery_mode = enabled;
    }

    /// Phi scaled from the health of the sample.
    #[must_use]
    pub fn calculate_phi_ratio(&self, raw: &RawMetrics) -> f64 {
        let cpu = saturation_score(metric(raw, "cpu_percent", 50.0));
        let memory = saturation_score(metric(raw, "memory_percent", 50.0));
        let latency = latency_score(metric(raw, "latency_ms", 100.0));
        let loss = loss_score(metric(raw, "packet_loss", 0.0));
        let connectivity = (metric(raw, "mesh_connectivity", 0.0) / 8.0).clamp(0.0, 1.0);
        let health = (cpu + memory + latency + loss + connectivity) / 5.0;
        PHI * health
    }

    /// Alignment against [`SACRED_FREQUENCY`], or against [`PHI`] when no
    /// frequency was sampled.
    #[must_use]
    pub fn calculate_frequency_alignment(&self, phi: f64, frequency_hz: Option<f64>) -> f64 {
        let alignment = frequency_hz.map_or_else(
            || 1.0 - (phi - PHI).abs() / PHI,
            |hz| 1.0 - (hz - SACRED_FREQUENCY).abs() / SACRED_FREQUENCY,
        );
        alignment.clamp(0.0, 1.0)
    }

    /// Normalised standard deviation of the last scores; 0.5 until enough
    /// history exists.
    #[must_use]
    pub fn calculate_entropy(&self) -> f64 {
        let state = self.state.lock();
        if state.phi_history.len() < ENTROPY_WINDOW {
            return 0.5;
        }
        let recent: Vec<f64> = state
            .phi_history
            .iter()
            .rev()
            .take(ENTROPY_WINDOW)
            .copied()
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let n = recent.len() as f64;
        let mean = recent.iter().sum::<f64>() / n;
        let variance = recent.iter().map(|phi| (phi - mean).powi(2)).sum::<f64>() / n;
        (variance.sqrt() / 0.5).clamp(0.0, 1.0)
    }

    /// Mesh-only score from connectivity, loss, latency, and MTTR.
    #[must_use]
    pub fn calculate_mesh_health(&self, raw: &RawMetrics) -> f64 {
        let connectivity = (metric(raw, "mesh_connectivity", 5.0) / 10.0).clamp(0.0, 1.0);
        let loss = loss_score(metric(raw, "packet_loss", 0.0));
        let latency = latency_score(metric(raw, "latency_ms", 100.0));
        let mttr = (1.0 - metric(raw, "mttr_minutes", MTTR_TARGET) / (3.0 * MTTR_TARGET))
            .clamp(0.0, 1.0);
        ((connectivity + loss + latency + mttr) / 4.0).clamp(0.0, 1.0)
    }

    /// Maps phi to a state, tracking degradation and recovery.
    pub fn evaluate_state(&self, phi: f64) -> ConsciousnessState {
        self.evaluate_state_at(phi, Utc::now())
    }

    /// [`Self::evaluate_state`] with an explicit clock.
    pub fn evaluate_state_at(&self, phi: f64, now: DateTime<Utc>) -> ConsciousnessState {
        let mut state = self.state.lock();
        let (euphoric, harmonic, contemplative) = if state.recovery_mode {
            (1.2, 0.85, 0.65)
        } else {
            (1.4, 1.0, 0.8)
        };
        let evaluated = if phi > euphoric {
            ConsciousnessState::Euphoric
        } else if phi > harmonic {
            ConsciousnessState::Harmonic
        } else if phi > contemplative {
            ConsciousnessState::Contemplative
        } else {
            ConsciousnessState::Mystical
        };

        if evaluated.is_degraded() {
            state.last_degraded = Some(now);
        } else if state.recovery_mode {
            if evaluated == ConsciousnessState::Euphoric {
                state.recovery_mode = false;
            }
        } else if let Some(degraded_at) = state.last_degraded {
            if now - degraded_at < Duration::seconds(RECOVERY_WINDOW_SECS) {
                state.recovery_mode = true;
            }
        }
        evaluated
    }

    /// Time of the most recent degraded evaluation.
    #[must_use]
    pub fn last_degraded(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_degraded
    }
}

impl ConsciousnessEngine for PhiScoringEngine {
    fn get_consciousness_metrics(
        &self,
        raw: &RawMetrics,
        swarm_risk_penalty: f64,
    ) -> MapekResult<ConsciousnessMetrics> {
        let penalty = swarm_risk_penalty.clamp(0.0, 1.0);
        let phi = self.calculate_phi_ratio(raw) * (1.0 - penalty);
        let state = self.evaluate_state(phi);
        let frequency_alignment =
            self.calculate_frequency_alignment(phi, raw.get("frequency_hz").copied());
        let entropy = self.calculate_entropy();
        let mesh_health = self.calculate_mesh_health(raw);
        let harmony_index = ((phi / PHI + frequency_alignment) / 2.0).clamp(0.0, 1.0);

        push_bounded(&mut self.state.lock().phi_history, phi);

        Ok(ConsciousnessMetrics {
            phi_ratio: phi,
            state,
            frequency_alignment,
            entropy,
            harmony_index,
            mesh_health,
            timestamp: Utc::now(),
            raw_metrics: raw.clone(),
        })
    }

    fn get_operational_directive(&self, metrics: &ConsciousnessMetrics) -> OperationalDirective {
        let mut directive = OperationalDirective::new(metrics.state);
        match metrics.state {
            ConsciousnessState::Euphoric => {
                directive.monitoring_interval_sec = 120;
                directive.route_preference = RoutePreference::Performance;
                directive.scaling_action = ScalingAction::Optimize;
                directive.message =
                    "Wish fulfilled: the mesh is in flow, releasing idle capacity.".into();
            }
            ConsciousnessState::Harmonic => {
                directive.monitoring_interval_sec = 60;
                directive.route_preference = RoutePreference::Balanced;
                directive.message = "Everything is in balance.".into();
            }
            ConsciousnessState::Contemplative => {
                directive.monitoring_interval_sec = 30;
                directive.route_preference = RoutePreference::Reliability;
                directive.alert_level = AlertLevel::Warning;
                directive.message =
                    "Reflecting: drift detected, preferring reliable routes.".into();
            }
            ConsciousnessState::Mystical => {
                directive.monitoring_interval_sec = 10;
                directive.route_preference = RoutePreference::Survival;
                directive.scaling_action = ScalingAction::EmergencyScale;
                directive.alert_level = AlertLevel::Critical;
                directive.enable_aggressive_healing = true;
                directive.message =
                    "Descending into the depths: critical degradation, healing aggressively."
                        .into();
            }
        }
        directive
    }

    fn get_trend_analysis(&self) -> TrendReport {
        let state = self.state.lock();
        let current = state.phi_history.back().copied().unwrap_or(0.0);
        let available = state.phi_history.len();
        if available < TREND_WINDOW {
            return TrendReport::insufficient(available, current);
        }
        let window: Vec<f64> = state
            .phi_history
            .iter()
            .skip(available - TREND_WINDOW)
            .copied()
            .collect();
        let slope = least_squares_slope(&window);
        #[allow(clippy::cast_precision_loss)]
        let avg_phi = window.iter().sum::<f64>() / window.len() as f64;
        let trend = if slope > STABLE_SLOPE_BAND {
            TrendDirection::Improving
        } else if slope < -STABLE_SLOPE_BAND {
            TrendDirection::Degrading
        } else {
            TrendDirection::Stable
        };
        TrendReport {
            trend,
            slope,
            current_phi: current,
            avg_phi,
            samples: window.len(),
        }
    }

    fn get_system_thought(&self, metrics: &ConsciousnessMetrics) -> MapekResult<String> {
        let trend = self.get_trend_analysis();
        let mood = match metrics.state {
            ConsciousnessState::Euphoric => "I am thriving",
            ConsciousnessState::Harmonic => "I am at ease",
            ConsciousnessState::Contemplative => "I sense friction",
            ConsciousnessState::Mystical => "I am fighting to stay whole",
        };
        let direction = match trend.trend {
            TrendDirection::Improving => "and getting better",
            TrendDirection::Degrading => "and slipping",
            TrendDirection::Stable => "and holding steady",
            TrendDirection::InsufficientData => "though it is too early to tell where I am heading",
        };
        Ok(format!(
            "{mood} (phi={:.3}, mesh={:.2}, entropy={:.2}) {direction}.",
            metrics.phi_ratio, metrics.mesh_health, metrics.entropy
        ))
    }
}

fn metric(raw: &RawMetrics, key: &str, default: f64) -> f64 {
    raw.get(key).copied().filter(|v| v.is_finite()).unwrap_or(default)
}

/// 1.0 up to 70% utilisation, falling linearly to 0 at 100%.
fn saturation_score(percent: f64) -> f64 {
    if percent <= 70.0 {
        1.0
    } else {
        (1.0 - (percent - 70.0) / 30.0).clamp(0.0, 1.0)
    }
}

fn latency_score(latency_ms: f64) -> f64 {
    (100.0 / latency_ms.max(1.0)).min(1.0)
}

fn loss_score(loss_percent: f64) -> f64 {
    (1.0 - loss_percent / 10.0).clamp(0.0, 1.0)
}

fn push_bounded(history: &mut VecDeque<f64>, phi: f64) {
    if history.len() == MAX_HISTORY {
        history.pop_front();
    }
    history.push_back(phi);
}

#[allow(clippy::cast_precision_loss)]
fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
