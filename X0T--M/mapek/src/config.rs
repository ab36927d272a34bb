//! TOML configuration for the loop and its runtime wiring.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    directive::DEFAULT_MONITORING_INTERVAL_SEC,
    error::{MapekError, MapekResult},
    state::DEFAULT_HISTORY_CAPACITY,
};

/// Host probe backing the Monitor phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Live host counters.
    #[default]
    Sysinfo,
    /// Constant 50/50 sample.
    Fixed,
}

/// Loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapekConfig {
    /// Node id stamped on logs, events, and knowledge entries.
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Interval before the first directive sets one.
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u64,
    /// Wait after a failed cycle.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Cycle records kept in memory.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Produce a system thought every N cycles.
    #[serde(default = "default_thought_frequency")]
    pub thought_frequency: u64,
    /// Host probe.
    #[serde(default)]
    pub probe: ProbeKind,
    /// Log and event sinks.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    /// Audit and knowledge sinks.
    #[serde(default)]
    pub audit: AuditSettings,
}

/// Telemetry sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelemetrySettings {
    /// JSON-lines log file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// JSON-lines event file; the in-memory bus is used when unset.
    #[serde(default)]
    pub event_log_path: Option<PathBuf>,
    /// In-memory bus backlog.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_path: None,
            event_log_path: None,
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

/// Audit trail and knowledge mirroring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditSettings {
    /// Sign and store critical states.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Mirror every cycle into knowledge storage.
    #[serde(default = "default_true")]
    pub knowledge: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            knowledge: true,
        }
    }
}

impl Default for MapekConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            default_interval_secs: default_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            history_capacity: default_history_capacity(),
            thought_frequency: default_thought_frequency(),
            probe: ProbeKind::default(),
            telemetry: TelemetrySettings::default(),
            audit: AuditSettings::default(),
        }
    }
}

impl MapekConfig {
    /// Loads and validates a TOML file. Relative sink paths resolve against
    /// the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading mapek config {}", path.display()))?;
        let mut config =
            Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let base = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        for slot in [
            &mut config.telemetry.log_path,
            &mut config.telemetry.event_log_path,
        ] {
            if let Some(p) = slot.as_mut() {
                if p.is_relative() {
                    *p = base.join(&*p);
                }
            }
        }
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero intervals and capacities.
    pub fn validate(&self) -> MapekResult<()> {
        let checks = [
            (self.default_interval_secs == 0, "default_interval_secs must be > 0"),
            (self.error_backoff_secs == 0, "error_backoff_secs must be > 0"),
            (self.history_capacity == 0, "history_capacity must be > 0"),
            (self.thought_frequency == 0, "thought_frequency must be > 0"),
            (
                self.telemetry.event_bus_capacity == 0,
                "telemetry.event_bus_capacity must be > 0",
            ),
            (self.node_id.trim().is_empty(), "node_id must not be empty"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(MapekError::Config((*reason).to_owned())),
            None => Ok(()),
        }
    }

    /// Initial loop interval.
    #[must_use]
    pub const fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_secs)
    }

    /// Backoff after a failed cycle.
    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

fn default_node_id() -> String {
    "node-local".into()
}

const fn default_interval_secs() -> u64 {
    DEFAULT_MONITORING_INTERVAL_SEC
}

const fn default_error_backoff_secs() -> u64 {
    10
}

const fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

const fn default_thought_frequency() -> u64 {
    10
}

const fn default_event_bus_capacity() -> usize {
    256
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_uses_defaults() {
        let config = MapekConfig::from_toml_str("").unwrap();
        assert_eq!(config, MapekConfig::default());
        assert_eq!(config.default_interval(), Duration::from_secs(60));
        assert_eq!(config.error_backoff(), Duration::from_secs(10));
        assert_eq!(config.history_capacity, 10_000);
    }

    #[test]
    fn rejects_zero_values() {
        let err = MapekConfig::from_toml_str("history_capacity = 0").unwrap_err();
        assert!(err.to_string().contains("history_capacity"));
        assert!(MapekConfig::from_toml_str("[telemetry]\nevent_bus_capacity = 0").is_err());
        assert!(MapekConfig::from_toml_str("node_id = \"  \"").is_err());
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mapek.toml");
        fs::write(
            &path,
            r#"
node_id = "edge-3"
probe = "fixed"
thought_frequency = 5

[telemetry]
log_path = "logs/loop.jsonl"

[audit]
enabled = false
"#,
        )
        .unwrap();
        let config = MapekConfig::load(&path).unwrap();
        assert_eq!(config.node_id, "edge-3");
        assert_eq!(config.probe, ProbeKind::Fixed);
        assert_eq!(config.thought_frequency, 5);
        assert_eq!(
            config.telemetry.log_path.as_deref(),
            Some(dir.path().join("logs/loop.jsonl").as_path())
        );
        assert!(!config.audit.enabled);
        assert!(config.audit.knowledge);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = MapekConfig::load("/nonexistent/mapek.toml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/mapek.toml"));
    }
}
