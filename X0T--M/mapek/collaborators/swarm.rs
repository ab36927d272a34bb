use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::{MapekError, MapekResult},
    metrics::RawMetrics,
};

/// Unit of work handed to the swarm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmTask {
    /// Stable task id.
    pub task_id: String,
    /// Handler selector.
    pub task_type: String,
    /// Higher runs first when the swarm is saturated.
    pub priority: u8,
    /// Metrics under analysis.
    pub metrics: RawMetrics,
}

impl SwarmTask {
    /// Creates a task.
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        task_type: impl Into<String>,
        priority: u8,
        metrics: RawMetrics,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            priority,
            metrics,
        }
    }

    /// The three Analyze-phase tasks for one sample.
    #[must_use]
    pub fn analysis_set(metrics: &RawMetrics) -> Vec<Self> {
        vec![
            Self::new("analyze_security_logs", "security_analysis", 10, metrics.clone()),
            Self::new(
                "analyze_performance_trends",
                "performance_analysis",
                5,
                metrics.clone(),
            ),
            Self::new("predict_resource_usage", "oracle_prediction", 5, metrics.clone()),
        ]
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmTaskResult {
    /// Task id.
    pub task_id: String,
    /// Whether the handler succeeded.
    pub success: bool,
    /// Handler output; may carry `risk_score`.
    #[serde(default)]
    pub result: Value,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SwarmTaskResult {
    /// `risk_score` of a successful result.
    #[must_use]
    pub fn risk_score(&self) -> Option<f64> {
        if !self.success {
            return None;
        }
        self.result.get("risk_score").and_then(Value::as_f64)
    }
}

/// Parallel analysis backend.
#[async_trait]
pub trait SwarmAnalyzer: Send + Sync {
    /// Runs all tasks concurrently and returns one result per task.
    async fn execute_parallel(&self, tasks: Vec<SwarmTask>) -> MapekResult<Vec<SwarmTaskResult>>;
}

type Handler = Arc<dyn Fn(&RawMetrics) -> MapekResult<Value> + Send + Sync>;

/// In-process swarm dispatching tasks to handlers keyed by task type.
#[derive(Clone, Default)]
pub struct LocalSwarm {
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for LocalSwarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSwarm")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LocalSwarm {
    /// Creates a swarm without handlers; every task fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a task type.
    #[must_use]
    pub fn with_handler<F>(mut self, task_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&RawMetrics) -> MapekResult<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(task_type.into(), Arc::new(handler));
        self
    }

    /// Threshold heuristics for the three Analyze task types.
    #[must_use]
    pub fn with_default_heuristics() -> Self {
        Self::new()
            .with_handler("security_analysis", |metrics| {
                let rate = metrics.get("zero_trust_success_rate").copied().unwrap_or(1.0);
                let low_trust = metrics.get("low_trust_nodes").copied().unwrap_or(0.0);
                let risk = ((1.0 - rate) * 2.0 + low_trust * 0.1).clamp(0.0, 1.0);
                Ok(json!({ "risk_score": risk }))
            })
            .with_handler("performance_analysis", |metrics| {
                let loss = metrics.get("packet_loss").copied().unwrap_or(0.0);
                let latency = metrics.get("latency_ms").copied().unwrap_or(0.0);
                let risk = (loss / 20.0 + (latency - 200.0).max(0.0) / 1000.0).clamp(0.0, 1.0);
                Ok(json!({ "risk_score": risk }))
            })
            .with_handler("oracle_prediction", |metrics| {
                let peak = ["cpu_percent", "memory_percent"]
                    .iter()
                    .filter_map(|key| metrics.get(*key).copied())
                    .fold(0.0_f64, f64::max);
                let risk = ((peak - 90.0) / 10.0).clamp(0.0, 1.0);
                Ok(json!({ "risk_score": risk, "predicted_peak_percent": peak }))
            })
    }
}

#[async_trait]
impl SwarmAnalyzer for LocalSwarm {
    async fn execute_parallel(
        &self,
        mut tasks: Vec<SwarmTask>,
    ) -> MapekResult<Vec<SwarmTaskResult>> {
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
        let runs = tasks.into_iter().map(|task| {
            let handler = self.handlers.get(&task.task_type).cloned();
            async move {
                let outcome = handler.map_or_else(
                    || {
                        Err(MapekError::collaborator(
                            "swarm",
                            format!("no handler for {}", task.task_type),
                        ))
                    },
                    |handler| handler(&task.metrics),
                );
                match outcome {
                    Ok(result) => SwarmTaskResult {
                        task_id: task.task_id,
                        success: true,
                        result,
                        error: None,
                    },
                    Err(err) => SwarmTaskResult {
                        task_id: task.task_id,
                        success: false,
                        result: Value::Null,
                        error: Some(err.to_string()),
                    },
                }
            }
        });
        Ok(join_all(runs).await)
    }
}
