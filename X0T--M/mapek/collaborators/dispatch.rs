use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::directive::DaoAction;

/// Outcome of dispatching one governance action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchResult {
    /// Action type that was dispatched.
    pub action_type: String,
    /// Whether the action was applied.
    pub success: bool,
    /// Operator-facing detail.
    pub detail: String,
}

impl DispatchResult {
    /// Successful result.
    #[must_use]
    pub fn ok(action_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            success: true,
            detail: detail.into(),
        }
    }

    /// Failed result.
    #[must_use]
    pub fn failed(action_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            success: false,
            detail: detail.into(),
        }
    }
}

/// Applies governance actions; failures are reported, not raised.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Dispatches one action.
    async fn dispatch(&self, action: &DaoAction) -> DispatchResult;
}

/// Dispatcher that accepts a fixed set of action types and records what it
/// applied.
#[derive(Debug, Default)]
pub struct LocalActionDispatcher {
    supported: HashSet<String>,
    applied: Mutex<Vec<DaoAction>>,
}

impl LocalActionDispatcher {
    /// Creates a dispatcher supporting the given action types.
    #[must_use]
    pub fn new<I, S>(supported: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supported: supported.into_iter().map(Into::into).collect(),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Actions applied so far.
    #[must_use]
    pub fn applied(&self) -> Vec<DaoAction> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl ActionDispatcher for LocalActionDispatcher {
    async fn dispatch(&self, action: &DaoAction) -> DispatchResult {
        if !self.supported.contains(&action.action_type) {
            return DispatchResult::failed(
                &action.action_type,
                format!("unsupported action type {}", action.action_type),
            );
        }
        self.applied.lock().push(action.clone());
        DispatchResult::ok(&action.action_type, "applied")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn rejects_unknown_types() {
        let dispatcher = LocalActionDispatcher::new(["restart_node"]);
        let ok = dispatcher
            .dispatch(&DaoAction::new("restart_node").with_param("node", json!("n1")))
            .await;
        let failed = dispatcher.dispatch(&DaoAction::new("slash_stake")).await;
        assert!(ok.success);
        assert!(!failed.success);
        assert_eq!(failed.action_type, "slash_stake");
        assert_eq!(dispatcher.applied().len(), 1);
    }
}
