use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::MapekResult;

/// Trust score below which an online node needs re-attestation.
pub const LOW_TRUST_THRESHOLD: f64 = 0.6;

/// Aggregate node counts fed into Monitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Nodes currently offline.
    pub offline_nodes: usize,
    /// Online nodes under the trust threshold.
    pub low_trust_nodes: usize,
    /// Rented nodes.
    pub premium_nodes_online: usize,
    /// True when any rented node is offline.
    pub premium_node_failure: bool,
}

/// Source of node counts, typically a database.
#[async_trait]
pub trait NodeInventory: Send + Sync {
    /// Counts at this instant.
    async fn snapshot(&self) -> MapekResult<NodeSnapshot>;
}

/// One node as the inventory sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    /// Node id.
    pub id: String,
    /// Reachability.
    pub online: bool,
    /// Trust score, 0..=1.
    pub trust_score: f64,
    /// Rented through the marketplace.
    pub premium: bool,
}

impl NodeRecord {
    /// Online, fully trusted, not rented.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            online: true,
            trust_score: 1.0,
            premium: false,
        }
    }

    /// Marks the node offline.
    #[must_use]
    pub const fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    /// Sets the trust score.
    #[must_use]
    pub const fn trust(mut self, score: f64) -> Self {
        self.trust_score = score;
        self
    }

    /// Marks the node as rented.
    #[must_use]
    pub const fn premium(mut self) -> Self {
        self.premium = true;
        self
    }
}

/// Inventory over an in-memory node table.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    nodes: RwLock<Vec<NodeRecord>>,
}

impl InMemoryInventory {
    /// Creates an inventory seeded with `nodes`.
    #[must_use]
    pub fn new(nodes: Vec<NodeRecord>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Inserts or replaces a node by id.
    pub fn upsert(&self, node: NodeRecord) {
        let mut nodes = self.nodes.write();
        if let Some(existing) = nodes.iter_mut().find(|n| n.id == node.id) {
            *existing = node;
        } else {
            nodes.push(node);
        }
    }
}

#[async_trait]
impl NodeInventory for InMemoryInventory {
    async fn snapshot(&self) -> MapekResult<NodeSnapshot> {
        let nodes = self.nodes.read();
        let mut snapshot = NodeSnapshot::default();
        for node in nodes.iter() {
            if node.online {
                if node.trust_score < LOW_TRUST_THRESHOLD {
                    tracing::warn!(
                        node = %node.id,
                        trust = node.trust_score,
                        "low trust node, planning re-attestation"
                    );
                    snapshot.low_trust_nodes += 1;
                }
            } else {
                snapshot.offline_nodes += 1;
            }
            if node.premium {
                snapshot.premium_nodes_online += 1;
                if !node.online {
                    tracing::error!(node = %node.id, "premium node offline, SLA breach imminent");
                    snapshot.premium_node_failure = true;
                }
            }
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_offline_low_trust_and_premium() {
        let inventory = InMemoryInventory::new(vec![
            NodeRecord::new("a"),
            NodeRecord::new("b").trust(0.3),
            NodeRecord::new("c").offline().trust(0.1),
            NodeRecord::new("d").premium(),
        ]);
        let snapshot = inventory.snapshot().await.unwrap();
        assert_eq!(snapshot.offline_nodes, 1);
        assert_eq!(snapshot.low_trust_nodes, 1);
        assert_eq!(snapshot.premium_nodes_online, 1);
        assert!(!snapshot.premium_node_failure);

        inventory.upsert(NodeRecord::new("d").premium().offline());
        let snapshot = inventory.snapshot().await.unwrap();
        assert!(snapshot.premium_node_failure);
        assert_eq!(snapshot.offline_nodes, 2);
    }
}
