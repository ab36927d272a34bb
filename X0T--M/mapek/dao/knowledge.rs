use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument};

use super::ipfs::ContentStore;
use crate::error::MapekResult;

/// Lifetime of proposals raised from critical states.
pub const DIRECTIVE_PROPOSAL_TTL: Duration = Duration::from_secs(86_400);

/// Kind of knowledge entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// One loop cycle.
    MapekState,
    /// Federated-learning model snapshot.
    FlModel,
    /// Incident report.
    Incident,
    /// Governance directive.
    Directive,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MapekState => "mapek_state",
            Self::FlModel => "fl_model",
            Self::Incident => "incident",
            Self::Directive => "directive",
        })
    }
}

/// Stored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeEntry {
    /// Unique id.
    pub entry_id: String,
    /// Entry kind.
    pub entry_type: EntryType,
    /// Payload.
    pub data: Value,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Originating node.
    pub node_id: String,
    /// Content id once mirrored.
    #[serde(default)]
    pub cid: Option<String>,
}

/// Governance proposal raised by the knowledge store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proposal {
    /// Proposal id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Voting window.
    pub duration: Duration,
    /// Entry that triggered it.
    pub source_entry: String,
}

/// Receiver of governance proposals.
#[async_trait]
pub trait ProposalSink: Send + Sync {
    /// Opens a proposal and returns its id.
    async fn create_proposal(
        &self,
        title: &str,
        description: &str,
        duration: Duration,
        source_entry: &str,
    ) -> MapekResult<String>;
}

/// Proposal sink keeping proposals in memory.
#[derive(Debug, Default)]
pub struct LocalProposalBook {
    proposals: Mutex<Vec<Proposal>>,
}

impl LocalProposalBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Proposals opened so far.
    #[must_use]
    pub fn proposals(&self) -> Vec<Proposal> {
        self.proposals.lock().clone()
    }
}

#[async_trait]
impl ProposalSink for LocalProposalBook {
    async fn create_proposal(
        &self,
        title: &str,
        description: &str,
        duration: Duration,
        source_entry: &str,
    ) -> MapekResult<String> {
        let mut proposals = self.proposals.lock();
        let id = format!("proposal-{}", proposals.len() + 1);
        proposals.push(Proposal {
            id: id.clone(),
            title: title.to_owned(),
            description: description.to_owned(),
            duration,
            source_entry: source_entry.to_owned(),
        });
        Ok(id)
    }
}

/// Local knowledge cache, optionally mirrored to a content store.
#[derive(Clone, Default)]
pub struct KnowledgeStorage {
    cache: Arc<RwLock<IndexMap<String, KnowledgeEntry>>>,
    sequence: Arc<AtomicU64>,
    store: Option<Arc<dyn ContentStore>>,
    proposals: Option<Arc<dyn ProposalSink>>,
}

impl fmt::Debug for KnowledgeStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeStorage")
            .field("entries", &self.cache.read().len())
            .field("mirrored", &self.store.is_some())
            .field("proposals", &self.proposals.is_some())
            .finish()
    }
}

impl KnowledgeStorage {
    /// Cache-only storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirrors entries to `store`.
    #[must_use]
    pub fn with_content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Raises proposals for critical states.
    #[must_use]
    pub fn with_proposal_sink(mut self, sink: Arc<dyn ProposalSink>) -> Self {
        self.proposals = Some(sink);
        self
    }

    /// Stores one cycle; proposes a directive when the state is critical.
    #[instrument(skip(self, data))]
    pub async fn store_mapek_state(&self, data: Value, node_id: &str) -> String {
        let entry_id = self.time_id("mapek");
        let critical = matches!(
            data.pointer("/metrics/state").and_then(Value::as_str),
            Some("EUPHORIC" | "MYSTICAL")
        );
        let entry = self
            .insert(entry_id, EntryType::MapekState, data, node_id)
            .await;
        if critical {
            self.propose_directive(&entry).await;
        }
        entry.entry_id
    }

    /// Stores a model snapshot for a federated round.
    #[instrument(skip(self, data))]
    pub async fn store_fl_model(&self, data: Value, round: u64) -> String {
        self.insert(format!("fl-model-{round}"), EntryType::FlModel, data, "coordinator")
            .await
            .entry_id
    }

    /// Stores an incident report.
    #[instrument(skip(self, data))]
    pub async fn store_incident(&self, data: Value, node_id: &str) -> String {
        let entry_id = self.time_id("incident");
        self.insert(entry_id, EntryType::Incident, data, node_id)
            .await
            .entry_id
    }

    /// Looks up an entry.
    #[must_use]
    pub fn get_entry(&self, entry_id: &str) -> Option<KnowledgeEntry> {
        self.cache.read().get(entry_id).cloned()
    }

    /// Entries in insertion order, optionally of one type.
    #[must_use]
    pub fn list_entries(&self, entry_type: Option<EntryType>) -> Vec<KnowledgeEntry> {
        self.cache
            .read()
            .values()
            .filter(|entry| entry_type.is_none() || entry_type == Some(entry.entry_type))
            .cloned()
            .collect()
    }

    /// Entries cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    fn time_id(&self, prefix: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{}-{seq}", Utc::now().timestamp_millis())
    }

    async fn insert(
        &self,
        entry_id: String,
        entry_type: EntryType,
        data: Value,
        node_id: &str,
    ) -> KnowledgeEntry {
        let mut entry = KnowledgeEntry {
            entry_id,
            entry_type,
            data,
            timestamp: Utc::now(),
            node_id: node_id.to_owned(),
            cid: None,
        };
        if let Some(store) = &self.store {
            match Self::mirror(store.as_ref(), &entry).await {
                Ok(cid) => {
                    info!(entry = %entry.entry_id, %cid, kind = %entry_type, "knowledge entry stored");
                    entry.cid = Some(cid);
                }
                Err(err) => error!(entry = %entry.entry_id, error = %err, "failed to mirror knowledge entry"),
            }
        }
        self.cache
            .write()
            .insert(entry.entry_id.clone(), entry.clone());
        entry
    }

    async fn mirror(store: &dyn ContentStore, entry: &KnowledgeEntry) -> MapekResult<String> {
        let body = serde_json::to_string(entry)?;
        store.add(&body).await
    }

    async fn propose_directive(&self, entry: &KnowledgeEntry) {
        let Some(sink) = &self.proposals else {
            return;
        };
        let title = format!("Directive from {}", entry.node_id);
        match sink
            .create_proposal(
                &title,
                "Auto-generated directive from MAPE-K state",
                DIRECTIVE_PROPOSAL_TTL,
                &entry.entry_id,
            )
            .await
        {
            Ok(id) => info!(proposal = %id, "directive proposal created"),
            Err(err) => error!(error = %err, "failed to create directive proposal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dao::ipfs::MemoryContentStore, error::MapekError};
    use serde_json::json;

    struct OfflineStore;

    #[async_trait]
    impl ContentStore for OfflineStore {
        async fn add(&self, _data: &str) -> MapekResult<String> {
            Err(MapekError::Storage("content daemon unreachable".into()))
        }

        async fn get(&self, cid: &str) -> MapekResult<String> {
            Err(MapekError::ContentNotFound(cid.into()))
        }

        async fn pin(&self, _cid: &str) -> MapekResult<bool> {
            Err(MapekError::Storage("content daemon unreachable".into()))
        }
    }

    #[tokio::test]
    async fn mirrors_and_proposes_for_critical_states() {
        let store = Arc::new(MemoryContentStore::new());
        let book = Arc::new(LocalProposalBook::new());
        let knowledge = KnowledgeStorage::new()
            .with_content_store(store.clone())
            .with_proposal_sink(book.clone());

        let calm = knowledge
            .store_mapek_state(json!({ "metrics": { "state": "HARMONIC" } }), "node-1")
            .await;
        let wild = knowledge
            .store_mapek_state(json!({ "metrics": { "state": "MYSTICAL" } }), "node-1")
            .await;

        assert_ne!(calm, wild);
        assert!(calm.starts_with("mapek-"));
        let entry = knowledge.get_entry(&wild).unwrap();
        let cid = entry.cid.clone().unwrap();
        let mirrored: KnowledgeEntry =
            serde_json::from_str(&store.get(&cid).await.unwrap()).unwrap();
        assert_eq!(mirrored.entry_id, wild);
        assert!(mirrored.cid.is_none());

        let proposals = book.proposals();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].title, "Directive from node-1");
        assert_eq!(proposals[0].duration, DIRECTIVE_PROPOSAL_TTL);
        assert_eq!(proposals[0].source_entry, wild);
    }

    #[tokio::test]
    async fn lists_by_type() {
        let knowledge = KnowledgeStorage::new();
        let model = knowledge.store_fl_model(json!({ "weights": [0.1] }), 7).await;
        knowledge.store_incident(json!({ "kind": "partition" }), "node-2").await;
        knowledge.store_incident(json!({ "kind": "flap" }), "node-3").await;

        assert_eq!(model, "fl-model-7");
        assert_eq!(knowledge.get_entry(&model).unwrap().node_id, "coordinator");
        assert_eq!(knowledge.list_entries(None).len(), 3);
        let incidents = knowledge.list_entries(Some(EntryType::Incident));
        assert_eq!(incidents.len(), 2);
        assert!(incidents.iter().all(|e| e.cid.is_none()));
        assert!(knowledge.get_entry("missing").is_none());
    }

    #[tokio::test]
    async fn store_failures_keep_entries_cached_without_cid() {
        let book = Arc::new(LocalProposalBook::new());
        let knowledge = KnowledgeStorage::new()
            .with_content_store(Arc::new(OfflineStore))
            .with_proposal_sink(book.clone());

        let id = knowledge
            .store_mapek_state(json!({ "metrics": { "state": "EUPHORIC" } }), "node-4")
            .await;
        let incident = knowledge
            .store_incident(json!({ "kind": "partition" }), "node-4")
            .await;

        let entry = knowledge.get_entry(&id).unwrap();
        assert_eq!(entry.entry_type, EntryType::MapekState);
        assert!(entry.cid.is_none());
        assert!(knowledge.get_entry(&incident).unwrap().cid.is_none());
        assert_eq!(knowledge.len(), 2);

        let proposals = book.proposals();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].source_entry, id);
    }
}
