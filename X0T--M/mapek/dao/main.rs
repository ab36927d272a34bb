//! Audit and knowledge sinks backed by a content-addressed store.

/// Signed audit trail for critical states.
pub mod audit;
/// Content-addressed storage.
pub mod ipfs;
/// Knowledge entries and governance proposals.
pub mod knowledge;

pub use audit::AuditLogger;
pub use ipfs::{ContentStore, MemoryContentStore};
pub use knowledge::{
    EntryType, KnowledgeEntry, KnowledgeStorage, LocalProposalBook, Proposal, ProposalSink,
};
