use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{error, info, instrument, warn};

use super::ipfs::ContentStore;
use crate::error::{MapekError, MapekResult};

/// Writes signed critical-state events to a content store.
#[derive(Clone, Default)]
pub struct AuditLogger {
    store: Option<Arc<dyn ContentStore>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("connected", &self.store.is_some())
            .finish()
    }
}

impl AuditLogger {
    /// Logger writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Logger with no store; every call is skipped.
    #[must_use]
    pub const fn disconnected() -> Self {
        Self { store: None }
    }

    /// Whether a store is attached.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    /// Stamps, signs, stores, and pins `event`. Returns the content id, or
    /// `None` when there is no store or the store fails.
    #[instrument(skip_all)]
    pub async fn log_consciousness_event(&self, event: Value) -> Option<String> {
        let Some(store) = &self.store else {
            warn!("content store not available, skipping audit log");
            return None;
        };
        match Self::publish(store.as_ref(), event).await {
            Ok(cid) => {
                info!(%cid, "audit event logged");
                Some(cid)
            }
            Err(err) => {
                error!(error = %err, "failed to log audit event");
                None
            }
        }
    }

    async fn publish(store: &dyn ContentStore, event: Value) -> MapekResult<String> {
        let Value::Object(mut fields) = event else {
            return Err(MapekError::Storage("audit event must be a JSON object".into()));
        };
        #[allow(clippy::cast_precision_loss)]
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        fields.insert("timestamp".into(), Value::from(now));
        let signature = Self::sign(&Value::Object(fields.clone()));
        fields.insert("signature".into(), Value::String(signature));
        let body = serde_json::to_string(&Value::Object(fields))?;
        let cid = store.add(&body).await?;
        store.pin(&cid).await?;
        Ok(cid)
    }

    /// SHA-256 hex of the JSON encoding. Object keys serialize sorted.
    #[must_use]
    pub fn sign(event: &Value) -> String {
        hex::encode(Sha256::digest(event.to_string().as_bytes()))
    }

    /// Recomputes the signature of a stored event.
    #[must_use]
    pub fn verify(event: &Value) -> bool {
        let Some(fields) = event.as_object() else {
            return false;
        };
        let Some(signature) = fields.get("signature").and_then(Value::as_str) else {
            return false;
        };
        let mut unsigned = fields.clone();
        unsigned.remove("signature");
        Self::sign(&Value::Object(unsigned)) == signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::ipfs::MemoryContentStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct BrokenStore;

    #[async_trait]
    impl ContentStore for BrokenStore {
        async fn add(&self, _data: &str) -> MapekResult<String> {
            Err(MapekError::Storage("daemon down".into()))
        }

        async fn get(&self, cid: &str) -> MapekResult<String> {
            Err(MapekError::ContentNotFound(cid.into()))
        }

        async fn pin(&self, _cid: &str) -> MapekResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn signs_and_pins_events() {
        let store = Arc::new(MemoryContentStore::new());
        let logger = AuditLogger::new(store.clone());
        let cid = logger
            .log_consciousness_event(json!({ "state": "MYSTICAL", "phi_ratio": 0.4 }))
            .await
            .unwrap();
        assert!(cid.starts_with("Qm"));
        assert!(store.is_pinned(&cid));
        let stored: Value = serde_json::from_str(&store.get(&cid).await.unwrap()).unwrap();
        assert!(stored.get("timestamp").is_some());
        assert!(AuditLogger::verify(&stored));

        let mut tampered = stored;
        tampered["phi_ratio"] = json!(1.6);
        assert!(!AuditLogger::verify(&tampered));
    }

    #[tokio::test]
    async fn missing_or_failing_store_yields_none() {
        assert!(AuditLogger::disconnected()
            .log_consciousness_event(json!({ "state": "EUPHORIC" }))
            .await
            .is_none());
        assert!(AuditLogger::new(Arc::new(BrokenStore))
            .log_consciousness_event(json!({ "state": "EUPHORIC" }))
            .await
            .is_none());
    }

    #[test]
    fn signature_ignores_key_order() {
        let a = json!({ "b": 1, "a": { "y": 2, "x": [3, { "k": 4, "j": 5 }] } });
        let b = json!({ "a": { "x": [3, { "j": 5, "k": 4 }], "y": 2 }, "b": 1 });
        assert_eq!(AuditLogger::sign(&a), AuditLogger::sign(&b));
        assert_ne!(AuditLogger::sign(&a), AuditLogger::sign(&json!({ "b": 1 })));
    }
}
