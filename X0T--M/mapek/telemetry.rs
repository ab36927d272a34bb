use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};

/// Builder for MAPE-K telemetry sinks.
pub struct MapekTelemetryBuilder {
    module: String,
    node_id: Option<String>,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl MapekTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            node_id: None,
            log_path: None,
            event_publisher: None,
        }
    }

    /// Tags every record with a node id.
    #[must_use]
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<MapekTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::new(path)?),
            None => None,
        };
        Ok(MapekTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                node_id: self.node_id,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared across loop components.
#[derive(Clone)]
pub struct MapekTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for MapekTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapekTelemetry")
            .field("module", &self.inner.module)
            .field("node_id", &self.inner.node_id)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    node_id: Option<String>,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl MapekTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> MapekTelemetryBuilder {
        MapekTelemetryBuilder::new(module)
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let mut record = LogRecord::new(&self.inner.module, level, message);
            if let Some(node) = &self.inner.node_id {
                record = record.with_node(node.clone());
            }
            if let Some(obj) = metadata.as_object() {
                record.metadata = obj.clone();
            }
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Publishes an event and waits for the publisher.
    pub async fn publish(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(publisher) = &self.inner.publisher {
            publisher.publish(self.record(event_type, payload)).await?;
        }
        Ok(())
    }

    fn record(&self, event_type: &str, mut payload: Value) -> EventRecord {
        if let (Some(node), Some(obj)) = (&self.inner.node_id, payload.as_object_mut()) {
            obj.entry("node_id")
                .or_insert_with(|| Value::String(node.clone()));
        }
        EventRecord::new(self.inner.module.clone(), event_type, payload)
    }
}
