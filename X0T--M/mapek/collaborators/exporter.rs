use indexmap::IndexMap;
use parking_lot::RwLock;
use prometheus::{Gauge, Opts, Registry, TextEncoder};
use tracing::warn;

/// Receiver of gauge updates.
pub trait GaugeSink: Send + Sync {
    /// Sets a gauge, creating it on first use.
    fn set_gauge(&self, name: &str, value: f64);
}

/// Gauges registered in a `prometheus` registry, rendered in the text
/// exposition format.
#[derive(Default)]
pub struct PrometheusExporter {
    namespace: Option<String>,
    registry: Registry,
    gauges: RwLock<IndexMap<String, Gauge>>,
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter")
            .field("namespace", &self.namespace)
            .field("gauges", &self.len())
            .finish_non_exhaustive()
    }
}

impl PrometheusExporter {
    /// Creates an exporter without a namespace prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes every exported name with `<namespace>_`.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Current value of a gauge, by the name it was set with.
    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.read().get(name).map(Gauge::get)
    }

    /// Gauges registered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.gauges.read().len()
    }

    /// True before the first update.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gauges.read().is_empty()
    }

    /// Renders every registered gauge.
    #[must_use]
    pub fn render(&self) -> String {
        let mut buffer = String::new();
        if let Err(err) = TextEncoder::new().encode_utf8(&self.registry.gather(), &mut buffer) {
            warn!(error = %err, "failed to encode gauges");
        }
        buffer
    }

    fn register(&self, name: &str) -> prometheus::Result<Gauge> {
        let mut opts = Opts::new(name, format!("x0t mapek gauge {name}"));
        if let Some(namespace) = &self.namespace {
            opts = opts.namespace(namespace.clone());
        }
        let gauge = Gauge::with_opts(opts)?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }
}

impl GaugeSink for PrometheusExporter {
    fn set_gauge(&self, name: &str, value: f64) {
        if let Some(gauge) = self.gauges.read().get(name) {
            gauge.set(value);
            return;
        }
        let mut gauges = self.gauges.write();
        if let Some(gauge) = gauges.get(name) {
            gauge.set(value);
            return;
        }
        match self.register(name) {
            Ok(gauge) => {
                gauge.set(value);
                gauges.insert(name.to_owned(), gauge);
            }
            Err(err) => warn!(gauge = name, error = %err, "gauge rejected by registry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_text_exposition() {
        let exporter = PrometheusExporter::new().with_namespace("x0t");
        exporter.set_gauge("consciousness_phi_ratio", 1.5);
        exporter.set_gauge("mesh_latency_ms", 85.0);
        exporter.set_gauge("consciousness_phi_ratio", 1.25);
        let text = exporter.render();
        assert!(text.contains("# HELP x0t_consciousness_phi_ratio"));
        assert!(text.contains("# TYPE x0t_consciousness_phi_ratio gauge\n"));
        assert!(text.contains("x0t_consciousness_phi_ratio 1.25\n"));
        assert!(text.contains("x0t_mesh_latency_ms 85\n"));
        assert_eq!(exporter.len(), 2);
        assert_eq!(exporter.gauge("mesh_latency_ms"), Some(85.0));
    }

    #[test]
    fn invalid_names_are_skipped() {
        let exporter = PrometheusExporter::new();
        exporter.set_gauge("mesh-latency.ms", 85.0);
        exporter.set_gauge("up", 1.0);
        assert_eq!(exporter.len(), 1);
        assert_eq!(exporter.gauge("mesh-latency.ms"), None);
        assert!(exporter.render().contains("up 1\n"));
    }
}
