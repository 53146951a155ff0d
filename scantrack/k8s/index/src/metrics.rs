use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Discovery outcome metrics for one registry instance.
#[derive(Debug, Default)]
pub struct IndexMetrics {
    discoveries: Counter,
    discovery_failures: Counter,
    kinds: Gauge,
}

impl IndexMetrics {
    pub fn register(&self, prom: &mut Registry) {
        prom.register(
            "discoveries",
            "Count of successful report-kind discoveries",
            self.discoveries.clone(),
        );
        prom.register(
            "discovery_failures",
            "Count of failed report-kind discoveries",
            self.discovery_failures.clone(),
        );
        prom.register(
            "kinds",
            "Number of report kinds in the current snapshot",
            self.kinds.clone(),
        );
    }

    pub(crate) fn discovery_succeeded(&self, kinds: usize) {
        self.discoveries.inc();
        self.kinds.set(kinds as i64);
    }

    pub(crate) fn discovery_failed(&self) {
        self.discovery_failures.inc();
    }
}
