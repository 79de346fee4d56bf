use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder, register_gauge_vec_with_registry, register_histogram_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry,
};
use lazy_static::lazy_static;
use std::sync::Arc;

use crate::models::Cluster;

pub struct MetricsRegistry {
    registry: Registry,

    // Gauge metrics
    pub cluster_count: IntGauge,
    pub singleton_debt: IntGauge,
    pub cluster_cpu_usage: GaugeVec,
    pub cluster_memory_bytes: GaugeVec,
    pub cluster_process_count: GaugeVec,

    // Counter metrics
    pub recluster_total: IntCounter,
    pub embedding_lookups: IntCounterVec,
    pub embedding_failures: IntCounter,

    pub recluster_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();

        let cluster_labels = &["cluster", "category"];

        // Gauge metrics
        let cluster_count = register_int_gauge_with_registry!(
            Opts::new("process_clusters", "Number of clusters currently held"),
            registry
        ).unwrap();

        let singleton_debt = register_int_gauge_with_registry!(
            Opts::new("process_cluster_singleton_debt", "Singletons created since the last full recluster"),
            registry
        ).unwrap();

        let cluster_cpu_usage = register_gauge_vec_with_registry!(
            Opts::new("process_cluster_cpu_usage", "Summed CPU usage of a cluster's live members"),
            cluster_labels,
            registry
        ).unwrap();

        let cluster_memory_bytes = register_gauge_vec_with_registry!(
            Opts::new("process_cluster_memory_bytes", "Summed resident memory of a cluster's live members"),
            cluster_labels,
            registry
        ).unwrap();

        let cluster_process_count = register_gauge_vec_with_registry!(
            Opts::new("process_cluster_processes", "Live processes in a cluster"),
            cluster_labels,
            registry
        ).unwrap();

        // Counter metrics
        let recluster_total = register_int_counter_with_registry!(
            Opts::new("process_cluster_recluster_total", "Full reclusters completed"),
            registry
        ).unwrap();

        let embedding_lookups = register_int_counter_vec_with_registry!(
            Opts::new("process_embedding_lookups_total", "Embedding lookups by the tier that answered"),
            &["source"],
            registry
        ).unwrap();

        let embedding_failures = register_int_counter_with_registry!(
            Opts::new("process_embedding_failures_total", "Embedding fetches that failed or were rejected"),
            registry
        ).unwrap();

        let recluster_duration = register_histogram_with_registry!(
            HistogramOpts::new("process_cluster_recluster_seconds", "Wall time of a full recluster")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            registry
        ).unwrap();

        Self {
            registry,
            cluster_count,
            singleton_debt,
            cluster_cpu_usage,
            cluster_memory_bytes,
            cluster_process_count,
            recluster_total,
            embedding_lookups,
            embedding_failures,
            recluster_duration,
        }
    }

    pub fn render(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// `source` is one of memory, cache or network.
    pub fn record_embedding_lookup(&self, source: &str) {
        self.embedding_lookups.with_label_values(&[source]).inc();
    }

    pub fn record_embedding_lookup_n(&self, source: &str, n: usize) {
        self.embedding_lookups.with_label_values(&[source]).inc_by(n as u64);
    }

    pub fn record_recluster(&self, seconds: f64, clusters: &[Cluster]) {
        self.recluster_total.inc();
        self.recluster_duration.observe(seconds);
        self.singleton_debt.set(0);
        self.record_cluster_stats(clusters);
    }

    /// Replaces the per-cluster gauges. Clusters sharing a name and category
    /// are summed into one series.
    pub fn record_cluster_stats(&self, clusters: &[Cluster]) {
        self.cluster_count.set(clusters.len() as i64);

        self.cluster_cpu_usage.reset();
        self.cluster_memory_bytes.reset();
        self.cluster_process_count.reset();

        for cluster in clusters {
            let labels = &[cluster.name.as_str(), cluster.category.as_str()];
            self.cluster_cpu_usage
                .with_label_values(labels)
                .add(cluster.stats.cpu_usage as f64);
            self.cluster_memory_bytes
                .with_label_values(labels)
                .add(cluster.stats.memory_bytes as f64);
            self.cluster_process_count
                .with_label_values(labels)
                .add(cluster.stats.process_count as f64);
        }
    }
}

lazy_static! {
    pub static ref METRICS: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, ClusterLabel};

    fn cluster(name: &str, cpu: f32) -> Cluster {
        let mut c = Cluster::new(
            ClusterLabel {
                name: name.to_string(),
                description: String::new(),
                category: Category::Development,
            },
            vec![1],
            Vec::new(),
            Vec::new(),
        );
        c.stats.cpu_usage = cpu;
        c.stats.process_count = 1;
        c
    }

    #[test]
    fn cluster_gauges_are_replaced_and_rendered() {
        let registry = MetricsRegistry::new();
        registry.record_cluster_stats(&[cluster("cargo", 2.0), cluster("cargo", 1.5)]);
        assert_eq!(registry.cluster_count.get(), 2);
        let cpu = registry
            .cluster_cpu_usage
            .with_label_values(&["cargo", "Development"])
            .get();
        assert!((cpu - 3.5).abs() < 1e-6);

        registry.record_cluster_stats(&[cluster("node", 1.0)]);
        let text = registry.render().unwrap();
        assert!(text.contains("process_cluster_cpu_usage{category=\"Development\",cluster=\"node\"} 1"));
        assert!(!text.contains("cluster=\"cargo\""));
    }

    #[test]
    fn lookups_are_counted_by_source() {
        let registry = MetricsRegistry::new();
        registry.record_embedding_lookup("memory");
        registry.record_embedding_lookup_n("network", 3);
        assert_eq!(registry.embedding_lookups.with_label_values(&["memory"]).get(), 1);
        assert_eq!(registry.embedding_lookups.with_label_values(&["network"]).get(), 3);
    }
}
