use std::time::Duration;

/// Which namer labels clusters after a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum NamerStrategy {
    /// Keyword and string heuristics only
    Heuristic,
    /// Heuristics first, remote model for clusters the heuristics cannot name
    Model,
}

/// Tunable thresholds for the clustering engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Assign: minimum similarity to join an existing cluster
    pub join_threshold: f64,
    /// Recluster: minimum similarity for two clusters to merge
    pub merge_threshold: f64,
    /// Recluster: largest cluster allowed, in unique text groups
    pub max_cluster_size: usize,
    /// Recluster: clusters smaller than this are pooled
    pub min_cluster_size: usize,
    /// Recluster: never prune small clusters when that leaves this many or fewer
    pub min_cluster_floor: usize,

    /// Trigger: singletons created by assign before a rebuild is due
    pub singleton_debt_threshold: usize,
    /// Trigger: maximum time between rebuilds
    pub max_recluster_interval: Duration,
    /// Trigger: relative change of live pid count
    pub pid_change_ratio: f64,

    /// Embedding text keys are truncated to this many chars
    pub max_key_chars: usize,
    /// Texts per provider request
    pub embed_batch_size: usize,
    /// Assign: trailing members averaged when a cluster grows
    pub centroid_window: usize,
    /// Activity filter: memory at or below this counts as idle
    pub negligible_memory_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            join_threshold: 0.75,
            merge_threshold: 0.80,
            max_cluster_size: 25,
            min_cluster_size: 2,
            min_cluster_floor: 5,
            singleton_debt_threshold: 5,
            max_recluster_interval: Duration::from_secs(60),
            pid_change_ratio: 0.20,
            max_key_chars: 500,
            embed_batch_size: 50,
            centroid_window: 10,
            negligible_memory_bytes: 1024 * 1024,
        }
    }
}
