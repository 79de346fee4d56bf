use crate::config::EngineConfig;
use crate::engine::similarity::{calculate_centroid, find_nearest_centroid};
use crate::models::{Cluster, ClusterLabel, ProcessStats};

/// Result of placing one process.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub cluster: Cluster,
    pub is_new: bool,
}

/// One process about to be placed. `vector` is `None` when its embedding
/// could not be fetched this cycle.
pub struct Candidate<'a> {
    pub pid: u32,
    pub key: &'a str,
    pub vector: Option<&'a [f32]>,
    pub stats: &'a ProcessStats,
}

/// Places `candidate` into the nearest cluster when it clears the join
/// threshold, otherwise appends a singleton. Never removes or merges clusters.
///
/// The grown cluster's centroid is averaged over its last
/// `config.centroid_window` members plus the newcomer, so it drifts from the
/// exact mean until the next full recluster. `member_vector` resolves a member
/// pid to its embedding.
///
/// Returns the index of the touched cluster and whether it was created.
pub fn assign_to_clusters<F>(
    clusters: &mut Vec<Cluster>,
    candidate: Candidate<'_>,
    singleton_label: ClusterLabel,
    config: &EngineConfig,
    member_vector: F,
) -> (usize, bool)
where
    F: Fn(u32) -> Option<Vec<f32>>,
{
    if let Some(vector) = candidate.vector {
        let nearest = find_nearest_centroid(
            vector,
            clusters
                .iter()
                .filter(|c| !c.centroid.is_empty())
                .map(|c| (c.id.as_str(), c.centroid.as_slice())),
        );

        if let Some(best) = nearest.filter(|n| n.similarity >= config.join_threshold) {
            if let Some(idx) = clusters.iter().position(|c| c.id == best.id) {
                let cluster = &mut clusters[idx];
                let start = cluster.pids.len().saturating_sub(config.centroid_window);
                let mut window: Vec<Vec<f32>> = cluster.pids[start..]
                    .iter()
                    .filter_map(|pid| member_vector(*pid))
                    .collect();
                window.push(vector.to_vec());
                cluster.centroid = calculate_centroid(&window);

                if !cluster.contains_pid(candidate.pid) {
                    cluster.pids.push(candidate.pid);
                    cluster.stats.add_process(candidate.stats);
                }
                if !cluster.text_keys.iter().any(|k| k == candidate.key) {
                    cluster.text_keys.push(candidate.key.to_string());
                }
                return (idx, false);
            }
        }
    }

    let mut singleton = Cluster::new(
        singleton_label,
        vec![candidate.pid],
        vec![candidate.key.to_string()],
        candidate.vector.map(|v| v.to_vec()).unwrap_or_default(),
    );
    singleton.stats.add_process(candidate.stats);
    clusters.push(singleton);
    (clusters.len() - 1, true)
}
