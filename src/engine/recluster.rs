use std::collections::HashMap;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::engine::similarity::{calculate_centroid, cosine_similarity};
use crate::engine::text_key::descriptor_key;
use crate::models::ProcessDescriptor;

/// Pids sharing one (name, command) text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextGroup {
    pub key: String,
    pub name: String,
    pub command: String,
    pub pids: Vec<u32>,
}

/// A set of text groups (indices into the embedded group list) and their exact centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedGroup {
    pub members: Vec<usize>,
    pub centroid: Vec<f32>,
}

/// Bookkeeping the trigger policy reads.
#[derive(Debug, Clone, Copy)]
pub struct ReclusterMarks {
    pub last_recluster: Option<Instant>,
    pub singleton_debt: usize,
    pub pid_count: usize,
}

/// A rebuild is due when any condition holds: none has run yet, the fast
/// path has created enough singletons, the interval ceiling has passed, or
/// the live pid count moved by more than the configured ratio.
pub fn recluster_due(marks: &ReclusterMarks, live_pids: usize, config: &EngineConfig) -> bool {
    let Some(last) = marks.last_recluster else {
        return true;
    };
    if marks.singleton_debt >= config.singleton_debt_threshold {
        return true;
    }
    if last.elapsed() > config.max_recluster_interval {
        return true;
    }
    if marks.pid_count == 0 {
        return live_pids > 0;
    }
    let delta = (live_pids as f64 - marks.pid_count as f64).abs();
    delta / marks.pid_count as f64 > config.pid_change_ratio
}

/// Drops processes that are idle on every axis.
pub fn active_processes<'a>(
    processes: &'a [ProcessDescriptor],
    config: &EngineConfig,
) -> Vec<&'a ProcessDescriptor> {
    processes
        .iter()
        .filter(|p| !p.stats.is_idle(config.negligible_memory_bytes))
        .collect()
}

/// Groups processes by text key, in order of first appearance.
pub fn group_by_text(processes: &[&ProcessDescriptor], config: &EngineConfig) -> Vec<TextGroup> {
    let mut groups: Vec<TextGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for p in processes {
        let key = descriptor_key(p, config.max_key_chars);
        match index.get(&key) {
            Some(&i) => {
                if !groups[i].pids.contains(&p.pid) {
                    groups[i].pids.push(p.pid);
                }
            }
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(TextGroup {
                    key,
                    name: p.name.clone(),
                    command: p.command.clone(),
                    pids: vec![p.pid],
                });
            }
        }
    }
    groups
}

/// Greedy agglomerative merge over one embedding per text group.
///
/// Each round merges the most similar pair whose union stays within
/// `max_cluster_size`, provided it meets `merge_threshold`. Ties go to the
/// first pair in row-major order over the current cluster list.
pub fn agglomerate(embeddings: &[Vec<f32>], config: &EngineConfig) -> Vec<MergedGroup> {
    let mut clusters: Vec<MergedGroup> = embeddings
        .iter()
        .enumerate()
        .map(|(i, e)| MergedGroup {
            members: vec![i],
            centroid: e.clone(),
        })
        .collect();

    // sims[i][j] for j > i
    let mut sims: Vec<Vec<f64>> = (0..clusters.len())
        .map(|i| {
            (0..clusters.len())
                .map(|j| {
                    if j > i {
                        cosine_similarity(&clusters[i].centroid, &clusters[j].centroid)
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    while clusters.len() > 1 {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                if clusters[i].members.len() + clusters[j].members.len() > config.max_cluster_size {
                    continue;
                }
                let s = sims[i][j];
                if best.map_or(true, |(_, _, b)| s > b) {
                    best = Some((i, j, s));
                }
            }
        }

        let (i, j) = match best {
            Some((i, j, s)) if s >= config.merge_threshold => (i, j),
            _ => break,
        };

        let absorbed = clusters.remove(j);
        sims.remove(j);
        for row in sims.iter_mut() {
            row.remove(j);
        }

        let merged = &mut clusters[i];
        merged.members.extend(absorbed.members);
        let vectors: Vec<&[f32]> = merged.members.iter().map(|&m| embeddings[m].as_slice()).collect();
        merged.centroid = calculate_centroid(&vectors);

        for k in 0..clusters.len() {
            if k == i {
                continue;
            }
            let s = cosine_similarity(&clusters[i].centroid, &clusters[k].centroid);
            if k > i {
                sims[i][k] = s;
            } else {
                sims[k][i] = s;
            }
        }
    }

    clusters
}

/// Pools clusters below `min_cluster_size` into catch-all groups of at most
/// `max_cluster_size`, unless only `min_cluster_floor` or fewer regular
/// clusters would remain, in which case everything is kept as is.
pub fn pool_small_clusters(
    clusters: Vec<MergedGroup>,
    embeddings: &[Vec<f32>],
    config: &EngineConfig,
) -> Vec<MergedGroup> {
    let large = clusters
        .iter()
        .filter(|c| c.members.len() >= config.min_cluster_size)
        .count();
    if large <= config.min_cluster_floor {
        return clusters;
    }

    let (mut kept, small): (Vec<_>, Vec<_>) = clusters
        .into_iter()
        .partition(|c| c.members.len() >= config.min_cluster_size);

    let leftovers: Vec<usize> = small.into_iter().flat_map(|c| c.members).collect();
    for chunk in leftovers.chunks(config.max_cluster_size.max(1)) {
        let vectors: Vec<&[f32]> = chunk.iter().map(|&m| embeddings[m].as_slice()).collect();
        kept.push(MergedGroup {
            members: chunk.to_vec(),
            centroid: calculate_centroid(&vectors),
        });
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::desc;
    use std::time::Duration;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn first_run_is_always_due() {
        let marks = ReclusterMarks {
            last_recluster: None,
            singleton_debt: 0,
            pid_count: 0,
        };
        assert!(recluster_due(&marks, 0, &config()));
    }

    #[test]
    fn debt_and_pid_churn_trigger() {
        let fresh = ReclusterMarks {
            last_recluster: Some(Instant::now()),
            singleton_debt: 0,
            pid_count: 100,
        };
        assert!(!recluster_due(&fresh, 110, &config()));
        assert!(recluster_due(&fresh, 121, &config()));
        assert!(recluster_due(&fresh, 79, &config()));

        let indebted = ReclusterMarks {
            singleton_debt: 5,
            ..fresh
        };
        assert!(recluster_due(&indebted, 100, &config()));
    }

    #[test]
    fn interval_ceiling_triggers() {
        let marks = ReclusterMarks {
            last_recluster: Some(Instant::now()),
            singleton_debt: 0,
            pid_count: 10,
        };
        let cfg = EngineConfig {
            max_recluster_interval: Duration::from_millis(1),
            ..config()
        };
        std::thread::sleep(Duration::from_millis(5));
        assert!(recluster_due(&marks, 10, &cfg));
    }

    #[test]
    fn activity_filter_keeps_any_signal() {
        let mut idle = desc(1, "idle", "");
        idle.stats = Default::default();
        let mut net_only = desc(2, "net", "");
        net_only.stats = Default::default();
        net_only.stats.network_tx_bytes = 10;
        let busy = desc(3, "busy", "");

        let all = vec![idle, net_only, busy];
        let pids: Vec<u32> = active_processes(&all, &config()).iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![2, 3]);
    }

    #[test]
    fn grouping_collects_all_pids_per_text() {
        let procs = vec![
            desc(10, "node", "node server.js"),
            desc(11, "Safari", "Safari"),
            desc(12, "node", "node server.js"),
        ];
        let refs: Vec<&ProcessDescriptor> = procs.iter().collect();
        let groups = group_by_text(&refs, &config());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].pids, vec![10, 12]);
        assert_eq!(groups[1].pids, vec![11]);
    }

    #[test]
    fn merges_exactly_at_threshold_but_not_below() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.8f32, 0.6];
        let sim = cosine_similarity(&a, &b);
        let embeddings = vec![a, b];

        let at = EngineConfig {
            merge_threshold: sim,
            ..config()
        };
        assert_eq!(agglomerate(&embeddings, &at).len(), 1);

        let above = EngineConfig {
            merge_threshold: sim + 1e-9,
            ..config()
        };
        assert_eq!(agglomerate(&embeddings, &above).len(), 2);
    }

    #[test]
    fn merged_centroid_is_exact_mean() {
        let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.1], vec![0.0, 1.0]];
        let out = agglomerate(&embeddings, &config());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].members, vec![0, 1]);
        assert_eq!(out[0].centroid, calculate_centroid(&[vec![1.0, 0.0], vec![1.0, 0.1]]));
        assert_eq!(out[1].members, vec![2]);
    }

    #[test]
    fn ties_merge_first_pair_in_scan_order() {
        // 0~1 and 2~3 are identical pairs; the max size of 2 stops a third merge
        let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 1.0]];
        let cfg = EngineConfig {
            max_cluster_size: 2,
            ..config()
        };
        let out = agglomerate(&embeddings, &cfg);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].members, vec![0, 1]);
        assert_eq!(out[1].members, vec![2, 3]);

        // three identical vectors, cap 2: (0,1) wins the tie, 2 stays alone
        let same = vec![vec![1.0, 1.0]; 3];
        let out = agglomerate(&same, &cfg);
        assert_eq!(out[0].members, vec![0, 1]);
        assert_eq!(out[1].members, vec![2]);
    }

    #[test]
    fn size_cap_is_never_exceeded() {
        let embeddings = vec![vec![1.0, 0.0]; 12];
        let cfg = EngineConfig {
            max_cluster_size: 5,
            ..config()
        };
        let out = agglomerate(&embeddings, &cfg);
        assert!(out.iter().all(|c| c.members.len() <= 5));
        let total: usize = out.iter().map(|c| c.members.len()).sum();
        assert_eq!(total, 12);
    }

    #[test]
    fn small_clusters_kept_when_few_remain() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let groups = agglomerate(&embeddings, &config());
        assert_eq!(pool_small_clusters(groups.clone(), &embeddings, &config()), groups);
    }

    #[test]
    fn small_clusters_pooled_when_many_remain() {
        let mut groups = Vec::new();
        let mut embeddings = Vec::new();
        for i in 0..6 {
            embeddings.push(vec![i as f32, 1.0]);
            embeddings.push(vec![i as f32, 1.0]);
            groups.push(MergedGroup {
                members: vec![2 * i, 2 * i + 1],
                centroid: vec![i as f32, 1.0],
            });
        }
        for i in 0..3 {
            embeddings.push(vec![1.0, i as f32]);
            groups.push(MergedGroup {
                members: vec![12 + i],
                centroid: vec![1.0, i as f32],
            });
        }

        let out = pool_small_clusters(groups, &embeddings, &config());
        assert_eq!(out.len(), 7);
        assert_eq!(out[6].members, vec![12, 13, 14]);
        let covered: usize = out.iter().map(|c| c.members.len()).sum();
        assert_eq!(covered, 15);
    }
}
