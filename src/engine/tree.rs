use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::{
    Category, Cluster, ClusterStats, ClusterTree, ProcessDescriptor, ProcessStats, ROOT_CLUSTER_ID,
};

/// Recomputes each cluster's aggregate from the live descriptors matching its
/// pids. Pids without a live descriptor contribute nothing.
pub fn aggregate_stats(clusters: &mut [Cluster], processes: &[ProcessDescriptor]) {
    let live: HashMap<u32, &ProcessStats> = processes.iter().map(|p| (p.pid, &p.stats)).collect();
    for cluster in clusters.iter_mut() {
        let mut stats = ClusterStats::default();
        for pid in &cluster.pids {
            if let Some(s) = live.get(pid) {
                stats.add_process(s);
            }
        }
        cluster.stats = stats;
    }
}

/// Hangs every cluster under a synthetic depth-0 root whose stats are the
/// sum of its children.
pub fn build_tree(clusters: Vec<Cluster>, rebuilt_at: Option<DateTime<Utc>>) -> ClusterTree {
    let mut stats = ClusterStats::default();
    let children: Vec<Cluster> = clusters
        .into_iter()
        .map(|mut c| {
            stats.add(&c.stats);
            c.parent_id = Some(ROOT_CLUSTER_ID.to_string());
            c.depth = 1;
            c
        })
        .collect();

    let root = Cluster {
        id: ROOT_CLUSTER_ID.to_string(),
        name: "All processes".to_string(),
        description: format!("{} groups", children.len()),
        category: Category::Other,
        pids: Vec::new(),
        text_keys: Vec::new(),
        centroid: Vec::new(),
        children,
        parent_id: None,
        depth: 0,
        stats,
    };

    let mut flat = Vec::with_capacity(root.children.len() + 1);
    flat.push(Cluster {
        children: Vec::new(),
        ..root.clone()
    });
    flat.extend(root.children.iter().cloned());

    ClusterTree::new(root, flat, rebuilt_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClusterLabel;
    use crate::test_support::desc;

    fn cluster(name: &str, pids: Vec<u32>) -> Cluster {
        Cluster::new(
            ClusterLabel {
                name: name.to_string(),
                description: String::new(),
                category: Category::Other,
            },
            pids,
            Vec::new(),
            vec![1.0],
        )
    }

    #[test]
    fn empty_input_gives_root_only() {
        let tree = build_tree(Vec::new(), None);
        assert!(tree.is_empty());
        assert_eq!(tree.clusters.len(), 1);
        assert_eq!(tree.root.depth, 0);
        assert_eq!(tree.root.stats.process_count, 0);
        assert!(tree.get(ROOT_CLUSTER_ID).is_some());
    }

    #[test]
    fn root_stats_sum_children() {
        let mut a = desc(1, "a", "");
        a.stats.cpu_usage = 2.0;
        a.stats.network_rx_bytes = 7;
        let mut b = desc(2, "b", "");
        b.stats.cpu_usage = 3.0;
        let c = desc(3, "c", "");
        let procs = vec![a, b, c];

        let mut clusters = vec![cluster("ab", vec![1, 2]), cluster("c", vec![3, 99])];
        aggregate_stats(&mut clusters, &procs);
        assert_eq!(clusters[0].stats.process_count, 2);
        assert_eq!(clusters[1].stats.process_count, 1);

        let tree = build_tree(clusters, Some(Utc::now()));
        assert_eq!(tree.root.stats.process_count, 3);
        assert_eq!(tree.root.stats.network_rx_bytes, 7);
        assert!((tree.root.stats.cpu_usage - 6.0).abs() < 1e-6);
        assert_eq!(tree.root.stats.memory_bytes, 3 * 16 * 1024 * 1024);
    }

    #[test]
    fn children_point_at_root_and_are_indexed() {
        let tree = build_tree(vec![cluster("x", vec![1]), cluster("y", vec![2])], None);
        assert_eq!(tree.top_level().len(), 2);
        for child in tree.top_level() {
            assert_eq!(child.parent_id.as_deref(), Some(ROOT_CLUSTER_ID));
            assert_eq!(child.depth, 1);
            assert_eq!(tree.get(&child.id).map(|c| c.name.as_str()), Some(child.name.as_str()));
        }
        assert!(tree.get("missing").is_none());
    }
}
