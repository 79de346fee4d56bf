pub mod assigner;
pub mod namer;
pub mod recluster;
pub mod similarity;
pub mod text_key;
pub mod tree;
pub mod vector_store;

pub use assigner::Assignment;
pub use namer::{ClusterNamer, HeuristicNamer, ModelNamer};
pub use vector_store::VectorStore;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::config::EngineConfig;
use crate::metrics::METRICS;
use crate::models::{Cluster, ClusterStats, ClusterTree, ProcessDescriptor, ProcessStats};
use assigner::{assign_to_clusters, Candidate};
use namer::{heuristic_label, ClusterProfile, MemberText};
use similarity::calculate_centroid;
use recluster::{
    active_processes, agglomerate, group_by_text, pool_small_clusters, recluster_due,
    ReclusterMarks, TextGroup,
};

#[derive(Default)]
struct EngineState {
    clusters: Vec<Cluster>,
    /// pid -> text key of every clustered pid
    pid_keys: HashMap<u32, String>,
    /// last sampled stats of every clustered pid
    pid_stats: HashMap<u32, ProcessStats>,
    singleton_debt: usize,
    last_recluster: Option<Instant>,
    rebuilt_at: Option<DateTime<Utc>>,
    pid_count: usize,
}

/// Single owner of the current cluster set.
///
/// Mutations happen under a short write lock that is never held across a
/// network wait. A full recluster builds its result off to the side and swaps
/// it in at the end, so readers see either the old set or the new one.
pub struct ClusterEngine {
    config: EngineConfig,
    store: Arc<VectorStore>,
    namer: Arc<dyn ClusterNamer>,
    state: RwLock<EngineState>,
    recluster_lock: tokio::sync::Mutex<()>,
}

impl ClusterEngine {
    pub fn new(config: EngineConfig, store: Arc<VectorStore>, namer: Arc<dyn ClusterNamer>) -> Self {
        Self {
            config,
            store,
            namer,
            state: RwLock::new(EngineState::default()),
            recluster_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Fast path: place one process without rebuilding.
    pub async fn assign(&self, descriptor: &ProcessDescriptor) -> Result<Assignment> {
        let key = self.store.key_for(descriptor);
        {
            let state = self.read_state()?;
            if state.pid_keys.get(&descriptor.pid) == Some(&key) {
                if let Some(c) = state.clusters.iter().find(|c| c.contains_pid(descriptor.pid)) {
                    return Ok(Assignment {
                        cluster: c.clone(),
                        is_new: false,
                    });
                }
            }
        }

        let vector = match self.store.get_embedding(descriptor).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Assigning pid {} without an embedding: {e:#}", descriptor.pid);
                None
            }
        };
        let (singleton_label, _) = heuristic_label(&ClusterProfile {
            members: vec![MemberText {
                key: key.clone(),
                name: descriptor.name.clone(),
                command: descriptor.command.clone(),
                pid_count: 1,
            }],
        });

        let mut guard = self.write_state()?;
        let state = &mut *guard;
        if state.pid_keys.get(&descriptor.pid).is_some_and(|k| *k != key) {
            detach_pid(state, descriptor.pid, &self.store);
        }

        let pid_keys = &state.pid_keys;
        let store = &self.store;
        let (idx, is_new) = assign_to_clusters(
            &mut state.clusters,
            Candidate {
                pid: descriptor.pid,
                key: &key,
                vector: vector.as_deref(),
                stats: &descriptor.stats,
            },
            singleton_label,
            &self.config,
            |pid| pid_keys.get(&pid).and_then(|k| store.vector_for_key(k)),
        );
        state.pid_keys.insert(descriptor.pid, key);
        state.pid_stats.insert(descriptor.pid, descriptor.stats.clone());
        if is_new {
            state.singleton_debt += 1;
            METRICS.singleton_debt.set(state.singleton_debt as i64);
        }
        METRICS.cluster_count.set(state.clusters.len() as i64);

        Ok(Assignment {
            cluster: state.clusters[idx].clone(),
            is_new,
        })
    }

    /// Trigger check for the heavy path.
    pub fn needs_full_recluster(&self, processes: &[ProcessDescriptor]) -> bool {
        let marks = match self.read_state() {
            Ok(state) => ReclusterMarks {
                last_recluster: state.last_recluster,
                singleton_debt: state.singleton_debt,
                pid_count: state.pid_count,
            },
            Err(_) => return true,
        };
        recluster_due(&marks, processes.len(), &self.config)
    }

    /// Heavy path: rebuild every cluster from the live process list and
    /// replace the current set wholesale.
    pub async fn full_recluster(&self, processes: &[ProcessDescriptor]) -> Result<ClusterTree> {
        let _running = self.recluster_lock.lock().await;
        let started = Instant::now();

        let active = active_processes(processes, &self.config);
        let groups = group_by_text(&active, &self.config);
        info!(
            "🔄 Reclustering {} active processes ({} unique commands, {} idle skipped)",
            active.len(),
            groups.len(),
            processes.len() - active.len()
        );

        let mut vectors = self
            .store
            .batch_get_keys(groups.iter().map(|g| g.key.clone()).collect())
            .await;
        let (embedded, embeddings): (Vec<TextGroup>, Vec<Vec<f32>>) = groups
            .into_iter()
            .filter_map(|g| vectors.remove(&g.key).map(|v| (g, v)))
            .unzip();

        let merged = agglomerate(&embeddings, &self.config);
        let merged = pool_small_clusters(merged, &embeddings, &self.config);

        let mut clusters = Vec::with_capacity(merged.len());
        let mut signatures = HashSet::with_capacity(merged.len());
        for group in merged {
            let profile = ClusterProfile {
                members: group
                    .members
                    .iter()
                    .map(|&m| MemberText {
                        key: embedded[m].key.clone(),
                        name: embedded[m].name.clone(),
                        command: embedded[m].command.clone(),
                        pid_count: embedded[m].pids.len(),
                    })
                    .collect(),
            };
            let label = self.namer.label(&profile).await;
            signatures.insert(profile.signature());
            let pids = group
                .members
                .iter()
                .flat_map(|&m| embedded[m].pids.iter().copied())
                .collect();
            let keys = group.members.iter().map(|&m| embedded[m].key.clone()).collect();
            clusters.push(Cluster::new(label, pids, keys, group.centroid));
        }

        tree::aggregate_stats(&mut clusters, processes);

        let pid_keys: HashMap<u32, String> = embedded
            .iter()
            .flat_map(|g| g.pids.iter().map(move |p| (*p, g.key.clone())))
            .collect();
        let pid_stats = live_stats(processes, &pid_keys);
        let rebuilt_at = Utc::now();
        {
            let mut state = self.write_state()?;
            *state = EngineState {
                clusters: clusters.clone(),
                pid_keys,
                pid_stats,
                singleton_debt: 0,
                last_recluster: Some(Instant::now()),
                rebuilt_at: Some(rebuilt_at),
                pid_count: processes.len(),
            };
        }

        let live_keys: HashSet<String> = embedded.iter().map(|g| g.key.clone()).collect();
        let evicted = self.store.retain_keys(&live_keys);
        self.namer.retain_signatures(&signatures);
        if evicted > 0 {
            debug!("Evicted {evicted} embeddings of departed commands from memory");
        }

        let elapsed = started.elapsed();
        METRICS.record_recluster(elapsed.as_secs_f64(), &clusters);
        info!(
            "✓ Recluster produced {} clusters in {:.2?} ({} embedded vectors held)",
            clusters.len(),
            elapsed,
            self.store.len()
        );

        Ok(tree::build_tree(clusters, Some(rebuilt_at)))
    }

    /// Recomputes aggregate stats from a fresh sample. Membership and
    /// centroids are left alone.
    pub fn refresh_stats(&self, processes: &[ProcessDescriptor]) -> Result<()> {
        let mut guard = self.write_state()?;
        let state = &mut *guard;
        tree::aggregate_stats(&mut state.clusters, processes);
        state.pid_stats = live_stats(processes, &state.pid_keys);
        METRICS.record_cluster_stats(&state.clusters);
        Ok(())
    }

    pub fn current_clusters(&self) -> Vec<Cluster> {
        self.read_state()
            .map(|s| s.clusters.clone())
            .unwrap_or_default()
    }

    pub fn current_tree(&self) -> ClusterTree {
        match self.read_state() {
            Ok(state) => tree::build_tree(state.clusters.clone(), state.rebuilt_at),
            Err(_) => tree::build_tree(Vec::new(), None),
        }
    }

    /// Active processes that no cluster holds yet under their current text.
    pub fn unclustered<'a>(&self, processes: &'a [ProcessDescriptor]) -> Vec<&'a ProcessDescriptor> {
        let Ok(state) = self.read_state() else {
            return Vec::new();
        };
        let held: HashSet<u32> = state.clusters.iter().flat_map(|c| c.pids.iter().copied()).collect();
        active_processes(processes, &self.config)
            .into_iter()
            .filter(|p| {
                !held.contains(&p.pid)
                    || state.pid_keys.get(&p.pid) != Some(&self.store.key_for(p))
            })
            .collect()
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, EngineState>> {
        self.state
            .read()
            .map_err(|_| anyhow!("cluster state lock poisoned"))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, EngineState>> {
        self.state
            .write()
            .map_err(|_| anyhow!("cluster state lock poisoned"))
    }
}

/// Last sampled stats of every pid present in `pid_keys`.
fn live_stats(
    processes: &[ProcessDescriptor],
    pid_keys: &HashMap<u32, String>,
) -> HashMap<u32, ProcessStats> {
    processes
        .iter()
        .filter(|p| pid_keys.contains_key(&p.pid))
        .map(|p| (p.pid, p.stats.clone()))
        .collect()
}

/// Takes `pid` out of whichever cluster holds it. The cluster's text keys,
/// centroid and stats are recomputed from what remains; a cluster left with
/// no pids is removed.
fn detach_pid(state: &mut EngineState, pid: u32, store: &VectorStore) {
    let Some(old_key) = state.pid_keys.remove(&pid) else {
        return;
    };
    state.pid_stats.remove(&pid);

    let pid_keys = &state.pid_keys;
    let pid_stats = &state.pid_stats;
    for cluster in state.clusters.iter_mut().filter(|c| c.contains_pid(pid)) {
        cluster.pids.retain(|p| *p != pid);
        if !cluster.pids.iter().any(|p| pid_keys.get(p) == Some(&old_key)) {
            cluster.text_keys.retain(|k| *k != old_key);
        }

        let vectors: Vec<Vec<f32>> = cluster
            .text_keys
            .iter()
            .filter_map(|k| store.vector_for_key(k))
            .collect();
        cluster.centroid = calculate_centroid(&vectors);

        let mut stats = ClusterStats::default();
        for s in cluster.pids.iter().filter_map(|p| pid_stats.get(p)) {
            stats.add_process(s);
        }
        cluster.stats = stats;
    }
    state.clusters.retain(|c| !c.pids.is_empty());
}
