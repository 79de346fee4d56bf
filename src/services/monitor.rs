use anyhow::{anyhow, Result};
use log::{debug, error, info};
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior};

use crate::engine::ClusterEngine;
use crate::models::ProcessDescriptor;
use crate::services::ProcessFeed;

/// What one sampling pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Reclustered { clusters: usize },
    Assigned { placed: usize, new_singletons: usize },
}

/// Samples the host off the async workers.
pub async fn sample(feed: Arc<dyn ProcessFeed>) -> Result<Vec<ProcessDescriptor>> {
    tokio::task::spawn_blocking(move || feed.list_processes())
        .await
        .map_err(|e| anyhow!("process sampling task failed: {e}"))?
}

/// One pass: rebuild when due, otherwise place every new active pid, then
/// refresh aggregate stats from the same sample.
pub async fn tick(engine: &ClusterEngine, processes: &[ProcessDescriptor]) -> Result<TickOutcome> {
    let outcome = if engine.needs_full_recluster(processes) {
        let tree = engine.full_recluster(processes).await?;
        TickOutcome::Reclustered {
            clusters: tree.top_level().len(),
        }
    } else {
        let pending = engine.unclustered(processes);
        let mut new_singletons = 0;
        for descriptor in &pending {
            if engine.assign(descriptor).await?.is_new {
                new_singletons += 1;
            }
        }
        TickOutcome::Assigned {
            placed: pending.len(),
            new_singletons,
        }
    };

    engine.refresh_stats(processes)?;
    Ok(outcome)
}

pub async fn run_monitor_loop(engine: Arc<ClusterEngine>, feed: Arc<dyn ProcessFeed>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("🔄 Sampling processes every {}s", interval_secs.max(1));

    loop {
        ticker.tick().await;

        let processes = match sample(feed.clone()).await {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to sample processes: {e:#}");
                continue;
            }
        };

        match tick(&engine, &processes).await {
            Ok(TickOutcome::Reclustered { clusters }) => {
                debug!("Sample of {} processes rebuilt {} clusters", processes.len(), clusters)
            }
            Ok(TickOutcome::Assigned { placed, new_singletons }) => {
                if placed > 0 {
                    debug!("Placed {} new processes ({} singletons)", placed, new_singletons);
                }
            }
            Err(e) => error!("Clustering pass failed: {e:#}"),
        }
    }
}
