use crate::models::{ProcessDescriptor, ProcessStats};
use anyhow::{anyhow, Result};
use sysinfo::{Process, ProcessesToUpdate, System};
use std::sync::Mutex;

/// Pull-based source of live process observations.
pub trait ProcessFeed: Send + Sync {
    fn list_processes(&self) -> Result<Vec<ProcessDescriptor>>;
}

/// Samples every process on the host through sysinfo.
///
/// The `System` is kept between calls so CPU usage is measured over the
/// interval between two samples rather than reported as zero.
pub struct StatsCollector {
    system: Mutex<System>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn command_line(process: &Process) -> String {
    process
        .cmd()
        .iter()
        .map(|s| s.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

impl ProcessFeed for StatsCollector {
    fn list_processes(&self) -> Result<Vec<ProcessDescriptor>> {
        let mut sys = self
            .system
            .lock()
            .map_err(|_| anyhow!("process sampler lock poisoned"))?;
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let mut out: Vec<ProcessDescriptor> = sys
            .processes()
            .iter()
            .map(|(pid, process)| {
                let name = process.name().to_string_lossy().into_owned();
                let mut command = command_line(process);
                if command.is_empty() {
                    // kernel threads and zombies report no argv
                    command = name.clone();
                }
                // sysinfo has no per-process socket counters; network stays zero
                ProcessDescriptor {
                    pid: pid.as_u32(),
                    name,
                    command,
                    stats: ProcessStats {
                        cpu_usage: process.cpu_usage(),
                        memory_bytes: process.memory(),
                        network_rx_bytes: 0,
                        network_tx_bytes: 0,
                    },
                }
            })
            .collect();
        out.sort_by_key(|p| p.pid);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;

    #[test]
    fn finds_current_process() {
        let collector = StatsCollector::new();
        let procs = collector.list_processes().unwrap();
        let me = process::id();
        let found = procs.iter().find(|p| p.pid == me);
        assert!(found.is_some(), "current pid {} not sampled", me);
        assert!(!found.unwrap().command.is_empty());
    }

    #[test]
    fn output_is_sorted_by_pid() {
        let procs = StatsCollector::new().list_processes().unwrap();
        assert!(procs.windows(2).all(|w| w[0].pid < w[1].pid));
    }
}
