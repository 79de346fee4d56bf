use serde::{Deserialize, Serialize};

/// Live resource sample for one process
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProcessStats {
    /// CPU usage (percent, may exceed 100 on multi-core)
    pub cpu_usage: f32,

    /// Resident memory (bytes)
    pub memory_bytes: u64,

    /// Network bytes received
    pub network_rx_bytes: u64,

    /// Network bytes transmitted
    pub network_tx_bytes: u64,
}

impl ProcessStats {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A process is idle only when every axis is quiet.
    pub fn is_idle(&self, negligible_memory_bytes: u64) -> bool {
        self.cpu_usage <= 0.0
            && self.memory_bytes <= negligible_memory_bytes
            && self.network_rx_bytes == 0
            && self.network_tx_bytes == 0
    }
}

/// Aggregate over the live members of a cluster
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClusterStats {
    pub cpu_usage: f32,
    pub memory_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub process_count: usize,
}

impl ClusterStats {
    pub fn add_process(&mut self, stats: &ProcessStats) {
        self.cpu_usage += stats.cpu_usage;
        self.memory_bytes = self.memory_bytes.saturating_add(stats.memory_bytes);
        self.network_rx_bytes = self.network_rx_bytes.saturating_add(stats.network_rx_bytes);
        self.network_tx_bytes = self.network_tx_bytes.saturating_add(stats.network_tx_bytes);
        self.process_count += 1;
    }

    pub fn add(&mut self, other: &ClusterStats) {
        self.cpu_usage += other.cpu_usage;
        self.memory_bytes = self.memory_bytes.saturating_add(other.memory_bytes);
        self.network_rx_bytes = self.network_rx_bytes.saturating_add(other.network_rx_bytes);
        self.network_tx_bytes = self.network_tx_bytes.saturating_add(other.network_tx_bytes);
        self.process_count += other.process_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_requires_every_axis_quiet() {
        let idle = ProcessStats {
            memory_bytes: 512,
            ..ProcessStats::empty()
        };
        assert!(idle.is_idle(1024));

        let receiving = ProcessStats {
            network_rx_bytes: 1,
            ..ProcessStats::empty()
        };
        assert!(!receiving.is_idle(1024));

        let heavy = ProcessStats {
            memory_bytes: 4096,
            ..ProcessStats::empty()
        };
        assert!(!heavy.is_idle(1024));
    }

    #[test]
    fn aggregate_sums_members() {
        let mut total = ClusterStats::default();
        total.add_process(&ProcessStats {
            cpu_usage: 1.5,
            memory_bytes: 10,
            network_rx_bytes: 1,
            network_tx_bytes: 2,
        });
        total.add_process(&ProcessStats {
            cpu_usage: 0.5,
            memory_bytes: 5,
            network_rx_bytes: 3,
            network_tx_bytes: 4,
        });
        assert_eq!(total.process_count, 2);
        assert_eq!(total.memory_bytes, 15);
        assert_eq!(total.network_rx_bytes, 4);
        assert_eq!(total.network_tx_bytes, 6);
        assert!((total.cpu_usage - 2.0).abs() < f32::EPSILON);
    }
}
