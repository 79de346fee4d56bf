use serde::{Deserialize, Serialize};
pub use crate::models::stats::ProcessStats;

/// One observation of a running process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessDescriptor {
    /// Process ID
    pub pid: u32,
    /// Display name (executable name)
    pub name: String,
    /// Full command line, arguments joined by spaces
    pub command: String,
    /// Resource usage at sample time
    #[serde(default)]
    pub stats: ProcessStats,
}

impl ProcessDescriptor {
    pub fn new(pid: u32, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            command: command.into(),
            stats: ProcessStats::empty(),
        }
    }

    pub fn with_stats(mut self, stats: ProcessStats) -> Self {
        self.stats = stats;
        self
    }
}

/// Embedding for one unique (name, command) text, shared by every pid running it
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessVector {
    /// Normalized text key
    pub key: String,
    pub embedding: Vec<f32>,
    /// Text that was embedded
    pub text: String,
}
