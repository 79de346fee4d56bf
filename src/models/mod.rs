pub mod cluster;
pub mod process;
pub mod stats;

pub use cluster::{Category, Cluster, ClusterLabel, ClusterTree, ROOT_CLUSTER_ID};
pub use process::{ProcessDescriptor, ProcessVector};
pub use stats::{ClusterStats, ProcessStats};
