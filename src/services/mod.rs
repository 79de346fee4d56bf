pub mod completion_provider;
pub mod embedding_provider;
pub mod monitor;
pub mod stats_collector;
pub mod storage;

pub use completion_provider::{CompletionProvider, HttpCompletionProvider};
pub use embedding_provider::{EmbeddingProvider, HttpEmbeddingProvider};
pub use monitor::run_monitor_loop;
pub use stats_collector::{ProcessFeed, StatsCollector};
pub use storage::{ClusterNameStore, EmbeddingCache, SqliteStore};
