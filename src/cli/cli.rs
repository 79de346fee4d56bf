use clap::Parser;
use std::path::PathBuf;

use crate::config::{EngineConfig, NamerStrategy};

/// Process Clusterer - groups live processes by what they do
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 9999)]
    pub port: u16,

    /// Listen address
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// SQLite file for the embedding cache and cluster names
    #[arg(long, env = "CLUSTER_DB_PATH", default_value = "process-clusterer.db")]
    pub db_path: PathBuf,

    /// Base URL of the embedding service
    #[arg(long, env = "EMBED_URL", default_value = "http://127.0.0.1:8080")]
    pub embed_url: String,

    #[arg(long, env = "EMBED_MODEL", default_value = "text-embedding-3-small")]
    pub embed_model: String,

    /// Bearer token for the embedding and completion services
    #[arg(long, env = "EMBED_API_KEY")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible chat service (model namer)
    #[arg(long, env = "LLM_URL")]
    pub llm_url: Option<String>,

    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    pub llm_model: String,

    #[arg(long, env = "NAMER", value_enum, default_value_t = NamerStrategy::Heuristic)]
    pub namer: NamerStrategy,

    /// Seconds between process samples
    #[arg(long, env = "SAMPLE_INTERVAL_SECS", default_value_t = 5)]
    pub interval_secs: u64,

    #[arg(long, env = "JOIN_THRESHOLD", default_value_t = 0.75)]
    pub join_threshold: f64,

    #[arg(long, env = "MERGE_THRESHOLD", default_value_t = 0.80)]
    pub merge_threshold: f64,

    #[arg(long, env = "MAX_CLUSTER_SIZE", default_value_t = 25)]
    pub max_cluster_size: usize,
}

impl CommandArgs {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            join_threshold: self.join_threshold,
            merge_threshold: self.merge_threshold,
            max_cluster_size: self.max_cluster_size.max(1),
            ..EngineConfig::default()
        }
    }
}
