use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

mod api;
mod cli;
mod config;
mod engine;
mod metrics;
mod models;
mod services;
mod state;
#[cfg(test)]
mod test_support;

use api::{force_recluster, get_cluster, get_metrics, health, list_clusters};
use cli::CommandArgs;
use config::NamerStrategy;
use engine::{ClusterEngine, ClusterNamer, HeuristicNamer, ModelNamer, VectorStore};
use services::{
    run_monitor_loop, HttpCompletionProvider, HttpEmbeddingProvider, ProcessFeed, SqliteStore,
    StatsCollector,
};
use state::new_state;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();
    let bind_address = format!("{}:{}", args.address, args.port);

    let engine = match build_engine(&args) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("❌ Failed to start clustering engine: {:#}", e);
            return Err(std::io::Error::other(format!("{e:#}")));
        }
    };
    let feed: Arc<dyn ProcessFeed> = Arc::new(StatsCollector::new());

    actix_rt::spawn(run_monitor_loop(engine.clone(), feed.clone(), args.interval_secs));

    print_banner(&args);

    let state = new_state(engine, feed);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/api/clusters", web::get().to(list_clusters))
            .route("/api/clusters/recluster", web::post().to(force_recluster))
            .route("/api/clusters/{id}", web::get().to(get_cluster))
            .route("/metrics", web::get().to(get_metrics))
            .route("/health", web::get().to(health))
    })
        .bind(&bind_address)?
        .run()
        .await
}

fn build_engine(args: &CommandArgs) -> anyhow::Result<Arc<ClusterEngine>> {
    let config = args.engine_config();

    let db = Arc::new(SqliteStore::open(&args.db_path)?);
    log::info!("✓ Opened cluster database at {}", args.db_path.display());

    let embedder = Arc::new(
        HttpEmbeddingProvider::new(&args.embed_url, &args.embed_model, args.api_key.clone())
            .context("failed to build embedding client")?,
    );
    let store = Arc::new(VectorStore::new(
        embedder,
        db.clone(),
        config.max_key_chars,
        config.embed_batch_size,
    ));

    let namer: Arc<dyn ClusterNamer> = match (args.namer, &args.llm_url) {
        (NamerStrategy::Model, Some(url)) => {
            let completion = Arc::new(
                HttpCompletionProvider::new(url, &args.llm_model, args.api_key.clone())
                    .context("failed to build completion client")?,
            );
            log::info!("✓ Naming ambiguous clusters with {} at {}", args.llm_model, url);
            Arc::new(ModelNamer::new(completion, db))
        }
        (NamerStrategy::Model, None) => {
            log::warn!("Model namer requested without --llm-url, using heuristic names");
            Arc::new(HeuristicNamer)
        }
        (NamerStrategy::Heuristic, _) => Arc::new(HeuristicNamer),
    };

    Ok(Arc::new(ClusterEngine::new(config, store, namer)))
}

fn print_banner(args: &CommandArgs) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      Process Clusterer v{:<34}║", env!("CARGO_PKG_VERSION"));
    println!("║      Semantic grouping of live processes                  ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Server starting on http://{}:{}", args.address, args.port);
    println!();
    println!("📋 Available endpoints:");
    println!("  GET    /api/clusters            - Cluster tree");
    println!("  GET    /api/clusters/{{id}}       - One cluster");
    println!("  POST   /api/clusters/recluster  - Force a full rebuild");
    println!("  GET    /metrics                 - Prometheus metrics");
    println!("  GET    /health                  - Health check");
    println!();
    println!("💡 Settings:");
    println!("  • Embeddings: {} ({})", args.embed_url, args.embed_model);
    println!("  • Namer: {:?}", args.namer);
    println!("  • Sample interval: {}s", args.interval_secs);
    println!("═══════════════════════════════════════════════════════════");
}
