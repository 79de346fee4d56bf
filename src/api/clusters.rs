use actix_web::{web, HttpResponse, Responder};

use crate::services::monitor::sample;
use crate::state::AppState;

pub async fn list_clusters(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.engine.current_tree())
}

pub async fn get_cluster(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    let tree = data.engine.current_tree();

    match tree.get(&id) {
        Some(cluster) => HttpResponse::Ok().json(cluster),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "status": "error",
            "message": format!("Cluster '{}' not found", id)
        })),
    }
}

/// Rebuilds from a fresh sample regardless of the trigger policy.
pub async fn force_recluster(data: web::Data<AppState>) -> impl Responder {
    let processes = match sample(data.feed.clone()).await {
        Ok(p) => p,
        Err(e) => {
            log::error!("Failed to sample processes: {:#}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "status": "error",
                "message": format!("Process sampling failed: {}", e)
            }));
        }
    };

    match data.engine.full_recluster(&processes).await {
        Ok(tree) => {
            log::info!("✓ Forced recluster over {} processes", processes.len());
            HttpResponse::Ok().json(tree)
        }
        Err(e) => {
            log::error!("Forced recluster failed: {:#}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "status": "error",
                "message": format!("Recluster failed: {}", e)
            }))
        }
    }
}
