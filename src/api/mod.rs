pub mod clusters;
pub mod metrics;

pub use clusters::{force_recluster, get_cluster, list_clusters};
pub use metrics::get_metrics;

use actix_web::{HttpResponse, Responder};

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy"
    }))
}
