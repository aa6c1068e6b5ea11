use std::sync::Arc;
use std::time::SystemTime;

use actix_web::{HttpResponse, Responder, get, web};
use tracing::{debug, warn};

use crate::database::Database;

/// Health check route
/// This route returns no content, the response status is enough.
#[get("/")]
pub async fn health_route() -> impl Responder {
    HttpResponse::Ok()
}

/// Heartbeat endpoint for passive push monitors. The monitored system calls
/// this on its own schedule; the push probe later compares the stored
/// last-seen time against the monitor's interval + grace window.
#[get("/api/push/{token}")]
pub async fn push_route(
    database: web::Data<Arc<dyn Database>>,
    token: web::Path<String>,
) -> impl Responder {
    match database.record_heartbeat(&token, SystemTime::now()).await {
        Ok(()) => {
            debug!(token = %token, "heartbeat recorded");
            HttpResponse::Ok().json(serde_json::json!({ "ok": true }))
        }
        Err(error) => {
            warn!(token = %token, "failed to record heartbeat: {error:#}");
            HttpResponse::InternalServerError().json(serde_json::json!({ "ok": false }))
        }
    }
}
