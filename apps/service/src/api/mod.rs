pub mod push;

use actix_web::web;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(push::health_route).service(push::push_route);
}
