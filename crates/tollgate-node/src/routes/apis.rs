use actix_web::{web, HttpResponse};

use crate::state::AppState;

/// GET /apis - Registered APIs with price and timeout (free)
pub async fn list_apis(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.dispatcher.handlers().descriptors())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/apis", web::get().to(list_apis));
}
