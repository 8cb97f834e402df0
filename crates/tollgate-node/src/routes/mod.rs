pub mod apis;
pub mod call;
pub mod health;

use actix_web::web;

/// Mount every route the node serves.
pub fn configure(cfg: &mut web::ServiceConfig) {
    health::configure(cfg);
    apis::configure(cfg);
    call::configure(cfg);
}
