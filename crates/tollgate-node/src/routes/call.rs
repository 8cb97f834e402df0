use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::CallFailure;
use crate::middleware::extract_inbound_call;
use crate::state::AppState;

/// POST /call - Metered API call
///
/// The body is taken as raw bytes so malformed JSON reaches shape validation
/// and gets the same error shape as every other rejection.
pub async fn call(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, CallFailure> {
    let inbound = extract_inbound_call(&req, &body);
    let receipt = state.dispatcher.dispatch(inbound).await?;
    Ok(HttpResponse::Ok().json(receipt))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/call", web::post().to(call));
}
