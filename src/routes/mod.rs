// Route exports
pub mod auth;
pub mod intents;
pub mod profiles;
pub mod runs;

use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::models::ErrorResponse;
use crate::pipeline::RunCoordinator;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RunCoordinator>,
    /// HS256 secret for executor callbacks; `None` accepts unsigned callbacks
    pub webhook_secret: Option<String>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(runs::configure)
            .configure(intents::configure)
            .configure(profiles::configure),
    );
}

pub(crate) fn error_response(status: u16, error: &str, message: impl Into<String>) -> HttpResponse {
    let status_code = actix_web::http::StatusCode::from_u16(status)
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status_code).json(ErrorResponse {
        error: error.to_string(),
        message: message.into(),
        status_code: status,
    })
}
