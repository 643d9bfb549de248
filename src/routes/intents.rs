use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::models::{IntentOutcomeRequest, IntentOutcomeResponse};
use crate::pipeline::PipelineError;
use crate::routes::auth::verify_bearer;
use crate::routes::{error_response, AppState};
use crate::services::store::IntentTransition;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/intents/{intent_id}/outcome", web::post().to(record_outcome));
}

/// Executor callback with the terminal outcome of a submission
///
/// POST /api/v1/intents/{intent_id}/outcome
///
/// Request body:
/// ```json
/// { "outcome": "succeeded", "detail": "optional text" }
/// ```
async fn record_outcome(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<IntentOutcomeRequest>,
    http_req: HttpRequest,
) -> impl Responder {
    if let Some(secret) = &state.webhook_secret {
        if let Err(e) = verify_bearer(&http_req, secret) {
            tracing::warn!(error = %e, "Rejected executor callback");
            return error_response(401, "unauthorized", e.to_string());
        }
    }

    if let Err(errors) = req.validate() {
        return error_response(400, "Validation failed", errors.to_string());
    }

    let intent_id = path.into_inner();
    let result = state
        .coordinator
        .orchestrator()
        .record_outcome(intent_id, req.outcome, Utc::now())
        .await;

    match result {
        Ok(IntentTransition::Updated(intent)) => HttpResponse::Ok().json(IntentOutcomeResponse {
            intent_id,
            status: intent.status,
            applied: true,
        }),
        Ok(IntentTransition::AlreadyTerminal(intent)) => HttpResponse::Ok().json(IntentOutcomeResponse {
            intent_id,
            status: intent.status,
            applied: false,
        }),
        Ok(IntentTransition::NotFound) | Err(PipelineError::IntentNotFound(_)) => {
            error_response(404, "not_found", format!("Intent {} not found", intent_id))
        }
        Err(e) => {
            tracing::error!(%intent_id, error = %e, "Failed to record intent outcome");
            error_response(500, "internal_error", "Failed to record outcome")
        }
    }
}
