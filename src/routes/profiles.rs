use actix_web::{web, HttpResponse, Responder};

use crate::models::ReevaluateResponse;
use crate::pipeline::PipelineError;
use crate::routes::{error_response, AppState};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/profiles/{profile_id}/reevaluate", web::post().to(reevaluate));
}

/// Re-score fresh listings after a profile changed
async fn reevaluate(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let profile_id = path.into_inner();

    match state.coordinator.orchestrator().reevaluate_profile(&profile_id).await {
        Ok(report) => HttpResponse::Ok().json(ReevaluateResponse {
            profile_id,
            listings_considered: report.listings,
            intents_created: report.intents_created,
        }),
        Err(PipelineError::ProfileNotFound(_)) => {
            error_response(404, "not_found", format!("Profile {} not found", profile_id))
        }
        Err(e) => {
            tracing::error!(%profile_id, error = %e, "Profile re-evaluation failed");
            error_response(500, "internal_error", "Re-evaluation failed")
        }
    }
}
