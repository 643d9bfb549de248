use actix_web::{web, HttpResponse, Responder};
use std::time::Duration;
use validator::Validate;

use crate::models::{HealthResponse, RunAcceptedResponse, RunResponse, TriggerRunRequest};
use crate::pipeline::PipelineError;
use crate::routes::{error_response, AppState};
use crate::services::store::Store;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/runs", web::post().to(trigger_run))
        .route("/runs/latest", web::get().to(latest_run));
}

async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let store_healthy = state
        .coordinator
        .orchestrator()
        .store()
        .health_check()
        .await
        .unwrap_or(false);

    let status = if store_healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Start a run in the background
///
/// POST /api/v1/runs
///
/// Optional body: `{ "deadlineSecs": 600 }`. Answers 409 while a run is active.
async fn trigger_run(
    state: web::Data<AppState>,
    body: Option<web::Json<TriggerRunRequest>>,
) -> impl Responder {
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    if let Err(errors) = request.validate() {
        return error_response(400, "Validation failed", errors.to_string());
    }

    let permit = match state.coordinator.try_begin() {
        Ok(permit) => permit,
        Err(PipelineError::RunInProgress) => {
            return error_response(409, "run_in_progress", "A run is already in progress");
        }
        Err(e) => return error_response(500, "run_failed", e.to_string()),
    };

    let coordinator = state.coordinator.clone();
    let deadline = request.deadline_secs.map(Duration::from_secs);
    actix_web::rt::spawn(async move {
        coordinator.execute(permit, deadline).await;
    });

    tracing::info!(deadline_secs = ?request.deadline_secs, "Run triggered via API");

    HttpResponse::Accepted().json(RunAcceptedResponse {
        status: "accepted".to_string(),
        message: "Run started".to_string(),
    })
}

async fn latest_run(state: web::Data<AppState>) -> impl Responder {
    match state.coordinator.last_report() {
        Some(report) => HttpResponse::Ok().json(RunResponse {
            health: report.health(),
        }),
        None => error_response(404, "not_found", "No run has completed yet"),
    }
}
