use actix_web::web;
use actix_web::HttpResponse;
use chrono::Duration;
use serde::Serialize;
use uuid::Uuid;

use crate::completion::CompletionMonitor;
use crate::queue::JobQueue;
use crate::startup::AppState;
use crate::utils::error_500;

/// `POST /admin/queue/pause`. Stops the background dispatcher from claiming
/// new jobs; batches already in flight run to completion.
pub async fn pause_queue(state: web::Data<AppState>) -> HttpResponse {
    state.dispatch_control.pause();
    HttpResponse::Ok().finish()
}

/// `POST /admin/queue/resume`.
pub async fn resume_queue(state: web::Data<AppState>) -> HttpResponse {
    state.dispatch_control.resume();
    HttpResponse::Ok().finish()
}

#[derive(Serialize)]
struct CleanResponse {
    deleted: u64,
}

/// `POST /admin/queue/clean`. Deletes `completed`/`failed` jobs older than
/// the lock TTL multiplied out to a day, a conservative retention window
/// that keeps recently finished jobs around for dedup/observability.
pub async fn clean_queue(state: web::Data<AppState>) -> Result<HttpResponse, actix_web::Error> {
    let deleted = state.job_queue.clean_completed(Duration::hours(24)).await.map_err(error_500)?;
    Ok(HttpResponse::Ok().json(CleanResponse { deleted }))
}

#[derive(Serialize)]
struct CheckResponse {
    campaign_id: Uuid,
    finalized: bool,
}

/// `POST /admin/campaigns/{campaign_id}/check`. One-shot, on-demand run of
/// the same completion check the dispatcher runs reactively after every
/// batch and the periodic sweep runs on a timer.
pub async fn check_campaign(
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let campaign_id = path.into_inner();
    let monitor = CompletionMonitor::new(state.work_records.clone(), state.job_queue.clone(), state.campaign_repository.clone());
    let finalized = monitor.check(campaign_id).await.map_err(error_500)?;
    Ok(HttpResponse::Ok().json(CheckResponse { campaign_id, finalized }))
}
