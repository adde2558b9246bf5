use actix_web::web;
use actix_web::HttpResponse;
use chrono::Duration;
use serde::Serialize;

use crate::campaigns::CampaignRepository;
use crate::campaigns::CampaignStatus;
use crate::provider::ProviderClient;
use crate::queue::JobQueue;
use crate::queue::JobStatus;
use crate::startup::AppState;
use crate::work_records::WorkRecordStore;

#[derive(Serialize)]
struct HealthResponse {
    database_reachable: bool,
    queue_paused: bool,
    waiting: i64,
    active: i64,
    completed: i64,
    failed: i64,
    stuck_locks: i64,
    campaigns_sending: i64,
    circuit_state: &'static str,
}

/// `GET /health`. The one unauthenticated admin-visible surface — covers
/// queue depth, stuck locks, in-flight campaigns, and the circuit breaker,
/// the signals an operator needs before deciding to pause or resume. Reports
/// `database_reachable: false` rather than failing outright, since this
/// endpoint is itself the thing an operator checks when the database might
/// be the problem.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let waiting = state.job_queue.count_by_status_global(JobStatus::Waiting).await;
    let database_reachable = waiting.is_ok();

    let response = HealthResponse {
        database_reachable,
        queue_paused: state.dispatch_control.is_paused(),
        waiting: waiting.unwrap_or(0),
        active: state.job_queue.count_by_status_global(JobStatus::Active).await.unwrap_or(0),
        completed: state.job_queue.count_by_status_global(JobStatus::Completed).await.unwrap_or(0),
        failed: state.job_queue.count_by_status_global(JobStatus::Failed).await.unwrap_or(0),
        stuck_locks: state
            .work_records
            .count_stuck_locks(Duration::seconds(state.dispatch.lock_ttl_seconds))
            .await
            .unwrap_or(0),
        campaigns_sending: state.campaign_repository.count_by_status(CampaignStatus::Sending).await.unwrap_or(0),
        circuit_state: state.provider_client.circuit_state().as_str(),
    };

    if database_reachable {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}
