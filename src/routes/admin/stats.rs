use actix_web::web;
use actix_web::HttpResponse;
use serde::Serialize;
use uuid::Uuid;

use crate::campaigns::CampaignRepository;
use crate::campaigns::CampaignStatsView;
use crate::campaigns::CampaignStatus;
use crate::startup::AppState;
use crate::utils::error_400;
use crate::utils::error_500;
use crate::work_records::CampaignWorkStats;
use crate::work_records::WorkRecordStore;

#[derive(Serialize)]
struct StatsResponse {
    campaign_id: Uuid,
    status: CampaignStatus,
    stats: CampaignStatsView,
    work_records: CampaignWorkStats,
}

/// `GET /admin/campaigns/{campaign_id}/stats`.
pub async fn stats_campaign(
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let campaign_id = path.into_inner();
    let campaign = state.campaign_repository.get(campaign_id).await.map_err(error_500)?.ok_or_else(|| error_400("campaign not found"))?;
    let work_records = state.work_records.get_campaign_stats(campaign_id).await.map_err(error_500)?;

    Ok(HttpResponse::Ok().json(StatsResponse {
        campaign_id,
        status: campaign.status,
        stats: campaign.raw_stats.derive(),
        work_records,
    }))
}
