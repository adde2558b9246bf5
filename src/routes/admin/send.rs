use std::sync::Arc;

use actix_web::web;
use actix_web::HttpResponse;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::campaigns::CampaignRepository;
use crate::materializer::Materializer;
use crate::materializer::PgListRecipientSource;
use crate::materializer::RecipientSource;
use crate::provider::OutboundMessage;
use crate::provider::ProviderClient;
use crate::queue::PgJobQueue;
use crate::startup::AppState;
use crate::suppression::PgSuppressionStore;
use crate::utils::error_400;
use crate::utils::error_500;
use crate::utils::error_503;
use crate::work_records::PgWorkRecordStore;

#[derive(Deserialize, Default)]
pub struct SendRequest {
    #[serde(default)]
    test_mode: bool,
    test_email: Option<String>,
}

#[derive(Serialize)]
struct SendResponse {
    campaign_id: Uuid,
    projected_total_recipients: i64,
    estimated_duration_seconds: f64,
}

/// `POST /admin/campaigns/{campaign_id}/send`. `test_mode` sends a single
/// message straight to `test_email`, bypassing the queue and work records
/// entirely — it never touches campaign status.
pub async fn send_campaign(
    path: web::Path<Uuid>,
    body: Option<web::Json<SendRequest>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let campaign_id = path.into_inner();
    let request = body.map(|b| b.into_inner()).unwrap_or_default();

    let campaign = state.campaign_repository.get(campaign_id).await.map_err(error_500)?.ok_or_else(|| error_400("campaign not found"))?;

    if request.test_mode {
        let test_email = request.test_email.as_deref().ok_or_else(|| error_400("test_email is required in test_mode"))?;
        let from = format!("{} <{}>", campaign.sender_name, campaign.sender_email);
        let message = OutboundMessage {
            to: test_email,
            from: &from,
            reply_to: campaign.reply_to.as_deref(),
            subject: &campaign.subject,
            html_body: &campaign.html_body,
            message_id: &format!("test-{campaign_id}"),
        };
        state.provider_client.send(message).await.map_err(error_503)?;
        return Ok(HttpResponse::Ok().json(SendResponse {
            campaign_id,
            projected_total_recipients: 1,
            estimated_duration_seconds: 0.0,
        }));
    }

    if !campaign.status.is_sendable() {
        return Err(error_400(format!("campaign {campaign_id} is not in a sendable state")));
    }

    let recipient_source = PgListRecipientSource::new(state.pool.clone());
    let total_recipients =
        recipient_source.count(campaign.target_kind, &campaign.target_ref).await.map_err(error_503)?;
    if total_recipients == 0 {
        return Err(error_400("recipient set is empty"));
    }

    let estimated_duration_seconds = total_recipients as f64 / state.rate_limiter.rate_per_second();

    let campaign_repository: Arc<dyn CampaignRepository> = state.campaign_repository.clone();
    let pool = state.pool.clone();
    let base_url = state.base_url.clone();
    let unsubscribe_token_secret = state.unsubscribe_token_secret.clone();
    tokio::spawn(async move {
        let materializer = Materializer::new(
            PgListRecipientSource::new(pool.clone()),
            PgSuppressionStore::new(pool.clone()),
            PgWorkRecordStore::new(pool.clone()),
            PgJobQueue::new(pool),
            campaign_repository,
            base_url,
            unsubscribe_token_secret,
        );
        if let Err(error) = materializer.materialize(&campaign).await {
            tracing::error!(error = %error, campaign_id = %campaign_id, "materialization failed");
        }
    });

    Ok(HttpResponse::Ok().json(SendResponse { campaign_id, projected_total_recipients: total_recipients, estimated_duration_seconds }))
}
