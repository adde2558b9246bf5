use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;

#[tokio::test]
async fn send_requires_a_logged_in_user() {
    let app = spawn_app().await;
    let list = app.insert_test_list(1).await;
    let campaign_id = app.insert_draft_campaign(&list).await;

    let resp = app.post_send_campaign(campaign_id, &serde_json::json!({})).await;

    assert_eq!(resp.status().as_u16(), 303);
}

#[tokio::test]
async fn test_mode_send_bypasses_the_queue() {
    let app = spawn_app().await;
    app.login().await;
    let list = app.insert_test_list(3).await;
    let campaign_id = app.insert_draft_campaign(&list).await;

    Mock::given(method("POST"))
        .and(path("/v1/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "provider-msg-1"})))
        .expect(1)
        .mount(&app.provider_server)
        .await;

    let resp = app
        .post_send_campaign(campaign_id, &serde_json::json!({"test_mode": true, "test_email": "qa@example.com"}))
        .await;

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["projected_total_recipients"], 1);

    let stats = app.get_campaign_stats(campaign_id).await;
    let stats: serde_json::Value = stats.json().await.unwrap();
    assert_eq!(stats["status"], "draft");
}

#[tokio::test]
async fn send_rejects_an_empty_recipient_set() {
    let app = spawn_app().await;
    app.login().await;
    let list = app.insert_test_list(0).await;
    let campaign_id = app.insert_draft_campaign(&list).await;

    let resp = app.post_send_campaign(campaign_id, &serde_json::json!({})).await;

    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn send_rejects_an_unknown_campaign() {
    let app = spawn_app().await;
    app.login().await;

    let resp = app.post_send_campaign(uuid::Uuid::new_v4(), &serde_json::json!({})).await;

    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn send_materializes_recipients_and_stats_reflects_it() {
    let app = spawn_app().await;
    app.login().await;
    let list = app.insert_test_list(5).await;
    let campaign_id = app.insert_draft_campaign(&list).await;

    let resp = app.post_send_campaign(campaign_id, &serde_json::json!({})).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["projected_total_recipients"], 5);

    // materialization runs on a detached task; give it a beat to land rows.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let stats = app.get_campaign_stats(campaign_id).await;
    assert!(stats.status().is_success());
    let stats: serde_json::Value = stats.json().await.unwrap();
    assert_eq!(stats["work_records"]["pending"], 5);

    let check = app.post_check_campaign(campaign_id).await;
    assert!(check.status().is_success());
    let check: serde_json::Value = check.json().await.unwrap();
    assert_eq!(check["finalized"], false);
}
