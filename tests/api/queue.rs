use crate::helpers::spawn_app;

#[tokio::test]
async fn pause_and_resume_flip_the_dispatch_control() {
    let app = spawn_app().await;
    app.login().await;

    assert!(!app.dispatch_control.is_paused());

    let resp = app.post_queue_pause().await;
    assert!(resp.status().is_success());
    assert!(app.dispatch_control.is_paused());

    let resp = app.post_queue_resume().await;
    assert!(resp.status().is_success());
    assert!(!app.dispatch_control.is_paused());
}

#[tokio::test]
async fn clean_reports_zero_deleted_on_an_empty_queue() {
    let app = spawn_app().await;
    app.login().await;

    let resp = app.post_queue_clean().await;

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["deleted"], 0);
}

#[tokio::test]
async fn check_on_an_unknown_campaign_is_a_no_op() {
    let app = spawn_app().await;
    app.login().await;

    let resp = app.post_check_campaign(uuid::Uuid::new_v4()).await;

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["finalized"], false);
}
