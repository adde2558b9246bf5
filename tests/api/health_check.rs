use crate::helpers::spawn_app;

#[tokio::test]
async fn health_check_reports_empty_queue() {
    let app = spawn_app().await;

    let resp = app.get_health().await;

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["database_reachable"], true);
    assert_eq!(body["queue_paused"], false);
    assert_eq!(body["waiting"], 0);
    assert_eq!(body["circuit_state"], "closed");
}

#[tokio::test]
async fn health_check_reflects_paused_queue() {
    let app = spawn_app().await;

    app.dispatch_control.pause();
    let resp = app.get_health().await;

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["queue_paused"], true);
}
