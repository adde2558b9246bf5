use crate::helpers::check_redirect;
use crate::helpers::spawn_app;

#[tokio::test]
async fn login_with_invalid_credentials_redirects_with_flash_message() {
    let app = spawn_app().await;

    let login_body = serde_json::json!({
        "username": "wrong-username",
        "password": "wrong-password",
    });
    let resp = app.post_login(&login_body).await;

    check_redirect(&resp, "/login");
    let html = app.get_login_html().await;
    assert!(html.contains("Authentication failed"));
}

#[tokio::test]
async fn login_with_valid_credentials_redirects_to_health() {
    let app = spawn_app().await;

    let login_body = serde_json::json!({
        "username": app.test_user.username,
        "password": app.test_user.password,
    });
    let resp = app.post_login(&login_body).await;

    check_redirect(&resp, "/health");
}

#[tokio::test]
async fn admin_routes_reject_anonymous_users() {
    let app = spawn_app().await;

    let resp = app.post_queue_pause().await;

    check_redirect(&resp, "/login");
}

#[tokio::test]
async fn logout_clears_the_session() {
    let app = spawn_app().await;
    app.login().await;

    let resp = app.post_admin_logout().await;
    check_redirect(&resp, "/login");

    let resp = app.post_queue_pause().await;
    check_redirect(&resp, "/login");
}
