use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::Argon2;
use argon2::PasswordHasher;
use campaign_dispatch::configuration::get_configuration;
use campaign_dispatch::configuration::DatabaseSettings;
use campaign_dispatch::dispatcher::DispatchControl;
use campaign_dispatch::startup::get_connection_pool;
use campaign_dispatch::startup::Application;
use campaign_dispatch::telemetry::get_subscriber;
use campaign_dispatch::telemetry::init_subscriber;
use once_cell::sync::Lazy;
use sqlx::Connection;
use sqlx::Executor;
use sqlx::PgConnection;
use sqlx::PgPool;
use uuid::Uuid;
use wiremock::MockServer;

/// Init a static subscriber. Opt in to verbose logging with `TEST_LOG=true`.
static TRACING: Lazy<()> = Lazy::new(|| match std::env::var("TEST_LOG") {
    Ok(_) => init_subscriber(get_subscriber("test", "debug", std::io::stdout)),
    Err(_) => init_subscriber(get_subscriber("test", "debug", std::io::sink)),
});

pub struct TestApp {
    pub addr: String,
    pub port: u16,
    pub pool: PgPool,
    pub provider_server: MockServer,
    pub dispatch_control: Arc<DispatchControl>,
    pub test_user: TestUser,
    api_client: reqwest::Client,
}

pub struct TestUser {
    pub username: String,
    password: String,
}

impl TestUser {
    pub fn generate() -> Self {
        Self { username: Uuid::new_v4().to_string(), password: Uuid::new_v4().to_string() }
    }

    async fn store(
        &self,
        pool: &PgPool,
    ) {
        let password_hash = Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon2::Params::new(19456, 2, 1, None).unwrap(),
        )
        .hash_password(self.password.as_bytes(), &SaltString::generate(&mut rand::thread_rng()))
        .unwrap()
        .to_string();

        sqlx::query!(
            "INSERT INTO users (user_id, username, password_hash) VALUES ($1, $2, $3)",
            Uuid::new_v4(),
            self.username,
            password_hash,
        )
        .execute(pool)
        .await
        .unwrap();
    }
}

/// A minimal `customers` + `list_members` fixture: one list with `size`
/// active, non-suppressed recipients.
pub struct TestList {
    pub list_id: Uuid,
}

impl TestApp {
    pub async fn post_login(
        &self,
        body: &serde_json::Value,
    ) -> reqwest::Response {
        self.api_client
            .post(format!("{}/login", self.addr))
            .form(body)
            .send()
            .await
            .expect("execute request")
    }

    pub async fn get_login_html(&self) -> String {
        self.api_client.get(format!("{}/login", self.addr)).send().await.expect("execute request").text().await.unwrap()
    }

    pub async fn get_health(&self) -> reqwest::Response {
        self.api_client.get(format!("{}/health", self.addr)).send().await.expect("execute request")
    }

    pub async fn post_admin_logout(&self) -> reqwest::Response {
        self.api_client.post(format!("{}/admin/logout", self.addr)).send().await.expect("execute request")
    }

    pub async fn post_send_campaign(
        &self,
        campaign_id: Uuid,
        body: &serde_json::Value,
    ) -> reqwest::Response {
        self.api_client
            .post(format!("{}/admin/campaigns/{campaign_id}/send", self.addr))
            .json(body)
            .send()
            .await
            .expect("execute request")
    }

    pub async fn get_campaign_stats(
        &self,
        campaign_id: Uuid,
    ) -> reqwest::Response {
        self.api_client
            .get(format!("{}/admin/campaigns/{campaign_id}/stats", self.addr))
            .send()
            .await
            .expect("execute request")
    }

    pub async fn post_check_campaign(
        &self,
        campaign_id: Uuid,
    ) -> reqwest::Response {
        self.api_client
            .post(format!("{}/admin/campaigns/{campaign_id}/check", self.addr))
            .send()
            .await
            .expect("execute request")
    }

    pub async fn post_queue_pause(&self) -> reqwest::Response {
        self.api_client.post(format!("{}/admin/queue/pause", self.addr)).send().await.expect("execute request")
    }

    pub async fn post_queue_resume(&self) -> reqwest::Response {
        self.api_client.post(format!("{}/admin/queue/resume", self.addr)).send().await.expect("execute request")
    }

    pub async fn post_queue_clean(&self) -> reqwest::Response {
        self.api_client.post(format!("{}/admin/queue/clean", self.addr)).send().await.expect("execute request")
    }

    /// Logs in as `test_user`; the underlying client keeps the session
    /// cookie for subsequent requests.
    pub async fn login(&self) {
        let body = serde_json::json!({
            "username": self.test_user.username,
            "password": self.test_user.password,
        });
        let resp = self.post_login(&body).await;
        assert_eq!(resp.status().as_u16(), 303);
    }

    pub async fn insert_draft_campaign(
        &self,
        target: &TestList,
    ) -> Uuid {
        let campaign_id = Uuid::new_v4();
        sqlx::query!(
            r#"
            INSERT INTO campaigns (
                campaign_id, subject, html_body, sender_name, sender_email,
                target_kind, target_ref, status
            ) VALUES ($1, $2, $3, $4, $5, 'list', $6, 'draft')
            "#,
            campaign_id,
            "Test subject",
            "<p>hello</p>",
            "Sender",
            "sender@example.com",
            target.list_id.to_string(),
        )
        .execute(&self.pool)
        .await
        .unwrap();
        campaign_id
    }

    pub async fn insert_test_list(
        &self,
        size: usize,
    ) -> TestList {
        let list_id = Uuid::new_v4();
        for i in 0..size {
            let customer_id = Uuid::new_v4();
            let email = format!("recipient-{i}-{customer_id}@example.com");
            sqlx::query!(
                "INSERT INTO customers (customer_id, email_normalized) VALUES ($1, $2)",
                customer_id,
                email,
            )
            .execute(&self.pool)
            .await
            .unwrap();
            sqlx::query!(
                "INSERT INTO list_members (list_id, customer_id, email) VALUES ($1, $2, $3)",
                list_id,
                customer_id,
                email,
            )
            .execute(&self.pool)
            .await
            .unwrap();
        }
        TestList { list_id }
    }
}

async fn configure_database(cfg: &DatabaseSettings) -> PgPool {
    let mut conn = PgConnection::connect_with(&cfg.without_db()).await.expect("postgres must be running");

    conn.execute(format!(r#"CREATE DATABASE "{}";"#, cfg.database_name).as_str()).await.unwrap();

    let pool = PgPool::connect_with(cfg.connection()).await.unwrap();
    sqlx::migrate!().run(&pool).await.expect("failed to migrate");
    pool
}

/// Spawns the application against a freshly migrated, randomly named
/// database, with the outbound provider replaced by a `wiremock` server.
/// Must not be `async fn` — see
/// https://github.com/LukeMathWalker/zero-to-production/issues/242.
pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let provider_server = MockServer::start().await;

    let cfg = {
        let mut cfg = get_configuration().expect("failed to read configuration");
        cfg.database.database_name = Uuid::new_v4().to_string();
        cfg.application.port = 0;
        cfg.provider.base_url = provider_server.uri();
        cfg
    };

    configure_database(&cfg.database).await;

    let dispatch_control = Arc::new(DispatchControl::new());
    let app = Application::build(cfg.clone(), dispatch_control.clone()).await.expect("failed to build application");

    let port = app.get_port();
    let addr = format!("http://localhost:{port}");
    let pool = get_connection_pool(&cfg.database);
    tokio::spawn(app.run_until_stopped());

    let api_client = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).cookie_store(true).build().unwrap();

    let test_user = TestUser::generate();
    let test_app = TestApp { addr, port, pool, provider_server, dispatch_control, test_user, api_client };
    test_app.test_user.store(&test_app.pool).await;
    test_app
}

pub fn check_redirect(
    response: &reqwest::Response,
    location: &str,
) {
    assert_eq!(response.status().as_u16(), 303);
    assert_eq!(response.headers().get("Location").unwrap(), location);
}
