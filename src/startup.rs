use std::net::TcpListener;
use std::sync::Arc;

use actix_session::storage::RedisSessionStore;
use actix_session::SessionMiddleware;
use actix_web::cookie::Key;
use actix_web::dev::Server;
use actix_web::web;
use actix_web::App;
use actix_web::HttpServer;
use actix_web_flash_messages::storage::CookieMessageStore;
use actix_web_flash_messages::FlashMessagesFramework;
use actix_web_lab::middleware::from_fn;
use secrecy::ExposeSecret;
use secrecy::Secret;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::authentication::reject_anonymous_users;
use crate::campaigns::PgCampaignRepository;
use crate::configuration::DatabaseSettings;
use crate::configuration::DispatchSettings;
use crate::configuration::Settings;
use crate::dispatcher::DispatchControl;
use crate::events::PgEventLog;
use crate::provider::HttpProviderClient;
use crate::queue::rate_limiter::TokenBucketRateLimiter;
use crate::queue::PgJobQueue;
use crate::routes::admin::clean_queue;
use crate::routes::admin::logout;
use crate::routes::admin::pause_queue;
use crate::routes::admin::resume_queue;
use crate::routes::admin::send_campaign;
use crate::routes::admin::stats_campaign;
use crate::routes::admin::check_campaign;
use crate::routes::health_check;
use crate::routes::login;
use crate::routes::login_form;
use crate::suppression::PgSuppressionStore;
use crate::work_records::PgWorkRecordStore;

/// Every store this service's HTTP surface needs a handle to — the same
/// instances the background workers spawned in `main.rs` hold, all backed
/// by the same `PgPool`.
pub struct AppState {
    pub pool: PgPool,
    pub work_records: Arc<PgWorkRecordStore>,
    pub event_log: Arc<PgEventLog>,
    pub job_queue: Arc<PgJobQueue>,
    pub campaign_repository: Arc<PgCampaignRepository>,
    pub suppression_store: Arc<PgSuppressionStore>,
    pub provider_client: Arc<HttpProviderClient>,
    pub rate_limiter: Arc<TokenBucketRateLimiter>,
    pub dispatch_control: Arc<DispatchControl>,
    pub dispatch: DispatchSettings,
    pub base_url: String,
    pub unsubscribe_token_secret: Secret<String>,
}

/// Wrapper for actix's `Server` with access to the bound port. Not to be
/// confused with actix's `App`!
pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(
        cfg: Settings,
        dispatch_control: Arc<DispatchControl>,
    ) -> Result<Self, anyhow::Error> {
        let addr = format!("{}:{}", cfg.application.host, cfg.application.port);
        let listener = TcpListener::bind(addr)?;
        let port = listener.local_addr().unwrap().port();

        let pool = get_connection_pool(&cfg.database);
        let (rate_per_second, burst) = cfg.provider.rate_limit();

        let state = web::Data::new(AppState {
            pool: pool.clone(),
            work_records: Arc::new(PgWorkRecordStore::new(pool.clone())),
            event_log: Arc::new(PgEventLog::new(pool.clone())),
            job_queue: Arc::new(PgJobQueue::new(pool.clone())),
            campaign_repository: Arc::new(PgCampaignRepository::new(pool.clone())),
            suppression_store: Arc::new(PgSuppressionStore::new(pool.clone())),
            provider_client: Arc::new(HttpProviderClient::new(
                cfg.provider.base_url.clone(),
                cfg.provider.api_key.clone(),
                cfg.provider.timeout(),
                cfg.circuit_breaker.failure_threshold,
                cfg.circuit_breaker.success_threshold,
                chrono::Duration::seconds(cfg.circuit_breaker.cooldown_seconds),
            )),
            rate_limiter: Arc::new(TokenBucketRateLimiter::new(rate_per_second, burst)),
            dispatch_control,
            dispatch: cfg.dispatch,
            base_url: cfg.application.base_url.clone(),
            unsubscribe_token_secret: cfg.application.unsubscribe_token_secret.clone(),
        });

        let server = run(
            listener,
            state,
            cfg.application.base_url,
            cfg.application.hmac_secret,
            cfg.redis_uri,
        )
        .await?;

        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 { self.port }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> { self.server.await }
}

pub fn get_connection_pool(db_cfg: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(db_cfg.connection())
}

pub struct AppBaseUrl(pub String);

pub async fn run(
    listener: TcpListener,
    state: web::Data<AppState>,
    base_url: String,
    hmac_secret: Secret<String>,
    redis_uri: Secret<String>,
) -> Result<Server, anyhow::Error> {
    let secret_key = Key::from(hmac_secret.expose_secret().as_bytes());

    let cookie_store = CookieMessageStore::builder(secret_key.clone()).build();
    let msg_framework = FlashMessagesFramework::builder(cookie_store).build();

    let redis_store = RedisSessionStore::new(redis_uri.expose_secret()).await?;

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(msg_framework.clone())
            .wrap(SessionMiddleware::new(redis_store.clone(), secret_key.clone()))
            .route("/health", web::get().to(health_check))
            .route("/login", web::get().to(login_form))
            .route("/login", web::post().to(login))
            .service(
                web::scope("/admin")
                    .wrap(from_fn(reject_anonymous_users))
                    .route("/logout", web::post().to(logout))
                    .route("/campaigns/{campaign_id}/send", web::post().to(send_campaign))
                    .route("/campaigns/{campaign_id}/stats", web::get().to(stats_campaign))
                    .route("/campaigns/{campaign_id}/check", web::post().to(check_campaign))
                    .route("/queue/pause", web::post().to(pause_queue))
                    .route("/queue/resume", web::post().to(resume_queue))
                    .route("/queue/clean", web::post().to(clean_queue)),
            )
            .app_data(state.clone())
            .app_data(web::Data::new(AppBaseUrl(base_url.clone())))
    })
    .listen(listener)?
    .run();

    Ok(server)
}
