use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use campaign_dispatch::campaigns::CampaignRepository;
use campaign_dispatch::campaigns::PgCampaignRepository;
use campaign_dispatch::completion::CompletionMonitor;
use campaign_dispatch::configuration::get_configuration;
use campaign_dispatch::configuration::Settings;
use campaign_dispatch::dispatcher::DispatchControl;
use campaign_dispatch::dispatcher::Dispatcher;
use campaign_dispatch::events::PgEventLog;
use campaign_dispatch::provider::HttpProviderClient;
use campaign_dispatch::queue::rate_limiter::TokenBucketRateLimiter;
use campaign_dispatch::queue::PgJobQueue;
use campaign_dispatch::startup::get_connection_pool;
use campaign_dispatch::startup::Application;
use campaign_dispatch::suppression::PgSuppressionStore;
use campaign_dispatch::telemetry::get_subscriber;
use campaign_dispatch::telemetry::init_subscriber;
use campaign_dispatch::work_records::PgWorkRecordStore;
use campaign_dispatch::work_records::WorkRecordStore;
use tokio::task::JoinError;

fn report_exit(
    name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{name} exited gracefully")
        }
        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain=?e,
                error.message=%e,
                "{name} failed (inner)"
            )
        }
        Err(e) => {
            tracing::error!(
                error.cause_chain=?e,
                error.message=%e,
                "{name} failed (outer)"
            )
        }
    }
}

/// Claim-send-record loop, run on its own task. Sleeps a beat between empty
/// polls so an idle queue doesn't busy-spin, and checks `DispatchControl`
/// between every poll so `POST /queue/pause` takes effect on the next
/// iteration rather than mid-batch.
async fn run_dispatcher_worker(
    worker_id: String,
    cfg: Settings,
    pool: sqlx::PgPool,
    dispatch_control: Arc<DispatchControl>,
) -> Result<(), anyhow::Error> {
    let campaign_repository = Arc::new(PgCampaignRepository::new(pool.clone()));
    let (rate_per_second, burst) = cfg.provider.rate_limit();
    let dispatcher = Dispatcher::new(
        worker_id,
        chrono::Duration::seconds(cfg.dispatch.lock_ttl_seconds),
        Arc::new(PgJobQueue::new(pool.clone())),
        Arc::new(PgWorkRecordStore::new(pool.clone())),
        Arc::new(PgSuppressionStore::new(pool.clone())),
        Arc::new(HttpProviderClient::new(
            cfg.provider.base_url.clone(),
            cfg.provider.api_key.clone(),
            cfg.provider.timeout(),
            cfg.circuit_breaker.failure_threshold,
            cfg.circuit_breaker.success_threshold,
            chrono::Duration::seconds(cfg.circuit_breaker.cooldown_seconds),
        )),
        Arc::new(TokenBucketRateLimiter::new(rate_per_second, burst)),
        campaign_repository.clone(),
        Arc::new(PgEventLog::new(pool)),
    );

    loop {
        if dispatch_control.is_paused() {
            tokio::time::sleep(StdDuration::from_secs(1)).await;
            continue;
        }

        match dispatcher.poll_once().await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(StdDuration::from_secs(1)).await,
            Err(error) => {
                tracing::error!(error = %error, "dispatcher poll failed");
                tokio::time::sleep(StdDuration::from_secs(5)).await;
            }
        }
    }
}

/// Resets locks a crashed/killed worker left behind past `lock_ttl`, so
/// their work records don't sit stuck in `sending` forever.
async fn run_lock_recovery_sweep(
    cfg: Settings,
    pool: sqlx::PgPool,
) -> Result<(), anyhow::Error> {
    let work_records = PgWorkRecordStore::new(pool);
    let lock_ttl = chrono::Duration::seconds(cfg.dispatch.lock_ttl_seconds);
    loop {
        match work_records.recover_expired_locks(lock_ttl).await {
            Ok(recovered) if recovered > 0 => tracing::info!(recovered, "recovered expired work-record locks"),
            Ok(_) => {}
            Err(error) => tracing::error!(error = %error, "lock recovery sweep failed"),
        }
        tokio::time::sleep(StdDuration::from_secs(cfg.dispatch.recovery_sweep_interval_seconds)).await;
    }
}

/// Idempotent periodic half of the Completion Monitor: the dispatcher
/// triggers `check` reactively after every batch, but a crashed worker or a
/// dropped completion event can leave a fully-covered campaign sitting in
/// `sending`. This sweep re-asks every `sending` campaign on a timer so
/// finalization never depends solely on the reactive path.
async fn run_completion_sweep(
    cfg: Settings,
    pool: sqlx::PgPool,
) -> Result<(), anyhow::Error> {
    let campaign_repository = Arc::new(PgCampaignRepository::new(pool.clone()));
    let monitor = CompletionMonitor::new(
        Arc::new(PgWorkRecordStore::new(pool.clone())),
        Arc::new(PgJobQueue::new(pool)),
        campaign_repository,
    );
    loop {
        match monitor.sweep_all_sending().await {
            Ok(finalized) if finalized > 0 => tracing::info!(finalized, "completion sweep finalized campaigns"),
            Ok(_) => {}
            Err(error) => tracing::error!(error = %error, "completion sweep failed"),
        }
        tokio::time::sleep(StdDuration::from_secs(cfg.dispatch.completion_sweep_interval_seconds)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("campaign-dispatch", "info", std::io::stdout);
    init_subscriber(subscriber);

    let cfg = get_configuration().expect("failed to read configuration");
    let pool = get_connection_pool(&cfg.database);

    let dispatch_control = Arc::new(DispatchControl::new());
    let application = Application::build(cfg.clone(), dispatch_control.clone()).await?;

    let server = application.run_until_stopped();
    let lock_recovery_sweep = run_lock_recovery_sweep(cfg.clone(), pool.clone());
    let completion_sweep = run_completion_sweep(cfg.clone(), pool.clone());

    let server_thread = tokio::spawn(server);
    let lock_recovery_thread = tokio::spawn(lock_recovery_sweep);
    let completion_sweep_thread = tokio::spawn(completion_sweep);

    let mut dispatcher_workers = tokio::task::JoinSet::new();
    for slot in 0..cfg.dispatch.worker_concurrency {
        dispatcher_workers.spawn(run_dispatcher_worker(
            format!("worker-{slot}"),
            cfg.clone(),
            pool.clone(),
            dispatch_control.clone(),
        ));
    }

    tokio::select! {
        o = server_thread => { report_exit("API", o) },
        o = lock_recovery_thread => { report_exit("Lock recovery sweep", o) },
        o = completion_sweep_thread => { report_exit("Completion sweep", o) },
        Some(o) = dispatcher_workers.join_next() => { report_exit("Dispatcher worker", o) },
    }

    Ok(())
}
