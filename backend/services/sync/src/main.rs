mod alerts;
mod api;
mod erp;
mod orchestrator;
mod queue;
mod retry;
mod scheduler;

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Local;
use syncline_common::error::{SynclineError, SynclineResult};
use syncline_common::types::ServiceInfo;
use syncline_config::{init_tracing, AppConfig, SyncSettings};
use syncline_reconcile::ReconcileConfig;
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertDispatcher, AlertSink, LogAlertSink, WebhookAlertSink};
use crate::api::{build_router, AppState};
use crate::erp::client::{ErpClientConfig, HttpErpClient};
use crate::erp::mock::InMemoryErp;
use crate::erp::ErpClient;
use crate::orchestrator::{OrchestratorConfig, SyncOrchestrator, SyncStores};
use crate::queue::{run_worker, RunQueue};
use crate::scheduler::{catch_up_on_startup, DailyScheduler};

const SERVICE_NAME: &str = "syncline-sync";

#[tokio::main]
async fn main() {
    init_tracing("info");

    if let Err(e) = run().await {
        tracing::error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

fn erp_client(settings: &SyncSettings) -> SynclineResult<Arc<dyn ErpClient>> {
    match ErpClientConfig::from_env().map_err(SynclineError::Config)? {
        Some(config) => {
            tracing::info!(base_url = %config.base_url, tenant = %config.tenant, "erp client configured");
            let client = HttpErpClient::new(config)
                .map_err(|e| SynclineError::Config(format!("failed to build erp client: {e}")))?;
            Ok(Arc::new(client))
        }
        None if settings.erp_mock_mode => {
            tracing::warn!("ERP_MOCK_MODE enabled, syncing against demo data");
            Ok(Arc::new(InMemoryErp::demo()))
        }
        None => Err(SynclineError::Config(
            "ERP_BASE_URL is not set and ERP_MOCK_MODE is off".to_owned(),
        )),
    }
}

fn alert_sink(settings: &SyncSettings) -> SynclineResult<Arc<dyn AlertSink>> {
    match &settings.alert_webhook_url {
        Some(url) => {
            let sink = WebhookAlertSink::new(url, settings.alert_timeout)
                .map_err(|e| SynclineError::Config(format!("failed to build alert webhook: {e}")))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(LogAlertSink)),
    }
}

async fn run() -> SynclineResult<()> {
    let config = AppConfig::from_env()?;
    let settings = SyncSettings::from_env()?;
    let reconcile = ReconcileConfig::from_env()?;
    let service = Arc::new(ServiceInfo::new(SERVICE_NAME));
    tracing::info!(
        service = SERVICE_NAME,
        version = %service.version,
        instance_id = %service.instance_id,
        "starting"
    );

    let pool = syncline_db::create_pool(&config.database_url).await?;
    syncline_db::ensure_schema(&pool).await?;
    let stores = SyncStores::postgres(pool);

    let erp = erp_client(&settings)?;
    let dispatcher = AlertDispatcher::new(alert_sink(&settings)?, settings.alert_timeout);
    let orchestrator = Arc::new(SyncOrchestrator::new(
        erp,
        stores.clone(),
        dispatcher,
        OrchestratorConfig::from_settings(&settings, reconcile),
    ));

    let queue = Arc::new(RunQueue::new());
    let shutdown = CancellationToken::new();

    let worker = tokio::spawn(run_worker(queue.clone(), orchestrator, shutdown.clone()));
    let scheduler = tokio::spawn(
        DailyScheduler::new(queue.clone(), settings.daily_at).run(shutdown.clone()),
    );

    if settings.catch_up_on_startup {
        if let Err(e) =
            catch_up_on_startup(stores.runs.as_ref(), &queue, settings.daily_at, &Local::now()).await
        {
            tracing::error!(error = %e, "catch-up check failed");
        }
    }

    let app = build_router(AppState {
        service,
        stores,
        queue,
    });
    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .map_err(|e| SynclineError::Config(format!("invalid bind address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SynclineError::Internal(format!("failed to bind {addr}: {e}")))?;
    tracing::info!(%addr, "listening");

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
            signal.cancel();
        })
        .await;

    shutdown.cancel();
    let _ = tokio::join!(worker, scheduler);
    tracing::info!("stopped");
    served.map_err(|e| SynclineError::Internal(format!("server error: {e}")))
}
