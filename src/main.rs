use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{signal, sync::mpsc};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use ticketflow_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    // Init Redis client (construction only; connection checked in health)
    let redis_client = Arc::new(redis::Client::open(cfg.redis_url.clone())?);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Build services
    let dispatcher = api::gateways::GatewayDispatcher::from_config(&cfg)?;
    let sessions = api::services::SessionService::new(db.clone(), cfg.session_ttl_days);
    let stock = api::services::StockService::new(db.clone());
    let promotions = api::services::promotions::PromotionService::new(db.clone());
    let orchestrator = Arc::new(api::services::PaymentOrchestrator::new(
        db.clone(),
        sessions.clone(),
        stock,
        promotions,
        dispatcher,
        event_sender.clone(),
        cfg.shipping_fee_minor,
    ));

    // Reconciliation sweeper resolves payments stuck in-flight
    let sweeper = api::services::ReconciliationSweeper::new(
        orchestrator.clone(),
        sessions.clone(),
        event_sender.clone(),
        cfg.sweep_interval_secs,
        cfg.stuck_threshold_secs,
    );
    tokio::spawn(sweeper.run());

    let port = cfg.port;
    let app_state = api::AppState {
        db,
        config: Arc::new(cfg),
        event_sender,
        orchestrator,
        sessions,
        redis: redis_client,
    };

    let app = api::app_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("ticketflow-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
