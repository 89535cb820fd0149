//! Gatekeeper - ANPR lane trigger and access control
//!
//! Main entry point: wires the stores, output board, plate reader and both
//! lanes, then serves the operator API until Ctrl-C.

use gatekeeper::{
    access_store::{AccessRepository, MemoryAccessStore, StoreHandles},
    anpr_client::AnprClient,
    frame_source,
    models::Direction,
    output_board::{OutputBoard, OutputDriver, SimulatedDriver, SysfsGpioDriver},
    plate_normalizer::{PlateGrammar, PlateNormalizer},
    state::{AppConfig, AppState, GpioMode},
    supervisor::{LaneSpec, SupervisorParts, SystemSupervisor},
    web_api,
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn connect_store(config: &AppConfig) -> anyhow::Result<StoreHandles> {
    match &config.database_url {
        Some(url) => {
            let pool = MySqlPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await?;
            tracing::info!("Database connected");
            Ok(StoreHandles::new("mysql", Arc::new(AccessRepository::new(pool))))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory access store");
            Ok(StoreHandles::new("memory", Arc::new(MemoryAccessStore::new())))
        }
    }
}

async fn output_driver(config: &AppConfig) -> anyhow::Result<Arc<dyn OutputDriver>> {
    match config.gpio_mode {
        GpioMode::Simulated => {
            tracing::warn!("GPIO_MODE=simulated, barrier outputs are not wired");
            Ok(Arc::new(SimulatedDriver::new()))
        }
        GpioMode::Sysfs => {
            let driver = SysfsGpioDriver::new(&config.gpio_sysfs_root);
            driver.init(config.line_map.pins()).await?;
            tracing::info!(root = %config.gpio_sysfs_root.display(), "Sysfs GPIO exported");
            Ok(Arc::new(driver))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatekeeper=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gatekeeper v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env()?;
    config.validate()?;
    tracing::info!(
        anpr_url = %config.anpr_url,
        entry_camera = %config.entry_camera,
        exit_camera = %config.exit_camera,
        entry_lot = %config.entry_lot_id,
        exit_lot = %config.exit_lot_id,
        plate_region = %config.plate_region,
        simulation = config.is_simulation(),
        "Configuration loaded"
    );

    // Initialize components
    let store = connect_store(&config).await?;

    let driver = output_driver(&config).await?;
    let board = Arc::new(OutputBoard::with_timeout(
        driver,
        config.line_map.clone(),
        config.actuation_timeout_ms,
    ));
    tracing::info!(driver = board.driver_name(), "OutputBoard initialized");

    let anpr = Arc::new(AnprClient::new(
        config.anpr_url.clone(),
        config.anpr_token.clone(),
        config.plate_region.clone(),
        Duration::from_millis(config.recognizer_timeout_ms),
    )?);
    if anpr.health_check().await {
        tracing::info!("Plate reader reachable");
    } else {
        tracing::warn!(url = %config.anpr_url, "Plate reader not reachable, lanes will retry");
    }

    let grammar = PlateGrammar::for_region(&config.plate_region)
        .ok_or_else(|| anyhow::anyhow!("unknown PLATE_REGION: {}", config.plate_region))?;
    let normalizer = Arc::new(PlateNormalizer::new(grammar, config.recognizer_confidence));
    tracing::info!(
        region = %normalizer.grammar().region,
        formats = normalizer.grammar().formats.len(),
        min_confidence = config.recognizer_confidence,
        "PlateNormalizer initialized"
    );

    let supervisor = Arc::new(SystemSupervisor::new(
        SupervisorParts {
            store,
            board,
            detector: anpr.clone(),
            recognizer: anpr,
            normalizer,
        },
        config.supervisor_config(),
    ));

    let mut specs = Vec::with_capacity(Direction::ALL.len());
    for lane in Direction::ALL {
        specs.push(LaneSpec {
            lane,
            config: config.lane_config(lane),
            source: frame_source::from_setting(
                config.camera(lane),
                Duration::from_millis(config.recognizer_timeout_ms),
            )?,
        });
    }
    supervisor.start(specs).await?;
    tracing::info!("SystemSupervisor started - both lanes running");

    let state = AppState {
        config: Arc::new(config),
        supervisor: supervisor.clone(),
        started_at: Instant::now(),
    };

    // Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = web_api::create_router(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown().await;
    tracing::info!("Gatekeeper stopped");

    Ok(())
}
