use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use attendance::{
    admin::AdminService,
    attendance::AttendanceRecorder,
    clock::{Clock, SystemClock},
    config::{FanoutMode, ServiceConfig},
    middleware::{JwtConfig, JwtVerifier},
    notifications::{self, EventPublisher, LocalPublisher, NotificationHub, RedisPublisher},
    qr::{QrCodec, QrConfig},
    repositories::{PgRepository, Store},
    routes,
    sessions::SessionManager,
    state::AppState,
    sweeper::AbsenceSweeper,
};
use common::cache::{RedisConfig, RedisPool};
use common::database::{DatabaseConfig, init_pool};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting attendance service");

    let service_config = ServiceConfig::from_env()?;
    let qr_config = QrConfig::from_env()?;
    let jwt_config = JwtConfig::from_env()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    // Check database connectivity
    if common::database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    let repository = PgRepository::new(pool.clone());
    repository.migrate().await?;
    info!("Database migrations applied");

    let store: Arc<dyn Store> = Arc::new(repository);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let codec = Arc::new(QrCodec::new(&qr_config)?);
    let hub = Arc::new(NotificationHub::new());

    let publisher: Arc<dyn EventPublisher> = match service_config.fanout {
        FanoutMode::Local => Arc::new(LocalPublisher::new(hub.clone())),
        FanoutMode::Redis => {
            let redis = RedisPool::new(&RedisConfig::from_env()?).await?;
            if !redis.health_check().await? {
                anyhow::bail!("Failed to connect to Redis");
            }

            tokio::spawn(notifications::supervise_redis_relay(
                redis.clone(),
                hub.clone(),
            ));
            Arc::new(RedisPublisher::new(redis))
        }
    };

    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        codec.clone(),
        clock.clone(),
        service_config.validity_policy(),
    ));
    let recorder = Arc::new(AttendanceRecorder::new(
        store.clone(),
        codec,
        clock.clone(),
        publisher,
    ));
    let admin = Arc::new(AdminService::new(store.clone(), clock.clone()));

    let sweeper = AbsenceSweeper::new(
        store,
        recorder.clone(),
        clock,
        service_config.sweep_batch_size,
    );
    let _scheduler = sweeper.start(&service_config.sweep_schedule).await?;

    let app_state = AppState {
        db_pool: Some(pool),
        sessions,
        recorder,
        admin,
        hub,
        verifier: Arc::new(JwtVerifier::new(&jwt_config)?),
    };

    info!("Attendance service initialized successfully");

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&service_config.bind_address).await?;
    info!("Attendance service listening on {}", service_config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Attendance service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
