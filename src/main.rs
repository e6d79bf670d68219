use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sea_orm_migration::MigratorTrait;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use school_transport_backend::{
    config::Config,
    db::{self, ClosureCalendar, SeaOrmStore},
    engine::{events::TracingEventSink, BookingEngine, EngineParts, EngineSettings},
    middleware::rate_limit::{create_global_governor, log_request},
    routes,
    utils::clock::SystemClock,
    AppState,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "school_transport_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    tracing::info!("Starting server at {}", config.server_addr());

    // Connect to database
    let db = db::connect(&config)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Connected to database");

    // Run migrations
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");
    tracing::info!("Migrations complete");

    let engine = Arc::new(BookingEngine::new(
        EngineParts {
            store: Arc::new(SeaOrmStore::new(db.clone())),
            calendar: Arc::new(ClosureCalendar::new(db.clone())),
            events: Arc::new(TracingEventSink),
            clock: Arc::new(SystemClock),
        },
        EngineSettings::from_config(&config),
    ));

    // Scheduled status sweep; the lease keeps other instances from overlapping
    let sweep_every = Duration::from_secs(config.sweep_interval_secs.max(1));
    tokio::spawn(engine.sweeper().run_periodically(sweep_every));
    tracing::info!(interval_secs = sweep_every.as_secs(), "Status sweep scheduled");

    let state = AppState {
        db,
        engine,
        config: config.clone(),
    };

    let app = routes::create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
            .layer(axum::middleware::from_fn(log_request))
            .layer(create_global_governor()),
    );

    // Start server with socket address for rate limiting
    let addr: SocketAddr = config.server_addr().parse().expect("Invalid address");
    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
