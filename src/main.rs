use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use stampee::{
    AppState, build_app,
    config::Config,
    database,
    session::{MemoryStore, RedisStore, SessionStore},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("DATABASE_URL must be set");

    let pool = database::connect(&config.database_url)
        .await
        .expect("Failed to open the database");
    database::migrate(&pool)
        .await
        .expect("Failed to run database migrations");

    // Redis keeps sessions across restarts and instances; memory is enough otherwise.
    let sessions = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).expect("Failed to create Redis client");
            tracing::info!("Storing sessions in Redis");
            SessionStore::Redis(RedisStore::new(Arc::new(client), config.session_ttl()))
        }
        None => {
            tracing::info!("Storing sessions in memory");
            SessionStore::Memory(MemoryStore::new(config.session_ttl()))
        }
    };

    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );

    let state = AppState {
        pool,
        config: Arc::new(config),
        sessions,
    };
    let app = build_app(state);

    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
