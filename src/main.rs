use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use ratelimit_backend::{
    AppState,
    cache::RateLimitCache,
    cleanup::CleanupJob,
    config::Config,
    database::{MemoryRateLimitStore, PgRateLimitStore, RateLimitStore},
    router::create_router,
    service::RateLimitService,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");
    let rule = config.default_rule().expect("Invalid default rate limit rule");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置持久化存储，未配置数据库时使用进程内存储
    let store: Arc<dyn RateLimitStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        conn.execute("SET application_name = 'ratelimit_backend';")
                            .await?;
                        Ok(())
                    })
                })
                .connect(url)
                .await
                .expect("Failed to connect to Postgres");

            let store = PgRateLimitStore::new(Arc::new(pool));
            store
                .ensure_schema()
                .await
                .expect("Failed to create rate limit table");
            tracing::info!("Using Postgres rate limit store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, rate limit counters are kept in memory");
            Arc::new(MemoryRateLimitStore::new())
        }
    };

    // 设置缓存
    let cache = RateLimitCache::connect(
        config.cache_mode,
        config.redis_url.as_deref(),
        config.lru_capacity,
    )
    .await;

    let service = Arc::new(RateLimitService::new(
        Arc::new(cache),
        store.clone(),
        config.failure_policy,
    ));

    // 启动过期记录清理
    let cleanup = Arc::new(CleanupJob::new(store, config.cleanup()));
    cleanup.start();

    // 设置应用状态
    let state = AppState {
        service,
        cleanup: cleanup.clone(),
        config: config.clone(),
        rule,
    };

    tracing::info!(
        strategy = %rule.strategy(),
        max_requests = rule.max_requests(),
        window_ms = rule.window_ms(),
        "Default rate limit rule loaded"
    );

    // 添加请求日志
    let router =
        create_router(state.clone()).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cleanup))
    .await
    .expect("Failed to start server");
}

async fn shutdown_signal(cleanup: Arc<CleanupJob>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    cleanup.stop();
}
