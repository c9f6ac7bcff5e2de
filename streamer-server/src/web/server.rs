use super::handlers;
use super::registry::HandlerRegistry;
use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub registry: HandlerRegistry,
    pub body_buffer_chunks: usize,
}

pub fn create_router(registry: HandlerRegistry, body_buffer_chunks: usize) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(handlers::health_check))
        .route("/api/v1/routes", get(handlers::list_routes))
        // 其余请求按注册表分发
        .fallback(handlers::dispatch)
        .with_state(AppState {
            registry,
            body_buffer_chunks,
        })
        .layer(TraceLayer::new_for_http())
}

/// HTTP流服务器
pub struct StreamServer {
    addr: SocketAddr,
    registry: HandlerRegistry,
    body_buffer_chunks: usize,
}

impl StreamServer {
    pub fn new(addr: SocketAddr, registry: HandlerRegistry, body_buffer_chunks: usize) -> Self {
        Self {
            addr,
            registry,
            body_buffer_chunks,
        }
    }

    /// 运行直到收到 Ctrl+C
    pub async fn run(&self) -> Result<()> {
        let app = create_router(self.registry.clone(), self.body_buffer_chunks);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("HTTP server running on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
