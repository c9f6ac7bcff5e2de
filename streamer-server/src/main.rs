mod config;
mod web;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use streamer_core::{ChunkerConfig, FileStreamer, FlatDirStreamer, Transport};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志 - 使用环境变量 RUST_LOG 控制级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("🚀 Streamer server starting...");

    // 加载配置
    let cli = config::Cli::parse();
    let mut config = config::Config::load(cli.config.as_deref())?;
    config.apply_cli(&cli);
    config.validate()?;
    info!("✓ Configuration loaded");

    let registry = web::HandlerRegistry::new();
    let transport: Arc<dyn Transport> = Arc::new(registry.clone());
    let chunker_config = ChunkerConfig::with_chunk_size(config.streaming.chunk_size);

    // 端点在服务器运行期间保持存活，销毁时自动注销路由
    let mut file_streamer = None;
    if let Some(path) = &config.streaming.file_path {
        let mut streamer =
            FileStreamer::with_config(path.to_string_lossy(), chunker_config.clone());
        streamer
            .bind(
                Some(transport.clone()),
                &config.streaming.file_route,
                http::Method::GET,
            )
            .context("Failed to bind file endpoint")?;
        info!("✓ File {:?} -> {}", path, config.streaming.file_route);
        file_streamer = Some(streamer);
    }

    let mut dir_streamer = None;
    if let Some(path) = &config.streaming.dir_path {
        let mut streamer =
            FlatDirStreamer::with_config(path.to_string_lossy(), chunker_config.clone());
        streamer
            .bind(
                Some(transport.clone()),
                &config.streaming.dir_route,
                http::Method::GET,
            )
            .context("Failed to bind directory endpoint")?;
        info!("✓ Directory {:?} -> {}", path, config.streaming.dir_route);
        dir_streamer = Some(streamer);
    }

    if registry.is_empty() {
        warn!("⚠️  No file or directory configured, only /health is served");
        warn!("   Use --file/--dir or the [streaming] section of the config file");
    } else {
        info!("✓ {} streaming route(s) registered", registry.len());
    }

    let addr = config
        .bind_addr()
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.bind_addr()))?;
    let server = web::StreamServer::new(addr, registry, config.streaming.body_buffer_chunks);

    info!("✅ Streamer server ready!");
    server.run().await?;

    drop(file_streamer);
    drop(dir_streamer);
    Ok(())
}
