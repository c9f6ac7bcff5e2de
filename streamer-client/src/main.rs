mod downloader;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// 从流服务器下载文件
#[derive(Debug, Parser)]
#[command(name = "streamer-client", version, about = "Download files from a streaming endpoint")]
struct Cli {
    /// 流路由的完整URL
    #[arg(long, default_value = "http://127.0.0.1:8080/dir_stream")]
    url: String,

    /// 保存下载文件的目录
    #[arg(long, value_name = "DIR")]
    download_dir: PathBuf,

    /// 范围起点（包含）
    #[arg(long)]
    from: Option<String>,

    /// 范围终点（包含）
    #[arg(long)]
    to: Option<String>,
}

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

    let cli = Cli::parse();
    let url = downloader::build_url(&cli.url, cli.from.as_deref(), cli.to.as_deref())?;

    let downloader = downloader::Downloader::new(cli.download_dir.clone()).await?;
    let files = downloader.download(url).await?;

    let total: u64 = files.iter().map(|f| f.bytes).sum();
    info!(
        "✅ Downloaded {} file(s), {} bytes into {}",
        files.len(),
        total,
        cli.download_dir.display()
    );
    Ok(())
}
