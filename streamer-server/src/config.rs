use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use streamer_core::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

/// 命令行参数
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "streamer-server", version, about = "Chunked file and directory streaming server")]
pub struct Cli {
    /// TOML配置文件路径
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// 监听地址
    #[arg(long)]
    pub host: Option<String>,

    /// 监听端口
    #[arg(short, long)]
    pub port: Option<u16>,

    /// 通过文件路由提供的文件
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// 通过目录路由提供的目录
    #[arg(long, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// 读取块大小（字节）
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub streaming: StreamingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// 读取块大小
    pub chunk_size: usize,
    /// 响应体通道中最多缓冲的块数
    pub body_buffer_chunks: usize,
    pub file_path: Option<PathBuf>,
    pub file_route: String,
    pub dir_path: Option<PathBuf>,
    pub dir_route: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            body_buffer_chunks: 4,
            file_path: None,
            file_route: "/file_stream".to_string(),
            dir_path: None,
            dir_route: "/dir_stream".to_string(),
        }
    }
}

impl Config {
    /// 加载配置
    ///
    /// 未指定文件时使用默认值；指定的文件不存在时返回错误。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 用命令行参数覆盖配置
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(file) = &cli.file {
            self.streaming.file_path = Some(file.clone());
        }
        if let Some(dir) = &cli.dir {
            self.streaming.dir_path = Some(dir.clone());
        }
        if let Some(chunk_size) = cli.chunk_size {
            self.streaming.chunk_size = chunk_size;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            bail!("Server host cannot be empty");
        }
        if self.streaming.chunk_size == 0 {
            bail!("Chunk size must be greater than 0");
        }
        if self.streaming.chunk_size > MAX_CHUNK_SIZE {
            bail!("Chunk size must not exceed {} bytes", MAX_CHUNK_SIZE);
        }
        if self.streaming.body_buffer_chunks == 0 {
            bail!("Body buffer must hold at least one chunk");
        }
        for route in [&self.streaming.file_route, &self.streaming.dir_route] {
            if !route.starts_with('/') {
                bail!("Route must start with '/': {}", route);
            }
        }
        if self.streaming.file_path.is_some()
            && self.streaming.dir_path.is_some()
            && self.streaming.file_route == self.streaming.dir_route
        {
            bail!("File and directory routes collide: {}", self.streaming.file_route);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.streaming.chunk_size, 4096);
        assert_eq!(config.streaming.body_buffer_chunks, 4);
        assert_eq!(config.streaming.file_route, "/file_stream");
        assert_eq!(config.streaming.dir_route, "/dir_stream");
        assert!(config.streaming.file_path.is_none());
        assert!(config.streaming.dir_path.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000

            [streaming]
            dir_path = "/var/log/app"
            chunk_size = 300
            "#,
        )
        .unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.streaming.chunk_size, 300);
        assert_eq!(config.streaming.dir_path, Some(PathBuf::from("/var/log/app")));
        assert_eq!(config.streaming.dir_route, "/dir_stream");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[streaming]\nfile_route = \"/log\"").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.streaming.file_route, "/log");
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/streamer.toml"))).is_err());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.streaming.body_buffer_chunks = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.streaming.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.streaming.dir_route = "dir_stream".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.streaming.file_path = Some(PathBuf::from("a.log"));
        config.streaming.dir_path = Some(PathBuf::from("logs"));
        config.streaming.dir_route = "/file_stream".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chunk_size_upper_bound() {
        let mut config = Config::default();
        config.streaming.chunk_size = 1024 * 1024;
        assert!(config.validate().is_ok());

        config.streaming.chunk_size = 1024 * 1024 + 1;
        assert!(config.validate().is_err());

        let cli = Cli::parse_from(["streamer-server", "--chunk-size", "4194304"]);
        let mut config = Config::default();
        config.apply_cli(&cli);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "streamer-server",
            "--port",
            "9090",
            "--dir",
            "/tmp/logs",
            "--chunk-size",
            "1024",
        ]);
        let mut config = Config::default();
        config.apply_cli(&cli);

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.streaming.dir_path, Some(PathBuf::from("/tmp/logs")));
        assert_eq!(config.streaming.chunk_size, 1024);
        assert!(config.streaming.file_path.is_none());
    }
}
