use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Instant;
use streamer_core::multipart::disposition_filename;
use streamer_core::{MultipartDecoder, MultipartEvent};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// 已保存的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// 下载客户端
pub struct Downloader {
    client: reqwest::Client,
    download_dir: PathBuf,
}

impl Downloader {
    /// 创建客户端，下载目录不存在时自动创建
    pub async fn new(download_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&download_dir)
            .await
            .with_context(|| format!("Failed to create {}", download_dir.display()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            download_dir,
        })
    }

    /// 下载单个文件或multipart响应中的全部文件
    pub async fn download(&self, url: Url) -> Result<Vec<DownloadedFile>> {
        info!("Requesting {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Request failed")?
            .error_for_status()?;

        let headers = response.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        debug!("Response content type: {}", content_type);

        if content_type.contains("multipart") {
            save_multipart(response.bytes_stream(), &content_type, &self.download_dir).await
        } else {
            let name = single_item_name(&headers)
                .ok_or_else(|| anyhow!("No filename in Content-Disposition or X-Part-Name header"))?;
            let file = save_single(response.bytes_stream(), &name, &self.download_dir).await?;
            Ok(vec![file])
        }
    }
}

/// 拼接 `from`/`to` 查询参数
pub fn build_url(base: &str, from: Option<&str>, to: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("Invalid URL: {}", base))?;
    if from.is_some() || to.is_some() {
        let mut pairs = url.query_pairs_mut();
        if let Some(from) = from {
            pairs.append_pair("from", from);
        }
        if let Some(to) = to {
            pairs.append_pair("to", to);
        }
    }
    Ok(url)
}

/// 单条目响应的文件名
///
/// 优先使用 Content-Disposition 的 filename，其次 X-Part-Name。
pub fn single_item_name(headers: &HeaderMap) -> Option<String> {
    let from_disposition = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_filename);
    if let Some(name) = from_disposition {
        return Some(name.to_string());
    }

    let name = headers.get("x-part-name")?.to_str().ok()?.trim().trim_matches('"');
    (!name.is_empty()).then(|| name.to_string())
}

/// 校验服务端给出的名称可以直接用作下载目录中的文件名
pub fn safe_name(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." {
        bail!("Invalid file name: {:?}", name);
    }
    if name.contains(['/', '\\', '\0']) {
        bail!("File name contains a path separator: {:?}", name);
    }
    Ok(name)
}

/// 格式化速度
pub fn format_speed(bytes_per_sec: f64) -> String {
    let mut speed = bytes_per_sec;
    for unit in ["B/s", "KB/s", "MB/s", "GB/s"] {
        if speed < 1024.0 {
            return format!("{:.2} {}", speed, unit);
        }
        speed /= 1024.0;
    }
    format!("{:.2} TB/s", speed)
}

fn average_speed(bytes: u64, started: Instant) -> f64 {
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed == 0.0 {
        return 0.0;
    }
    bytes as f64 / elapsed
}

/// 保存单条目响应
pub async fn save_single<S, E>(stream: S, name: &str, dir: &Path) -> Result<DownloadedFile>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let started = Instant::now();
    let mut writer = PartWriter::new(dir);
    writer.start(name).await?;

    let mut stream = std::pin::pin!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error during chunked transfer")?;
        writer.write(&chunk).await?;
    }

    let mut files = writer.finish().await?;
    let file = files.pop().ok_or_else(|| anyhow!("No file written"))?;
    info!(
        "Downloaded: {} ({} bytes, avg speed {})",
        file.name,
        file.bytes,
        format_speed(average_speed(file.bytes, started))
    );
    Ok(file)
}

/// 把multipart响应拆分为文件
pub async fn save_multipart<S, E>(
    stream: S,
    content_type: &str,
    dir: &Path,
) -> Result<Vec<DownloadedFile>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut decoder = MultipartDecoder::from_content_type(content_type)
        .ok_or_else(|| anyhow!("No boundary found in Content-Type header: {}", content_type))?;
    let mut writer = PartWriter::new(dir);

    let mut stream = std::pin::pin!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error during chunked transfer")?;
        for event in decoder.feed(&chunk)? {
            match event {
                MultipartEvent::PartStart { name } => writer.start(&name).await?,
                MultipartEvent::Data(data) => writer.write(&data).await?,
                MultipartEvent::End => info!("Done"),
            }
        }
    }
    decoder.finish()?;

    writer.finish().await
}

/// 依次写入各部分，同一时间只打开一个文件
struct PartWriter<'a> {
    dir: &'a Path,
    current: Option<(DownloadedFile, File)>,
    files: Vec<DownloadedFile>,
    started: Instant,
    total_bytes: u64,
}

impl<'a> PartWriter<'a> {
    fn new(dir: &'a Path) -> Self {
        Self {
            dir,
            current: None,
            files: Vec::new(),
            started: Instant::now(),
            total_bytes: 0,
        }
    }

    async fn start(&mut self, name: &str) -> Result<()> {
        self.close().await?;

        let name = safe_name(name)?;
        let path = self.dir.join(name);
        let file = File::create(&path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;

        info!("Downloading: {}", name);
        info!(
            "Avg speed: {}",
            format_speed(average_speed(self.total_bytes, self.started))
        );
        self.current = Some((
            DownloadedFile {
                name: name.to_string(),
                path,
                bytes: 0,
            },
            file,
        ));
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let (downloaded, file) = self
            .current
            .as_mut()
            .ok_or_else(|| anyhow!("Part data received before any part header"))?;
        file.write_all(data)
            .await
            .with_context(|| format!("Failed to write {}", downloaded.path.display()))?;
        downloaded.bytes += data.len() as u64;
        self.total_bytes += data.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some((downloaded, mut file)) = self.current.take() {
            file.flush().await?;
            debug!("Saved {} ({} bytes)", downloaded.name, downloaded.bytes);
            self.files.push(downloaded);
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<Vec<DownloadedFile>> {
        self.close().await?;
        Ok(self.files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use streamer_core::multipart::{closing_delimiter, part_preamble};

    fn body_stream(
        chunks: Vec<Bytes>,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        futures::stream::iter(chunks.into_iter().map(Ok))
    }

    /// 把完整响应体按固定大小切分，模拟任意的网络分块边界
    fn split(body: &[u8], size: usize) -> Vec<Bytes> {
        body.chunks(size).map(Bytes::copy_from_slice).collect()
    }

    fn multipart_body(parts: &[(&str, &[u8])], closed: bool) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, data) in parts {
            body.extend_from_slice(&part_preamble(name));
            body.extend_from_slice(data);
        }
        if closed {
            body.extend_from_slice(&closing_delimiter());
        }
        body
    }

    const CONTENT_TYPE_VALUE: &str = "multipart/mixed; boundary=DATA_STREAMER_BOUNDARY";

    #[test]
    fn test_build_url() {
        let url = build_url("http://127.0.0.1:8080/dir_stream", None, None).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/dir_stream");

        let url = build_url("http://host/dir_stream", Some("a b.txt"), Some("m.txt")).unwrap();
        assert_eq!(url.as_str(), "http://host/dir_stream?from=a+b.txt&to=m.txt");

        let url = build_url("http://host/dir_stream", None, Some("m.txt")).unwrap();
        assert_eq!(url.query(), Some("to=m.txt"));

        assert!(build_url("not a url", None, None).is_err());
    }

    #[test]
    fn test_single_item_name() {
        let mut headers = HeaderMap::new();
        assert_eq!(single_item_name(&headers), None);

        headers.insert("x-part-name", HeaderValue::from_static("\"fallback.bin\""));
        assert_eq!(single_item_name(&headers).as_deref(), Some("fallback.bin"));

        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"log.bin\""),
        );
        assert_eq!(single_item_name(&headers).as_deref(), Some("log.bin"));
    }

    #[test]
    fn test_safe_name() {
        assert_eq!(safe_name("log.bin").unwrap(), "log.bin");
        assert!(safe_name("").is_err());
        assert!(safe_name("..").is_err());
        assert!(safe_name("../etc/passwd").is_err());
        assert!(safe_name("dir\\file").is_err());
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(0.0), "0.00 B/s");
        assert_eq!(format_speed(512.0), "512.00 B/s");
        assert_eq!(format_speed(2048.0), "2.00 KB/s");
        assert_eq!(format_speed(1.5 * 1024.0 * 1024.0), "1.50 MB/s");
        assert_eq!(format_speed(3.0 * 1024.0 * 1024.0 * 1024.0), "3.00 GB/s");
        assert_eq!(format_speed(2.0 * 1024f64.powi(4)), "2.00 TB/s");
    }

    #[tokio::test]
    async fn test_save_single() {
        let dir = tempfile::tempdir().unwrap();
        let stream = body_stream(split(&[9u8; 1000], 300));

        let file = save_single(stream, "log.bin", dir.path()).await.unwrap();

        assert_eq!(file.name, "log.bin");
        assert_eq!(file.bytes, 1000);
        assert_eq!(std::fs::read(dir.path().join("log.bin")).unwrap(), vec![9u8; 1000]);
    }

    #[tokio::test]
    async fn test_save_multipart_across_chunk_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let big: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
        let body = multipart_body(
            &[
                ("a.txt", &b"alpha"[..]),
                ("big.bin", big.as_slice()),
                ("empty", &b""[..]),
            ],
            true,
        );

        let files = save_multipart(body_stream(split(&body, 7)), CONTENT_TYPE_VALUE, dir.path())
            .await
            .unwrap();

        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "big.bin", "empty"]);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(dir.path().join("big.bin")).unwrap(), big);
        assert!(std::fs::read(dir.path().join("empty")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_multipart_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let body = multipart_body(&[], true);

        let files = save_multipart(body_stream(vec![Bytes::from(body)]), CONTENT_TYPE_VALUE, dir.path())
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_save_multipart_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let body = multipart_body(&[("a.txt", &b"alpha"[..])], false);

        let result =
            save_multipart(body_stream(split(&body, 16)), CONTENT_TYPE_VALUE, dir.path()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_save_multipart_transfer_error() {
        let dir = tempfile::tempdir().unwrap();
        let body = multipart_body(&[("a.txt", &b"alpha"[..])], false);
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from(body)),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "aborted")),
        ]);

        let err = save_multipart(stream, CONTENT_TYPE_VALUE, dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chunked transfer"));
    }

    #[tokio::test]
    async fn test_save_multipart_rejects_path_in_name() {
        let dir = tempfile::tempdir().unwrap();
        let body = multipart_body(&[("../escape.txt", &b"x"[..])], true);

        let result =
            save_multipart(body_stream(vec![Bytes::from(body)]), CONTENT_TYPE_VALUE, dir.path()).await;
        assert!(result.is_err());
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_save_multipart_requires_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            save_multipart(body_stream(Vec::new()), "multipart/mixed", dir.path()).await;
        assert!(result.is_err());
    }
}
