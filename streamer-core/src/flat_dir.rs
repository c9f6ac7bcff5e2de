// 数据流传输引擎 - FlatDirectory实现
//
// 非递归地枚举目录中的普通文件，每个文件对应一个 `FileChunker`。
// 枚举顺序由文件系统决定，不保证按字典序。

use crate::error::SourceError;
use crate::file_chunker::{ChunkerConfig, FileChunker};
use crate::source::CollectionSource;
use std::fs::{self, ReadDir};
use std::path::PathBuf;
use tracing::{debug, error, warn};

/// 目录条目枚举器
///
/// # 示例
///
/// ```rust,ignore
/// let mut dir = FlatDirectory::open("/data/logs", &ChunkerConfig::default());
/// while let Some(file) = dir.next_item() {
///     for chunk in file.chunks() {
///         // 处理块
///     }
/// }
/// if let Some(err) = dir.error() {
///     // 处理错误
/// }
/// ```
#[derive(Debug)]
pub struct FlatDirectory {
    base_path: String,
    /// 目录句柄，枚举结束或出错后释放
    entries: Option<ReadDir>,
    /// 当前条目
    current: Option<FileChunker>,
    config: ChunkerConfig,
    last_error: Option<SourceError>,
}

impl FlatDirectory {
    /// 目录路径
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    fn fail(&mut self, error: SourceError) {
        self.last_error = Some(error);
        self.entries = None;
    }

    /// 找到下一个普通文件的完整路径
    fn next_regular_file(&mut self) -> Option<PathBuf> {
        loop {
            let next = self.entries.as_mut()?.next()?;
            let entry = match next {
                Ok(entry) => entry,
                Err(e) => {
                    error!("Failed to read directory {}: {}", self.base_path, e);
                    self.fail(SourceError::from(e));
                    return None;
                }
            };

            let file_name = entry.file_name();
            if file_name == "." || file_name == ".." {
                continue;
            }

            // 原始路径用于stat和打开，非UTF-8文件名不会被改写
            let full_path = entry.path();

            // 跟随符号链接
            let metadata = match fs::metadata(&full_path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    error!("Can't stat path {}: {}", full_path.display(), e);
                    self.fail(SourceError::from(e));
                    return None;
                }
            };

            if metadata.is_file() {
                return Some(full_path);
            }
            debug!("Skipping non-regular entry: {}", full_path.display());
        }
    }
}

impl CollectionSource for FlatDirectory {
    type Item = FileChunker;
    type Config = ChunkerConfig;

    fn open(path: &str, config: &ChunkerConfig) -> Self {
        let (entries, last_error) = match fs::read_dir(path) {
            Ok(entries) => {
                debug!("Opened directory for streaming: {}", path);
                (Some(entries), None)
            }
            Err(e) => {
                warn!("Failed to open directory {}: {}", path, e);
                (None, Some(SourceError::from(e)))
            }
        };

        Self {
            base_path: path.to_string(),
            entries,
            current: None,
            config: config.clone(),
            last_error,
        }
    }

    fn next_item(&mut self) -> Option<&FileChunker> {
        // 先关闭上一个文件，再打开下一个
        self.current = None;

        match self.next_regular_file() {
            Some(full_path) => {
                self.current = Some(FileChunker::open_path(&full_path, &self.config));
                self.current.as_ref()
            }
            None => {
                self.entries = None;
                None
            }
        }
    }

    fn error(&self) -> Option<SourceError> {
        self.last_error
    }
}
