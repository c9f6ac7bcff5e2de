// 数据流传输引擎 - FileChunker实现
//
// 本模块实现了按固定块大小读取文件的单条目数据源。
//
// # 特性
//
// - 固定块大小读取，只有最后一块可能不足
// - 单个可复用的块缓冲区，内存占用与文件大小无关
// - 区分"正常EOF"（无错误）和"读取失败"（设置错误）

use crate::error::SourceError;
use crate::source::{ChunkSource, IterationLease, LeaseGuard, StickyError};
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read};
use std::iter::FusedIterator;
use std::path::Path;
use tracing::{debug, warn};

/// 默认块大小（4KB）
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// 块大小上限，超过时截断为此值
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// 分块读取配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// 块大小（字节）
    pub chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkerConfig {
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

/// 文件分块读取器
///
/// 构造时打开文件，销毁时关闭文件（无论遍历是否完成）。
///
/// # 示例
///
/// ```rust,ignore
/// let chunker = FileChunker::open("/data/log.bin", &ChunkerConfig::default());
/// for chunk in chunker.chunks() {
///     // 处理块
/// }
/// if let Some(err) = chunker.error() {
///     // 处理错误
/// }
/// ```
pub struct FileChunker {
    /// 文件路径
    path: String,
    /// 文件句柄（打开失败时为None）
    file: RefCell<Option<File>>,
    /// 块缓冲区
    buf: RefCell<BytesMut>,
    /// 块大小
    chunk_size: usize,
    /// 粘滞错误
    error: StickyError,
    /// 遍历租约
    lease: IterationLease,
}

impl std::fmt::Debug for FileChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChunker")
            .field("path", &self.path)
            .field("chunk_size", &self.chunk_size)
            .field("error", &self.error.get())
            .field("iterating", &self.lease.is_active())
            .finish()
    }
}

impl FileChunker {
    /// 文件路径
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 块大小
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 从文件系统路径构造
    ///
    /// 直接使用原始路径打开文件，非UTF-8文件名也能读取；
    /// 显示名称按有损转换得到。
    pub fn open_path(path: &Path, config: &ChunkerConfig) -> Self {
        let display_path = path.to_string_lossy().into_owned();
        let chunk_size = if config.chunk_size == 0 {
            warn!(
                "Invalid chunk size: 0, using default: {}",
                DEFAULT_CHUNK_SIZE
            );
            DEFAULT_CHUNK_SIZE
        } else if config.chunk_size > MAX_CHUNK_SIZE {
            warn!(
                "Chunk size {} exceeds limit, using: {}",
                config.chunk_size, MAX_CHUNK_SIZE
            );
            MAX_CHUNK_SIZE
        } else {
            config.chunk_size
        };

        let error = StickyError::new();
        let file = match File::open(path) {
            Ok(file) => {
                debug!("Opened file for streaming: {}", display_path);
                Some(file)
            }
            Err(e) => {
                warn!("Failed to open file {}: {}", display_path, e);
                error.set(SourceError::from(e));
                None
            }
        };

        Self {
            path: display_path,
            file: RefCell::new(file),
            buf: RefCell::new(BytesMut::new()),
            chunk_size,
            error,
            lease: IterationLease::new(),
        }
    }

    /// 读取下一块
    ///
    /// 尽量填满一整块；返回 `None` 表示EOF或读取失败（失败时错误被设置）。
    fn read_chunk(&self) -> Option<Bytes> {
        if self.error.is_set() {
            return None;
        }

        let mut file_slot = self.file.borrow_mut();
        let file = file_slot.as_mut()?;

        let mut buf = self.buf.borrow_mut();
        buf.clear();
        buf.reserve(self.chunk_size);
        buf.resize(self.chunk_size, 0);

        let mut filled = 0;
        while filled < self.chunk_size {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to read from file {}: {}", self.path, e);
                    buf.clear();
                    self.error.set(SourceError::from(e));
                    return None;
                }
            }
        }

        if filled == 0 {
            debug!("Reached end of file: {}", self.path);
            buf.clear();
            return None;
        }

        buf.truncate(filled);
        Some(buf.split().freeze())
    }
}

impl ChunkSource for FileChunker {
    type Config = ChunkerConfig;
    type Chunks<'a> = Chunks<'a>;

    fn open(path: &str, config: &ChunkerConfig) -> Self {
        Self::open_path(Path::new(path), config)
    }

    fn name(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some((_, name)) => name,
            None => &self.path,
        }
    }

    fn chunks(&self) -> Chunks<'_> {
        let lease = match self.lease.acquire() {
            Ok(lease) => lease,
            Err(e) => {
                self.error.set(e);
                None
            }
        };
        Chunks {
            chunker: self,
            lease,
        }
    }

    fn error(&self) -> Option<SourceError> {
        self.error.get()
    }
}

impl<'a> IntoIterator for &'a FileChunker {
    type Item = Bytes;
    type IntoIter = Chunks<'a>;

    fn into_iter(self) -> Chunks<'a> {
        self.chunks()
    }
}

/// 文件块迭代器
///
/// 单向、单次遍历；一旦结束便保持结束。
pub struct Chunks<'a> {
    chunker: &'a FileChunker,
    lease: Option<LeaseGuard<'a>>,
}

impl Iterator for Chunks<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.lease.as_ref()?;
        let chunk = self.chunker.read_chunk();
        if chunk.is_none() {
            // 释放租约，序列终止
            self.lease = None;
        }
        chunk
    }
}

impl FusedIterator for Chunks<'_> {}
