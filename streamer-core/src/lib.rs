//! 数据流传输引擎
//!
//! 在已有的HTTP传输层之上，以分块传输编码流式发送单个条目（文件）
//! 或条目集合（目录，作为一个multipart响应），不把整个负载缓存在内存中。
//!
//! # 核心组件
//!
//! - `ChunkSource` / `CollectionSource`: 数据源能力
//! - `FileChunker`: 按固定块大小读取文件
//! - `FlatDirectory`: 非递归枚举目录中的普通文件
//! - `StreamingEndpoint`: 把数据源绑定到路由，负责范围过滤和multipart帧
//! - `Transport` / `Exchange`: 外部HTTP传输层接口

pub mod endpoint;
pub mod error;
pub mod file_chunker;
pub mod flat_dir;
pub mod multipart;
pub mod range;
pub mod source;
pub mod transport;


pub use endpoint::{
    FileStreamer, FlatDirStreamer, Multipart, SingleItem, StreamMode, StreamingEndpoint,
};
pub use error::{SourceError, StreamError, TransportError};
pub use file_chunker::{ChunkerConfig, FileChunker, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use flat_dir::FlatDirectory;
pub use multipart::{
    validate_part_name, MultipartDecoder, MultipartError, MultipartEvent, BOUNDARY,
};
pub use range::{RangeFilter, MAX_URL_PARAM_SIZE};
pub use source::{ChunkSource, CollectionSource};
pub use transport::{Exchange, RequestHandler, Transport};
