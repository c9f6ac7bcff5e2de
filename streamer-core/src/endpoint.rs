// 数据流传输引擎 - 流端点
//
// 把数据源（按能力，而非具体类型）绑定到路由：
// - 单条目数据源：以 application/octet-stream 直接发送
// - 多条目数据源：按范围过滤后以 multipart/mixed 发送
//
// 处理模式由类型参数在构造时确定，之后不会改变。

use crate::error::StreamError;
use crate::file_chunker::FileChunker;
use crate::flat_dir::FlatDirectory;
use crate::multipart::{
    closing_delimiter, content_disposition, part_preamble, validate_part_name, OCTET_STREAM,
    PART_NAME_HEADER,
};
use crate::range::RangeFilter;
use crate::source::{ChunkSource, CollectionSource};
use crate::transport::{Exchange, RequestHandler, Transport};
use http::{Method, StatusCode};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 文件流端点
pub type FileStreamer = StreamingEndpoint<SingleItem<FileChunker>>;

/// 目录流端点
pub type FlatDirStreamer = StreamingEndpoint<Multipart<FlatDirectory>>;

/// 请求处理模式
///
/// 只有两种实现：`SingleItem` 和 `Multipart`。
pub trait StreamMode: Send + Sync + 'static {
    /// 数据源构造参数
    type Config: Clone + Default + Send + Sync + 'static;

    /// 为单个请求构造数据源并发送全部数据（不含终止分块）
    fn stream(
        path: &str,
        config: &Self::Config,
        exchange: &mut dyn Exchange,
    ) -> Result<(), StreamError>;
}

/// 单条目模式
pub struct SingleItem<S>(PhantomData<fn() -> S>);

/// 多条目（multipart）模式
pub struct Multipart<C>(PhantomData<fn() -> C>);

impl<S: ChunkSource + 'static> StreamMode for SingleItem<S> {
    type Config = S::Config;

    fn stream(
        path: &str,
        config: &S::Config,
        exchange: &mut dyn Exchange,
    ) -> Result<(), StreamError> {
        let source = S::open(path, config);

        exchange.set_status(StatusCode::OK)?;
        exchange.set_content_type(OCTET_STREAM)?;
        exchange.set_header("Content-Disposition", &content_disposition(source.name()))?;
        exchange.set_header(PART_NAME_HEADER, source.name())?;

        debug!("Sending file {}", source.name());
        send_chunks(exchange, &source)
    }
}

impl<C: CollectionSource + 'static> StreamMode for Multipart<C> {
    type Config = C::Config;

    fn stream(
        path: &str,
        config: &C::Config,
        exchange: &mut dyn Exchange,
    ) -> Result<(), StreamError> {
        let mut collection = C::open(path, config);
        let filter = RangeFilter::from_exchange(exchange);

        exchange.set_status(StatusCode::OK)?;
        exchange.set_content_type(&crate::multipart::content_type())?;

        debug!("Sending parts...");
        let mut parts = 0usize;
        while let Some(item) = collection.next_item() {
            if !filter.accepts(item.name()) {
                debug!("Skipping {} (outside range)", item.name());
                continue;
            }

            if let Err(e) = validate_part_name(item.name()) {
                error!("Can't frame part {}: {}", item.name().escape_debug(), e);
                return Err(e.into());
            }

            debug!("Sending {}", item.name());
            exchange.send_chunk(part_preamble(item.name()))?;
            if let Err(e) = send_chunks(exchange, item) {
                error!("Failed to send chunks of {}: {}", item.name(), e);
                return Err(e);
            }
            info!("Part sent: {}", item.name());
            parts += 1;
        }

        exchange.send_chunk(closing_delimiter())?;
        debug!("All parts sent ({} parts)", parts);

        // 结束分隔符可能已经发出，但服务端仍然报告失败
        if let Some(e) = collection.error() {
            error!("Collection source error in {}: {}", path, e);
            return Err(e.into());
        }
        Ok(())
    }
}

/// 逐块发送单条目数据源的内容
///
/// 第一次写失败后立即返回，不再读取或写入。
fn send_chunks<S: ChunkSource>(
    exchange: &mut dyn Exchange,
    source: &S,
) -> Result<(), StreamError> {
    for chunk in source.chunks() {
        exchange.send_chunk(chunk)?;
    }
    match source.error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// 端点在每个请求中使用的不可变状态
struct EndpointHandler<M: StreamMode> {
    path: String,
    config: M::Config,
}

impl<M: StreamMode> RequestHandler for EndpointHandler<M> {
    fn handle(&self, exchange: &mut dyn Exchange) -> Result<(), StreamError> {
        match M::stream(&self.path, &self.config, exchange) {
            Ok(()) => {
                exchange.finish()?;
                debug!("Stream closed: {}", self.path);
                Ok(())
            }
            Err(err) => {
                error!("Failed to stream {}: {}", self.path, err);
                if let Err(e) =
                    exchange.send_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send file")
                {
                    warn!("Failed to send error response: {}", e);
                }
                Err(err)
            }
        }
    }
}

struct Binding {
    transport: Arc<dyn Transport>,
    route: String,
    method: Method,
}

/// 流端点
///
/// 每个请求都从配置的路径构造新的数据源实例，请求结束时释放。
/// 端点销毁时自动注销路由。
///
/// # 示例
///
/// ```rust,ignore
/// let mut streamer = FlatDirStreamer::new("/data/logs");
/// streamer.bind(Some(transport), "/dir_stream", Method::GET)?;
/// // GET /dir_stream?from=a.txt&to=m.txt
/// ```
pub struct StreamingEndpoint<M: StreamMode> {
    handler: Arc<EndpointHandler<M>>,
    binding: Option<Binding>,
}

impl<M: StreamMode> StreamingEndpoint<M> {
    /// 使用默认数据源参数创建端点
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_config(path, M::Config::default())
    }

    /// 创建端点
    pub fn with_config(path: impl Into<String>, config: M::Config) -> Self {
        Self {
            handler: Arc::new(EndpointHandler {
                path: path.into(),
                config,
            }),
            binding: None,
        }
    }

    /// 数据源路径
    pub fn path(&self) -> &str {
        &self.handler.path
    }

    /// 是否已绑定
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// 绑定到传输层路由
    ///
    /// 重复绑定会先注销之前的路由再重新注册。
    ///
    /// # 错误
    ///
    /// - `StreamError::NullTransport`: 未提供传输层句柄，不注册任何内容
    /// - `StreamError::Transport`: 注册失败
    pub fn bind(
        &mut self,
        transport: Option<Arc<dyn Transport>>,
        route: &str,
        method: Method,
    ) -> Result<(), StreamError> {
        let Some(transport) = transport else {
            error!("Null transport handle");
            return Err(StreamError::NullTransport);
        };

        if let Some(previous) = self.binding.take() {
            if let Err(e) = previous
                .transport
                .unregister(&previous.route, &previous.method)
            {
                debug!("Previous binding already gone: {}", e);
            }
        }

        let handler: Arc<dyn RequestHandler> = self.handler.clone();
        transport.register(route, method.clone(), handler)?;
        info!("Bound {} {} -> {}", method, route, self.handler.path);

        self.binding = Some(Binding {
            transport,
            route: route.to_string(),
            method,
        });
        Ok(())
    }

    /// 注销路由
    ///
    /// # 错误
    ///
    /// - `StreamError::InvalidState`: 当前未绑定
    pub fn unbind(&mut self) -> Result<(), StreamError> {
        let Some(binding) = self.binding.take() else {
            return Err(StreamError::InvalidState);
        };
        binding
            .transport
            .unregister(&binding.route, &binding.method)?;
        info!("Unbound {} {}", binding.method, binding.route);
        Ok(())
    }

    /// 处理单个请求
    pub fn handle(&self, exchange: &mut dyn Exchange) -> Result<(), StreamError> {
        self.handler.handle(exchange)
    }
}

impl<M: StreamMode> Drop for StreamingEndpoint<M> {
    fn drop(&mut self) {
        if self.binding.is_some() {
            if let Err(e) = self.unbind() {
                warn!("Failed to unbind endpoint {}: {}", self.handler.path, e);
            }
        }
    }
}
