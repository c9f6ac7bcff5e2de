// 数据流传输引擎 - 传输层接口
//
// 底层HTTP服务器是外部协作者，本模块只定义其接口：
// - `Transport`: 注册/注销路由处理器
// - `Exchange`: 单个请求/响应，负责写状态、头部和分块
//
// 流端点通过这两个接口完成所有字节输出，便于在测试中替换。

use crate::error::{StreamError, TransportError};
use bytes::Bytes;
use http::{Method, StatusCode};
use std::sync::Arc;

/// 路由处理器
pub trait RequestHandler: Send + Sync {
    /// 处理单个请求
    ///
    /// 同步阻塞执行；传输层负责为每个请求提供独立的执行上下文。
    fn handle(&self, exchange: &mut dyn Exchange) -> Result<(), StreamError>;
}

/// 路由注册接口
pub trait Transport: Send + Sync {
    /// 为 (route, method) 注册处理器，已存在时替换
    fn register(
        &self,
        route: &str,
        method: Method,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), TransportError>;

    /// 注销 (route, method) 的处理器
    fn unregister(&self, route: &str, method: &Method) -> Result<(), TransportError>;
}

/// 单个请求/响应
///
/// 状态和头部在第一个响应体分块发送前可以修改，之后修改返回
/// `TransportError::HeadersSent`。
pub trait Exchange {
    /// 获取已URL解码的查询参数
    fn query_value(&self, key: &str) -> Option<String>;

    /// 设置响应状态码
    fn set_status(&mut self, status: StatusCode) -> Result<(), TransportError>;

    /// 设置Content-Type
    fn set_content_type(&mut self, content_type: &str) -> Result<(), TransportError>;

    /// 设置响应头
    fn set_header(&mut self, name: &str, value: &str) -> Result<(), TransportError>;

    /// 发送一个响应体分块（空分块被忽略）
    fn send_chunk(&mut self, chunk: Bytes) -> Result<(), TransportError>;

    /// 发送终止分块，结束响应
    fn finish(&mut self) -> Result<(), TransportError>;

    /// 以错误结束响应
    ///
    /// 响应体尚未开始时发送真正的错误响应；已经开始时中止分块传输，
    /// 客户端会看到被截断的传输。
    fn send_error(&mut self, status: StatusCode, message: &str) -> Result<(), TransportError>;
}
