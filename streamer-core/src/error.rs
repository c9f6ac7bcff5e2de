// 数据流传输引擎 - 错误类型定义
//
// 本模块定义了数据源、传输层以及流端点可能出现的所有错误类型。
// 数据源错误是"粘滞"的：一旦设置便不会被清除，由流端点统一检查。

use std::io;
use thiserror::Error;

/// 数据源错误
///
/// 可复制的轻量错误码，保存在数据源内部的粘滞错误单元中。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SourceError {
    /// 同一数据源上已存在活动迭代（使用方式错误，而非环境故障）
    #[error("Resource busy: an iteration is already active")]
    Busy,

    /// 路径不存在
    #[error("Not found")]
    NotFound,

    /// 无访问权限
    #[error("Permission denied")]
    PermissionDenied,

    /// 其他平台IO错误
    #[error("IO error: {kind} (os error {code:?})")]
    Io {
        /// 错误类别
        kind: io::ErrorKind,
        /// 原始操作系统错误码
        code: Option<i32>,
    },
}

impl SourceError {
    /// 是否为"资源忙"错误
    pub fn is_busy(&self) -> bool {
        matches!(self, SourceError::Busy)
    }
}

/// 错误转换：从 std::io::Error
impl From<io::Error> for SourceError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound,
            io::ErrorKind::PermissionDenied => SourceError::PermissionDenied,
            kind => SourceError::Io {
                kind,
                code: error.raw_os_error(),
            },
        }
    }
}

/// 传输层错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// 对端已断开（例如客户端关闭连接）
    #[error("Connection lost")]
    ConnectionLost,

    /// 响应体已开始发送，无法再修改状态或头部
    #[error("Response headers already sent")]
    HeadersSent,

    /// 非法的响应头
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// 路由未注册
    #[error("Route not found: {method} {route}")]
    RouteNotFound { method: String, route: String },

    /// 响应已结束
    #[error("Response already closed")]
    Closed,
}

/// 流端点错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// 绑定时未提供传输层句柄
    #[error("Null transport handle")]
    NullTransport,

    /// 端点未绑定
    #[error("Endpoint is not bound")]
    InvalidState,

    /// 传输错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 数据源错误
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            StreamError::NullTransport,
            StreamError::InvalidState,
            StreamError::Transport(TransportError::ConnectionLost),
            StreamError::Source(SourceError::Busy),
            StreamError::Source(SourceError::Io {
                kind: io::ErrorKind::Other,
                code: Some(5),
            }),
        ];

        for error in errors {
            let msg = error.to_string();
            assert!(!msg.is_empty());
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let source_error: SourceError = io_error.into();
        assert_eq!(source_error, SourceError::NotFound);

        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(SourceError::from(io_error), SourceError::PermissionDenied);
    }

    #[cfg(unix)]
    #[test]
    fn test_io_error_keeps_os_code() {
        let io_error = io::Error::from_raw_os_error(5);
        match SourceError::from(io_error) {
            SourceError::Io { code, .. } => assert_eq!(code, Some(5)),
            other => panic!("Expected Io error, got {:?}", other),
        }
    }

    #[test]
    fn test_busy_is_distinguishable() {
        assert!(SourceError::Busy.is_busy());
        assert!(!SourceError::NotFound.is_busy());
    }
}
