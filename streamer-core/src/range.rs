// 数据流传输引擎 - 范围过滤
//
// `from`/`to` 查询参数按字典序逐条目过滤，两端都包含。
// 这是逐条目的谓词，不假设目录枚举有序。

use crate::transport::Exchange;
use tracing::debug;

/// URL查询参数缓冲区大小（含结束符）
pub const MAX_URL_PARAM_SIZE: usize = 128;

/// 名称范围过滤器
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeFilter {
    /// 下界（包含）
    pub from: Option<String>,
    /// 上界（包含）
    pub to: Option<String>,
}

impl RangeFilter {
    pub fn new(from: Option<String>, to: Option<String>) -> Self {
        Self { from, to }
    }

    /// 从请求的查询参数构造
    ///
    /// 参数缺失或超过缓冲区大小时视为未设置，不会导致请求失败。
    pub fn from_exchange(exchange: &dyn Exchange) -> Self {
        let filter = Self {
            from: bounded_param(exchange, "from"),
            to: bounded_param(exchange, "to"),
        };
        debug!("Range filter: from={:?}, to={:?}", filter.from, filter.to);
        filter
    }

    /// 判断名称是否在范围内
    pub fn accepts(&self, name: &str) -> bool {
        if let Some(from) = &self.from {
            if name < from.as_str() {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if name > to.as_str() {
                return false;
            }
        }
        true
    }

    /// 是否未设置任何边界
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }
}

fn bounded_param(exchange: &dyn Exchange, key: &str) -> Option<String> {
    let value = exchange.query_value(key)?;
    if value.len() >= MAX_URL_PARAM_SIZE {
        debug!("Ignoring query parameter '{}': {} bytes", key, value.len());
        return None;
    }
    Some(value)
}
