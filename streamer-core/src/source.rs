// 数据流传输引擎 - 数据源Trait定义
//
// 本模块定义了两种数据源能力：
// - `ChunkSource`: 单个可按块惰性读取的条目（例如文件）
// - `CollectionSource`: 按顺序惰性枚举的条目集合（例如目录）
//
// 流端点只依赖这两个能力，不依赖具体类型。

use crate::error::SourceError;
use bytes::Bytes;
use std::cell::Cell;
use tracing::error;

/// 单条目数据源
///
/// 每个实例只支持一次单向遍历；需要重新读取时必须构造新实例。
///
/// # 实现
///
/// - `FileChunker`: 按固定块大小读取文件
pub trait ChunkSource: Sized {
    /// 构造参数（由端点持有，每个请求共享）
    type Config: Clone + Default + Send + Sync + 'static;

    /// 块迭代器
    type Chunks<'a>: Iterator<Item = Bytes>
    where
        Self: 'a;

    /// 从路径构造数据源
    ///
    /// 构造本身不会失败：打开失败时错误被记录到 `error()`，块序列为空。
    fn open(path: &str, config: &Self::Config) -> Self;

    /// 显示名称，同时用于范围过滤和响应头
    fn name(&self) -> &str;

    /// 开始遍历
    ///
    /// 已有活动遍历时返回立即结束的迭代器，并把错误设置为 `SourceError::Busy`。
    fn chunks(&self) -> Self::Chunks<'_>;

    /// 最近一次错误（粘滞）
    fn error(&self) -> Option<SourceError>;
}

/// 多条目数据源
///
/// # 实现
///
/// - `FlatDirectory`: 非递归地枚举目录中的普通文件
pub trait CollectionSource: Sized {
    /// 条目类型
    type Item: ChunkSource;

    /// 构造参数
    type Config: Clone + Default + Send + Sync + 'static;

    /// 从路径构造数据源，失败时错误被记录到 `error()`
    fn open(path: &str, config: &Self::Config) -> Self;

    /// 前进到下一个条目
    ///
    /// 上一个条目在读取下一个之前被释放（关闭底层句柄）。
    ///
    /// # 返回
    ///
    /// - `Some(item)`: 下一个条目
    /// - `None`: 枚举结束（正常结束或出错，出错时 `error()` 被设置）
    fn next_item(&mut self) -> Option<&Self::Item>;

    /// 枚举过程中的错误（粘滞）
    fn error(&self) -> Option<SourceError>;
}

/// 粘滞错误单元
///
/// 一旦设置便不会被清除；后续错误会覆盖之前的值。
#[derive(Debug, Default)]
pub struct StickyError(Cell<Option<SourceError>>);

impl StickyError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, error: SourceError) {
        self.0.set(Some(error));
    }

    pub fn get(&self) -> Option<SourceError> {
        self.0.get()
    }

    pub fn is_set(&self) -> bool {
        self.0.get().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseState {
    Idle,
    Active,
    Spent,
}

/// 遍历租约状态
///
/// 保证同一数据源上最多只有一个活动遍历：
/// `Idle -> Active -> Spent`，`Spent` 之后不会再回到 `Idle`。
#[derive(Debug)]
pub struct IterationLease(Cell<LeaseState>);

impl Default for IterationLease {
    fn default() -> Self {
        Self(Cell::new(LeaseState::Idle))
    }
}

impl IterationLease {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试获取租约
    ///
    /// # 返回
    ///
    /// - `Ok(Some(guard))`: 获取成功，守卫释放时租约进入 `Spent`
    /// - `Ok(None)`: 之前的遍历已结束，序列保持终止
    /// - `Err(SourceError::Busy)`: 已存在活动遍历
    pub fn acquire(&self) -> Result<Option<LeaseGuard<'_>>, SourceError> {
        match self.0.get() {
            LeaseState::Idle => {
                self.0.set(LeaseState::Active);
                Ok(Some(LeaseGuard(&self.0)))
            }
            LeaseState::Active => {
                error!("There is an active iterator on this source already");
                Err(SourceError::Busy)
            }
            LeaseState::Spent => Ok(None),
        }
    }

    /// 是否存在活动遍历
    pub fn is_active(&self) -> bool {
        self.0.get() == LeaseState::Active
    }
}

/// 租约守卫，在任意退出路径上释放租约
#[derive(Debug)]
pub struct LeaseGuard<'a>(&'a Cell<LeaseState>);

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.0.set(LeaseState::Spent);
    }
}
