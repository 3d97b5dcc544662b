//! 自动配置框架的错误类型
//!
//! 每类资源一个错误枚举，都可以通过 `to_errno()` 转换为负的 POSIX errno。
//! “没有匹配的驱动”不是错误，引擎在内部处理，不会出现在这里。

use core::fmt;

/// 总线空间错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSpaceError {
    /// 请求的地址范围已被其它映射独占 (-EBUSY)
    ResourceConflict,
    /// 资源不存在，或底层原语拒绝了映射请求 (-ENXIO)
    MapFailure,
    /// 偏移或长度超出窗口 (-EINVAL)
    OutOfRange,
}

impl BusSpaceError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            BusSpaceError::MapFailure => -6,
            BusSpaceError::ResourceConflict => -16,
            BusSpaceError::OutOfRange => -22,
        }
    }
}

impl fmt::Display for BusSpaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            BusSpaceError::ResourceConflict => "bus space range already in use",
            BusSpaceError::MapFailure => "cannot map bus space",
            BusSpaceError::OutOfRange => "bus space offset out of range",
        };
        f.write_str(msg)
    }
}

/// DMA 地址转换错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// 合并后的段数超过标签允许的最大值 (-EFBIG)
    ///
    /// 调用者应退回到单段传输路径。
    TooManySegments,
    /// 缓冲区不在任何 DMA 窗口内，且标签不支持回弹 (-EINVAL)
    OutOfBoundsAddress,
    /// 创建标签时给出的窗口互相重叠 (-EINVAL)
    OverlappingRanges,
    /// 回弹缓冲池空间不足 (-ENOMEM)
    NoBounceSpace,
    /// 缓冲区超过一次映射能够描述的最大长度 (-EFBIG)
    BufferTooLarge,
}

impl DmaError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            DmaError::NoBounceSpace => -12,
            DmaError::OutOfBoundsAddress | DmaError::OverlappingRanges => -22,
            DmaError::TooManySegments | DmaError::BufferTooLarge => -27,
        }
    }
}

impl fmt::Display for DmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DmaError::TooManySegments => "too many DMA segments",
            DmaError::OutOfBoundsAddress => "address not reachable by DMA",
            DmaError::OverlappingRanges => "overlapping DMA ranges",
            DmaError::NoBounceSpace => "out of bounce buffer space",
            DmaError::BufferTooLarge => "DMA buffer too large",
        };
        f.write_str(msg)
    }
}

/// 驱动 attach 失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// 总线空间映射失败
    Resource(BusSpaceError),
    /// DMA 资源不可用
    Dma(DmaError),
    /// 中断无法建立
    Interrupt(u32),
    /// 驱动报告的致命错误
    Failed(&'static str),
}

impl AttachError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            AttachError::Resource(e) => e.to_errno(),
            AttachError::Dma(e) => e.to_errno(),
            AttachError::Interrupt(_) => -16,
            AttachError::Failed(_) => -5,
        }
    }
}

impl From<BusSpaceError> for AttachError {
    fn from(e: BusSpaceError) -> Self {
        AttachError::Resource(e)
    }
}

impl From<DmaError> for AttachError {
    fn from(e: DmaError) -> Self {
        AttachError::Dma(e)
    }
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::Resource(e) => write!(f, "{}", e),
            AttachError::Dma(e) => write!(f, "{}", e),
            AttachError::Interrupt(irq) => write!(f, "cannot establish interrupt {}", irq),
            AttachError::Failed(why) => f.write_str(why),
        }
    }
}

/// 设备 detach 失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachError {
    /// 仍有存活的子设备或中断处理程序 (-EBUSY)
    Busy,
    /// 设备不处于 attached 状态 (-ENODEV)
    NotAttached,
    /// 驱动拒绝 detach (-EOPNOTSUPP)
    Refused(&'static str),
}

impl DetachError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            DetachError::Busy => -16,
            DetachError::NotAttached => -19,
            DetachError::Refused(_) => -95,
        }
    }
}

impl fmt::Display for DetachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetachError::Busy => f.write_str("device busy"),
            DetachError::NotAttached => f.write_str("device not attached"),
            DetachError::Refused(why) => write!(f, "detach refused: {}", why),
        }
    }
}

/// 框架顶层错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoconfError {
    /// 没有可用的描述符项或驱动 (-ENXIO)
    NotConfigured,
    /// attach 失败
    Attach(AttachError),
    /// detach 失败
    Detach(DetachError),
    /// 总线空间错误
    BusSpace(BusSpaceError),
    /// DMA 错误
    Dma(DmaError),
}

impl AutoconfError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            AutoconfError::NotConfigured => -6,
            AutoconfError::Attach(e) => e.to_errno(),
            AutoconfError::Detach(e) => e.to_errno(),
            AutoconfError::BusSpace(e) => e.to_errno(),
            AutoconfError::Dma(e) => e.to_errno(),
        }
    }
}

impl From<AttachError> for AutoconfError {
    fn from(e: AttachError) -> Self {
        AutoconfError::Attach(e)
    }
}

impl From<DetachError> for AutoconfError {
    fn from(e: DetachError) -> Self {
        AutoconfError::Detach(e)
    }
}

impl From<BusSpaceError> for AutoconfError {
    fn from(e: BusSpaceError) -> Self {
        AutoconfError::BusSpace(e)
    }
}

impl From<DmaError> for AutoconfError {
    fn from(e: DmaError) -> Self {
        AutoconfError::Dma(e)
    }
}

impl fmt::Display for AutoconfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoconfError::NotConfigured => f.write_str("not configured"),
            AutoconfError::Attach(e) => write!(f, "attach failed: {}", e),
            AutoconfError::Detach(e) => write!(f, "detach failed: {}", e),
            AutoconfError::BusSpace(e) => write!(f, "{}", e),
            AutoconfError::Dma(e) => write!(f, "{}", e),
        }
    }
}
