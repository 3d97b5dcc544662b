//! 总线空间抽象
//!
//! 驱动通过 [`BusSpaceHandle`] 读写设备寄存器，而不需要知道底层是内存映射、
//! 端口 I/O 还是需要地址变换的稀疏窗口。
//!
//! 每种“架构 × 总线类别”组合提供一个 [`BusSpaceOps`] 原语表，
//! 通过 [`register_bus_space`] 注册。[`map`] 时解析一次原语表并存入句柄，
//! 之后的访问都是直接的虚调用，不再按架构分派。

mod backends;
mod handle;

pub use backends::{LinearSpace, PortIo, PortSpace, SparseSpace};
#[cfg(target_arch = "x86_64")]
pub use backends::X86PortIo;
pub use handle::{BusSpaceHandle, BusSpaceMapping};

use alloc::collections::BTreeMap;
use core::fmt;
use lazy_static::lazy_static;
use sync::RwLock;

use crate::error::BusSpaceError;
use crate::extent::{extent_claim, extent_release};

/// 总线类别，资源区间登记表以它区分地址空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusClass(pub u16);

impl BusClass {
    /// 内存映射空间
    pub const MEM: BusClass = BusClass(0);
    /// 端口 I/O 空间
    pub const IO: BusClass = BusClass(1);
}

/// 多字节寄存器的字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// 小端
    Little,
    /// 大端
    Big,
}

impl ByteOrder {
    /// 宿主机的字节序
    pub const NATIVE: ByteOrder = if cfg!(target_endian = "big") {
        ByteOrder::Big
    } else {
        ByteOrder::Little
    };
}

bitflags::bitflags! {
    /// 映射标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// 允许与其它共享映射重叠（不参与独占检查）
        const SHARED = 1 << 0;
        /// 可预取
        const PREFETCHABLE = 1 << 1;
        /// 需要线性可寻址的映射
        const LINEAR = 1 << 2;
    }
}

bitflags::bitflags! {
    /// 屏障类型
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BarrierFlags: u32 {
        /// 之前的读不能越过屏障
        const BEFORE_READ = 1 << 0;
        /// 之后的读不能提前到屏障之前
        const AFTER_READ = 1 << 1;
        /// 之前的写不能越过屏障
        const BEFORE_WRITE = 1 << 2;
        /// 之后的写不能提前到屏障之前
        const AFTER_WRITE = 1 << 3;
        /// 读写全屏障
        const READ_WRITE = Self::BEFORE_READ.bits()
            | Self::AFTER_READ.bits()
            | Self::BEFORE_WRITE.bits()
            | Self::AFTER_WRITE.bits();
    }
}

/// 寄存器访问原语表
///
/// `base` 是 [`BusSpaceOps::map`] 返回的后端私有值，`offset` 是相对映射起点的字节偏移。
/// 访问宽度必须原样下发到总线，实现不得拆分、合并或交换字节。
pub trait BusSpaceOps: Send + Sync {
    /// 后端名称
    fn name(&self) -> &'static str;

    /// 多字节访问采用的字节序
    fn byte_order(&self) -> ByteOrder {
        ByteOrder::NATIVE
    }

    /// 是否支持给定宽度（字节）的访问
    fn supports(&self, width: usize) -> bool {
        matches!(width, 1 | 2 | 4 | 8)
    }

    /// 映射 `[addr, addr + size)`，返回后端私有的基址
    fn map(&self, addr: u64, size: usize, flags: MapFlags) -> Result<usize, BusSpaceError>;

    /// 解除映射
    fn unmap(&self, base: usize, size: usize);

    /// 读 1 字节
    ///
    /// # Safety
    /// `base` 必须来自仍然有效的 [`BusSpaceOps::map`]，且 `offset` 在映射范围内
    unsafe fn read_1(&self, base: usize, offset: usize) -> u8;
    /// 读 2 字节
    ///
    /// # Safety
    /// 同 [`BusSpaceOps::read_1`]
    unsafe fn read_2(&self, base: usize, offset: usize) -> u16;
    /// 读 4 字节
    ///
    /// # Safety
    /// 同 [`BusSpaceOps::read_1`]
    unsafe fn read_4(&self, base: usize, offset: usize) -> u32;
    /// 读 8 字节
    ///
    /// # Safety
    /// 同 [`BusSpaceOps::read_1`]
    unsafe fn read_8(&self, base: usize, offset: usize) -> u64;
    /// 写 1 字节
    ///
    /// # Safety
    /// 同 [`BusSpaceOps::read_1`]
    unsafe fn write_1(&self, base: usize, offset: usize, value: u8);
    /// 写 2 字节
    ///
    /// # Safety
    /// 同 [`BusSpaceOps::read_1`]
    unsafe fn write_2(&self, base: usize, offset: usize, value: u16);
    /// 写 4 字节
    ///
    /// # Safety
    /// 同 [`BusSpaceOps::read_1`]
    unsafe fn write_4(&self, base: usize, offset: usize, value: u32);
    /// 写 8 字节
    ///
    /// # Safety
    /// 同 [`BusSpaceOps::read_1`]
    unsafe fn write_8(&self, base: usize, offset: usize, value: u64);

    /// 在 `[offset, offset + len)` 上建立顺序点
    fn barrier(&self, _base: usize, _offset: usize, _len: usize, flags: BarrierFlags) {
        if !flags.is_empty() {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}

/// 总线空间标签：总线类别 + 已解析的原语表
#[derive(Clone, Copy)]
pub struct BusSpaceTag {
    class: BusClass,
    ops: &'static dyn BusSpaceOps,
}

impl BusSpaceTag {
    /// 用原语表构造标签
    pub const fn new(class: BusClass, ops: &'static dyn BusSpaceOps) -> Self {
        Self { class, ops }
    }

    /// 总线类别
    pub fn class(&self) -> BusClass {
        self.class
    }

    /// 原语表
    pub fn ops(&self) -> &'static dyn BusSpaceOps {
        self.ops
    }
}

impl fmt::Debug for BusSpaceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSpaceTag")
            .field("class", &self.class)
            .field("ops", &self.ops.name())
            .finish()
    }
}

lazy_static! {
    // NOTE: 只在启动阶段注册，运行时均为读操作
    static ref BUS_SPACES: RwLock<BTreeMap<BusClass, &'static dyn BusSpaceOps>> =
        RwLock::new(BTreeMap::new());
}

/// 为总线类别注册原语表，替换已有的注册
pub fn register_bus_space(class: BusClass, ops: &'static dyn BusSpaceOps) -> BusSpaceTag {
    BUS_SPACES.write().insert(class, ops);
    BusSpaceTag::new(class, ops)
}

/// 查找总线类别对应的标签
pub fn bus_space_tag(class: BusClass) -> Option<BusSpaceTag> {
    BUS_SPACES
        .read()
        .get(&class)
        .map(|ops| BusSpaceTag::new(class, *ops))
}

/// 映射一段总线地址
///
/// 先在资源区间登记表中登记（`SHARED` 映射可以互相重叠），
/// 再交给原语表建立映射；原语表失败时撤销登记。
pub fn map(
    tag: BusSpaceTag,
    addr: u64,
    size: usize,
    flags: MapFlags,
) -> Result<BusSpaceMapping, BusSpaceError> {
    if size == 0 {
        return Err(BusSpaceError::MapFailure);
    }
    extent_claim(
        tag.class,
        addr,
        size as u64,
        flags.contains(MapFlags::SHARED),
    )?;
    match tag.ops.map(addr, size, flags) {
        Ok(base) => Ok(BusSpaceMapping::new(tag, base, addr, size, flags)),
        Err(e) => {
            extent_release(tag.class, addr, size as u64);
            Err(e)
        }
    }
}
