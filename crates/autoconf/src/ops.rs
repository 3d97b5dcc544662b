//! 平台操作 trait 定义和注册
//!
//! DMA 装载需要在虚拟地址和物理地址之间转换，这部分由内核实现 [`PlatformOps`]
//! 并在启动时注册，框架本身不依赖具体的内存管理实现。

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::BOUNCE_PAGE_SIZE;

/// 平台相关操作
pub trait PlatformOps: Send + Sync {
    /// 虚拟地址转物理地址，未映射时返回 `None`
    fn vaddr_to_paddr(&self, vaddr: usize) -> Option<usize>;

    /// 物理地址转内核可直接访问的虚拟地址
    fn paddr_to_vaddr(&self, paddr: usize) -> usize;

    /// 物理页大小
    fn page_size(&self) -> usize {
        BOUNCE_PAGE_SIZE
    }
}

static PLATFORM_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static PLATFORM_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册平台操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_platform_ops(ops: &'static dyn PlatformOps) {
    let ptr = ops as *const dyn PlatformOps;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn PlatformOps, (usize, usize)>(ptr) };
    PLATFORM_OPS_VTABLE.store(vtable, Ordering::Release);
    PLATFORM_OPS_DATA.store(data, Ordering::Release);
}

/// 获取已注册的平台操作实现
///
/// # Panics
/// 如果尚未调用 [`register_platform_ops`] 注册实现，则 panic
#[inline]
pub fn platform_ops() -> &'static dyn PlatformOps {
    let data = PLATFORM_OPS_DATA.load(Ordering::Acquire);
    let vtable = PLATFORM_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("autoconf: PlatformOps not registered");
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn PlatformOps>((data, vtable)) }
}
