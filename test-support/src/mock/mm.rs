//! 地址转换相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `autoconf` crate（避免循环依赖）。
//! `autoconf` crate 在 `cfg(test)` 下为这些类型实现其 `PlatformOps` trait。

/// Mock 的地址转换操作
///
/// 默认实现采用“恒等映射”（vaddr == paddr），测试可以直接把宿主机缓冲区的地址当作物理地址。
pub struct MockMemOps;

impl MockMemOps {
    /// 创建实例
    pub const fn new() -> Self {
        Self
    }

    /// 将虚拟地址转换为物理地址（测试默认：恒等映射）
    pub fn vaddr_to_paddr(&self, vaddr: usize) -> Option<usize> {
        Some(vaddr)
    }

    /// 将物理地址转换为虚拟地址（测试默认：恒等映射）
    pub fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        paddr
    }

    /// 页大小
    pub fn page_size(&self) -> usize {
        4096
    }
}

/// 全局 Mock 实例
pub static MOCK_MEM_OPS: MockMemOps = MockMemOps::new();
