//! 架构相关操作的 Mock 实现

use core::sync::atomic::{AtomicBool, Ordering};

/// Mock 架构操作
///
/// 用一个全局标志模拟本地中断使能位。
pub struct MockArchOps {
    /// 当前中断是否使能
    pub interrupt_state: AtomicBool,
}

impl MockArchOps {
    /// 创建实例，初始状态为中断使能
    pub const fn new() -> Self {
        Self {
            interrupt_state: AtomicBool::new(true),
        }
    }

    /// 读取并禁用中断，返回之前的状态
    ///
    /// # Safety
    /// 仅用于测试环境
    pub unsafe fn read_and_disable_interrupts(&self) -> usize {
        self.interrupt_state.swap(false, Ordering::SeqCst) as usize
    }

    /// 恢复中断状态
    ///
    /// # Safety
    /// 仅用于测试环境
    pub unsafe fn restore_interrupts(&self, flags: usize) {
        self.interrupt_state.store(flags != 0, Ordering::SeqCst);
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();
