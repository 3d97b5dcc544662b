//! 关中断自旋锁原语
//!
//! 基于原子操作实现自旋，获取锁时屏蔽本地中断，释放锁时恢复。
//! 中断状态保存在锁内部，因此 [`RawSpinLock`] 可以直接作为 [`lock_api::RawMutex`] 使用。

use crate::arch_ops;
use core::{
    hint,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// 关中断的自旋锁原语
///
/// 不可重入。持有期间本地中断被屏蔽，因此临界区内不要做耗时操作。
///
/// 嵌套持有多把 [`RawSpinLock`] 时必须按后进先出的顺序释放，
/// 否则恢复的中断状态会错位。
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
    /// 获取锁前的中断状态，仅在持有锁期间有效
    saved_flags: AtomicUsize,
}

impl RawSpinLock {
    /// 创建一个未加锁的实例
    pub const fn new() -> Self {
        RawSpinLock {
            locked: AtomicBool::new(false),
            saved_flags: AtomicUsize::new(0),
        }
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: locked 标志通过 Acquire/Release 保证互斥
unsafe impl lock_api::RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: RawSpinLock = RawSpinLock::new();

    // 中断状态属于当前 CPU，guard 不能跨线程移动
    type GuardMarker = lock_api::GuardNoSend;

    fn lock(&self) {
        // SAFETY: 屏蔽中断后立即自旋，flags 在 unlock 中恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        self.saved_flags.store(flags, Ordering::Relaxed);
    }

    fn try_lock(&self) -> bool {
        // SAFETY: 获取失败时立刻恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.saved_flags.store(flags, Ordering::Relaxed);
            true
        } else {
            unsafe { arch_ops().restore_interrupts(flags) };
            false
        }
    }

    unsafe fn unlock(&self) {
        let flags = self.saved_flags.load(Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        // SAFETY: flags 来自 lock/try_lock 保存的值
        unsafe { arch_ops().restore_interrupts(flags) };
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}
