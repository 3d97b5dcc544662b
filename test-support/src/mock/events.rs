//! 事件记录器
//!
//! 多个 Mock 共享同一个记录器，测试据此检查操作的先后顺序
//! （例如“先撤销中断，再解除映射”）。

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// 最多记录的事件数，超出后丢弃
pub const MAX_EVENTS: usize = 256;

/// 中断被使能
pub const EV_IRQ_ENABLE: u32 = 1;
/// 中断被撤销
pub const EV_IRQ_DISABLE: u32 = 2;
/// 总线空间映射被解除
pub const EV_UNMAP: u32 = 3;
/// 设备私有状态被释放
pub const EV_SOFTC_DROP: u32 = 4;
/// 驱动 detach 回调被调用
pub const EV_DETACH: u32 = 5;
/// 驱动 activate 回调被调用
pub const EV_DEACTIVATE: u32 = 6;

/// 无锁事件记录器
pub struct MockEventLog {
    slots: [AtomicU64; MAX_EVENTS],
    len: AtomicUsize,
}

impl MockEventLog {
    /// 创建空记录器
    pub const fn new() -> Self {
        Self {
            slots: [const { AtomicU64::new(0) }; MAX_EVENTS],
            len: AtomicUsize::new(0),
        }
    }

    /// 记录一个 (种类, 参数) 事件
    pub fn record(&self, kind: u32, value: u32) {
        let idx = self.len.fetch_add(1, Ordering::AcqRel);
        if idx < MAX_EVENTS {
            self.slots[idx].store(((kind as u64) << 32) | value as u64, Ordering::Release);
        }
    }

    /// 按记录顺序返回全部事件
    pub fn events(&self) -> Vec<(u32, u32)> {
        let len = self.len.load(Ordering::Acquire).min(MAX_EVENTS);
        self.slots[..len]
            .iter()
            .map(|slot| {
                let raw = slot.load(Ordering::Acquire);
                ((raw >> 32) as u32, raw as u32)
            })
            .collect()
    }

    /// 某种事件第一次出现的位置
    pub fn position(&self, kind: u32) -> Option<usize> {
        self.events().iter().position(|(k, _)| *k == kind)
    }

    /// 某种事件出现的次数
    pub fn count(&self, kind: u32) -> usize {
        self.events().iter().filter(|(k, _)| *k == kind).count()
    }
}

impl Default for MockEventLog {
    fn default() -> Self {
        Self::new()
    }
}
