//! 设备相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `autoconf` crate（避免循环依赖）。
//! `autoconf` crate 在 `cfg(test)` 下为这些类型实现其 `InterruptController` trait。

use core::sync::atomic::{AtomicBool, Ordering};

use super::events::{EV_IRQ_DISABLE, EV_IRQ_ENABLE, MockEventLog};

/// Mock 中断控制器支持的中断线数量
pub const MOCK_IRQ_LINES: usize = 64;

/// Mock 的中断控制器
pub struct MockIntc {
    enabled: [AtomicBool; MOCK_IRQ_LINES],
    log: Option<&'static MockEventLog>,
}

impl MockIntc {
    /// 创建不记录事件的控制器
    pub const fn new() -> Self {
        Self {
            enabled: [const { AtomicBool::new(false) }; MOCK_IRQ_LINES],
            log: None,
        }
    }

    /// 创建把使能/撤销事件写入 `log` 的控制器
    pub const fn with_log(log: &'static MockEventLog) -> Self {
        Self {
            enabled: [const { AtomicBool::new(false) }; MOCK_IRQ_LINES],
            log: Some(log),
        }
    }

    /// 使能中断线，已使能或越界时返回 false
    pub fn enable(&self, irq: usize) -> bool {
        if irq >= MOCK_IRQ_LINES || self.enabled[irq].swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(log) = self.log {
            log.record(EV_IRQ_ENABLE, irq as u32);
        }
        true
    }

    /// 撤销中断线
    pub fn disable(&self, irq: usize) {
        if irq < MOCK_IRQ_LINES && self.enabled[irq].swap(false, Ordering::AcqRel) {
            if let Some(log) = self.log {
                log.record(EV_IRQ_DISABLE, irq as u32);
            }
        }
    }

    /// 查询中断线是否使能
    pub fn is_enabled(&self, irq: usize) -> bool {
        irq < MOCK_IRQ_LINES && self.enabled[irq].load(Ordering::Acquire)
    }
}

impl Default for MockIntc {
    fn default() -> Self {
        Self::new()
    }
}
