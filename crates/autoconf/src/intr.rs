//! 中断登记
//!
//! 中断控制器由父设备通过 attach 参数传给子设备。设备记录自己建立的每个中断，
//! detach 时据此保证“先撤销中断，再释放总线空间，最后释放私有状态”。

use alloc::sync::Arc;
use core::fmt;

/// 中断控制器
pub trait InterruptController: Send + Sync {
    /// 控制器名称
    fn name(&self) -> &'static str;

    /// 建立中断，中断线不可用时返回 false
    fn establish(&self, irq: u32) -> bool;

    /// 撤销中断
    fn disestablish(&self, irq: u32);

    /// 中断当前是否处于建立状态
    fn is_established(&self, irq: u32) -> bool;
}

/// 已建立的中断
#[derive(Clone)]
pub struct IntrCookie {
    irq: u32,
    intc: Arc<dyn InterruptController>,
}

impl IntrCookie {
    pub(crate) fn new(irq: u32, intc: Arc<dyn InterruptController>) -> Self {
        Self { irq, intc }
    }

    /// 中断号
    pub fn irq(&self) -> u32 {
        self.irq
    }

    /// 所属控制器
    pub fn controller(&self) -> &Arc<dyn InterruptController> {
        &self.intc
    }

    pub(crate) fn same(&self, other: &IntrCookie) -> bool {
        self.irq == other.irq && Arc::ptr_eq(&self.intc, &other.intc)
    }

    /// 撤销并确认，返回中断是否已不再建立
    pub(crate) fn quiesce(&self) -> bool {
        self.intc.disestablish(self.irq);
        !self.intc.is_established(self.irq)
    }
}

impl fmt::Debug for IntrCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntrCookie")
            .field("irq", &self.irq)
            .field("intc", &self.intc.name())
            .finish()
    }
}
