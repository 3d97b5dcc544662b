//! 设备自动配置与总线空间框架
//!
//! 此 crate 负责发现硬件、为每个硬件实例选择驱动、实例化设备并组织成设备树，
//! 同时为驱动提供与架构无关的寄存器访问和 DMA 地址转换：
//!
//! - [`Autoconf`] - 匹配/attach 引擎与设备树
//! - [`CfEntry`] - 板级描述符表的一项
//! - [`Driver`] trait - 驱动的 match/attach/detach/activate 回调
//! - [`AttachArgs`] - 父设备传给驱动的参数
//! - [`BusSpaceHandle`] - 寄存器窗口
//! - [`DmaTag`] - DMA 地址转换与回弹缓冲
//!
//! # 架构解耦
//!
//! 通过 trait 抽象与架构特定组件解耦：
//! - [`PlatformOps`]: 虚拟/物理地址转换，DMA 装载时使用
//! - [`BusSpaceOps`]: 每种总线类别的寄存器访问原语
//! - [`InterruptController`]: 由父设备提供的中断控制器
//!
//! 使用前必须调用 [`register_platform_ops`] 和 `sync::register_arch_ops` 注册实现。

#![no_std]

extern crate alloc;

pub mod attach_args;
pub mod bus_space;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod dma;
pub mod driver;
pub mod engine;
pub mod error;
pub mod extent;
pub mod intr;
pub mod locator;
pub mod ops;
pub mod report;

// Re-export ops
pub use ops::{PlatformOps, platform_ops, register_platform_ops};

// Re-export engine
pub use engine::{ArgsSource, AttachContext, Autoconf, autoconf, init_autoconf};

// Re-export 设备与驱动
pub use attach_args::{AttachArgs, BusArgs};
pub use descriptor::CfEntry;
pub use device::{Device, DeviceState};
pub use driver::{Activation, DetachFlags, Driver, DriverClass, Softc};
pub use intr::{InterruptController, IntrCookie};
pub use locator::{Loc, Locator};

// Re-export bus space
pub use bus_space::{
    BarrierFlags, BusClass, BusSpaceHandle, BusSpaceMapping, BusSpaceOps, BusSpaceTag, ByteOrder,
    MapFlags, bus_space_tag, register_bus_space,
};
pub use extent::{extent_claim, extent_create, extent_is_claimed, extent_release};

// Re-export dma
pub use dma::{DmaLimits, DmaMap, DmaRange, DmaSegment, DmaSyncOps, DmaTag};

// Re-export error
pub use error::{AttachError, AutoconfError, BusSpaceError, DetachError, DmaError};

#[cfg(test)]
pub(crate) mod test_util {
    use crate::bus_space::PortIo;
    use crate::intr::InterruptController;
    use crate::ops::PlatformOps;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use sync::ArchOps;
    use test_support::mock::bus::MockPortIo;
    use test_support::mock::device::MockIntc;
    use test_support::mock::mm::{MOCK_MEM_OPS, MockMemOps};

    struct DummyArchOps;

    impl ArchOps for DummyArchOps {
        unsafe fn read_and_disable_interrupts(&self) -> usize {
            0
        }

        unsafe fn restore_interrupts(&self, _flags: usize) {}
    }

    impl PlatformOps for MockMemOps {
        fn vaddr_to_paddr(&self, vaddr: usize) -> Option<usize> {
            MockMemOps::vaddr_to_paddr(self, vaddr)
        }

        fn paddr_to_vaddr(&self, paddr: usize) -> usize {
            MockMemOps::paddr_to_vaddr(self, paddr)
        }

        fn page_size(&self) -> usize {
            MockMemOps::page_size(self)
        }
    }

    impl InterruptController for MockIntc {
        fn name(&self) -> &'static str {
            "mock-intc"
        }

        fn establish(&self, irq: u32) -> bool {
            self.enable(irq as usize)
        }

        fn disestablish(&self, irq: u32) {
            self.disable(irq as usize);
        }

        fn is_established(&self, irq: u32) -> bool {
            self.is_enabled(irq as usize)
        }
    }

    impl PortIo for MockPortIo {
        unsafe fn inb(&self, port: u16) -> u8 {
            MockPortIo::inb(self, port)
        }

        unsafe fn inw(&self, port: u16) -> u16 {
            MockPortIo::inw(self, port)
        }

        unsafe fn inl(&self, port: u16) -> u32 {
            MockPortIo::inl(self, port)
        }

        unsafe fn outb(&self, port: u16, value: u8) {
            MockPortIo::outb(self, port, value)
        }

        unsafe fn outw(&self, port: u16, value: u16) {
            MockPortIo::outw(self, port, value)
        }

        unsafe fn outl(&self, port: u16, value: u32) {
            MockPortIo::outl(self, port, value)
        }
    }

    static DUMMY_ARCH_OPS: DummyArchOps = DummyArchOps;
    // 0 = uninit, 1 = initializing, 2 = ready
    static INIT: AtomicUsize = AtomicUsize::new(0);

    /// 注册测试用的架构与平台操作（可重复调用）
    pub fn init() {
        match INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                // SAFETY: 测试共享同一组全局实例
                unsafe {
                    sync::register_arch_ops(&DUMMY_ARCH_OPS);
                    crate::ops::register_platform_ops(&MOCK_MEM_OPS);
                }
                INIT.store(2, Ordering::Release);
            }
            Err(_) => {
                while INIT.load(Ordering::Acquire) != 2 {
                    core::hint::spin_loop();
                }
            }
        }
    }
}
