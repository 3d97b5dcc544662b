//! 集成测试共用的平台实现与驱动夹具

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use autoconf::bus_space::{LinearSpace, PortIo};
use autoconf::{
    AttachArgs, AttachContext, AttachError, BusClass, BusSpaceError, BusSpaceOps, BusSpaceTag,
    ByteOrder, CfEntry, Device, Driver, InterruptController, Loc, MapFlags, PlatformOps, Softc,
};
use sync::ArchOps;
use test_support::mock::bus::MockPortIo;
use test_support::mock::device::MockIntc;
use test_support::mock::events::{EV_UNMAP, MockEventLog};

struct TestArch;

impl ArchOps for TestArch {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        0
    }

    unsafe fn restore_interrupts(&self, _flags: usize) {}
}

struct IdentityPlatform;

impl PlatformOps for IdentityPlatform {
    fn vaddr_to_paddr(&self, vaddr: usize) -> Option<usize> {
        Some(vaddr)
    }

    fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        paddr
    }
}

static TEST_ARCH: TestArch = TestArch;
static PLATFORM: IdentityPlatform = IdentityPlatform;
// 0 = uninit, 1 = initializing, 2 = ready
static INIT: AtomicUsize = AtomicUsize::new(0);

pub fn init() {
    match INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            // Safety: tests share one set of global ops.
            unsafe {
                sync::register_arch_ops(&TEST_ARCH);
                autoconf::register_platform_ops(&PLATFORM);
            }
            INIT.store(2, Ordering::Release);
        }
        Err(_) => {
            while INIT.load(Ordering::Acquire) != 2 {
                std::hint::spin_loop();
            }
        }
    }
}

/// 中断控制器夹具
pub struct Intc(pub MockIntc);

impl InterruptController for Intc {
    fn name(&self) -> &'static str {
        "test-intc"
    }

    fn establish(&self, irq: u32) -> bool {
        self.0.enable(irq as usize)
    }

    fn disestablish(&self, irq: u32) {
        self.0.disable(irq as usize)
    }

    fn is_established(&self, irq: u32) -> bool {
        self.0.is_enabled(irq as usize)
    }
}

pub fn intc(log: Option<&'static MockEventLog>) -> Arc<dyn InterruptController> {
    let mock = match log {
        Some(log) => MockIntc::with_log(log),
        None => MockIntc::new(),
    };
    Arc::new(Intc(mock))
}

/// 端口 I/O 夹具
pub struct Port(pub MockPortIo);

impl PortIo for Port {
    unsafe fn inb(&self, port: u16) -> u8 {
        self.0.inb(port)
    }

    unsafe fn inw(&self, port: u16) -> u16 {
        self.0.inw(port)
    }

    unsafe fn inl(&self, port: u16) -> u32 {
        self.0.inl(port)
    }

    unsafe fn outb(&self, port: u16, value: u8) {
        self.0.outb(port, value)
    }

    unsafe fn outw(&self, port: u16, value: u16) {
        self.0.outw(port, value)
    }

    unsafe fn outl(&self, port: u16, value: u32) {
        self.0.outl(port, value)
    }
}

/// 解除映射时记录事件的线性空间
pub struct RecordingSpace {
    inner: LinearSpace,
    log: Option<&'static MockEventLog>,
}

impl BusSpaceOps for RecordingSpace {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn byte_order(&self) -> ByteOrder {
        self.inner.byte_order()
    }

    fn map(&self, addr: u64, size: usize, flags: MapFlags) -> Result<usize, BusSpaceError> {
        self.inner.map(addr, size, flags)
    }

    fn unmap(&self, base: usize, size: usize) {
        if let Some(log) = self.log {
            log.record(EV_UNMAP, size as u32);
        }
        self.inner.unmap(base, size)
    }

    unsafe fn read_1(&self, base: usize, offset: usize) -> u8 {
        unsafe { self.inner.read_1(base, offset) }
    }

    unsafe fn read_2(&self, base: usize, offset: usize) -> u16 {
        unsafe { self.inner.read_2(base, offset) }
    }

    unsafe fn read_4(&self, base: usize, offset: usize) -> u32 {
        unsafe { self.inner.read_4(base, offset) }
    }

    unsafe fn read_8(&self, base: usize, offset: usize) -> u64 {
        unsafe { self.inner.read_8(base, offset) }
    }

    unsafe fn write_1(&self, base: usize, offset: usize, value: u8) {
        unsafe { self.inner.write_1(base, offset, value) }
    }

    unsafe fn write_2(&self, base: usize, offset: usize, value: u16) {
        unsafe { self.inner.write_2(base, offset, value) }
    }

    unsafe fn write_4(&self, base: usize, offset: usize, value: u32) {
        unsafe { self.inner.write_4(base, offset, value) }
    }

    unsafe fn write_8(&self, base: usize, offset: usize, value: u64) {
        unsafe { self.inner.write_8(base, offset, value) }
    }
}

/// 在泄漏的宿主内存上创建一个内存空间标签，总线地址 `[bus_base, bus_base + size)`
pub fn mem_tag(class: u16, bus_base: u64, size: usize, log: Option<&'static MockEventLog>) -> BusSpaceTag {
    let words = size.div_ceil(8);
    let vbase = Box::leak(vec![0u64; words].into_boxed_slice()).as_mut_ptr() as usize;
    let ops: &'static RecordingSpace = Box::leak(Box::new(RecordingSpace {
        inner: LinearSpace::new("test-mem", vbase, bus_base, size as u64),
        log,
    }));
    BusSpaceTag::new(BusClass(class), ops)
}

/// 根设备驱动，attach 不做任何事
pub struct Root;

impl Driver for Root {
    fn name(&self) -> &'static str {
        "mainbus"
    }

    fn match_device(&self, _parent: Option<&Device>, _entry: &CfEntry, _aa: &AttachArgs) -> u32 {
        1
    }

    fn attach(&self, _ctx: &mut AttachContext<'_>, _aa: &AttachArgs) -> Result<Softc, AttachError> {
        Ok(Arc::new(()))
    }
}

pub static ROOT: Root = Root;

/// 由函数决定匹配优先级并统计探测次数的驱动
pub struct Probe {
    name: &'static str,
    priority: fn(&AttachArgs) -> u32,
    probes: AtomicUsize,
}

impl Probe {
    pub const fn new(name: &'static str, priority: fn(&AttachArgs) -> u32) -> Self {
        Self {
            name,
            priority,
            probes: AtomicUsize::new(0),
        }
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::Acquire)
    }
}

impl Driver for Probe {
    fn name(&self) -> &'static str {
        self.name
    }

    fn match_device(&self, _parent: Option<&Device>, _entry: &CfEntry, aa: &AttachArgs) -> u32 {
        self.probes.fetch_add(1, Ordering::AcqRel);
        (self.priority)(aa)
    }

    fn attach(&self, _ctx: &mut AttachContext<'_>, _aa: &AttachArgs) -> Result<Softc, AttachError> {
        Ok(Arc::new(self.name))
    }
}

/// 主总线的参数来源：确定的 `addr` 定位符原样使用，
/// 未指定时按实例号分配 `0x2000 + 0x100 * instance`
pub fn mainbus_args(entry: &CfEntry, instance: usize) -> Option<AttachArgs> {
    let addr = match entry.locator("addr").map(|l| l.value) {
        Some(Loc::Value(addr)) => addr,
        _ => 0x2000 + 0x100 * instance as u64,
    };
    Some(AttachArgs::simple(entry.driver, None, addr, 0x100, None))
}
