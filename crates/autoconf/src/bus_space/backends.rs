//! 原语表实现
//!
//! - [`LinearSpace`]：寄存器线性映射在一段内核虚拟地址窗口中
//! - [`SparseSpace`]：稀疏窗口，寄存器偏移左移固定位数后才是实际地址
//! - [`PortSpace`]：端口 I/O，通过 [`PortIo`] 发出 in/out 指令

use core::ptr;

use super::{BusSpaceOps, ByteOrder, MapFlags};
use crate::error::BusSpaceError;

/// 检查 `[addr, addr + size)` 是否落在 `[bus_base, bus_base + window)` 内，返回窗口内偏移
fn window_offset(addr: u64, size: usize, bus_base: u64, window: u64) -> Result<u64, BusSpaceError> {
    let end = addr
        .checked_add(size as u64)
        .ok_or(BusSpaceError::MapFailure)?;
    if addr < bus_base || end > bus_base.saturating_add(window) {
        return Err(BusSpaceError::MapFailure);
    }
    Ok(addr - bus_base)
}

#[inline]
fn aligned(addr: usize, width: usize) -> usize {
    assert!(
        addr % width == 0,
        "bus space: unaligned {}-byte access at {:#x}",
        width,
        addr
    );
    addr
}

/// 线性内存映射空间
///
/// 总线地址 `[bus_base, bus_base + size)` 线性对应内核虚拟地址 `[vbase, vbase + size)`。
pub struct LinearSpace {
    name: &'static str,
    vbase: usize,
    bus_base: u64,
    size: u64,
    order: ByteOrder,
}

impl LinearSpace {
    /// 创建线性窗口，字节序为宿主机字节序
    pub const fn new(name: &'static str, vbase: usize, bus_base: u64, size: u64) -> Self {
        Self {
            name,
            vbase,
            bus_base,
            size,
            order: ByteOrder::NATIVE,
        }
    }

    /// 声明总线的字节序
    pub const fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }
}

impl BusSpaceOps for LinearSpace {
    fn name(&self) -> &'static str {
        self.name
    }

    fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn map(&self, addr: u64, size: usize, _flags: MapFlags) -> Result<usize, BusSpaceError> {
        let off = window_offset(addr, size, self.bus_base, self.size)?;
        Ok(self.vbase + off as usize)
    }

    fn unmap(&self, _base: usize, _size: usize) {}

    unsafe fn read_1(&self, base: usize, offset: usize) -> u8 {
        unsafe { ptr::read_volatile((base + offset) as *const u8) }
    }

    unsafe fn read_2(&self, base: usize, offset: usize) -> u16 {
        unsafe { ptr::read_volatile(aligned(base + offset, 2) as *const u16) }
    }

    unsafe fn read_4(&self, base: usize, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(aligned(base + offset, 4) as *const u32) }
    }

    unsafe fn read_8(&self, base: usize, offset: usize) -> u64 {
        unsafe { ptr::read_volatile(aligned(base + offset, 8) as *const u64) }
    }

    unsafe fn write_1(&self, base: usize, offset: usize, value: u8) {
        unsafe { ptr::write_volatile((base + offset) as *mut u8, value) }
    }

    unsafe fn write_2(&self, base: usize, offset: usize, value: u16) {
        unsafe { ptr::write_volatile(aligned(base + offset, 2) as *mut u16, value) }
    }

    unsafe fn write_4(&self, base: usize, offset: usize, value: u32) {
        unsafe { ptr::write_volatile(aligned(base + offset, 4) as *mut u32, value) }
    }

    unsafe fn write_8(&self, base: usize, offset: usize, value: u64) {
        unsafe { ptr::write_volatile(aligned(base + offset, 8) as *mut u64, value) }
    }
}

/// 稀疏内存窗口
///
/// 寄存器偏移 `off` 位于 `base + (off << shift)`，每个寄存器独占一个 `1 << shift` 字节的槽位。
/// 窗口的虚拟地址空间大小为 `size << shift`。
pub struct SparseSpace {
    name: &'static str,
    vbase: usize,
    bus_base: u64,
    size: u64,
    shift: u32,
}

impl SparseSpace {
    /// 创建稀疏窗口
    pub const fn new(name: &'static str, vbase: usize, bus_base: u64, size: u64, shift: u32) -> Self {
        Self {
            name,
            vbase,
            bus_base,
            size,
            shift,
        }
    }

    #[inline]
    fn slot(&self, base: usize, offset: usize) -> usize {
        base + (offset << self.shift)
    }
}

impl BusSpaceOps for SparseSpace {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports(&self, width: usize) -> bool {
        matches!(width, 1 | 2 | 4 | 8) && width <= 1 << self.shift
    }

    fn map(&self, addr: u64, size: usize, _flags: MapFlags) -> Result<usize, BusSpaceError> {
        let off = window_offset(addr, size, self.bus_base, self.size)?;
        Ok(self.vbase + ((off as usize) << self.shift))
    }

    fn unmap(&self, _base: usize, _size: usize) {}

    unsafe fn read_1(&self, base: usize, offset: usize) -> u8 {
        unsafe { ptr::read_volatile(self.slot(base, offset) as *const u8) }
    }

    unsafe fn read_2(&self, base: usize, offset: usize) -> u16 {
        unsafe { ptr::read_volatile(aligned(self.slot(base, offset), 2) as *const u16) }
    }

    unsafe fn read_4(&self, base: usize, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(aligned(self.slot(base, offset), 4) as *const u32) }
    }

    unsafe fn read_8(&self, base: usize, offset: usize) -> u64 {
        unsafe { ptr::read_volatile(aligned(self.slot(base, offset), 8) as *const u64) }
    }

    unsafe fn write_1(&self, base: usize, offset: usize, value: u8) {
        unsafe { ptr::write_volatile(self.slot(base, offset) as *mut u8, value) }
    }

    unsafe fn write_2(&self, base: usize, offset: usize, value: u16) {
        unsafe { ptr::write_volatile(aligned(self.slot(base, offset), 2) as *mut u16, value) }
    }

    unsafe fn write_4(&self, base: usize, offset: usize, value: u32) {
        unsafe { ptr::write_volatile(aligned(self.slot(base, offset), 4) as *mut u32, value) }
    }

    unsafe fn write_8(&self, base: usize, offset: usize, value: u64) {
        unsafe { ptr::write_volatile(aligned(self.slot(base, offset), 8) as *mut u64, value) }
    }
}

/// 端口 I/O 指令
pub trait PortIo: Send + Sync {
    /// 读 1 字节端口
    ///
    /// # Safety
    /// 访问端口可能产生任意硬件副作用
    unsafe fn inb(&self, port: u16) -> u8;
    /// 读 2 字节端口
    ///
    /// # Safety
    /// 同 [`PortIo::inb`]
    unsafe fn inw(&self, port: u16) -> u16;
    /// 读 4 字节端口
    ///
    /// # Safety
    /// 同 [`PortIo::inb`]
    unsafe fn inl(&self, port: u16) -> u32;
    /// 写 1 字节端口
    ///
    /// # Safety
    /// 同 [`PortIo::inb`]
    unsafe fn outb(&self, port: u16, value: u8);
    /// 写 2 字节端口
    ///
    /// # Safety
    /// 同 [`PortIo::inb`]
    unsafe fn outw(&self, port: u16, value: u16);
    /// 写 4 字节端口
    ///
    /// # Safety
    /// 同 [`PortIo::inb`]
    unsafe fn outl(&self, port: u16, value: u32);
}

/// x86 的 in/out 指令
#[cfg(target_arch = "x86_64")]
pub struct X86PortIo;

#[cfg(target_arch = "x86_64")]
impl PortIo for X86PortIo {
    unsafe fn inb(&self, port: u16) -> u8 {
        let value: u8;
        unsafe {
            core::arch::asm!("in al, dx", out("al") value, in("dx") port,
                options(nomem, nostack, preserves_flags));
        }
        value
    }

    unsafe fn inw(&self, port: u16) -> u16 {
        let value: u16;
        unsafe {
            core::arch::asm!("in ax, dx", out("ax") value, in("dx") port,
                options(nomem, nostack, preserves_flags));
        }
        value
    }

    unsafe fn inl(&self, port: u16) -> u32 {
        let value: u32;
        unsafe {
            core::arch::asm!("in eax, dx", out("eax") value, in("dx") port,
                options(nomem, nostack, preserves_flags));
        }
        value
    }

    unsafe fn outb(&self, port: u16, value: u8) {
        unsafe {
            core::arch::asm!("out dx, al", in("dx") port, in("al") value,
                options(nomem, nostack, preserves_flags));
        }
    }

    unsafe fn outw(&self, port: u16, value: u16) {
        unsafe {
            core::arch::asm!("out dx, ax", in("dx") port, in("ax") value,
                options(nomem, nostack, preserves_flags));
        }
    }

    unsafe fn outl(&self, port: u16, value: u32) {
        unsafe {
            core::arch::asm!("out dx, eax", in("dx") port, in("eax") value,
                options(nomem, nostack, preserves_flags));
        }
    }
}

/// 端口号空间大小
const PORT_SPACE_SIZE: u64 = 0x1_0000;

/// 端口 I/O 空间，端口号即总线地址
pub struct PortSpace<P: PortIo> {
    name: &'static str,
    io: P,
    limit: u64,
}

impl<P: PortIo> PortSpace<P> {
    /// 创建 64K 端口空间
    pub const fn new(name: &'static str, io: P) -> Self {
        Self {
            name,
            io,
            limit: PORT_SPACE_SIZE,
        }
    }

    /// 限制可映射的端口范围为 `[0, limit)`，上限不超过 16 位端口空间
    pub const fn with_limit(mut self, limit: u64) -> Self {
        self.limit = if limit < PORT_SPACE_SIZE { limit } else { PORT_SPACE_SIZE };
        self
    }

    /// 底层 I/O 指令实现
    pub fn io(&self) -> &P {
        &self.io
    }

    #[inline]
    fn port(base: usize, offset: usize) -> u16 {
        match base.checked_add(offset).map(u16::try_from) {
            Some(Ok(port)) => port,
            _ => panic!("bus space: port {:#x}+{:#x} beyond 16-bit port space", base, offset),
        }
    }
}

impl<P: PortIo> BusSpaceOps for PortSpace<P> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn byte_order(&self) -> ByteOrder {
        ByteOrder::Little
    }

    fn supports(&self, width: usize) -> bool {
        matches!(width, 1 | 2 | 4)
    }

    fn map(&self, addr: u64, size: usize, _flags: MapFlags) -> Result<usize, BusSpaceError> {
        window_offset(addr, size, 0, self.limit).map(|port| port as usize)
    }

    fn unmap(&self, _base: usize, _size: usize) {}

    unsafe fn read_1(&self, base: usize, offset: usize) -> u8 {
        unsafe { self.io.inb(Self::port(base, offset)) }
    }

    unsafe fn read_2(&self, base: usize, offset: usize) -> u16 {
        unsafe { self.io.inw(Self::port(base, offset)) }
    }

    unsafe fn read_4(&self, base: usize, offset: usize) -> u32 {
        unsafe { self.io.inl(Self::port(base, offset)) }
    }

    unsafe fn read_8(&self, _base: usize, _offset: usize) -> u64 {
        panic!("{}: port I/O has no 8-byte access", self.name)
    }

    unsafe fn write_1(&self, base: usize, offset: usize, value: u8) {
        unsafe { self.io.outb(Self::port(base, offset), value) }
    }

    unsafe fn write_2(&self, base: usize, offset: usize, value: u16) {
        unsafe { self.io.outw(Self::port(base, offset), value) }
    }

    unsafe fn write_4(&self, base: usize, offset: usize, value: u32) {
        unsafe { self.io.outl(Self::port(base, offset), value) }
    }

    unsafe fn write_8(&self, _base: usize, _offset: usize, _value: u64) {
        panic!("{}: port I/O has no 8-byte access", self.name)
    }
}
