//! 端口 I/O 的 Mock 实现
//!
//! 用一块字节数组模拟 x86 风格的端口空间：多字节访问按小端拼装，
//! 同时记录最近一次访问的宽度，供测试确认没有发生隐式的宽度变化。

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// 模拟端口空间大小
pub const MOCK_PORT_SPACE: usize = 0x1000;

/// Mock 端口寄存器文件
pub struct MockPortIo {
    regs: [AtomicU8; MOCK_PORT_SPACE],
    /// 最近一次访问的宽度（字节）
    pub last_width: AtomicUsize,
    /// 访问总次数
    pub accesses: AtomicUsize,
}

impl MockPortIo {
    /// 创建全零的寄存器文件
    pub const fn new() -> Self {
        Self {
            regs: [const { AtomicU8::new(0) }; MOCK_PORT_SPACE],
            last_width: AtomicUsize::new(0),
            accesses: AtomicUsize::new(0),
        }
    }

    fn note(&self, width: usize) {
        self.last_width.store(width, Ordering::Release);
        self.accesses.fetch_add(1, Ordering::AcqRel);
    }

    fn load(&self, port: u16, width: usize) -> u32 {
        let base = port as usize;
        let mut value = 0u32;
        for i in 0..width {
            value |= (self.regs[base + i].load(Ordering::Acquire) as u32) << (8 * i);
        }
        self.note(width);
        value
    }

    fn store(&self, port: u16, width: usize, value: u32) {
        let base = port as usize;
        for i in 0..width {
            self.regs[base + i].store((value >> (8 * i)) as u8, Ordering::Release);
        }
        self.note(width);
    }

    /// 读 1 字节端口
    pub fn inb(&self, port: u16) -> u8 {
        self.load(port, 1) as u8
    }

    /// 读 2 字节端口
    pub fn inw(&self, port: u16) -> u16 {
        self.load(port, 2) as u16
    }

    /// 读 4 字节端口
    pub fn inl(&self, port: u16) -> u32 {
        self.load(port, 4)
    }

    /// 写 1 字节端口
    pub fn outb(&self, port: u16, value: u8) {
        self.store(port, 1, value as u32);
    }

    /// 写 2 字节端口
    pub fn outw(&self, port: u16, value: u16) {
        self.store(port, 2, value as u32);
    }

    /// 写 4 字节端口
    pub fn outl(&self, port: u16, value: u32) {
        self.store(port, 4, value);
    }
}

impl Default for MockPortIo {
    fn default() -> Self {
        Self::new()
    }
}
