//! 映射与句柄
//!
//! [`BusSpaceMapping`] 拥有一段映射，销毁时解除映射并释放登记的资源区间。
//! [`BusSpaceHandle`] 是映射上的视图，子区间只缩小基址和长度，不拥有映射；
//! 映射解除后再通过任何视图访问寄存器都会 panic。

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use super::{BarrierFlags, BusSpaceTag, ByteOrder, MapFlags};
use crate::error::BusSpaceError;
use crate::extent::extent_release;

/// 一段已建立的总线空间映射
pub struct BusSpaceMapping {
    tag: BusSpaceTag,
    base: usize,
    addr: u64,
    size: usize,
    flags: MapFlags,
    live: Arc<AtomicBool>,
}

impl BusSpaceMapping {
    pub(super) fn new(tag: BusSpaceTag, base: usize, addr: u64, size: usize, flags: MapFlags) -> Self {
        Self {
            tag,
            base,
            addr,
            size,
            flags,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// 覆盖整个映射的句柄
    pub fn handle(&self) -> BusSpaceHandle {
        BusSpaceHandle {
            tag: self.tag,
            base: self.base,
            offset: 0,
            addr: self.addr,
            size: self.size,
            live: self.live.clone(),
        }
    }

    /// 映射所属的标签
    pub fn tag(&self) -> BusSpaceTag {
        self.tag
    }

    /// 映射的总线起始地址
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// 映射长度
    pub fn size(&self) -> usize {
        self.size
    }

    /// 映射标志
    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    /// `handle` 是否是本映射上的视图
    pub fn owns(&self, handle: &BusSpaceHandle) -> bool {
        Arc::ptr_eq(&self.live, &handle.live)
    }

    /// 解除映射
    pub fn unmap(self) {
        drop(self);
    }
}

impl Drop for BusSpaceMapping {
    fn drop(&mut self) {
        if self.live.swap(false, Ordering::AcqRel) {
            self.tag.ops.unmap(self.base, self.size);
            extent_release(self.tag.class, self.addr, self.size as u64);
        }
    }
}

impl fmt::Debug for BusSpaceMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSpaceMapping")
            .field("tag", &self.tag)
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

/// 寄存器窗口视图：(标签, 基址, 长度)
#[derive(Clone)]
pub struct BusSpaceHandle {
    tag: BusSpaceTag,
    base: usize,
    /// 相对映射起点的偏移
    offset: usize,
    addr: u64,
    size: usize,
    live: Arc<AtomicBool>,
}

macro_rules! bus_access {
    ($ty:ty, $width:expr, $read:ident, $write:ident,
     $read_multi:ident, $write_multi:ident,
     $read_region:ident, $write_region:ident, $set_region:ident) => {
        /// 以本宽度读取 `offset` 处的寄存器
        pub fn $read(&self, offset: usize) -> $ty {
            let off = self.check(offset, $width);
            // SAFETY: check 保证映射有效且访问不越界
            unsafe { self.tag.ops.$read(self.base, off) }
        }

        /// 以本宽度写入 `offset` 处的寄存器
        pub fn $write(&self, offset: usize, value: $ty) {
            let off = self.check(offset, $width);
            // SAFETY: 同上
            unsafe { self.tag.ops.$write(self.base, off, value) }
        }

        /// 反复读取同一个寄存器（例如 FIFO）填满 `buf`
        pub fn $read_multi(&self, offset: usize, buf: &mut [$ty]) {
            let off = self.check(offset, $width);
            for v in buf.iter_mut() {
                // SAFETY: 同上
                *v = unsafe { self.tag.ops.$read(self.base, off) };
            }
        }

        /// 把 `buf` 依次写入同一个寄存器
        pub fn $write_multi(&self, offset: usize, buf: &[$ty]) {
            let off = self.check(offset, $width);
            for v in buf {
                // SAFETY: 同上
                unsafe { self.tag.ops.$write(self.base, off, *v) };
            }
        }

        /// 从 `offset` 起读取连续的寄存器
        pub fn $read_region(&self, offset: usize, buf: &mut [$ty]) {
            let off = self.check_span(offset, $width, buf.len());
            for (i, v) in buf.iter_mut().enumerate() {
                // SAFETY: check_span 覆盖整个区间
                *v = unsafe { self.tag.ops.$read(self.base, off + i * $width) };
            }
        }

        /// 从 `offset` 起写入连续的寄存器
        pub fn $write_region(&self, offset: usize, buf: &[$ty]) {
            let off = self.check_span(offset, $width, buf.len());
            for (i, v) in buf.iter().enumerate() {
                // SAFETY: 同上
                unsafe { self.tag.ops.$write(self.base, off + i * $width, *v) };
            }
        }

        /// 把从 `offset` 起的 `count` 个寄存器都写成 `value`
        pub fn $set_region(&self, offset: usize, value: $ty, count: usize) {
            let off = self.check_span(offset, $width, count);
            for i in 0..count {
                // SAFETY: 同上
                unsafe { self.tag.ops.$write(self.base, off + i * $width, value) };
            }
        }
    };
}

macro_rules! bus_access_order {
    ($ty:ty, $read:ident, $write:ident, $read_order:ident, $write_order:ident) => {
        /// 按调用者声明的字节序读取
        pub fn $read_order(&self, offset: usize, order: ByteOrder) -> $ty {
            let raw = self.$read(offset);
            if order == self.tag.ops.byte_order() { raw } else { raw.swap_bytes() }
        }

        /// 按调用者声明的字节序写入
        pub fn $write_order(&self, offset: usize, value: $ty, order: ByteOrder) {
            let raw = if order == self.tag.ops.byte_order() { value } else { value.swap_bytes() };
            self.$write(offset, raw);
        }
    };
}

impl BusSpaceHandle {
    /// 检查访问合法性，返回相对映射起点的偏移
    fn check(&self, offset: usize, width: usize) -> usize {
        self.check_span(offset, width, 1)
    }

    fn check_span(&self, offset: usize, width: usize, count: usize) -> usize {
        assert!(
            self.live.load(Ordering::Acquire),
            "bus space: access through unmapped handle at {:#x}",
            self.addr
        );
        assert!(
            self.tag.ops.supports(width),
            "bus space: {} does not support {}-byte access",
            self.tag.ops.name(),
            width
        );
        let end = width
            .checked_mul(count)
            .and_then(|len| offset.checked_add(len));
        match end {
            Some(end) if end <= self.size => self.offset + offset,
            _ => panic!(
                "bus space: access at {:#x} (+{}x{}) beyond window of {:#x} bytes",
                offset, width, count, self.size
            ),
        }
    }

    /// 标签
    pub fn tag(&self) -> BusSpaceTag {
        self.tag
    }

    /// 窗口起点的总线地址
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// 窗口长度
    pub fn size(&self) -> usize {
        self.size
    }

    /// 底层映射是否仍然有效
    pub fn is_mapped(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// 在本窗口内划出子区间 `[offset, offset + len)`
    ///
    /// 子区间与本句柄共享映射，超出本窗口时返回 `OutOfRange`。
    pub fn subregion(&self, offset: usize, len: usize) -> Result<BusSpaceHandle, BusSpaceError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(BusSpaceHandle {
                tag: self.tag,
                base: self.base,
                offset: self.offset + offset,
                addr: self.addr + offset as u64,
                size: len,
                live: self.live.clone(),
            }),
            _ => Err(BusSpaceError::OutOfRange),
        }
    }

    /// 在 `[offset, offset + len)` 上建立顺序点
    ///
    /// 与读写一样检查映射是否有效、区间是否在窗口内。
    pub fn barrier(&self, offset: usize, len: usize, flags: BarrierFlags) {
        let off = self.check_span(offset, 1, len);
        self.tag.ops.barrier(self.base, off, len, flags);
    }

    bus_access!(u8, 1, read_1, write_1, read_multi_1, write_multi_1,
        read_region_1, write_region_1, set_region_1);
    bus_access!(u16, 2, read_2, write_2, read_multi_2, write_multi_2,
        read_region_2, write_region_2, set_region_2);
    bus_access!(u32, 4, read_4, write_4, read_multi_4, write_multi_4,
        read_region_4, write_region_4, set_region_4);
    bus_access!(u64, 8, read_8, write_8, read_multi_8, write_multi_8,
        read_region_8, write_region_8, set_region_8);

    bus_access_order!(u16, read_2, write_2, read_2_order, write_2_order);
    bus_access_order!(u32, read_4, write_4, read_4_order, write_4_order);
    bus_access_order!(u64, read_8, write_8, read_8_order, write_8_order);
}

impl fmt::Debug for BusSpaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSpaceHandle")
            .field("tag", &self.tag)
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("size", &format_args!("{:#x}", self.size))
            .field("mapped", &self.is_mapped())
            .finish()
    }
}
