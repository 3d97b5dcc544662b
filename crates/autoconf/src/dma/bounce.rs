//! 回弹缓冲池
//!
//! 一段位于 DMA 可达窗口内的物理内存，按页分配给无法直接寻址的缓冲区使用。

use alloc::{vec, vec::Vec};
use sync::SpinLock;

/// 一次分配：从 `first` 开始的 `pages` 个连续页
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BounceSlot {
    pub first: usize,
    pub pages: usize,
}

/// 按页管理的回弹缓冲池
#[derive(Debug)]
pub struct BouncePool {
    sys_base: u64,
    bus_base: u64,
    page_size: usize,
    used: SpinLock<Vec<bool>>,
}

impl BouncePool {
    pub(crate) fn new(sys_base: u64, bus_base: u64, len: usize, page_size: usize) -> Self {
        Self {
            sys_base,
            bus_base,
            page_size,
            used: SpinLock::new(vec![false; len / page_size]),
        }
    }

    /// 页大小
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// 池中的总页数
    pub fn total_pages(&self) -> usize {
        self.used.lock().len()
    }

    /// 空闲页数
    pub fn free_pages(&self) -> usize {
        self.used.lock().iter().filter(|u| !**u).count()
    }

    /// 首次适配分配足以容纳 `len` 字节的连续页
    pub(crate) fn alloc(&self, len: usize) -> Option<BounceSlot> {
        let pages = len.div_ceil(self.page_size).max(1);
        let mut used = self.used.lock();
        let mut run = 0;
        for i in 0..used.len() {
            if used[i] {
                run = 0;
                continue;
            }
            run += 1;
            if run == pages {
                let first = i + 1 - pages;
                used[first..=i].iter_mut().for_each(|u| *u = true);
                return Some(BounceSlot { first, pages });
            }
        }
        None
    }

    pub(crate) fn free(&self, slot: BounceSlot) {
        let mut used = self.used.lock();
        used[slot.first..slot.first + slot.pages]
            .iter_mut()
            .for_each(|u| *u = false);
    }

    pub(crate) fn sys_addr(&self, slot: BounceSlot) -> u64 {
        self.sys_base + (slot.first * self.page_size) as u64
    }

    pub(crate) fn bus_addr(&self, slot: BounceSlot) -> u64 {
        self.bus_base + (slot.first * self.page_size) as u64
    }
}
