//! DMA 地址转换
//!
//! 总线主控设备看到的地址与 CPU 的物理地址可能不同，并且可能只能寻址一部分内存
//! （例如 ISA 的 24 位限制）。[`DmaTag`] 记录一组有序、互不重叠的 [`DmaRange`]，
//! 把缓冲区装载为一组总线地址段；不可达的部分在标签支持时通过回弹缓冲区中转。

mod bounce;

pub use bounce::BouncePool;

use alloc::vec::Vec;
use core::sync::atomic::{Ordering, fence};
use log::debug;

use crate::config::{DEFAULT_MAX_SEGMENT_SIZE, DEFAULT_MAX_SEGMENTS};
use crate::error::DmaError;
use crate::ops::platform_ops;
use bounce::BounceSlot;

/// 一段系统地址到总线地址的线性对应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRange {
    /// 系统物理地址起点
    pub sys_base: u64,
    /// 对应的总线地址起点
    pub bus_base: u64,
    /// 长度
    pub len: u64,
}

impl DmaRange {
    /// 创建窗口
    pub const fn new(sys_base: u64, bus_base: u64, len: u64) -> Self {
        Self {
            sys_base,
            bus_base,
            len,
        }
    }

    fn sys_end(&self) -> u64 {
        self.sys_base.saturating_add(self.len)
    }

    fn contains(&self, sys: u64) -> bool {
        sys >= self.sys_base && sys < self.sys_end()
    }

    fn overlaps(&self, other: &DmaRange) -> bool {
        self.sys_base < other.sys_end() && other.sys_base < self.sys_end()
    }
}

/// 设备的 DMA 能力限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaLimits {
    /// 一次装载最多产生的段数
    pub max_segments: usize,
    /// 单段最大长度
    pub max_segment_size: usize,
    /// 段不得跨越的地址边界，0 表示没有限制
    pub boundary: u64,
    /// 设备能寻址的最高总线地址（含），`None` 表示没有限制
    pub bus_limit: Option<u64>,
}

impl Default for DmaLimits {
    fn default() -> Self {
        Self {
            max_segments: DEFAULT_MAX_SEGMENTS,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            boundary: 0,
            bus_limit: None,
        }
    }
}

/// 一个总线地址段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSegment {
    /// 总线地址
    pub bus_addr: u64,
    /// 长度
    pub len: usize,
}

bitflags::bitflags! {
    /// 同步操作
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaSyncOps: u32 {
        /// 设备读内存之前
        const PREREAD = 1 << 0;
        /// 设备读内存之后
        const POSTREAD = 1 << 1;
        /// 设备写内存之前
        const PREWRITE = 1 << 2;
        /// 设备写内存之后
        const POSTWRITE = 1 << 3;
    }
}

/// DMA 标签
#[derive(Debug)]
pub struct DmaTag {
    name: &'static str,
    ranges: Vec<DmaRange>,
    limits: DmaLimits,
    bounce: Option<BouncePool>,
}

/// 一段物理连续的缓冲区片段
#[derive(Debug, Clone, Copy)]
struct Run {
    sys: u64,
    offset: usize,
    len: usize,
}

/// 片段中一段翻译的结果
enum Piece {
    Direct { bus: u64, len: usize },
    Bounce { len: usize },
}

/// 一次中转：缓冲区 `[offset, offset + len)` 放在回弹页 `slot` 中
#[derive(Debug, Clone, Copy)]
struct Bounce {
    offset: usize,
    len: usize,
    slot: BounceSlot,
}

impl DmaTag {
    /// 创建标签，窗口按给定顺序查找
    ///
    /// 窗口的系统地址互相重叠时返回 `OverlappingRanges`。
    pub fn new(name: &'static str, ranges: &[DmaRange], limits: DmaLimits) -> Result<Self, DmaError> {
        for (i, a) in ranges.iter().enumerate() {
            if ranges[i + 1..].iter().any(|b| a.overlaps(b)) {
                return Err(DmaError::OverlappingRanges);
            }
        }
        Ok(Self {
            name,
            ranges: ranges.to_vec(),
            limits,
            bounce: None,
        })
    }

    /// 为标签配置回弹缓冲池 `[sys_base, sys_base + len)`
    ///
    /// 缓冲池必须完整落在一个窗口内，并且在设备可寻址的范围内。
    pub fn with_bounce_pool(mut self, sys_base: u64, len: usize) -> Result<Self, DmaError> {
        let page_size = platform_ops().page_size();
        let range = self
            .covering(sys_base)
            .ok_or(DmaError::OutOfBoundsAddress)?;
        if len < page_size || sys_base + len as u64 > range.sys_end() {
            return Err(DmaError::OutOfBoundsAddress);
        }
        let bus_base = range.bus_base + (sys_base - range.sys_base);
        if !self.reachable(bus_base, len) {
            return Err(DmaError::OutOfBoundsAddress);
        }
        self.bounce = Some(BouncePool::new(sys_base, bus_base, len, page_size));
        Ok(self)
    }

    /// 标签名
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 设备限制
    pub fn limits(&self) -> &DmaLimits {
        &self.limits
    }

    /// 窗口列表
    pub fn ranges(&self) -> &[DmaRange] {
        &self.ranges
    }

    /// 回弹缓冲池
    pub fn bounce_pool(&self) -> Option<&BouncePool> {
        self.bounce.as_ref()
    }

    fn covering(&self, sys: u64) -> Option<&DmaRange> {
        self.ranges.iter().find(|r| r.contains(sys))
    }

    fn reachable(&self, bus: u64, len: usize) -> bool {
        match self.limits.bus_limit {
            Some(limit) => bus
                .checked_add(len as u64 - 1)
                .is_some_and(|last| last <= limit),
            None => true,
        }
    }

    /// 把单个系统地址翻译为总线地址
    pub fn translate(&self, sys: u64) -> Option<u64> {
        let r = self.covering(sys)?;
        let bus = r.bus_base + (sys - r.sys_base);
        self.reachable(bus, 1).then_some(bus)
    }

    /// 把 `run` 的开头部分翻译为直接访问或中转
    fn split(&self, sys: u64, len: usize) -> Piece {
        if let Some(r) = self.covering(sys) {
            let bus = r.bus_base + (sys - r.sys_base);
            let mut n = len.min(clamp_len(r.sys_end() - sys));
            if let Some(limit) = self.limits.bus_limit {
                if bus <= limit {
                    n = n.min(clamp_len((limit - bus).saturating_add(1)));
                    return Piece::Direct { bus, len: n };
                }
                return Piece::Bounce { len: n };
            }
            return Piece::Direct { bus, len: n };
        }
        // 不可达部分延伸到下一个窗口的起点
        let next = self
            .ranges
            .iter()
            .filter(|r| r.sys_base > sys)
            .map(|r| r.sys_base)
            .min();
        let n = match next {
            Some(next) => len.min(clamp_len(next - sys)),
            None => len,
        };
        Piece::Bounce { len: n }
    }

    /// 装载缓冲区，返回总线地址段
    ///
    /// 1. 按页把缓冲区拆成物理连续的片段
    /// 2. 每个片段用第一个覆盖它的窗口翻译；未覆盖的部分在有回弹池时复制到回弹页，
    ///    否则返回 `OutOfBoundsAddress`
    /// 3. 总线地址相邻的段在 `max_segment_size` 和 `boundary` 允许时合并，
    ///    合并后超过 `max_segments` 返回 `TooManySegments`
    pub fn load<'a>(&'a self, buf: &'a mut [u8]) -> Result<DmaMap<'a>, DmaError> {
        let max_len = self
            .limits
            .max_segments
            .saturating_mul(self.limits.max_segment_size);
        if buf.len() > max_len {
            return Err(DmaError::BufferTooLarge);
        }
        let runs = physical_runs(buf)?;
        let mut map = DmaMap {
            tag: self,
            buf,
            segments: Vec::new(),
            bounces: Vec::new(),
        };
        for run in runs {
            let mut done = 0;
            while done < run.len {
                let sys = run.sys + done as u64;
                match self.split(sys, run.len - done) {
                    Piece::Direct { bus, len } => {
                        map.push_segment(bus, len)?;
                        done += len;
                    }
                    Piece::Bounce { len } => {
                        let bus = map.bounce(run.offset + done, len)?;
                        map.push_segment(bus, len)?;
                        done += len;
                    }
                }
            }
        }
        debug!(
            "dma {}: loaded {} bytes in {} segment(s), {} bounced",
            self.name,
            map.buf.len(),
            map.segments.len(),
            map.bounces.len()
        );
        Ok(map)
    }
}

/// 地址差转换为长度，超出 `usize` 时取最大值
fn clamp_len(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// 按页遍历缓冲区，合并物理地址连续的页
fn physical_runs(buf: &[u8]) -> Result<Vec<Run>, DmaError> {
    let ops = platform_ops();
    let page_size = ops.page_size();
    let start = buf.as_ptr() as usize;
    let mut runs: Vec<Run> = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let vaddr = start + offset;
        let chunk = (page_size - vaddr % page_size).min(buf.len() - offset);
        let paddr = ops
            .vaddr_to_paddr(vaddr)
            .ok_or(DmaError::OutOfBoundsAddress)? as u64;
        match runs.last_mut() {
            Some(last) if last.sys + last.len as u64 == paddr => last.len += chunk,
            _ => runs.push(Run {
                sys: paddr,
                offset,
                len: chunk,
            }),
        }
        offset += chunk;
    }
    Ok(runs)
}

/// 一次装载的结果
///
/// 持有缓冲区的独占借用直到卸载；销毁时归还回弹页。
pub struct DmaMap<'a> {
    tag: &'a DmaTag,
    buf: &'a mut [u8],
    segments: Vec<DmaSegment>,
    bounces: Vec<Bounce>,
}

impl DmaMap<'_> {
    fn push_segment(&mut self, mut bus: u64, mut len: usize) -> Result<(), DmaError> {
        let limits = self.tag.limits;
        while len > 0 {
            let mut n = len;
            if limits.boundary != 0 {
                let next = (bus / limits.boundary + 1).saturating_mul(limits.boundary);
                n = n.min((next - bus) as usize);
            }
            if let Some(last) = self.segments.last_mut() {
                let contiguous = last.bus_addr + last.len as u64 == bus;
                let same_window = limits.boundary == 0
                    || last.bus_addr / limits.boundary == bus / limits.boundary;
                if contiguous && same_window && last.len < limits.max_segment_size {
                    let take = n.min(limits.max_segment_size - last.len);
                    last.len += take;
                    bus += take as u64;
                    len -= take;
                    continue;
                }
            }
            if self.segments.len() == limits.max_segments {
                return Err(DmaError::TooManySegments);
            }
            let take = n.min(limits.max_segment_size);
            self.segments.push(DmaSegment { bus_addr: bus, len: take });
            bus += take as u64;
            len -= take;
        }
        Ok(())
    }

    /// 为 `buf[offset..offset + len]` 分配回弹页并复制数据，返回回弹页的总线地址
    fn bounce(&mut self, offset: usize, len: usize) -> Result<u64, DmaError> {
        let tag = self.tag;
        let pool = tag.bounce.as_ref().ok_or(DmaError::OutOfBoundsAddress)?;
        let slot = pool.alloc(len).ok_or(DmaError::NoBounceSpace)?;
        let bounce = Bounce { offset, len, slot };
        self.bounces.push(bounce);
        self.copy_to_bounce(&bounce);
        Ok(pool.bus_addr(slot))
    }

    fn bounce_ptr(&self, b: &Bounce) -> *mut u8 {
        let sys = self
            .tag
            .bounce
            .as_ref()
            .map(|pool| pool.sys_addr(b.slot))
            .unwrap_or_default();
        platform_ops().paddr_to_vaddr(sys as usize) as *mut u8
    }

    fn copy_to_bounce(&self, b: &Bounce) {
        let dst = self.bounce_ptr(b);
        // SAFETY: 回弹页由本映射独占，长度不超过分配的页数
        unsafe { core::ptr::copy_nonoverlapping(self.buf[b.offset..].as_ptr(), dst, b.len) };
    }

    fn copy_from_bounce(&mut self, b: &Bounce) {
        let src = self.bounce_ptr(b);
        // SAFETY: 同上
        unsafe {
            core::ptr::copy_nonoverlapping(src, self.buf[b.offset..].as_mut_ptr(), b.len)
        };
    }

    /// 总线地址段
    pub fn segments(&self) -> &[DmaSegment] {
        &self.segments
    }

    /// 是否使用了回弹缓冲区
    pub fn is_bounced(&self) -> bool {
        !self.bounces.is_empty()
    }

    /// 原始缓冲区
    pub fn buffer(&self) -> &[u8] {
        self.buf
    }

    /// 原始缓冲区（可写）
    ///
    /// 修改后需要 `sync(PREWRITE)` 才会反映到回弹页。
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buf
    }

    /// 在 CPU 与设备之间同步缓冲区内容
    ///
    /// `PREWRITE` 把原始缓冲区刷新到回弹页，`POSTREAD` 把回弹页复制回原始缓冲区。
    pub fn sync(&mut self, ops: DmaSyncOps) {
        if ops.intersects(DmaSyncOps::PREREAD | DmaSyncOps::PREWRITE) {
            if ops.contains(DmaSyncOps::PREWRITE) {
                for b in &self.bounces {
                    self.copy_to_bounce(b);
                }
            }
            fence(Ordering::SeqCst);
        }
        if ops.contains(DmaSyncOps::POSTREAD) {
            fence(Ordering::SeqCst);
            let bounces = core::mem::take(&mut self.bounces);
            for b in &bounces {
                self.copy_from_bounce(b);
            }
            self.bounces = bounces;
        }
    }

    /// 卸载映射，归还回弹页
    pub fn unload(self) {
        drop(self);
    }
}

impl Drop for DmaMap<'_> {
    fn drop(&mut self) {
        if let Some(pool) = self.tag.bounce.as_ref() {
            for b in self.bounces.drain(..) {
                pool.free(b.slot);
            }
        }
    }
}
