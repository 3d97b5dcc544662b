//! 资源区间登记表
//!
//! 记录每个总线类别下已被映射的地址区间，保证物理资源的独占性。
//! 这是框架中唯一的全局可变状态，只在 map/unmap 时修改，由一把全局 [`SpinLock`] 保护。

use alloc::{collections::BTreeMap, vec::Vec};
use lazy_static::lazy_static;
use log::debug;
use sync::SpinLock;

use crate::bus_space::BusClass;
use crate::error::BusSpaceError;

/// 已登记的一段区间，`end` 为闭区间上界
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Claim {
    start: u64,
    end: u64,
    shared: bool,
}

impl Claim {
    fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start <= end && start <= self.end
    }
}

/// 某个总线类别下的受管窗口
#[derive(Debug)]
struct Extent {
    start: u64,
    end: u64,
    claims: Vec<Claim>,
}

impl Extent {
    fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            claims: Vec::new(),
        }
    }
}

lazy_static! {
    static ref EXTENTS: SpinLock<BTreeMap<BusClass, Extent>> = SpinLock::new(BTreeMap::new());
}

fn range_end(start: u64, size: u64) -> Result<u64, BusSpaceError> {
    if size == 0 {
        return Err(BusSpaceError::OutOfRange);
    }
    start.checked_add(size - 1).ok_or(BusSpaceError::OutOfRange)
}

/// 声明 `class` 的受管地址窗口 `[start, end]`
///
/// 未声明窗口的类别视为管理整个 64 位地址空间。
/// 对同一类别重复声明相同窗口是无害的；声明不同的窗口返回 `ResourceConflict`。
pub fn extent_create(class: BusClass, start: u64, end: u64) -> Result<(), BusSpaceError> {
    if end < start {
        return Err(BusSpaceError::OutOfRange);
    }
    let mut extents = EXTENTS.lock();
    match extents.get(&class) {
        Some(ext) if ext.start == start && ext.end == end => Ok(()),
        Some(_) => Err(BusSpaceError::ResourceConflict),
        None => {
            extents.insert(class, Extent::new(start, end));
            Ok(())
        }
    }
}

/// 登记 `[start, start + size)`
///
/// - 超出受管窗口返回 `MapFailure`
/// - 与独占区间重叠，或以独占方式与任何区间重叠，返回 `ResourceConflict`
pub fn extent_claim(
    class: BusClass,
    start: u64,
    size: u64,
    shared: bool,
) -> Result<(), BusSpaceError> {
    let end = range_end(start, size)?;
    let mut extents = EXTENTS.lock();
    let ext = extents
        .entry(class)
        .or_insert_with(|| Extent::new(0, u64::MAX));
    if start < ext.start || end > ext.end {
        return Err(BusSpaceError::MapFailure);
    }
    let conflict = ext
        .claims
        .iter()
        .any(|c| c.overlaps(start, end) && !(c.shared && shared));
    if conflict {
        debug!(
            "extent: {:?} [{:#x}, {:#x}] conflicts with an existing claim",
            class, start, end
        );
        return Err(BusSpaceError::ResourceConflict);
    }
    ext.claims.push(Claim { start, end, shared });
    Ok(())
}

/// 释放一次 [`extent_claim`] 的登记，不存在时忽略
pub fn extent_release(class: BusClass, start: u64, size: u64) {
    let Ok(end) = range_end(start, size) else {
        return;
    };
    let mut extents = EXTENTS.lock();
    if let Some(ext) = extents.get_mut(&class) {
        if let Some(pos) = ext
            .claims
            .iter()
            .position(|c| c.start == start && c.end == end)
        {
            ext.claims.swap_remove(pos);
        }
    }
}

/// 区间内是否有任何登记
pub fn extent_is_claimed(class: BusClass, start: u64, size: u64) -> bool {
    let Ok(end) = range_end(start, size) else {
        return false;
    };
    EXTENTS
        .lock()
        .get(&class)
        .is_some_and(|ext| ext.claims.iter().any(|c| c.overlaps(start, end)))
}
