//! 设备树节点
//!
//! 父设备通过子设备列表独占子设备，子设备只持有指向父设备的弱引用，
//! 因此设备树里没有环。子设备列表由每个父设备自己的读写锁保护，
//! 与驱动访问寄存器时使用的锁无关。

use alloc::{
    format,
    string::String,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use log::warn;
use sync::{RwLock, SpinLock};

use crate::bus_space::{self, BusSpaceHandle, BusSpaceMapping, BusSpaceTag, MapFlags};
use crate::driver::{Driver, Softc};
use crate::error::{AttachError, BusSpaceError};
use crate::intr::{InterruptController, IntrCookie};
use crate::locator::Locator;

/// 设备生命周期
///
/// `Unattached → Attaching → Attached → Detaching → Detached`，
/// attach 失败时直接从 `Attaching` 进入 `Detached`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    /// 尚未 attach
    Unattached = 0,
    /// 驱动的 attach 回调正在运行
    Attaching = 1,
    /// 已挂入设备树
    Attached = 2,
    /// 正在 detach
    Detaching = 3,
    /// 已从设备树移除
    Detached = 4,
}

impl DeviceState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DeviceState::Unattached,
            1 => DeviceState::Attaching,
            2 => DeviceState::Attached,
            3 => DeviceState::Detaching,
            _ => DeviceState::Detached,
        }
    }
}

/// 创建设备所需的信息
pub(crate) struct NewDevice {
    pub id: u64,
    pub class: &'static str,
    pub unit: u32,
    pub driver: &'static dyn Driver,
    pub parent: Option<Arc<Device>>,
    pub attach_point: &'static str,
    pub cf_index: usize,
    pub instance: usize,
    pub cf_flags: u32,
    pub locators: Vec<Locator>,
}

/// 设备树中的一个设备
pub struct Device {
    id: u64,
    xname: String,
    class: &'static str,
    unit: u32,
    driver: &'static dyn Driver,
    parent: Weak<Device>,
    attach_point: &'static str,
    cf_index: usize,
    instance: usize,
    cf_flags: u32,
    locators: Vec<Locator>,
    state: AtomicU8,
    active: AtomicBool,
    softc: SpinLock<Option<Softc>>,
    children: RwLock<Vec<Arc<Device>>>,
    mappings: SpinLock<Vec<BusSpaceMapping>>,
    intrs: SpinLock<Vec<IntrCookie>>,
}

impl Device {
    pub(crate) fn new(info: NewDevice) -> Arc<Self> {
        Arc::new(Self {
            id: info.id,
            xname: format!("{}{}", info.class, info.unit),
            class: info.class,
            unit: info.unit,
            driver: info.driver,
            parent: info.parent.as_ref().map_or_else(Weak::new, Arc::downgrade),
            attach_point: info.attach_point,
            cf_index: info.cf_index,
            instance: info.instance,
            cf_flags: info.cf_flags,
            locators: info.locators,
            state: AtomicU8::new(DeviceState::Unattached as u8),
            active: AtomicBool::new(false),
            softc: SpinLock::new(None),
            children: RwLock::new(Vec::new()),
            mappings: SpinLock::new(Vec::new()),
            intrs: SpinLock::new(Vec::new()),
        })
    }

    /// 全局唯一的设备 ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 设备名，例如 `com0`
    pub fn xname(&self) -> &str {
        &self.xname
    }

    /// 驱动类名
    pub fn class(&self) -> &'static str {
        self.class
    }

    /// 单元号
    pub fn unit(&self) -> u32 {
        self.unit
    }

    /// 驱动
    pub fn driver(&self) -> &'static dyn Driver {
        self.driver
    }

    /// 父设备，根设备或父设备已销毁时为 `None`
    pub fn parent(&self) -> Option<Arc<Device>> {
        self.parent.upgrade()
    }

    /// 所在的挂接点
    pub fn attach_point(&self) -> &'static str {
        self.attach_point
    }

    /// 创建本设备的描述符项在表中的位置
    pub fn cf_index(&self) -> usize {
        self.cf_index
    }

    /// 通配项的实例号，普通项为 0
    pub fn instance(&self) -> usize {
        self.instance
    }

    /// 描述符项的配置标志
    pub fn cf_flags(&self) -> u32 {
        self.cf_flags
    }

    /// attach 时确定的定位符
    pub fn locators(&self) -> &[Locator] {
        &self.locators
    }

    /// 按名称取定位符值
    pub fn locator(&self, name: &str) -> Option<u64> {
        self.locators
            .iter()
            .find(|l| l.name == name)
            .and_then(|l| l.value.value())
    }

    /// 生命周期状态
    pub fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: DeviceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn transition(&self, from: DeviceState, to: DeviceState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 设备是否处于活动状态（未被 deactivate）
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// 以具体类型取出私有状态
    ///
    /// 只在 attach 成功之后、detach 之前有效。
    pub fn softc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let softc = self.softc.lock().clone()?;
        softc.downcast::<T>().ok()
    }

    pub(crate) fn set_softc(&self, softc: Softc) {
        *self.softc.lock() = Some(softc);
    }

    pub(crate) fn take_softc(&self) -> Option<Softc> {
        self.softc.lock().take()
    }

    /// 子设备快照
    pub fn children(&self) -> Vec<Arc<Device>> {
        self.children.read().clone()
    }

    /// 子设备数量
    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    pub(crate) fn add_child(&self, child: Arc<Device>) {
        self.children.write().push(child);
    }

    pub(crate) fn remove_child(&self, id: u64) {
        self.children.write().retain(|c| c.id != id);
    }

    /// 是否存在来自描述符项 `cf_index` 第 `instance` 个实例的子设备
    pub(crate) fn has_child_from(&self, cf_index: usize, instance: usize) -> bool {
        self.children
            .read()
            .iter()
            .any(|c| c.cf_index == cf_index && c.instance == instance)
    }

    /// 映射一段总线空间，映射归本设备所有，detach 时释放
    pub fn map(
        &self,
        tag: BusSpaceTag,
        addr: u64,
        size: usize,
        flags: MapFlags,
    ) -> Result<BusSpaceHandle, BusSpaceError> {
        let mapping = bus_space::map(tag, addr, size, flags)?;
        let handle = mapping.handle();
        self.mappings.lock().push(mapping);
        Ok(handle)
    }

    /// 提前释放 `handle` 所在的映射，返回是否找到
    pub fn unmap(&self, handle: &BusSpaceHandle) -> bool {
        let mapping = {
            let mut mappings = self.mappings.lock();
            mappings
                .iter()
                .position(|m| m.owns(handle))
                .map(|pos| mappings.remove(pos))
        };
        mapping.map(BusSpaceMapping::unmap).is_some()
    }

    /// 本设备持有的映射数
    pub fn mapping_count(&self) -> usize {
        self.mappings.lock().len()
    }

    /// 按建立的相反顺序释放全部映射
    pub(crate) fn release_mappings(&self) {
        let mappings = core::mem::take(&mut *self.mappings.lock());
        mappings.into_iter().rev().for_each(BusSpaceMapping::unmap);
    }

    /// 建立中断
    pub fn intr_establish(
        &self,
        intc: &Arc<dyn InterruptController>,
        irq: u32,
    ) -> Result<IntrCookie, AttachError> {
        if !intc.establish(irq) {
            return Err(AttachError::Interrupt(irq));
        }
        let cookie = IntrCookie::new(irq, intc.clone());
        self.intrs.lock().push(cookie.clone());
        Ok(cookie)
    }

    /// 撤销中断
    pub fn intr_disestablish(&self, cookie: &IntrCookie) {
        let found = {
            let mut intrs = self.intrs.lock();
            intrs
                .iter()
                .position(|c| c.same(cookie))
                .map(|pos| intrs.remove(pos))
        };
        if let Some(c) = found {
            if !c.quiesce() {
                warn!("{}: irq {} still established", self.xname, c.irq());
                self.intrs.lock().push(c);
            }
        }
    }

    /// 仍然建立着的中断数
    pub fn intr_count(&self) -> usize {
        self.intrs.lock().len()
    }

    /// 撤销全部中断，返回是否都已确认撤销
    pub(crate) fn quiesce_interrupts(&self) -> bool {
        let intrs = core::mem::take(&mut *self.intrs.lock());
        let live: Vec<IntrCookie> = intrs.into_iter().filter(|c| !c.quiesce()).collect();
        let quiet = live.is_empty();
        self.intrs.lock().extend(live);
        quiet
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("xname", &self.xname)
            .field("state", &self.state())
            .field("attach_point", &self.attach_point)
            .field("locators", &self.locators)
            .finish()
    }
}
