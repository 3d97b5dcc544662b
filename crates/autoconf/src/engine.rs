//! 匹配/attach 引擎
//!
//! 引擎持有描述符表、驱动注册表、单元号分配器、设备树根和延迟工作队列。
//! 父设备在启动或热插拔时调用 [`Autoconf::config_search`]（间接配置，遍历描述符表）
//! 或 [`Autoconf::config_found`]（直接配置，父设备已经发现了一个子设备），
//! 引擎调用驱动的 match/attach 回调并把新设备挂入设备树。
//!
//! 调用驱动回调期间引擎不持有自己的任何锁，驱动可以在 attach 中递归配置子设备。

use alloc::{
    boxed::Box,
    collections::{BTreeMap, BTreeSet, VecDeque},
    string::String,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use sync::{RwLock, SpinLock};

use crate::attach_args::AttachArgs;
use crate::bus_space::{BusSpaceHandle, BusSpaceTag, MapFlags};
use crate::config::{
    MAX_UNITS_PER_CLASS, MAX_WILDCARD_INSTANCES, MESSAGE_BUFFER_LINES, ROOT_ATTACH_POINT,
    WILDCARD_MISS_LIMIT,
};
use crate::descriptor::CfEntry;
use crate::device::{Device, DeviceState, NewDevice};
use crate::driver::{Activation, DetachFlags, Driver, DriverClass};
use crate::error::{AttachError, AutoconfError, BusSpaceError, DetachError};
use crate::intr::{InterruptController, IntrCookie};
use crate::locator::locators_match;
use crate::report;

/// 间接配置时由父设备为每个描述符项构造 attach 参数
///
/// 返回 `None` 表示这个实例没有对应的资源，引擎按一次未匹配处理。
pub trait ArgsSource {
    /// 为 `entry` 的第 `instance` 个实例构造参数（普通项的 `instance` 恒为 0）
    fn args_for(&self, entry: &CfEntry, instance: usize) -> Option<AttachArgs>;
}

impl<F> ArgsSource for F
where
    F: Fn(&CfEntry, usize) -> Option<AttachArgs>,
{
    fn args_for(&self, entry: &CfEntry, instance: usize) -> Option<AttachArgs> {
        self(entry, instance)
    }
}

type DeferredWork = Box<dyn FnOnce(&Arc<Device>) + Send>;

struct Deferred {
    dev: Weak<Device>,
    work: DeferredWork,
}

/// 一次匹配中胜出的候选
struct Candidate {
    priority: u32,
    cf_index: usize,
    entry: CfEntry,
    driver: &'static dyn Driver,
    aa: AttachArgs,
}

/// 自动配置引擎
pub struct Autoconf {
    cfdata: RwLock<Vec<CfEntry>>,
    classes: RwLock<BTreeMap<&'static str, DriverClass>>,
    units: SpinLock<BTreeMap<&'static str, BTreeSet<u32>>>,
    roots: RwLock<Vec<Arc<Device>>>,
    deferred: SpinLock<VecDeque<Deferred>>,
    messages: SpinLock<VecDeque<String>>,
    next_id: AtomicU64,
}

impl Default for Autoconf {
    fn default() -> Self {
        Self::new()
    }
}

impl Autoconf {
    /// 创建空引擎
    pub fn new() -> Self {
        Self {
            cfdata: RwLock::new(Vec::new()),
            classes: RwLock::new(BTreeMap::new()),
            units: SpinLock::new(BTreeMap::new()),
            roots: RwLock::new(Vec::new()),
            deferred: SpinLock::new(VecDeque::new()),
            messages: SpinLock::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 追加描述符项，保持声明顺序
    pub fn attach_cfdata(&self, table: &[CfEntry]) {
        self.cfdata.write().extend_from_slice(table);
    }

    /// 描述符表快照
    pub fn cfdata(&self) -> Vec<CfEntry> {
        self.cfdata.read().clone()
    }

    /// 注册驱动，同名驱动归入同一个驱动类
    pub fn register_driver(&self, driver: &'static dyn Driver) {
        let mut classes = self.classes.write();
        match classes.get_mut(driver.name()) {
            Some(class) => class.add(driver),
            None => {
                classes.insert(driver.name(), DriverClass::new(driver));
            }
        }
    }

    /// 查找驱动类
    pub fn driver_class(&self, name: &str) -> Option<DriverClass> {
        self.classes.read().get(name).cloned()
    }

    fn lookup_driver(&self, entry: &CfEntry, attach_point: &str) -> Option<&'static dyn Driver> {
        let classes = self.classes.read();
        let Some(class) = classes.get(entry.driver) else {
            warn!("autoconf: driver {} not registered", entry.driver);
            return None;
        };
        class.driver_for(attach_point)
    }

    /// 记录一条诊断消息
    fn report(&self, line: String) {
        info!("{}", line);
        let mut messages = self.messages.lock();
        if messages.len() == MESSAGE_BUFFER_LINES {
            messages.pop_front();
        }
        messages.push_back(line);
    }

    /// 最近的诊断消息
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().iter().cloned().collect()
    }

    fn alloc_unit(&self, class: &'static str) -> Option<u32> {
        let mut units = self.units.lock();
        let used = units.entry(class).or_default();
        let unit = (0..MAX_UNITS_PER_CLASS).find(|u| !used.contains(u))?;
        used.insert(unit);
        Some(unit)
    }

    fn release_unit(&self, class: &'static str, unit: u32) {
        if let Some(used) = self.units.lock().get_mut(class) {
            used.remove(&unit);
        }
    }

    /// 实例化设备并调用驱动的 attach
    ///
    /// 失败时撤销新设备建立的一切（子设备、中断、映射），设备不会出现在设备树中。
    fn attach_device(
        &self,
        parent: Option<&Arc<Device>>,
        attach_point: &'static str,
        instance: usize,
        cand: Candidate,
    ) -> Result<Arc<Device>, AttachError> {
        let class = cand.entry.driver;
        let unit = self
            .alloc_unit(class)
            .ok_or(AttachError::Failed("no free unit number"))?;
        let dev = Device::new(NewDevice {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            class,
            unit,
            driver: cand.driver,
            parent: parent.cloned(),
            attach_point,
            cf_index: cand.cf_index,
            instance,
            cf_flags: cand.entry.flags,
            locators: cand.aa.locators().to_vec(),
        });
        dev.set_state(DeviceState::Attaching);

        let mut ctx = AttachContext {
            engine: self,
            dev: &dev,
        };
        let expected = cand.driver.softc_size();
        let result = cand.driver.attach(&mut ctx, &cand.aa).and_then(|softc| {
            let actual = core::mem::size_of_val(&*softc);
            if expected != 0 && actual != expected {
                warn!(
                    "{}: softc is {} bytes, driver declares {}",
                    dev.xname(),
                    actual,
                    expected
                );
                return Err(AttachError::Failed("softc size mismatch"));
            }
            Ok(softc)
        });
        match result {
            Ok(softc) => {
                dev.set_softc(softc);
                dev.set_active(true);
                dev.set_state(DeviceState::Attached);
                match parent {
                    Some(parent) => parent.add_child(dev.clone()),
                    None => self.roots.write().push(dev.clone()),
                }
                self.report(report::attach_line(&dev));
                Ok(dev)
            }
            Err(e) => {
                warn!("{}: attach failed: {}", dev.xname(), e);
                self.teardown_failed(&dev);
                self.release_unit(class, unit);
                Err(e)
            }
        }
    }

    fn teardown_failed(&self, dev: &Arc<Device>) {
        for child in dev.children().iter().rev() {
            if let Err(e) = self.config_detach(child, DetachFlags::FORCE | DetachFlags::RECURSIVE) {
                warn!("{}: cannot detach {}: {}", dev.xname(), child.xname(), e);
            }
        }
        if !dev.quiesce_interrupts() {
            warn!("{}: interrupts still established after failed attach", dev.xname());
        }
        dev.release_mappings();
        drop(dev.take_softc());
        dev.set_state(DeviceState::Detached);
    }

    /// 配置根设备
    ///
    /// 根设备来自挂接点 `root` 上驱动名为 `name` 的描述符项。配置完成后执行延迟工作。
    pub fn config_rootfound(
        &self,
        name: &str,
        aa: AttachArgs,
    ) -> Result<Arc<Device>, AutoconfError> {
        let table = self.cfdata();
        let Some((cf_index, entry)) = table
            .iter()
            .enumerate()
            .find(|(_, e)| e.attach_point == ROOT_ATTACH_POINT && e.driver == name)
        else {
            warn!("root device {} not configured", name);
            return Err(AutoconfError::NotConfigured);
        };
        if let Some(root) = self
            .roots
            .read()
            .iter()
            .find(|r| r.cf_index() == cf_index)
        {
            return Ok(root.clone());
        }
        let driver = self
            .lookup_driver(entry, ROOT_ATTACH_POINT)
            .ok_or(AutoconfError::NotConfigured)?;
        let priority = driver.match_device(None, entry, &aa);
        if priority == 0 {
            warn!("root device {} not configured", name);
            return Err(AutoconfError::NotConfigured);
        }
        let dev = self.attach_device(
            None,
            ROOT_ATTACH_POINT,
            0,
            Candidate {
                priority,
                cf_index,
                entry: *entry,
                driver,
                aa,
            },
        )?;
        self.run_deferred();
        Ok(dev)
    }

    /// 间接配置：按声明顺序遍历挂接点上的描述符项
    ///
    /// - 定位符完全相同的普通项竞争同一个槽位，优先级最高者胜出，同优先级先声明者胜出
    /// - 通配项以递增的实例号反复探测，连续 [`WILDCARD_MISS_LIMIT`] 次未匹配后停止
    /// - 已有存活设备的槽位或实例直接跳过，重复探测不会重复创建设备
    ///
    /// 返回本次新 attach 的设备数。
    pub fn config_search(
        &self,
        parent: &Arc<Device>,
        attach_point: &'static str,
        source: &dyn ArgsSource,
    ) -> usize {
        let table = self.cfdata();
        let candidates: Vec<(usize, CfEntry)> = table
            .into_iter()
            .enumerate()
            .filter(|(_, e)| e.attach_point == attach_point)
            .collect();
        let mut handled = BTreeSet::new();
        let mut attached = 0;

        for (pos, (cf_index, entry)) in candidates.iter().enumerate() {
            if entry.wildcard {
                attached += self.search_wildcard(parent, attach_point, *cf_index, entry, source);
                continue;
            }
            if handled.contains(cf_index) {
                continue;
            }
            let slot: Vec<(usize, CfEntry)> = candidates[pos..]
                .iter()
                .filter(|(_, e)| !e.wildcard && e.locators == entry.locators)
                .copied()
                .collect();
            handled.extend(slot.iter().map(|(i, _)| *i));
            if slot.iter().any(|(i, _)| parent.has_child_from(*i, 0)) {
                debug!("{}: slot of {} already configured", parent.xname(), entry.driver);
                continue;
            }

            let mut best: Option<Candidate> = None;
            for (i, e) in slot {
                let Some(driver) = self.lookup_driver(&e, attach_point) else {
                    continue;
                };
                let Some(aa) = source.args_for(&e, 0) else {
                    continue;
                };
                let priority = driver.match_device(Some(parent), &e, &aa);
                debug!("{}: probe {} -> {}", parent.xname(), e.driver, priority);
                // 只有严格更高的优先级才能取代先声明的候选
                if priority > 0 && best.as_ref().is_none_or(|b| priority > b.priority) {
                    best = Some(Candidate {
                        priority,
                        cf_index: i,
                        entry: e,
                        driver,
                        aa,
                    });
                }
            }
            if let Some(cand) = best {
                if self.attach_device(Some(parent), attach_point, 0, cand).is_ok() {
                    attached += 1;
                }
            }
        }
        attached
    }

    fn search_wildcard(
        &self,
        parent: &Arc<Device>,
        attach_point: &'static str,
        cf_index: usize,
        entry: &CfEntry,
        source: &dyn ArgsSource,
    ) -> usize {
        let Some(driver) = self.lookup_driver(entry, attach_point) else {
            return 0;
        };
        let mut misses = 0;
        let mut attached = 0;
        for instance in 0..MAX_WILDCARD_INSTANCES {
            if misses == WILDCARD_MISS_LIMIT {
                break;
            }
            if parent.has_child_from(cf_index, instance) {
                misses = 0;
                continue;
            }
            let Some(aa) = source.args_for(entry, instance) else {
                misses += 1;
                continue;
            };
            let priority = driver.match_device(Some(parent), entry, &aa);
            debug!(
                "{}: probe {} instance {} -> {}",
                parent.xname(),
                entry.driver,
                instance,
                priority
            );
            if priority == 0 {
                misses += 1;
                continue;
            }
            misses = 0;
            let cand = Candidate {
                priority,
                cf_index,
                entry: *entry,
                driver,
                aa,
            };
            if self
                .attach_device(Some(parent), attach_point, instance, cand)
                .is_ok()
            {
                attached += 1;
            }
        }
        attached
    }

    /// 直接配置：父设备发现了一个子设备，为它寻找最合适的驱动
    ///
    /// 候选是挂接点上定位符与 `aa` 兼容的描述符项。没有驱动认领时输出 `not configured` 消息。
    /// 同一描述符项以相同定位符创建的存活设备会被直接返回。
    pub fn config_found(
        &self,
        parent: &Arc<Device>,
        attach_point: &'static str,
        aa: AttachArgs,
    ) -> Option<Arc<Device>> {
        let table = self.cfdata();
        let mut best: Option<(u32, usize, CfEntry, &'static dyn Driver)> = None;
        for (cf_index, entry) in table.iter().enumerate() {
            if entry.attach_point != attach_point || !locators_match(entry.locators, aa.locators()) {
                continue;
            }
            let Some(driver) = self.lookup_driver(entry, attach_point) else {
                continue;
            };
            let priority = driver.match_device(Some(parent), entry, &aa);
            if priority > 0 && best.as_ref().is_none_or(|b| priority > b.0) {
                best = Some((priority, cf_index, *entry, driver));
            }
        }
        let Some((priority, cf_index, entry, driver)) = best else {
            self.report(report::not_configured_line(&aa, parent));
            return None;
        };

        let siblings: Vec<Arc<Device>> = parent
            .children()
            .into_iter()
            .filter(|c| c.cf_index() == cf_index)
            .collect();
        if let Some(existing) = siblings.iter().find(|c| c.locators() == aa.locators()) {
            return Some(existing.clone());
        }
        let instance = (0..)
            .find(|i| !siblings.iter().any(|c| c.instance() == *i))
            .unwrap_or_default();
        let cand = Candidate {
            priority,
            cf_index,
            entry,
            driver,
            aa,
        };
        self.attach_device(Some(parent), attach_point, instance, cand)
            .ok()
    }

    /// detach 设备
    ///
    /// 有存活子设备时返回 `Busy`，除非给出 `RECURSIVE`（按后序先 detach 子设备）。
    /// 顺序：驱动 detach 回调 → 确认中断已撤销 → 释放总线空间 → 释放私有状态 →
    /// 从父设备摘除 → 释放单元号。驱动回调之后仍有中断时返回 `Busy`，
    /// 给出 `FORCE` 时由引擎撤销这些中断。
    pub fn config_detach(&self, dev: &Arc<Device>, flags: DetachFlags) -> Result<(), DetachError> {
        if !dev.transition(DeviceState::Attached, DeviceState::Detaching) {
            return Err(DetachError::NotAttached);
        }
        let children = dev.children();
        if !children.is_empty() {
            if !flags.contains(DetachFlags::RECURSIVE) {
                dev.set_state(DeviceState::Attached);
                return Err(DetachError::Busy);
            }
            for child in children.iter().rev() {
                if let Err(e) = self.config_detach(child, flags) {
                    dev.set_state(DeviceState::Attached);
                    return Err(e);
                }
            }
        }

        if let Err(e) = dev.driver().detach(dev, flags) {
            if !flags.contains(DetachFlags::FORCE) {
                dev.set_state(DeviceState::Attached);
                return Err(e);
            }
            warn!("{}: forced detach: {}", dev.xname(), e);
        }
        if dev.intr_count() > 0 {
            if !flags.contains(DetachFlags::FORCE) {
                warn!("{}: detach with live interrupt handlers", dev.xname());
                dev.set_state(DeviceState::Attached);
                return Err(DetachError::Busy);
            }
            if !dev.quiesce_interrupts() {
                dev.set_state(DeviceState::Attached);
                return Err(DetachError::Busy);
            }
        }

        dev.release_mappings();
        drop(dev.take_softc());
        match dev.parent() {
            Some(parent) => parent.remove_child(dev.id()),
            None => self.roots.write().retain(|r| r.id() != dev.id()),
        }
        self.release_unit(dev.class(), dev.unit());
        dev.set_active(false);
        dev.set_state(DeviceState::Detached);
        if !flags.contains(DetachFlags::QUIET) {
            self.report(report::detach_line(dev));
        }
        Ok(())
    }

    /// 按后序 detach `dev` 的全部子设备
    pub fn config_detach_children(
        &self,
        dev: &Arc<Device>,
        flags: DetachFlags,
    ) -> Result<(), DetachError> {
        for child in dev.children().iter().rev() {
            self.config_detach(child, flags)?;
        }
        Ok(())
    }

    /// 停用子树：先子设备后父设备调用 `activate(Deactivate)` 并清除活动标志
    pub fn config_deactivate(&self, dev: &Arc<Device>) -> Result<(), DetachError> {
        for child in dev.children() {
            self.config_deactivate(&child)?;
        }
        if dev.is_active() {
            dev.driver().activate(dev, Activation::Deactivate)?;
            dev.set_active(false);
        }
        Ok(())
    }

    /// 把工作推迟到当前配置过程结束之后执行
    ///
    /// 设备届时已不处于 attached 状态时，工作被丢弃。
    pub fn config_defer<F>(&self, dev: &Arc<Device>, work: F)
    where
        F: FnOnce(&Arc<Device>) + Send + 'static,
    {
        self.deferred.lock().push_back(Deferred {
            dev: Arc::downgrade(dev),
            work: Box::new(work),
        });
    }

    /// 执行延迟工作，直到队列为空，返回执行的数量
    pub fn run_deferred(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(item) = self.deferred.lock().pop_front() else {
                break;
            };
            match item.dev.upgrade() {
                Some(dev) if dev.state() == DeviceState::Attached => {
                    (item.work)(&dev);
                    ran += 1;
                }
                _ => debug!("autoconf: dropping deferred work for a vanished device"),
            }
        }
        ran
    }

    /// 根设备列表
    pub fn roots(&self) -> Vec<Arc<Device>> {
        self.roots.read().clone()
    }

    /// 先序遍历设备树，`visit` 的第二个参数是深度
    pub fn walk(&self, visit: &mut dyn FnMut(&Arc<Device>, usize)) {
        fn walk_one(dev: &Arc<Device>, depth: usize, visit: &mut dyn FnMut(&Arc<Device>, usize)) {
            visit(dev, depth);
            for child in dev.children() {
                walk_one(&child, depth + 1, visit);
            }
        }
        for root in self.roots() {
            walk_one(&root, 0, visit);
        }
    }

    /// 按设备名查找
    pub fn find_device(&self, xname: &str) -> Option<Arc<Device>> {
        let mut found = None;
        self.walk(&mut |dev, _| {
            if found.is_none() && dev.xname() == xname {
                found = Some(dev.clone());
            }
        });
        found
    }

    /// 按驱动类和单元号查找
    pub fn device_lookup(&self, class: &str, unit: u32) -> Option<Arc<Device>> {
        let mut found = None;
        self.walk(&mut |dev, _| {
            if found.is_none() && dev.class() == class && dev.unit() == unit {
                found = Some(dev.clone());
            }
        });
        found
    }

    /// 以缩进形式输出设备树
    pub fn print_tree(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.walk(&mut |dev, depth| {
            lines.push(alloc::format!("{:width$}{}", "", dev.xname(), width = depth * 2));
        });
        for line in &lines {
            info!("{}", line);
        }
        lines
    }
}

/// attach 回调的上下文
///
/// 通过它建立的映射、中断、子设备和延迟工作都归属于正在 attach 的设备。
pub struct AttachContext<'a> {
    engine: &'a Autoconf,
    dev: &'a Arc<Device>,
}

impl AttachContext<'_> {
    /// 正在 attach 的设备
    pub fn device(&self) -> &Arc<Device> {
        self.dev
    }

    /// 所属引擎
    pub fn engine(&self) -> &Autoconf {
        self.engine
    }

    /// 映射总线空间
    pub fn map(
        &mut self,
        tag: BusSpaceTag,
        addr: u64,
        size: usize,
        flags: MapFlags,
    ) -> Result<BusSpaceHandle, BusSpaceError> {
        self.dev.map(tag, addr, size, flags)
    }

    /// 建立中断
    pub fn intr_establish(
        &mut self,
        intc: &Arc<dyn InterruptController>,
        irq: u32,
    ) -> Result<IntrCookie, AttachError> {
        self.dev.intr_establish(intc, irq)
    }

    /// 在本设备下做间接配置
    pub fn config_search(&mut self, attach_point: &'static str, source: &dyn ArgsSource) -> usize {
        self.engine.config_search(self.dev, attach_point, source)
    }

    /// 在本设备下做直接配置
    pub fn config_found(&mut self, attach_point: &'static str, aa: AttachArgs) -> Option<Arc<Device>> {
        self.engine.config_found(self.dev, attach_point, aa)
    }

    /// 推迟工作到配置结束之后
    pub fn defer<F>(&mut self, work: F)
    where
        F: FnOnce(&Arc<Device>) + Send + 'static,
    {
        self.engine.config_defer(self.dev, work);
    }
}

lazy_static! {
    static ref AUTOCONF: Autoconf = Autoconf::new();
}

static CFDATA_LOADED: AtomicBool = AtomicBool::new(false);

/// 全局引擎
pub fn autoconf() -> &'static Autoconf {
    &AUTOCONF
}

/// 向全局引擎装入板级描述符表，只能调用一次
///
/// 重复调用时忽略并返回 false。
pub fn init_autoconf(table: &[CfEntry]) -> bool {
    if CFDATA_LOADED.swap(true, Ordering::AcqRel) {
        warn!("autoconf: descriptor table already loaded");
        return false;
    }
    AUTOCONF.attach_cfdata(table);
    true
}
