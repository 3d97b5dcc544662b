//! 驱动接口
//!
//! 每个驱动实现 [`Driver`]（相当于 match/attach/detach/activate 回调表），
//! 在启动时注册到引擎。同名驱动组成一个 [`DriverClass`]，
//! 一个驱动类可以为不同的挂接点各注册一个实现。

use alloc::{sync::Arc, vec::Vec};
use core::any::Any;

use crate::attach_args::AttachArgs;
use crate::descriptor::CfEntry;
use crate::device::Device;
use crate::engine::AttachContext;
use crate::error::{AttachError, DetachError};

/// 设备私有状态
pub type Softc = Arc<dyn Any + Send + Sync>;

bitflags::bitflags! {
    /// detach 标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DetachFlags: u32 {
        /// 驱动的 detach 回调失败时仍然继续
        const FORCE = 1 << 0;
        /// 先按后序 detach 全部子设备
        const RECURSIVE = 1 << 1;
        /// 关机过程中的 detach
        const SHUTDOWN = 1 << 2;
        /// 不输出 detach 消息
        const QUIET = 1 << 3;
    }
}

/// 传给 [`Driver::activate`] 的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Activation {
    /// 硬件已经消失或即将消失，停止访问设备
    Deactivate,
}

/// 驱动回调表
pub trait Driver: Send + Sync {
    /// 驱动类名，同时是设备名前缀（例如 `com`）
    fn name(&self) -> &'static str;

    /// 本实现适用的挂接点，`None` 表示任意挂接点
    fn attachment(&self) -> Option<&'static str> {
        None
    }

    /// 私有状态大小
    ///
    /// 非 0 时引擎在 attach 成功后核对返回的私有状态大小，不一致按 attach 失败处理。
    fn softc_size(&self) -> usize {
        0
    }

    /// 探测设备，返回匹配优先级，0 表示不匹配
    fn match_device(&self, parent: Option<&Device>, entry: &CfEntry, aa: &AttachArgs) -> u32;

    /// 初始化设备并返回私有状态
    ///
    /// 通过 `ctx` 建立的映射、中断和子设备都归属于新设备；返回错误时它们会被全部撤销。
    fn attach(&self, ctx: &mut AttachContext<'_>, aa: &AttachArgs) -> Result<Softc, AttachError>;

    /// 停止设备
    ///
    /// 驱动应在这里撤销自己建立的中断；引擎随后会确认中断已撤销，再释放映射和私有状态。
    fn detach(&self, _dev: &Device, _flags: DetachFlags) -> Result<(), DetachError> {
        Ok(())
    }

    /// 通知设备状态变化
    fn activate(&self, _dev: &Device, _act: Activation) -> Result<(), DetachError> {
        Ok(())
    }
}

/// 驱动类
///
/// 注册后不可变，运行期间不会销毁。
#[derive(Clone)]
pub struct DriverClass {
    name: &'static str,
    softc_size: usize,
    drivers: Vec<&'static dyn Driver>,
}

impl DriverClass {
    pub(crate) fn new(driver: &'static dyn Driver) -> Self {
        Self {
            name: driver.name(),
            softc_size: driver.softc_size(),
            drivers: alloc::vec![driver],
        }
    }

    pub(crate) fn add(&mut self, driver: &'static dyn Driver) {
        self.softc_size = self.softc_size.max(driver.softc_size());
        self.drivers.push(driver);
    }

    /// 类名
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 私有状态大小，取类中各实现声明的最大值
    pub fn softc_size(&self) -> usize {
        self.softc_size
    }

    /// 已注册的实现，按注册顺序
    pub fn drivers(&self) -> &[&'static dyn Driver] {
        &self.drivers
    }

    /// 选择适用于 `attach_point` 的第一个实现
    pub fn driver_for(&self, attach_point: &str) -> Option<&'static dyn Driver> {
        self.drivers
            .iter()
            .find(|d| d.attachment().is_none_or(|at| at == attach_point))
            .copied()
    }
}

impl core::fmt::Debug for DriverClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DriverClass")
            .field("name", &self.name)
            .field("softc_size", &self.softc_size)
            .field("drivers", &self.drivers.len())
            .finish()
    }
}
