//! 设备描述符表
//!
//! 由板级支持代码提供的静态表，每一项描述“哪个驱动类可以挂在哪个挂接点、使用哪些定位符”。
//! 表在编译期构造，引擎只读不写。表中的位置就是同优先级匹配时的裁决依据：先声明者胜出。

use crate::locator::Locator;

/// 描述符表中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfEntry {
    /// 驱动类名
    pub driver: &'static str,
    /// 挂接点名
    pub attach_point: &'static str,
    /// 定位符
    pub locators: &'static [Locator],
    /// 通配项可以对同一个父设备反复匹配
    pub wildcard: bool,
    /// 传给驱动的配置标志
    pub flags: u32,
}

impl CfEntry {
    /// 普通项，对每个父设备至多匹配一次
    pub const fn new(
        driver: &'static str,
        attach_point: &'static str,
        locators: &'static [Locator],
    ) -> Self {
        Self {
            driver,
            attach_point,
            locators,
            wildcard: false,
            flags: 0,
        }
    }

    /// 通配项
    pub const fn wildcard(
        driver: &'static str,
        attach_point: &'static str,
        locators: &'static [Locator],
    ) -> Self {
        Self {
            driver,
            attach_point,
            locators,
            wildcard: true,
            flags: 0,
        }
    }

    /// 附加配置标志
    pub const fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// 按名称查找定位符
    pub fn locator(&self, name: &str) -> Option<&Locator> {
        self.locators.iter().find(|l| l.name == name)
    }
}
