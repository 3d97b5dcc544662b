//! 定位符
//!
//! 定位符是描述符项和 attach 参数里的具名配置值（地址、中断号等），
//! 用来区分同一挂接点下的多个设备。

use core::fmt;

/// 定位符的值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loc {
    /// 确定的值
    Value(u64),
    /// 未指定，匹配任意值
    Unspecified,
}

impl Loc {
    /// 与另一个值是否兼容：任一方未指定即兼容
    pub fn accepts(&self, other: Loc) -> bool {
        match (self, other) {
            (Loc::Value(a), Loc::Value(b)) => *a == b,
            _ => true,
        }
    }

    /// 确定的值
    pub fn value(&self) -> Option<u64> {
        match self {
            Loc::Value(v) => Some(*v),
            Loc::Unspecified => None,
        }
    }
}

/// 具名定位符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    /// 名称，例如 `port`、`irq`
    pub name: &'static str,
    /// 值
    pub value: Loc,
}

impl Locator {
    /// 确定值的定位符
    pub const fn new(name: &'static str, value: u64) -> Self {
        Self {
            name,
            value: Loc::Value(value),
        }
    }

    /// 未指定值的定位符
    pub const fn any(name: &'static str) -> Self {
        Self {
            name,
            value: Loc::Unspecified,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Loc::Value(v) => write!(f, "{} {:#x}", self.name, v),
            Loc::Unspecified => write!(f, "{} ?", self.name),
        }
    }
}

/// `wanted` 中每个确定的定位符在 `actual` 中都有同名且相等的值
pub fn locators_match(wanted: &[Locator], actual: &[Locator]) -> bool {
    wanted.iter().all(|w| match w.value {
        Loc::Unspecified => true,
        Loc::Value(_) => actual
            .iter()
            .find(|a| a.name == w.name)
            .is_some_and(|a| w.value.accepts(a.value) && a.value != Loc::Unspecified),
    })
}
