//! 引导诊断消息
//!
//! 格式是稳定的兼容面，启动日志和测试都依赖它：
//!
//! ```text
//! mainbus0 (root)
//! com0 at isa0 port 0x3f8 irq 0x4
//! com0 detached
//! vendor 0x8086 product 0x100e at pci0 dev 0x3 function 0x0 not configured
//! ```

use alloc::{format, string::String};
use core::fmt::Write;

use crate::attach_args::AttachArgs;
use crate::device::Device;
use crate::locator::{Loc, Locator};

fn push_locators(line: &mut String, locators: &[Locator]) {
    for l in locators {
        if let Loc::Value(v) = l.value {
            let _ = write!(line, " {} {:#x}", l.name, v);
        }
    }
}

/// attach 成功的消息
pub fn attach_line(dev: &Device) -> String {
    match dev.parent() {
        None => format!("{} (root)", dev.xname()),
        Some(parent) => {
            let mut line = format!("{} at {}", dev.xname(), parent.xname());
            push_locators(&mut line, dev.locators());
            line
        }
    }
}

/// detach 完成的消息
pub fn detach_line(dev: &Device) -> String {
    format!("{} detached", dev.xname())
}

/// 直接配置时没有驱动认领的消息
pub fn not_configured_line(aa: &AttachArgs, parent: &Device) -> String {
    let mut line = format!("{} at {}", aa.describe(), parent.xname());
    push_locators(&mut line, aa.locators());
    line.push_str(" not configured");
    line
}
