//! attach 参数
//!
//! 父设备为每次匹配尝试新建一份 [`AttachArgs`]，匹配失败或 attach 结束后即丢弃。
//! 驱动需要保留的内容必须在 attach 中复制到自己的私有状态里。
//!
//! 公共部分（版本、定位符、中断控制器、DMA 标签、扩展值）放在结构体中，
//! 总线相关部分放在按挂接点家族区分的 [`BusArgs`] 中。两者都是 `non_exhaustive`，
//! 新增资源种类时不影响忽略未知字段的旧驱动。

use alloc::{collections::BTreeMap, format, string::String, sync::Arc, vec::Vec};

use crate::bus_space::BusSpaceTag;
use crate::config::ATTACH_ARGS_VERSION;
use crate::dma::DmaTag;
use crate::intr::InterruptController;
use crate::locator::{Loc, Locator};

/// 按挂接点家族区分的总线参数
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum BusArgs {
    /// 主总线上的设备
    #[non_exhaustive]
    Mainbus {
        /// 设备名
        name: &'static str,
        /// 内存空间标签
        memt: Option<BusSpaceTag>,
        /// 端口空间标签
        iot: Option<BusSpaceTag>,
    },
    /// ISA 设备
    #[non_exhaustive]
    Isa {
        /// 端口空间标签
        iot: BusSpaceTag,
        /// 内存空间标签
        memt: Option<BusSpaceTag>,
        /// 端口基址
        port: Option<u64>,
        /// 端口数量
        iosize: usize,
        /// 设备内存地址
        iomem: Option<u64>,
        /// 设备内存大小
        iomsize: usize,
        /// 中断号
        irq: Option<u32>,
        /// DMA 通道
        drq: Option<u32>,
    },
    /// PCI 功能
    #[non_exhaustive]
    Pci {
        /// 内存空间标签
        memt: Option<BusSpaceTag>,
        /// 端口空间标签
        iot: Option<BusSpaceTag>,
        /// 总线号
        bus: u8,
        /// 设备号
        device: u8,
        /// 功能号
        function: u8,
        /// 厂商 ID
        vendor: u16,
        /// 产品 ID
        product: u16,
    },
    /// 只有一个寄存器窗口的简单设备
    #[non_exhaustive]
    Simple {
        /// 设备名
        name: &'static str,
        /// 寄存器窗口所在空间
        tag: Option<BusSpaceTag>,
        /// 窗口地址
        addr: u64,
        /// 窗口大小
        size: usize,
        /// 中断号
        irq: Option<u32>,
    },
}

/// 匹配与 attach 时传给驱动的参数
#[derive(Clone)]
pub struct AttachArgs {
    /// 参数布局版本
    pub version: u32,
    /// 总线参数
    pub bus: BusArgs,
    locators: Vec<Locator>,
    intc: Option<Arc<dyn InterruptController>>,
    dma: Option<Arc<DmaTag>>,
    extras: BTreeMap<&'static str, u64>,
}

impl AttachArgs {
    fn with_bus(bus: BusArgs) -> Self {
        Self {
            version: ATTACH_ARGS_VERSION,
            bus,
            locators: Vec::new(),
            intc: None,
            dma: None,
            extras: BTreeMap::new(),
        }
    }

    /// 主总线参数
    pub fn mainbus(name: &'static str) -> Self {
        Self::with_bus(BusArgs::Mainbus {
            name,
            memt: None,
            iot: None,
        })
    }

    /// 主总线参数，附带内存与端口空间
    pub fn mainbus_with_tags(
        name: &'static str,
        memt: Option<BusSpaceTag>,
        iot: Option<BusSpaceTag>,
    ) -> Self {
        Self::with_bus(BusArgs::Mainbus { name, memt, iot })
    }

    /// ISA 参数，`port`/`iomem`/`irq`/`drq` 同时作为定位符
    pub fn isa(
        iot: BusSpaceTag,
        port: Option<u64>,
        iosize: usize,
        irq: Option<u32>,
    ) -> Self {
        let mut aa = Self::with_bus(BusArgs::Isa {
            iot,
            memt: None,
            port,
            iosize,
            iomem: None,
            iomsize: 0,
            irq,
            drq: None,
        });
        aa.set_locator("port", port);
        aa.set_locator("irq", irq.map(u64::from));
        aa
    }

    /// 为 ISA 参数补充设备内存窗口
    pub fn with_isa_iomem(mut self, memt: BusSpaceTag, addr: u64, size: usize) -> Self {
        if let BusArgs::Isa {
            memt: m,
            iomem,
            iomsize,
            ..
        } = &mut self.bus
        {
            *m = Some(memt);
            *iomem = Some(addr);
            *iomsize = size;
            self.set_locator("iomem", Some(addr));
        }
        self
    }

    /// 为 ISA 参数补充 DMA 通道
    pub fn with_isa_drq(mut self, channel: u32) -> Self {
        if let BusArgs::Isa { drq, .. } = &mut self.bus {
            *drq = Some(channel);
            self.set_locator("drq", Some(channel as u64));
        }
        self
    }

    /// PCI 参数，`dev`/`function` 同时作为定位符
    pub fn pci(
        memt: Option<BusSpaceTag>,
        iot: Option<BusSpaceTag>,
        (bus, device, function): (u8, u8, u8),
        vendor: u16,
        product: u16,
    ) -> Self {
        let mut aa = Self::with_bus(BusArgs::Pci {
            memt,
            iot,
            bus,
            device,
            function,
            vendor,
            product,
        });
        aa.set_locator("dev", Some(device as u64));
        aa.set_locator("function", Some(function as u64));
        aa
    }

    /// 简单设备参数，`addr` 作为定位符
    pub fn simple(
        name: &'static str,
        tag: Option<BusSpaceTag>,
        addr: u64,
        size: usize,
        irq: Option<u32>,
    ) -> Self {
        let mut aa = Self::with_bus(BusArgs::Simple {
            name,
            tag,
            addr,
            size,
            irq,
        });
        aa.set_locator("addr", Some(addr));
        aa
    }

    fn set_locator(&mut self, name: &'static str, value: Option<u64>) {
        let value = value.map_or(Loc::Unspecified, Loc::Value);
        match self.locators.iter_mut().find(|l| l.name == name) {
            Some(l) => l.value = value,
            None => self.locators.push(Locator { name, value }),
        }
    }

    /// 设置（或覆盖）一个定位符
    pub fn with_locator(mut self, name: &'static str, value: u64) -> Self {
        self.set_locator(name, Some(value));
        self
    }

    /// 附带中断控制器
    pub fn with_intc(mut self, intc: Arc<dyn InterruptController>) -> Self {
        self.intc = Some(intc);
        self
    }

    /// 附带 DMA 标签
    pub fn with_dma(mut self, tag: Arc<DmaTag>) -> Self {
        self.dma = Some(tag);
        self
    }

    /// 附带一个扩展值，不认识它的驱动直接忽略
    pub fn with_extra(mut self, key: &'static str, value: u64) -> Self {
        self.extras.insert(key, value);
        self
    }

    /// 全部定位符
    pub fn locators(&self) -> &[Locator] {
        &self.locators
    }

    /// 按名称取确定的定位符值
    pub fn locator(&self, name: &str) -> Option<u64> {
        self.locators
            .iter()
            .find(|l| l.name == name)
            .and_then(|l| l.value.value())
    }

    /// 中断控制器
    pub fn intc(&self) -> Option<&Arc<dyn InterruptController>> {
        self.intc.as_ref()
    }

    /// DMA 标签
    pub fn dma_tag(&self) -> Option<&Arc<DmaTag>> {
        self.dma.as_ref()
    }

    /// 扩展值
    pub fn extra(&self, key: &str) -> Option<u64> {
        self.extras.get(key).copied()
    }

    /// 未配置设备的描述，用于 `not configured` 消息
    pub fn describe(&self) -> String {
        match &self.bus {
            BusArgs::Mainbus { name, .. } | BusArgs::Simple { name, .. } => String::from(*name),
            BusArgs::Isa { .. } => String::from("isa device"),
            BusArgs::Pci {
                vendor, product, ..
            } => format!("vendor {:#06x} product {:#06x}", vendor, product),
        }
    }
}

impl core::fmt::Debug for AttachArgs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AttachArgs")
            .field("version", &self.version)
            .field("bus", &self.bus)
            .field("locators", &self.locators)
            .field("intc", &self.intc.as_ref().map(|i| i.name()))
            .field("dma", &self.dma.as_ref().map(|d| d.name()))
            .finish()
    }
}
