mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use autoconf::{
    Activation, AttachArgs, AttachContext, AttachError, Autoconf, BusArgs, BusSpaceError,
    BusSpaceHandle, CfEntry, DetachError, DetachFlags, Device, DeviceState, Driver,
    InterruptController, IntrCookie, Locator, MapFlags, Softc, extent_is_claimed,
};
use common::{ROOT, intc, mem_tag};
use test_support::mock::events::{
    EV_DEACTIVATE, EV_DETACH, EV_IRQ_DISABLE, EV_SOFTC_DROP, EV_UNMAP, MockEventLog,
};

/// 映射寄存器并建立中断的驱动
///
/// `tidy` 为 true 时在 detach 回调中撤销自己的中断。
struct Uart {
    name: &'static str,
    tidy: bool,
    refuse: bool,
    log: &'static MockEventLog,
}

struct UartSoftc {
    regs: BusSpaceHandle,
    cookie: IntrCookie,
    log: &'static MockEventLog,
}

impl Drop for UartSoftc {
    fn drop(&mut self) {
        self.log.record(EV_SOFTC_DROP, self.cookie.irq());
    }
}

impl Driver for Uart {
    fn name(&self) -> &'static str {
        self.name
    }

    fn match_device(&self, _parent: Option<&Device>, _entry: &CfEntry, aa: &AttachArgs) -> u32 {
        matches!(aa.bus, BusArgs::Simple { .. }) as u32
    }

    fn attach(&self, ctx: &mut AttachContext<'_>, aa: &AttachArgs) -> Result<Softc, AttachError> {
        let BusArgs::Simple { tag: Some(tag), addr, size, irq: Some(irq), .. } = aa.bus else {
            return Err(AttachError::Failed("missing resources"));
        };
        let regs = ctx.map(tag, addr, size, MapFlags::empty())?;
        let intc = aa.intc().ok_or(AttachError::Failed("no interrupt controller"))?;
        let cookie = ctx.intr_establish(intc, irq)?;
        regs.write_1(0, 0x80);
        Ok(Arc::new(UartSoftc {
            regs,
            cookie,
            log: self.log,
        }))
    }

    fn detach(&self, dev: &Device, _flags: DetachFlags) -> Result<(), DetachError> {
        self.log.record(EV_DETACH, dev.unit());
        if self.refuse {
            return Err(DetachError::Refused("in use"));
        }
        if self.tidy {
            let sc = dev.softc::<UartSoftc>().ok_or(DetachError::NotAttached)?;
            assert_eq!(sc.regs.read_1(0), 0x80);
            dev.intr_disestablish(&sc.cookie);
        }
        Ok(())
    }
}

fn root(ac: &Autoconf) -> Arc<Device> {
    ac.config_rootfound("mainbus", AttachArgs::mainbus("mainbus")).unwrap()
}

fn engine(table: &[CfEntry], drivers: &[&'static dyn Driver]) -> Autoconf {
    common::init();
    let ac = Autoconf::new();
    ac.attach_cfdata(table);
    ac.register_driver(&ROOT);
    for d in drivers {
        ac.register_driver(*d);
    }
    ac
}

static UART_LOCS: [Locator; 1] = [Locator::any("addr")];

#[test]
fn test_detach_releases_in_order() {
    static LOG: MockEventLog = MockEventLog::new();
    static UART: Uart = Uart {
        name: "com",
        tidy: true,
        refuse: false,
        log: &LOG,
    };
    static TABLE: [CfEntry; 2] = [
        CfEntry::new("mainbus", "root", &[]),
        CfEntry::new("com", "mainbus", &UART_LOCS),
    ];
    let ac = engine(&TABLE, &[&UART]);
    let root = root(&ac);
    let tag = mem_tag(0x5101, 0x1000_0000, 0x100, Some(&LOG));
    let ic = intc(Some(&LOG));
    let aa = AttachArgs::simple("com", Some(tag), 0x1000_0000, 0x10, Some(4)).with_intc(ic.clone());
    let com = ac.config_found(&root, "mainbus", aa).unwrap();
    assert_eq!(com.mapping_count(), 1);
    assert_eq!(com.intr_count(), 1);
    assert!(ic.is_established(4));

    ac.config_detach(&com, DetachFlags::empty()).unwrap();
    assert!(!ic.is_established(4));
    assert!(!extent_is_claimed(tag.class(), 0x1000_0000, 0x10));
    assert!(com.softc::<UartSoftc>().is_none());
    assert_eq!(com.state(), DeviceState::Detached);
    assert_eq!(root.child_count(), 0);

    let detach = LOG.position(EV_DETACH).unwrap();
    let irq = LOG.position(EV_IRQ_DISABLE).unwrap();
    let unmap = LOG.position(EV_UNMAP).unwrap();
    let drop = LOG.position(EV_SOFTC_DROP).unwrap();
    assert!(detach < irq && irq < unmap && unmap < drop);
    assert_eq!(ac.config_detach(&com, DetachFlags::empty()), Err(DetachError::NotAttached));
}

#[test]
fn test_live_interrupt_blocks_detach_unless_forced() {
    static LOG: MockEventLog = MockEventLog::new();
    static UART: Uart = Uart {
        name: "lpt",
        tidy: false,
        refuse: false,
        log: &LOG,
    };
    static TABLE: [CfEntry; 2] = [
        CfEntry::new("mainbus", "root", &[]),
        CfEntry::new("lpt", "mainbus", &UART_LOCS),
    ];
    let ac = engine(&TABLE, &[&UART]);
    let root = root(&ac);
    let tag = mem_tag(0x5102, 0x2000_0000, 0x100, Some(&LOG));
    let ic = intc(Some(&LOG));
    let aa = AttachArgs::simple("lpt", Some(tag), 0x2000_0000, 0x10, Some(7)).with_intc(ic.clone());
    let lpt = ac.config_found(&root, "mainbus", aa).unwrap();

    assert_eq!(ac.config_detach(&lpt, DetachFlags::empty()), Err(DetachError::Busy));
    assert_eq!(lpt.state(), DeviceState::Attached);
    assert_eq!(lpt.mapping_count(), 1);
    assert!(ic.is_established(7));
    assert_eq!(LOG.count(EV_UNMAP), 0);

    ac.config_detach(&lpt, DetachFlags::FORCE).unwrap();
    assert!(!ic.is_established(7));
    assert!(LOG.position(EV_IRQ_DISABLE).unwrap() < LOG.position(EV_UNMAP).unwrap());
    assert_eq!(lpt.state(), DeviceState::Detached);
}

#[test]
fn test_driver_refusal() {
    static LOG: MockEventLog = MockEventLog::new();
    static UART: Uart = Uart {
        name: "tty",
        tidy: true,
        refuse: true,
        log: &LOG,
    };
    static TABLE: [CfEntry; 2] = [
        CfEntry::new("mainbus", "root", &[]),
        CfEntry::new("tty", "mainbus", &UART_LOCS),
    ];
    let ac = engine(&TABLE, &[&UART]);
    let root = root(&ac);
    let tag = mem_tag(0x5103, 0x3000_0000, 0x100, None);
    let ic = intc(None);
    let aa = AttachArgs::simple("tty", Some(tag), 0x3000_0000, 0x10, Some(3)).with_intc(ic.clone());
    let tty = ac.config_found(&root, "mainbus", aa).unwrap();

    assert_eq!(
        ac.config_detach(&tty, DetachFlags::empty()),
        Err(DetachError::Refused("in use"))
    );
    assert_eq!(tty.state(), DeviceState::Attached);
    ac.config_detach(&tty, DetachFlags::FORCE).unwrap();
    assert!(!ic.is_established(3));
}

/// 在 attach 中配置子设备的总线驱动
struct Bus {
    name: &'static str,
    child_at: &'static str,
}

impl Driver for Bus {
    fn name(&self) -> &'static str {
        self.name
    }

    fn match_device(&self, _parent: Option<&Device>, _entry: &CfEntry, _aa: &AttachArgs) -> u32 {
        1
    }

    fn attach(&self, ctx: &mut AttachContext<'_>, _aa: &AttachArgs) -> Result<Softc, AttachError> {
        ctx.config_search(self.child_at, &|entry: &CfEntry, instance: usize| {
            Some(AttachArgs::simple(entry.driver, None, 0x100 * instance as u64, 0, None))
        });
        Ok(Arc::new(()))
    }
}

/// 记录 deactivate 顺序的叶子驱动
struct Leaf {
    name: &'static str,
    max: u64,
    log: &'static MockEventLog,
}

impl Driver for Leaf {
    fn name(&self) -> &'static str {
        self.name
    }

    fn match_device(&self, _parent: Option<&Device>, _entry: &CfEntry, aa: &AttachArgs) -> u32 {
        aa.locator("addr").is_some_and(|a| a < self.max) as u32
    }

    fn attach(&self, _ctx: &mut AttachContext<'_>, _aa: &AttachArgs) -> Result<Softc, AttachError> {
        Ok(Arc::new(()))
    }

    fn activate(&self, dev: &Device, act: Activation) -> Result<(), DetachError> {
        assert_eq!(act, Activation::Deactivate);
        self.log.record(EV_DEACTIVATE, dev.id() as u32);
        Ok(())
    }
}

#[test]
fn test_children_keep_parent_busy() {
    static LOG: MockEventLog = MockEventLog::new();
    static BUS: Bus = Bus {
        name: "isa",
        child_at: "isa",
    };
    static LEAF: Leaf = Leaf {
        name: "pckbc",
        max: 0x200,
        log: &LOG,
    };
    static LEAF_LOCS: [Locator; 1] = [Locator::any("addr")];
    static TABLE: [CfEntry; 3] = [
        CfEntry::new("mainbus", "root", &[]),
        CfEntry::new("isa", "mainbus", &[]),
        CfEntry::wildcard("pckbc", "isa", &LEAF_LOCS),
    ];
    let ac = engine(&TABLE, &[&BUS, &LEAF]);
    let root = root(&ac);
    ac.config_search(&root, "mainbus", &|_: &CfEntry, _: usize| Some(AttachArgs::mainbus("isa")));
    let isa = ac.find_device("isa0").unwrap();
    assert_eq!(isa.child_count(), 2);
    // 子设备的 attach 消息先于父设备输出
    assert_eq!(
        ac.messages(),
        [
            "mainbus0 (root)",
            "pckbc0 at isa0 addr 0x0",
            "pckbc1 at isa0 addr 0x100",
            "isa0 at mainbus0",
        ]
    );

    assert_eq!(ac.config_detach(&isa, DetachFlags::empty()), Err(DetachError::Busy));
    assert_eq!(isa.state(), DeviceState::Attached);

    let first = isa.children()[0].clone();
    ac.config_detach(&first, DetachFlags::empty()).unwrap();
    assert_eq!(isa.child_count(), 1);

    ac.config_detach(&isa, DetachFlags::RECURSIVE).unwrap();
    assert_eq!(root.child_count(), 0);
    let tail: Vec<String> = ac.messages().into_iter().rev().take(3).collect();
    assert_eq!(tail, ["isa0 detached", "pckbc1 detached", "pckbc0 detached"]);
}

#[test]
fn test_deactivate_is_post_order() {
    static LOG: MockEventLog = MockEventLog::new();
    static BUS: Bus = Bus {
        name: "pcmcia",
        child_at: "pcmcia",
    };
    static LEAF: Leaf = Leaf {
        name: "wi",
        max: 0x100,
        log: &LOG,
    };
    static LEAF_LOCS: [Locator; 1] = [Locator::any("addr")];
    static TABLE: [CfEntry; 3] = [
        CfEntry::new("mainbus", "root", &[]),
        CfEntry::new("pcmcia", "mainbus", &[]),
        CfEntry::wildcard("wi", "pcmcia", &LEAF_LOCS),
    ];
    let ac = engine(&TABLE, &[&BUS, &LEAF]);
    let root = root(&ac);
    ac.config_search(&root, "mainbus", &|_: &CfEntry, _: usize| Some(AttachArgs::mainbus("pcmcia")));
    let slot = ac.find_device("pcmcia0").unwrap();
    let card = ac.find_device("wi0").unwrap();
    assert!(card.is_active());

    ac.config_deactivate(&slot).unwrap();
    assert!(!card.is_active());
    assert!(!slot.is_active());
    assert_eq!(LOG.events(), [(EV_DEACTIVATE, card.id() as u32)]);
    // 停用不会 detach
    assert_eq!(card.state(), DeviceState::Attached);
    ac.config_deactivate(&slot).unwrap();
    assert_eq!(LOG.count(EV_DEACTIVATE), 1);
}

/// attach 到一半失败的驱动
struct Flaky {
    ran: &'static AtomicUsize,
}

impl Driver for Flaky {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn match_device(&self, _parent: Option<&Device>, _entry: &CfEntry, _aa: &AttachArgs) -> u32 {
        1
    }

    fn attach(&self, ctx: &mut AttachContext<'_>, aa: &AttachArgs) -> Result<Softc, AttachError> {
        let BusArgs::Simple { tag: Some(tag), addr, size, irq: Some(irq), .. } = aa.bus else {
            return Err(AttachError::Failed("missing resources"));
        };
        ctx.map(tag, addr, size, MapFlags::empty())?;
        if let Some(intc) = aa.intc() {
            ctx.intr_establish(intc, irq)?;
        }
        let ran = self.ran;
        ctx.defer(move |_| {
            ran.fetch_add(1, Ordering::AcqRel);
        });
        Err(AttachError::Failed("hardware did not respond"))
    }
}

#[test]
fn test_failed_attach_leaves_nothing_behind() {
    static RAN: AtomicUsize = AtomicUsize::new(0);
    static FLAKY: Flaky = Flaky { ran: &RAN };
    static LOCS: [Locator; 1] = [Locator::any("addr")];
    static TABLE: [CfEntry; 2] = [
        CfEntry::new("mainbus", "root", &[]),
        CfEntry::new("flaky", "mainbus", &LOCS),
    ];
    let ac = engine(&TABLE, &[&FLAKY]);
    let root = root(&ac);
    let tag = mem_tag(0x5104, 0x4000_0000, 0x100, None);
    let ic = intc(None);
    let aa = AttachArgs::simple("flaky", Some(tag), 0x4000_0000, 0x20, Some(9)).with_intc(ic.clone());
    assert!(ac.config_found(&root, "mainbus", aa).is_none());

    assert_eq!(root.child_count(), 0);
    assert!(!extent_is_claimed(tag.class(), 0x4000_0000, 0x20));
    assert!(!ic.is_established(9));
    assert_eq!(ac.run_deferred(), 0);
    assert_eq!(RAN.load(Ordering::Acquire), 0);
    assert_eq!(ac.messages(), ["mainbus0 (root)"]);
}

/// 独占一段寄存器窗口的驱动
struct Exclusive {
    name: &'static str,
}

impl Driver for Exclusive {
    fn name(&self) -> &'static str {
        self.name
    }

    fn match_device(&self, _parent: Option<&Device>, _entry: &CfEntry, _aa: &AttachArgs) -> u32 {
        1
    }

    fn attach(&self, ctx: &mut AttachContext<'_>, aa: &AttachArgs) -> Result<Softc, AttachError> {
        let BusArgs::Simple { tag: Some(tag), addr, size, .. } = aa.bus else {
            return Err(AttachError::Failed("missing resources"));
        };
        let regs = ctx.map(tag, addr, size, MapFlags::empty())?;
        Ok(Arc::new(regs))
    }
}

#[test]
fn test_resource_conflict_aborts_only_that_attach() {
    static A: Exclusive = Exclusive { name: "exa" };
    static B: Exclusive = Exclusive { name: "exb" };
    static C: Exclusive = Exclusive { name: "exc" };
    static LOCS_A: [Locator; 1] = [Locator::new("addr", 0x5000_0000)];
    static LOCS_B: [Locator; 1] = [Locator::new("addr", 0x5000_0008)];
    static LOCS_C: [Locator; 1] = [Locator::new("addr", 0x5000_0040)];
    static TABLE: [CfEntry; 4] = [
        CfEntry::new("mainbus", "root", &[]),
        CfEntry::new("exa", "mainbus", &LOCS_A),
        CfEntry::new("exb", "mainbus", &LOCS_B),
        CfEntry::new("exc", "mainbus", &LOCS_C),
    ];
    let ac = engine(&TABLE, &[&A, &B, &C]);
    let root = root(&ac);
    let tag = mem_tag(0x5105, 0x5000_0000, 0x100, None);
    let source = move |entry: &CfEntry, _: usize| {
        let addr = entry.locator("addr")?.value.value()?;
        Some(AttachArgs::simple(entry.driver, Some(tag), addr, 0x10, None))
    };
    // exb 与 exa 的窗口重叠，attach 失败后继续处理 exc
    assert_eq!(ac.config_search(&root, "mainbus", &source), 2);
    let names: Vec<String> = root.children().iter().map(|d| d.xname().to_string()).collect();
    assert_eq!(names, ["exa0", "exc0"]);
    let regs = ac.find_device("exa0").unwrap().softc::<BusSpaceHandle>().unwrap();
    assert!(regs.is_mapped());
    assert_eq!(
        autoconf::bus_space::map(tag, 0x5000_0004, 4, MapFlags::empty()).unwrap_err(),
        BusSpaceError::ResourceConflict
    );

    // 同一描述符项失败后不占用单元号
    let exb = ac.driver_class("exb").unwrap();
    assert_eq!(exb.name(), "exb");
    assert!(ac.device_lookup("exb", 0).is_none());
}

/// 把初始化推迟到配置结束之后的驱动
struct Lazy {
    flag: &'static AtomicBool,
}

impl Driver for Lazy {
    fn name(&self) -> &'static str {
        "mainbus"
    }

    fn match_device(&self, _parent: Option<&Device>, _entry: &CfEntry, _aa: &AttachArgs) -> u32 {
        1
    }

    fn attach(&self, ctx: &mut AttachContext<'_>, _aa: &AttachArgs) -> Result<Softc, AttachError> {
        let flag = self.flag;
        ctx.defer(move |dev| {
            assert_eq!(dev.state(), DeviceState::Attached);
            flag.store(true, Ordering::Release);
        });
        assert!(!flag.load(Ordering::Acquire));
        Ok(Arc::new(()))
    }
}

#[test]
fn test_deferred_work_runs_after_root_configuration() {
    static FLAG: AtomicBool = AtomicBool::new(false);
    static LAZY: Lazy = Lazy { flag: &FLAG };
    static TABLE: [CfEntry; 1] = [CfEntry::new("mainbus", "root", &[])];
    common::init();
    let ac = Autoconf::new();
    ac.attach_cfdata(&TABLE);
    ac.register_driver(&LAZY);
    let root = ac.config_rootfound("mainbus", AttachArgs::mainbus("mainbus")).unwrap();
    assert!(FLAG.load(Ordering::Acquire));
    assert_eq!(ac.run_deferred(), 0);

    // 设备 detach 后，排队的工作被丢弃
    static LATE: AtomicBool = AtomicBool::new(false);
    ac.config_defer(&root, |_| LATE.store(true, Ordering::Release));
    ac.config_detach(&root, DetachFlags::empty()).unwrap();
    assert_eq!(ac.run_deferred(), 0);
    assert!(!LATE.load(Ordering::Acquire));
    assert!(ac.roots().is_empty());
}

/// 声明私有状态大小的驱动
struct Sized16 {
    name: &'static str,
    wide: bool,
}

impl Driver for Sized16 {
    fn name(&self) -> &'static str {
        self.name
    }

    fn softc_size(&self) -> usize {
        16
    }

    fn match_device(&self, _parent: Option<&Device>, _entry: &CfEntry, aa: &AttachArgs) -> u32 {
        matches!(aa.bus, BusArgs::Mainbus { name, .. } if name == self.name) as u32
    }

    fn attach(&self, _ctx: &mut AttachContext<'_>, _aa: &AttachArgs) -> Result<Softc, AttachError> {
        if self.wide {
            Ok(Arc::new([0u64; 2]))
        } else {
            Ok(Arc::new(0u32))
        }
    }
}

#[test]
fn test_softc_size_is_checked() {
    static GOOD: Sized16 = Sized16 {
        name: "sa",
        wide: true,
    };
    static BAD: Sized16 = Sized16 {
        name: "sb",
        wide: false,
    };
    static TABLE: [CfEntry; 3] = [
        CfEntry::new("mainbus", "root", &[]),
        CfEntry::new("sa", "mainbus", &[]),
        CfEntry::new("sb", "mainbus", &[]),
    ];
    let ac = engine(&TABLE, &[&GOOD, &BAD]);
    let root = root(&ac);
    assert_eq!(ac.driver_class("sa").unwrap().softc_size(), 16);

    let sa = ac.config_found(&root, "mainbus", AttachArgs::mainbus("sa")).unwrap();
    assert_eq!(sa.softc::<[u64; 2]>().unwrap()[0], 0);
    assert!(ac.config_found(&root, "mainbus", AttachArgs::mainbus("sb")).is_none());
    assert_eq!(root.child_count(), 1);
    assert!(ac.device_lookup("sb", 0).is_none());
}
