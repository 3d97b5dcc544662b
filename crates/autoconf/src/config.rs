//! 编译期配置常量

/// 通配描述符项连续多少次匹配失败后停止探测
pub const WILDCARD_MISS_LIMIT: usize = 2;

/// 通配描述符项最多探测的实例数，防止失控的探测循环
pub const MAX_WILDCARD_INSTANCES: usize = 256;

/// 每个驱动类最多分配的单元号数量
pub const MAX_UNITS_PER_CLASS: u32 = 1024;

/// 当前 [`AttachArgs`](crate::AttachArgs) 布局版本
///
/// 新增资源字段时递增，旧驱动忽略不认识的字段即可。
pub const ATTACH_ARGS_VERSION: u32 = 1;

/// DMA 标签默认的最大段数
pub const DEFAULT_MAX_SEGMENTS: usize = 16;

/// DMA 标签默认的单段最大长度
pub const DEFAULT_MAX_SEGMENT_SIZE: usize = 64 * 1024;

/// 回弹缓冲区的分配粒度（平台未给出页大小时使用）
pub const BOUNCE_PAGE_SIZE: usize = 4096;

/// 引导消息缓冲区保留的行数
pub const MESSAGE_BUFFER_LINES: usize = 512;

/// 根设备所在的挂接点名
pub const ROOT_ATTACH_POINT: &str = "root";
