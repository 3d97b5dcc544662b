//! 测试支持 crate
//!
//! 提供自动配置框架单元测试使用的 Mock 实现：架构操作、地址转换、
//! 端口 I/O 寄存器文件、中断控制器和事件记录器。
//!
//! 这里不依赖被测 crate，具体 trait 由被测 crate 在 `cfg(test)` 下为 Mock 类型实现。

#![no_std]

extern crate alloc;

pub mod mock;
