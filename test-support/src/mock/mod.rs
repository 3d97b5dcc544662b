//! Mock 实现模块
//!
//! 提供各种架构和子系统的 Mock 实现，用于测试

pub mod arch;
pub mod bus;
pub mod device;
pub mod events;
pub mod mm;
