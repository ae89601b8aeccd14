//! 块驱动抽象
//!
//! 提供块驱动接口和簇级 I/O 操作。
//! block/device.rs 定义驱动 trait 以及带边界检查与统计的包装器 `FlashDev`。
//! block/mem.rs 提供按 NOR 语义工作的内存模拟闪存，用于测试和主机端仿真。

mod device;
#[cfg(any(test, feature = "mem"))]
mod mem;

pub use device::{BlockDriver, FlashDev, Geometry, IoStats};
#[cfg(any(test, feature = "mem"))]
pub use mem::MemFlash;
