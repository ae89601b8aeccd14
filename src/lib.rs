//! tinyfs_core: 面向 NOR 闪存的日志结构文件系统
//!
//! 这是一个纯 Rust 实现的小型闪存文件系统，旨在提供：
//! - **追加写入**：所有修改都以写时复制方式写入环形日志，掉电不丢已提交数据
//! - **磨损均衡**：扇区按日志顺序轮流擦除
//! - **no_std 支持**：只依赖 `alloc`
//! - **可插拔驱动**：通过 [`BlockDriver`] trait 接入任意闪存
//!
//! # 示例
//!
//! ```rust,ignore
//! use tinyfs_core::{BlockDriver, FileMode, TinyFileSystem, Result};
//!
//! fn run<D: BlockDriver>(driver: D) -> Result<()> {
//!     let mut fs = TinyFileSystem::new(driver)?;
//!     if fs.check_if_formatted()? {
//!         fs.mount()?;
//!     } else {
//!         fs.format()?;
//!     }
//!
//!     let mut file = fs.open("CONFIG.INI", FileMode::OpenOrCreate)?;
//!     file.write(&mut fs, b"[net]\n")?;
//!     file.close(&mut fs)?;
//!
//!     println!("{}", fs.get_stats()?);
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块驱动抽象和 I/O 统计
//! - [`consts`] - 磁盘布局常量
//! - [`cluster`] - 簇编解码
//! - [`fs`] - 文件系统高级 API

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块驱动抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 簇编解码
pub mod cluster;

/// 文件系统高级 API
pub mod fs;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块驱动
pub use block::{BlockDriver, FlashDev, Geometry, IoStats};

#[cfg(any(test, feature = "mem"))]
pub use block::MemFlash;

// 簇
pub use cluster::{ClusterBuffer, ClusterMarker};

// FileSystem
pub use fs::{
    ClusterUsage, DeviceStats, FileMode, FileStream, FsConfig, NoHal, SeekFrom, SystemHal,
    Timestamp, TinyFileSystem,
};

#[cfg(feature = "std")]
pub use fs::{SharedFileSystem, SharedStream, StdHal};
