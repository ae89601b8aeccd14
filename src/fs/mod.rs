//! 文件系统高级 API
//!
//! 这个模块提供日志结构闪存文件系统的完整操作接口：挂载、格式化、压缩，
//! 以及基于名字的文件创建、打开、删除、重命名和复制。

mod compact;
mod file_ref;
mod filesystem;
mod io;
mod mount;
mod names;
mod stream;
mod types;

#[cfg(feature = "std")]
mod shared;

pub use filesystem::TinyFileSystem;
pub use stream::FileStream;
pub use types::{
    ClusterUsage, DeviceStats, FileMode, FsConfig, NoHal, SeekFrom, SystemHal, Timestamp,
};

#[cfg(feature = "std")]
pub use shared::{SharedFileSystem, SharedStream};

#[cfg(feature = "std")]
pub use types::StdHal;
