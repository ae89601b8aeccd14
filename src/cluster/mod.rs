//! 簇编解码
//!
//! 簇是分配与 I/O 的原子单位。这个模块负责簇在设备上的二进制布局，
//! 不做任何 I/O。
//!
//! # 主要组件
//!
//! - [`ClusterMarker`] - 簇生命周期标记
//! - [`ClusterBuffer`] - 可复用的簇缓冲区，带写入范围记录

mod buffer;
mod marker;

pub use buffer::{decode_file_name, ClusterBuffer};
pub use marker::ClusterMarker;
