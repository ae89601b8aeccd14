//! 文件系统公共类型定义

use crate::consts::*;
use bitflags::bitflags;
use core::fmt;
use core::time::Duration;

/// 系统硬件抽象层 trait
///
/// 提供文件系统所需的系统级功能，主要是时间戳支持
pub trait SystemHal {
    /// 获取当前系统时间
    ///
    /// # 返回
    ///
    /// - `Some(Duration)` - 当前时间（从 UNIX 纪元开始）
    /// - `None` - 时间不可用（例如在没有RTC的嵌入式系统中）
    ///
    /// # 示例
    ///
    /// ```ignore
    /// struct MyHal;
    /// impl SystemHal for MyHal {
    ///     fn now() -> Option<Duration> {
    ///         Some(Duration::from_secs(rtc_unix_seconds()))
    ///     }
    /// }
    /// ```
    fn now() -> Option<Duration>;
}

/// 无时钟实现，创建时间记为 tick 0
pub struct NoHal;

impl SystemHal for NoHal {
    fn now() -> Option<Duration> {
        None
    }
}

/// 基于 `std::time::SystemTime` 的时钟
#[cfg(feature = "std")]
pub struct StdHal;

#[cfg(feature = "std")]
impl SystemHal for StdHal {
    fn now() -> Option<Duration> {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
    }
}

/// 文件创建时间
///
/// 以 0001-01-01 为纪元、100ns 为单位的 64 位 tick 计数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// 从 tick 计数创建
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// tick 计数
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// 从 UNIX 纪元起的时长创建
    pub fn from_unix_duration(since_epoch: Duration) -> Self {
        let ticks = since_epoch.as_secs() * TICKS_PER_SECOND
            + since_epoch.subsec_nanos() as u64 / 100;
        Self(UNIX_EPOCH_TICKS + ticks)
    }

    /// 转换为从 UNIX 纪元起的时长，早于纪元时返回 `None`
    pub fn to_unix_duration(self) -> Option<Duration> {
        let ticks = self.0.checked_sub(UNIX_EPOCH_TICKS)?;
        Some(Duration::new(
            ticks / TICKS_PER_SECOND,
            ((ticks % TICKS_PER_SECOND) * 100) as u32,
        ))
    }

    /// 通过 `SystemHal` 获取当前时间
    pub fn now<H: SystemHal>() -> Self {
        H::now().map(Self::from_unix_duration).unwrap_or_default()
    }
}

/// 文件系统配置
#[derive(Debug, Clone, Copy)]
pub struct FsConfig {
    /// 为压缩保留的空闲扇区数
    pub reserved_sectors: u16,
    /// 文件名缓存容量（条目数）
    pub name_cache_size: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            reserved_sectors: DEFAULT_RESERVED_SECTORS,
            name_cache_size: DEFAULT_NAME_CACHE_SIZE,
        }
    }
}

/// 设备统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStats {
    /// 空闲字节数（按空闲簇计）
    ///
    /// 不包含已分配簇中未使用的空间，也不包含被废弃簇占用的空间。
    pub bytes_free: u32,
    /// 被废弃簇占用的字节数，压缩后归还空闲池
    pub bytes_orphaned: u32,
}

impl fmt::Display for DeviceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bytes Free: {}\r\nBytes Orphaned: {}",
            self.bytes_free, self.bytes_orphaned
        )
    }
}

/// 簇使用情况
///
/// `free + orphaned + live == total`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClusterUsage {
    /// 空闲簇
    pub free: u32,
    /// 废弃簇
    pub orphaned: u32,
    /// 文件正在使用的簇
    pub live: u32,
    /// 簇总数
    pub total: u32,
}

/// 文件打开模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// 创建新文件，已存在则失败
    CreateNew,
    /// 创建文件，已存在则截断
    Create,
    /// 打开已有文件
    Open,
    /// 打开文件，不存在则创建
    OpenOrCreate,
    /// 打开已有文件并截断为 0
    Truncate,
    /// 打开或创建文件，并定位到末尾
    Append,
}

/// 定位起点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    /// 相对文件开头
    Start(u64),
    /// 相对文件末尾
    End(i64),
    /// 相对当前位置
    Current(i64),
}

bitflags! {
    /// 文件系统状态标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FsFlags: u8 {
        /// 已挂载
        const MOUNTED    = 0x01;
        /// 正在压缩
        const COMPACTING = 0x02;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_unix_conversion() {
        let ts = Timestamp::from_unix_duration(Duration::new(1_700_000_000, 500));
        assert_eq!(
            ts.ticks(),
            UNIX_EPOCH_TICKS + 1_700_000_000 * TICKS_PER_SECOND + 5
        );
        assert_eq!(
            ts.to_unix_duration(),
            Some(Duration::new(1_700_000_000, 500))
        );
        assert_eq!(Timestamp::from_ticks(0).to_unix_duration(), None);
    }

    #[test]
    fn test_no_hal_timestamp() {
        assert_eq!(Timestamp::now::<NoHal>(), Timestamp::default());
    }

    #[test]
    fn test_fs_config_default() {
        let config = FsConfig::default();
        assert_eq!(config.reserved_sectors, 2);
        assert_eq!(config.name_cache_size, 16);
    }

    #[test]
    fn test_device_stats_display() {
        let stats = DeviceStats {
            bytes_free: 1024,
            bytes_orphaned: 256,
        };
        assert_eq!(
            alloc::format!("{}", stats),
            "Bytes Free: 1024\r\nBytes Orphaned: 256"
        );
    }
}
