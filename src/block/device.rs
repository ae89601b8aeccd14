//! 块驱动核心类型

use crate::consts::FILE_CLUSTER_HEADER_SIZE;
use crate::error::{Error, ErrorKind, Result};

/// 块驱动接口
///
/// 实现此 trait 以提供底层闪存访问。文件系统只通过这组原语访问设备，
/// 并保证任何读写都不会跨越簇边界。
///
/// # 示例
///
/// ```rust,ignore
/// use tinyfs_core::{BlockDriver, Result};
///
/// struct SpiFlash {
///     // ...
/// }
///
/// impl BlockDriver for SpiFlash {
///     fn device_size(&self) -> u32 {
///         4 * 1024 * 1024
///     }
///
///     fn sector_size(&self) -> u32 {
///         4096
///     }
///
///     fn cluster_size(&self) -> u16 {
///         4 * 256 // 4 个 256 字节页
///     }
///
///     fn erase(&mut self) -> Result<()> {
///         // 整片擦除
///         Ok(())
///     }
///
///     fn erase_sector(&mut self, sector_id: u16) -> Result<()> {
///         // 擦除单个扇区
///         Ok(())
///     }
///
///     fn read(&mut self, cluster_id: u16, cluster_offset: usize, buf: &mut [u8]) -> Result<()> {
///         // 地址 = cluster_id * cluster_size + cluster_offset
///         Ok(())
///     }
///
///     fn write(&mut self, cluster_id: u16, cluster_offset: usize, data: &[u8]) -> Result<()> {
///         // 页编程
///         Ok(())
///     }
/// }
/// ```
pub trait BlockDriver {
    /// 设备总容量（字节）
    fn device_size(&self) -> u32;

    /// 擦除扇区大小（字节）
    fn sector_size(&self) -> u32;

    /// 簇大小（字节）
    ///
    /// 必须是闪存页大小的整数倍。例如页大小为 256 字节的设备，
    /// 簇大小可以是 256、512、768、1024...
    fn cluster_size(&self) -> u16;

    /// 擦除整个设备
    fn erase(&mut self) -> Result<()>;

    /// 擦除一个扇区
    fn erase_sector(&mut self, sector_id: u16) -> Result<()>;

    /// 从簇中读取数据
    ///
    /// # 参数
    ///
    /// * `cluster_id` - 要读取的簇
    /// * `cluster_offset` - 簇内起始偏移
    /// * `buf` - 目标缓冲区，读取 `buf.len()` 字节
    fn read(&mut self, cluster_id: u16, cluster_offset: usize, buf: &mut [u8]) -> Result<()>;

    /// 向簇写入数据
    ///
    /// # 参数
    ///
    /// * `cluster_id` - 要写入的簇
    /// * `cluster_offset` - 簇内起始偏移
    /// * `data` - 源数据，写入 `data.len()` 字节
    fn write(&mut self, cluster_id: u16, cluster_offset: usize, data: &[u8]) -> Result<()>;
}

/// 设备几何参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// 簇大小（字节）
    pub cluster_size: u16,
    /// 扇区大小（字节）
    pub sector_size: u32,
    /// 扇区总数
    pub total_sector_count: u16,
    /// 每扇区簇数
    pub clusters_per_sector: u16,
    /// 簇总数
    pub total_cluster_count: u16,
}

impl Geometry {
    /// 根据驱动报告的参数计算并校验几何参数
    pub fn from_driver<D: BlockDriver>(driver: &D) -> Result<Self> {
        let device_size = driver.device_size();
        let sector_size = driver.sector_size();
        let cluster_size = driver.cluster_size();

        if (cluster_size as usize) <= FILE_CLUSTER_HEADER_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Cluster size too small for file cluster header",
            ));
        }

        if sector_size == 0 || sector_size % cluster_size as u32 != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Sector size must be a multiple of cluster size",
            ));
        }

        if device_size % sector_size != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Device size must be a multiple of sector size",
            ));
        }

        let total_clusters = device_size / cluster_size as u32;
        if total_clusters > u16::MAX as u32 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Device has more clusters than a cluster id can address",
            ));
        }

        let total_sectors = device_size / sector_size;
        if total_sectors < 2 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Device must have at least two sectors",
            ));
        }

        Ok(Self {
            cluster_size,
            sector_size,
            total_sector_count: total_sectors as u16,
            clusters_per_sector: (sector_size / cluster_size as u32) as u16,
            total_cluster_count: total_clusters as u16,
        })
    }

    /// 扇区的第一个簇
    #[inline]
    pub fn first_cluster_of(&self, sector_id: u16) -> u16 {
        sector_id * self.clusters_per_sector
    }

    /// 簇所在扇区
    #[inline]
    pub fn sector_of(&self, cluster_id: u16) -> u16 {
        cluster_id / self.clusters_per_sector
    }

    /// 是否是扇区的第一个簇
    #[inline]
    pub fn is_first_cluster_of_sector(&self, cluster_id: u16) -> bool {
        cluster_id % self.clusters_per_sector == 0
    }

    /// 下一个簇（环形回绕）
    #[inline]
    pub fn next_cluster(&self, cluster_id: u16) -> u16 {
        ((cluster_id as u32 + 1) % self.total_cluster_count as u32) as u16
    }

    /// 下一个扇区（环形回绕）
    #[inline]
    pub fn next_sector(&self, sector_id: u16) -> u16 {
        ((sector_id as u32 + 1) % self.total_sector_count as u32) as u16
    }
}

/// I/O 统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    /// 读操作次数
    pub reads: u64,
    /// 读取字节数
    pub read_bytes: u64,
    /// 写操作次数
    pub writes: u64,
    /// 写入字节数
    pub write_bytes: u64,
    /// 扇区擦除次数
    pub sector_erases: u64,
    /// 整片擦除次数
    pub chip_erases: u64,
}

/// 块驱动包装器
///
/// 在驱动之上提供几何校验、簇边界检查和统计信息。
///
/// # 并发使用
///
/// FlashDev 本身不包含内部锁，由文件系统独占持有；
/// 多线程环境请使用 `SharedFileSystem`。
pub struct FlashDev<D> {
    /// 底层驱动
    driver: D,
    /// 几何参数
    geometry: Geometry,
    /// 统计信息
    stats: IoStats,
}

impl<D: BlockDriver> FlashDev<D> {
    /// 创建新的驱动包装器
    pub fn new(driver: D) -> Result<Self> {
        let geometry = Geometry::from_driver(&driver)?;

        Ok(Self {
            driver,
            geometry,
            stats: IoStats::default(),
        })
    }

    /// 获取底层驱动的引用
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// 获取底层驱动的可变引用
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// 释放底层驱动
    pub fn into_driver(self) -> D {
        self.driver
    }

    /// 获取几何参数
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// 获取统计信息
    pub fn stats(&self) -> IoStats {
        self.stats
    }

    fn check_range(&self, cluster_id: u16, cluster_offset: usize, len: usize) -> Result<()> {
        if cluster_id >= self.geometry.total_cluster_count {
            return Err(Error::new(ErrorKind::OutOfBounds, "Cluster id out of range"));
        }
        if cluster_offset + len > self.geometry.cluster_size as usize {
            return Err(Error::new(
                ErrorKind::OutOfBounds,
                "Access straddles cluster boundary",
            ));
        }
        Ok(())
    }

    /// 读取簇内数据
    pub fn read(&mut self, cluster_id: u16, cluster_offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_range(cluster_id, cluster_offset, buf.len())?;
        self.stats.reads += 1;
        self.stats.read_bytes += buf.len() as u64;
        self.driver.read(cluster_id, cluster_offset, buf)
    }

    /// 写入簇内数据
    pub fn write(&mut self, cluster_id: u16, cluster_offset: usize, data: &[u8]) -> Result<()> {
        self.check_range(cluster_id, cluster_offset, data.len())?;
        self.stats.writes += 1;
        self.stats.write_bytes += data.len() as u64;
        self.driver.write(cluster_id, cluster_offset, data)
    }

    /// 读取簇的标记字节
    pub fn read_marker(&mut self, cluster_id: u16) -> Result<u8> {
        let mut marker = [0u8; 1];
        self.read(cluster_id, 0, &mut marker)?;
        Ok(marker[0])
    }

    /// 写入簇的标记字节
    pub fn write_marker(&mut self, cluster_id: u16, marker: u8) -> Result<()> {
        self.write(cluster_id, 0, &[marker])
    }

    /// 擦除扇区
    pub fn erase_sector(&mut self, sector_id: u16) -> Result<()> {
        if sector_id >= self.geometry.total_sector_count {
            return Err(Error::new(ErrorKind::OutOfBounds, "Sector id out of range"));
        }
        self.stats.sector_erases += 1;
        self.driver.erase_sector(sector_id)
    }

    /// 擦除整个设备
    pub fn erase(&mut self) -> Result<()> {
        self.stats.chip_erases += 1;
        self.driver.erase()
    }
}
