//! 内存模拟闪存
//!
//! 用于测试和主机端仿真。按 NOR 闪存的编程语义工作：
//! 写入只能把比特从 1 清为 0（`stored &= written`），恢复为 0xFF 需要擦除。

use super::BlockDriver;
use crate::consts::MARKER_ERASED;
use crate::error::{Error, ErrorKind, Result};
use alloc::vec;
use alloc::vec::Vec;

/// 内存模拟闪存
#[derive(Debug, Clone)]
pub struct MemFlash {
    storage: Vec<u8>,
    sector_size: u32,
    cluster_size: u16,
    /// 每个扇区的擦除次数（磨损统计）
    erase_counts: Vec<u32>,
    /// 剩余允许的写操作次数，`None` 表示不限
    write_budget: Option<usize>,
    /// 被拒绝的写操作在失败前仍写入的字节数
    torn_bytes: usize,
}

impl MemFlash {
    /// 创建一块全部处于擦除状态的模拟闪存
    ///
    /// 这里不校验几何参数，校验由 `FlashDev` 完成。
    pub fn new(device_size: u32, sector_size: u32, cluster_size: u16) -> Self {
        let sectors = if sector_size == 0 {
            0
        } else {
            (device_size / sector_size) as usize
        };
        Self {
            storage: vec![MARKER_ERASED; device_size as usize],
            sector_size,
            cluster_size,
            erase_counts: vec![0; sectors],
            write_budget: None,
            torn_bytes: 0,
        }
    }

    /// 允许再执行 `writes` 次写操作，之后的写操作全部失败
    ///
    /// 用于模拟写入过程中的掉电。
    pub fn fail_after_writes(&mut self, writes: usize) {
        self.write_budget = Some(writes);
    }

    /// 掉电发生时，第一个失败的写操作仍写入前 `bytes` 个字节
    ///
    /// 与 `fail_after_writes` 配合，模拟写到一半的簇。
    pub fn tear_failed_writes(&mut self, bytes: usize) {
        self.torn_bytes = bytes;
    }

    /// 取消故障注入
    pub fn clear_fault(&mut self) {
        self.write_budget = None;
        self.torn_bytes = 0;
    }

    fn program(&mut self, start: usize, data: &[u8]) {
        for (cell, byte) in self.storage[start..start + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
    }

    /// 每个扇区的擦除次数
    pub fn erase_counts(&self) -> &[u32] {
        &self.erase_counts
    }

    /// 原始存储内容
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    /// 原始存储内容（可变，用于构造损坏场景）
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    fn address(&self, cluster_id: u16, cluster_offset: usize, len: usize) -> Result<usize> {
        let start = cluster_id as usize * self.cluster_size as usize + cluster_offset;
        if start + len > self.storage.len() {
            return Err(Error::new(ErrorKind::OutOfBounds, "Address beyond device end"));
        }
        Ok(start)
    }
}

impl BlockDriver for MemFlash {
    fn device_size(&self) -> u32 {
        self.storage.len() as u32
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn cluster_size(&self) -> u16 {
        self.cluster_size
    }

    fn erase(&mut self) -> Result<()> {
        self.storage.fill(MARKER_ERASED);
        for count in self.erase_counts.iter_mut() {
            *count += 1;
        }
        Ok(())
    }

    fn erase_sector(&mut self, sector_id: u16) -> Result<()> {
        let size = self.sector_size as usize;
        let start = sector_id as usize * size;
        if start + size > self.storage.len() {
            return Err(Error::new(ErrorKind::OutOfBounds, "Sector beyond device end"));
        }
        self.storage[start..start + size].fill(MARKER_ERASED);
        self.erase_counts[sector_id as usize] += 1;
        Ok(())
    }

    fn read(&mut self, cluster_id: u16, cluster_offset: usize, buf: &mut [u8]) -> Result<()> {
        let start = self.address(cluster_id, cluster_offset, buf.len())?;
        buf.copy_from_slice(&self.storage[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, cluster_id: u16, cluster_offset: usize, data: &[u8]) -> Result<()> {
        let start = self.address(cluster_id, cluster_offset, data.len())?;

        if self.write_budget == Some(0) {
            let torn = self.torn_bytes.min(data.len());
            self.torn_bytes = 0;
            self.program(start, &data[..torn]);
            return Err(Error::new(ErrorKind::Io, "Simulated power loss"));
        }
        if let Some(budget) = self.write_budget.as_mut() {
            *budget -= 1;
        }

        self.program(start, data);
        Ok(())
    }
}
