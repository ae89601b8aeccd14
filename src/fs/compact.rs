//! 日志压缩
//!
//! 每次回收一个扇区：把扇区内仍然有效的簇搬到日志尾部（或刚回收的扇区），
//! 擦除后重新写入 FormattedSector 标记。搬移的副本同样先以 Pending
//! 写入再提交，中途掉电时源扇区中的原簇仍然有效。
//!
//! 选择扇区的策略：
//!
//! - 头部扇区有废弃簇时直接回收头部扇区，头部前移
//! - 否则回收废弃簇最多的扇区（不含尾部所在扇区），
//!   再把头部扇区搬进刚回收的扇区，头部前移
//!
//! 这样日志始终保持“头部到尾部连续”的形状。

use crate::{
    block::BlockDriver,
    cluster::{ClusterBuffer, ClusterMarker},
    consts::*,
    error::{Error, Result},
};

use super::{filesystem::TinyFileSystem, types::FsFlags, types::SystemHal};

impl<D: BlockDriver, H: SystemHal> TinyFileSystem<D, H> {
    /// 完整压缩：回收所有废弃簇
    pub fn compact(&mut self) -> Result<()> {
        self.check_state()?;
        log::debug!(
            "[COMPACT] full compaction: orphaned={} free={}",
            self.orphaned_cluster_count,
            self.free_cluster_count
        );

        self.flags.insert(FsFlags::COMPACTING);
        let result = self.compact_while(|fs| fs.orphaned_cluster_count > 0);
        self.flags.remove(FsFlags::COMPACTING);

        log::info!(
            "[COMPACT] done: orphaned={} free={} head_sector={}",
            self.orphaned_cluster_count,
            self.free_cluster_count,
            self.head_sector_id
        );
        result
    }

    /// 部分压缩：空闲簇低于保留阈值、且至少有一个扇区的废弃簇可回收时运行
    pub(super) fn partial_compact(&mut self) -> Result<()> {
        let per_sector = self.geo.clusters_per_sector as u32;
        self.flags.insert(FsFlags::COMPACTING);
        let result = self.compact_while(|fs| {
            fs.free_cluster_count <= fs.min_free_clusters && fs.orphaned_cluster_count >= per_sector
        });
        self.flags.remove(FsFlags::COMPACTING);
        result
    }

    fn compact_while(&mut self, mut more: impl FnMut(&Self) -> bool) -> Result<()> {
        // 每轮至少前移头部一个扇区，两圈仍未完成说明剩余的废弃簇无法回收
        let mut rounds = 2 * self.geo.total_sector_count as u32;
        while more(self) {
            if rounds == 0 {
                log::warn!(
                    "[COMPACT] giving up with {} orphaned clusters",
                    self.orphaned_cluster_count
                );
                break;
            }
            rounds -= 1;

            if !self.compact_step()? {
                break;
            }
        }
        Ok(())
    }

    fn compact_step(&mut self) -> Result<bool> {
        let sector_id = self.sector_to_compact();

        if !self.migrate_sector(sector_id, None)? {
            return Ok(false);
        }

        if sector_id != self.head_sector_id {
            let target = self.geo.first_cluster_of(sector_id);
            if !self.migrate_sector(self.head_sector_id, Some(target))? {
                return Ok(false);
            }
        }

        self.head_sector_id = self.geo.next_sector(self.head_sector_id);
        Ok(true)
    }

    /// 选择要回收的扇区
    pub(super) fn sector_to_compact(&self) -> u16 {
        let head = self.head_sector_id;
        if self.orphaned_per_sector[head as usize] > 0 {
            return head;
        }

        let tail_sector = self.geo.sector_of(self.tail_cluster_id);
        let mut best = head;
        let mut best_count = 0;
        for (sector_id, &count) in self.orphaned_per_sector.iter().enumerate() {
            let sector_id = sector_id as u16;
            if sector_id != tail_sector && count > best_count {
                best = sector_id;
                best_count = count;
            }
        }
        best
    }

    /// 把扇区内的有效簇搬走并擦除该扇区
    ///
    /// `target` 为 `None` 时搬到日志尾部，并推进尾部。
    /// 目标位于被回收的扇区内时无法搬移，返回 `false`。
    fn migrate_sector(&mut self, sector_id: u16, target: Option<u16>) -> Result<bool> {
        let to_tail = target.is_none();
        let mut to = target.unwrap_or(self.tail_cluster_id);

        if self.geo.sector_of(to) == sector_id {
            if !to_tail || !self.skip_tail_past(sector_id)? {
                log::debug!("[COMPACT] cannot migrate sector {} into itself", sector_id);
                return Ok(false);
            }
            to = self.tail_cluster_id;
        }

        let first = self.geo.first_cluster_of(sector_id);
        let data_max = self.defrag.data_cluster_max_data_length();
        let file_max = self.defrag.file_cluster_max_data_length();
        let mut freed = 0u32;
        let mut stale = 0u32;
        let mut moved = 0u32;

        for cluster_id in first..first + self.geo.clusters_per_sector {
            self.defrag.clear();
            self.dev
                .read(cluster_id, 0, &mut self.defrag.as_bytes_mut()[..COMMON_HEADER_SIZE])?;

            match self.defrag.marker() {
                Some(ClusterMarker::Allocated) => {}
                Some(m) if m.is_available() => continue,
                _ => {
                    freed += 1;
                    continue;
                }
            }

            let obj_id = self.defrag.obj_id();
            let block_id = self.defrag.block_id() as usize;
            let is_owned = self
                .files
                .get(&obj_id)
                .and_then(|f| f.blocks.get(block_id))
                == Some(cluster_id);
            if !is_owned {
                // 不属于任何文件的已提交簇，擦除即可回收
                log::warn!(
                    "[COMPACT] stale cluster {} objId={} block={}",
                    cluster_id,
                    obj_id,
                    block_id
                );
                stale += 1;
                continue;
            }

            let header = ClusterBuffer::data_offset(block_id == 0);
            let max = if block_id == 0 { file_max } else { data_max };
            let len = header + (self.defrag.data_length() as usize).min(max);
            self.dev.read(
                cluster_id,
                COMMON_HEADER_SIZE,
                &mut self.defrag.as_bytes_mut()[COMMON_HEADER_SIZE..len],
            )?;

            if to_tail {
                let marker = self.dev.read_marker(to)?;
                if !ClusterMarker::from_byte(marker).is_some_and(ClusterMarker::is_available) {
                    log::warn!("[COMPACT] destination cluster {} not writable", to);
                    self.tail_cluster_id = to;
                    return Err(Error::disk_full());
                }
            }

            // 与写时复制相同：先以 Pending 写入，数据完整后再提交
            self.defrag.set_marker(ClusterMarker::Pending);
            self.dev.write(to, 0, &self.defrag.as_bytes()[..len])?;
            self.dev.write_marker(to, MARKER_ALLOCATED)?;
            if let Some(file) = self.files.get_mut(&obj_id) {
                file.blocks.set(block_id, to);
            }
            log::trace!("[COMPACT] move cluster {} -> {}", cluster_id, to);

            to = self.geo.next_cluster(to);
            moved += 1;
        }

        if to_tail {
            self.tail_cluster_id = to;
        }

        self.dev.erase_sector(sector_id)?;
        self.dev.write_marker(first, MARKER_FORMATTED_SECTOR)?;
        self.orphaned_per_sector[sector_id as usize] = 0;
        self.free_cluster_count += freed + stale;
        self.orphaned_cluster_count = self.orphaned_cluster_count.saturating_sub(freed);

        log::debug!(
            "[COMPACT] sector {} reclaimed: moved={} freed={} stale={}",
            sector_id,
            moved,
            freed,
            stale
        );
        Ok(true)
    }

    /// 尾部位于待回收扇区内时，把尾部移到下一个已格式化扇区的开头
    fn skip_tail_past(&mut self, sector_id: u16) -> Result<bool> {
        let next_first = self.geo.first_cluster_of(self.geo.next_sector(sector_id));
        let marker = self.dev.read_marker(next_first)?;
        if !ClusterMarker::from_byte(marker).is_some_and(ClusterMarker::is_available) {
            return Ok(false);
        }

        log::debug!(
            "[COMPACT] tail {} skips to cluster {}",
            self.tail_cluster_id,
            next_first
        );
        self.tail_cluster_id = next_first;
        Ok(true)
    }
}
