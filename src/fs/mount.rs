//! 挂载、格式化与格式检查
//!
//! 挂载时线性扫描所有簇，重建内存中的文件索引和空间计数：
//!
//! - 日志头部是“空洞之后的第一个数据簇”，尾部是“数据之后的第一个空闲簇”
//! - 每个 Allocated 簇按 objId 归入文件
//! - Pending 与 Orphaned 簇计为废弃
//! - 扇区第一个簇为 FormattedSector 时整个扇区计为空闲

use crate::{
    block::BlockDriver,
    cluster::ClusterMarker,
    consts::*,
    error::{Error, Result},
};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

use super::{file_ref::FileRef, filesystem::TinyFileSystem, types::FsFlags, types::SystemHal};

/// 扫描到的已提交簇
#[derive(Debug, Clone, Copy)]
struct ScannedBlock {
    block_id: u16,
    cluster_id: u16,
    data_length: u16,
}

impl<D: BlockDriver, H: SystemHal> TinyFileSystem<D, H> {
    /// 检查设备是否已格式化
    ///
    /// 只检查每个扇区第一个簇的标记：任一标记无法识别，或全部扇区都是
    /// 已擦除状态时返回 `false`。
    pub fn check_if_formatted(&mut self) -> Result<bool> {
        let mut all_erased = true;
        for sector_id in 0..self.geo.total_sector_count {
            let marker = self.dev.read_marker(self.geo.first_cluster_of(sector_id))?;
            match ClusterMarker::from_byte(marker) {
                None => return Ok(false),
                Some(ClusterMarker::Erased) => {}
                Some(_) => all_erased = false,
            }
        }
        Ok(!all_erased)
    }

    /// 挂载文件系统
    ///
    /// 已挂载时直接返回。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::NotFormatted` - 扇区标记无法识别、簇头部字段越界，或设备从未格式化
    /// - `ErrorKind::Io` - 设备读写失败
    pub fn mount(&mut self) -> Result<()> {
        if self.is_mounted() {
            return Ok(());
        }

        match self.scan() {
            Ok(()) => {
                self.flags.insert(FsFlags::MOUNTED);
                log::info!(
                    "[MOUNT] mounted: files={} head_sector={} tail={} free={} orphaned={}",
                    self.files.len(),
                    self.head_sector_id,
                    self.tail_cluster_id,
                    self.free_cluster_count,
                    self.orphaned_cluster_count
                );
                Ok(())
            }
            Err(e) => {
                log::warn!("[MOUNT] mount failed: {}", e);
                self.reset_state();
                Err(e)
            }
        }
    }

    /// 格式化设备
    ///
    /// 擦除整个设备，在每个扇区的第一个簇写入 FormattedSector 标记，
    /// 完成后处于挂载状态。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::FileInUse` - 仍有打开的文件
    pub fn format(&mut self) -> Result<()> {
        if self.files.values().any(|f| f.is_open()) {
            return Err(Error::file_in_use());
        }

        self.flags.remove(FsFlags::MOUNTED);
        self.reset_state();

        self.dev.erase()?;
        for sector_id in 0..self.geo.total_sector_count {
            let first = self.geo.first_cluster_of(sector_id);
            self.dev.write_marker(first, MARKER_FORMATTED_SECTOR)?;
        }

        self.free_cluster_count = self.geo.total_cluster_count as u32;
        self.flags.insert(FsFlags::MOUNTED);

        log::info!(
            "[FORMAT] formatted {} sectors, {} clusters free",
            self.geo.total_sector_count,
            self.free_cluster_count
        );
        Ok(())
    }

    fn reset_state(&mut self) {
        self.files.clear();
        self.names.clear();
        self.last_obj_id = 0;
        self.head_sector_id = 0;
        self.tail_cluster_id = 0;
        self.free_cluster_count = 0;
        self.orphaned_cluster_count = 0;
        self.orphaned_per_sector.fill(0);
    }

    fn scan(&mut self) -> Result<()> {
        self.reset_state();

        let total = self.geo.total_cluster_count as u32;
        let per_sector = self.geo.clusters_per_sector as u32;
        let file_max = self.cluster.file_cluster_max_data_length();
        let data_max = self.cluster.data_cluster_max_data_length();

        let mut head: Option<u16> = None;
        let mut tail: Option<u16> = None;
        let mut found_hole = false;
        let mut found_data = false;
        let mut all_erased = true;

        let mut scanned: BTreeMap<u16, Vec<ScannedBlock>> = BTreeMap::new();
        let mut header = [0u8; COMMON_HEADER_SIZE];

        let mut index: u32 = 0;
        while index < total {
            let cluster_id = index as u16;
            self.dev.read(cluster_id, 0, &mut header)?;
            let marker = ClusterMarker::from_byte(header[MARKER_OFFSET]);
            let first_of_sector = self.geo.is_first_cluster_of_sector(cluster_id);

            if first_of_sector {
                match marker {
                    None => {
                        log::warn!(
                            "[MOUNT] sector {} has unknown marker {:#04x}",
                            self.geo.sector_of(cluster_id),
                            header[MARKER_OFFSET]
                        );
                        return Err(Error::not_formatted());
                    }
                    Some(ClusterMarker::Erased) => {}
                    Some(_) => all_erased = false,
                }
            }

            let available = marker.is_some_and(ClusterMarker::is_available);
            if available {
                found_hole = true;
                if tail.is_none() || found_data {
                    tail = Some(cluster_id);
                    found_data = false;
                }
            } else {
                if head.is_none() || found_hole {
                    head = Some(cluster_id);
                    found_hole = false;
                }
                found_data = true;
            }

            match marker {
                Some(ClusterMarker::Allocated) => {
                    let obj_id = LittleEndian::read_u16(&header[OBJ_ID_OFFSET..]);
                    let block_id = LittleEndian::read_u16(&header[BLOCK_ID_OFFSET..]);
                    let data_length = LittleEndian::read_u16(&header[DATA_LENGTH_OFFSET..]);
                    let max = if block_id == 0 { file_max } else { data_max };

                    if obj_id == 0 || block_id as u32 >= total || data_length as usize > max {
                        log::warn!(
                            "[MOUNT] invalid header at cluster {}: objId={} block={} len={}",
                            cluster_id,
                            obj_id,
                            block_id,
                            data_length
                        );
                        return Err(Error::not_formatted());
                    }

                    self.last_obj_id = self.last_obj_id.max(obj_id);
                    scanned.entry(obj_id).or_default().push(ScannedBlock {
                        block_id,
                        cluster_id,
                        data_length,
                    });
                }
                Some(ClusterMarker::FormattedSector) if first_of_sector => {
                    // 已格式化扇区的其余簇都未写入
                    self.free_cluster_count += per_sector;
                    index += per_sector;
                    continue;
                }
                Some(m) if m.is_available() => {
                    self.free_cluster_count += 1;
                }
                _ => {
                    if !marker.is_some_and(ClusterMarker::is_orphaned) {
                        log::warn!(
                            "[MOUNT] cluster {} has unknown marker {:#04x}, treated as orphaned",
                            cluster_id,
                            header[MARKER_OFFSET]
                        );
                    }
                    self.orphaned_cluster_count += 1;
                    let sector = self.geo.sector_of(cluster_id) as usize;
                    self.orphaned_per_sector[sector] += 1;
                }
            }

            index += 1;
        }

        if all_erased {
            return Err(Error::not_formatted());
        }

        self.head_sector_id = head.map(|c| self.geo.sector_of(c)).unwrap_or(0);
        self.tail_cluster_id = tail.unwrap_or(0);

        for (obj_id, blocks) in scanned {
            self.rebuild_file(obj_id, blocks)?;
        }

        Ok(())
    }

    /// 簇与日志尾部的距离，越小越新
    fn log_age(&self, cluster_id: u16) -> u32 {
        let total = self.geo.total_cluster_count as u32;
        (self.tail_cluster_id as u32 + total - cluster_id as u32) % total
    }

    /// 由扫描结果重建单个文件
    ///
    /// 同一块有多个副本时保留最新的一个；缺少块 0 的文件整体丢弃；
    /// 块号出现空缺时在空缺处截断。被丢弃的簇都标记为废弃。
    fn rebuild_file(&mut self, obj_id: u16, mut blocks: Vec<ScannedBlock>) -> Result<()> {
        blocks.sort_by_key(|b| (b.block_id, self.log_age(b.cluster_id)));

        let mut file = FileRef::new(obj_id);
        let mut discarded = Vec::new();

        for block in blocks {
            let expected = file.blocks.len();
            if (block.block_id as usize) < expected {
                // 同一块的旧副本
                discarded.push(block.cluster_id);
            } else if block.block_id as usize == expected {
                file.blocks.set(expected, block.cluster_id);
                file.file_size += block.data_length as u32;
            } else {
                discarded.push(block.cluster_id);
            }
        }

        for cluster_id in &discarded {
            self.mark_orphaned(*cluster_id)?;
        }
        if !discarded.is_empty() {
            log::warn!(
                "[MOUNT] objId={} discarded {} clusters during recovery",
                obj_id,
                discarded.len()
            );
        }

        if file.blocks.is_empty() {
            return Ok(());
        }

        log::debug!(
            "[MOUNT] file objId={} blocks={} size={}",
            obj_id,
            file.blocks.len(),
            file.file_size
        );
        self.files.insert(obj_id, file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemFlash;
    use crate::cluster::ClusterBuffer;
    use crate::error::ErrorKind;
    use crate::fs::FileMode;
    use alloc::string::ToString;
    use alloc::vec;

    const CLUSTER: usize = 256;

    fn raw_cluster(marker: ClusterMarker, obj_id: u16, block_id: u16, data: &[u8]) -> Vec<u8> {
        let mut c = ClusterBuffer::new(CLUSTER as u16);
        c.set_marker(marker);
        c.set_obj_id(obj_id);
        c.set_block_id(block_id);
        c.set_data_length(data.len() as u16);
        c.set_data(0, data);
        c.as_bytes()[..c.max_write()].to_vec()
    }

    fn formatted_fs() -> TinyFileSystem<MemFlash> {
        let mut fs = TinyFileSystem::new(MemFlash::new(262_144, 4096, 256)).unwrap();
        fs.format().unwrap();
        fs
    }

    fn remount(fs: TinyFileSystem<MemFlash>) -> TinyFileSystem<MemFlash> {
        let mut fs = TinyFileSystem::new(fs.into_driver()).unwrap();
        fs.mount().unwrap();
        fs
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed)).collect()
    }

    fn assert_conserved(fs: &TinyFileSystem<MemFlash>) {
        let usage = fs.cluster_usage().unwrap();
        assert_eq!(usage.free + usage.orphaned + usage.live, usage.total);
    }

    #[test]
    fn test_blank_device_not_formatted() {
        let mut fs = TinyFileSystem::<MemFlash>::new(MemFlash::new(262_144, 4096, 256)).unwrap();
        assert!(!fs.check_if_formatted().unwrap());
        assert_eq!(fs.mount().unwrap_err().kind(), ErrorKind::NotFormatted);
        assert!(!fs.is_mounted());
    }

    #[test]
    fn test_check_if_formatted_after_format() {
        let mut fs = formatted_fs();
        assert!(fs.check_if_formatted().unwrap());
    }

    #[test]
    fn test_unknown_sector_marker_not_formatted() {
        let mut flash = MemFlash::new(262_144, 4096, 256);
        flash.as_bytes_mut()[0] = MARKER_FORMATTED_SECTOR;
        flash.as_bytes_mut()[4096] = 0x55;

        let mut fs = TinyFileSystem::<MemFlash>::new(flash).unwrap();
        assert!(!fs.check_if_formatted().unwrap());
        assert_eq!(fs.mount().unwrap_err().kind(), ErrorKind::NotFormatted);
        assert_eq!(fs.get_stats().unwrap_err().kind(), ErrorKind::NotMounted);
    }

    #[test]
    fn test_invalid_header_not_formatted() {
        let mut flash = MemFlash::new(262_144, 4096, 256);
        for sector in 0..64 {
            flash.as_bytes_mut()[sector * 4096] = MARKER_FORMATTED_SECTOR;
        }
        // 数据长度超过 FileCluster 容量
        let raw = raw_cluster(ClusterMarker::Allocated, 1, 0, &[]);
        flash.as_bytes_mut()[..raw.len()].copy_from_slice(&raw);
        flash.as_bytes_mut()[5] = 0xFF;
        flash.as_bytes_mut()[6] = 0x00;

        let mut fs = TinyFileSystem::<MemFlash>::new(flash).unwrap();
        assert_eq!(fs.mount().unwrap_err().kind(), ErrorKind::NotFormatted);
    }

    #[test]
    fn test_remount_preserves_files() {
        let mut fs = formatted_fs();
        let a = pattern(1000, 1);
        let b = pattern(10, 2);
        fs.write_all_bytes("A.BIN", &a).unwrap();
        fs.write_all_bytes("B.BIN", &b).unwrap();
        fs.delete("B.BIN").unwrap();
        fs.write_all_bytes("C.BIN", &b).unwrap();
        let stats = fs.get_stats().unwrap();

        let mut fs = remount(fs);
        let mut names = fs.get_files().unwrap();
        names.sort();
        assert_eq!(names, vec!["A.BIN".to_string(), "C.BIN".to_string()]);
        assert_eq!(fs.read_all_bytes("A.BIN").unwrap(), a);
        assert_eq!(fs.read_all_bytes("C.BIN").unwrap(), b);
        assert_eq!(fs.get_stats().unwrap(), stats);
        assert_conserved(&fs);

        // 新文件的对象 ID 不与已有文件冲突
        fs.write_all_bytes("D.BIN", &b).unwrap();
        assert_eq!(fs.get_files().unwrap().len(), 3);
    }

    #[test]
    fn test_mount_twice_is_noop() {
        let mut fs = formatted_fs();
        fs.write_all_bytes("A.TXT", &pattern(1000, 9)).unwrap();
        let stats = fs.get_stats().unwrap();
        let tail = fs.tail_cluster_id;

        fs.mount().unwrap();
        assert_eq!(fs.tail_cluster_id, tail);
        assert_eq!(fs.get_stats().unwrap(), stats);
        assert_eq!(fs.get_files().unwrap(), vec!["A.TXT".to_string()]);
    }

    #[test]
    fn test_remount_after_compact() {
        let mut fs = formatted_fs();
        let a = pattern(800, 3);
        fs.write_all_bytes("A", &a).unwrap();
        fs.write_all_bytes("A", &a).unwrap();
        fs.compact().unwrap();
        let stats = fs.get_stats().unwrap();
        let head = fs.head_sector_id;

        let fs = remount(fs);
        assert_eq!(fs.head_sector_id, head);
        assert_eq!(fs.get_stats().unwrap(), stats);
        let mut fs = fs;
        assert_eq!(fs.read_all_bytes("A").unwrap(), a);
    }

    #[test]
    fn test_power_loss_before_commit_keeps_old_content() {
        let mut fs = formatted_fs();
        let old = pattern(500, 4);
        fs.write_all_bytes("P", &old).unwrap();

        let mut f = fs.open("P", FileMode::Open).unwrap();
        // 只允许写入 Pending 簇，提交标记写入失败
        let budget = 1;
        fs.dev.driver_mut().fail_after_writes(budget);
        let err = f.write(&mut fs, &[0xEE; 16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        let mut flash = fs.into_driver();
        flash.clear_fault();
        let mut fs = TinyFileSystem::<MemFlash>::new(flash).unwrap();
        fs.mount().unwrap();
        assert_eq!(fs.read_all_bytes("P").unwrap(), old);
        assert_conserved(&fs);
    }

    #[test]
    fn test_power_loss_before_orphan_keeps_newest_copy() {
        let mut fs = formatted_fs();
        let old = pattern(100, 5);
        fs.write_all_bytes("Q", &old).unwrap();

        let mut f = fs.open("Q", FileMode::Open).unwrap();
        // Pending 写入与提交成功，废弃旧簇失败
        fs.dev.driver_mut().fail_after_writes(2);
        assert!(f.write(&mut fs, b"NEW").is_err());

        let mut flash = fs.into_driver();
        flash.clear_fault();
        let mut fs = TinyFileSystem::<MemFlash>::new(flash).unwrap();
        fs.mount().unwrap();

        let mut expected = old.clone();
        expected[..3].copy_from_slice(b"NEW");
        assert_eq!(fs.read_all_bytes("Q").unwrap(), expected);
        assert_conserved(&fs);
    }

    #[test]
    fn test_missing_block_zero_discards_file() {
        let mut flash = MemFlash::new(262_144, 4096, 256);
        for sector in 0..64 {
            flash.as_bytes_mut()[sector * 4096] = MARKER_FORMATTED_SECTOR;
        }
        let raw = raw_cluster(ClusterMarker::Allocated, 7, 1, b"lost");
        flash.as_bytes_mut()[..raw.len()].copy_from_slice(&raw);

        let mut fs = TinyFileSystem::<MemFlash>::new(flash).unwrap();
        fs.mount().unwrap();
        assert!(fs.get_files().unwrap().is_empty());
        assert_eq!(fs.orphaned_cluster_count, 1);
        assert_eq!(fs.driver().as_bytes()[0], MARKER_ORPHANED);
        assert_conserved(&fs);
    }

    #[test]
    fn test_block_gap_truncates_file() {
        let mut fs = formatted_fs();
        fs.write_all_bytes("G", &pattern(224 + 249 + 10, 6)).unwrap();
        let obj_id = fs.find_file("G").unwrap().unwrap();
        let block1 = fs.cluster_of(obj_id, 1).unwrap() as usize;

        let mut flash = fs.into_driver();
        flash.as_bytes_mut()[block1 * CLUSTER] = MARKER_ORPHANED;

        let mut fs = TinyFileSystem::<MemFlash>::new(flash).unwrap();
        fs.mount().unwrap();
        assert_eq!(fs.get_file_size("G").unwrap(), 224);
        assert_conserved(&fs);
    }
}
