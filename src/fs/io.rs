//! 文件读写与日志追加
//!
//! 文件内容按逻辑块保存：块 0 位于 FileCluster，容纳 `cluster_size - 32`
//! 字节；之后每个 DataCluster 容纳 `cluster_size - 7` 字节。
//!
//! 修改已有块采用写时复制：
//!
//! 1. 读出旧簇，修改后以 Pending 标记追加到日志尾部
//! 2. 把新簇标记为 Allocated
//! 3. 把旧簇标记为 Orphaned
//!
//! 任一步骤中断都不会丢失已提交的数据：挂载时 Pending 簇按废弃处理，
//! 新旧两个 Allocated 副本则保留较新的那个。

use crate::{
    block::BlockDriver,
    cluster::{ClusterBuffer, ClusterMarker},
    consts::*,
    error::{Error, ErrorKind, Result},
};
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

use super::{filesystem::TinyFileSystem, types::FsFlags, types::SystemHal};

impl<D: BlockDriver, H: SystemHal> TinyFileSystem<D, H> {
    /// 块 0 最大数据长度
    pub(super) fn file_cluster_capacity(&self) -> usize {
        self.cluster.file_cluster_max_data_length()
    }

    /// DataCluster 最大数据长度
    pub(super) fn data_cluster_capacity(&self) -> usize {
        self.cluster.data_cluster_max_data_length()
    }

    /// 块的数据容量
    pub(super) fn block_capacity(&self, block_id: usize) -> usize {
        if block_id == 0 {
            self.file_cluster_capacity()
        } else {
            self.data_cluster_capacity()
        }
    }

    /// 把文件内字节位置映射为 (逻辑块号, 块内偏移)
    pub(super) fn block_position(&self, position: u64) -> (usize, usize) {
        let first = self.file_cluster_capacity() as u64;
        if position < first {
            return (0, position as usize);
        }
        let rest = position - first;
        let per_block = self.data_cluster_capacity() as u64;
        ((rest / per_block + 1) as usize, (rest % per_block) as usize)
    }

    /// 从文件 `position` 处读取数据，返回读取的字节数
    pub(super) fn read_file(&mut self, obj_id: u16, position: u64, buf: &mut [u8]) -> Result<usize> {
        let file_size = self.open_file(obj_id)?.file_size as u64;
        if position >= file_size || buf.is_empty() {
            return Ok(0);
        }

        let total = ((file_size - position) as usize).min(buf.len());
        let (mut block_id, mut offset) = self.block_position(position);
        let mut header = [0u8; COMMON_HEADER_SIZE];
        let mut done = 0;

        while done < total {
            let cluster_id = self.cluster_of(obj_id, block_id)?;
            self.dev.read(cluster_id, 0, &mut header)?;
            let data_length = LittleEndian::read_u16(&header[DATA_LENGTH_OFFSET..]) as usize;
            if offset >= data_length {
                return Err(Error::new(
                    ErrorKind::Io,
                    "Block shorter than recorded file size",
                ));
            }

            let n = (data_length - offset).min(total - done);
            let start = ClusterBuffer::data_offset(block_id == 0) + offset;
            self.dev.read(cluster_id, start, &mut buf[done..done + n])?;

            done += n;
            block_id += 1;
            offset = 0;
        }

        log::trace!("[FILE] read objId={} pos={} len={}", obj_id, position, done);
        Ok(done)
    }

    /// 在文件 `position` 处写入数据
    ///
    /// `position` 不能超过当前文件大小。每个受影响的块写入一个新簇。
    pub(super) fn write_file(&mut self, obj_id: u16, position: u64, data: &[u8]) -> Result<()> {
        let file_size = self.open_file(obj_id)?.file_size as u64;
        if position > file_size {
            return Err(Error::new(
                ErrorKind::OutOfBounds,
                "Write position beyond end of file",
            ));
        }

        let (mut block_id, mut offset) = self.block_position(position);
        let mut done = 0;

        while done < data.len() {
            let n = (self.block_capacity(block_id) - offset).min(data.len() - done);
            let existing = self.file(obj_id)?.blocks.get(block_id);

            self.cluster.clear();
            let grown = match existing {
                Some(old) => {
                    let header = ClusterBuffer::data_offset(block_id == 0);
                    self.dev.read(old, 0, &mut self.cluster.as_bytes_mut()[..header])?;
                    let current = self.cluster.data_length() as usize;
                    if current > 0 {
                        self.dev.read(
                            old,
                            header,
                            &mut self.cluster.as_bytes_mut()[header..header + current],
                        )?;
                    }

                    let new_length = current.max(offset + n);
                    self.cluster.set_max_write(header + current);
                    self.cluster.set_marker(ClusterMarker::Pending);
                    self.cluster.set_data_length(new_length as u16);
                    self.cluster.set_data(offset, &data[done..done + n]);
                    new_length - current
                }
                None => {
                    self.cluster.set_marker(ClusterMarker::Pending);
                    self.cluster.set_obj_id(obj_id);
                    self.cluster.set_block_id(block_id as u16);
                    self.cluster.set_data_length((offset + n) as u16);
                    self.cluster.set_data(offset, &data[done..done + n]);
                    offset + n
                }
            };

            let new = self.write_to_log(self.cluster.max_write())?;
            self.mark_allocated(new)?;
            if existing.is_some() {
                // 写日志时可能触发压缩，旧块需要重新查找
                let old = self.cluster_of(obj_id, block_id)?;
                self.mark_orphaned(old)?;
            }

            let file = self.files.get_mut(&obj_id).ok_or_else(Error::file_closed)?;
            file.blocks.set(block_id, new);
            file.file_size += grown as u32;

            log::trace!(
                "[FILE] write objId={} block={} cluster={} len={}",
                obj_id,
                block_id,
                new,
                n
            );

            done += n;
            block_id += 1;
            offset = 0;
        }

        Ok(())
    }

    /// 把文件截断为 `len` 字节
    ///
    /// 先从后往前废弃多余的块，再重写截断点所在的块。任一步骤掉电，
    /// 挂载后得到的都是旧内容的一个前缀，且不短于 `len`。
    pub(super) fn truncate_file(&mut self, obj_id: u16, len: u64) -> Result<()> {
        let file_size = self.open_file(obj_id)?.file_size as u64;
        if len > file_size {
            return Err(Error::new(
                ErrorKind::OutOfBounds,
                "Cannot extend file by truncation",
            ));
        }
        if len == file_size {
            return Ok(());
        }

        let (block_id, offset) = self.block_position(len);
        // 截断点所在块仍保留数据（或是块 0）时需要重写该块
        let rewrite = offset > 0 || block_id == 0;
        let first_dropped = if rewrite { block_id + 1 } else { block_id };

        let dropped: Vec<u16> = self.file(obj_id)?.blocks.iter().skip(first_dropped).collect();
        for (i, cluster_id) in dropped.iter().enumerate().rev() {
            self.mark_orphaned(*cluster_id)?;
            let kept = self.prefix_size(first_dropped + i) as u32;
            let file = self.files.get_mut(&obj_id).ok_or_else(Error::file_closed)?;
            file.blocks.truncate(first_dropped + i);
            file.file_size = file.file_size.min(kept);
        }

        if rewrite {
            let old = self.cluster_of(obj_id, block_id)?;
            let header = ClusterBuffer::data_offset(block_id == 0);

            self.cluster.clear();
            self.dev.read(old, 0, &mut self.cluster.as_bytes_mut()[..header + offset])?;
            self.cluster.set_max_write(header + offset);
            self.cluster.set_marker(ClusterMarker::Pending);
            self.cluster.set_data_length(offset as u16);

            let new = self.write_to_log(self.cluster.max_write())?;
            let old = self.cluster_of(obj_id, block_id)?;
            self.mark_allocated(new)?;
            self.mark_orphaned(old)?;
            if let Some(file) = self.files.get_mut(&obj_id) {
                file.blocks.set(block_id, new);
            }
        }

        let file = self.files.get_mut(&obj_id).ok_or_else(Error::file_closed)?;
        file.file_size = len as u32;

        log::debug!(
            "[FILE] truncate objId={} len={} dropped={}",
            obj_id,
            len,
            dropped.len()
        );
        Ok(())
    }

    /// 前 `blocks` 个块装满时的字节数
    fn prefix_size(&self, blocks: usize) -> usize {
        match blocks {
            0 => 0,
            n => self.file_cluster_capacity() + (n - 1) * self.data_cluster_capacity(),
        }
    }

    /// 把写缓冲区前 `len` 字节追加到日志尾部，返回写入的簇号
    ///
    /// 空闲簇不超过保留阈值时先做部分压缩，仍不够则返回 `DiskFull`。
    pub(super) fn write_to_log(&mut self, len: usize) -> Result<u16> {
        let compacting = self.flags.contains(FsFlags::COMPACTING);

        if !compacting && self.free_cluster_count <= self.min_free_clusters {
            self.partial_compact()?;
        }

        if !compacting && self.free_cluster_count <= self.min_free_clusters {
            log::debug!(
                "[LOG] disk full: free={} reserved={}",
                self.free_cluster_count,
                self.min_free_clusters
            );
            return Err(Error::disk_full());
        }

        let cluster_id = self.tail_cluster_id;
        let marker = self.dev.read_marker(cluster_id)?;
        if !ClusterMarker::from_byte(marker).is_some_and(ClusterMarker::is_available) {
            log::warn!(
                "[LOG] tail cluster {} not writable (marker {:#04x})",
                cluster_id,
                marker
            );
            return Err(Error::disk_full());
        }

        self.dev.write(cluster_id, 0, &self.cluster.as_bytes()[..len])?;
        self.tail_cluster_id = self.geo.next_cluster(cluster_id);
        self.free_cluster_count = self.free_cluster_count.saturating_sub(1);

        log::trace!("[LOG] append cluster={} len={}", cluster_id, len);
        Ok(cluster_id)
    }

    /// 提交簇
    pub(super) fn mark_allocated(&mut self, cluster_id: u16) -> Result<()> {
        self.dev.write_marker(cluster_id, MARKER_ALLOCATED)
    }

    /// 废弃簇并计入所在扇区的废弃计数
    pub(super) fn mark_orphaned(&mut self, cluster_id: u16) -> Result<()> {
        self.dev.write_marker(cluster_id, MARKER_ORPHANED)?;
        self.orphaned_cluster_count += 1;
        let sector = self.geo.sector_of(cluster_id) as usize;
        self.orphaned_per_sector[sector] = self.orphaned_per_sector[sector].saturating_add(1);
        log::trace!("[LOG] orphan cluster={}", cluster_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::block::MemFlash;
    use crate::error::ErrorKind;
    use crate::fs::{FileMode, SeekFrom, TinyFileSystem};
    use alloc::vec::Vec;

    fn formatted_fs() -> TinyFileSystem<MemFlash> {
        let mut fs = TinyFileSystem::new(MemFlash::new(262_144, 4096, 256)).unwrap();
        fs.format().unwrap();
        fs
    }

    #[test]
    fn test_block_position_mapping() {
        let fs = formatted_fs();
        assert_eq!(fs.block_position(0), (0, 0));
        assert_eq!(fs.block_position(223), (0, 223));
        assert_eq!(fs.block_position(224), (1, 0));
        assert_eq!(fs.block_position(224 + 248), (1, 248));
        assert_eq!(fs.block_position(224 + 249), (2, 0));
        assert_eq!(fs.block_position(1000), (4, 29));
    }

    #[test]
    fn test_write_past_end_fails() {
        let mut fs = formatted_fs();
        let mut f = fs.create("A").unwrap();
        f.write(&mut fs, b"abc").unwrap();
        let obj_id = f.obj_id();
        assert_eq!(
            fs.write_file(obj_id, 10, b"x").unwrap_err().kind(),
            ErrorKind::OutOfBounds
        );
        f.close(&mut fs).unwrap();
    }

    #[test]
    fn test_extend_partial_last_block() {
        let mut fs = formatted_fs();
        let mut f = fs.create("A").unwrap();
        let first: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let second: Vec<u8> = (0..300u32).map(|i| (i * 7) as u8).collect();
        f.write(&mut fs, &first).unwrap();
        f.write(&mut fs, &second).unwrap();
        assert_eq!(f.len(&fs).unwrap(), 600);

        f.seek(&mut fs, SeekFrom::Start(0)).unwrap();
        let data = f.read_to_end(&mut fs).unwrap();
        assert_eq!(&data[..300], &first[..]);
        assert_eq!(&data[300..], &second[..]);
        f.close(&mut fs).unwrap();
    }

    #[test]
    fn test_truncate_drops_blocks() {
        let mut fs = formatted_fs();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        fs.write_all_bytes("T", &data).unwrap();

        let mut f = fs.open("T", FileMode::Open).unwrap();
        f.set_len(&mut fs, 224).unwrap();
        let obj_id = f.obj_id();
        assert_eq!(fs.file(obj_id).unwrap().blocks.len(), 1);
        f.set_len(&mut fs, 100).unwrap();
        assert_eq!(f.position(), 100);
        f.close(&mut fs).unwrap();

        assert_eq!(fs.read_all_bytes("T").unwrap(), &data[..100]);
        let usage = fs.cluster_usage().unwrap();
        assert_eq!(usage.free + usage.orphaned + usage.live, usage.total);
    }

    #[test]
    fn test_power_loss_during_truncate_leaves_prefix() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 241) as u8).collect();
        // 依次废弃块 4、3、2，然后重写块 1：写入、提交、废弃旧簇
        let expected = [1000, 224 + 249 * 3, 224 + 249 * 2, 473, 473, 300];

        for (budget, &len) in expected.iter().enumerate() {
            let mut fs = formatted_fs();
            fs.write_all_bytes("T", &data).unwrap();
            let mut f = fs.open("T", FileMode::Open).unwrap();

            fs.dev.driver_mut().fail_after_writes(budget);
            assert_eq!(f.set_len(&mut fs, 300).unwrap_err().kind(), ErrorKind::Io);

            let mut flash = fs.into_driver();
            flash.clear_fault();
            let mut fs = TinyFileSystem::<MemFlash>::new(flash).unwrap();
            fs.mount().unwrap();
            assert_eq!(fs.read_all_bytes("T").unwrap(), &data[..len], "budget {}", budget);
        }
    }

    #[test]
    fn test_tail_marker_guard() {
        let mut fs = formatted_fs();
        let tail = fs.tail_cluster_id as usize;
        fs.dev.driver_mut().as_bytes_mut()[tail * 256] = crate::consts::MARKER_ALLOCATED;
        assert_eq!(fs.create("A").unwrap_err().kind(), ErrorKind::DiskFull);
    }
}
