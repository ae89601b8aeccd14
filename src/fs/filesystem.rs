//! 闪存文件系统核心结构

use crate::{
    block::{BlockDriver, FlashDev, Geometry, IoStats},
    cluster::{decode_file_name, ClusterBuffer, ClusterMarker},
    consts::*,
    error::{Error, ErrorKind, Result},
};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};
use core::marker::PhantomData;

use super::{
    file_ref::FileRef,
    names::NameCache,
    stream::FileStream,
    types::{ClusterUsage, DeviceStats, FileMode, FsConfig, FsFlags, NoHal, SeekFrom, SystemHal, Timestamp},
};

/// 日志结构闪存文件系统
///
/// 所有修改都以追加方式写入环形日志：新簇写在日志尾部，被替代的簇标记为
/// 废弃，压缩时从日志头部回收整个扇区。
///
/// # 示例
///
/// ```rust,ignore
/// use tinyfs_core::{FileMode, MemFlash, TinyFileSystem};
///
/// let flash = MemFlash::new(256 * 1024, 4096, 256);
/// let mut fs = TinyFileSystem::new(flash)?;
///
/// if !fs.check_if_formatted()? {
///     fs.format()?;
/// } else {
///     fs.mount()?;
/// }
///
/// let mut file = fs.create("LOG.TXT")?;
/// file.write(&mut fs, b"hello")?;
/// file.close(&mut fs)?;
///
/// let data = fs.read_all_bytes("log.txt")?;
/// assert_eq!(data, b"hello");
/// ```
pub struct TinyFileSystem<D: BlockDriver, H: SystemHal = NoHal> {
    pub(super) dev: FlashDev<D>,
    pub(super) geo: Geometry,
    pub(super) config: FsConfig,
    pub(super) flags: FsFlags,
    pub(super) last_obj_id: u16,
    /// 日志中最旧数据所在扇区
    pub(super) head_sector_id: u16,
    /// 下一个写入位置
    pub(super) tail_cluster_id: u16,
    pub(super) free_cluster_count: u32,
    /// 触发部分压缩的空闲簇阈值
    pub(super) min_free_clusters: u32,
    pub(super) orphaned_cluster_count: u32,
    pub(super) orphaned_per_sector: Vec<u16>,
    /// 写路径使用的簇缓冲区
    pub(super) cluster: ClusterBuffer,
    /// 压缩使用的簇缓冲区
    pub(super) defrag: ClusterBuffer,
    pub(super) files: BTreeMap<u16, FileRef>,
    pub(super) names: NameCache,
    _hal: PhantomData<fn() -> H>,
}

impl<D: BlockDriver, H: SystemHal> TinyFileSystem<D, H> {
    /// 使用默认配置创建文件系统实例（未挂载）
    pub fn new(driver: D) -> Result<Self> {
        Self::with_config(driver, FsConfig::default())
    }

    /// 使用指定配置创建文件系统实例（未挂载）
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 设备几何参数无效，或保留扇区数不在 `[1, 扇区总数)` 内
    pub fn with_config(driver: D, config: FsConfig) -> Result<Self> {
        let dev = FlashDev::new(driver)?;
        let geo = *dev.geometry();

        if config.reserved_sectors == 0 || config.reserved_sectors >= geo.total_sector_count {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Reserved sectors must be at least 1 and less than the sector count",
            ));
        }

        log::debug!(
            "[MOUNT] geometry: {} sectors x {} clusters x {} bytes, reserved_sectors={}",
            geo.total_sector_count,
            geo.clusters_per_sector,
            geo.cluster_size,
            config.reserved_sectors
        );

        Ok(Self {
            dev,
            geo,
            config,
            flags: FsFlags::empty(),
            last_obj_id: 0,
            head_sector_id: 0,
            tail_cluster_id: 0,
            free_cluster_count: 0,
            min_free_clusters: config.reserved_sectors as u32 * geo.clusters_per_sector as u32,
            orphaned_cluster_count: 0,
            orphaned_per_sector: vec![0; geo.total_sector_count as usize],
            cluster: ClusterBuffer::new(geo.cluster_size),
            defrag: ClusterBuffer::new(geo.cluster_size),
            files: BTreeMap::new(),
            names: NameCache::new(config.name_cache_size),
            _hal: PhantomData,
        })
    }

    /// 是否已挂载
    pub fn is_mounted(&self) -> bool {
        self.flags.contains(FsFlags::MOUNTED)
    }

    /// 设备几何参数
    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    /// 当前配置
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// 底层驱动
    pub fn driver(&self) -> &D {
        self.dev.driver()
    }

    /// 设备 I/O 统计
    pub fn io_stats(&self) -> IoStats {
        self.dev.stats()
    }

    /// 释放底层驱动
    ///
    /// 所有元数据都已在每次操作中写入设备，不需要额外的卸载步骤。
    pub fn into_driver(self) -> D {
        self.dev.into_driver()
    }

    pub(super) fn check_state(&self) -> Result<()> {
        if !self.is_mounted() {
            return Err(Error::not_mounted());
        }
        Ok(())
    }

    // ===== 统计 =====

    /// 获取设备空间统计
    pub fn get_stats(&self) -> Result<DeviceStats> {
        self.check_state()?;
        let cluster_size = self.geo.cluster_size as u32;
        Ok(DeviceStats {
            bytes_free: self.free_cluster_count * cluster_size,
            bytes_orphaned: self.orphaned_cluster_count * cluster_size,
        })
    }

    /// 获取簇使用情况
    pub fn cluster_usage(&self) -> Result<ClusterUsage> {
        self.check_state()?;
        let live = self.files.values().map(|f| f.blocks.len() as u32).sum();
        Ok(ClusterUsage {
            free: self.free_cluster_count,
            orphaned: self.orphaned_cluster_count,
            live,
            total: self.geo.total_cluster_count as u32,
        })
    }

    // ===== 文件操作 =====

    /// 创建文件并打开
    ///
    /// 同名文件已存在时先删除。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 文件名为空或超过 16 字节
    /// - `ErrorKind::FileInUse` - 同名文件仍被打开
    /// - `ErrorKind::DiskFull` - 没有可用的簇
    pub fn create(&mut self, name: &str) -> Result<FileStream> {
        self.check_state()?;
        let name = normalize_name(name)?;
        let obj_id = self.create_file(&name)?;
        self.open_handle(obj_id)
    }

    /// 按模式打开文件
    ///
    /// # 错误
    ///
    /// - `ErrorKind::FileAlreadyExists` - `CreateNew` 且文件已存在
    /// - `ErrorKind::FileNotFound` - `Open`/`Truncate` 且文件不存在
    pub fn open(&mut self, name: &str, mode: FileMode) -> Result<FileStream> {
        self.check_state()?;
        let name = normalize_name(name)?;
        let existing = self.find_file(&name)?;

        let obj_id = match (mode, existing) {
            (FileMode::CreateNew, Some(_)) => return Err(Error::file_exists()),
            (FileMode::Open | FileMode::Truncate, None) => return Err(Error::file_not_found()),
            (_, Some(obj_id)) => obj_id,
            (_, None) => self.create_file(&name)?,
        };

        let mut stream = self.open_handle(obj_id)?;
        let prepared = match mode {
            FileMode::Create | FileMode::Truncate if existing.is_some() => {
                self.truncate_file(obj_id, 0)
            }
            FileMode::Append => stream.seek(self, SeekFrom::End(0)).map(|_| ()),
            _ => Ok(()),
        };

        if let Err(e) = prepared {
            stream.close(self)?;
            return Err(e);
        }

        log::debug!("[FILE] open {} mode={:?} objId={}", name, mode, obj_id);
        Ok(stream)
    }

    /// 删除文件
    ///
    /// # 错误
    ///
    /// - `ErrorKind::FileNotFound` - 文件不存在
    /// - `ErrorKind::FileInUse` - 文件仍被打开
    pub fn delete(&mut self, name: &str) -> Result<()> {
        self.check_state()?;
        let name = normalize_name(name)?;
        let obj_id = self.find_file(&name)?.ok_or_else(Error::file_not_found)?;
        self.delete_file(obj_id)
    }

    /// 文件是否存在
    pub fn exists(&mut self, name: &str) -> Result<bool> {
        self.check_state()?;
        let name = normalize_name(name)?;
        Ok(self.find_file(&name)?.is_some())
    }

    /// 重命名文件
    ///
    /// 通过写时复制重写块 0 完成，文件内容不动。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::FileNotFound` - 源文件不存在
    /// - `ErrorKind::FileAlreadyExists` - 目标文件名已存在
    pub fn move_file(&mut self, src: &str, dst: &str) -> Result<()> {
        self.check_state()?;
        let src = normalize_name(src)?;
        let dst = normalize_name(dst)?;

        let obj_id = self.find_file(&src)?.ok_or_else(Error::file_not_found)?;
        if self.find_file(&dst)?.is_some() {
            return Err(Error::file_exists());
        }

        let old = self.cluster_of(obj_id, 0)?;
        self.load_cluster(old)?;
        self.cluster.set_marker(ClusterMarker::Pending);
        self.cluster.set_file_name(&dst)?;

        let new = self.write_to_log(self.cluster.max_write())?;
        let old = self.cluster_of(obj_id, 0)?;
        self.mark_allocated(new)?;
        self.mark_orphaned(old)?;
        if let Some(file) = self.files.get_mut(&obj_id) {
            file.blocks.set(0, new);
        }
        self.names.put(obj_id, dst.clone());

        log::debug!("[FILE] move {} -> {} objId={}", src, dst, obj_id);
        Ok(())
    }

    /// 复制文件
    ///
    /// 目标文件使用新的对象 ID 和当前时间作为创建时间。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::FileNotFound` - 源文件不存在
    /// - `ErrorKind::FileAlreadyExists` - 目标已存在且 `overwrite` 为 false
    /// - `ErrorKind::FileInUse` - 需要覆盖的目标文件仍被打开
    /// - `ErrorKind::DiskFull` - 空间不足，已复制的部分会被删除
    pub fn copy(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        self.check_state()?;
        let src = normalize_name(src)?;
        let dst = normalize_name(dst)?;

        let src_id = self.find_file(&src)?.ok_or_else(Error::file_not_found)?;
        if let Some(dst_id) = self.find_file(&dst)? {
            if !overwrite {
                return Err(Error::file_exists());
            }
            if dst_id == src_id {
                return Ok(());
            }
            self.delete_file(dst_id)?;
        }

        let dst_id = self.next_obj_id()?;

        // 块 0 带新文件名和创建时间
        let c0 = self.cluster_of(src_id, 0)?;
        self.load_cluster(c0)?;
        self.cluster.set_marker(ClusterMarker::Pending);
        self.cluster.set_obj_id(dst_id);
        self.cluster.set_file_name(&dst)?;
        self.cluster.set_creation_time(Timestamp::now::<H>());
        let copied = self.cluster.data_length() as u32;

        let new = self.write_to_log(self.cluster.max_write())?;
        self.mark_allocated(new)?;

        let mut dst_file = FileRef::new(dst_id);
        dst_file.blocks.set(0, new);
        dst_file.file_size = copied;
        self.files.insert(dst_id, dst_file);
        self.names.put(dst_id, dst.clone());

        if let Err(e) = self.copy_data_blocks(src_id, dst_id) {
            // 不保留只复制了一部分的目标文件
            if let Err(cleanup) = self.delete_file(dst_id) {
                log::warn!("[FILE] failed to remove partial copy {}: {}", dst, cleanup);
            }
            return Err(e);
        }

        let block_count = self.files.get(&src_id).map_or(0, |f| f.blocks.len());
        log::debug!(
            "[FILE] copy {} -> {} objId={} blocks={}",
            src,
            dst,
            dst_id,
            block_count
        );
        Ok(())
    }

    /// 列出所有文件名
    pub fn get_files(&mut self) -> Result<Vec<String>> {
        self.check_state()?;
        let ids: Vec<u16> = self.files.keys().copied().collect();
        let mut names = Vec::with_capacity(ids.len());
        for obj_id in ids {
            names.push(self.file_name(obj_id)?);
        }
        Ok(names)
    }

    /// 获取文件大小
    pub fn get_file_size(&mut self, name: &str) -> Result<u32> {
        self.check_state()?;
        let name = normalize_name(name)?;
        let obj_id = self.find_file(&name)?.ok_or_else(Error::file_not_found)?;
        Ok(self.file(obj_id)?.file_size)
    }

    /// 获取文件创建时间
    pub fn get_file_creation_time(&mut self, name: &str) -> Result<Timestamp> {
        self.check_state()?;
        let name = normalize_name(name)?;
        let obj_id = self.find_file(&name)?.ok_or_else(Error::file_not_found)?;
        let c0 = self.cluster_of(obj_id, 0)?;

        let mut raw = [0u8; 8];
        self.dev.read(c0, CREATION_TIME_OFFSET, &mut raw)?;
        Ok(Timestamp::from_ticks(LittleEndian::read_u64(&raw)))
    }

    /// 读取整个文件
    pub fn read_all_bytes(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut stream = self.open(name, FileMode::Open)?;
        let data = stream.read_to_end(self);
        stream.close(self)?;
        data
    }

    /// 以 `data` 替换整个文件内容（文件不存在时创建）
    pub fn write_all_bytes(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut stream = self.open(name, FileMode::Create)?;
        let written = stream.write(self, data);
        stream.close(self)?;
        written.map(|_| ())
    }

    // ===== 内部辅助 =====

    /// 把源文件块 1 之后的数据簇逐个复制给目标文件
    fn copy_data_blocks(&mut self, src_id: u16, dst_id: u16) -> Result<()> {
        let block_count = self.file(src_id)?.blocks.len();
        for block_id in 1..block_count {
            let c = self.cluster_of(src_id, block_id)?;
            self.load_cluster(c)?;
            self.cluster.set_marker(ClusterMarker::Pending);
            self.cluster.set_obj_id(dst_id);
            let copied = self.cluster.data_length() as u32;

            let new = self.write_to_log(self.cluster.max_write())?;
            self.mark_allocated(new)?;

            let file = self.files.get_mut(&dst_id).ok_or_else(Error::file_not_found)?;
            file.blocks.set(block_id, new);
            file.file_size += copied;
        }
        Ok(())
    }

    pub(super) fn file(&self, obj_id: u16) -> Result<&FileRef> {
        self.files.get(&obj_id).ok_or_else(Error::file_not_found)
    }

    /// 文件第 `block_id` 块当前所在的簇
    pub(super) fn cluster_of(&self, obj_id: u16, block_id: usize) -> Result<u16> {
        self.file(obj_id)?
            .blocks
            .get(block_id)
            .ok_or(Error::new(ErrorKind::OutOfBounds, "Block not allocated"))
    }

    /// 把整个簇读入写缓冲区，写出长度为头部加有效数据
    fn load_cluster(&mut self, cluster_id: u16) -> Result<()> {
        self.cluster.clear();
        self.dev.read(cluster_id, 0, self.cluster.as_bytes_mut())?;
        let len = self.cluster.data_start_offset() + self.cluster.data_length() as usize;
        self.cluster.set_max_write(len);
        Ok(())
    }

    /// 按规范化后的文件名查找对象 ID
    pub(super) fn find_file(&mut self, name: &str) -> Result<Option<u16>> {
        let ids: Vec<u16> = self.files.keys().copied().collect();
        for obj_id in ids {
            if self.file_name(obj_id)? == name {
                return Ok(Some(obj_id));
            }
        }
        Ok(None)
    }

    /// 读取文件名，优先使用缓存
    pub(super) fn file_name(&mut self, obj_id: u16) -> Result<String> {
        if let Some(name) = self.names.get(obj_id) {
            return Ok(name.clone());
        }

        let c0 = self.cluster_of(obj_id, 0)?;
        let mut raw = [0u8; 1 + MAX_FILE_NAME_LENGTH];
        self.dev.read(c0, FILE_NAME_LENGTH_OFFSET, &mut raw)?;
        let name = decode_file_name(&raw);
        self.names.put(obj_id, name.clone());
        Ok(name)
    }

    fn next_obj_id(&mut self) -> Result<u16> {
        if let Some(next) = self.last_obj_id.checked_add(1) {
            self.last_obj_id = next;
            return Ok(next);
        }

        // 对象 ID 用尽后回绕，寻找未使用的最小 ID
        let free = (1..=u16::MAX).find(|id| !self.files.contains_key(id));
        match free {
            Some(id) => {
                log::warn!("[FILE] object id space wrapped, reusing {}", id);
                Ok(id)
            }
            None => Err(Error::disk_full()),
        }
    }

    /// 创建空文件，返回对象 ID
    pub(super) fn create_file(&mut self, name: &str) -> Result<u16> {
        if let Some(existing) = self.find_file(name)? {
            self.delete_file(existing)?;
        }

        let obj_id = self.next_obj_id()?;

        self.cluster.clear();
        self.cluster.set_marker(ClusterMarker::Pending);
        self.cluster.set_obj_id(obj_id);
        self.cluster.set_block_id(0);
        self.cluster.set_data_length(0);
        self.cluster.set_file_name(name)?;
        self.cluster.set_creation_time(Timestamp::now::<H>());

        let c0 = self.write_to_log(self.cluster.max_write())?;
        self.mark_allocated(c0)?;

        let mut file = FileRef::new(obj_id);
        file.blocks.set(0, c0);
        self.files.insert(obj_id, file);
        self.names.put(obj_id, String::from(name));

        log::debug!("[FILE] create {} objId={} cluster={}", name, obj_id, c0);
        Ok(obj_id)
    }

    /// 删除文件：废弃全部簇并从索引移除
    pub(super) fn delete_file(&mut self, obj_id: u16) -> Result<()> {
        if self.file(obj_id)?.is_open() {
            return Err(Error::file_in_use());
        }

        let file = self.files.remove(&obj_id).ok_or_else(Error::file_not_found)?;
        self.names.invalidate(obj_id);
        for cluster_id in file.blocks.iter() {
            self.mark_orphaned(cluster_id)?;
        }

        log::debug!(
            "[FILE] delete objId={} blocks={} size={}",
            obj_id,
            file.blocks.len(),
            file.file_size
        );
        Ok(())
    }

    pub(super) fn open_handle(&mut self, obj_id: u16) -> Result<FileStream> {
        let file = self.files.get_mut(&obj_id).ok_or_else(Error::file_not_found)?;
        file.open_count += 1;
        Ok(FileStream::new(obj_id))
    }

    pub(super) fn close_handle(&mut self, obj_id: u16) {
        if let Some(file) = self.files.get_mut(&obj_id) {
            file.open_count = file.open_count.saturating_sub(1);
        }
    }

    /// 打开的句柄对应的文件，文件已关闭或不存在时返回 `FileClosed`
    pub(super) fn open_file(&self, obj_id: u16) -> Result<&FileRef> {
        self.check_state()?;
        match self.files.get(&obj_id) {
            Some(file) if file.is_open() => Ok(file),
            _ => Err(Error::file_closed()),
        }
    }
}

/// 规范化文件名：转为大写并检查长度
fn normalize_name(name: &str) -> Result<String> {
    let upper = name.to_uppercase();
    if upper.is_empty() {
        return Err(Error::new(ErrorKind::InvalidInput, "Filename is empty"));
    }
    if upper.len() > MAX_FILE_NAME_LENGTH {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "Filename exceeds 16 bytes",
        ));
    }
    Ok(upper)
}
