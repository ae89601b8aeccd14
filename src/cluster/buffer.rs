//! 簇缓冲区
//!
//! 在内存表示与设备上的簇布局之间做序列化/反序列化，
//! 同时记录 setter 触及的字节范围，写入新簇时只需写出该范围。
//!
//! ```text
//! FileCluster (blockId == 0)
//! offset | bytes | 字段
//! 0      | 1     | marker
//! 1      | 2     | objId
//! 3      | 2     | blockId
//! 5      | 2     | dataLength
//! 7      | 1     | 文件名长度
//! 8      | 16    | 文件名（UTF-8）
//! 24     | 8     | 创建时间（tick）
//! 32     | n     | 文件前 n 字节数据
//!
//! DataCluster (blockId > 0)
//! 0..7   |       | 同上公共头部
//! 7      | n     | 第 blockId 块的数据
//! ```

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::Timestamp;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};
use core::ops::Range;

use super::ClusterMarker;

/// 可复用的簇缓冲区
#[derive(Debug, Clone)]
pub struct ClusterBuffer {
    buf: Vec<u8>,
    min_write: usize,
    max_write: usize,
}

impl ClusterBuffer {
    /// 创建指定簇大小的缓冲区
    pub fn new(cluster_size: u16) -> Self {
        Self {
            buf: vec![0u8; cluster_size as usize],
            min_write: usize::MAX,
            max_write: 0,
        }
    }

    /// 簇大小
    pub fn cluster_size(&self) -> usize {
        self.buf.len()
    }

    /// FileCluster 可容纳的最大数据长度
    pub fn file_cluster_max_data_length(&self) -> usize {
        self.buf.len() - FILE_CLUSTER_HEADER_SIZE
    }

    /// DataCluster 可容纳的最大数据长度
    pub fn data_cluster_max_data_length(&self) -> usize {
        self.buf.len() - DATA_CLUSTER_HEADER_SIZE
    }

    /// 清零缓冲区并重置写入范围
    pub fn clear(&mut self) {
        self.buf.fill(0);
        self.min_write = usize::MAX;
        self.max_write = 0;
    }

    /// 原始字节
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// 原始字节（可变，供驱动读取填充）
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// 已被 setter 触及的字节范围
    pub fn dirty_range(&self) -> Range<usize> {
        if self.min_write > self.max_write {
            0..0
        } else {
            self.min_write..self.max_write
        }
    }

    /// 写出新簇时需要写入的字节数（从偏移 0 起）
    pub fn max_write(&self) -> usize {
        self.max_write
    }

    /// 覆盖写出长度（例如读入现有簇后按有效数据长度写出）
    pub fn set_max_write(&mut self, len: usize) {
        self.max_write = len.min(self.buf.len());
    }

    /// 数据区相对簇起始的偏移
    pub fn data_offset(is_file_cluster: bool) -> usize {
        if is_file_cluster {
            FILE_CLUSTER_HEADER_SIZE
        } else {
            DATA_CLUSTER_HEADER_SIZE
        }
    }

    // ===== Get =====

    /// 标记字节
    pub fn marker_byte(&self) -> u8 {
        self.buf[MARKER_OFFSET]
    }

    /// 标记（无法识别时返回 `None`）
    pub fn marker(&self) -> Option<ClusterMarker> {
        ClusterMarker::from_byte(self.marker_byte())
    }

    /// 对象 ID
    pub fn obj_id(&self) -> u16 {
        LittleEndian::read_u16(&self.buf[OBJ_ID_OFFSET..])
    }

    /// 逻辑块号
    pub fn block_id(&self) -> u16 {
        LittleEndian::read_u16(&self.buf[BLOCK_ID_OFFSET..])
    }

    /// 有效数据长度
    pub fn data_length(&self) -> u16 {
        LittleEndian::read_u16(&self.buf[DATA_LENGTH_OFFSET..])
    }

    /// 文件名字节数
    pub fn file_name_length(&self) -> u8 {
        self.buf[FILE_NAME_LENGTH_OFFSET]
    }

    /// 文件名
    pub fn file_name(&self) -> String {
        decode_file_name(&self.buf[FILE_NAME_LENGTH_OFFSET..FILE_NAME_OFFSET + MAX_FILE_NAME_LENGTH])
    }

    /// 创建时间
    pub fn creation_time(&self) -> Timestamp {
        Timestamp::from_ticks(LittleEndian::read_u64(&self.buf[CREATION_TIME_OFFSET..]))
    }

    /// 当前簇类型对应的数据区偏移
    pub fn data_start_offset(&self) -> usize {
        Self::data_offset(self.block_id() == 0)
    }

    /// 有效数据
    pub fn data(&self) -> &[u8] {
        let start = self.data_start_offset();
        let end = (start + self.data_length() as usize).min(self.buf.len());
        &self.buf[start..end]
    }

    // ===== Set =====

    /// 设置标记
    pub fn set_marker(&mut self, marker: ClusterMarker) {
        self.buf[MARKER_OFFSET] = marker.as_byte();
        self.update_write_range(MARKER_OFFSET, 1);
    }

    /// 设置对象 ID
    pub fn set_obj_id(&mut self, value: u16) {
        LittleEndian::write_u16(&mut self.buf[OBJ_ID_OFFSET..], value);
        self.update_write_range(OBJ_ID_OFFSET, 2);
    }

    /// 设置逻辑块号
    pub fn set_block_id(&mut self, value: u16) {
        LittleEndian::write_u16(&mut self.buf[BLOCK_ID_OFFSET..], value);
        self.update_write_range(BLOCK_ID_OFFSET, 2);
    }

    /// 设置有效数据长度
    pub fn set_data_length(&mut self, value: u16) {
        LittleEndian::write_u16(&mut self.buf[DATA_LENGTH_OFFSET..], value);
        self.update_write_range(DATA_LENGTH_OFFSET, 2);
    }

    /// 设置文件名（调用方负责规范化大小写）
    ///
    /// # 错误
    ///
    /// 文件名超过 16 字节时返回 `InvalidInput`
    pub fn set_file_name(&mut self, name: &str) -> Result<()> {
        let bytes = name.as_bytes();
        if bytes.len() > MAX_FILE_NAME_LENGTH {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Filename exceeds 16 bytes",
            ));
        }

        let field = &mut self.buf[FILE_NAME_OFFSET..FILE_NAME_OFFSET + MAX_FILE_NAME_LENGTH];
        field.fill(0);
        field[..bytes.len()].copy_from_slice(bytes);
        self.buf[FILE_NAME_LENGTH_OFFSET] = bytes.len() as u8;
        self.update_write_range(FILE_NAME_LENGTH_OFFSET, 1 + MAX_FILE_NAME_LENGTH);
        Ok(())
    }

    /// 设置创建时间
    pub fn set_creation_time(&mut self, value: Timestamp) {
        LittleEndian::write_u64(&mut self.buf[CREATION_TIME_OFFSET..], value.ticks());
        self.update_write_range(CREATION_TIME_OFFSET, 8);
    }

    /// 把 `data` 写入数据区偏移 `offset` 处
    pub fn set_data(&mut self, offset: usize, data: &[u8]) {
        let first = self.data_start_offset() + offset;
        self.buf[first..first + data.len()].copy_from_slice(data);
        self.update_write_range(first, data.len());
    }

    fn update_write_range(&mut self, offset: usize, len: usize) {
        if self.min_write > offset {
            self.min_write = offset;
        }
        if self.max_write < offset + len {
            self.max_write = offset + len;
        }
    }
}

/// 从“长度字节 + 16 字节文件名”字段解码文件名
pub fn decode_file_name(field: &[u8]) -> String {
    let len = (field[0] as usize).min(MAX_FILE_NAME_LENGTH).min(field.len() - 1);
    String::from_utf8_lossy(&field[1..1 + len]).into_owned()
}
