//! 文件流

use crate::{
    block::BlockDriver,
    error::{Error, ErrorKind, Result},
};
use alloc::vec;
use alloc::vec::Vec;

use super::{
    filesystem::TinyFileSystem,
    types::{SeekFrom, SystemHal},
};

/// 文件流
///
/// 表示一个打开的文件句柄，支持读写、定位和截断。
///
/// 流只保存对象 ID 和当前位置，每次操作都从文件系统获取最新的文件状态，
/// 所以压缩搬移簇之后句柄仍然有效。同一文件可以同时打开多个流，
/// 它们各自维护位置。
///
/// # 示例
///
/// ```rust,ignore
/// let mut file = fs.open("DATA.BIN", FileMode::OpenOrCreate)?;
/// file.seek(&mut fs, SeekFrom::End(0))?;
/// file.write(&mut fs, b"more")?;
/// file.close(&mut fs)?;
/// ```
#[derive(Debug)]
pub struct FileStream {
    obj_id: u16,
    position: u64,
    closed: bool,
}

impl FileStream {
    pub(super) fn new(obj_id: u16) -> Self {
        Self {
            obj_id,
            position: 0,
            closed: false,
        }
    }

    /// 对象 ID
    pub fn obj_id(&self) -> u16 {
        self.obj_id
    }

    /// 当前位置
    pub fn position(&self) -> u64 {
        self.position
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open<D: BlockDriver, H: SystemHal>(&self, fs: &TinyFileSystem<D, H>) -> Result<u64> {
        if self.closed {
            return Err(Error::file_closed());
        }
        Ok(fs.open_file(self.obj_id)?.file_size as u64)
    }

    /// 文件长度
    pub fn len<D: BlockDriver, H: SystemHal>(&self, fs: &TinyFileSystem<D, H>) -> Result<u64> {
        self.check_open(fs)
    }

    /// 文件是否为空
    pub fn is_empty<D: BlockDriver, H: SystemHal>(&self, fs: &TinyFileSystem<D, H>) -> Result<bool> {
        Ok(self.len(fs)? == 0)
    }

    /// 从当前位置读取数据
    ///
    /// # 返回
    ///
    /// 实际读取的字节数，位于文件末尾时返回 0
    pub fn read<D: BlockDriver, H: SystemHal>(
        &mut self,
        fs: &mut TinyFileSystem<D, H>,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.check_open(fs)?;
        let n = fs.read_file(self.obj_id, self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }

    /// 从当前位置读取到文件末尾
    pub fn read_to_end<D: BlockDriver, H: SystemHal>(
        &mut self,
        fs: &mut TinyFileSystem<D, H>,
    ) -> Result<Vec<u8>> {
        let size = self.check_open(fs)?;
        let remaining = size.saturating_sub(self.position) as usize;

        let mut buf = vec![0u8; remaining];
        let mut total_read = 0;
        while total_read < buf.len() {
            let n = self.read(fs, &mut buf[total_read..])?;
            if n == 0 {
                break;
            }
            total_read += n;
        }

        buf.truncate(total_read);
        Ok(buf)
    }

    /// 在当前位置写入数据
    ///
    /// 写入位置不能超过文件末尾；写入可以覆盖已有内容并扩展文件。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::OutOfBounds` - 当前位置超过文件长度
    /// - `ErrorKind::DiskFull` - 压缩后仍没有可用的簇，已写入的部分保留
    pub fn write<D: BlockDriver, H: SystemHal>(
        &mut self,
        fs: &mut TinyFileSystem<D, H>,
        data: &[u8],
    ) -> Result<usize> {
        self.check_open(fs)?;
        fs.write_file(self.obj_id, self.position, data)?;
        self.position += data.len() as u64;
        Ok(data.len())
    }

    /// 移动当前位置
    ///
    /// 目标位置必须位于 `[0, 文件长度]` 之内。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::OutOfBounds` - 目标位置越界
    pub fn seek<D: BlockDriver, H: SystemHal>(
        &mut self,
        fs: &mut TinyFileSystem<D, H>,
        pos: SeekFrom,
    ) -> Result<u64> {
        let size = self.check_open(fs)?;

        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };

        match target {
            Some(target) if target <= size => {
                self.position = target;
                Ok(target)
            }
            _ => Err(Error::new(
                ErrorKind::OutOfBounds,
                "Seek position outside of file",
            )),
        }
    }

    /// 截断文件并把位置移到新的末尾
    ///
    /// # 错误
    ///
    /// - `ErrorKind::OutOfBounds` - `len` 大于当前文件长度
    pub fn set_len<D: BlockDriver, H: SystemHal>(
        &mut self,
        fs: &mut TinyFileSystem<D, H>,
        len: u64,
    ) -> Result<()> {
        self.check_open(fs)?;
        fs.truncate_file(self.obj_id, len)?;
        self.position = len;
        Ok(())
    }

    /// 刷新
    ///
    /// 每次写入都已直接落到设备上，这里只检查句柄状态。
    pub fn flush<D: BlockDriver, H: SystemHal>(&mut self, fs: &mut TinyFileSystem<D, H>) -> Result<()> {
        self.check_open(fs).map(|_| ())
    }

    /// 关闭句柄
    ///
    /// 重复关闭不会报错。
    pub fn close<D: BlockDriver, H: SystemHal>(&mut self, fs: &mut TinyFileSystem<D, H>) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        fs.close_handle(self.obj_id);
        log::trace!("[FILE] close objId={}", self.obj_id);
        Ok(())
    }
}
