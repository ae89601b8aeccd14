//! 线程安全包装
//!
//! 文件系统的所有操作都需要 `&mut self`，多线程共享时用一把互斥锁串行化。
//! `SharedStream` 在每次调用时加锁，并实现 `std::io` 的读写定位 trait，
//! 需要缓冲时可以直接套上 `BufReader` / `BufWriter`。

use crate::{
    block::BlockDriver,
    error::{Error, ErrorKind, Result},
};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use std::io;
use std::sync::{Mutex, MutexGuard};

use super::{
    filesystem::TinyFileSystem,
    stream::FileStream,
    types::{DeviceStats, FileMode, NoHal, SeekFrom, SystemHal, Timestamp},
};

/// 可在线程间共享的文件系统
///
/// # 示例
///
/// ```rust,ignore
/// let shared = SharedFileSystem::new(fs);
/// let worker = shared.clone();
/// std::thread::spawn(move || {
///     worker.write_all_bytes("A.LOG", b"from worker")
/// });
/// ```
pub struct SharedFileSystem<D: BlockDriver, H: SystemHal = NoHal> {
    inner: Arc<Mutex<TinyFileSystem<D, H>>>,
}

impl<D: BlockDriver, H: SystemHal> Clone for SharedFileSystem<D, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<D: BlockDriver, H: SystemHal>(
    inner: &Mutex<TinyFileSystem<D, H>>,
) -> Result<MutexGuard<'_, TinyFileSystem<D, H>>> {
    inner
        .lock()
        .map_err(|_| Error::new(ErrorKind::Io, "Failed to acquire file system lock"))
}

impl<D: BlockDriver, H: SystemHal> SharedFileSystem<D, H> {
    /// 包装文件系统实例
    pub fn new(fs: TinyFileSystem<D, H>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(fs)),
        }
    }

    /// 在锁内执行任意操作
    pub fn with<R>(&self, f: impl FnOnce(&mut TinyFileSystem<D, H>) -> Result<R>) -> Result<R> {
        let mut fs = lock(&self.inner)?;
        f(&mut *fs)
    }

    /// 挂载
    pub fn mount(&self) -> Result<()> {
        self.with(|fs| fs.mount())
    }

    /// 格式化
    pub fn format(&self) -> Result<()> {
        self.with(|fs| fs.format())
    }

    /// 检查是否已格式化
    pub fn check_if_formatted(&self) -> Result<bool> {
        self.with(|fs| fs.check_if_formatted())
    }

    /// 完整压缩
    pub fn compact(&self) -> Result<()> {
        self.with(|fs| fs.compact())
    }

    /// 设备空间统计
    pub fn get_stats(&self) -> Result<DeviceStats> {
        self.with(|fs| fs.get_stats())
    }

    /// 创建文件并打开
    pub fn create(&self, name: &str) -> Result<SharedStream<D, H>> {
        let stream = self.with(|fs| fs.create(name))?;
        Ok(SharedStream::new(Arc::clone(&self.inner), stream))
    }

    /// 按模式打开文件
    pub fn open(&self, name: &str, mode: FileMode) -> Result<SharedStream<D, H>> {
        let stream = self.with(|fs| fs.open(name, mode))?;
        Ok(SharedStream::new(Arc::clone(&self.inner), stream))
    }

    /// 删除文件
    pub fn delete(&self, name: &str) -> Result<()> {
        self.with(|fs| fs.delete(name))
    }

    /// 文件是否存在
    pub fn exists(&self, name: &str) -> Result<bool> {
        self.with(|fs| fs.exists(name))
    }

    /// 重命名文件
    pub fn move_file(&self, src: &str, dst: &str) -> Result<()> {
        self.with(|fs| fs.move_file(src, dst))
    }

    /// 复制文件
    pub fn copy(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        self.with(|fs| fs.copy(src, dst, overwrite))
    }

    /// 列出所有文件名
    pub fn get_files(&self) -> Result<Vec<String>> {
        self.with(|fs| fs.get_files())
    }

    /// 文件大小
    pub fn get_file_size(&self, name: &str) -> Result<u32> {
        self.with(|fs| fs.get_file_size(name))
    }

    /// 文件创建时间
    pub fn get_file_creation_time(&self, name: &str) -> Result<Timestamp> {
        self.with(|fs| fs.get_file_creation_time(name))
    }

    /// 读取整个文件
    pub fn read_all_bytes(&self, name: &str) -> Result<Vec<u8>> {
        self.with(|fs| fs.read_all_bytes(name))
    }

    /// 替换整个文件内容
    pub fn write_all_bytes(&self, name: &str, data: &[u8]) -> Result<()> {
        self.with(|fs| fs.write_all_bytes(name, data))
    }
}

/// 共享文件系统上的文件流
///
/// 被 drop 时自动关闭句柄。
pub struct SharedStream<D: BlockDriver, H: SystemHal = NoHal> {
    fs: Arc<Mutex<TinyFileSystem<D, H>>>,
    stream: FileStream,
}

impl<D: BlockDriver, H: SystemHal> SharedStream<D, H> {
    fn new(fs: Arc<Mutex<TinyFileSystem<D, H>>>, stream: FileStream) -> Self {
        Self { fs, stream }
    }

    /// 当前位置
    pub fn position(&self) -> u64 {
        self.stream.position()
    }

    /// 文件长度
    pub fn len(&self) -> Result<u64> {
        let fs = lock(&self.fs)?;
        self.stream.len(&*fs)
    }

    /// 文件是否为空
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// 截断文件
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        let mut fs = lock(&self.fs)?;
        self.stream.set_len(&mut *fs, len)
    }

    /// 显式关闭
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.stream.is_closed() {
            return Ok(());
        }
        let mut fs = lock(&self.fs)?;
        self.stream.close(&mut *fs)
    }
}

impl<D: BlockDriver, H: SystemHal> io::Read for SharedStream<D, H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut fs = lock(&self.fs)?;
        Ok(self.stream.read(&mut *fs, buf)?)
    }
}

impl<D: BlockDriver, H: SystemHal> io::Write for SharedStream<D, H> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut fs = lock(&self.fs)?;
        Ok(self.stream.write(&mut *fs, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut fs = lock(&self.fs)?;
        Ok(self.stream.flush(&mut *fs)?)
    }
}

impl<D: BlockDriver, H: SystemHal> io::Seek for SharedStream<D, H> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let pos = match pos {
            io::SeekFrom::Start(n) => SeekFrom::Start(n),
            io::SeekFrom::End(n) => SeekFrom::End(n),
            io::SeekFrom::Current(n) => SeekFrom::Current(n),
        };
        let mut fs = lock(&self.fs)?;
        Ok(self.stream.seek(&mut *fs, pos)?)
    }
}

impl<D: BlockDriver, H: SystemHal> Drop for SharedStream<D, H> {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            log::warn!("[FILE] failed to close objId={}: {}", self.stream.obj_id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemFlash;
    use std::io::{BufReader, BufWriter, Read, Seek, Write};

    fn shared_fs() -> SharedFileSystem<MemFlash, NoHal> {
        let fs = TinyFileSystem::new(MemFlash::new(262_144, 4096, 256)).unwrap();
        let shared = SharedFileSystem::new(fs);
        shared.format().unwrap();
        shared
    }

    #[test]
    fn test_std_io_round_trip() {
        let shared = shared_fs();
        {
            let stream = shared.create("IO.TXT").unwrap();
            let mut writer = BufWriter::new(stream);
            for i in 0..100 {
                writeln!(writer, "line {}", i).unwrap();
            }
            writer.flush().unwrap();
        }

        let stream = shared.open("io.txt", FileMode::Open).unwrap();
        let mut reader = BufReader::new(stream);
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text.lines().count(), 100);
        assert!(text.starts_with("line 0\nline 1\n"));
        drop(reader);

        // 所有句柄都已随 drop 关闭
        shared.delete("IO.TXT").unwrap();
    }

    #[test]
    fn test_std_io_seek_and_errors() {
        let shared = shared_fs();
        let mut stream = shared.create("S").unwrap();
        stream.write_all(b"abcdef").unwrap();
        assert_eq!(stream.seek(io::SeekFrom::End(-2)).unwrap(), 4);

        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ef");

        let err = stream.seek(io::SeekFrom::Start(100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        stream.close().unwrap();

        let err = shared.open("MISSING", FileMode::Open).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_concurrent_writers() {
        let shared = shared_fs();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let fs = shared.clone();
                std::thread::spawn(move || {
                    let name = alloc::format!("T{}", i);
                    let data = alloc::vec![i as u8; 500];
                    fs.write_all_bytes(&name, &data).unwrap();
                    fs.read_all_bytes(&name).unwrap() == data
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(shared.get_files().unwrap().len(), 4);
    }
}
