//! 错误类型定义
//!
//! 提供闪存文件系统操作的错误类型。

use core::fmt;

/// 文件系统操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 块驱动 I/O 错误
    Io,
    /// 无效参数（几何参数、文件名等）
    InvalidInput,
    /// 设备未格式化（扫描到无法识别的标记）
    NotFormatted,
    /// 文件系统尚未挂载
    NotMounted,
    /// 文件不存在
    FileNotFound,
    /// 文件已存在
    FileAlreadyExists,
    /// 文件仍有打开的句柄
    FileInUse,
    /// 句柄已关闭
    FileClosed,
    /// 空间不足（压缩后仍无法腾出空间）
    DiskFull,
    /// 越界（seek/truncate/write 超出文件范围）
    OutOfBounds,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }

    pub(crate) const fn not_mounted() -> Self {
        Self::new(ErrorKind::NotMounted, "File system has not been mounted")
    }

    pub(crate) const fn not_formatted() -> Self {
        Self::new(ErrorKind::NotFormatted, "Not formatted")
    }

    pub(crate) const fn file_not_found() -> Self {
        Self::new(ErrorKind::FileNotFound, "File not found")
    }

    pub(crate) const fn file_exists() -> Self {
        Self::new(ErrorKind::FileAlreadyExists, "File already exists")
    }

    pub(crate) const fn file_in_use() -> Self {
        Self::new(ErrorKind::FileInUse, "File is in use")
    }

    pub(crate) const fn file_closed() -> Self {
        Self::new(ErrorKind::FileClosed, "File closed")
    }

    pub(crate) const fn disk_full() -> Self {
        Self::new(ErrorKind::DiskFull, "Disk full")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match err.kind {
            ErrorKind::FileNotFound => Io::NotFound,
            ErrorKind::FileAlreadyExists => Io::AlreadyExists,
            ErrorKind::InvalidInput | ErrorKind::OutOfBounds => Io::InvalidInput,
            ErrorKind::NotFormatted => Io::InvalidData,
            ErrorKind::FileInUse
            | ErrorKind::DiskFull
            | ErrorKind::NotMounted
            | ErrorKind::FileClosed
            | ErrorKind::Io => Io::Other,
        };
        std::io::Error::new(kind, err)
    }
}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
