use core::fmt;

/// 可恢复的错误；磁盘数据损坏与设备故障直接恐慌
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 空闲扇区耗尽
    NoSpace,
    /// 超出 inode 可编号的最大文件长度
    TooLarge,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpace => f.write_str("no free sector left"),
            Self::TooLarge => f.write_str("file exceeds the maximum size"),
        }
    }
}

impl core::error::Error for Error {}
