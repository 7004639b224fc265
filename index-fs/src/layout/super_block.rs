use crate::FS_MAGIC;

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 定位位图与根目录
#[derive(Debug)]
#[repr(C)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    /// 文件系统占据扇区数
    pub total_sectors: u32,
    pub bitmap_sectors: u32,
    /// 根目录 inode 所在扇区
    pub root_sector: u32,
}

impl SuperBlock {
    /// 位图紧跟在超级块之后
    pub const BITMAP_START: u32 = 1;

    #[inline]
    pub fn init(&mut self, total_sectors: u32, bitmap_sectors: u32, root_sector: u32) {
        *self = Self {
            magic: FS_MAGIC,
            total_sectors,
            bitmap_sectors,
            root_sector,
        };
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == FS_MAGIC
    }
}
