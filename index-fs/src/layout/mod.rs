//! # 磁盘数据结构层
//!
//! index-fs 的磁盘布局：
//! 超级块 | 空闲扇区位图 | 根目录 inode | 数据扇区
//!
//! inode 与间接索引扇区都散落在数据扇区当中，由位图统一分配。

mod super_block;
pub use super_block::SuperBlock;

mod bitmap;
pub use bitmap::{Bitmap, SectorAllocator};

mod inode;
pub use inode::{
    DIRECT_COUNT, DiskInode, INDEX_COUNT, MAX_FILE_SIZE, MAX_SECTORS, NO_SECTOR, Tier,
};
