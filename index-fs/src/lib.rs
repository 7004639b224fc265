#![no_std]

extern crate alloc;

/* index-fs 的整体架构，自上而下 */

// 文件系统层：格式化、挂载，把下面几层组装起来
mod fs;

// 索引节点层：打开的 inode 表，文件的读写、增长与删除
mod inode;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
pub mod layout;

// 块缓存层：内存上的磁盘扇区缓存
mod block_cache;

mod error;

pub use block_dev::BlockDevice;

pub use self::{
    block_cache::{BlockCache, Buffer, CacheConfig, SectorRef},
    error::Error,
    fs::IndexFileSystem,
    inode::{Inode, InodeTable},
    layout::{Bitmap, SectorAllocator},
};

/// inode 的魔数，每次载入 inode 时校验
pub const INODE_MAGIC: u32 = 0x494e4f44;
/// 文件系统的魔数，挂载时校验
pub const FS_MAGIC: u32 = 0x3b800001;
pub const SECTOR_SIZE: usize = 512;
pub const SECTOR_BITS: usize = SECTOR_SIZE * 8;

type DataBlock = [u8; SECTOR_SIZE];
