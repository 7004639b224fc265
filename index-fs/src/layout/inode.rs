//! 磁盘上的 inode 恰好占据一个扇区，其 124 个扇区编号分为三级：
//! - 直接索引：122 个编号，每个都指向一个**数据扇区**
//! - 一级索引：指向一个索引扇区，整个扇区连续存储 128 个数据扇区编号
//! - 二级索引：指向一个索引扇区，整个扇区连续存储 128 个一级索引扇区编号
//!
//! 目录的空间用于存放子项的元信息；
//! 文件的空间用于存放它的数据。
//!
//! ## 扇区索引编码
//!
//! 文件的第 i 个数据扇区（逻辑索引）剔去前面各级的容量后：
//! - 除以一级索引扇区的**可编号数量**，得到二级索引扇区内的位置
//! - 模一级索引扇区的**可编号数量**，得到一级索引扇区内的位置

use alloc::vec::Vec;

use crate::BlockCache;
use crate::INODE_MAGIC;
use crate::SECTOR_SIZE;

/// 索引扇区的编号容量
pub const INDEX_COUNT: usize = SECTOR_SIZE / 4;
/// 索引扇区
type IndexBlock = [u32; INDEX_COUNT];

/// 直接索引可编号数量
pub const DIRECT_COUNT: usize = 122;
/// 一级索引可编号数量
const INDIRECT1_COUNT: usize = INDEX_COUNT;
/// 二级索引可编号数量
const INDIRECT2_COUNT: usize = INDEX_COUNT.pow(2);
/// 直接索引时的编号容量
const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上一级索引时的编号容量
const INDIRECT1_CAP: usize = DIRECT_CAP + INDIRECT1_COUNT;
/// 用上二级索引时的编号容量
const INDIRECT2_CAP: usize = INDIRECT1_CAP + INDIRECT2_COUNT;

/// 单个文件最多拥有的数据扇区数
pub const MAX_SECTORS: usize = INDIRECT2_CAP;
pub const MAX_FILE_SIZE: usize = MAX_SECTORS * SECTOR_SIZE;

/// 未使用的扇区编号。0号扇区是超级块，不会被分配出去
pub const NO_SECTOR: u32 = 0;

const POINTER_COUNT: usize = DIRECT_COUNT + 2;
/// 一级索引扇区编号所在的位置
const INDIRECT1_SLOT: usize = DIRECT_COUNT;
/// 二级索引扇区编号所在的位置
const INDIRECT2_SLOT: usize = DIRECT_COUNT + 1;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DiskInode {
    /// 直接索引，外加一级、二级索引扇区的编号
    pointers: [u32; POINTER_COUNT],
    /// 文件长度（字节）
    // 不用usize是为了严控布局
    pub length: u32,
    is_dir: u32,
    /// 父目录 inode 所在扇区
    pub parent: u32,
    magic: u32,
}

/// 数据扇区的逻辑索引落在哪一级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// 直接索引中的位置
    Direct(usize),
    /// 一级索引扇区内的位置
    Indirect(usize),
    /// 二级索引扇区内的位置，以及其指向的一级索引扇区内的位置
    DoubleIndirect(usize, usize),
}

impl Tier {
    pub fn locate(sector_index: usize) -> Self {
        assert!(sector_index < MAX_SECTORS, "sector index out of range");

        if sector_index < DIRECT_CAP {
            Self::Direct(sector_index)
        } else if sector_index < INDIRECT1_CAP {
            // 剔去直接索引的部分
            Self::Indirect(sector_index - DIRECT_CAP)
        } else {
            // 剔去使用了一级索引的部分
            let index = sector_index - INDIRECT1_CAP;
            Self::DoubleIndirect(index / INDIRECT1_COUNT, index % INDIRECT1_COUNT)
        }
    }
}

impl DiskInode {
    #[inline]
    pub fn init(&mut self, parent: u32, is_dir: bool) {
        *self = Self {
            pointers: [NO_SECTOR; POINTER_COUNT],
            length: 0,
            is_dir: is_dir as u32,
            parent,
            magic: INODE_MAGIC,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    /// 使扇区不再能作为 inode 载入
    #[inline]
    pub fn invalidate(&mut self) {
        self.length = 0;
        self.pointers.fill(NO_SECTOR);
        self.magic = 0;
    }

    /// 字节偏移所在的数据扇区；偏移超出文件长度时返回空。
    /// 只读，从不分配。
    pub fn offset_to_sector(&self, offset: usize, cache: &BlockCache) -> Option<u32> {
        if offset >= self.length as usize {
            return None;
        }

        let sector = match Tier::locate(offset / SECTOR_SIZE) {
            Tier::Direct(index) => self.pointers[index],
            Tier::Indirect(index) => cache
                .get(self.pointers[INDIRECT1_SLOT] as usize)
                .lock()
                .map(0, |indirect1: &IndexBlock| indirect1[index]),
            Tier::DoubleIndirect(index2, index1) => {
                let indirect1 = cache
                    .get(self.pointers[INDIRECT2_SLOT] as usize)
                    .lock()
                    .map(0, |indirect2: &IndexBlock| indirect2[index2]);
                cache
                    .get(indirect1 as usize)
                    .lock()
                    .map(0, |indirect1: &IndexBlock| indirect1[index1])
            }
        };

        Some(sector)
    }

    /// 增长到 `larger_length`，`new_sectors` 是一批刚分配的扇区，
    /// 个数恰为 [`DiskInode::count_total_sectors`] 之差。
    ///
    /// 新数据扇区与新索引扇区都会经缓存清零。
    /// 除了 inode 自身所在扇区，任意时刻至多再钉住一个扇区。
    pub fn expand_to(&mut self, larger_length: u32, new_sectors: Vec<u32>, cache: &BlockCache) {
        for &sector in &new_sectors {
            cache.get(sector as usize).lock().zeroize();
        }

        let mut index = Self::count_data_sectors(self.length);
        let end = Self::count_data_sectors(larger_length);
        self.length = larger_length;

        let mut new_sectors = new_sectors.into_iter();
        let mut take = || new_sectors.next().expect("not enough new sectors");

        /******************** 直接索引 ********************/
        while index < end.min(DIRECT_CAP) {
            self.pointers[index] = take();
            index += 1;
        }
        /******************** END ********************/

        if end <= DIRECT_CAP {
            return;
        }

        /******************** 一级索引 ********************/
        // 这次增长经过了DIRECT_CAP，创建一级索引
        if index == DIRECT_CAP {
            self.pointers[INDIRECT1_SLOT] = take();
        }

        if index < INDIRECT1_CAP {
            cache
                .get(self.pointers[INDIRECT1_SLOT] as usize)
                .lock()
                .map_mut(0, |indirect1: &mut IndexBlock| {
                    while index < end.min(INDIRECT1_CAP) {
                        indirect1[index - DIRECT_CAP] = take();
                        index += 1;
                    }
                });
        }
        /******************** END ********************/

        if end <= INDIRECT1_CAP {
            return;
        }

        /******************** 二级索引 ********************/
        // 这次增长经过了INDIRECT1_CAP，创建二级索引
        if index == INDIRECT1_CAP {
            self.pointers[INDIRECT2_SLOT] = take();
        }
        let indirect2 = self.pointers[INDIRECT2_SLOT] as usize;

        while index < end {
            let Tier::DoubleIndirect(index2, mut index1) = Tier::locate(index) else {
                unreachable!();
            };

            // 子块索引为0表示进入新的一级索引扇区
            let indirect1 = if index1 == 0 {
                let indirect1 = take();
                cache
                    .get(indirect2)
                    .lock()
                    .map_mut(0, |indirect2: &mut IndexBlock| indirect2[index2] = indirect1);
                indirect1
            } else {
                cache
                    .get(indirect2)
                    .lock()
                    .map(0, |indirect2: &IndexBlock| indirect2[index2])
            };

            // 一次填满当前一级索引扇区能容纳的部分
            cache
                .get(indirect1 as usize)
                .lock()
                .map_mut(0, |indirect1: &mut IndexBlock| {
                    while index < end && index1 < INDIRECT1_COUNT {
                        indirect1[index1] = take();
                        index1 += 1;
                        index += 1;
                    }
                });
        }
        /******************** END ********************/
    }

    /// 按分配时的顺序列出 inode 占用的全部数据扇区与索引扇区
    pub fn sectors(&self, cache: &BlockCache) -> Vec<u32> {
        let mut sectors: Vec<u32> = Vec::with_capacity(Self::count_total_sectors(self.length));
        let data_sectors = Self::count_data_sectors(self.length);

        /******************** 直接索引 ********************/
        sectors.extend_from_slice(&self.pointers[..data_sectors.min(DIRECT_CAP)]);
        /******************** END ********************/

        if data_sectors <= DIRECT_CAP {
            return sectors;
        }

        /******************** 一级索引 ********************/
        let indirect1 = self.pointers[INDIRECT1_SLOT];
        sectors.push(indirect1);
        cache
            .get(indirect1 as usize)
            .lock()
            .map(0, |indirect1: &IndexBlock| {
                let used = (data_sectors - DIRECT_CAP).min(INDIRECT1_COUNT);
                sectors.extend_from_slice(&indirect1[..used]);
            });
        /******************** END ********************/

        if data_sectors <= INDIRECT1_CAP {
            return sectors;
        }

        /******************** 二级索引 ********************/
        let indirect2 = self.pointers[INDIRECT2_SLOT];
        sectors.push(indirect2);
        let rest = data_sectors - INDIRECT1_CAP;
        // 复制出来，遍历时不必一直钉住二级索引扇区
        let indirect2 = cache
            .get(indirect2 as usize)
            .lock()
            .map(0, |indirect2: &IndexBlock| *indirect2);
        for (index2, &indirect1) in indirect2
            .iter()
            .enumerate()
            .take(rest.div_ceil(INDIRECT1_COUNT))
        {
            sectors.push(indirect1);
            // 只有最后一个一级索引扇区可能没填满
            let used = (rest - index2 * INDIRECT1_COUNT).min(INDIRECT1_COUNT);
            cache
                .get(indirect1 as usize)
                .lock()
                .map(0, |indirect1: &IndexBlock| {
                    sectors.extend_from_slice(&indirect1[..used]);
                });
        }
        /******************** END ********************/

        sectors
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`，返回读出的字节数。
    /// 读到文件末尾时提前结束。
    pub fn read_at(&self, offset: usize, buf: &mut [u8], cache: &BlockCache) -> usize {
        let mut offset = offset;
        // 已读取多少字节
        let mut read_size = 0;

        while read_size < buf.len() {
            let Some(sector) = self.offset_to_sector(offset, cache) else {
                break;
            };
            let chunk_size = self.chunk_size(offset, buf.len() - read_size);

            // 绝对地址 % 扇区大小 = 扇区内偏移
            cache.read(
                sector as usize,
                &mut buf[read_size..read_size + chunk_size],
                offset % SECTOR_SIZE,
            );

            read_size += chunk_size;
            offset += chunk_size;
        }

        read_size
    }

    /// 把`buf`写到指定位置(字节偏移)，返回写入的字节数。
    /// 只写已分配的范围，增长须事先完成。
    pub fn write_at(&self, offset: usize, buf: &[u8], cache: &BlockCache) -> usize {
        let mut offset = offset;
        let mut written_size = 0;

        while written_size < buf.len() {
            let Some(sector) = self.offset_to_sector(offset, cache) else {
                break;
            };
            let chunk_size = self.chunk_size(offset, buf.len() - written_size);

            cache.write(
                sector as usize,
                &buf[written_size..written_size + chunk_size],
                offset % SECTOR_SIZE,
            );

            written_size += chunk_size;
            offset += chunk_size;
        }

        written_size
    }

    /// 计算容纳指定数据量需要多少个**数据扇区**
    #[inline]
    pub fn count_data_sectors(length: u32) -> usize {
        (length as usize).div_ceil(SECTOR_SIZE)
    }

    /// 计算容纳指定数据量需要多少个 **数据扇区** 和 **索引扇区**
    pub fn count_total_sectors(length: u32) -> usize {
        let data_sectors = Self::count_data_sectors(length);
        let mut total = data_sectors;

        // 超出直接索引，使用一级索引扇区
        if data_sectors > DIRECT_CAP {
            total += 1;
        }

        // 超出一级索引，使用二级索引扇区及其下的一级索引扇区
        if data_sectors > INDIRECT1_CAP {
            total += 1 + (data_sectors - INDIRECT1_CAP).div_ceil(INDIRECT1_COUNT);
        }

        total
    }
}

impl DiskInode {
    /// 不跨扇区、不越过文件末尾的最大连续块
    #[inline]
    fn chunk_size(&self, offset: usize, remaining: usize) -> usize {
        let inode_left = self.length as usize - offset;
        let sector_left = SECTOR_SIZE - offset % SECTOR_SIZE;
        remaining.min(inode_left).min(sector_left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries() {
        assert_eq!(Tier::locate(0), Tier::Direct(0));
        assert_eq!(Tier::locate(121), Tier::Direct(121));
        assert_eq!(Tier::locate(122), Tier::Indirect(0));
        assert_eq!(Tier::locate(249), Tier::Indirect(127));
        assert_eq!(Tier::locate(250), Tier::DoubleIndirect(0, 0));
        assert_eq!(Tier::locate(250 + 127), Tier::DoubleIndirect(0, 127));
        assert_eq!(Tier::locate(250 + 128), Tier::DoubleIndirect(1, 0));
        assert_eq!(Tier::locate(MAX_SECTORS - 1), Tier::DoubleIndirect(127, 127));
    }

    #[test]
    #[should_panic]
    fn tier_beyond_max_sectors() {
        Tier::locate(MAX_SECTORS);
    }

    #[test]
    fn max_file_size() {
        assert_eq!(MAX_SECTORS, 122 + 128 + 128 * 128);
        assert_eq!(MAX_FILE_SIZE, 16634 * 512);
    }

    #[test]
    fn count_sectors_with_index_overhead() {
        let s = SECTOR_SIZE as u32;
        assert_eq!(DiskInode::count_total_sectors(0), 0);
        assert_eq!(DiskInode::count_total_sectors(1), 1);
        assert_eq!(DiskInode::count_total_sectors(122 * s), 122);
        assert_eq!(DiskInode::count_total_sectors(122 * s + 1), 124);
        assert_eq!(DiskInode::count_total_sectors(250 * s), 251);
        assert_eq!(DiskInode::count_total_sectors(250 * s + 1), 254);
        assert_eq!(DiskInode::count_total_sectors(378 * s), 253 + 128);
        assert_eq!(DiskInode::count_total_sectors(378 * s + 1), 253 + 128 + 2);
        assert_eq!(
            DiskInode::count_total_sectors(MAX_FILE_SIZE as u32),
            MAX_SECTORS + 2 + 128
        );
    }
}
