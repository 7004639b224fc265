use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::Range;

use crate::BlockCache;
use crate::Error;
use crate::SECTOR_BITS;

/// 空闲扇区分配器。
///
/// inode 层只把它当作不透明的扇区分配与回收手段，可被并发调用。
pub trait SectorAllocator: Send + Sync {
    /// 分配一个扇区，空间用尽时返回空
    fn allocate(&self) -> Option<u32>;

    fn release(&self, sector: u32);

    /// 一次分配 `count` 个扇区；中途用尽则归还已分配的扇区
    fn allocate_many(&self, count: usize) -> Result<Vec<u32>, Error> {
        let mut sectors = Vec::with_capacity(count);

        for _ in 0..count {
            let Some(sector) = self.allocate() else {
                log::warn!("out of free sectors, roll back {} sectors", sectors.len());
                for sector in sectors {
                    self.release(sector);
                }
                return Err(Error::NoSpace);
            };
            sectors.push(sector);
        }

        Ok(sectors)
    }
}

/// 位图区域内扇区的结构
type BitmapBlock = [u64; SECTOR_BITS / 64];

/// 位图区域，第 i 位记录第 i 个扇区是否已分配
pub struct Bitmap {
    /// 位图的起始扇区
    start_sector: usize,
    /// 位图占用扇区数
    sectors: usize,
    cache: Arc<BlockCache>,
}

/// 扇区在位图中的位置
struct BitPos(u32);

impl Bitmap {
    #[inline]
    pub fn new(start_sector: usize, sectors: usize, cache: Arc<BlockCache>) -> Self {
        Self {
            start_sector,
            sectors,
            cache,
        }
    }

    /// 位图所指示区域的总扇区数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.sectors * SECTOR_BITS
    }

    /// 永久占用一段扇区，格式化时用来保留元数据区与设备之外的位
    pub fn reserve(&self, sectors: Range<usize>) {
        assert!(sectors.end <= self.capacity());
        for sector in sectors {
            let (block_index, group_index, ingroup_index) = BitPos(sector as u32).decode();
            self.cache
                .get(self.start_sector + block_index)
                .lock()
                .map_mut(0, |bitmap_block: &mut BitmapBlock| {
                    bitmap_block[group_index] |= 1 << ingroup_index;
                });
        }
    }

    pub fn is_free(&self, sector: u32) -> bool {
        self.check(sector);
        let (block_index, group_index, ingroup_index) = BitPos(sector).decode();
        self.cache
            .get(self.start_sector + block_index)
            .lock()
            .map(0, |bitmap_block: &BitmapBlock| {
                bitmap_block[group_index] & (1 << ingroup_index) == 0
            })
    }

    pub fn count_free(&self) -> usize {
        (0..self.sectors)
            .map(|block_index| {
                self.cache
                    .get(self.start_sector + block_index)
                    .lock()
                    .map(0, |bitmap_block: &BitmapBlock| {
                        bitmap_block
                            .iter()
                            .map(|bits| bits.count_zeros() as usize)
                            .sum::<usize>()
                    })
            })
            .sum()
    }
}

impl Bitmap {
    #[inline]
    fn check(&self, sector: u32) {
        assert!(
            (sector as usize) < self.capacity(),
            "sector {sector} beyond the bitmap"
        );
    }
}

impl SectorAllocator for Bitmap {
    /// 在指示区域内分配编号最小的空闲扇区
    fn allocate(&self) -> Option<u32> {
        // 遍历位图区域内所有的扇区，寻找还有剩余空间的bit组(即还有0)；
        // 位的修改在扇区锁下进行，并发分配不会拿到同一位
        for block_index in 0..self.sectors {
            let sector_ref = self.cache.get(self.start_sector + block_index);
            let mut buffer = sector_ref.lock();

            let found = buffer.map(0, |bitmap_block: &BitmapBlock| {
                bitmap_block
                    .iter()
                    .enumerate()
                    .find_map(|(group_index, &bits)| {
                        (bits != u64::MAX).then_some((group_index, bits.trailing_ones()))
                    })
            });
            let Some((group_index, ingroup_index)) = found else {
                continue;
            };

            // 追加新位
            buffer.map_mut(0, |bitmap_block: &mut BitmapBlock| {
                bitmap_block[group_index] |= 1 << ingroup_index;
            });
            return Some(BitPos::encode(
                block_index,
                group_index,
                ingroup_index as usize,
            ));
        }

        None
    }

    fn release(&self, sector: u32) {
        self.check(sector);
        let (block_index, group_index, ingroup_index) = BitPos(sector).decode();
        self.cache
            .get(self.start_sector + block_index)
            .lock()
            .map_mut(0, |bitmap_block: &mut BitmapBlock| {
                // 编号一定得有对应的位
                assert_ne!(
                    bitmap_block[group_index] & (1 << ingroup_index),
                    0,
                    "release a free sector {sector}"
                );
                bitmap_block[group_index] &= !(1 << ingroup_index);
            });
    }
}

impl BitPos {
    /// 线性映射编码得到扇区号
    #[inline]
    fn encode(block_index: usize, group_index: usize, ingroup_index: usize) -> u32 {
        (block_index * SECTOR_BITS + group_index * 64 + ingroup_index) as u32
    }

    fn decode(self) -> (usize, usize, usize) {
        let mut sector = self.0 as usize;

        let block_index = sector / SECTOR_BITS;
        sector %= SECTOR_BITS;
        (block_index, sector / 64, sector % 64)
    }
}
