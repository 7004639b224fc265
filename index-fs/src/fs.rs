//! # 文件系统层
//!
//! 构建出磁盘的布局并使用：格式化、挂载，以及卸载时的强制写回。

use alloc::sync::Arc;

use block_dev::BlockDevice;

use crate::SECTOR_BITS;
use crate::layout::{Bitmap, SectorAllocator, SuperBlock};
use crate::{BlockCache, CacheConfig, InodeTable};

pub struct IndexFileSystem {
    cache: Arc<BlockCache>,
    free_map: Arc<Bitmap>,
    inodes: InodeTable,
    root_sector: u32,
}

impl IndexFileSystem {
    /// 在整个设备上建立新的文件系统
    pub fn format(device: Arc<dyn BlockDevice>, config: CacheConfig) -> Self {
        let total_sectors = device.block_count();
        let bitmap_sectors = total_sectors.div_ceil(SECTOR_BITS);
        let metadata_sectors = SuperBlock::BITMAP_START as usize + bitmap_sectors;
        assert!(
            metadata_sectors < total_sectors,
            "device too small: {total_sectors} sectors"
        );

        let cache = Arc::new(BlockCache::new(device, config));
        for sector in 0..metadata_sectors {
            cache.get(sector).lock().zeroize();
        }

        let free_map = Arc::new(Bitmap::new(
            SuperBlock::BITMAP_START as usize,
            bitmap_sectors,
            Arc::clone(&cache),
        ));
        // 元数据区与设备之外的位永不分配
        free_map.reserve(0..metadata_sectors);
        free_map.reserve(total_sectors..free_map.capacity());

        let inodes = InodeTable::new(Arc::clone(&cache), free_map.clone());
        // 根目录是自己的父目录
        let root_sector = free_map
            .allocate()
            .expect("no room for the root directory");
        inodes
            .create_at(root_sector, 0, root_sector, true)
            .expect("an empty root directory needs no data sectors");

        cache
            .get(0)
            .lock()
            .map_mut(0, |super_block: &mut SuperBlock| {
                super_block.init(total_sectors as u32, bitmap_sectors as u32, root_sector)
            });
        cache.flush();
        log::info!(
            "format {total_sectors} sectors: {bitmap_sectors} bitmap sectors, root at {root_sector}"
        );

        Self {
            cache,
            free_map,
            inodes,
            root_sector,
        }
    }

    /// 挂载设备上已有的文件系统
    pub fn mount(device: Arc<dyn BlockDevice>, config: CacheConfig) -> Self {
        let cache = Arc::new(BlockCache::new(device, config));

        let (bitmap_sectors, root_sector) =
            cache.get(0).lock().map(0, |super_block: &SuperBlock| {
                assert!(super_block.is_valid(), "error when loading index-fs");
                (super_block.bitmap_sectors, super_block.root_sector)
            });

        let free_map = Arc::new(Bitmap::new(
            SuperBlock::BITMAP_START as usize,
            bitmap_sectors as usize,
            Arc::clone(&cache),
        ));
        let inodes = InodeTable::new(Arc::clone(&cache), free_map.clone());

        Self {
            cache,
            free_map,
            inodes,
            root_sector,
        }
    }

    #[inline]
    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    #[inline]
    pub fn free_map(&self) -> &Arc<Bitmap> {
        &self.free_map
    }

    #[inline]
    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    #[inline]
    pub fn root_sector(&self) -> u32 {
        self.root_sector
    }

    /// 强制写回所有脏块
    #[inline]
    pub fn sync(&self) -> usize {
        self.cache.flush()
    }
}
