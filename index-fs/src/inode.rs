//! # 索引节点层
//!
//! 内存中的 inode 句柄与打开 inode 表：
//! 同一扇区上的 inode 同时只存在一个句柄，所有打开者共享其删除标记与禁写计数；
//! 被删除的 inode 要等最后一个打开者关闭时才真正回收扇区。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use spin::Mutex;

use crate::BlockCache;
use crate::Error;
use crate::SectorAllocator;
use crate::layout::{DiskInode, MAX_FILE_SIZE};

pub struct Inode {
    /// inode 所在扇区，也是它的编号
    sector: u32,
    /// 创建后不再改变，打开时读取一次
    is_dir: bool,
    parent: u32,
    state: Mutex<InodeState>,
    cache: Arc<BlockCache>,
    allocator: Arc<dyn SectorAllocator>,
}

#[derive(Debug, Default)]
struct InodeState {
    open_count: usize,
    /// 大于零时拒绝写入
    deny_write_count: usize,
    removed: bool,
}

/// 打开 inode 表
pub struct InodeTable {
    cache: Arc<BlockCache>,
    allocator: Arc<dyn SectorAllocator>,
    opened: Mutex<BTreeMap<u32, Arc<Inode>>>,
}

impl InodeTable {
    pub fn new(cache: Arc<BlockCache>, allocator: Arc<dyn SectorAllocator>) -> Self {
        Self {
            cache,
            allocator,
            opened: Mutex::new(BTreeMap::new()),
        }
    }

    /// 分配一个扇区存放新的 inode，返回该扇区
    pub fn create(&self, length: usize, parent: u32, is_dir: bool) -> Result<u32, Error> {
        let sector = self.allocator.allocate().ok_or(Error::NoSpace)?;

        if let Err(err) = self.create_at(sector, length, parent, is_dir) {
            self.allocator.release(sector);
            return Err(err);
        }

        Ok(sector)
    }

    /// 在已分配的 `sector` 上写入长为 `length` 的新 inode，其数据全部为零。
    ///
    /// 所需的数据扇区与索引扇区一次性分配，失败时全部归还，扇区上不留痕迹。
    pub fn create_at(
        &self,
        sector: u32,
        length: usize,
        parent: u32,
        is_dir: bool,
    ) -> Result<(), Error> {
        if length > MAX_FILE_SIZE {
            return Err(Error::TooLarge);
        }

        let new_sectors = self
            .allocator
            .allocate_many(DiskInode::count_total_sectors(length as u32))?;
        log::debug!(
            "create inode at sector {sector}: {length} bytes, {} sectors",
            new_sectors.len()
        );

        self.cache
            .get(sector as usize)
            .lock()
            .map_mut(0, |disk_inode: &mut DiskInode| {
                disk_inode.init(parent, is_dir);
                disk_inode.expand_to(length as u32, new_sectors, &self.cache);
            });

        Ok(())
    }

    /// 打开扇区上的 inode；已打开则共享同一个句柄
    pub fn open(&self, sector: u32) -> Arc<Inode> {
        let mut opened = self.opened.lock();

        if let Some(inode) = opened.get(&sector) {
            inode.state.lock().open_count += 1;
            return Arc::clone(inode);
        }

        let (is_dir, parent) = self
            .cache
            .get(sector as usize)
            .lock()
            .map(0, |disk_inode: &DiskInode| {
                assert!(disk_inode.is_valid(), "corrupted inode at sector {sector}");
                (disk_inode.is_dir(), disk_inode.parent)
            });

        let inode = Arc::new(Inode {
            sector,
            is_dir,
            parent,
            state: Mutex::new(InodeState {
                open_count: 1,
                ..Default::default()
            }),
            cache: Arc::clone(&self.cache),
            allocator: Arc::clone(&self.allocator),
        });
        opened.insert(sector, Arc::clone(&inode));

        inode
    }

    pub fn reopen(&self, inode: &Arc<Inode>) -> Arc<Inode> {
        let _opened = self.opened.lock();
        inode.state.lock().open_count += 1;
        Arc::clone(inode)
    }

    /// 关闭一次 inode。最后一个打开者关闭时注销句柄，
    /// 若 inode 已被删除，则回收其全部数据扇区、索引扇区与自身所在扇区。
    pub fn close(&self, inode: Arc<Inode>) {
        let mut opened = self.opened.lock();

        let removed = {
            let mut state = inode.state.lock();
            assert!(state.open_count > 0, "close an inode that is not open");
            state.open_count -= 1;
            if state.open_count > 0 {
                return;
            }
            state.removed
        };

        opened.remove(&inode.sector);
        // 持表锁回收，保证之后的打开看不到回收了一半的 inode
        if removed {
            inode.release();
        }
    }

    /// 当前打开着的 inode 个数
    #[inline]
    pub fn opened(&self) -> usize {
        self.opened.lock().len()
    }
}

impl Inode {
    #[inline]
    pub fn sector(&self) -> u32 {
        self.sector
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    #[inline]
    pub fn parent(&self) -> u32 {
        self.parent
    }

    #[inline]
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    /// 文件长度（字节）
    pub fn length(&self) -> usize {
        self.on_disk(|disk_inode| disk_inode.length as usize)
    }

    pub fn offset_to_sector(&self, offset: usize) -> Option<u32> {
        self.on_disk(|disk_inode| disk_inode.offset_to_sector(offset, &self.cache))
    }

    /// 读出数据，读到文件末尾时返回的字节数少于 `buf.len()`
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.on_disk(|disk_inode| disk_inode.read_at(offset, buf, &self.cache))
    }

    /// 写入数据，必要时先增长文件。
    /// 禁写中或增长失败时返回0，不产生任何副作用。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        if self.state.lock().deny_write_count > 0 {
            log::warn!("write to inode {} denied", self.sector);
            return 0;
        }

        let end = offset + buf.len();
        // 只有增长才修改磁盘上的 inode
        if end > self.length() {
            let grown = self.on_disk_mut(|disk_inode| {
                // 持锁重新检查，别的写者可能已经增长过了
                if end > disk_inode.length as usize {
                    self.grow(disk_inode, end)
                } else {
                    Ok(())
                }
            });
            if let Err(err) = grown {
                log::warn!("inode {} fails to grow to {end} bytes: {err:?}", self.sector);
                return 0;
            }
        }

        self.on_disk(|disk_inode| disk_inode.write_at(offset, buf, &self.cache))
    }

    /// 禁止写入，例如 inode 正作为程序映像运行。
    /// 每个打开者至多调用一次。
    pub fn deny_write(&self) {
        let mut state = self.state.lock();
        state.deny_write_count += 1;
        assert!(state.deny_write_count <= state.open_count);
    }

    /// 恢复写入，调用过 [`Inode::deny_write`] 的打开者须在关闭前调用一次
    pub fn allow_write(&self) {
        let mut state = self.state.lock();
        assert!(state.deny_write_count > 0);
        assert!(state.deny_write_count <= state.open_count);
        state.deny_write_count -= 1;
    }

    /// 标记删除，最后一个打开者关闭时回收
    pub fn remove(&self) {
        self.state.lock().removed = true;
    }
}

impl Inode {
    /// 读取对磁盘的映射并处理
    fn on_disk<V>(&self, f: impl FnOnce(&DiskInode) -> V) -> V {
        self.cache
            .get(self.sector as usize)
            .lock()
            .map(0, |disk_inode: &DiskInode| {
                assert!(disk_inode.is_valid(), "corrupted inode at sector {}", self.sector);
                f(disk_inode)
            })
    }

    /// 以某种方式修改对磁盘的映射
    fn on_disk_mut<V>(&self, f: impl FnOnce(&mut DiskInode) -> V) -> V {
        self.cache
            .get(self.sector as usize)
            .lock()
            .map_mut(0, |disk_inode: &mut DiskInode| {
                assert!(disk_inode.is_valid(), "corrupted inode at sector {}", self.sector);
                f(disk_inode)
            })
    }

    fn grow(&self, disk_inode: &mut DiskInode, larger_length: usize) -> Result<(), Error> {
        if larger_length > MAX_FILE_SIZE {
            return Err(Error::TooLarge);
        }

        let new_sectors = DiskInode::count_total_sectors(larger_length as u32)
            - DiskInode::count_total_sectors(disk_inode.length);
        let new_sectors = self.allocator.allocate_many(new_sectors)?;
        log::debug!(
            "inode {} grows from {} to {larger_length} bytes with {} new sectors",
            self.sector,
            disk_inode.length,
            new_sectors.len()
        );

        // 传进去的是一批未初始化扇区的编号
        disk_inode.expand_to(larger_length as u32, new_sectors, &self.cache);
        Ok(())
    }

    fn release(&self) {
        let sectors = self.on_disk_mut(|disk_inode| {
            let sectors = disk_inode.sectors(&self.cache);
            assert_eq!(
                sectors.len(),
                DiskInode::count_total_sectors(disk_inode.length)
            );
            disk_inode.invalidate();
            sectors
        });
        log::debug!(
            "release inode {} with {} sectors",
            self.sector,
            sectors.len()
        );

        for sector in sectors {
            self.allocator.release(sector);
        }
        self.allocator.release(self.sector);
    }
}
