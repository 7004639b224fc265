//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟固定数量的槽位，
//! 把即将操作的扇区复制到槽位中，提高对块设备的操作效率。
//!
//! 块缓存层对使用者来说是透明的，使用者对块设备的操作都经过块缓存层，
//! 且**操作扇区时一定在缓冲区当中**：
//!
//! - 取用扇区会**钉住**其槽位，钉住的槽位不会被驱逐；
//! - 缓存满时按时钟算法挑选未钉住的槽位驱逐，脏块先写回；
//! - 写入只标记脏块，由周期性写回或强制写回同步到设备；
//! - 读取扇区时顺带请求预读下一个扇区，由后台任务完成。
//!
//! 目录（扇区映射、时钟指针、驱逐账本、预读队列）由一把全局锁保护，
//! 缓冲区内容由各自槽位的锁保护；设备读写只在槽位锁下进行。

mod buffer;
mod directory;

use alloc::boxed::Box;
use alloc::sync::Arc;

use block_dev::BlockDevice;
use spin::relax::{RelaxStrategy, Spin};
use spin::{Mutex, MutexGuard};

pub use self::buffer::Buffer;
use self::directory::{Directory, Lookup};

type Waker = Box<dyn Fn() + Send + Sync>;

/// 块缓存的配置
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// 槽位个数，不少于 [`CacheConfig::MIN_CAPACITY`]。
    ///
    /// 一次 inode 操作至多同时钉住两个扇区，
    /// 并发的操作越多，需要的槽位越多。
    pub capacity: usize,
    /// 读取扇区时是否请求预读下一个扇区
    pub read_ahead: bool,
    /// 取用扇区需要等待时（扇区正被驱逐、所有槽位都被钉住），
    /// 每次重试前调用，用来让出处理器
    pub relax: fn(),
}

impl CacheConfig {
    pub const CAPACITY: usize = 64;
    /// inode 所在扇区加上一个索引或数据扇区
    pub const MIN_CAPACITY: usize = 2;
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: Self::CAPACITY,
            read_ahead: true,
            relax: <Spin as RelaxStrategy>::relax,
        }
    }
}

/// 扇区缓存
pub struct BlockCache {
    /// 底层块设备的引用
    device: Arc<dyn BlockDevice>,
    entries: Box<[Mutex<Buffer>]>,
    directory: Mutex<Directory>,
    config: CacheConfig,
    /// 预读请求入队时调用，唤醒后台预读任务
    waker: Mutex<Option<Waker>>,
}

/// 被钉住的扇区，存活期间其槽位不会被驱逐
pub struct SectorRef<'a> {
    cache: &'a BlockCache,
    slot: usize,
    sector: usize,
}

impl BlockCache {
    pub fn new(device: Arc<dyn BlockDevice>, config: CacheConfig) -> Self {
        assert!(
            config.capacity >= CacheConfig::MIN_CAPACITY,
            "block cache needs at least {} slots",
            CacheConfig::MIN_CAPACITY
        );
        let entries = (0..config.capacity)
            .map(|_| Mutex::new(Buffer::new()))
            .collect();

        Self {
            device,
            entries,
            directory: Mutex::new(Directory::new(config.capacity)),
            config,
            waker: Mutex::new(None),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// 取用扇区并钉住。
    ///
    /// 未缓存时预留一个空闲或可驱逐的槽位，在槽位锁下写回旧扇区、载入新扇区；
    /// 同时取用同一扇区的其它线程会在槽位锁上等待载入完成，不会重复读设备。
    pub fn get(&self, sector: usize) -> SectorRef<'_> {
        loop {
            let mut directory = self.directory.lock();
            let (slot, victim) = match directory.lookup(sector) {
                Lookup::Hit(slot) => return SectorRef::new(self, slot, sector),
                Lookup::Evicting | Lookup::Exhausted => {
                    drop(directory);
                    (self.config.relax)();
                    continue;
                }
                Lookup::Reserved { slot, victim } => (slot, victim),
            };

            // 预留前槽位无人钉住，也就无人持有其锁；
            // 先上锁再放开目录，保证别人看到的扇区一定是载入完成的
            let mut buffer = self.entries[slot].lock();
            drop(directory);

            if let Some(victim) = victim {
                log::debug!("evict sector {victim} from slot {slot}");
                buffer.sync(victim, &*self.device);
                self.directory.lock().finish_eviction(victim);
            }
            buffer.load(sector, &*self.device);

            return SectorRef::new(self, slot, sector);
        }
    }

    /// 从扇区的 `offset` 处读出 `buf.len()` 个字节，并请求预读下一个扇区
    pub fn read(&self, sector: usize, buf: &mut [u8], offset: usize) {
        self.get(sector).lock().read(offset, buf);

        if self.config.read_ahead {
            self.request_read_ahead(sector + 1);
        }
    }

    /// 把 `buf` 写入扇区的 `offset` 处，只标记脏块，不立即写回
    pub fn write(&self, sector: usize, buf: &[u8], offset: usize) {
        self.get(sector).lock().write(offset, buf);
    }

    /// 把所有脏块写回设备，不驱逐、不改变访问位，返回写回的扇区数
    pub fn flush(&self) -> usize {
        let mut written = 0;

        for slot in 0..self.entries.len() {
            let Some(sector) = self.directory.lock().pin_resident(slot) else {
                continue;
            };
            let sector_ref = SectorRef::new(self, slot, sector);
            if sector_ref.lock().sync(sector, &*self.device) {
                written += 1;
            }
        }

        if written > 0 {
            log::debug!("flushed {written} sectors");
        }
        written
    }

    #[inline]
    pub fn is_resident(&self, sector: usize) -> bool {
        self.directory.lock().is_resident(sector)
    }
}

/* 预读 */
impl BlockCache {
    pub fn set_read_ahead_waker(&self, waker: Option<Waker>) {
        *self.waker.lock() = waker;
    }

    #[inline]
    pub fn pending_read_ahead(&self) -> usize {
        self.directory.lock().pending_read_ahead()
    }

    /// 完成一个预读请求，队列为空时返回 `false`。
    /// 由后台任务反复调用。
    pub fn read_ahead_step(&self) -> bool {
        let Some(sector) = self.directory.lock().next_read_ahead() else {
            return false;
        };

        if !self.is_resident(sector) {
            log::trace!("read ahead sector {sector}");
            drop(self.get(sector));
        }
        true
    }

    fn request_read_ahead(&self, sector: usize) {
        if sector >= self.device.block_count() {
            return;
        }

        let queued = self.directory.lock().queue_read_ahead(sector);
        if queued {
            if let Some(wake) = self.waker.lock().as_ref() {
                wake();
            }
        }
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        self.flush();
    }
}

impl<'a> SectorRef<'a> {
    #[inline]
    fn new(cache: &'a BlockCache, slot: usize, sector: usize) -> Self {
        Self {
            cache,
            slot,
            sector,
        }
    }

    #[inline]
    pub fn sector(&self) -> usize {
        self.sector
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.cache.entries[self.slot].lock()
    }
}

impl Drop for SectorRef<'_> {
    fn drop(&mut self) {
        self.cache.directory.lock().unpin(self.slot);
    }
}
