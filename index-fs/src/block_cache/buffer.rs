use core::mem;

use block_dev::BlockDevice;

use crate::DataBlock;
use crate::SECTOR_SIZE;

/// 保证缓冲区可以按 `u64` 对齐地解释成磁盘数据结构
#[repr(C, align(8))]
struct Aligned(DataBlock);

/// 内存中的扇区缓冲区
///
/// 只能通过 [`SectorRef::lock`](super::SectorRef::lock) 访问，
/// 访问期间所在槽位一定处于钉住状态。
pub struct Buffer {
    /// 缓存的数据
    data: Aligned,
    /// 是否为脏块
    dirty: bool,
}

impl Buffer {
    pub(super) const fn new() -> Self {
        Self {
            data: Aligned([0; SECTOR_SIZE]),
            dirty: false,
        }
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get<T: Sized>(&self, offset: usize) -> &T {
        Self::check::<T>(offset);
        let addr = self.data.0[offset..].as_ptr().cast::<T>();
        unsafe { &*addr }
    }

    pub fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        Self::check::<T>(offset);
        self.dirty = true;
        let addr = self.data.0[offset..].as_mut_ptr().cast::<T>();
        unsafe { &mut *addr }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    /// 从块内偏移 `offset` 处复制出 `buf.len()` 个字节
    pub fn read(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.data.0[offset..offset + buf.len()]);
    }

    /// 把 `buf` 复制到块内偏移 `offset` 处
    pub fn write(&mut self, offset: usize, buf: &[u8]) {
        self.data.0[offset..offset + buf.len()].copy_from_slice(buf);
        self.dirty = true;
    }

    #[inline]
    pub fn zeroize(&mut self) {
        self.data.0.fill(0);
        self.dirty = true;
    }
}

impl Buffer {
    /// 从设备载入扇区，覆盖缓冲区原有内容
    pub(super) fn load(&mut self, sector: usize, device: &dyn BlockDevice) {
        log::trace!("load sector {sector}");
        device.read_block(sector, &mut self.data.0);
        self.dirty = false;
    }

    /// 脏块写回设备，返回是否发生了写回
    pub(super) fn sync(&mut self, sector: usize, device: &dyn BlockDevice) -> bool {
        if !self.dirty {
            return false;
        }

        log::trace!("write back sector {sector}");
        self.dirty = false;
        device.write_block(sector, &self.data.0);
        true
    }

    fn check<T>(offset: usize) {
        assert!(mem::size_of::<T>() + offset <= SECTOR_SIZE);
        assert_eq!(offset % mem::align_of::<T>(), 0, "misaligned access");
    }
}
