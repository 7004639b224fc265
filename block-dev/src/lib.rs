//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 驱动的读写是同步的，且以整块为单位：要么整块完成，要么直接恐慌，
//! 不存在部分传输。

#![no_std]

use core::fmt::Debug;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Debug {
    fn read_block(&self, block_id: usize, buf: &mut [u8]);
    fn write_block(&self, block_id: usize, buf: &[u8]);
    /// 设备的总块数
    fn block_count(&self) -> usize;
}
