//! 宿主机上的 index-fs：以普通文件充当块设备，并用后台线程完成周期写回与预读。

#[cfg(test)]
mod tests;

mod daemon;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use block_dev::BlockDevice;
use index_fs::SECTOR_SIZE;

pub use self::daemon::CacheDaemon;

/// 以文件为后端的块设备，文件长度须是扇区大小的整数倍
#[derive(Debug)]
pub struct BlockFile {
    file: Mutex<File>,
    sectors: usize,
}

impl BlockFile {
    pub fn new(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len() as usize;
        if len % SECTOR_SIZE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("image size {len} is not a multiple of {SECTOR_SIZE}"),
            ));
        }

        Ok(Self {
            file: Mutex::new(file),
            sectors: len / SECTOR_SIZE,
        })
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        file.read_exact(&mut buf[..SECTOR_SIZE])
            .expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        file.write_all(&buf[..SECTOR_SIZE])
            .expect("not a complete block!");
    }

    fn block_count(&self) -> usize {
        self.sectors
    }
}
