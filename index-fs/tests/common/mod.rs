#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use index_fs::{BlockDevice, CacheConfig, IndexFileSystem, SECTOR_SIZE};

/// 内存中的块设备，记录每个扇区的读写次数
#[derive(Debug)]
pub struct RamDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
    reads: Vec<AtomicUsize>,
    writes: Vec<AtomicUsize>,
    /// 每次写入落盘前的延迟（毫秒）
    write_delay: AtomicU64,
}

impl RamDisk {
    pub fn new(sectors: usize) -> Arc<Self> {
        Self::filled(sectors, 0)
    }

    /// 用垃圾数据填满，检验新分配的扇区确实被清零
    pub fn filled(sectors: usize, byte: u8) -> Arc<Self> {
        Arc::new(Self {
            sectors: Mutex::new(vec![[byte; SECTOR_SIZE]; sectors]),
            reads: (0..sectors).map(|_| AtomicUsize::new(0)).collect(),
            writes: (0..sectors).map(|_| AtomicUsize::new(0)).collect(),
            write_delay: AtomicU64::new(0),
        })
    }

    pub fn reads_of(&self, sector: usize) -> usize {
        self.reads[sector].load(Ordering::SeqCst)
    }

    pub fn writes_of(&self, sector: usize) -> usize {
        self.writes[sector].load(Ordering::SeqCst)
    }

    pub fn total_reads(&self) -> usize {
        self.reads.iter().map(|n| n.load(Ordering::SeqCst)).sum()
    }

    pub fn total_writes(&self) -> usize {
        self.writes.iter().map(|n| n.load(Ordering::SeqCst)).sum()
    }

    /// 绕过缓存直接查看设备上的内容
    pub fn peek(&self, sector: usize) -> [u8; SECTOR_SIZE] {
        self.sectors.lock().unwrap()[sector]
    }

    /// 让之后的写入变慢：写计数立即增加，数据延迟落盘
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn poke(&self, sector: usize, data: [u8; SECTOR_SIZE]) {
        self.sectors.lock().unwrap()[sector] = data;
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.reads[block_id].fetch_add(1, Ordering::SeqCst);
        buf.copy_from_slice(&self.sectors.lock().unwrap()[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.writes[block_id].fetch_add(1, Ordering::SeqCst);
        let delay = self.write_delay.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        self.sectors.lock().unwrap()[block_id].copy_from_slice(buf);
    }

    fn block_count(&self) -> usize {
        self.reads.len()
    }
}

/// 等待时让出线程的配置，测试中会有多线程争用
pub fn config(capacity: usize) -> CacheConfig {
    CacheConfig {
        capacity,
        read_ahead: false,
        relax: std::thread::yield_now,
    }
}

pub fn format(sectors: usize) -> (Arc<RamDisk>, IndexFileSystem) {
    let disk = RamDisk::filled(sectors, 0xA5);
    let fs = IndexFileSystem::format(disk.clone(), config(CacheConfig::CAPACITY));
    (disk, fs)
}

/// xorshift 伪随机字节
pub fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}
