use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use index_fs::{BlockCache, BlockDevice, CacheConfig, IndexFileSystem, SECTOR_SIZE};

use crate::{BlockFile, CacheDaemon};

/// 临时镜像，离开作用域时删除
struct Image(PathBuf);

impl Image {
    fn new(name: &str, sectors: usize) -> Self {
        let path = std::env::temp_dir().join(format!(
            "index-fs-{}-{name}.img",
            std::process::id()
        ));
        let file = File::create(&path).unwrap();
        file.set_len((sectors * SECTOR_SIZE) as u64).unwrap();
        Self(path)
    }

    fn open(&self) -> Arc<BlockFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.0)
            .unwrap();
        Arc::new(BlockFile::new(file).unwrap())
    }

    fn sector(&self, sector: usize) -> Vec<u8> {
        let bytes = fs::read(&self.0).unwrap();
        bytes[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE].to_vec()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

fn config(read_ahead: bool) -> CacheConfig {
    CacheConfig {
        capacity: 8,
        read_ahead,
        relax: thread::yield_now,
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn block_file_round_trip() {
    let image = Image::new("round-trip", 4);
    let device = image.open();
    assert_eq!(device.block_count(), 4);

    let block = [0x5a; SECTOR_SIZE];
    device.write_block(2, &block);

    let mut buf = [0; SECTOR_SIZE];
    device.read_block(2, &mut buf);
    assert_eq!(buf, block);
    assert_eq!(image.sector(2), block);
    assert!(image.sector(1).iter().all(|&b| b == 0));
}

#[test]
fn block_file_rejects_partial_sector() {
    let path = std::env::temp_dir().join(format!("index-fs-{}-partial.img", std::process::id()));
    let file = File::create(&path).unwrap();
    file.set_len(SECTOR_SIZE as u64 + 1).unwrap();

    let file = OpenOptions::new().read(true).open(&path).unwrap();
    assert!(BlockFile::new(file).is_err());
    fs::remove_file(&path).unwrap();
}

#[test]
fn daemon_flushes_periodically() {
    let image = Image::new("periodic", 16);
    let cache = Arc::new(BlockCache::new(image.open(), config(false)));
    let daemon = CacheDaemon::spawn(Arc::clone(&cache), Duration::from_millis(20)).unwrap();

    cache.write(3, b"periodic", 0);
    assert!(wait_until(|| image.sector(3).starts_with(b"periodic")));

    daemon.shutdown();
}

#[test]
fn daemon_shutdown_flushes() {
    let image = Image::new("shutdown", 16);
    let cache = Arc::new(BlockCache::new(image.open(), config(false)));
    let daemon = CacheDaemon::spawn(Arc::clone(&cache), Duration::from_secs(3600)).unwrap();

    cache.write(5, b"on shutdown", 0);
    assert_eq!(daemon.shutdown(), 1);
    assert!(image.sector(5).starts_with(b"on shutdown"));
}

#[test]
fn daemon_serves_read_ahead() {
    let image = Image::new("read-ahead", 16);
    let cache = Arc::new(BlockCache::new(image.open(), config(true)));
    let _daemon = CacheDaemon::spawn(Arc::clone(&cache), Duration::from_secs(3600)).unwrap();

    cache.read(6, &mut [0; 1], 0);
    assert!(wait_until(|| cache.is_resident(7)));
    assert!(wait_until(|| cache.pending_read_ahead() == 0));
}

#[test]
fn file_system_on_image() {
    let image = Image::new("fs", 1024);
    let sector = {
        let fs = IndexFileSystem::format(image.open(), config(true));
        let daemon = CacheDaemon::spawn(Arc::clone(fs.cache()), Duration::from_millis(10)).unwrap();

        let sector = fs.inodes().create(0, fs.root_sector(), false).unwrap();
        let inode = fs.inodes().open(sector);
        assert_eq!(inode.write_at(0, &[0x42; 3 * SECTOR_SIZE]), 3 * SECTOR_SIZE);
        fs.inodes().close(inode);

        daemon.shutdown();
        sector
    };

    let fs = IndexFileSystem::mount(image.open(), config(true));
    let inode = fs.inodes().open(sector);
    assert_eq!(inode.length(), 3 * SECTOR_SIZE);
    let mut buf = vec![0; 3 * SECTOR_SIZE];
    assert_eq!(inode.read_at(0, &mut buf), 3 * SECTOR_SIZE);
    assert!(buf.iter().all(|&b| b == 0x42));
    fs.inodes().close(inode);
}
