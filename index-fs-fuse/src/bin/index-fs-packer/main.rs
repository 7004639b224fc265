mod cli;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use index_fs::{CacheConfig, IndexFileSystem, SECTOR_SIZE};
use index_fs_fuse::{BlockFile, CacheDaemon};

use self::cli::{Cli, Command};

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    if cli.capacity < CacheConfig::MIN_CAPACITY {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("--capacity must be at least {}", CacheConfig::MIN_CAPACITY),
        ));
    }
    let config = CacheConfig {
        capacity: cli.capacity,
        read_ahead: !cli.no_read_ahead,
        relax: std::thread::yield_now,
    };
    let flush_interval = Duration::from_millis(cli.flush_interval);

    match cli.command {
        Command::Pack {
            source,
            out_dir,
            sectors,
        } => pack(&source, &out_dir, sectors, config, flush_interval),
        Command::Cat { image, sector } => {
            let fs = IndexFileSystem::mount(open_image(&image)?, config);
            let inode = fs.inodes().open(sector);

            let mut data = vec![0; inode.length()];
            inode.read_at(0, &mut data);
            fs.inodes().close(inode);

            io::stdout().write_all(&data)
        }
        Command::Stat { image, sector } => {
            let fs = IndexFileSystem::mount(open_image(&image)?, config);
            let inode = fs.inodes().open(sector);

            println!("sector={sector}");
            println!("length={}", inode.length());
            println!("kind={}", if inode.is_dir() { "dir" } else { "file" });
            println!("parent={}", inode.parent());
            fs.inodes().close(inode);

            Ok(())
        }
    }
}

fn pack(
    source: &Path,
    out_dir: &Path,
    sectors: usize,
    config: CacheConfig,
    flush_interval: Duration,
) -> io::Result<()> {
    println!("source={source:?}\nout_dir={out_dir:?}");

    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(out_dir.join("fs.img"))?;
    fd.set_len((sectors * SECTOR_SIZE) as u64)?;

    let fs = IndexFileSystem::format(Arc::new(BlockFile::new(fd)?), config);
    let daemon = CacheDaemon::spawn(Arc::clone(fs.cache()), flush_interval)?;
    let root = fs.root_sector();

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let mut data = Vec::new();
        File::open(entry.path())?.read_to_end(&mut data)?;

        let sector = fs.inodes().create(0, root, false).map_err(io::Error::other)?;
        let inode = fs.inodes().open(sector);
        let written = inode.write_at(0, &data);
        fs.inodes().close(inode);
        if written != data.len() {
            return Err(io::Error::other(format!(
                "no room for {:?} ({} bytes)",
                entry.file_name(),
                data.len()
            )));
        }

        log::info!("file={:?}", entry.file_name());
        println!("{:?}: sector {sector}", entry.file_name());
    }

    daemon.shutdown();
    Ok(())
}

fn open_image(image: &Path) -> io::Result<Arc<BlockFile>> {
    let fd = OpenOptions::new().read(true).write(true).open(image)?;
    Ok(Arc::new(BlockFile::new(fd)?))
}
