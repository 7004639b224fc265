use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Number of cache slots
    #[arg(long, global = true, default_value_t = 64)]
    pub capacity: usize,

    /// Milliseconds between two periodic flushes
    #[arg(long, global = true, default_value_t = 1000)]
    pub flush_interval: u64,

    /// Do not read the next sector ahead
    #[arg(long, global = true)]
    pub no_read_ahead: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Format `fs.img` and store every file of the source directory
    Pack {
        /// Source directory
        #[arg(long, short)]
        source: PathBuf,

        /// Output directory
        #[arg(long, short = 'O')]
        out_dir: PathBuf,

        /// Image size in sectors
        #[arg(long, default_value_t = 16 * 2048)]
        sectors: usize,
    },
    /// Print the contents of an inode
    Cat {
        #[arg(long, short)]
        image: PathBuf,

        /// Sector of the inode
        #[arg(long)]
        sector: u32,
    },
    /// Print the length, kind and parent of an inode
    Stat {
        #[arg(long, short)]
        image: PathBuf,

        /// Sector of the inode
        #[arg(long)]
        sector: u32,
    },
}
