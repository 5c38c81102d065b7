use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Disk image file
    #[arg(long, short)]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a fresh image and format it
    Format {
        /// Number of sectors in the image
        #[arg(long, short, default_value_t = 1024)]
        sectors: usize,
    },
    /// Create an empty file of the given size
    Create { size: usize },
    /// Copy a host file into a new file
    Put { source: PathBuf },
    /// Print the contents of a file to stdout
    Cat { header: u32 },
    /// Grow a file by the given number of bytes
    Extend { header: u32, bytes: usize },
    /// Remove a file and free its sectors
    Remove { header: u32 },
    /// Dump a file header, its sectors and its contents
    Show { header: u32 },
    /// Show sector usage of the volume
    Df,
}
