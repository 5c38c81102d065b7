mod cli;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::sync::Arc;

use block_dev::BlockDevice;
use chain_fs::{ChainFileSystem, File, SectorId, StdGeometry};
use chain_fs_fuse::{BlockFile, SECTOR_SIZE};
use clap::Parser;
use cli::{Cli, Command};
use typed_bytesize::ByteSizeIec;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(matches!(cli.command, Command::Format { .. }))
        .truncate(matches!(cli.command, Command::Format { .. }))
        .open(&cli.image)?;
    if let Command::Format { sectors } = cli.command {
        fd.set_len((sectors * SECTOR_SIZE) as u64)?;
    }
    let block_dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd, SECTOR_SIZE)?);

    let cfs = match cli.command {
        Command::Format { sectors } => ChainFileSystem::<StdGeometry>::format(block_dev, sectors),
        _ => ChainFileSystem::open(block_dev),
    };
    let cfs = Arc::new(cfs.map_err(io::Error::other)?);

    match cli.command {
        Command::Format { .. } => {
            println!("formatted {:?}: {} sectors free", cli.image, cfs.num_free());
        }
        Command::Create { size } => {
            let file = File::create(&cfs, size).map_err(io::Error::other)?;
            println!("{}", file.header_sector().index());
        }
        Command::Put { source } => {
            let data = fs::read(&source)?;
            log::info!("source={source:?}, {} bytes", data.len());
            let file = File::create(&cfs, 0).map_err(io::Error::other)?;
            file.write_at(0, &data).map_err(io::Error::other)?;
            println!("{}", file.header_sector().index());
        }
        Command::Cat { header } => {
            let file = File::open(&cfs, SectorId::new(header)).map_err(io::Error::other)?;
            let mut data = vec![0; file.len().map_err(io::Error::other)?];
            file.read_at(0, &mut data).map_err(io::Error::other)?;
            io::stdout().write_all(&data)?;
        }
        Command::Extend { header, bytes } => {
            let header = cfs
                .extend(SectorId::new(header), bytes)
                .map_err(io::Error::other)?;
            println!("{header}");
        }
        Command::Remove { header } => {
            cfs.remove(SectorId::new(header)).map_err(io::Error::other)?;
        }
        Command::Show { header } => show(&cfs, SectorId::new(header))?,
        Command::Df => {
            let total = cfs.total_sectors();
            let free = cfs.num_free();
            let bytes = |sectors: usize| ByteSizeIec((sectors * SECTOR_SIZE) as u64);
            println!("total:    {total:>8} sectors {:>12}", bytes(total));
            println!("reserved: {:>8} sectors", cfs.reserved_sectors());
            println!("used:     {:>8} sectors {:>12}", total - free, bytes(total - free));
            println!("free:     {free:>8} sectors {:>12}", bytes(free));
        }
    }

    Ok(())
}

/// 打印文件头、占用的扇区以及文件内容，不可打印的字节以 `\xx` 显示
fn show(cfs: &Arc<ChainFileSystem>, header_sector: SectorId) -> io::Result<()> {
    let header = cfs.header(header_sector).map_err(io::Error::other)?;
    let footprint = header
        .footprint(cfs.block_device())
        .map_err(io::Error::other)?;

    println!("{header}");
    print!("data sectors:");
    for id in &footprint.data {
        print!(" {}", id.index());
    }
    print!("\nindex blocks:");
    for id in &footprint.index {
        print!(" {}", id.index());
    }
    println!("\ncontents:");

    let mut data = vec![0; header.len()];
    header
        .read_at(0, &mut data, cfs.block_device())
        .map_err(io::Error::other)?;
    let mut out = String::new();
    for chunk in data.chunks(SECTOR_SIZE) {
        for &b in chunk {
            if (b' '..=b'~').contains(&b) {
                out.push(b as char);
            } else {
                out.push_str(&format!("\\{b:x}"));
            }
        }
        out.push('\n');
    }
    print!("{out}");

    Ok(())
}
