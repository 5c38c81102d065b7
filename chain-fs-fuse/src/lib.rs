
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use block_dev::BlockDevice;
use chain_fs::{Geometry, StdGeometry};

/// 镜像文件的扇区大小
pub const SECTOR_SIZE: usize = StdGeometry::SECTOR_SIZE;

/// 以宿主机上的文件模拟块设备
#[derive(Debug)]
pub struct BlockFile {
    file: Mutex<File>,
    sector_size: usize,
    sectors: usize,
}

impl BlockFile {
    /// 文件长度决定设备的扇区数，不足一个扇区的尾部被忽略
    pub fn new(file: File, sector_size: usize) -> io::Result<Self> {
        let sectors = file.metadata()?.len() as usize / sector_size;
        Ok(Self {
            file: Mutex::new(file),
            sector_size,
            sectors,
        })
    }

    fn seek_to(&self, file: &mut File, block_id: usize, len: usize) {
        assert!(block_id < self.sectors, "sector {block_id} is out of range");
        assert_eq!(len, self.sector_size, "not a complete block!");
        file.seek(SeekFrom::Start((block_id * self.sector_size) as u64))
            .expect("seeking error");
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.file.lock().unwrap();
        self.seek_to(&mut file, block_id, buf.len());
        file.read_exact(buf).expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.file.lock().unwrap();
        self.seek_to(&mut file, block_id, buf.len());
        file.write_all(buf).expect("not a complete block!");
    }

    fn num_blocks(&self) -> usize {
        self.sectors
    }
}
