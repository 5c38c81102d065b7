use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::BlockDevice;

/// 内存盘：以一段连续内存模拟块设备
#[derive(Debug)]
pub struct RamDisk {
    sector_size: usize,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(sector_size: usize, sectors: usize) -> Self {
        Self {
            sector_size,
            data: Mutex::new(vec![0; sector_size * sectors]),
        }
    }

    #[inline]
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// 扇区在内存中的字节范围
    fn span(&self, block_id: usize, len: usize) -> core::ops::Range<usize> {
        assert!(
            block_id < self.num_blocks(),
            "sector {block_id} is out of range"
        );
        assert_eq!(len, self.sector_size, "not a complete sector!");

        let start = block_id * self.sector_size;
        start..start + self.sector_size
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let span = self.span(block_id, buf.len());
        buf.copy_from_slice(&self.data.lock()[span]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let span = self.span(block_id, buf.len());
        self.data.lock()[span].copy_from_slice(buf);
    }

    #[inline]
    fn num_blocks(&self) -> usize {
        self.data.lock().len() / self.sector_size
    }
}
