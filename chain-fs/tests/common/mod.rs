#![allow(dead_code)]

use std::sync::Arc;

use block_dev::{BlockDevice, RamDisk};
use chain_fs::Geometry;

/// 直接指针与索引块都只有 4 个槽，便于构造溢出场景
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Small;

impl Geometry for Small {
    const SECTOR_SIZE: usize = 128;
    const NUM_DIRECT: usize = 4;
    const NUM_POINTERS: usize = 4;
}

pub fn ram_disk(sector_size: usize, sectors: usize) -> Arc<dyn BlockDevice> {
    Arc::new(RamDisk::new(sector_size, sectors))
}
