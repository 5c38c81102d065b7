use super::{read_word, write_word};
use crate::MAGIC;

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 定位空闲扇区位图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    /// 文件系统占据扇区数
    pub total_sectors: u32,
    /// 位图占据扇区数，位图紧跟在超级块之后
    pub map_sectors: u32,
}

impl SuperBlock {
    #[inline]
    pub fn new(total_sectors: u32, map_sectors: u32) -> Self {
        Self {
            magic: MAGIC,
            total_sectors,
            map_sectors,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    pub fn decode(sector: &[u8]) -> Self {
        Self {
            magic: read_word(sector, 0),
            total_sectors: read_word(sector, 1),
            map_sectors: read_word(sector, 2),
        }
    }

    pub fn encode(&self, sector: &mut [u8]) {
        sector.fill(0);
        write_word(sector, 0, self.magic);
        write_word(sector, 1, self.total_sectors);
        write_word(sector, 2, self.map_sectors);
    }
}
