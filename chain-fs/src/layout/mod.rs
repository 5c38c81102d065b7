//! # 磁盘数据结构层
//!
//! chain-fs 的磁盘布局：
//! 超级块 | 空闲扇区位图 | 文件头与数据扇区（混合分配）
//!
//! 所有记录都恰好占据一个扇区，字段定宽、按位置排列、小端序，
//! 指针宽度为 4 字节，哨兵值 [`SectorId::NONE`](crate::SectorId::NONE) 表示“无扇区”。

mod bitmap;
mod chain;
mod file_header;
mod index_block;
mod super_block;

pub use self::{
    bitmap::FreeMap,
    chain::{ChainLink, ChainWalk},
    file_header::{FileHeader, Footprint},
    index_block::IndexBlock,
    super_block::SuperBlock,
};

use core::fmt::Debug;

/// 一个扇区编号在磁盘上占的字节数
pub const POINTER_BYTES: usize = 4;

/// 文件头中指针表之前的定长字段：字节长度、扇区数、溢出链表头
pub const HEADER_FIXED_WORDS: usize = 3;

/// 扇区几何参数，全部在编译期确定
pub trait Geometry: Debug + Clone + Copy + PartialEq + Eq + Default + Send + Sync + 'static {
    /// 扇区字节数
    const SECTOR_SIZE: usize;
    /// 文件头内直接指针的个数（D）
    const NUM_DIRECT: usize;
    /// 每个索引块内数据指针的个数（P）
    const NUM_POINTERS: usize;
}

/// 默认几何：128 字节扇区，指针表填满整个扇区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StdGeometry;

impl Geometry for StdGeometry {
    const SECTOR_SIZE: usize = 128;
    const NUM_DIRECT: usize = Self::SECTOR_SIZE / POINTER_BYTES - HEADER_FIXED_WORDS;
    // 最后一个字留给后继链接
    const NUM_POINTERS: usize = Self::SECTOR_SIZE / POINTER_BYTES - 1;
}

/// 读出扇区内第 `index` 个字
#[inline]
fn read_word(sector: &[u8], index: usize) -> u32 {
    let mut raw = [0; POINTER_BYTES];
    raw.copy_from_slice(&sector[index * POINTER_BYTES..(index + 1) * POINTER_BYTES]);
    u32::from_le_bytes(raw)
}

#[inline]
fn write_word(sector: &mut [u8], index: usize, word: u32) {
    sector[index * POINTER_BYTES..(index + 1) * POINTER_BYTES].copy_from_slice(&word.to_le_bytes());
}
