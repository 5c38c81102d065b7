#![no_std]

extern crate alloc;

/* chain-fs 的整体架构，自上而下 */

// 文件层：按字节读写文件，写越界时自动增长
mod vfs;

// 卷管理层：超级块、空闲扇区位图与保护它的锁
mod cfs;

// 磁盘数据结构层：文件头、索引块、位图
pub mod layout;

mod error;
mod sector;

pub use self::{
    cfs::ChainFileSystem,
    error::{Error, Result},
    layout::{FileHeader, FreeMap, Geometry, IndexBlock, StdGeometry},
    sector::SectorId,
    vfs::File,
};

/// 超级块魔数，"CHFS"
pub const MAGIC: u32 = 0x4348_4653;
