//! # 块设备接口层
//!
//! 块设备是以**扇区**为单位存储数据的设备，
//! [`BlockDevice`] 就是对读写块设备的抽象，实现了此特质的类型称为**块设备驱动**。
//!
//! 读写总是整扇区进行，没有部分读写；越界的扇区号属于致命错误，驱动直接 panic。

#![no_std]

extern crate alloc;

mod ram;

use core::any::Any;
use core::fmt::Debug;

pub use self::ram::RamDisk;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any + Debug {
    /// 读出 `block_id` 号扇区，`buf` 的长度必须等于扇区大小
    fn read_block(&self, block_id: usize, buf: &mut [u8]);

    /// 写入 `block_id` 号扇区，`buf` 的长度必须等于扇区大小
    fn write_block(&self, block_id: usize, buf: &[u8]);

    /// 设备的扇区总数
    fn num_blocks(&self) -> usize;
}
