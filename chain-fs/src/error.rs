use derive_more::Display;

use crate::SectorId;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Error {
    /// 空闲扇区不足，操作未产生任何副作用，可由调用者决定如何处理
    #[display(fmt = "out of space: {} sectors needed, {} free", needed, free)]
    OutOfSpace { needed: usize, free: usize },

    #[display(fmt = "offset {} is outside a file of {} bytes", offset, len)]
    OffsetOutOfRange { offset: usize, len: usize },

    #[display(fmt = "corrupted index structure: {}", _0)]
    Corrupted(&'static str),

    /// 扇区号不属于本卷
    #[display(fmt = "sector {} is not on this volume", _0)]
    InvalidSector(SectorId),

    #[display(fmt = "sector {} is already free", _0)]
    DoubleFree(SectorId),

    #[display(fmt = "file header already owns sectors")]
    AlreadyAllocated,

    #[display(fmt = "file length overflows the header")]
    FileTooLarge,

    #[display(fmt = "bad superblock magic")]
    BadMagic,

    #[display(fmt = "device has {} sectors, {} requested", available, requested)]
    DeviceTooSmall { available: usize, requested: usize },
}

impl Error {
    /// 致命错误意味着磁盘上的不变式已被破坏，继续操作可能导致文件间扇区混用
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OffsetOutOfRange { .. }
                | Self::Corrupted(_)
                | Self::InvalidSector(_)
                | Self::DoubleFree(_)
        )
    }
}

impl core::error::Error for Error {}
