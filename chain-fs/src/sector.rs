//! 扇区编号

use derive_more::{Display, From, Into};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
#[display(fmt = "#{}", _0)]
#[repr(transparent)]
pub struct SectorId(u32);

impl SectorId {
    /// 磁盘上表示“无扇区”的哨兵值，即 `i32` 的 -1
    pub const NONE: Self = Self(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// 哨兵值出现在有效范围内，说明索引结构已损坏
    pub fn validate(self) -> Result<Self> {
        if self.is_null() {
            Err(Error::Corrupted("null pointer inside the used range"))
        } else {
            Ok(self)
        }
    }

    /// 在 [`validate`](Self::validate) 的基础上，要求扇区位于设备的前 `num_sectors` 个扇区之内
    pub fn validate_within(self, num_sectors: usize) -> Result<Self> {
        let id = self.validate()?;
        if id.index() >= num_sectors {
            log::error!("sector {id} lies beyond the {num_sectors} sectors of the device");
            return Err(Error::InvalidSector(id));
        }
        Ok(id)
    }

    /// 链接字段的磁盘编码
    #[inline]
    pub fn encode_link(link: Option<Self>) -> u32 {
        link.unwrap_or(Self::NONE).0
    }

    #[inline]
    pub fn decode_link(raw: u32) -> Option<Self> {
        let id = Self(raw);
        (!id.is_null()).then_some(id)
    }
}
