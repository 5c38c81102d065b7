//! # 文件层
//!
//! 按字节偏移读写文件。偏移先经文件头翻译为扇区，再交给块设备；
//! 写到文件末尾之外时，文件先经 [`ChainFileSystem::extend`] 增长。
//!
//! 同一文件不支持并发写者。

use alloc::sync::Arc;

use crate::layout::{FileHeader, Geometry, StdGeometry};
use crate::{ChainFileSystem, Result, SectorId};

/// 已打开的文件，以文件头所在扇区标识
#[derive(Debug, Clone)]
pub struct File<G: Geometry = StdGeometry> {
    header_sector: SectorId,
    fs: Arc<ChainFileSystem<G>>,
}

impl<G: Geometry> File<G> {
    /// 新建长度为 `bytes` 的文件
    pub fn create(fs: &Arc<ChainFileSystem<G>>, bytes: usize) -> Result<Self> {
        let header_sector = fs.create(bytes)?;
        Ok(Self {
            header_sector,
            fs: fs.clone(),
        })
    }

    pub fn open(fs: &Arc<ChainFileSystem<G>>, header_sector: SectorId) -> Result<Self> {
        // 确认扇区上确实是一个文件头
        fs.header(header_sector)?;
        Ok(Self {
            header_sector,
            fs: fs.clone(),
        })
    }

    #[inline]
    pub fn header_sector(&self) -> SectorId {
        self.header_sector
    }

    #[inline]
    pub fn header(&self) -> Result<FileHeader<G>> {
        self.fs.header(self.header_sector)
    }

    pub fn len(&self) -> Result<usize> {
        self.header().map(|header| header.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.header().map(|header| header.is_empty())
    }

    /// 从 `offset` 处读出数据填充 `buf`，返回读到的字节数；越过文件末尾时读到 0 字节
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.header()?
            .read_at(offset, buf, self.fs.block_device())
    }

    /// 在 `offset` 处写入 `buf`。
    ///
    /// 写入范围超出文件长度时文件先增长，新扇区以零填充，
    /// 因此 `offset` 越过末尾留下的空洞读出来全是零。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        let mut header = self.header()?;
        // 空写入不改变文件长度
        if buf.is_empty() {
            return Ok(0);
        }
        let end = offset.saturating_add(buf.len());
        if end > header.len() {
            header = self.fs.extend(self.header_sector, end - header.len())?;
        }
        header.write_at(offset, buf, self.fs.block_device())
    }

    /// 删除文件并释放它占用的全部扇区
    pub fn remove(self) -> Result<()> {
        self.fs.remove(self.header_sector)
    }
}
