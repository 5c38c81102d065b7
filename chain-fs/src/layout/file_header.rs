//! 文件头，即 inode
//!
//! 文件头记录文件的字节长度与扇区数，前 `D` 个数据扇区直接存放在头中，
//! 之后的数据扇区由一条索引块链表接续：
//!
//! ```text
//! FileHeader                 IndexBlock               IndexBlock
//! +------------+            +-----------+            +-----------+
//! | direct[D]  |  overflow  | ptrs[P]   |    next    | ptrs[P]   |   next
//! | ...        | ---------> | next      | ---------> | next      | ---> NONE
//! +------------+            +-----------+            +-----------+
//! ```
//!
//! 除最后一块外，索引块总是被填满的；文件增长时先填满最后一块的空槽，再追加新块。
//! 因此占用的索引块数恒为 `ceil(max(0, n - D) / P)`，`n` 为数据扇区数。

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;

use block_dev::BlockDevice;

use super::{
    ChainWalk, FreeMap, Geometry, HEADER_FIXED_WORDS, IndexBlock, POINTER_BYTES, StdGeometry,
    read_word, write_word,
};
use crate::{Error, Result, SectorId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader<G: Geometry = StdGeometry> {
    /// 文件的字节长度
    byte_len: u32,
    /// 数据扇区数，恒等于 `ceil(byte_len / SECTOR_SIZE)`
    sector_count: u32,
    /// 第一个索引块，当且仅当 `sector_count > D` 时存在
    overflow: Option<SectorId>,
    /// 直接指针，未使用的槽为 [`SectorId::NONE`]
    direct: Box<[SectorId]>,
    _geometry: PhantomData<G>,
}

/// 文件占用的全部扇区
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footprint {
    /// 数据扇区，按文件顺序
    pub data: Vec<SectorId>,
    /// 索引块扇区，按链表顺序
    pub index: Vec<SectorId>,
}

impl Footprint {
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() + self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = SectorId> + '_ {
        self.data.iter().chain(&self.index).copied()
    }
}

impl<G: Geometry> FileHeader<G> {
    const FITS_IN_SECTOR: () = assert!(
        (HEADER_FIXED_WORDS + G::NUM_DIRECT) * POINTER_BYTES <= G::SECTOR_SIZE,
        "file header must fit in one sector"
    );

    /// 空文件：长度为零，不占有任何扇区
    pub fn new() -> Self {
        let () = Self::FITS_IN_SECTOR;

        Self {
            byte_len: 0,
            sector_count: 0,
            overflow: None,
            direct: vec![SectorId::NONE; G::NUM_DIRECT].into_boxed_slice(),
            _geometry: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.byte_len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.byte_len == 0
    }

    #[inline]
    pub fn sector_count(&self) -> usize {
        self.sector_count as usize
    }

    #[inline]
    pub fn overflow(&self) -> Option<SectorId> {
        self.overflow
    }

    /// 整张直接指针表，包括未使用的槽
    #[inline]
    pub fn direct(&self) -> &[SectorId] {
        &self.direct
    }

    /// 计算容纳指定数据量需要多少个**数据扇区**
    #[inline]
    pub fn sectors_for(bytes: usize) -> usize {
        bytes.div_ceil(G::SECTOR_SIZE)
    }

    /// 计算 `sectors` 个数据扇区需要多少个**索引块**
    #[inline]
    pub fn index_blocks_for(sectors: usize) -> usize {
        sectors
            .saturating_sub(G::NUM_DIRECT)
            .div_ceil(G::NUM_POINTERS)
    }

    /// 计算 `sectors` 个数据扇区连同索引块一共要占用多少扇区
    #[inline]
    pub fn total_sectors(sectors: usize) -> usize {
        sectors + Self::index_blocks_for(sectors)
    }

    /// 为新建的文件分配 `bytes` 字节的空间。
    ///
    /// 空闲扇区不足时返回 [`Error::OutOfSpace`]，文件头与位图都保持原样。
    pub fn allocate(
        &mut self,
        bytes: usize,
        free_map: &mut FreeMap<G>,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<()> {
        if self.byte_len != 0 || self.sector_count != 0 || self.overflow.is_some() {
            return Err(Error::AlreadyAllocated);
        }

        self.grow_to(bytes, free_map, block_device)?;
        log::debug!(
            "allocated {bytes} bytes: {} data sectors, {} index blocks",
            self.sector_count,
            Self::index_blocks_for(self.sector_count())
        );
        Ok(())
    }

    /// 文件增长 `extra` 字节，已有的扇区及其内容不受影响。
    ///
    /// 与 [`allocate`](Self::allocate) 一样，失败时不产生任何副作用。
    pub fn add_length(
        &mut self,
        extra: usize,
        free_map: &mut FreeMap<G>,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<()> {
        let larger_size = self.len().checked_add(extra).ok_or(Error::FileTooLarge)?;
        let old_sectors = self.sector_count;

        self.grow_to(larger_size, free_map, block_device)?;
        log::debug!(
            "grew by {extra} bytes to {}: {old_sectors} -> {} sectors",
            self.byte_len,
            self.sector_count
        );
        Ok(())
    }

    /// 释放文件占有的全部扇区：数据扇区与索引块本身。
    ///
    /// 所有扇区先整体校验（属于本卷、处于占用状态、未被重复引用），通过后才逐个释放，
    /// 校验失败时位图保持原样。成功后文件头回到空文件状态。
    pub fn deallocate(
        &mut self,
        free_map: &mut FreeMap<G>,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<()> {
        let footprint = self.footprint(block_device)?;

        let mut seen = BTreeSet::new();
        for id in footprint.iter() {
            if !free_map.contains(id) {
                log::error!("file references sector {id} outside the volume");
                return Err(Error::InvalidSector(id));
            }
            if !seen.insert(id) {
                log::error!("file references sector {id} twice");
                return Err(Error::Corrupted("sector referenced twice by one file"));
            }
            // 将要释放的扇区一定处于占用状态
            if !free_map.test(id) {
                log::error!("sector {id} is owned by a file but marked free");
                return Err(Error::DoubleFree(id));
            }
        }

        for id in footprint.iter() {
            free_map.clear(id)?;
        }
        log::debug!(
            "released {} data sectors and {} index blocks",
            footprint.data.len(),
            footprint.index.len()
        );

        *self = Self::new();
        Ok(())
    }

    /// 把文件内的字节偏移翻译为存放它的扇区
    pub fn byte_to_sector(
        &self,
        offset: usize,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<SectorId> {
        if offset >= self.len() {
            return Err(Error::OffsetOutOfRange {
                offset,
                len: self.len(),
            });
        }

        let sector_index = offset / G::SECTOR_SIZE;
        if sector_index < G::NUM_DIRECT {
            return self.direct[sector_index].validate_within(block_device.num_blocks());
        }

        // 剔去直接指针的部分
        let index = sector_index - G::NUM_DIRECT;
        let target = index / G::NUM_POINTERS;
        for (i, link) in self.chain(block_device).enumerate() {
            let link = link?;
            if i == target {
                return link
                    .block
                    .pointer(index % G::NUM_POINTERS)
                    .validate_within(block_device.num_blocks());
            }
        }

        Err(Error::Corrupted("index chain ends early"))
    }

    /// 收集文件占用的全部扇区
    pub fn footprint(&self, block_device: &Arc<dyn BlockDevice>) -> Result<Footprint> {
        let mut footprint = Footprint {
            data: Vec::with_capacity(self.sector_count()),
            index: Vec::with_capacity(Self::index_blocks_for(self.sector_count())),
        };
        let num_sectors = block_device.num_blocks();

        for &id in &self.direct[..self.sector_count().min(G::NUM_DIRECT)] {
            footprint.data.push(id.validate_within(num_sectors)?);
        }
        for link in self.chain(block_device) {
            let link = link?;
            footprint.index.push(link.sector);
            for &id in link.pointers() {
                footprint.data.push(id.validate_within(num_sectors)?);
            }
        }

        Ok(footprint)
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`，读到文件末尾为止
    pub fn read_at(
        &self,
        offset: usize,
        buf: &mut [u8],
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<usize> {
        let mut start = offset;
        let end = offset.saturating_add(buf.len()).min(self.len());
        if start >= end {
            return Ok(0);
        }

        let mut sector = vec![0; G::SECTOR_SIZE];
        let mut read_size = 0;
        while start < end {
            // 当前扇区的末地址(字节)
            let current_end = ((start / G::SECTOR_SIZE + 1) * G::SECTOR_SIZE).min(end);
            let size = current_end - start;
            let inner = start % G::SECTOR_SIZE;

            let id = self.byte_to_sector(start, block_device)?;
            block_device.read_block(id.index(), &mut sector);
            buf[read_size..read_size + size].copy_from_slice(&sector[inner..inner + size]);

            read_size += size;
            start = current_end;
        }

        Ok(read_size)
    }

    /// 在文件现有长度之内写入`buf`，超出长度的部分被截去
    pub fn write_at(
        &self,
        offset: usize,
        buf: &[u8],
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<usize> {
        if offset > self.len() {
            return Err(Error::OffsetOutOfRange {
                offset,
                len: self.len(),
            });
        }

        let mut start = offset;
        let end = offset.saturating_add(buf.len()).min(self.len());
        let mut sector = vec![0; G::SECTOR_SIZE];
        let mut written_size = 0;
        while start < end {
            let current_end = ((start / G::SECTOR_SIZE + 1) * G::SECTOR_SIZE).min(end);
            let size = current_end - start;
            let inner = start % G::SECTOR_SIZE;

            let id = self.byte_to_sector(start, block_device)?;
            // 整扇区覆盖时无需先读
            if size < G::SECTOR_SIZE {
                block_device.read_block(id.index(), &mut sector);
            }
            sector[inner..inner + size].copy_from_slice(&buf[written_size..written_size + size]);
            block_device.write_block(id.index(), &sector);

            written_size += size;
            start = current_end;
        }

        Ok(written_size)
    }

    pub fn decode(sector: &[u8]) -> Result<Self> {
        let mut header = Self::new();
        header.byte_len = read_word(sector, 0);
        header.sector_count = read_word(sector, 1);
        header.overflow = SectorId::decode_link(read_word(sector, 2));
        for (i, pointer) in header.direct.iter_mut().enumerate() {
            *pointer = SectorId::new(read_word(sector, HEADER_FIXED_WORDS + i));
        }

        if header.sector_count() != Self::sectors_for(header.len()) {
            return Err(Error::Corrupted("sector count disagrees with byte length"));
        }
        if header.overflow.is_some() != (header.sector_count() > G::NUM_DIRECT) {
            return Err(Error::Corrupted("overflow link disagrees with sector count"));
        }
        Ok(header)
    }

    pub fn encode(&self, sector: &mut [u8]) {
        sector.fill(0);
        write_word(sector, 0, self.byte_len);
        write_word(sector, 1, self.sector_count);
        write_word(sector, 2, SectorId::encode_link(self.overflow));
        for (i, &pointer) in self.direct.iter().enumerate() {
            write_word(sector, HEADER_FIXED_WORDS + i, pointer.into());
        }
    }

    pub fn fetch_from(sector: SectorId, block_device: &Arc<dyn BlockDevice>) -> Result<Self> {
        let mut buf = vec![0; G::SECTOR_SIZE];
        block_device.read_block(sector.index(), &mut buf);
        Self::decode(&buf)
    }

    pub fn write_back(&self, sector: SectorId, block_device: &Arc<dyn BlockDevice>) {
        let mut buf = vec![0; G::SECTOR_SIZE];
        self.encode(&mut buf);
        block_device.write_block(sector.index(), &buf);
    }
}

impl<G: Geometry> FileHeader<G> {
    #[inline]
    fn chain<'a>(&self, block_device: &'a Arc<dyn BlockDevice>) -> ChainWalk<'a, G> {
        ChainWalk::new(
            self.overflow,
            self.sector_count().saturating_sub(G::NUM_DIRECT),
            block_device,
        )
    }

    /// 链表的最后一块，文件尚未溢出时为空
    fn tail(
        &self,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<Option<(SectorId, IndexBlock<G>)>> {
        let mut tail = None;
        for link in self.chain(block_device) {
            let link = link?;
            tail = Some((link.sector, link.block));
        }
        Ok(tail)
    }

    /// 增长到 `larger_size` 字节：先检查、再预留、最后提交
    fn grow_to(
        &mut self,
        larger_size: usize,
        free_map: &mut FreeMap<G>,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<()> {
        let byte_len = u32::try_from(larger_size).map_err(|_| Error::FileTooLarge)?;
        let old_sectors = self.sector_count();
        let new_sectors = Self::sectors_for(larger_size);

        // 增长落在最后一个扇区的空闲部分
        if new_sectors == old_sectors {
            self.byte_len = byte_len;
            return Ok(());
        }

        // 链表尾在预留扇区之前读出，链表损坏时不会泄漏扇区
        let tail = self.tail(block_device)?;
        let needed = Self::total_sectors(new_sectors) - Self::total_sectors(old_sectors);
        let fresh = free_map.reserve(needed)?;

        self.expand_to(byte_len, new_sectors, fresh, tail, block_device);
        Ok(())
    }

    /// 把新预留的扇区依次挂到指针结构上。
    /// `fresh` 恰好包含所需的数据扇区与新索引块，数据扇区清零。
    fn expand_to(
        &mut self,
        byte_len: u32,
        new_sectors: usize,
        fresh: Vec<SectorId>,
        tail: Option<(SectorId, IndexBlock<G>)>,
        block_device: &Arc<dyn BlockDevice>,
    ) {
        let zeroes = vec![0; G::SECTOR_SIZE];
        let mut fresh = fresh.into_iter();
        let mut take = || fresh.next().expect("reserved fewer sectors than needed");
        let mut sector_index = self.sector_count();

        /******************** 直接指针 ********************/
        while sector_index < new_sectors.min(G::NUM_DIRECT) {
            let id = take();
            block_device.write_block(id.index(), &zeroes);
            self.direct[sector_index] = id;
            sector_index += 1;
        }
        /******************** END ********************/

        /******************** 索引块链表 ********************/
        // 从最后一块的空槽开始填
        let mut current = tail;
        while sector_index < new_sectors {
            let slot = (sector_index - G::NUM_DIRECT) % G::NUM_POINTERS;

            // 当前块已满或尚无索引块，追加新块
            if slot == 0 {
                let sector = take();
                match current.take() {
                    Some((prev_sector, mut prev)) => {
                        prev.set_next(Some(sector));
                        prev.write_back(prev_sector, block_device);
                    }
                    None => self.overflow = Some(sector),
                }
                current = Some((sector, IndexBlock::new()));
            }

            let id = take();
            block_device.write_block(id.index(), &zeroes);
            if let Some((_, block)) = current.as_mut() {
                block.set_pointer(slot, id);
            }
            sector_index += 1;
        }

        if let Some((sector, block)) = current {
            block.write_back(sector, block_device);
        }
        /******************** END ********************/

        debug_assert!(fresh.next().is_none(), "reserved more sectors than needed");
        self.byte_len = byte_len;
        self.sector_count = new_sectors as u32;
    }
}

impl<G: Geometry> Default for FileHeader<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Geometry> fmt::Display for FileHeader<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FileHeader: {} bytes, {} sectors, direct [",
            self.byte_len, self.sector_count
        )?;
        for (i, id) in self.direct[..self.sector_count().min(G::NUM_DIRECT)]
            .iter()
            .enumerate()
        {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", id.index())?;
        }
        match self.overflow {
            Some(head) => write!(f, "], overflow {head}"),
            None => f.write_str("]"),
        }
    }
}
