//! 索引块：一个扇区的数据指针加一个后继链接
//!
//! 文件的扇区数超过文件头的直接容量后，多出来的指针按文件顺序存放在
//! 一条单向、无环、只向前追加的索引块链表中，以 [`SectorId::NONE`] 结尾。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use core::marker::PhantomData;

use block_dev::BlockDevice;

use super::{Geometry, POINTER_BYTES, StdGeometry, read_word, write_word};
use crate::SectorId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock<G: Geometry = StdGeometry> {
    /// 数据指针，接续在文件头的直接指针表之后
    pointers: Box<[SectorId]>,
    /// 下一个索引块
    next: Option<SectorId>,
    _geometry: PhantomData<G>,
}

impl<G: Geometry> IndexBlock<G> {
    const FITS_IN_SECTOR: () = assert!(
        G::NUM_POINTERS > 0 && (G::NUM_POINTERS + 1) * POINTER_BYTES <= G::SECTOR_SIZE,
        "index block must fit in one sector"
    );

    pub fn new() -> Self {
        let () = Self::FITS_IN_SECTOR;

        Self {
            pointers: vec![SectorId::NONE; G::NUM_POINTERS].into_boxed_slice(),
            next: None,
            _geometry: PhantomData,
        }
    }

    #[inline]
    pub fn pointers(&self) -> &[SectorId] {
        &self.pointers
    }

    #[inline]
    pub fn pointer(&self, index: usize) -> SectorId {
        self.pointers[index]
    }

    #[inline]
    pub fn set_pointer(&mut self, index: usize, sector: SectorId) {
        self.pointers[index] = sector;
    }

    #[inline]
    pub fn next(&self) -> Option<SectorId> {
        self.next
    }

    #[inline]
    pub fn set_next(&mut self, next: Option<SectorId>) {
        self.next = next;
    }

    pub fn decode(sector: &[u8]) -> Self {
        let mut block = Self::new();
        for (i, pointer) in block.pointers.iter_mut().enumerate() {
            *pointer = SectorId::new(read_word(sector, i));
        }
        block.next = SectorId::decode_link(read_word(sector, G::NUM_POINTERS));
        block
    }

    pub fn encode(&self, sector: &mut [u8]) {
        sector.fill(0);
        for (i, &pointer) in self.pointers.iter().enumerate() {
            write_word(sector, i, pointer.into());
        }
        write_word(sector, G::NUM_POINTERS, SectorId::encode_link(self.next));
    }

    pub fn fetch_from(sector: SectorId, block_device: &Arc<dyn BlockDevice>) -> Self {
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

impl<G: Geometry> Default for IndexBlock<G> {
    fn default() -> Self {
        Self::new()
    }
}
