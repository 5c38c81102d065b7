//! 索引块链表的遍历
//!
//! 从链表头出发，每读入一个索引块就消耗至多 `P` 个指针，
//! 直到剩余指针数归零。每一步至少消耗一个指针，因此即便磁盘上的链表成环，
//! 遍历也会在 `ceil(remaining / P)` 步内结束。

use alloc::sync::Arc;
use core::marker::PhantomData;

use block_dev::BlockDevice;

use super::{Geometry, IndexBlock};
use crate::{Error, Result, SectorId};

/// 链表上的一环
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink<G: Geometry> {
    /// 索引块自身所在的扇区
    pub sector: SectorId,
    pub block: IndexBlock<G>,
    /// 本块中有效的指针数，只有最后一块可能不满
    pub used: usize,
}

impl<G: Geometry> ChainLink<G> {
    #[inline]
    pub fn pointers(&self) -> &[SectorId] {
        &self.block.pointers()[..self.used]
    }
}

pub struct ChainWalk<'a, G: Geometry> {
    block_device: &'a Arc<dyn BlockDevice>,
    next: Option<SectorId>,
    remaining: usize,
    _geometry: PhantomData<G>,
}

impl<'a, G: Geometry> ChainWalk<'a, G> {
    pub fn new(
        head: Option<SectorId>,
        remaining: usize,
        block_device: &'a Arc<dyn BlockDevice>,
    ) -> Self {
        Self {
            block_device,
            next: head,
            remaining,
            _geometry: PhantomData,
        }
    }
}

impl<G: Geometry> Iterator for ChainWalk<'_, G> {
    type Item = Result<ChainLink<G>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let Some(sector) = self.next else {
            log::error!("index chain ends with {} pointers left", self.remaining);
            self.remaining = 0;
            return Some(Err(Error::Corrupted("index chain ends early")));
        };
        if let Err(e) = sector.validate_within(self.block_device.num_blocks()) {
            self.remaining = 0;
            return Some(Err(e));
        }
        let block = IndexBlock::<G>::fetch_from(sector, self.block_device);
        let used = self.remaining.min(G::NUM_POINTERS);
        self.remaining -= used;
        self.next = block.next();
        log::trace!("index block {sector}: {used} pointers, next={:?}", self.next);

        if self.remaining == 0 && self.next.is_some() {
            log::error!("index block {sector} links past the end of the file");
            return Some(Err(Error::Corrupted("index chain continues past its last pointer")));
        }

        Some(Ok(ChainLink { sector, block, used }))
    }
}
