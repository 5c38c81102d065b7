use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::marker::PhantomData;

use block_dev::BlockDevice;

use super::{Geometry, StdGeometry};
use crate::{Error, Result, SectorId};

/// 位图内的位组
type BitGroup = u64;
const GROUP_BITS: usize = BitGroup::BITS as usize;

/// 空闲扇区位图，每个扇区一位，置位表示已占用。
///
/// 位图常驻内存，修改后必须在释放保护它的锁之前写回磁盘上的保留区域。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeMap<G: Geometry = StdGeometry> {
    /// 位图在磁盘上的起始扇区
    start_sector: SectorId,
    /// 位图指示的扇区总数
    len: usize,
    /// 超出 `len` 的位恒为 1，保证不会被分配
    groups: Vec<BitGroup>,
    free: usize,
    /// 内存中的状态是否比磁盘上的新
    dirty: bool,
    _geometry: PhantomData<G>,
}

impl<G: Geometry> FreeMap<G> {
    const WHOLE_GROUPS: () = assert!(
        G::SECTOR_SIZE % (GROUP_BITS / 8) == 0,
        "sector must hold whole bit groups"
    );

    /// 位图所指示区域的扇区全部空闲
    pub fn new(start_sector: SectorId, len: usize) -> Self {
        let () = Self::WHOLE_GROUPS;

        let total_groups = Self::sectors_for(len) * G::SECTOR_SIZE * 8 / GROUP_BITS;
        let mut groups = vec![0; total_groups];
        for bit in len..total_groups * GROUP_BITS {
            groups[bit / GROUP_BITS] |= 1 << (bit % GROUP_BITS);
        }

        Self {
            start_sector,
            len,
            groups,
            free: len,
            dirty: true,
            _geometry: PhantomData,
        }
    }

    /// 记录 `len` 个扇区的位图需要占用多少扇区
    #[inline]
    pub fn sectors_for(len: usize) -> usize {
        len.div_ceil(G::SECTOR_SIZE * 8)
    }

    /// 位图自身占用的扇区
    #[inline]
    pub fn sectors(&self) -> usize {
        Self::sectors_for(self.len)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn num_free(&self) -> usize {
        self.free
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn contains(&self, id: SectorId) -> bool {
        !id.is_null() && id.index() < self.len
    }

    /// 扇区是否已被占用；不属于本位图的扇区视为未占用
    pub fn test(&self, id: SectorId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let (group, bit) = Self::locate(id);
        self.groups[group] & (1 << bit) != 0
    }

    /// 把指定扇区标记为占用，用于保留区域
    pub fn mark(&mut self, id: SectorId) -> Result<()> {
        if !self.contains(id) {
            return Err(Error::InvalidSector(id));
        }
        if !self.test(id) {
            let (group, bit) = Self::locate(id);
            self.groups[group] |= 1 << bit;
            self.free -= 1;
            self.dirty = true;
        }
        Ok(())
    }

    /// 寻找一个空闲扇区并立刻标记为占用。
    /// 若位图的空间用尽，则返回空。
    pub fn find_free(&mut self) -> Option<SectorId> {
        let (group, bit) = self
            .groups
            .iter()
            .enumerate()
            .find_map(|(i, &bits)| (bits != BitGroup::MAX).then_some((i, bits.trailing_ones())))?;

        self.groups[group] |= 1 << bit;
        self.free -= 1;
        self.dirty = true;
        Some(SectorId::new((group * GROUP_BITS + bit as usize) as u32))
    }

    pub fn clear(&mut self, id: SectorId) -> Result<()> {
        if !self.contains(id) {
            return Err(Error::InvalidSector(id));
        }
        if !self.test(id) {
            return Err(Error::DoubleFree(id));
        }

        let (group, bit) = Self::locate(id);
        self.groups[group] &= !(1 << bit);
        self.free += 1;
        self.dirty = true;
        Ok(())
    }

    /// 一次性预留 `count` 个扇区：先检查空闲数量再提交，
    /// 中途失败则归还已预留的扇区，位图保持原样。
    pub fn reserve(&mut self, count: usize) -> Result<Vec<SectorId>> {
        if self.free < count {
            log::warn!("cannot reserve {count} sectors, {} free", self.free);
            return Err(Error::OutOfSpace {
                needed: count,
                free: self.free,
            });
        }

        let mut reserved = Vec::with_capacity(count);
        for _ in 0..count {
            match self.find_free() {
                Some(id) => reserved.push(id),
                None => {
                    log::error!("free count says {} but no free bit found", self.free);
                    self.release(&reserved)?;
                    return Err(Error::Corrupted("free map count disagrees with its bits"));
                }
            }
        }

        Ok(reserved)
    }

    pub fn release(&mut self, sectors: &[SectorId]) -> Result<()> {
        sectors.iter().try_for_each(|&id| self.clear(id))
    }

    /// 从磁盘上的保留区域读出位图
    pub fn fetch_from(
        start_sector: SectorId,
        len: usize,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Self {
        let mut map = Self::new(start_sector, len);
        let groups_per_sector = G::SECTOR_SIZE * 8 / GROUP_BITS;
        let mut buf = vec![0; G::SECTOR_SIZE];

        for (i, groups) in map.groups.chunks_mut(groups_per_sector).enumerate() {
            block_device.read_block(start_sector.index() + i, &mut buf);
            for (group, raw) in groups.iter_mut().zip(buf.chunks_exact(GROUP_BITS / 8)) {
                let mut bytes = [0; GROUP_BITS / 8];
                bytes.copy_from_slice(raw);
                *group = BitGroup::from_le_bytes(bytes);
            }
        }

        // 超出范围的位可能在磁盘上被清掉了，重新置位
        for bit in len..map.groups.len() * GROUP_BITS {
            map.groups[bit / GROUP_BITS] |= 1 << (bit % GROUP_BITS);
        }
        let used: usize = map.groups.iter().map(|g| g.count_ones() as usize).sum();
        map.free = map.groups.len() * GROUP_BITS - used;
        map.dirty = false;
        map
    }

    /// 把位图写回磁盘上的保留区域
    pub fn write_back(&mut self, block_device: &Arc<dyn BlockDevice>) {
        let groups_per_sector = G::SECTOR_SIZE * 8 / GROUP_BITS;
        let mut buf = vec![0; G::SECTOR_SIZE];

        for (i, groups) in self.groups.chunks(groups_per_sector).enumerate() {
            for (group, raw) in groups.iter().zip(buf.chunks_exact_mut(GROUP_BITS / 8)) {
                raw.copy_from_slice(&group.to_le_bytes());
            }
            block_device.write_block(self.start_sector.index() + i, &buf);
        }
        self.dirty = false;
    }

    /// 全部已占用扇区，按编号升序
    pub fn used(&self) -> impl Iterator<Item = SectorId> + '_ {
        (0..self.len)
            .map(|i| SectorId::new(i as u32))
            .filter(|&id| self.test(id))
    }
}

impl<G: Geometry> FreeMap<G> {
    /// 扇区对应的位组与组内位置
    #[inline]
    fn locate(id: SectorId) -> (usize, usize) {
        (id.index() / GROUP_BITS, id.index() % GROUP_BITS)
    }
}
