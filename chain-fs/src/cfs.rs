//! # 卷管理层
//!
//! 构建出磁盘的布局并使用：
//! 超级块 | 空闲扇区位图 | 文件头与数据扇区
//!
//! 空闲扇区位图是全卷共享的可变状态，由一把锁保护。
//! 每次预留或释放扇区、把结果提交到文件头、再把位图写回磁盘，
//! 这一整串操作都在同一个临界区内完成。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::layout::{FileHeader, FreeMap, Geometry, StdGeometry, SuperBlock};
use crate::{Error, Result, SectorId};

const SUPER_BLOCK_SECTOR: SectorId = SectorId::new(0);
/// 位图的固定位置
const FREE_MAP_SECTOR: SectorId = SectorId::new(1);

#[derive(Debug)]
pub struct ChainFileSystem<G: Geometry = StdGeometry> {
    block_device: Arc<dyn BlockDevice>,
    free_map: Mutex<FreeMap<G>>,
}

impl<G: Geometry> ChainFileSystem<G> {
    /// 在设备的前 `total_sectors` 个扇区上建立新卷
    pub fn format(block_device: Arc<dyn BlockDevice>, total_sectors: usize) -> Result<Self> {
        let available = block_device.num_blocks();
        // 扇区号是 u32，且最大值留作哨兵
        if total_sectors > available || total_sectors >= u32::MAX as usize {
            return Err(Error::DeviceTooSmall {
                available,
                requested: total_sectors,
            });
        }
        let map_sectors = FreeMap::<G>::sectors_for(total_sectors);
        let reserved = 1 + map_sectors;
        if total_sectors <= reserved {
            return Err(Error::OutOfSpace {
                needed: reserved + 1,
                free: total_sectors,
            });
        }

        let zeroes = vec![0; G::SECTOR_SIZE];
        for i in 0..total_sectors {
            block_device.write_block(i, &zeroes);
        }

        let mut sector = vec![0; G::SECTOR_SIZE];
        SuperBlock::new(total_sectors as u32, map_sectors as u32).encode(&mut sector);
        block_device.write_block(SUPER_BLOCK_SECTOR.index(), &sector);

        let mut free_map = FreeMap::<G>::new(FREE_MAP_SECTOR, total_sectors);
        for i in 0..reserved {
            free_map.mark(SectorId::new(i as u32))?;
        }
        free_map.write_back(&block_device);

        log::info!(
            "formatted {total_sectors} sectors of {} bytes, {map_sectors} map sectors",
            G::SECTOR_SIZE
        );
        Ok(Self {
            block_device,
            free_map: Mutex::new(free_map),
        })
    }

    /// 打开设备上已有的卷，从固定位置载入位图
    pub fn open(block_device: Arc<dyn BlockDevice>) -> Result<Self> {
        let mut sector = vec![0; G::SECTOR_SIZE];
        block_device.read_block(SUPER_BLOCK_SECTOR.index(), &mut sector);
        let super_block = SuperBlock::decode(&sector);
        if !super_block.is_valid() {
            log::error!("error when loading chain-fs: bad magic");
            return Err(Error::BadMagic);
        }

        let total_sectors = super_block.total_sectors as usize;
        let available = block_device.num_blocks();
        if total_sectors > available {
            return Err(Error::DeviceTooSmall {
                available,
                requested: total_sectors,
            });
        }
        if super_block.map_sectors as usize != FreeMap::<G>::sectors_for(total_sectors) {
            return Err(Error::Corrupted("superblock disagrees with sector geometry"));
        }

        let free_map = FreeMap::<G>::fetch_from(FREE_MAP_SECTOR, total_sectors, &block_device);
        log::info!(
            "opened {total_sectors} sectors, {} free",
            free_map.num_free()
        );
        Ok(Self {
            block_device,
            free_map: Mutex::new(free_map),
        })
    }

    /// 位图上的一次完整临界区：`f` 完成预留/释放与提交后，
    /// 若位图有改动则写回磁盘，然后才释放锁。
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut FreeMap<G>, &Arc<dyn BlockDevice>) -> Result<T>,
    ) -> Result<T> {
        let mut free_map = self.free_map.lock();
        let result = f(&mut free_map, &self.block_device);
        if free_map.is_dirty() {
            free_map.write_back(&self.block_device);
        }
        result
    }

    /// 新建一个 `bytes` 字节的文件，返回其文件头所在的扇区
    pub fn create(&self, bytes: usize) -> Result<SectorId> {
        self.transaction(|free_map, block_device| {
            // 文件头自身也要占一个扇区
            let needed = 1 + FileHeader::<G>::total_sectors(FileHeader::<G>::sectors_for(bytes));
            if free_map.num_free() < needed {
                log::warn!("cannot create {bytes} bytes: {needed} sectors needed");
                return Err(Error::OutOfSpace {
                    needed,
                    free: free_map.num_free(),
                });
            }

            let header_sector = free_map
                .find_free()
                .ok_or(Error::Corrupted("free map count disagrees with its bits"))?;
            let mut header = FileHeader::<G>::new();
            if let Err(e) = header.allocate(bytes, free_map, block_device) {
                free_map.clear(header_sector)?;
                return Err(e);
            }
            header.write_back(header_sector, block_device);

            log::debug!("created file {header_sector}: {bytes} bytes");
            Ok(header_sector)
        })
    }

    /// 读出文件头
    pub fn header(&self, header_sector: SectorId) -> Result<FileHeader<G>> {
        self.check_header_sector(&self.free_map.lock(), header_sector)?;
        FileHeader::fetch_from(header_sector, &self.block_device)
    }

    /// 文件增长 `extra` 字节，返回更新后的文件头
    pub fn extend(&self, header_sector: SectorId, extra: usize) -> Result<FileHeader<G>> {
        self.transaction(|free_map, block_device| {
            self.check_header_sector(free_map, header_sector)?;
            let mut header = FileHeader::<G>::fetch_from(header_sector, block_device)?;
            header.add_length(extra, free_map, block_device)?;
            header.write_back(header_sector, block_device);
            Ok(header)
        })
    }

    /// 删除文件：释放其全部扇区，最后释放文件头所在的扇区
    pub fn remove(&self, header_sector: SectorId) -> Result<()> {
        self.transaction(|free_map, block_device| {
            self.check_header_sector(free_map, header_sector)?;
            let mut header = FileHeader::<G>::fetch_from(header_sector, block_device)?;
            // 文件头扇区出现在自己的占用集合中时，释放到一半才会发现重复
            if header
                .footprint(block_device)?
                .iter()
                .any(|id| id == header_sector)
            {
                log::error!("file {header_sector} lists its own header sector");
                return Err(Error::Corrupted("file header lists its own sector"));
            }
            header.deallocate(free_map, block_device)?;
            free_map.clear(header_sector)?;
            block_device.write_block(header_sector.index(), &vec![0; G::SECTOR_SIZE]);

            log::debug!("removed file {header_sector}");
            Ok(())
        })
    }

    #[inline]
    pub fn num_free(&self) -> usize {
        self.free_map.lock().num_free()
    }

    #[inline]
    pub fn total_sectors(&self) -> usize {
        self.free_map.lock().len()
    }

    /// 超级块与位图占用的扇区数
    #[inline]
    pub fn reserved_sectors(&self) -> usize {
        1 + self.free_map.lock().sectors()
    }

    /// 位图中全部已占用的扇区
    pub fn used_sectors(&self) -> Vec<SectorId> {
        self.free_map.lock().used().collect()
    }

    #[inline]
    pub fn block_device(&self) -> &Arc<dyn BlockDevice> {
        &self.block_device
    }
}

impl<G: Geometry> ChainFileSystem<G> {
    /// 文件头只能位于保留区之外的已占用扇区
    fn check_header_sector(&self, free_map: &FreeMap<G>, header_sector: SectorId) -> Result<()> {
        let reserved = 1 + free_map.sectors();
        if header_sector.index() < reserved || !free_map.test(header_sector) {
            log::error!("sector {header_sector} does not hold a file header");
            return Err(Error::InvalidSector(header_sector));
        }
        Ok(())
    }
}
