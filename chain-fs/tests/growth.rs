mod common;

use std::sync::Arc;

use block_dev::BlockDevice;
use chain_fs::{Error, FileHeader, FreeMap, IndexBlock, SectorId};

use common::{Small, ram_disk};

const SECTORS: usize = 64;

fn setup() -> (Arc<dyn BlockDevice>, FreeMap<Small>) {
    (
        ram_disk(128, SECTORS),
        FreeMap::new(SectorId::new(0), SECTORS),
    )
}

/// 只剩 `free` 个空闲扇区的位图
fn map_with_free(free: usize) -> FreeMap<Small> {
    let mut map = FreeMap::new(SectorId::new(0), SECTORS);
    map.reserve(SECTORS - free).unwrap();
    map
}

#[test]
fn grow_through_index_blocks() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();

    header.allocate(300, &mut map, &dev).unwrap();
    assert_eq!(300, header.len());
    assert_eq!(3, header.sector_count());
    assert_eq!(None, header.overflow());
    assert!(header.direct()[..3].iter().all(|id| !id.is_null()));
    assert!(header.direct()[3].is_null());
    assert_eq!(SECTORS - 3, map.num_free());

    // 第 5 个扇区溢出到新的索引块
    header.add_length(300, &mut map, &dev).unwrap();
    assert_eq!(600, header.len());
    assert_eq!(5, header.sector_count());
    let head = header.overflow().unwrap();
    let first = IndexBlock::<Small>::fetch_from(head, &dev);
    let spilled = first.pointer(0);
    assert!(!spilled.is_null());
    assert!(first.pointers()[1..].iter().all(|id| id.is_null()));
    assert_eq!(None, first.next());
    assert_eq!(SECTORS - 6, map.num_free());

    // 先填满第一块剩下的 3 个槽，再追加两块
    header.add_length(1200, &mut map, &dev).unwrap();
    assert_eq!(1800, header.len());
    assert_eq!(15, header.sector_count());
    assert_eq!(Some(head), header.overflow());

    let first = IndexBlock::<Small>::fetch_from(head, &dev);
    assert_eq!(spilled, first.pointer(0));
    assert!(first.pointers().iter().all(|id| !id.is_null()));
    let second_sector = first.next().unwrap();

    let second = IndexBlock::<Small>::fetch_from(second_sector, &dev);
    assert!(second.pointers().iter().all(|id| !id.is_null()));
    let third_sector = second.next().unwrap();

    let third = IndexBlock::<Small>::fetch_from(third_sector, &dev);
    assert!(third.pointers()[..3].iter().all(|id| !id.is_null()));
    assert!(third.pointer(3).is_null());
    assert_eq!(None, third.next());

    let footprint = header.footprint(&dev).unwrap();
    assert_eq!(15, footprint.data.len());
    assert_eq!(vec![head, second_sector, third_sector], footprint.index);
    assert_eq!(SECTORS - 18, map.num_free());
}

#[test]
fn byte_to_sector() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();
    header.allocate(128 * 14 + 5, &mut map, &dev).unwrap();
    let footprint = header.footprint(&dev).unwrap();
    assert_eq!(15, footprint.data.len());

    for offset in 0..128 {
        assert_eq!(
            header.direct()[0],
            header.byte_to_sector(offset, &dev).unwrap()
        );
    }

    let head = IndexBlock::<Small>::fetch_from(header.overflow().unwrap(), &dev);
    assert_eq!(head.pointer(0), header.byte_to_sector(4 * 128, &dev).unwrap());

    for (i, &sector) in footprint.data.iter().enumerate() {
        assert_eq!(sector, header.byte_to_sector(i * 128, &dev).unwrap());
        let last = (i * 128 + 127).min(header.len() - 1);
        assert_eq!(sector, header.byte_to_sector(last, &dev).unwrap());
    }

    assert_eq!(
        Err(Error::OffsetOutOfRange {
            offset: header.len(),
            len: header.len()
        }),
        header.byte_to_sector(header.len(), &dev)
    );
}

#[test]
fn allocate_out_of_space() {
    let dev = ram_disk(128, SECTORS);
    let mut map = map_with_free(2);
    let mut header = FileHeader::<Small>::new();

    assert_eq!(
        Err(Error::OutOfSpace { needed: 3, free: 2 }),
        header.allocate(3 * 128, &mut map, &dev)
    );
    assert_eq!(2, map.num_free());
    assert_eq!(FileHeader::new(), header);
}

#[test]
fn allocate_reserves_index_blocks() {
    let dev = ram_disk(128, SECTORS);
    let mut header = FileHeader::<Small>::new();

    // 5 个数据扇区还需要 1 个索引块
    let mut map = map_with_free(5);
    assert_eq!(
        Err(Error::OutOfSpace { needed: 6, free: 5 }),
        header.allocate(5 * 128, &mut map, &dev)
    );
    assert_eq!(5, map.num_free());

    let mut map = map_with_free(6);
    header.allocate(5 * 128, &mut map, &dev).unwrap();
    assert_eq!(0, map.num_free());
}

#[test]
fn allocate_twice() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();
    header.allocate(10, &mut map, &dev).unwrap();
    assert_eq!(
        Err(Error::AlreadyAllocated),
        header.allocate(10, &mut map, &dev)
    );
}

#[test]
fn add_length_out_of_space() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();
    header.allocate(6 * 128, &mut map, &dev).unwrap();
    map.reserve(map.num_free() - 3).unwrap();

    let before = header.clone();
    let head = IndexBlock::<Small>::fetch_from(before.overflow().unwrap(), &dev);

    // 3 个空闲扇区只够数据，不够再追加一个索引块
    assert_eq!(
        Err(Error::OutOfSpace { needed: 4, free: 3 }),
        header.add_length(3 * 128, &mut map, &dev)
    );
    assert_eq!(before, header);
    assert_eq!(3, map.num_free());
    assert_eq!(head, IndexBlock::fetch_from(before.overflow().unwrap(), &dev));

    // 刚好填满最后一块则不需要新索引块
    header.add_length(2 * 128, &mut map, &dev).unwrap();
    assert_eq!(8, header.sector_count());
    assert_eq!(1, map.num_free());
}

#[test]
fn grow_within_last_sector() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();
    header.allocate(100, &mut map, &dev).unwrap();
    let sector = header.direct()[0];
    let free = map.num_free();

    header.add_length(28, &mut map, &dev).unwrap();
    assert_eq!(128, header.len());
    assert_eq!(1, header.sector_count());
    assert_eq!(sector, header.direct()[0]);
    assert_eq!(free, map.num_free());

    header.add_length(1, &mut map, &dev).unwrap();
    assert_eq!(2, header.sector_count());
    assert_eq!(free - 1, map.num_free());
}

#[test]
fn grow_from_full_block() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();
    // 直接指针与第一块恰好用满
    header.allocate(8 * 128, &mut map, &dev).unwrap();
    let head = header.overflow().unwrap();
    assert_eq!(None, IndexBlock::<Small>::fetch_from(head, &dev).next());

    header.add_length(1, &mut map, &dev).unwrap();
    assert_eq!(9, header.sector_count());
    let second = IndexBlock::<Small>::fetch_from(head, &dev).next().unwrap();
    let block = IndexBlock::<Small>::fetch_from(second, &dev);
    assert!(!block.pointer(0).is_null());
    assert_eq!(None, block.next());
    assert_eq!(SECTORS - 11, map.num_free());
}

#[test]
fn sector_count_follows_length() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();
    header.allocate(0, &mut map, &dev).unwrap();
    assert_eq!(0, header.sector_count());

    for extra in [1, 127, 0, 129, 500, 3, 1000, 128, 77, 2000] {
        header.add_length(extra, &mut map, &dev).unwrap();
        let sectors = header.len().div_ceil(128);
        assert_eq!(sectors, header.sector_count());

        let footprint = header.footprint(&dev).unwrap();
        assert_eq!(sectors, footprint.data.len());
        assert_eq!(
            FileHeader::<Small>::index_blocks_for(sectors),
            footprint.index.len()
        );
        assert_eq!(SECTORS - footprint.len(), map.num_free());
        assert_eq!(sectors > 4, header.overflow().is_some());
    }
}

#[test]
fn deallocate_restores_free_count() {
    for bytes in [0, 1, 4 * 128, 4 * 128 + 1, 8 * 128, 9 * 128, 20 * 128] {
        let (dev, mut map) = setup();
        map.reserve(7).unwrap();
        let before = map.num_free();

        let mut header = FileHeader::<Small>::new();
        header.allocate(bytes, &mut map, &dev).unwrap();
        header.deallocate(&mut map, &dev).unwrap();

        assert_eq!(before, map.num_free(), "bytes={bytes}");
        assert_eq!(FileHeader::new(), header);
    }
}

#[test]
fn broken_chain() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();
    // 4 个直接指针，6 个溢出指针分布在两个索引块中
    header.allocate(10 * 128, &mut map, &dev).unwrap();

    let head = header.overflow().unwrap();
    let mut block = IndexBlock::<Small>::fetch_from(head, &dev);
    block.set_next(None);
    block.write_back(head, &dev);

    let free = map.num_free();
    let before = header.clone();
    let corrupted = Error::Corrupted("index chain ends early");

    assert_eq!(Err(corrupted), header.byte_to_sector(9 * 128, &dev));
    assert_eq!(Err(corrupted), header.footprint(&dev).map(|_| ()));
    assert_eq!(Err(corrupted), header.deallocate(&mut map, &dev));
    assert_eq!(Err(corrupted), header.add_length(1000, &mut map, &dev));
    assert_eq!(free, map.num_free());
    assert_eq!(before, header);

    // 链表前部仍可翻译
    assert!(header.byte_to_sector(7 * 128, &dev).is_ok());
}

#[test]
fn chain_leaves_device() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();
    header.allocate(10 * 128, &mut map, &dev).unwrap();

    let head = header.overflow().unwrap();
    let mut block = IndexBlock::<Small>::fetch_from(head, &dev);
    block.set_next(Some(SectorId::new(5000)));
    block.write_back(head, &dev);

    let free = map.num_free();
    let before = header.clone();
    let invalid = Error::InvalidSector(SectorId::new(5000));

    assert_eq!(Err(invalid), header.byte_to_sector(9 * 128, &dev));
    assert_eq!(Err(invalid), header.footprint(&dev).map(|_| ()));
    assert_eq!(Err(invalid), header.deallocate(&mut map, &dev));
    assert_eq!(Err(invalid), header.add_length(1000, &mut map, &dev));
    assert_eq!(free, map.num_free());
    assert_eq!(before, header);
    assert!(invalid.is_fatal());

    assert!(header.byte_to_sector(7 * 128, &dev).is_ok());
}

#[test]
fn data_pointer_leaves_device() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();
    header.allocate(6 * 128, &mut map, &dev).unwrap();

    let head = header.overflow().unwrap();
    let mut block = IndexBlock::<Small>::fetch_from(head, &dev);
    block.set_pointer(1, SectorId::new(5000));
    block.write_back(head, &dev);

    let free = map.num_free();
    let invalid = Error::InvalidSector(SectorId::new(5000));
    assert_eq!(Err(invalid), header.byte_to_sector(5 * 128, &dev));
    assert_eq!(Err(invalid), header.deallocate(&mut map, &dev));
    assert_eq!(free, map.num_free());

    let mut buf = [0; 128];
    assert_eq!(Err(invalid), header.read_at(5 * 128, &mut buf, &dev));
    assert_eq!(128, header.read_at(4 * 128, &mut buf, &dev).unwrap());
}

#[test]
fn double_free() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();
    header.allocate(6 * 128, &mut map, &dev).unwrap();

    let victim = header.byte_to_sector(5 * 128, &dev).unwrap();
    map.clear(victim).unwrap();
    let free = map.num_free();

    assert_eq!(
        Err(Error::DoubleFree(victim)),
        header.deallocate(&mut map, &dev)
    );
    assert!(Error::DoubleFree(victim).is_fatal());
    // 校验失败时一个扇区都没有释放
    assert_eq!(free, map.num_free());
}

#[test]
fn read_write_across_overflow() {
    let (dev, mut map) = setup();
    let mut header = FileHeader::<Small>::new();
    header.allocate(11 * 128, &mut map, &dev).unwrap();

    let data: Vec<u8> = (0..header.len()).map(|i| (i * 7 % 251) as u8).collect();
    assert_eq!(data.len(), header.write_at(0, &data, &dev).unwrap());

    let mut buf = vec![0; data.len()];
    assert_eq!(data.len(), header.read_at(0, &mut buf, &dev).unwrap());
    assert_eq!(data, buf);

    // 跨越直接指针与索引块边界的局部读写
    let patch = [0xaa; 300];
    assert_eq!(300, header.write_at(3 * 128 + 64, &patch, &dev).unwrap());
    let mut buf = [0; 400];
    assert_eq!(400, header.read_at(3 * 128, &mut buf, &dev).unwrap());
    assert_eq!(data[3 * 128..3 * 128 + 64], buf[..64]);
    assert!(buf[64..364].iter().all(|&b| b == 0xaa));
    assert_eq!(data[3 * 128 + 364..3 * 128 + 400], buf[364..]);

    // 写入被截断在文件长度处
    assert_eq!(10, header.write_at(header.len() - 10, &[1; 64], &dev).unwrap());
    assert_eq!(0, header.read_at(header.len(), &mut buf, &dev).unwrap());
}
