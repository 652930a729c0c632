use std::collections::BTreeMap;
use std::fmt::Write as _;

use nes65_o65::SegmentId;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::binpack::pack_bins;
use crate::linker::{Linker, LinkageWish};
use crate::rangeset::RangeSet;
use crate::romaddr::{PAGE_SIZE, RomMap};

/// A block to place: its length in, its position out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreeSpaceRecord {
    pub pos: Option<u32>,
    pub len: u32,
}

impl FreeSpaceRecord {
    pub fn new(len: u32) -> Self {
        Self { pos: None, len }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpaceError {
    #[error("page ${page:02X} has no free space")]
    PageFull { page: u32 },
    #[error("{count} block(s) totalling {bytes} bytes could not be placed")]
    Unplaced { count: usize, bytes: u64 },
    #[error("no single page can hold {bytes} bytes of grouped blocks")]
    NoPageFits { bytes: u64 },
}

/// How page-relative positions become addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    /// Pages are PRG banks.
    Rom(RomMap),
    /// Pages are 64 KiB address blocks.
    Ram,
}

impl AddressSpace {
    pub fn address(&self, page: u32, offset: u32) -> u32 {
        match self {
            Self::Rom(map) => map.make_nes(page, offset),
            Self::Ram => (page << 16) | offset,
        }
    }

    /// Page and offset of an address that lives in this space.
    pub fn locate(&self, address: u32) -> Option<(u32, u32)> {
        match self {
            Self::Rom(map) if address >= 0x8000 => Some(map.split_nes(address)),
            Self::Rom(_) => None,
            Self::Ram => Some((address >> 16, address & 0xFFFF)),
        }
    }
}

/// Free ranges per page, with page-relative offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeSpaceMap {
    pages: BTreeMap<u32, RangeSet>,
}

impl FreeSpaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, page: u32, begin: u32, length: u32) {
        self.pages
            .entry(page)
            .or_default()
            .insert(begin, begin.saturating_add(length));
    }

    pub fn del(&mut self, page: u32, begin: u32, length: u32) {
        if let Some(ranges) = self.pages.get_mut(&page) {
            ranges.remove(begin, begin.saturating_add(length));
        }
    }

    /// Like [`FreeSpaceMap::add`] with the page in bits 16 and up.
    pub fn add_long(&mut self, address: u32, length: u32) {
        self.add(address >> 16, address & 0xFFFF, length);
    }

    pub fn del_long(&mut self, address: u32, length: u32) {
        self.del(address >> 16, address & 0xFFFF, length);
    }

    pub fn page_list(&self) -> Vec<u32> {
        self.pages.keys().copied().collect()
    }

    pub fn list(&self, page: u32) -> Option<&RangeSet> {
        self.pages.get(&page)
    }

    /// Takes `length` bytes from the smallest range of `page` that holds them.
    pub fn find(&mut self, page: u32, length: u32) -> Option<u32> {
        let ranges = self.pages.get_mut(&page)?;
        let (start, _) = ranges
            .iter()
            .filter(|(start, end)| end - start >= length)
            .min_by_key(|(start, end)| end - start)?;
        ranges.remove(start, start + length);
        Some(start)
    }

    /// Takes `length` bytes from the smallest fitting range of any page and
    /// returns its long address.
    pub fn find_from_any_page(&mut self, length: u32) -> Option<u32> {
        let page = self
            .pages
            .iter()
            .flat_map(|(page, ranges)| {
                ranges
                    .iter()
                    .map(move |(start, end)| (*page, end - start))
            })
            .filter(|(_, size)| *size >= length)
            .min_by_key(|(_, size)| *size)
            .map(|(page, _)| page);
        let Some(page) = page else {
            debug!(length, "no free block is large enough");
            return None;
        };
        self.find(page, length).map(|offset| (page << 16) | offset)
    }

    pub fn size(&self) -> u64 {
        self.pages
            .values()
            .map(|ranges| u64::from(ranges.total()))
            .sum()
    }

    pub fn page_size_free(&self, page: u32) -> u32 {
        self.pages.get(&page).map_or(0, RangeSet::total)
    }

    /// Number of separate free ranges in `page`.
    pub fn fragmentation(&self, page: u32) -> usize {
        self.pages.get(&page).map_or(0, RangeSet::len)
    }

    /// One-line summary: `page:bytes/ranges` for every page with free space.
    pub fn report(&self) -> String {
        let mut out = String::from("free space:");
        for (page, ranges) in &self.pages {
            if !ranges.is_empty() {
                let _ = write!(out, " {page:02X}:{}/{}", ranges.total(), ranges.len());
            }
        }
        let _ = write!(out, " - total: {} bytes", self.size());
        out
    }

    pub fn dump_page_map(&self, page: u32) -> String {
        let Some(ranges) = self.pages.get(&page).filter(|ranges| !ranges.is_empty()) else {
            return format!("page {page:02X} is full");
        };
        let mut out = format!("map of page {page:02X}:");
        for (start, end) in ranges.iter() {
            let _ = write!(out, "\n  {start:X}: {}", end - start);
        }
        out
    }

    /// Places `blocks` inside `page`, setting page-relative positions.
    pub fn organize(
        &mut self,
        blocks: &mut [FreeSpaceRecord],
        page: u32,
    ) -> Result<(), SpaceError> {
        let Some(ranges) = self.pages.get(&page) else {
            return Err(SpaceError::PageFull { page });
        };
        let holes: Vec<(u32, u32)> = ranges.iter().collect();
        let placed = self.place(blocks, holes.iter().map(|(start, end)| (page, *start, *end)));
        for (block, position) in blocks.iter_mut().zip(placed) {
            block.pos = position.map(|(_, offset)| offset);
        }
        unplaced_error(blocks)
    }

    /// Places `blocks` in any pages, setting long addresses.
    pub fn organize_to_any_page(
        &mut self,
        blocks: &mut [FreeSpaceRecord],
    ) -> Result<(), SpaceError> {
        let holes: Vec<(u32, u32, u32)> = self
            .pages
            .iter()
            .flat_map(|(page, ranges)| {
                ranges
                    .iter()
                    .map(move |(start, end)| (*page, start, end))
            })
            .collect();
        let placed = self.place(blocks, holes.into_iter());
        for (block, position) in blocks.iter_mut().zip(placed) {
            block.pos = position.map(|(page, offset)| (page << 16) | offset);
        }
        unplaced_error(blocks)
    }

    /// Places `blocks` together in the page they fill best. Returns that page.
    pub fn organize_to_any_same_page(
        &mut self,
        blocks: &mut [FreeSpaceRecord],
    ) -> Result<u32, SpaceError> {
        let mut best: Option<(u32, u32)> = None;
        for page in self.page_list() {
            let mut trial = self.clone();
            let mut attempt = blocks.to_vec();
            if trial.organize(&mut attempt, page).is_err() {
                continue;
            }
            let left = trial.page_size_free(page);
            if best.is_none_or(|(_, best_left)| left < best_left) {
                best = Some((page, left));
            }
        }
        let Some((page, _)) = best else {
            return Err(SpaceError::NoPageFits {
                bytes: blocks.iter().map(|block| u64::from(block.len)).sum(),
            });
        };
        self.organize(blocks, page)?;
        Ok(page)
    }

    /// Packs blocks into `holes` (`page, start, end`) and removes the used
    /// space. Returns `(page, offset)` per block.
    fn place(
        &mut self,
        blocks: &[FreeSpaceRecord],
        holes: impl Iterator<Item = (u32, u32, u32)>,
    ) -> Vec<Option<(u32, u32)>> {
        let mut holes: Vec<(u32, u32, u32)> = holes.collect();
        let sizes: Vec<u32> = holes.iter().map(|(_, start, end)| end - start).collect();
        let items: Vec<u32> = blocks.iter().map(|block| block.len).collect();

        let needed: u64 = items.iter().map(|len| u64::from(*len)).sum();
        let available: u64 = sizes.iter().map(|len| u64::from(*len)).sum();
        if available < needed {
            warn!(needed, available, "not enough free space");
        }

        let assignment = pack_bins(&sizes, &items);
        let mut placed = Vec::with_capacity(blocks.len());
        for (block, hole) in blocks.iter().zip(assignment) {
            let position = match holes.get_mut(hole) {
                Some((page, start, end)) if *end - *start >= block.len => {
                    let offset = *start;
                    *start += block.len;
                    Some((*page, offset))
                }
                _ => None,
            };
            if let Some((page, offset)) = position {
                self.del(page, offset, block.len);
            }
            placed.push(position);
        }
        placed
    }

    /// Gives every module segment of kind `seg` an address.
    ///
    /// Fixed segments are reserved first. Then segments wanting a specific
    /// page are placed, then linkage groups, then everything else. Returns
    /// the number of segments left without an address.
    pub fn organize_linker(
        &mut self,
        linker: &mut Linker,
        seg: SegmentId,
        space: AddressSpace,
    ) -> usize {
        let sizes = linker.size_list(seg);
        let linkages = linker.linkage_list(seg);
        let mut addrs: Vec<Option<u32>> = vec![None; sizes.len()];

        let mut pages: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        let mut anywhere = Vec::new();
        for (index, linkage) in linkages.iter().enumerate() {
            match *linkage {
                LinkageWish::ThisPage(page) => pages.entry(page).or_default().push(index),
                LinkageWish::InGroup(group) => groups.entry(group).or_default().push(index),
                LinkageWish::Anywhere => anywhere.push(index),
                LinkageWish::Here(address) => {
                    if let Some((page, offset)) = space.locate(address) {
                        self.del(page, offset, sizes[index]);
                    }
                }
            }
        }

        for (page, members) in &pages {
            let mut blocks = records(members, &sizes);
            if let Err(error) = self.organize(&mut blocks, *page) {
                error!(segment = seg.name(), page, "{error}");
            }
            for (index, block) in members.iter().zip(&blocks) {
                addrs[*index] = block.pos.map(|offset| space.address(*page, offset));
            }
        }

        for (group, members) in &groups {
            let mut blocks = records(members, &sizes);
            let page = match self.organize_to_any_same_page(&mut blocks) {
                Ok(page) => page,
                Err(error) => {
                    error!(segment = seg.name(), group, "{error}");
                    continue;
                }
            };
            debug!(segment = seg.name(), group, page, "group placed");
            for (index, block) in members.iter().zip(&blocks) {
                addrs[*index] = block.pos.map(|offset| space.address(page, offset));
            }
        }

        let mut blocks = records(&anywhere, &sizes);
        if let Err(error) = self.organize_to_any_page(&mut blocks) {
            error!(segment = seg.name(), "{error}");
        }
        for (index, block) in anywhere.iter().zip(&blocks) {
            addrs[*index] = block
                .pos
                .map(|long| space.address(long >> 16, long & 0xFFFF));
        }

        let mut failed = 0;
        for (index, address) in addrs.iter().enumerate() {
            match address {
                Some(address) => debug!(
                    segment = seg.name(),
                    module = linker.name(index),
                    "placed at ${address:06X}"
                ),
                None if !linkages[index].is_placed() => failed += 1,
                None => {}
            }
        }
        linker.put_addr_list(seg, &addrs);
        failed
    }
}

fn records(members: &[usize], sizes: &[u32]) -> Vec<FreeSpaceRecord> {
    members
        .iter()
        .map(|index| FreeSpaceRecord::new(sizes[*index]))
        .collect()
}

fn unplaced_error(blocks: &[FreeSpaceRecord]) -> Result<(), SpaceError> {
    let missing: Vec<_> = blocks.iter().filter(|block| block.pos.is_none()).collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(SpaceError::Unplaced {
        count: missing.len(),
        bytes: missing.iter().map(|block| u64::from(block.len)).sum(),
    })
}

/// Free space covering every PRG bank of `map` entirely.
pub fn whole_rom(map: RomMap) -> FreeSpaceMap {
    let mut space = FreeSpaceMap::new();
    for bank in 0..map.pages() {
        space.add(bank, 0, PAGE_SIZE);
    }
    space
}
