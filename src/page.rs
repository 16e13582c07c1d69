//! Shared slotted-page bookkeeping used by both the record engine and the
//! B+ tree: the file header's freespace-list directory, the per-page footer,
//! and the backward-growing slot directory.

use crate::error::{Result, StorageError};
use crate::pf::{PagedFile, PAGE_SIZE};

pub const CURRENT_PF_VERSION: u32 = 2;
pub const NUM_FREESPACE_LISTS: usize = 11;
pub const REORG_THRESHOLD: usize = PAGE_SIZE / 2;

const SCALAR_HEADER_SIZE: usize = 4 * 5; // header_size, page_size, version, num_pages, num_freespace_lists
const FREESPACE_ENTRY_SIZE: usize = 6; // u16 cutoff + u32 list_head
pub const PF_HEADER_SIZE: usize = SCALAR_HEADER_SIZE + NUM_FREESPACE_LISTS * FREESPACE_ENTRY_SIZE;

pub const SLOT_SIZE: usize = 20; // size, page_offset, forward_page, forward_slot, is_anchor (u32 each)
pub const CORE_FOOTER_SIZE: usize = 4 * 7; // free_space_offset .. freespace_next_page

#[derive(Debug, Clone, Copy)]
pub struct FreeSpaceList {
    pub cutoff: u16,
    pub list_head: u32,
}

/// Lives on page 0 of every paged file that the record engine or B+ tree
/// manages. `freespace_lists[i]` is guaranteed to only ever hold pages with at
/// least `freespace_lists[i].cutoff` free bytes; list 0's cutoff is 0, so it
/// also serves as the catch-all bucket for pages with almost no free space.
#[derive(Debug, Clone)]
pub struct PfHeader {
    pub header_size: u32,
    pub page_size: u32,
    pub version: u32,
    pub num_pages: u32,
    pub num_freespace_lists: u32,
    pub freespace_lists: [FreeSpaceList; NUM_FREESPACE_LISTS],
}

impl PfHeader {
    pub fn new() -> Self {
        let mut freespace_lists = [FreeSpaceList {
            cutoff: 0,
            list_head: 0,
        }; NUM_FREESPACE_LISTS];
        for (i, entry) in freespace_lists.iter_mut().enumerate() {
            entry.cutoff = ((i * PAGE_SIZE) / NUM_FREESPACE_LISTS) as u16;
            entry.list_head = 0;
        }
        PfHeader {
            header_size: PF_HEADER_SIZE as u32,
            page_size: PAGE_SIZE as u32,
            version: CURRENT_PF_VERSION,
            num_pages: 1,
            num_freespace_lists: NUM_FREESPACE_LISTS as u32,
            freespace_lists,
        }
    }

    pub fn to_bytes(&self, buf: &mut [u8; PAGE_SIZE]) {
        buf[0..4].copy_from_slice(&self.header_size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.page_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.num_pages.to_le_bytes());
        buf[16..20].copy_from_slice(&self.num_freespace_lists.to_le_bytes());
        let mut offset = SCALAR_HEADER_SIZE;
        for entry in &self.freespace_lists {
            buf[offset..offset + 2].copy_from_slice(&entry.cutoff.to_le_bytes());
            buf[offset + 2..offset + 6].copy_from_slice(&entry.list_head.to_le_bytes());
            offset += FREESPACE_ENTRY_SIZE;
        }
    }

    pub fn from_bytes(buf: &[u8; PAGE_SIZE]) -> Result<Self> {
        let header_size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let page_size = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let num_pages = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let num_freespace_lists = u32::from_le_bytes(buf[16..20].try_into().unwrap());

        if header_size as usize != PF_HEADER_SIZE {
            return Err(StorageError::HeaderSizeCorrupt);
        }
        if version != CURRENT_PF_VERSION {
            return Err(StorageError::HeaderVersionMismatch {
                found: version,
                expected: CURRENT_PF_VERSION,
            });
        }
        if page_size as usize != PAGE_SIZE {
            return Err(StorageError::HeaderPageSizeMismatch {
                found: page_size,
                expected: PAGE_SIZE as u32,
            });
        }
        if num_freespace_lists as usize != NUM_FREESPACE_LISTS {
            return Err(StorageError::HeaderFreespaceListsMismatch {
                found: num_freespace_lists,
                expected: NUM_FREESPACE_LISTS as u32,
            });
        }

        let mut freespace_lists = [FreeSpaceList {
            cutoff: 0,
            list_head: 0,
        }; NUM_FREESPACE_LISTS];
        let mut offset = SCALAR_HEADER_SIZE;
        for entry in freespace_lists.iter_mut() {
            entry.cutoff = u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap());
            entry.list_head = u32::from_le_bytes(buf[offset + 2..offset + 6].try_into().unwrap());
            offset += FREESPACE_ENTRY_SIZE;
        }

        Ok(PfHeader {
            header_size,
            page_size,
            version,
            num_pages,
            num_freespace_lists,
            freespace_lists,
        })
    }

    /// The largest-cutoff list that still guarantees `free_bytes`, i.e. the
    /// bucket a page with this much free space should live in.
    pub fn classify(&self, free_bytes: usize) -> usize {
        self.freespace_lists
            .iter()
            .enumerate()
            .rev()
            .find(|(_, entry)| (entry.cutoff as usize) <= free_bytes)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

impl Default for PfHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields common to every payload page, whether it belongs to the record
/// engine or to a B+ tree. Stored in a footer that grows backward from the
/// end of the page; `footer_size` (core size, or core + B+ tree extension)
/// is a parameter so one set of routines serves both layers.
#[derive(Debug, Clone, Copy)]
pub struct CoreFooter {
    pub free_space_offset: u32,
    pub num_slots: u32,
    pub gap_size: u32,
    pub page_number: u32,
    pub freespace_list: u32,
    pub freespace_prev_page: u32,
    pub freespace_next_page: u32,
}

impl CoreFooter {
    pub fn new(page_number: u32) -> Self {
        CoreFooter {
            free_space_offset: 0,
            num_slots: 0,
            gap_size: 0,
            page_number,
            freespace_list: 0,
            freespace_prev_page: 0,
            freespace_next_page: 0,
        }
    }

    fn base_offset(footer_size: usize) -> usize {
        PAGE_SIZE - footer_size
    }

    pub fn read(buf: &[u8; PAGE_SIZE], footer_size: usize) -> Self {
        let off = Self::base_offset(footer_size);
        CoreFooter {
            free_space_offset: u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()),
            num_slots: u32::from_le_bytes(buf[off + 4..off + 8].try_into().unwrap()),
            gap_size: u32::from_le_bytes(buf[off + 8..off + 12].try_into().unwrap()),
            page_number: u32::from_le_bytes(buf[off + 12..off + 16].try_into().unwrap()),
            freespace_list: u32::from_le_bytes(buf[off + 16..off + 20].try_into().unwrap()),
            freespace_prev_page: u32::from_le_bytes(buf[off + 20..off + 24].try_into().unwrap()),
            freespace_next_page: u32::from_le_bytes(buf[off + 24..off + 28].try_into().unwrap()),
        }
    }

    pub fn write(&self, buf: &mut [u8; PAGE_SIZE], footer_size: usize) {
        let off = Self::base_offset(footer_size);
        buf[off..off + 4].copy_from_slice(&self.free_space_offset.to_le_bytes());
        buf[off + 4..off + 8].copy_from_slice(&self.num_slots.to_le_bytes());
        buf[off + 8..off + 12].copy_from_slice(&self.gap_size.to_le_bytes());
        buf[off + 12..off + 16].copy_from_slice(&self.page_number.to_le_bytes());
        buf[off + 16..off + 20].copy_from_slice(&self.freespace_list.to_le_bytes());
        buf[off + 20..off + 24].copy_from_slice(&self.freespace_prev_page.to_le_bytes());
        buf[off + 24..off + 28].copy_from_slice(&self.freespace_next_page.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageIndexSlot {
    pub size: u32,
    pub page_offset: u32,
    pub forward_page: u32,
    pub forward_slot: u32,
    pub is_anchor: bool,
}

impl PageIndexSlot {
    pub fn empty() -> Self {
        PageIndexSlot {
            size: 0,
            page_offset: 0,
            forward_page: 0,
            forward_slot: 0,
            is_anchor: false,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.size == 0 && self.forward_page == 0
    }

    pub fn is_forwarder(&self) -> bool {
        self.forward_page != 0
    }

    fn slot_offset(footer_size: usize, slot_num: u32) -> usize {
        PAGE_SIZE - footer_size - (slot_num as usize + 1) * SLOT_SIZE
    }

    pub fn read(buf: &[u8; PAGE_SIZE], footer_size: usize, slot_num: u32) -> Self {
        let off = Self::slot_offset(footer_size, slot_num);
        PageIndexSlot {
            size: u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()),
            page_offset: u32::from_le_bytes(buf[off + 4..off + 8].try_into().unwrap()),
            forward_page: u32::from_le_bytes(buf[off + 8..off + 12].try_into().unwrap()),
            forward_slot: u32::from_le_bytes(buf[off + 12..off + 16].try_into().unwrap()),
            is_anchor: u32::from_le_bytes(buf[off + 16..off + 20].try_into().unwrap()) != 0,
        }
    }

    pub fn write(&self, buf: &mut [u8; PAGE_SIZE], footer_size: usize, slot_num: u32) {
        let off = Self::slot_offset(footer_size, slot_num);
        buf[off..off + 4].copy_from_slice(&self.size.to_le_bytes());
        buf[off + 4..off + 8].copy_from_slice(&self.page_offset.to_le_bytes());
        buf[off + 8..off + 12].copy_from_slice(&self.forward_page.to_le_bytes());
        buf[off + 12..off + 16].copy_from_slice(&self.forward_slot.to_le_bytes());
        buf[off + 16..off + 20].copy_from_slice(&(self.is_anchor as u32).to_le_bytes());
    }
}

/// Bytes still unaccounted for between the live records and the slot
/// directory: what insertion has left to work with before the page is full.
pub fn calculate_freespace(footer_size: usize, free_space_offset: u32, num_slots: u32) -> usize {
    let used_by_slots = num_slots as usize * SLOT_SIZE;
    PAGE_SIZE
        .saturating_sub(footer_size)
        .saturating_sub(free_space_offset as usize)
        .saturating_sub(used_by_slots)
}

/// First freespace list whose cutoff guarantees enough room and that
/// actually has a page on it. Shared by the record engine and the B+ tree:
/// both insert by walking this same directory before falling back to
/// appending a fresh page.
pub fn find_page_with_freespace(header: &PfHeader, required: usize) -> Option<u32> {
    header
        .freespace_lists
        .iter()
        .find(|entry| entry.cutoff as usize >= required && entry.list_head != 0)
        .map(|entry| entry.list_head)
}

/// Removes `page_num` (whose current footer is `footer`) from whatever
/// freespace list it is presently linked into.
pub fn unlink_from_freespace_list(
    file: &mut PagedFile,
    header: &mut PfHeader,
    footer_size: usize,
    page_num: u32,
    footer: &CoreFooter,
) -> Result<()> {
    let list_idx = footer.freespace_list as usize;
    if footer.freespace_prev_page == 0 {
        header.freespace_lists[list_idx].list_head = footer.freespace_next_page;
    } else {
        let mut prev_buf = [0u8; PAGE_SIZE];
        file.read_page(footer.freespace_prev_page, &mut prev_buf)?;
        let mut prev_footer = CoreFooter::read(&prev_buf, footer_size);
        prev_footer.freespace_next_page = footer.freespace_next_page;
        prev_footer.write(&mut prev_buf, footer_size);
        file.write_page(footer.freespace_prev_page, &prev_buf)?;
    }
    if footer.freespace_next_page != 0 {
        let mut next_buf = [0u8; PAGE_SIZE];
        file.read_page(footer.freespace_next_page, &mut next_buf)?;
        let mut next_footer = CoreFooter::read(&next_buf, footer_size);
        next_footer.freespace_prev_page = footer.freespace_prev_page;
        next_footer.write(&mut next_buf, footer_size);
        file.write_page(footer.freespace_next_page, &next_buf)?;
    }
    let _ = page_num;
    Ok(())
}

/// Prepends `page_num` onto freespace list `dest_index`.
pub fn link_into_freespace_list(
    file: &mut PagedFile,
    header: &mut PfHeader,
    footer_size: usize,
    page_num: u32,
    dest_index: usize,
) -> Result<(u32, u32)> {
    let old_head = header.freespace_lists[dest_index].list_head;
    if old_head != 0 {
        let mut head_buf = [0u8; PAGE_SIZE];
        file.read_page(old_head, &mut head_buf)?;
        let mut head_footer = CoreFooter::read(&head_buf, footer_size);
        head_footer.freespace_prev_page = page_num;
        head_footer.write(&mut head_buf, footer_size);
        file.write_page(old_head, &head_buf)?;
    }
    header.freespace_lists[dest_index].list_head = page_num;
    Ok((0, old_head))
}

/// Moves a page to the freespace list matching its current free byte count,
/// unlinking it from its old list first if the class actually changed.
pub fn move_page_to_correct_freespace_list(
    file: &mut PagedFile,
    header: &mut PfHeader,
    footer_size: usize,
    page_num: u32,
) -> Result<()> {
    let mut buf = [0u8; PAGE_SIZE];
    file.read_page(page_num, &mut buf)?;
    let mut footer = CoreFooter::read(&buf, footer_size);
    let free_bytes = calculate_freespace(footer_size, footer.free_space_offset, footer.num_slots);
    let new_index = header.classify(free_bytes);
    if new_index == footer.freespace_list as usize {
        return Ok(());
    }
    unlink_from_freespace_list(file, header, footer_size, page_num, &footer)?;
    let (prev, old_head) = link_into_freespace_list(file, header, footer_size, page_num, new_index)?;
    footer.freespace_list = new_index as u32;
    footer.freespace_prev_page = prev;
    footer.freespace_next_page = old_head;
    footer.write(&mut buf, footer_size);
    file.write_page(page_num, &buf)?;
    Ok(())
}
