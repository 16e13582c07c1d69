//! The clustered B+ tree index: each index lives in its own paged file, leaf
//! and non-leaf pages are record-engine-style slotted pages carrying an
//! intrusive sorted linked list of index entries, and splits never merge or
//! redistribute on delete.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use log::debug;

use crate::attribute::{AttrType, Value, MAX_KEY_SIZE};
use crate::error::{Result, StorageError};
use crate::page::{
    calculate_freespace, link_into_freespace_list, move_page_to_correct_freespace_list,
    CoreFooter, PageIndexSlot, PfHeader, CORE_FOOTER_SIZE,
};
use crate::pf::{PagedFile, PagedFileManager, PAGE_SIZE};
use crate::rid::Rid;

const BT_FOOTER_EXTENSION: usize = 4 + 8 + 4 + 4; // is_leaf, first_record, next_leaf_page, left_child
pub const BT_FOOTER_SIZE: usize = CORE_FOOTER_SIZE + BT_FOOTER_EXTENSION;

fn encode_index_entry(next_slot: Rid, data_rid: Rid, key: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + key.wire_size());
    buf.extend_from_slice(&next_slot.to_le_bytes());
    buf.extend_from_slice(&data_rid.to_le_bytes());
    buf.extend_from_slice(&key.to_le_bytes());
    buf
}

fn decode_index_entry(attr_type: AttrType, bytes: &[u8]) -> Result<(Rid, Rid, Value)> {
    let next_slot = Rid::from_le_bytes(&bytes[0..8]);
    let data_rid = Rid::from_le_bytes(&bytes[8..16]);
    let (key, _) = Value::from_le_bytes(attr_type, &bytes[16..])?;
    Ok((next_slot, data_rid, key))
}

/// Footer for an index page: the record-engine core fields plus the tree
/// pointers a leaf or non-leaf page needs. `is_leaf` selects which of
/// `next_leaf_page` (leaf sibling chain) or `left_child` (keys below the
/// first entry) is meaningful.
#[derive(Debug, Clone, Copy)]
struct IxFooter {
    core: CoreFooter,
    is_leaf: bool,
    first_record: Rid,
    next_leaf_page: u32,
    left_child: u32,
}

impl IxFooter {
    fn read(buf: &[u8; PAGE_SIZE]) -> Self {
        let core = CoreFooter::read(buf, BT_FOOTER_SIZE);
        let base = PAGE_SIZE - BT_FOOTER_SIZE + CORE_FOOTER_SIZE;
        let is_leaf = u32::from_le_bytes(buf[base..base + 4].try_into().unwrap()) != 0;
        let first_record = Rid::from_le_bytes(&buf[base + 4..base + 12]);
        let next_leaf_page = u32::from_le_bytes(buf[base + 12..base + 16].try_into().unwrap());
        let left_child = u32::from_le_bytes(buf[base + 16..base + 20].try_into().unwrap());
        IxFooter {
            core,
            is_leaf,
            first_record,
            next_leaf_page,
            left_child,
        }
    }

    fn write(&self, buf: &mut [u8; PAGE_SIZE]) {
        self.core.write(buf, BT_FOOTER_SIZE);
        let base = PAGE_SIZE - BT_FOOTER_SIZE + CORE_FOOTER_SIZE;
        buf[base..base + 4].copy_from_slice(&(self.is_leaf as u32).to_le_bytes());
        buf[base + 4..base + 12].copy_from_slice(&self.first_record.to_le_bytes());
        buf[base + 12..base + 16].copy_from_slice(&self.next_leaf_page.to_le_bytes());
        buf[base + 16..base + 20].copy_from_slice(&self.left_child.to_le_bytes());
    }
}

type OrderedEntry = (u32, Rid, Rid, Value); // (slot_num, next_slot, ref_rid, key)

/// Explicit, owned filename-to-root-page registry. An `IndexManager` consults
/// this instead of a hidden global so a process touching several index files
/// keeps one process-scoped cache it can construct, pass around and drop.
#[derive(Debug, Default)]
pub struct RootPageCache {
    entries: HashMap<String, u32>,
}

impl RootPageCache {
    pub fn new() -> Self {
        RootPageCache {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, filename: &str) -> Option<u32> {
        self.entries.get(filename).copied()
    }

    pub fn set(&mut self, filename: String, root_page: u32) {
        self.entries.insert(filename, root_page);
    }

    pub fn invalidate(&mut self, filename: &str) {
        self.entries.remove(filename);
    }
}

/// Owns one open index file: its paged file, freespace header, and the
/// cached root page number mirrored in the last 4 bytes of page 0.
pub struct IndexManager {
    file: PagedFile,
    header: PfHeader,
    filename: String,
    attr_type: AttrType,
    root_page: u32,
}

impl IndexManager {
    pub fn create_file(pfm: &mut PagedFileManager, path: impl AsRef<Path>) -> Result<()> {
        pfm.create_file(&path)?;
        let mut file = pfm.open_file(&path)?;
        let header = PfHeader::new();
        let mut buf = [0u8; PAGE_SIZE];
        header.to_bytes(&mut buf);
        buf[PAGE_SIZE - 4..].copy_from_slice(&0u32.to_le_bytes());
        file.append_page(&buf)?;
        pfm.close_file(file)?;
        debug!("initialized index file {}", path.as_ref().display());
        Ok(())
    }

    pub fn destroy_file(pfm: &PagedFileManager, path: impl AsRef<Path>) -> Result<()> {
        pfm.destroy_file(path)
    }

    pub fn open_file(
        pfm: &mut PagedFileManager,
        path: impl AsRef<Path>,
        attr_type: AttrType,
        cache: &mut RootPageCache,
    ) -> Result<Self> {
        let filename = path.as_ref().display().to_string();
        let mut file = pfm.open_file(path)?;
        let mut buf = [0u8; PAGE_SIZE];
        file.read_page(0, &mut buf)?;
        let header = PfHeader::from_bytes(&buf)?;
        let root_page = match cache.get(&filename) {
            Some(r) => r,
            None => u32::from_le_bytes(buf[PAGE_SIZE - 4..].try_into().unwrap()),
        };
        cache.set(filename.clone(), root_page);
        Ok(IndexManager {
            file,
            header,
            filename,
            attr_type,
            root_page,
        })
    }

    pub fn close(self, pfm: &mut PagedFileManager) -> Result<()> {
        pfm.close_file(self.file)
    }

    fn read_page_buf(&mut self, page_num: u32) -> Result<[u8; PAGE_SIZE]> {
        let mut buf = [0u8; PAGE_SIZE];
        self.file.read_page(page_num, &mut buf)?;
        Ok(buf)
    }

    fn write_page_buf(&mut self, page_num: u32, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        self.file.write_page(page_num, buf)
    }

    fn read_ix_footer(&mut self, page_num: u32) -> Result<IxFooter> {
        let buf = self.read_page_buf(page_num)?;
        Ok(IxFooter::read(&buf))
    }

    fn set_root(&mut self, new_root: u32, cache: &mut RootPageCache) -> Result<()> {
        self.root_page = new_root;
        cache.set(self.filename.clone(), new_root);
        let mut buf = self.read_page_buf(0)?;
        buf[PAGE_SIZE - 4..].copy_from_slice(&new_root.to_le_bytes());
        self.write_page_buf(0, &buf)
    }

    /// Page 0 carries both the `PfHeader` (freespace-list directory) and the
    /// cached root page number in its last 4 bytes; this rewrites the header
    /// region only, preserving whatever root pointer is already there.
    fn write_header(&mut self) -> Result<()> {
        let mut buf = self.read_page_buf(0)?;
        self.header.to_bytes(&mut buf);
        buf[PAGE_SIZE - 4..].copy_from_slice(&self.root_page.to_le_bytes());
        self.write_page_buf(0, &buf)
    }

    fn new_page(&mut self, is_leaf: bool, next_leaf_page: u32, left_child: u32) -> Result<u32> {
        let empty = [0u8; PAGE_SIZE];
        let page_num = self.file.append_page(&empty)?;
        self.header.num_pages = self.file.num_pages();

        let free_bytes = calculate_freespace(BT_FOOTER_SIZE, 0, 0);
        let class = self.header.classify(free_bytes);
        let (prev, old_head) = link_into_freespace_list(
            &mut self.file,
            &mut self.header,
            BT_FOOTER_SIZE,
            page_num,
            class,
        )?;

        let footer = IxFooter {
            core: CoreFooter {
                free_space_offset: 0,
                num_slots: 0,
                gap_size: 0,
                page_number: page_num,
                freespace_list: class as u32,
                freespace_prev_page: prev,
                freespace_next_page: old_head,
            },
            is_leaf,
            first_record: Rid::NULL,
            next_leaf_page,
            left_child,
        };
        let mut buf = [0u8; PAGE_SIZE];
        footer.write(&mut buf);
        self.write_page_buf(page_num, &buf)?;
        self.write_header()?;
        Ok(page_num)
    }

    fn freespace_on_page(&mut self, page_num: u32) -> Result<usize> {
        let footer = self.read_ix_footer(page_num)?;
        Ok(calculate_freespace(
            BT_FOOTER_SIZE,
            footer.core.free_space_offset,
            footer.core.num_slots,
        ))
    }

    /// Walks the intrusive sorted linked list starting at the page's
    /// `first_record`, returning entries in ascending key order.
    fn page_entries_in_order(&mut self, page_num: u32) -> Result<Vec<OrderedEntry>> {
        let buf = self.read_page_buf(page_num)?;
        let footer = IxFooter::read(&buf);
        let mut out = Vec::with_capacity(footer.core.num_slots as usize);
        let mut cursor = footer.first_record;
        while !cursor.is_null() {
            let slot_num = cursor.slot_num;
            let slot = PageIndexSlot::read(&buf, BT_FOOTER_SIZE, slot_num);
            let start = slot.page_offset as usize;
            let bytes = &buf[start..start + slot.size as usize];
            let (next_slot, ref_rid, key) = decode_index_entry(self.attr_type, bytes)?;
            out.push((slot_num, next_slot, ref_rid, key));
            cursor = next_slot;
        }
        Ok(out)
    }

    fn patch_next_slot(&mut self, page_num: u32, slot_num: u32, new_next: Rid) -> Result<()> {
        let mut buf = self.read_page_buf(page_num)?;
        let slot = PageIndexSlot::read(&buf, BT_FOOTER_SIZE, slot_num);
        let off = slot.page_offset as usize;
        buf[off..off + 8].copy_from_slice(&new_next.to_le_bytes());
        self.write_page_buf(page_num, &buf)
    }

    fn set_first_record(&mut self, page_num: u32, rid: Rid) -> Result<()> {
        let mut buf = self.read_page_buf(page_num)?;
        let mut footer = IxFooter::read(&buf);
        footer.first_record = rid;
        footer.write(&mut buf);
        self.write_page_buf(page_num, &buf)
    }

    fn set_next_leaf_page(&mut self, page_num: u32, next_leaf_page: u32) -> Result<()> {
        let mut buf = self.read_page_buf(page_num)?;
        let mut footer = IxFooter::read(&buf);
        footer.next_leaf_page = next_leaf_page;
        footer.write(&mut buf);
        self.write_page_buf(page_num, &buf)
    }

    /// Resets an emptied leaf's footer to a pristine, fully-free state so the
    /// next insert routed here lands directly instead of hitting `split_page`
    /// on a zero-entry page.
    fn reorganize_emptied_leaf(&mut self, page_num: u32) -> Result<()> {
        let mut buf = self.read_page_buf(page_num)?;
        let mut footer = IxFooter::read(&buf);
        footer.core.free_space_offset = 0;
        footer.core.num_slots = 0;
        footer.core.gap_size = 0;
        footer.write(&mut buf);
        self.write_page_buf(page_num, &buf)?;
        move_page_to_correct_freespace_list(
            &mut self.file,
            &mut self.header,
            BT_FOOTER_SIZE,
            page_num,
        )?;
        self.write_header()
    }

    fn append_entry_slot(&mut self, page_num: u32, next_slot: Rid, ref_rid: Rid, key: &Value) -> Result<u32> {
        let mut buf = self.read_page_buf(page_num)?;
        let mut footer = IxFooter::read(&buf);
        let entry_bytes = encode_index_entry(next_slot, ref_rid, key);

        let offset = footer.core.free_space_offset as usize;
        buf[offset..offset + entry_bytes.len()].copy_from_slice(&entry_bytes);

        let slot_num = footer.core.num_slots;
        let slot = PageIndexSlot {
            size: entry_bytes.len() as u32,
            page_offset: offset as u32,
            forward_page: 0,
            forward_slot: 0,
            is_anchor: false,
        };
        slot.write(&mut buf, BT_FOOTER_SIZE, slot_num);

        footer.core.free_space_offset += entry_bytes.len() as u32;
        footer.core.num_slots += 1;
        footer.write(&mut buf);

        self.write_page_buf(page_num, &buf)?;
        Ok(slot_num)
    }

    /// Inserts a new entry into the sorted chain on a page that already has
    /// room for it. Entries with equal keys land after existing equal keys.
    fn insert_into_page_chain(&mut self, page_num: u32, ref_rid: Rid, key: &Value) -> Result<()> {
        let entries = self.page_entries_in_order(page_num)?;
        let mut pred_slot = None;
        let mut succ = Rid::NULL;
        for (slot_num, next_slot, _, entry_key) in &entries {
            if entry_key.compare(key) != Ordering::Greater {
                pred_slot = Some(*slot_num);
                succ = *next_slot;
            } else {
                break;
            }
        }
        let new_slot = self.append_entry_slot(page_num, succ, ref_rid, key)?;
        match pred_slot {
            Some(p) => self.patch_next_slot(page_num, p, Rid::new(page_num, new_slot))?,
            None => self.set_first_record(page_num, Rid::new(page_num, new_slot))?,
        }
        Ok(())
    }

    fn find_child_page(&mut self, page_num: u32, key: &Value) -> Result<u32> {
        let footer = self.read_ix_footer(page_num)?;
        let entries = self.page_entries_in_order(page_num)?;
        let mut target = footer.left_child;
        for (_, _, ref_rid, entry_key) in &entries {
            if entry_key.compare(key) != Ordering::Greater {
                target = ref_rid.page_num;
            } else {
                break;
            }
        }
        if target == 0 {
            return Err(StorageError::BTreeCannotFindLeaf);
        }
        Ok(target)
    }

    /// Rewrites a page's content from scratch with `entries`, densely
    /// renumbered starting at slot 0. Used after a deletion-less split. RIDs
    /// of index entries (not to be confused with the data RIDs they carry)
    /// are not preserved across this rewrite.
    fn rewrite_page(
        &mut self,
        page_num: u32,
        entries: &[(Rid, Value)],
        is_leaf: bool,
        next_leaf_page: u32,
        left_child: u32,
    ) -> Result<()> {
        let old_buf = self.read_page_buf(page_num)?;
        let old_core = CoreFooter::read(&old_buf, BT_FOOTER_SIZE);

        let mut buf = [0u8; PAGE_SIZE];
        let mut offset = 0usize;
        for (i, (ref_rid, key)) in entries.iter().enumerate() {
            let next = if i + 1 < entries.len() {
                Rid::new(page_num, (i + 1) as u32)
            } else {
                Rid::NULL
            };
            let bytes = encode_index_entry(next, *ref_rid, key);
            buf[offset..offset + bytes.len()].copy_from_slice(&bytes);
            let slot = PageIndexSlot {
                size: bytes.len() as u32,
                page_offset: offset as u32,
                forward_page: 0,
                forward_slot: 0,
                is_anchor: false,
            };
            slot.write(&mut buf, BT_FOOTER_SIZE, i as u32);
            offset += bytes.len();
        }

        let footer = IxFooter {
            core: CoreFooter {
                free_space_offset: offset as u32,
                num_slots: entries.len() as u32,
                gap_size: 0,
                page_number: page_num,
                freespace_list: old_core.freespace_list,
                freespace_prev_page: old_core.freespace_prev_page,
                freespace_next_page: old_core.freespace_next_page,
            },
            is_leaf,
            first_record: if entries.is_empty() {
                Rid::NULL
            } else {
                Rid::new(page_num, 0)
            },
            next_leaf_page,
            left_child,
        };
        footer.write(&mut buf);
        self.write_page_buf(page_num, &buf)?;
        move_page_to_correct_freespace_list(
            &mut self.file,
            &mut self.header,
            BT_FOOTER_SIZE,
            page_num,
        )?;
        self.write_header()?;
        Ok(())
    }

    /// Deletion-less split: roughly half the entries by byte size move to a
    /// freshly allocated page. For a leaf split the separator key is a copy
    /// of the first entry that moved right (that entry itself stays on the
    /// right page). For a non-leaf split the middle entry is consumed: its
    /// key is promoted and its child pointer becomes the right page's
    /// `left_child`.
    ///
    /// `incoming_key` is the key whose insert triggered the split. A page
    /// with at most one existing entry can't be divided into two non-empty
    /// halves, so that case is handled separately: every existing entry
    /// stays put and a fresh, empty sibling is created to receive the
    /// incoming insert.
    fn split_page(&mut self, page_num: u32, incoming_key: &Value) -> Result<(Value, u32)> {
        let footer = self.read_ix_footer(page_num)?;
        let entries = self.page_entries_in_order(page_num)?;

        if entries.len() <= 1 {
            return if footer.is_leaf {
                let new_page_num = self.new_page(true, footer.next_leaf_page, 0)?;
                self.set_next_leaf_page(page_num, new_page_num)?;
                debug!("degenerate split of leaf page {page_num} into empty page {new_page_num}");
                Ok((incoming_key.clone(), new_page_num))
            } else {
                let new_page_num = self.new_page(false, 0, 0)?;
                debug!("degenerate split of non-leaf page {page_num} into empty page {new_page_num}");
                Ok((incoming_key.clone(), new_page_num))
            };
        }

        let sizes: Vec<usize> = entries.iter().map(|e| 16 + e.3.wire_size()).collect();
        let total: usize = sizes.iter().sum();
        let mut running = 0usize;
        let mut split_idx = entries.len() / 2;
        for (i, s) in sizes.iter().enumerate() {
            running += s;
            if running >= total / 2 {
                split_idx = i + 1;
                break;
            }
        }
        split_idx = split_idx.clamp(1, entries.len() - 1);

        if footer.is_leaf {
            let promoted_key = entries[split_idx].3.clone();
            let left: Vec<(Rid, Value)> = entries[..split_idx]
                .iter()
                .map(|e| (e.2, e.3.clone()))
                .collect();
            let right: Vec<(Rid, Value)> = entries[split_idx..]
                .iter()
                .map(|e| (e.2, e.3.clone()))
                .collect();

            let new_page_num = self.new_page(true, footer.next_leaf_page, 0)?;
            self.rewrite_page(new_page_num, &right, true, footer.next_leaf_page, 0)?;
            self.rewrite_page(page_num, &left, true, new_page_num, 0)?;
            debug!("split leaf page {page_num} into new page {new_page_num}");
            Ok((promoted_key, new_page_num))
        } else {
            let promoted_key = entries[split_idx].3.clone();
            let right_left_child = entries[split_idx].2.page_num;
            let left: Vec<(Rid, Value)> = entries[..split_idx]
                .iter()
                .map(|e| (e.2, e.3.clone()))
                .collect();
            let right: Vec<(Rid, Value)> = entries[split_idx + 1..]
                .iter()
                .map(|e| (e.2, e.3.clone()))
                .collect();

            let new_page_num = self.new_page(false, 0, right_left_child)?;
            self.rewrite_page(new_page_num, &right, false, 0, right_left_child)?;
            self.rewrite_page(page_num, &left, false, 0, footer.left_child)?;
            debug!("split non-leaf page {page_num} into new page {new_page_num}");
            Ok((promoted_key, new_page_num))
        }
    }

    fn insert_recursive(&mut self, page_num: u32, key: &Value, rid: Rid) -> Result<Option<(Value, u32)>> {
        let footer = self.read_ix_footer(page_num)?;
        if footer.is_leaf {
            let needed = 16 + key.wire_size() + crate::page::SLOT_SIZE;
            if self.freespace_on_page(page_num)? < needed {
                let (promoted_key, new_page) = self.split_page(page_num, key)?;
                let target = if key.compare(&promoted_key) == Ordering::Less {
                    page_num
                } else {
                    new_page
                };
                self.insert_into_page_chain(target, rid, key)?;
                return Ok(Some((promoted_key, new_page)));
            }
            self.insert_into_page_chain(page_num, rid, key)?;
            Ok(None)
        } else {
            let child = self.find_child_page(page_num, key)?;
            match self.insert_recursive(child, key, rid)? {
                None => Ok(None),
                Some((promoted_key, new_child)) => {
                    let needed = 16 + promoted_key.wire_size() + crate::page::SLOT_SIZE;
                    if self.freespace_on_page(page_num)? < needed {
                        let (grandparent_key, new_page) = self.split_page(page_num, &promoted_key)?;
                        let target = if promoted_key.compare(&grandparent_key) == Ordering::Less {
                            page_num
                        } else {
                            new_page
                        };
                        self.insert_into_page_chain(target, Rid::new(new_child, 0), &promoted_key)?;
                        return Ok(Some((grandparent_key, new_page)));
                    }
                    self.insert_into_page_chain(page_num, Rid::new(new_child, 0), &promoted_key)?;
                    Ok(None)
                }
            }
        }
    }

    pub fn insert_entry(&mut self, key: Value, rid: Rid, cache: &mut RootPageCache) -> Result<()> {
        if key.wire_size() > MAX_KEY_SIZE {
            return Err(StorageError::BTreeKeyTooLarge(key.wire_size(), MAX_KEY_SIZE));
        }
        if self.root_page == 0 {
            let root = self.new_page(true, 0, 0)?;
            self.set_root(root, cache)?;
        }

        let root = self.root_page;
        if let Some((promoted_key, new_page)) = self.insert_recursive(root, &key, rid)? {
            let new_root = self.new_page(false, 0, root)?;
            self.insert_into_page_chain(new_root, Rid::new(new_page, 0), &promoted_key)?;
            self.set_root(new_root, cache)?;
            debug!("root grew to page {new_root}");
        }
        Ok(())
    }

    fn find_leaf_for_key(&mut self, key: &Value) -> Result<u32> {
        if self.root_page == 0 {
            return Err(StorageError::BTreeCannotFindLeaf);
        }
        let mut page = self.root_page;
        loop {
            let footer = self.read_ix_footer(page)?;
            if footer.is_leaf {
                return Ok(page);
            }
            page = self.find_child_page(page, key)?;
        }
    }

    /// No merge or redistribution happens on delete: the entry is spliced out
    /// of its page's sorted chain and its slot tombstoned in place.
    pub fn delete_entry(&mut self, key: &Value, rid: Rid) -> Result<()> {
        let leaf = self.find_leaf_for_key(key)?;
        let entries = self.page_entries_in_order(leaf)?;

        let mut pred_slot = None;
        let mut target = None;
        for (slot_num, next_slot, ref_rid, entry_key) in &entries {
            if entry_key == key && *ref_rid == rid {
                target = Some((*slot_num, *next_slot));
                break;
            }
            pred_slot = Some(*slot_num);
        }
        let (slot_num, next_slot) = target.ok_or(StorageError::BTreeIndexLeafEntryNotFound)?;
        let emptied = pred_slot.is_none() && next_slot.is_null();

        match pred_slot {
            Some(p) => self.patch_next_slot(leaf, p, next_slot)?,
            None => self.set_first_record(leaf, next_slot)?,
        }

        let mut buf = self.read_page_buf(leaf)?;
        PageIndexSlot::empty().write(&mut buf, BT_FOOTER_SIZE, slot_num);
        self.write_page_buf(leaf, &buf)?;

        if emptied {
            self.reorganize_emptied_leaf(leaf)?;
        }
        Ok(())
    }

    fn find_scan_start(&mut self, low: Option<&Value>, low_inclusive: bool) -> Result<Option<Rid>> {
        if self.root_page == 0 {
            return Ok(None);
        }
        let mut page = self.root_page;
        loop {
            let footer = self.read_ix_footer(page)?;
            if footer.is_leaf {
                break;
            }
            page = match low {
                Some(l) => self.find_child_page(page, l)?,
                None => footer.left_child,
            };
        }

        loop {
            let entries = self.page_entries_in_order(page)?;
            let found = entries.into_iter().find(|(_, _, _, k)| match low {
                Some(l) => {
                    let cmp = k.compare(l);
                    if low_inclusive {
                        cmp != Ordering::Less
                    } else {
                        cmp == Ordering::Greater
                    }
                }
                None => true,
            });
            if let Some((slot_num, _, _, _)) = found {
                return Ok(Some(Rid::new(page, slot_num)));
            }
            let footer = self.read_ix_footer(page)?;
            if footer.next_leaf_page == 0 {
                return Ok(None);
            }
            page = footer.next_leaf_page;
        }
    }

    fn read_entry_with_context(&mut self, pos: Rid) -> Result<(Rid, Rid, Value, u32)> {
        let buf = self.read_page_buf(pos.page_num)?;
        let slot = PageIndexSlot::read(&buf, BT_FOOTER_SIZE, pos.slot_num);
        let start = slot.page_offset as usize;
        let bytes = &buf[start..start + slot.size as usize];
        let (next_slot, ref_rid, key) = decode_index_entry(self.attr_type, bytes)?;
        let footer = IxFooter::read(&buf);
        Ok((next_slot, ref_rid, key, footer.next_leaf_page))
    }

    fn next_position(&mut self, next_slot: Rid, this_leaf_next_leaf_page: u32) -> Result<Option<Rid>> {
        if !next_slot.is_null() {
            return Ok(Some(next_slot));
        }
        let mut next_leaf = this_leaf_next_leaf_page;
        while next_leaf != 0 {
            let footer = self.read_ix_footer(next_leaf)?;
            if !footer.first_record.is_null() {
                return Ok(Some(footer.first_record));
            }
            next_leaf = footer.next_leaf_page;
        }
        Ok(None)
    }

    /// Ordered range scan over `[low, high]` with independently inclusive or
    /// exclusive bounds. `None` on either side means unbounded in that
    /// direction.
    pub fn scan(
        &mut self,
        low: Option<Value>,
        high: Option<Value>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> IndexScanIterator<'_> {
        IndexScanIterator {
            manager: self,
            current: None,
            started: false,
            low,
            low_inclusive,
            high,
            high_inclusive,
        }
    }
}

/// Walks leaf entries in ascending key order, hopping across the leaf
/// sibling chain, stopping once the high bound is exceeded.
pub struct IndexScanIterator<'a> {
    manager: &'a mut IndexManager,
    current: Option<Rid>,
    started: bool,
    low: Option<Value>,
    low_inclusive: bool,
    high: Option<Value>,
    high_inclusive: bool,
}

impl Iterator for IndexScanIterator<'_> {
    type Item = Result<(Value, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            match self
                .manager
                .find_scan_start(self.low.as_ref(), self.low_inclusive)
            {
                Ok(pos) => self.current = pos,
                Err(e) => return Some(Err(e)),
            }
        }

        let pos = self.current?;
        let (next_slot, ref_rid, key, next_leaf_page) = match self.manager.read_entry_with_context(pos) {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };

        if let Some(high) = &self.high {
            let cmp = key.compare(high);
            let past = if self.high_inclusive {
                cmp == Ordering::Greater
            } else {
                cmp != Ordering::Less
            };
            if past {
                self.current = None;
                return None;
            }
        }

        self.current = match self.manager.next_position(next_slot, next_leaf_page) {
            Ok(p) => p,
            Err(e) => return Some(Err(e)),
        };

        Some(Ok((key, ref_rid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (tempfile::TempPath, PagedFileManager, RootPageCache, IndexManager) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.into_temp_path();
        std::fs::remove_file(&path).unwrap();
        let mut pfm = PagedFileManager::new();
        IndexManager::create_file(&mut pfm, &path).unwrap();
        let mut cache = RootPageCache::new();
        let im = IndexManager::open_file(&mut pfm, &path, AttrType::Int, &mut cache).unwrap();
        (path, pfm, cache, im)
    }

    #[test]
    fn insert_and_scan_returns_ascending_order() {
        let (_path, _pfm, mut cache, mut im) = open_tmp();
        for k in [5, 1, 9, 3, 7] {
            im.insert_entry(Value::Int(k), Rid::new(1, k as u32), &mut cache)
                .unwrap();
        }
        let found: Vec<i32> = im
            .scan(None, None, true, true)
            .map(|r| match r.unwrap().0 {
                Value::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(found, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn scan_bounds_are_independently_inclusive() {
        let (_path, _pfm, mut cache, mut im) = open_tmp();
        for k in 0..10 {
            im.insert_entry(Value::Int(k), Rid::new(1, k as u32), &mut cache)
                .unwrap();
        }
        let found: Vec<i32> = im
            .scan(Some(Value::Int(3)), Some(Value::Int(6)), false, true)
            .map(|r| match r.unwrap().0 {
                Value::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(found, vec![4, 5, 6]);
    }

    #[test]
    fn delete_removes_entry_from_scan() {
        let (_path, _pfm, mut cache, mut im) = open_tmp();
        im.insert_entry(Value::Int(1), Rid::new(1, 1), &mut cache).unwrap();
        im.insert_entry(Value::Int(2), Rid::new(1, 2), &mut cache).unwrap();
        im.delete_entry(&Value::Int(1), Rid::new(1, 1)).unwrap();

        let found: Vec<i32> = im
            .scan(None, None, true, true)
            .map(|r| match r.unwrap().0 {
                Value::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(found, vec![2]);
    }

    #[test]
    fn delete_all_entries_then_insert_succeeds() {
        let (_path, _pfm, mut cache, mut im) = open_tmp();
        im.insert_entry(Value::Int(1), Rid::new(1, 1), &mut cache).unwrap();
        im.delete_entry(&Value::Int(1), Rid::new(1, 1)).unwrap();
        im.insert_entry(Value::Int(2), Rid::new(1, 2), &mut cache).unwrap();

        let found: Vec<i32> = im
            .scan(None, None, true, true)
            .map(|r| match r.unwrap().0 {
                Value::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(found, vec![2]);
    }

    #[test]
    fn splitting_a_single_entry_leaf_does_not_panic() {
        let (_path, _pfm, mut cache, mut im) = tmp_varchar();
        im.insert_entry(Value::VarChar("x".repeat(MAX_KEY_SIZE - 20)), Rid::new(1, 1), &mut cache)
            .unwrap();
        im.insert_entry(Value::VarChar("y".repeat(MAX_KEY_SIZE - 20)), Rid::new(1, 2), &mut cache)
            .unwrap();

        let count = im.scan(None, None, true, true).count();
        assert_eq!(count, 2);
    }

    fn tmp_varchar() -> (tempfile::TempPath, PagedFileManager, RootPageCache, IndexManager) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.into_temp_path();
        std::fs::remove_file(&path).unwrap();
        let mut pfm = PagedFileManager::new();
        IndexManager::create_file(&mut pfm, &path).unwrap();
        let mut cache = RootPageCache::new();
        let im = IndexManager::open_file(&mut pfm, &path, AttrType::VarChar, &mut cache).unwrap();
        (path, pfm, cache, im)
    }

    #[test]
    fn many_inserts_force_a_split_and_root_growth() {
        let (_path, _pfm, mut cache, mut im) = open_tmp();
        for k in 0..2000 {
            im.insert_entry(Value::Int(k), Rid::new(1, k as u32), &mut cache)
                .unwrap();
        }
        assert_ne!(im.root_page, 0);
        let count = im.scan(None, None, true, true).count();
        assert_eq!(count, 2000);
    }
}
