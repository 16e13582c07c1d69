//! The record engine: slotted pages of variable-length tuples on top of the
//! paged file, with freespace-class bucketed insertion and tombstone/forwarder
//! semantics for in-place update.

use std::path::Path;

use log::{debug, trace};

use crate::attribute::{Attribute, CompOp, Value};
use crate::error::{Result, StorageError};
use crate::page::{
    calculate_freespace, find_page_with_freespace, link_into_freespace_list,
    move_page_to_correct_freespace_list, CoreFooter, PageIndexSlot, PfHeader, CORE_FOOTER_SIZE,
    REORG_THRESHOLD, SLOT_SIZE,
};
use crate::pf::{PagedFile, PagedFileManager, PAGE_SIZE};
use crate::rid::Rid;

fn generate_record_bytes(values: &[Value]) -> Vec<u8> {
    let n = values.len();
    let header_size = (n + 2) * 4;
    let mut payload = Vec::new();
    let mut attr_offsets = Vec::with_capacity(n);
    let mut running = header_size;
    for v in values {
        let bytes = v.to_le_bytes();
        running += bytes.len();
        attr_offsets.push(running as u32);
        payload.extend_from_slice(&bytes);
    }
    let end_offset = running as u32;
    let mut buf = Vec::with_capacity(running);
    buf.extend_from_slice(&(n as u32).to_le_bytes());
    for off in &attr_offsets {
        buf.extend_from_slice(&off.to_le_bytes());
    }
    buf.extend_from_slice(&end_offset.to_le_bytes());
    buf.extend_from_slice(&payload);
    buf
}

fn record_attr_count(bytes: &[u8]) -> usize {
    u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize
}

fn record_attr_end_offset(bytes: &[u8], idx: usize) -> u32 {
    let at = 4 + idx * 4;
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn decode_record(descriptor: &[Attribute], bytes: &[u8]) -> Result<Vec<Value>> {
    let n = record_attr_count(bytes);
    let header_size = (n + 2) * 4;
    let mut values = Vec::with_capacity(n);
    let mut start = header_size;
    for (i, attr) in descriptor.iter().enumerate().take(n) {
        let end = record_attr_end_offset(bytes, i) as usize;
        let (value, _) = Value::from_le_bytes(attr.attr_type, &bytes[start..end])?;
        values.push(value);
        start = end;
    }
    Ok(values)
}

fn attr_index(descriptor: &[Attribute], name: &str) -> Result<usize> {
    descriptor
        .iter()
        .position(|a| a.name == name)
        .ok_or_else(|| StorageError::AttributeNotFound(name.to_string()))
}

/// Owns the paged file for one record-engine relation: slotted pages of
/// tuples, the freespace-list directory, and the tombstone/forwarder chains
/// that make in-place update possible without renumbering slots.
pub struct RecordManager {
    file: PagedFile,
    header: PfHeader,
}

impl RecordManager {
    pub fn create_file(pfm: &mut PagedFileManager, path: impl AsRef<Path>) -> Result<()> {
        pfm.create_file(&path)?;
        let mut file = pfm.open_file(&path)?;
        let header = PfHeader::new();
        let mut buf = [0u8; PAGE_SIZE];
        header.to_bytes(&mut buf);
        file.append_page(&buf)?;
        pfm.close_file(file)?;
        debug!("initialized record file {}", path.as_ref().display());
        Ok(())
    }

    pub fn destroy_file(pfm: &PagedFileManager, path: impl AsRef<Path>) -> Result<()> {
        pfm.destroy_file(path)
    }

    pub fn open_file(pfm: &mut PagedFileManager, path: impl AsRef<Path>) -> Result<Self> {
        let mut file = pfm.open_file(path)?;
        let mut buf = [0u8; PAGE_SIZE];
        file.read_page(0, &mut buf)?;
        let header = PfHeader::from_bytes(&buf)?;
        Ok(RecordManager { file, header })
    }

    pub fn close(self, pfm: &mut PagedFileManager) -> Result<()> {
        pfm.close_file(self.file)
    }

    pub fn num_pages(&self) -> u32 {
        self.file.num_pages()
    }

    fn read_page_buf(&mut self, page_num: u32) -> Result<[u8; PAGE_SIZE]> {
        let mut buf = [0u8; PAGE_SIZE];
        self.file.read_page(page_num, &mut buf)?;
        Ok(buf)
    }

    fn write_page_buf(&mut self, page_num: u32, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        self.file.write_page(page_num, buf)
    }

    fn write_header(&mut self) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        self.header.to_bytes(&mut buf);
        self.file.write_page(0, &buf)
    }

    fn append_new_page(&mut self) -> Result<u32> {
        let buf = [0u8; PAGE_SIZE];
        let page_num = self.file.append_page(&buf)?;
        self.header.num_pages = self.file.num_pages();

        let mut footer = CoreFooter::new(page_num);
        let free_bytes = calculate_freespace(CORE_FOOTER_SIZE, 0, 0);
        let class = self.header.classify(free_bytes);
        let (prev, old_head) = link_into_freespace_list(
            &mut self.file,
            &mut self.header,
            CORE_FOOTER_SIZE,
            page_num,
            class,
        )?;
        footer.freespace_list = class as u32;
        footer.freespace_prev_page = prev;
        footer.freespace_next_page = old_head;

        let mut buf = [0u8; PAGE_SIZE];
        footer.write(&mut buf, CORE_FOOTER_SIZE);
        self.write_page_buf(page_num, &buf)?;
        trace!("appended page {page_num} into freespace class {class}");
        Ok(page_num)
    }

    fn insert_record_to_page_bytes(&mut self, page_num: u32, record_bytes: &[u8]) -> Result<Rid> {
        let mut buf = self.read_page_buf(page_num)?;
        let mut footer = CoreFooter::read(&buf, CORE_FOOTER_SIZE);

        let offset = footer.free_space_offset as usize;
        buf[offset..offset + record_bytes.len()].copy_from_slice(record_bytes);

        let slot_num = footer.num_slots;
        let slot = PageIndexSlot {
            size: record_bytes.len() as u32,
            page_offset: offset as u32,
            forward_page: 0,
            forward_slot: 0,
            is_anchor: false,
        };
        slot.write(&mut buf, CORE_FOOTER_SIZE, slot_num);

        footer.free_space_offset += record_bytes.len() as u32;
        footer.num_slots += 1;
        footer.write(&mut buf, CORE_FOOTER_SIZE);

        self.write_page_buf(page_num, &buf)?;
        move_page_to_correct_freespace_list(
            &mut self.file,
            &mut self.header,
            CORE_FOOTER_SIZE,
            page_num,
        )?;
        self.write_header()?;

        Ok(Rid::new(page_num, slot_num))
    }

    fn insert_record_bytes_anywhere(&mut self, record_bytes: &[u8]) -> Result<Rid> {
        if record_bytes.len() + SLOT_SIZE > PAGE_SIZE - CORE_FOOTER_SIZE {
            return Err(StorageError::RecordExceedsPageSize(record_bytes.len()));
        }
        let page_num = match find_page_with_freespace(&self.header, record_bytes.len() + SLOT_SIZE) {
            Some(p) => p,
            None => self.append_new_page()?,
        };
        self.insert_record_to_page_bytes(page_num, record_bytes)
    }

    pub fn insert_record(&mut self, values: &[Value]) -> Result<Rid> {
        let record_bytes = generate_record_bytes(values);
        self.insert_record_bytes_anywhere(&record_bytes)
    }

    fn resolve_read(&mut self, rid: Rid) -> Result<([u8; PAGE_SIZE], PageIndexSlot)> {
        let buf = self.read_page_buf(rid.page_num)?;
        let slot = PageIndexSlot::read(&buf, CORE_FOOTER_SIZE, rid.slot_num);
        if slot.is_tombstone() {
            return Err(StorageError::RecordDeleted(rid));
        }
        if slot.is_forwarder() {
            let target = Rid::new(slot.forward_page, slot.forward_slot);
            let tbuf = self.read_page_buf(target.page_num)?;
            let tslot = PageIndexSlot::read(&tbuf, CORE_FOOTER_SIZE, target.slot_num);
            return Ok((tbuf, tslot));
        }
        Ok((buf, slot))
    }

    pub fn read_record(&mut self, descriptor: &[Attribute], rid: Rid) -> Result<Vec<Value>> {
        let (buf, slot) = self.resolve_read(rid)?;
        let start = slot.page_offset as usize;
        let end = start + slot.size as usize;
        decode_record(descriptor, &buf[start..end])
    }

    pub fn read_attribute(&mut self, descriptor: &[Attribute], rid: Rid, name: &str) -> Result<Value> {
        let idx = attr_index(descriptor, name)?;
        let (buf, slot) = self.resolve_read(rid)?;
        let record_start = slot.page_offset as usize;
        let record_bytes = &buf[record_start..record_start + slot.size as usize];
        let n = record_attr_count(record_bytes);
        let header_size = (n + 2) * 4;
        let start = if idx == 0 {
            header_size
        } else {
            record_attr_end_offset(record_bytes, idx - 1) as usize
        };
        let end = record_attr_end_offset(record_bytes, idx) as usize;
        let (value, _) = Value::from_le_bytes(descriptor[idx].attr_type, &record_bytes[start..end])?;
        Ok(value)
    }

    fn try_update_inplace(&mut self, rid: Rid, new_bytes: &[u8]) -> Result<bool> {
        let mut buf = self.read_page_buf(rid.page_num)?;
        let mut slot = PageIndexSlot::read(&buf, CORE_FOOTER_SIZE, rid.slot_num);
        let mut footer = CoreFooter::read(&buf, CORE_FOOTER_SIZE);

        if new_bytes.len() <= slot.size as usize {
            let off = slot.page_offset as usize;
            buf[off..off + new_bytes.len()].copy_from_slice(new_bytes);
            footer.gap_size += (slot.size as usize - new_bytes.len()) as u32;
            slot.size = new_bytes.len() as u32;
            slot.write(&mut buf, CORE_FOOTER_SIZE, rid.slot_num);
            footer.write(&mut buf, CORE_FOOTER_SIZE);
            self.write_page_buf(rid.page_num, &buf)?;
            self.maybe_reorganize(rid.page_num)?;
            return Ok(true);
        }

        // Growing past the current slot size is only safe in place when this
        // is the last record on the page (its tail abuts free_space_offset)
        // and there is enough uncommitted freespace to absorb the extra bytes.
        let is_last_record = slot.page_offset + slot.size == footer.free_space_offset;
        let extra_needed = new_bytes.len() - slot.size as usize;
        let avail = calculate_freespace(CORE_FOOTER_SIZE, footer.free_space_offset, footer.num_slots);
        if is_last_record && avail >= extra_needed {
            let off = slot.page_offset as usize;
            buf[off..off + new_bytes.len()].copy_from_slice(new_bytes);
            footer.free_space_offset += extra_needed as u32;
            slot.size = new_bytes.len() as u32;
            slot.write(&mut buf, CORE_FOOTER_SIZE, rid.slot_num);
            footer.write(&mut buf, CORE_FOOTER_SIZE);
            self.write_page_buf(rid.page_num, &buf)?;
            move_page_to_correct_freespace_list(
                &mut self.file,
                &mut self.header,
                CORE_FOOTER_SIZE,
                rid.page_num,
            )?;
            return Ok(true);
        }

        Ok(false)
    }

    fn mark_anchor(&mut self, rid: Rid) -> Result<()> {
        let mut buf = self.read_page_buf(rid.page_num)?;
        let mut slot = PageIndexSlot::read(&buf, CORE_FOOTER_SIZE, rid.slot_num);
        slot.is_anchor = true;
        slot.write(&mut buf, CORE_FOOTER_SIZE, rid.slot_num);
        self.write_page_buf(rid.page_num, &buf)
    }

    /// Schedules `reorganize_page` once a page's accumulated dead bytes cross
    /// `REORG_THRESHOLD`, mirroring the original's check right after every
    /// `gap_size` increment.
    fn maybe_reorganize(&mut self, page_num: u32) -> Result<()> {
        let buf = self.read_page_buf(page_num)?;
        let footer = CoreFooter::read(&buf, CORE_FOOTER_SIZE);
        if footer.gap_size as usize > REORG_THRESHOLD {
            self.reorganize_page(page_num)?;
        }
        Ok(())
    }

    fn tombstone_slot(&mut self, rid: Rid) -> Result<()> {
        let mut buf = self.read_page_buf(rid.page_num)?;
        let slot = PageIndexSlot::read(&buf, CORE_FOOTER_SIZE, rid.slot_num);
        let mut footer = CoreFooter::read(&buf, CORE_FOOTER_SIZE);

        // A tombstoned slot that was the physically last record on the page
        // hands its bytes straight back to free_space_offset instead of
        // becoming a gap; everything else is accounted as a gap.
        let is_last_record = rid.slot_num + 1 == footer.num_slots
            && slot.page_offset + slot.size == footer.free_space_offset;
        if is_last_record {
            footer.free_space_offset -= slot.size;
        } else {
            footer.gap_size += slot.size;
        }
        PageIndexSlot::empty().write(&mut buf, CORE_FOOTER_SIZE, rid.slot_num);

        // Contract num_slots past any trailing run of tombstoned slots,
        // reclaiming their slot-directory entries.
        let mut live_slots = footer.num_slots;
        while live_slots > 0 {
            let candidate = PageIndexSlot::read(&buf, CORE_FOOTER_SIZE, live_slots - 1);
            if candidate.is_tombstone() {
                live_slots -= 1;
            } else {
                break;
            }
        }
        footer.num_slots = live_slots;

        footer.write(&mut buf, CORE_FOOTER_SIZE);
        self.write_page_buf(rid.page_num, &buf)?;
        move_page_to_correct_freespace_list(
            &mut self.file,
            &mut self.header,
            CORE_FOOTER_SIZE,
            rid.page_num,
        )?;
        self.maybe_reorganize(rid.page_num)
    }

    pub fn update_record(&mut self, rid: Rid, values: &[Value]) -> Result<()> {
        let new_bytes = generate_record_bytes(values);
        if new_bytes.len() + SLOT_SIZE > PAGE_SIZE - CORE_FOOTER_SIZE {
            return Err(StorageError::RecordExceedsPageSize(new_bytes.len()));
        }

        let buf = self.read_page_buf(rid.page_num)?;
        let mut slot = PageIndexSlot::read(&buf, CORE_FOOTER_SIZE, rid.slot_num);
        if slot.is_tombstone() {
            return Err(StorageError::RecordDeleted(rid));
        }

        if slot.is_forwarder() {
            let old_target = Rid::new(slot.forward_page, slot.forward_slot);
            if self.try_update_inplace(old_target, &new_bytes)? {
                return Ok(());
            }
            // A forwarder chain is never more than one hop long: retire the
            // old target before handing out a new one.
            self.tombstone_slot(old_target)?;
            let new_rid = self.insert_record_bytes_anywhere(&new_bytes)?;
            self.mark_anchor(new_rid)?;

            let mut buf = self.read_page_buf(rid.page_num)?;
            let mut slot = PageIndexSlot::read(&buf, CORE_FOOTER_SIZE, rid.slot_num);
            slot.forward_page = new_rid.page_num;
            slot.forward_slot = new_rid.slot_num;
            slot.write(&mut buf, CORE_FOOTER_SIZE, rid.slot_num);
            self.write_page_buf(rid.page_num, &buf)?;
            return Ok(());
        }

        if self.try_update_inplace(rid, &new_bytes)? {
            return Ok(());
        }

        let new_rid = self.insert_record_bytes_anywhere(&new_bytes)?;
        self.mark_anchor(new_rid)?;

        let mut buf = self.read_page_buf(rid.page_num)?;
        let mut footer = CoreFooter::read(&buf, CORE_FOOTER_SIZE);
        footer.gap_size += slot.size;
        footer.write(&mut buf, CORE_FOOTER_SIZE);
        slot.size = 0;
        slot.page_offset = 0;
        slot.forward_page = new_rid.page_num;
        slot.forward_slot = new_rid.slot_num;
        slot.write(&mut buf, CORE_FOOTER_SIZE, rid.slot_num);
        self.write_page_buf(rid.page_num, &buf)?;
        self.maybe_reorganize(rid.page_num)
    }

    pub fn delete_record(&mut self, rid: Rid) -> Result<()> {
        let buf = self.read_page_buf(rid.page_num)?;
        let slot = PageIndexSlot::read(&buf, CORE_FOOTER_SIZE, rid.slot_num);
        if slot.is_tombstone() {
            return Err(StorageError::RecordDeleted(rid));
        }
        if slot.is_anchor {
            return Err(StorageError::RecordIsAnchor(rid));
        }

        if slot.is_forwarder() {
            let target = Rid::new(slot.forward_page, slot.forward_slot);
            self.tombstone_slot(target)?;
        }
        self.tombstone_slot(rid)
    }

    /// Compacts live record bytes against the front of the page, closing
    /// gaps left by shrunk updates and tombstoned deletes. Slot numbers and
    /// RIDs are preserved; only `page_offset` and `free_space_offset` change.
    pub fn reorganize_page(&mut self, page_num: u32) -> Result<()> {
        let buf = self.read_page_buf(page_num)?;
        let footer = CoreFooter::read(&buf, CORE_FOOTER_SIZE);

        let mut new_buf = [0u8; PAGE_SIZE];
        let mut cursor = 0usize;
        let mut slots = Vec::with_capacity(footer.num_slots as usize);
        for i in 0..footer.num_slots {
            let slot = PageIndexSlot::read(&buf, CORE_FOOTER_SIZE, i);
            if slot.size > 0 {
                let start = slot.page_offset as usize;
                let end = start + slot.size as usize;
                new_buf[cursor..cursor + slot.size as usize].copy_from_slice(&buf[start..end]);
                slots.push(PageIndexSlot {
                    page_offset: cursor as u32,
                    ..slot
                });
                cursor += slot.size as usize;
            } else {
                slots.push(slot);
            }
        }
        for (i, slot) in slots.iter().enumerate() {
            slot.write(&mut new_buf, CORE_FOOTER_SIZE, i as u32);
        }

        let mut new_footer = footer;
        new_footer.free_space_offset = cursor as u32;
        new_footer.gap_size = 0;
        new_footer.write(&mut new_buf, CORE_FOOTER_SIZE);

        self.write_page_buf(page_num, &new_buf)?;
        move_page_to_correct_freespace_list(
            &mut self.file,
            &mut self.header,
            CORE_FOOTER_SIZE,
            page_num,
        )?;
        debug!("reorganized page {page_num}, reclaimed freespace now accounted");
        Ok(())
    }

    /// Sweeps every page whose accumulated gap size has crossed the reorg
    /// threshold and compacts it.
    pub fn reorganize_file(&mut self) -> Result<()> {
        for page_num in 1..self.header.num_pages {
            let buf = self.read_page_buf(page_num)?;
            let footer = CoreFooter::read(&buf, CORE_FOOTER_SIZE);
            if footer.gap_size as usize >= REORG_THRESHOLD {
                self.reorganize_page(page_num)?;
            }
        }
        Ok(())
    }

    pub fn scan<'a>(
        &'a mut self,
        descriptor: &[Attribute],
        filter: Option<(&str, CompOp, Value)>,
        projected: Option<&[String]>,
    ) -> Result<RecordScanIterator<'a>> {
        let filter = match filter {
            Some((name, op, value)) => Some((attr_index(descriptor, name)?, op, value)),
            None => None,
        };
        let projected = match projected {
            Some(names) => {
                let mut idxs = Vec::with_capacity(names.len());
                for name in names {
                    idxs.push(attr_index(descriptor, name)?);
                }
                Some(idxs)
            }
            None => None,
        };
        Ok(RecordScanIterator {
            manager: self,
            descriptor: descriptor.to_vec(),
            filter,
            projected,
            page_num: 1,
            slot_num: 0,
            buf: [0u8; PAGE_SIZE],
            footer: CoreFooter::new(0),
            loaded_page: false,
        })
    }
}

/// Walks every live record in file order. Tombstoned slots and anchors
/// reachable only through a forwarder are skipped; forwarder slots resolve
/// their target transparently and are reported under their own (stable) RID.
pub struct RecordScanIterator<'a> {
    manager: &'a mut RecordManager,
    descriptor: Vec<Attribute>,
    filter: Option<(usize, CompOp, Value)>,
    projected: Option<Vec<usize>>,
    page_num: u32,
    slot_num: u32,
    buf: [u8; PAGE_SIZE],
    footer: CoreFooter,
    loaded_page: bool,
}

impl<'a> Iterator for RecordScanIterator<'a> {
    type Item = Result<(Rid, Vec<Value>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.loaded_page {
                if self.page_num >= self.manager.header.num_pages {
                    return None;
                }
                match self.manager.read_page_buf(self.page_num) {
                    Ok(buf) => {
                        self.footer = CoreFooter::read(&buf, CORE_FOOTER_SIZE);
                        self.buf = buf;
                        self.loaded_page = true;
                        self.slot_num = 0;
                    }
                    Err(e) => return Some(Err(e)),
                }
            }

            if self.slot_num >= self.footer.num_slots {
                self.page_num += 1;
                self.loaded_page = false;
                continue;
            }

            let slot_num = self.slot_num;
            self.slot_num += 1;
            let slot = PageIndexSlot::read(&self.buf, CORE_FOOTER_SIZE, slot_num);
            if slot.is_tombstone() || slot.is_anchor {
                continue;
            }

            let record_bytes: Vec<u8> = if slot.is_forwarder() {
                match self.manager.read_page_buf(slot.forward_page) {
                    Ok(tbuf) => {
                        let tslot = PageIndexSlot::read(&tbuf, CORE_FOOTER_SIZE, slot.forward_slot);
                        let start = tslot.page_offset as usize;
                        tbuf[start..start + tslot.size as usize].to_vec()
                    }
                    Err(e) => return Some(Err(e)),
                }
            } else {
                let start = slot.page_offset as usize;
                self.buf[start..start + slot.size as usize].to_vec()
            };

            let values = match decode_record(&self.descriptor, &record_bytes) {
                Ok(v) => v,
                Err(e) => return Some(Err(e)),
            };

            if let Some((idx, op, ref filter_value)) = self.filter {
                if !op.matches(&values[idx], filter_value) {
                    continue;
                }
            }

            let rid = Rid::new(self.page_num, slot_num);
            let output = match &self.projected {
                Some(idxs) => idxs.iter().map(|&i| values[i].clone()).collect(),
                None => values,
            };
            return Some(Ok((rid, output)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttrType;

    fn descriptor() -> Vec<Attribute> {
        vec![
            Attribute {
                name: "id".into(),
                attr_type: AttrType::Int,
                length: 4,
            },
            Attribute {
                name: "name".into(),
                attr_type: AttrType::VarChar,
                length: 255,
            },
        ]
    }

    fn open_tmp() -> (tempfile::TempPath, PagedFileManager, RecordManager) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.into_temp_path();
        std::fs::remove_file(&path).unwrap();
        let mut pfm = PagedFileManager::new();
        RecordManager::create_file(&mut pfm, &path).unwrap();
        let rm = RecordManager::open_file(&mut pfm, &path).unwrap();
        (path, pfm, rm)
    }

    #[test]
    fn insert_and_read_round_trips() {
        let (_path, _pfm, mut rm) = open_tmp();
        let values = vec![Value::Int(7), Value::VarChar("hello".into())];
        let rid = rm.insert_record(&values).unwrap();
        let read_back = rm.read_record(&descriptor(), rid).unwrap();
        assert_eq!(values, read_back);
    }

    #[test]
    fn read_attribute_matches_full_record() {
        let (_path, _pfm, mut rm) = open_tmp();
        let values = vec![Value::Int(42), Value::VarChar("world".into())];
        let rid = rm.insert_record(&values).unwrap();
        let name = rm.read_attribute(&descriptor(), rid, "name").unwrap();
        assert_eq!(name, Value::VarChar("world".into()));
    }

    #[test]
    fn update_that_grows_forwards_through_a_stable_rid() {
        let (_path, _pfm, mut rm) = open_tmp();
        let rid = rm
            .insert_record(&[Value::Int(1), Value::VarChar("a".into())])
            .unwrap();
        let grown = vec![Value::Int(1), Value::VarChar("a".repeat(3000))];
        rm.update_record(rid, &grown).unwrap();
        let read_back = rm.read_record(&descriptor(), rid).unwrap();
        assert_eq!(read_back, grown);
    }

    #[test]
    fn delete_then_read_is_an_error() {
        let (_path, _pfm, mut rm) = open_tmp();
        let rid = rm
            .insert_record(&[Value::Int(9), Value::VarChar("x".into())])
            .unwrap();
        rm.delete_record(rid).unwrap();
        assert!(matches!(
            rm.read_record(&descriptor(), rid),
            Err(StorageError::RecordDeleted(_))
        ));
    }

    #[test]
    fn scan_skips_deleted_and_finds_survivors() {
        let (_path, _pfm, mut rm) = open_tmp();
        let keep = rm
            .insert_record(&[Value::Int(1), Value::VarChar("keep".into())])
            .unwrap();
        let drop = rm
            .insert_record(&[Value::Int(2), Value::VarChar("drop".into())])
            .unwrap();
        rm.delete_record(drop).unwrap();

        let descriptor = descriptor();
        let results: Vec<_> = rm
            .scan(&descriptor, None, None)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, keep);
    }

    #[test]
    fn deleting_the_last_slot_reclaims_the_slot_directory() {
        let (_path, _pfm, mut rm) = open_tmp();
        let first = rm
            .insert_record(&[Value::Int(1), Value::VarChar("a".into())])
            .unwrap();
        let last = rm
            .insert_record(&[Value::Int(2), Value::VarChar("b".into())])
            .unwrap();
        assert_eq!(first.page_num, last.page_num);

        let buf = rm.read_page_buf(last.page_num).unwrap();
        let before = CoreFooter::read(&buf, CORE_FOOTER_SIZE);
        let last_slot = PageIndexSlot::read(&buf, CORE_FOOTER_SIZE, last.slot_num);
        assert_eq!(before.num_slots, 2);

        rm.delete_record(last).unwrap();

        let buf = rm.read_page_buf(last.page_num).unwrap();
        let after = CoreFooter::read(&buf, CORE_FOOTER_SIZE);
        assert_eq!(after.num_slots, 1);
        assert_eq!(after.free_space_offset, before.free_space_offset - last_slot.size);
        assert_eq!(after.gap_size, before.gap_size);
    }

    #[test]
    fn grow_update_that_forwards_accounts_displaced_bytes_as_a_gap() {
        let (_path, _pfm, mut rm) = open_tmp();
        let a = rm
            .insert_record(&[Value::Int(1), Value::VarChar("a".into())])
            .unwrap();
        // A second record pins `a`'s slot so it can't grow in place (it is
        // no longer the physically last record on the page).
        rm.insert_record(&[Value::Int(2), Value::VarChar("pin".into())])
            .unwrap();

        let buf = rm.read_page_buf(a.page_num).unwrap();
        let original_slot = PageIndexSlot::read(&buf, CORE_FOOTER_SIZE, a.slot_num);
        let before = CoreFooter::read(&buf, CORE_FOOTER_SIZE);

        rm.update_record(a, &[Value::Int(1), Value::VarChar("a".repeat(500))])
            .unwrap();

        let buf = rm.read_page_buf(a.page_num).unwrap();
        let after = CoreFooter::read(&buf, CORE_FOOTER_SIZE);
        assert_eq!(after.gap_size, before.gap_size + original_slot.size);
    }

    #[test]
    fn crossing_reorg_threshold_compacts_the_page_automatically() {
        let (_path, _pfm, mut rm) = open_tmp();
        let mut rids = Vec::new();
        for i in 0..5 {
            let rid = rm
                .insert_record(&[Value::Int(i), Value::VarChar("x".repeat(10))])
                .unwrap();
            rids.push(rid);
        }
        // Grow-update every record so each displaced copy becomes a gap;
        // once their sum crosses REORG_THRESHOLD the page compacts itself.
        for (i, rid) in rids.iter().enumerate() {
            rm.update_record(
                *rid,
                &[Value::Int(i as i32), Value::VarChar("y".repeat(500))],
            )
            .unwrap();
        }

        let buf = rm.read_page_buf(rids[0].page_num).unwrap();
        let footer = CoreFooter::read(&buf, CORE_FOOTER_SIZE);
        assert!((footer.gap_size as usize) <= REORG_THRESHOLD);
    }
}
