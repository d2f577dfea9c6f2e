use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::storage::page::header::HeapPageHeader;
use crate::storage::page::error::PageError;
use crate::storage::page::layout::{HEADER_SIZE, SLOT_ENTRY_SIZE, RecordLocation};

/// Stateless accessor for slotted heap pages.
///
/// Slot entries are stored from the end of the page; record data is stored
/// from the beginning of the page (after the header). A deleted record keeps
/// its slot with length zero so that slot numbers stay stable.
pub struct HeapPageManager;

impl Default for HeapPageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapPageManager {
    pub fn new() -> Self {
        Self {}
    }

    pub fn init_page(&self, page: &mut Page) {
        let header = HeapPageHeader::new();
        let header_bytes = header.to_bytes();
        page.data[0..HEADER_SIZE].copy_from_slice(&header_bytes);
    }

    /// Insert a record, returning the slot number it landed in.
    pub fn insert_record(&self, page: &mut Page, data: &[u8]) -> Result<u32, PageError> {
        let mut header = self.get_header(page);

        // Record size plus the slot entry for the record
        let record_size = data.len() as u32;
        let total_space_needed = record_size + SLOT_ENTRY_SIZE as u32;

        if header.free_space_size < total_space_needed {
            return Err(PageError::InsufficientSpace);
        }

        // Slot entry position counted from the end of the page
        let slot_pos = self.slot_position(header.record_count);

        let record_loc = RecordLocation {
            offset: header.free_space_offset,
            length: record_size,
        };

        // Write record data
        let data_end = header.free_space_offset as usize + data.len();
        page.data[header.free_space_offset as usize..data_end].copy_from_slice(data);

        // Write slot entry
        let slot_bytes = record_loc.to_bytes();
        page.data[slot_pos..slot_pos + SLOT_ENTRY_SIZE].copy_from_slice(&slot_bytes);

        // Update header
        header.free_space_offset += record_size;
        header.free_space_size -= total_space_needed;
        header.record_count += 1;
        self.put_header(page, &header);

        Ok(header.record_count - 1)
    }

    /// Mark a record deleted. The slot survives with zero length; space is
    /// reclaimed by compaction, not here.
    pub fn delete_record(&self, page: &mut Page, slot: u32) -> Result<(), PageError> {
        let header = self.get_header(page);

        if slot >= header.record_count {
            return Err(PageError::InvalidSlot);
        }

        let slot_pos = self.slot_position(slot);
        let mut record_loc = self.record_location(page, slot_pos);

        if record_loc.length == 0 {
            return Err(PageError::RecordNotFound); // Already deleted
        }

        record_loc.length = 0;
        let slot_bytes = record_loc.to_bytes();
        page.data[slot_pos..slot_pos + SLOT_ENTRY_SIZE].copy_from_slice(&slot_bytes);

        Ok(())
    }

    pub fn get_record(&self, page: &Page, slot: u32) -> Result<Vec<u8>, PageError> {
        let header = self.get_header(page);

        if slot >= header.record_count {
            return Err(PageError::InvalidSlot);
        }

        let slot_pos = self.slot_position(slot);
        let record_loc = self.record_location(page, slot_pos);

        if record_loc.length == 0 {
            return Err(PageError::RecordNotFound); // Deleted record
        }

        let start = record_loc.offset as usize;
        let end = start + record_loc.length as usize;
        Ok(page.data[start..end].to_vec())
    }

    pub fn record_count(&self, page: &Page) -> u32 {
        self.get_header(page).record_count
    }

    pub fn free_space(&self, page: &Page) -> u32 {
        self.get_header(page).free_space_size
    }

    pub fn next_page_id(&self, page: &Page) -> Option<PageId> {
        self.get_header(page).next_page_id
    }

    pub fn set_next_page_id(&self, page: &mut Page, next: Option<PageId>) {
        let mut header = self.get_header(page);
        header.next_page_id = next;
        self.put_header(page, &header);
    }

    pub fn set_prev_page_id(&self, page: &mut Page, prev: Option<PageId>) {
        let mut header = self.get_header(page);
        header.prev_page_id = prev;
        self.put_header(page, &header);
    }

    pub fn get_header(&self, page: &Page) -> HeapPageHeader {
        HeapPageHeader::from_bytes(&page.data[0..HEADER_SIZE])
    }

    fn put_header(&self, page: &mut Page, header: &HeapPageHeader) {
        let header_bytes = header.to_bytes();
        page.data[0..HEADER_SIZE].copy_from_slice(&header_bytes);
    }

    fn slot_position(&self, slot: u32) -> usize {
        PAGE_SIZE - SLOT_ENTRY_SIZE * (slot as usize + 1)
    }

    fn record_location(&self, page: &Page, slot_pos: usize) -> RecordLocation {
        RecordLocation::from_bytes(&page.data[slot_pos..slot_pos + SLOT_ENTRY_SIZE])
    }
}
