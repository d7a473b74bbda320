use core::cell::RefCell;

use embassy_stm32::flash::{self, Blocking, Flash};
use harvester_core::history::RecordStore;

use super::{StreamRegion, WRITE_ALIGN, align_to_word, watermark};

#[derive(Debug)]
pub enum FlashStoreError {
    UnknownStream,
    StreamFull,
    OutOfBounds,
    Flash(flash::Error),
}

impl From<flash::Error> for FlashStoreError {
    fn from(err: flash::Error) -> Self {
        FlashStoreError::Flash(err)
    }
}

pub struct FlashRecordStore<'a, const STREAMS: usize> {
    flash: &'a RefCell<Flash<'static, Blocking>>,
    regions: &'static [StreamRegion; STREAMS],
    /// Durable byte count per stream, scanned lazily on first touch.
    lengths: [Option<u32>; STREAMS],
    /// Bytes waiting for a complete program word.
    staged: [heapless::Vec<u8, WRITE_ALIGN>; STREAMS],
}

impl<'a, const STREAMS: usize> FlashRecordStore<'a, STREAMS> {
    #[must_use]
    pub fn new(
        flash: &'a RefCell<Flash<'static, Blocking>>,
        regions: &'static [StreamRegion; STREAMS],
    ) -> Self {
        Self {
            flash,
            regions,
            lengths: [None; STREAMS],
            staged: core::array::from_fn(|_| heapless::Vec::new()),
        }
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.regions.iter().position(|region| region.name == name)
    }

    /// Finds the durable length by scanning backward for the first byte that
    /// is not erased fill, then rounds up to the program-word boundary so a
    /// word torn by power loss is never programmed a second time.
    fn durable_len(&mut self, index: usize) -> Result<u32, FlashStoreError> {
        if let Some(len) = self.lengths[index] {
            return Ok(len);
        }
        let region = self.regions[index];
        let mut buf = [0u8; 64];
        let mut remaining = region.capacity;
        let mut found = 0;
        while remaining > 0 {
            let chunk = remaining.min(64);
            let start = region.offset + remaining - chunk;
            self.flash
                .borrow_mut()
                .blocking_read(start, &mut buf[..chunk as usize])?;
            if let Some(end) = watermark(&buf[..chunk as usize]) {
                found = remaining - chunk + end as u32;
                break;
            }
            remaining -= chunk;
        }
        let found = align_to_word(found).min(region.capacity);
        self.lengths[index] = Some(found);
        Ok(found)
    }
}

impl<const STREAMS: usize> RecordStore for FlashRecordStore<'_, STREAMS> {
    type Error = FlashStoreError;

    fn stream_len(&mut self, name: &str) -> Result<Option<u64>, Self::Error> {
        let Some(index) = self.index(name) else {
            return Ok(None);
        };
        let durable = self.durable_len(index)?;
        Ok(Some(u64::from(durable) + self.staged[index].len() as u64))
    }

    fn read_at(&mut self, name: &str, offset: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        let index = self.index(name).ok_or(FlashStoreError::UnknownStream)?;
        let durable = u64::from(self.durable_len(index)?);
        let staged = &self.staged[index];
        let total = durable + staged.len() as u64;
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(FlashStoreError::OutOfBounds)?;
        if end > total {
            return Err(FlashStoreError::OutOfBounds);
        }

        let region = self.regions[index];
        let flash_bytes = durable.saturating_sub(offset).min(buf.len() as u64) as usize;
        if flash_bytes > 0 {
            self.flash
                .borrow_mut()
                .blocking_read(region.offset + offset as u32, &mut buf[..flash_bytes])?;
        }
        if flash_bytes < buf.len() {
            let staged_start = (offset + flash_bytes as u64 - durable) as usize;
            let staged_end = staged_start + (buf.len() - flash_bytes);
            buf[flash_bytes..].copy_from_slice(&staged[staged_start..staged_end]);
        }
        Ok(())
    }

    fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), Self::Error> {
        let index = self.index(name).ok_or(FlashStoreError::UnknownStream)?;
        let mut durable = self.durable_len(index)?;
        let region = self.regions[index];

        let total = u64::from(durable) + self.staged[index].len() as u64 + bytes.len() as u64;
        if total > u64::from(region.capacity) {
            return Err(FlashStoreError::StreamFull);
        }

        for byte in bytes {
            // The stage never holds a complete word between appends.
            let _ = self.staged[index].push(*byte);
            if self.staged[index].len() == WRITE_ALIGN {
                self.flash
                    .borrow_mut()
                    .blocking_write(region.offset + durable, &self.staged[index])?;
                durable += WRITE_ALIGN as u32;
                self.staged[index].clear();
            }
        }
        self.lengths[index] = Some(durable);
        Ok(())
    }
}
