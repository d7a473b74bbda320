//! Crash-tolerant persistence for per-job last-run timestamps.
//!
//! Every logical update appends one [`RECORD_PAIR_LEN`]-byte record: the
//! timestamp written twice, little-endian. A power failure can truncate an
//! append at any byte, so [`load`] only trusts a pair whose two copies agree
//! and walks backward through older pairs until it finds one. The stream is
//! append-only and grows without bound; retention is the storage layer's
//! problem, not ours.
//!
//! Pairs are aligned to [`RECORD_PAIR_LEN`]-byte boundaries from the start of
//! the stream. A torn append leaves a partial tail which [`load`] ignores and
//! [`save`] pads before writing the next pair, so one interrupted write never
//! skews the alignment of everything that follows.

use heapless::{String, Vec};

use crate::schedule::{NEVER_RUN, UnixSeconds};

/// Size of one timestamp copy on the wire.
pub const RECORD_COPY_LEN: usize = 8;

/// Size of one complete duplicated-timestamp record.
pub const RECORD_PAIR_LEN: usize = 16;

/// Append-only byte storage addressed by stream name.
///
/// This is the seam to the external log store (a flash filesystem on the
/// device, plain memory in tests and the emulator). An `append` of N bytes is
/// the unit of potential interruption: on power loss any prefix of it may be
/// durable.
pub trait RecordStore {
    type Error;

    /// Current length of the named stream in bytes, or `None` when the
    /// stream does not exist yet.
    ///
    /// # Errors
    ///
    /// Backend access failures.
    fn stream_len(&mut self, name: &str) -> Result<Option<u64>, Self::Error>;

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Backend access failures, including reads past the end of the stream.
    fn read_at(&mut self, name: &str, offset: u64, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Appends `bytes` to the end of the named stream, creating it if absent.
    ///
    /// # Errors
    ///
    /// Backend access failures, including an exhausted stream.
    fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Loads the most recent trusted last-run timestamp for `name`.
///
/// Missing or empty streams yield [`NEVER_RUN`]. Otherwise complete pairs are
/// scanned newest-first; the first pair whose two copies are bit-for-bit equal
/// wins. A fully corrupted stream also yields [`NEVER_RUN`] rather than
/// failing the boot.
///
/// # Errors
///
/// Propagates store read failures, which are fatal for the caller.
pub fn load<S: RecordStore>(store: &mut S, name: &str) -> Result<UnixSeconds, S::Error> {
    let Some(len) = store.stream_len(name)? else {
        return Ok(NEVER_RUN);
    };

    let pair_len = RECORD_PAIR_LEN as u64;
    let complete_pairs = len / pair_len;
    for index in (0..complete_pairs).rev() {
        let mut pair = [0u8; RECORD_PAIR_LEN];
        store.read_at(name, index * pair_len, &mut pair)?;
        if let Some(value) = decode_pair(&pair) {
            return Ok(value);
        }
    }

    Ok(NEVER_RUN)
}

/// Appends a new duplicated-timestamp record for `name`.
///
/// If a previous append was torn mid-pair, the tail is first padded out to a
/// pair boundary with `0xFF` so the new record lands aligned.
///
/// # Errors
///
/// Propagates store failures.
#[allow(clippy::cast_possible_truncation)] // partial < RECORD_PAIR_LEN
pub fn save<S: RecordStore>(
    store: &mut S,
    name: &str,
    last_run: UnixSeconds,
) -> Result<(), S::Error> {
    if let Some(len) = store.stream_len(name)? {
        let partial = (len % RECORD_PAIR_LEN as u64) as usize;
        if partial != 0 {
            const PAD: [u8; RECORD_PAIR_LEN] = [0xFF; RECORD_PAIR_LEN];
            store.append(name, &PAD[..RECORD_PAIR_LEN - partial])?;
        }
    }

    let mut pair = [0u8; RECORD_PAIR_LEN];
    pair[..RECORD_COPY_LEN].copy_from_slice(&last_run.to_le_bytes());
    pair[RECORD_COPY_LEN..].copy_from_slice(&last_run.to_le_bytes());
    store.append(name, &pair)
}

/// Returns the timestamp when both copies in the pair agree.
fn decode_pair(pair: &[u8; RECORD_PAIR_LEN]) -> Option<UnixSeconds> {
    let mut first = [0u8; RECORD_COPY_LEN];
    let mut second = [0u8; RECORD_COPY_LEN];
    first.copy_from_slice(&pair[..RECORD_COPY_LEN]);
    second.copy_from_slice(&pair[RECORD_COPY_LEN..]);
    (first == second).then(|| UnixSeconds::from_le_bytes(first))
}

/// Maximum stream name length accepted by [`MemoryRecordStore`].
pub const MAX_STREAM_NAME: usize = 32;

/// Errors reported by [`MemoryRecordStore`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryStoreError {
    /// No free stream slot remains.
    StoreFull,
    /// The named stream has reached its byte capacity.
    StreamFull,
    /// Stream name exceeds [`MAX_STREAM_NAME`].
    NameTooLong,
    /// Read past the end of the stream, or from a missing stream.
    OutOfBounds,
}

struct MemoryStream<const BYTES: usize> {
    name: String<MAX_STREAM_NAME>,
    data: Vec<u8, BYTES>,
}

/// Bounded in-memory [`RecordStore`] used by host tests and the emulator.
///
/// Exposes a tail-truncation hook so tests can reproduce a power failure in
/// the middle of an append.
pub struct MemoryRecordStore<const STREAMS: usize = 8, const BYTES: usize = 1024> {
    streams: Vec<MemoryStream<BYTES>, STREAMS>,
}

impl<const STREAMS: usize, const BYTES: usize> MemoryRecordStore<STREAMS, BYTES> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            streams: Vec::new(),
        }
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.streams
            .iter()
            .position(|stream| stream.name.as_str() == name)
    }

    /// Raw bytes of a stream, if it exists.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<&[u8]> {
        self.find(name)
            .map(|index| self.streams[index].data.as_slice())
    }

    /// Drops every byte past `new_len`, simulating an append torn by power
    /// loss. Returns `false` when the stream is missing or already shorter.
    pub fn truncate(&mut self, name: &str, new_len: usize) -> bool {
        match self.find(name) {
            Some(index) if self.streams[index].data.len() > new_len => {
                self.streams[index].data.truncate(new_len);
                true
            }
            _ => false,
        }
    }
}

impl<const STREAMS: usize, const BYTES: usize> Default for MemoryRecordStore<STREAMS, BYTES> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const STREAMS: usize, const BYTES: usize> RecordStore for MemoryRecordStore<STREAMS, BYTES> {
    type Error = MemoryStoreError;

    fn stream_len(&mut self, name: &str) -> Result<Option<u64>, Self::Error> {
        Ok(self.find(name).map(|index| self.streams[index].data.len() as u64))
    }

    fn read_at(&mut self, name: &str, offset: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        let index = self.find(name).ok_or(MemoryStoreError::OutOfBounds)?;
        let data = &self.streams[index].data;
        let start = usize::try_from(offset).map_err(|_| MemoryStoreError::OutOfBounds)?;
        let end = start
            .checked_add(buf.len())
            .ok_or(MemoryStoreError::OutOfBounds)?;
        if end > data.len() {
            return Err(MemoryStoreError::OutOfBounds);
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), Self::Error> {
        let index = match self.find(name) {
            Some(index) => index,
            None => {
                let mut owned = String::new();
                owned
                    .push_str(name)
                    .map_err(|_| MemoryStoreError::NameTooLong)?;
                self.streams
                    .push(MemoryStream {
                        name: owned,
                        data: Vec::new(),
                    })
                    .map_err(|_| MemoryStoreError::StoreFull)?;
                self.streams.len() - 1
            }
        };
        self.streams[index]
            .data
            .extend_from_slice(bytes)
            .map_err(|_| MemoryStoreError::StreamFull)
    }
}
