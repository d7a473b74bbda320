//! Unbounded in-memory record store for host simulation.
//!
//! The bounded store used by the core's own tests models a fixed flash
//! window; the emulator instead wants to run for a simulated day without
//! capacity being the failure mode, so this one grows on the heap. It keeps
//! the same tail-truncation hook for injecting torn appends.

use std::collections::HashMap;

use harvester_core::history::RecordStore;

/// Read past the end of a stream, or from a missing stream. Appends never
/// fail.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutOfBounds;

#[derive(Default)]
pub struct HostRecordStore {
    streams: HashMap<String, Vec<u8>>,
}

impl HostRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes of a stream, if it exists.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<&[u8]> {
        self.streams.get(name).map(Vec::as_slice)
    }

    /// Drops every byte past `new_len`, simulating an append torn by power
    /// loss. Returns `false` when the stream is missing or already shorter.
    pub fn truncate(&mut self, name: &str, new_len: usize) -> bool {
        match self.streams.get_mut(name) {
            Some(data) if data.len() > new_len => {
                data.truncate(new_len);
                true
            }
            _ => false,
        }
    }
}

impl RecordStore for HostRecordStore {
    type Error = OutOfBounds;

    fn stream_len(&mut self, name: &str) -> Result<Option<u64>, Self::Error> {
        Ok(self.streams.get(name).map(|data| data.len() as u64))
    }

    fn read_at(&mut self, name: &str, offset: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        let data = self.streams.get(name).ok_or(OutOfBounds)?;
        let start = usize::try_from(offset).map_err(|_| OutOfBounds)?;
        let end = start.checked_add(buf.len()).ok_or(OutOfBounds)?;
        if end > data.len() {
            return Err(OutOfBounds);
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), Self::Error> {
        self.streams
            .entry(name.to_owned())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_creates_and_extends_streams() {
        let mut store = HostRecordStore::new();
        assert_eq!(store.stream_len("log"), Ok(None));

        store.append("log", b"abc").unwrap();
        store.append("log", b"def").unwrap();
        assert_eq!(store.contents("log"), Some(&b"abcdef"[..]));
    }

    #[test]
    fn read_past_end_is_rejected() {
        let mut store = HostRecordStore::new();
        store.append("log", b"abc").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(store.read_at("log", 0, &mut buf), Err(OutOfBounds));
        assert_eq!(store.read_at("missing", 0, &mut buf[..1]), Err(OutOfBounds));
    }

    #[test]
    fn truncate_tears_only_existing_tails() {
        let mut store = HostRecordStore::new();
        store.append("log", b"abcdef").unwrap();

        assert!(store.truncate("log", 4));
        assert_eq!(store.contents("log"), Some(&b"abcd"[..]));
        assert!(!store.truncate("log", 4));
        assert!(!store.truncate("missing", 0));
    }
}
