//! Human-readable per-job measurement logs.
//!
//! Each sensing job appends one `<timestamp>,<value>\r\n` line to its own CSV
//! stream after making sure the fixed header line is present. The log shares
//! the [`RecordStore`] seam with history persistence, so on the device both
//! land on the same flash filesystem.

use core::fmt::{Display, Write as _};

use heapless::String;

use crate::history::RecordStore;
use crate::schedule::UnixSeconds;

/// Upper bound for one formatted CSV line (20-digit u64, comma, value, CRLF).
const LINE_CAPACITY: usize = 48;

/// Upper bound for a CSV header line.
const HEADER_CAPACITY: usize = 64;

/// Appends one sample line, writing the header first when it is missing.
///
/// A stream whose first bytes do not equal `header` gets the header appended
/// again before the line; that mirrors the recovery behavior for logs that
/// were truncated or started before a firmware update changed the header.
///
/// # Errors
///
/// Propagates store failures.
pub fn append_sample<S, V>(
    store: &mut S,
    stream: &str,
    header: &str,
    timestamp: UnixSeconds,
    value: V,
) -> Result<(), S::Error>
where
    S: RecordStore,
    V: Display,
{
    ensure_header(store, stream, header)?;

    let mut line: String<LINE_CAPACITY> = String::new();
    // Formatting into a sized buffer cannot fail for our value types; a
    // truncated line is dropped rather than written.
    if write!(line, "{timestamp},{value}\r\n").is_ok() {
        store.append(stream, line.as_bytes())?;
    }
    Ok(())
}

/// Writes `header` unless the stream already starts with it.
fn ensure_header<S: RecordStore>(
    store: &mut S,
    stream: &str,
    header: &str,
) -> Result<(), S::Error> {
    debug_assert!(header.len() <= HEADER_CAPACITY);

    let len = store.stream_len(stream)?.unwrap_or(0);
    if len >= header.len() as u64 {
        let mut probe = [0u8; HEADER_CAPACITY];
        let prefix = &mut probe[..header.len().min(HEADER_CAPACITY)];
        store.read_at(stream, 0, prefix)?;
        if prefix == header.as_bytes() {
            return Ok(());
        }
    }
    store.append(stream, header.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryRecordStore;

    const HEADER: &str = "time,temperature data celsius\r\n";

    #[test]
    fn first_sample_writes_header_and_line() {
        let mut store: MemoryRecordStore<2, 256> = MemoryRecordStore::new();
        append_sample(&mut store, "temperature_data.csv", HEADER, 1_000, 21_500).unwrap();

        let contents = store.contents("temperature_data.csv").unwrap();
        let text = core::str::from_utf8(contents).unwrap();
        assert_eq!(text, "time,temperature data celsius\r\n1000,21500\r\n");
    }

    #[test]
    fn header_written_exactly_once() {
        let mut store: MemoryRecordStore<2, 256> = MemoryRecordStore::new();
        append_sample(&mut store, "t.csv", HEADER, 1_000, 1).unwrap();
        append_sample(&mut store, "t.csv", HEADER, 1_010, 2).unwrap();
        append_sample(&mut store, "t.csv", HEADER, 1_020, 3).unwrap();

        let text = core::str::from_utf8(store.contents("t.csv").unwrap()).unwrap();
        assert_eq!(text.matches("time,").count(), 1);
        assert!(text.ends_with("1020,3\r\n"));
    }

    #[test]
    fn negative_values_format_signed() {
        let mut store: MemoryRecordStore<2, 256> = MemoryRecordStore::new();
        append_sample(&mut store, "t.csv", HEADER, 2_000, -12_250_i32).unwrap();
        let text = core::str::from_utf8(store.contents("t.csv").unwrap()).unwrap();
        assert!(text.ends_with("2000,-12250\r\n"));
    }

    #[test]
    fn mismatched_header_is_rewritten() {
        let mut store: MemoryRecordStore<2, 256> = MemoryRecordStore::new();
        store.append("t.csv", b"garbage garbage garbage garbage\r\n").unwrap();
        append_sample(&mut store, "t.csv", HEADER, 3_000, 7).unwrap();
        let text = core::str::from_utf8(store.contents("t.csv").unwrap()).unwrap();
        assert!(text.contains(HEADER));
        assert!(text.ends_with("3000,7\r\n"));
    }
}
