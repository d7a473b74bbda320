//! Record streams on internal flash.
//!
//! Each stream owns a fixed, page-aligned window of the MCU flash above the
//! firmware image. Streams are append-only: the live length is wherever the
//! erased 0xFF fill stops, so no index structure exists to corrupt. The part
//! programs 64-bit double words, so appends flush in 8-byte units and hold
//! any remainder in RAM until the next append completes the word; history
//! records are written in aligned 16-byte pairs and never stage anything,
//! while a CSV line can lose at most its last few bytes to a power cut.

// Offsets and capacities all fit u32 and usize on this part.
#![allow(clippy::cast_possible_truncation)]

use harvester_core::jobs;

#[cfg(target_os = "none")]
mod flash;
#[cfg(target_os = "none")]
pub use flash::{FlashRecordStore, FlashStoreError};

/// Flash program granularity on the STM32G0.
pub const WRITE_ALIGN: usize = 8;

#[derive(Clone, Copy)]
pub struct StreamRegion {
    pub name: &'static str,
    /// Byte offset from the flash base.
    pub offset: u32,
    pub capacity: u32,
}

/// Last-run history, one 4 KiB window per job. At one pair per power cycle
/// a window lasts 256 wake-ups between wipes.
pub static HISTORY_REGIONS: [StreamRegion; 5] = [
    StreamRegion {
        name: "temperature",
        offset: 0x4_0000,
        capacity: 0x1000,
    },
    StreamRegion {
        name: "pressure",
        offset: 0x4_1000,
        capacity: 0x1000,
    },
    StreamRegion {
        name: "light",
        offset: 0x4_2000,
        capacity: 0x1000,
    },
    StreamRegion {
        name: "microphone",
        offset: 0x4_3000,
        capacity: 0x1000,
    },
    StreamRegion {
        name: "radio",
        offset: 0x4_4000,
        capacity: 0x1000,
    },
];

/// Measurement CSVs, 16 KiB per sensor.
pub static LOG_REGIONS: [StreamRegion; 4] = [
    StreamRegion {
        name: jobs::TEMPERATURE_LOG,
        offset: 0x4_8000,
        capacity: 0x4000,
    },
    StreamRegion {
        name: jobs::PRESSURE_LOG,
        offset: 0x4_C000,
        capacity: 0x4000,
    },
    StreamRegion {
        name: jobs::LIGHT_LOG,
        offset: 0x5_0000,
        capacity: 0x4000,
    },
    StreamRegion {
        name: jobs::MICROPHONE_LOG,
        offset: 0x5_4000,
        capacity: 0x4000,
    },
];

/// One past the last non-erased byte in `chunk`, if any byte is programmed.
#[cfg(any(target_os = "none", test))]
fn watermark(chunk: &[u8]) -> Option<usize> {
    chunk
        .iter()
        .rposition(|byte| *byte != 0xFF)
        .map(|last| last + 1)
}

/// Rounds a scanned stream length up to the program-word boundary.
///
/// A power cut during a double-word program leaves a word that reads back
/// non-0xFF at an arbitrary byte and can never be programmed again, so the
/// stream must resume on the next word. The skipped bytes read as erased
/// fill, which the record layer already treats as a torn tail.
#[cfg(any(target_os = "none", test))]
fn align_to_word(len: u32) -> u32 {
    len.div_ceil(WRITE_ALIGN as u32) * WRITE_ALIGN as u32
}
