//! Board-level drivers for the harvester node.
//!
//! Everything on the board hangs off two shared resources: SPI1 carries the
//! RTC, the barometer, and the radio behind individual chip selects, and ADC1
//! samples the supply divider, the photoresistor, and the microphone. Each
//! driver borrows the shared bus through a `RefCell`; the run loop is single
//! threaded and strictly sequential, so the borrows never overlap.

pub mod power;
pub mod rtc;
pub mod sensors;
