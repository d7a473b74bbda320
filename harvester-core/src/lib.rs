#![no_std]

// Shared logic for the harvester sensor node firmware.
//
// This crate stays portable across MCU firmware and host tooling by avoiding
// the Rust standard library and exposing trait seams the other crates adopt
// for clocks, supply sampling, storage, and sensor drivers.

pub mod engine;
pub mod history;
pub mod jobs;
pub mod node;
pub mod samplelog;
pub mod schedule;
