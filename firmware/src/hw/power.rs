//! Supply monitoring and the regulator hold latch.
//!
//! The harvester charges a supercapacitor behind a boost regulator; a GPIO
//! latch keeps the regulator enabled while firmware runs, and the supply
//! voltage is read through a 2:1 divider on an ADC input. Dropping the latch
//! is how the node powers itself off between scheduled wake-ups.

#![cfg(target_os = "none")]

use core::cell::RefCell;
use core::convert::Infallible;

use embassy_stm32::Peri;
use embassy_stm32::adc::{Adc, SampleTime};
use embassy_stm32::gpio::Output;
use embassy_stm32::peripherals::{ADC1, PA0, PA1, PA4};
use harvester_core::node::VoltageSensor;

/// Full-scale ADC reading with oversampling folded in.
pub const ADC_FULL_SCALE: f32 = 16_383.0;

/// Rail volts at full scale once the external 2:1 divider is folded in.
pub const SUPPLY_FULL_SCALE_VOLTS: f32 = 2.0;

/// The three analog inputs multiplexed onto ADC1.
pub struct AnalogInputs<'d> {
    adc: Adc<'d, ADC1>,
    supply: Peri<'d, PA0>,
    light: Peri<'d, PA1>,
    microphone: Peri<'d, PA4>,
}

impl<'d> AnalogInputs<'d> {
    #[must_use]
    pub fn new(
        mut adc: Adc<'d, ADC1>,
        supply: Peri<'d, PA0>,
        light: Peri<'d, PA1>,
        microphone: Peri<'d, PA4>,
    ) -> Self {
        adc.set_sample_time(SampleTime::CYCLES160_5);
        Self {
            adc,
            supply,
            light,
            microphone,
        }
    }

    pub fn read_supply_raw(&mut self) -> u16 {
        self.adc.blocking_read(&mut self.supply)
    }

    pub fn read_light_raw(&mut self) -> u16 {
        self.adc.blocking_read(&mut self.light)
    }

    pub fn read_microphone_raw(&mut self) -> u16 {
        self.adc.blocking_read(&mut self.microphone)
    }
}

/// Converts a raw supply-divider reading into rail volts.
#[must_use]
pub fn supply_volts(raw: u16) -> f32 {
    f32::from(raw) * SUPPLY_FULL_SCALE_VOLTS / ADC_FULL_SCALE
}

/// Admission-gate voltage source backed by the shared ADC.
pub struct SupplyMonitor<'a, 'd> {
    inputs: &'a RefCell<AnalogInputs<'d>>,
}

impl<'a, 'd> SupplyMonitor<'a, 'd> {
    #[must_use]
    pub fn new(inputs: &'a RefCell<AnalogInputs<'d>>) -> Self {
        Self { inputs }
    }
}

impl VoltageSensor for SupplyMonitor<'_, '_> {
    type Error = Infallible;

    fn sample(&mut self) -> Result<f32, Self::Error> {
        Ok(supply_volts(self.inputs.borrow_mut().read_supply_raw()))
    }
}

/// GPIO latch that keeps the boost regulator enabled.
pub struct PowerLatch<'d> {
    hold: Output<'d>,
}

impl<'d> PowerLatch<'d> {
    /// Takes ownership of the already-asserted hold line.
    #[must_use]
    pub fn engage(hold: Output<'d>) -> Self {
        Self { hold }
    }

    /// Drops the hold line. On battery the rail collapses within
    /// milliseconds; under a bench supply the core keeps running and the
    /// caller is expected to idle until the next alarm resets it.
    pub fn release(&mut self) {
        self.hold.set_low();
    }
}
