//! Environment sensor drivers: BMP280 barometer, photoresistor divider,
//! electret microphone, and the SX1276 LoRa radio.

#![cfg(target_os = "none")]

use core::cell::RefCell;

use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::{self, Spi};
use embassy_time::{Duration, block_for};
use harvester_core::jobs::SensorSuite;

use crate::hw::power::{ADC_FULL_SCALE, AnalogInputs};

const BMP280_REG_CALIBRATION: u8 = 0x88;
const BMP280_REG_CTRL_MEAS: u8 = 0xF4;
const BMP280_REG_DATA: u8 = 0xF7;
/// Forced measurement, 1x oversampling on both channels.
const BMP280_FORCED_1X: u8 = 0x25;
/// BMP280 command bytes carry the read flag in bit 7.
const BMP280_READ_BIT: u8 = 0x80;

const SX1276_REG_FIFO: u8 = 0x00;
const SX1276_REG_OP_MODE: u8 = 0x01;
const SX1276_REG_FIFO_ADDR_PTR: u8 = 0x0D;
const SX1276_REG_FIFO_TX_BASE: u8 = 0x0E;
const SX1276_REG_IRQ_FLAGS: u8 = 0x12;
const SX1276_REG_PAYLOAD_LENGTH: u8 = 0x22;
/// SX1276 command bytes carry the write flag in bit 7.
const SX1276_WRITE_BIT: u8 = 0x80;
/// LoRa mode, standby.
const SX1276_LORA_STANDBY: u8 = 0x81;
/// LoRa mode, transmit.
const SX1276_LORA_TX: u8 = 0x83;
const SX1276_IRQ_TX_DONE: u8 = 0x08;

/// Fixed leg of the photoresistor divider.
const PHOTORESISTOR_DIVIDER_OHMS: f32 = 10_000.0;
/// Rail feeding the divider and the microphone bias.
const ANALOG_RAIL_VOLTS: f32 = 3.3;

const MICROPHONE_SAMPLES: usize = 512;
const MICROPHONE_SAMPLE_RATE_HZ: u32 = 8_000;

#[derive(Debug)]
pub enum SensorError {
    Spi(spi::Error),
    PayloadTooLong,
    RadioTimeout,
}

impl From<spi::Error> for SensorError {
    fn from(err: spi::Error) -> Self {
        SensorError::Spi(err)
    }
}

pub struct BoardSensors<'a, 'd> {
    bus: &'a RefCell<Spi<'d, Blocking>>,
    inputs: &'a RefCell<AnalogInputs<'d>>,
    barometer_select: Output<'d>,
    radio_select: Output<'d>,
    calibration: Option<Bmp280Calibration>,
}

impl<'a, 'd> BoardSensors<'a, 'd> {
    #[must_use]
    pub fn new(
        bus: &'a RefCell<Spi<'d, Blocking>>,
        inputs: &'a RefCell<AnalogInputs<'d>>,
        barometer_select: Output<'d>,
        radio_select: Output<'d>,
    ) -> Self {
        Self {
            bus,
            inputs,
            barometer_select,
            radio_select,
            calibration: None,
        }
    }

    fn barometer_read(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), spi::Error> {
        let mut bus = self.bus.borrow_mut();
        self.barometer_select.set_low();
        let result = bus
            .blocking_write(&[reg | BMP280_READ_BIT])
            .and_then(|()| bus.blocking_read(buf));
        self.barometer_select.set_high();
        result
    }

    fn barometer_write(&mut self, reg: u8, value: u8) -> Result<(), spi::Error> {
        let mut bus = self.bus.borrow_mut();
        self.barometer_select.set_low();
        let result = bus.blocking_write(&[reg & !BMP280_READ_BIT, value]);
        self.barometer_select.set_high();
        result
    }

    fn calibration(&mut self) -> Result<Bmp280Calibration, spi::Error> {
        if let Some(calibration) = self.calibration {
            return Ok(calibration);
        }
        let mut raw = [0u8; 24];
        self.barometer_read(BMP280_REG_CALIBRATION, &mut raw)?;
        let calibration = Bmp280Calibration::parse(&raw);
        self.calibration = Some(calibration);
        Ok(calibration)
    }

    /// Triggers one forced conversion and returns the raw 20-bit readings
    /// as `(temperature, pressure)`.
    fn measure(&mut self) -> Result<(i32, i32), spi::Error> {
        self.barometer_write(BMP280_REG_CTRL_MEAS, BMP280_FORCED_1X)?;
        // Worst-case conversion at 1x oversampling is 6.4 ms.
        block_for(Duration::from_millis(10));
        let mut data = [0u8; 6];
        self.barometer_read(BMP280_REG_DATA, &mut data)?;
        let pressure = i32::from(data[0]) << 12 | i32::from(data[1]) << 4 | i32::from(data[2]) >> 4;
        let temperature =
            i32::from(data[3]) << 12 | i32::from(data[4]) << 4 | i32::from(data[5]) >> 4;
        Ok((temperature, pressure))
    }

    fn radio_read_byte(&mut self, reg: u8) -> Result<u8, spi::Error> {
        let mut bus = self.bus.borrow_mut();
        self.radio_select.set_low();
        let mut value = [0u8; 1];
        let result = bus
            .blocking_write(&[reg & !SX1276_WRITE_BIT])
            .and_then(|()| bus.blocking_read(&mut value));
        self.radio_select.set_high();
        result.map(|()| value[0])
    }

    fn radio_write(&mut self, reg: u8, value: u8) -> Result<(), spi::Error> {
        let mut bus = self.bus.borrow_mut();
        self.radio_select.set_low();
        let result = bus.blocking_write(&[reg | SX1276_WRITE_BIT, value]);
        self.radio_select.set_high();
        result
    }
}

impl SensorSuite for BoardSensors<'_, '_> {
    type Error = SensorError;

    fn read_temperature_millicelsius(&mut self) -> Result<i32, Self::Error> {
        let calibration = self.calibration()?;
        let (raw_temperature, _) = self.measure()?;
        let t_fine = calibration.t_fine(raw_temperature);
        Ok(Bmp280Calibration::temperature_millicelsius(t_fine))
    }

    fn read_pressure_pascals(&mut self) -> Result<u32, Self::Error> {
        let calibration = self.calibration()?;
        let (raw_temperature, raw_pressure) = self.measure()?;
        let t_fine = calibration.t_fine(raw_temperature);
        Ok(calibration.pressure_pascals(t_fine, raw_pressure))
    }

    // The divider is hard-wired to one ADC input on this board; the channel
    // recorded in the job table is carried for the log readers only.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn read_light_ohms(&mut self, _adc_channel: u8) -> Result<u32, Self::Error> {
        let raw = self.inputs.borrow_mut().read_light_raw();
        if raw == 0 {
            // Open circuit or pitch dark.
            return Ok(u32::MAX);
        }
        let volts = f32::from(raw) * ANALOG_RAIL_VOLTS / ADC_FULL_SCALE;
        let ohms = PHOTORESISTOR_DIVIDER_OHMS * (ANALOG_RAIL_VOLTS - volts) / volts;
        Ok(ohms.max(0.0) as u32)
    }

    // Sample count and rate are compile-time constants well inside u32.
    #[allow(clippy::cast_possible_truncation)]
    fn read_peak_frequency_hz(&mut self) -> Result<u32, Self::Error> {
        let mut samples = [0u16; MICROPHONE_SAMPLES];
        {
            let mut inputs = self.inputs.borrow_mut();
            for slot in &mut samples {
                *slot = inputs.read_microphone_raw();
                block_for(Duration::from_hz(u64::from(MICROPHONE_SAMPLE_RATE_HZ)));
            }
        }

        let total: u32 = samples.iter().map(|sample| u32::from(*sample)).sum();
        let mean = total / MICROPHONE_SAMPLES as u32;

        // Rising crossings of the bias midpoint approximate the dominant
        // frequency; good enough to tell traffic from birdsong.
        let mut crossings: u32 = 0;
        for pair in samples.windows(2) {
            if u32::from(pair[0]) < mean && u32::from(pair[1]) >= mean {
                crossings += 1;
            }
        }
        Ok(crossings * MICROPHONE_SAMPLE_RATE_HZ / MICROPHONE_SAMPLES as u32)
    }

    fn send_packet(&mut self, payload: &[u8]) -> Result<(), Self::Error> {
        let length = u8::try_from(payload.len()).map_err(|_| SensorError::PayloadTooLong)?;

        self.radio_write(SX1276_REG_OP_MODE, SX1276_LORA_STANDBY)?;
        let tx_base = self.radio_read_byte(SX1276_REG_FIFO_TX_BASE)?;
        self.radio_write(SX1276_REG_FIFO_ADDR_PTR, tx_base)?;
        for byte in payload {
            self.radio_write(SX1276_REG_FIFO, *byte)?;
        }
        self.radio_write(SX1276_REG_PAYLOAD_LENGTH, length)?;
        self.radio_write(SX1276_REG_OP_MODE, SX1276_LORA_TX)?;

        // Airtime for a short beacon is tens of milliseconds; give it a
        // full second before declaring the radio wedged.
        for _ in 0..500 {
            if self.radio_read_byte(SX1276_REG_IRQ_FLAGS)? & SX1276_IRQ_TX_DONE != 0 {
                self.radio_write(SX1276_REG_IRQ_FLAGS, 0xFF)?;
                return Ok(());
            }
            block_for(Duration::from_millis(2));
        }
        Err(SensorError::RadioTimeout)
    }
}

/// Factory trim constants from the BMP280 NVM, little endian at 0x88.
#[derive(Clone, Copy)]
struct Bmp280Calibration {
    dig_t1: u16,
    dig_t2: i16,
    dig_t3: i16,
    dig_p1: u16,
    dig_p2: i16,
    dig_p3: i16,
    dig_p4: i16,
    dig_p5: i16,
    dig_p6: i16,
    dig_p7: i16,
    dig_p8: i16,
    dig_p9: i16,
}

impl Bmp280Calibration {
    fn parse(raw: &[u8; 24]) -> Self {
        let word = |index: usize| u16::from_le_bytes([raw[index], raw[index + 1]]);
        #[allow(clippy::cast_possible_wrap)]
        let signed = |index: usize| word(index) as i16;
        Self {
            dig_t1: word(0),
            dig_t2: signed(2),
            dig_t3: signed(4),
            dig_p1: word(6),
            dig_p2: signed(8),
            dig_p3: signed(10),
            dig_p4: signed(12),
            dig_p5: signed(14),
            dig_p6: signed(16),
            dig_p7: signed(18),
            dig_p8: signed(20),
            dig_p9: signed(22),
        }
    }

    /// Datasheet fine-temperature term shared by both compensations.
    fn t_fine(&self, raw_temperature: i32) -> i32 {
        let var1 = (((raw_temperature >> 3) - (i32::from(self.dig_t1) << 1))
            * i32::from(self.dig_t2))
            >> 11;
        let delta = (raw_temperature >> 4) - i32::from(self.dig_t1);
        let var2 = (((delta * delta) >> 12) * i32::from(self.dig_t3)) >> 14;
        var1 + var2
    }

    fn temperature_millicelsius(t_fine: i32) -> i32 {
        // (t_fine * 5 + 128) >> 8 is centidegrees per the datasheet.
        ((t_fine * 5 + 128) >> 8) * 10
    }

    /// 64-bit pressure compensation from the datasheet, result in pascals.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn pressure_pascals(&self, t_fine: i32, raw_pressure: i32) -> u32 {
        let mut var1 = i64::from(t_fine) - 128_000;
        let mut var2 = var1 * var1 * i64::from(self.dig_p6);
        var2 += (var1 * i64::from(self.dig_p5)) << 17;
        var2 += i64::from(self.dig_p4) << 35;
        var1 = ((var1 * var1 * i64::from(self.dig_p3)) >> 8) + ((var1 * i64::from(self.dig_p2)) << 12);
        var1 = ((1_i64 << 47) + var1) * i64::from(self.dig_p1) >> 33;
        if var1 == 0 {
            return 0;
        }
        let mut pressure = 1_048_576 - i64::from(raw_pressure);
        pressure = ((pressure << 31) - var2) * 3_125 / var1;
        let var1 = (i64::from(self.dig_p9) * (pressure >> 13) * (pressure >> 13)) >> 25;
        let var2 = (i64::from(self.dig_p8) * pressure) >> 19;
        pressure = ((pressure + var1 + var2) >> 8) + (i64::from(self.dig_p7) << 4);
        // Q24.8 fixed point down to whole pascals.
        (pressure >> 8) as u32
    }
}
