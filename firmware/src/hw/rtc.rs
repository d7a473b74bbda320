//! AM1815 real-time clock on the shared SPI bus.
//!
//! The RTC keeps wall time across power-downs on its own coin cell and drives
//! the wake alarm: its interrupt output pulls the regulator latch high again,
//! which is what boots the node at the programmed time. Time registers are
//! BCD; the driver converts to and from Unix seconds assuming years
//! 2000-2099, which is all the two-digit year register can express.

#![cfg(target_os = "none")]

use core::cell::RefCell;

use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::{self, Spi};
use harvester_core::node::{AlarmRepeat, WallClock};
use harvester_core::schedule::{TimeOfDay, UnixSeconds};

const REG_HUNDREDTHS: u8 = 0x00;
const REG_ALARM_HUNDREDTHS: u8 = 0x08;
const REG_STATUS: u8 = 0x0F;
const REG_INT_MASK: u8 = 0x12;
const REG_TIMER_CONTROL: u8 = 0x18;
const REG_OSC_STATUS: u8 = 0x1D;

/// Set in the command byte to write instead of read.
const WRITE_BIT: u8 = 0x80;
/// Alarm interrupt enable in the interrupt mask register.
const INT_MASK_AIE: u8 = 0x04;
/// Oscillator-failure flag, latched after the backup supply ran out.
const OSC_STATUS_OF: u8 = 0x02;

const SECONDS_PER_DAY: u64 = 86_400;

pub struct Am1815<'a, 'd> {
    bus: &'a RefCell<Spi<'d, Blocking>>,
    select: Output<'d>,
}

impl<'a, 'd> Am1815<'a, 'd> {
    #[must_use]
    pub fn new(bus: &'a RefCell<Spi<'d, Blocking>>, select: Output<'d>) -> Self {
        Self { bus, select }
    }

    fn read_registers(&mut self, start: u8, buf: &mut [u8]) -> Result<(), spi::Error> {
        let mut bus = self.bus.borrow_mut();
        self.select.set_low();
        let result = bus
            .blocking_write(&[start])
            .and_then(|()| bus.blocking_read(buf));
        self.select.set_high();
        result
    }

    fn write_registers(&mut self, start: u8, bytes: &[u8]) -> Result<(), spi::Error> {
        let mut bus = self.bus.borrow_mut();
        self.select.set_low();
        let result = bus
            .blocking_write(&[start | WRITE_BIT])
            .and_then(|()| bus.blocking_write(bytes));
        self.select.set_high();
        result
    }

    /// Checks and clears the oscillator-failure flag. Returns `true` when the
    /// flag was set, meaning wall time is garbage until the next `set`.
    ///
    /// # Errors
    ///
    /// SPI transfer failures.
    pub fn clear_oscillator_fault(&mut self) -> Result<bool, spi::Error> {
        let mut status = [0u8; 1];
        self.read_registers(REG_OSC_STATUS, &mut status)?;
        if status[0] & OSC_STATUS_OF == 0 {
            return Ok(false);
        }
        self.write_registers(REG_OSC_STATUS, &[status[0] & !OSC_STATUS_OF])?;
        Ok(true)
    }
}

impl WallClock for Am1815<'_, '_> {
    type Error = spi::Error;

    fn now(&mut self) -> Result<UnixSeconds, Self::Error> {
        // Burst read latches the whole time stack in one transaction, so the
        // fields are mutually consistent even across a second boundary.
        let mut regs = [0u8; 8];
        self.read_registers(REG_HUNDREDTHS, &mut regs)?;
        let time = CalendarTime {
            year: 2_000 + u16::from(from_bcd(regs[6])),
            month: from_bcd(regs[5] & 0x1F),
            day: from_bcd(regs[4] & 0x3F),
            hour: from_bcd(regs[3] & 0x3F),
            minute: from_bcd(regs[2] & 0x7F),
            second: from_bcd(regs[1] & 0x7F),
        };
        Ok(time.to_unix())
    }

    fn set(&mut self, now: UnixSeconds) -> Result<(), Self::Error> {
        let time = CalendarTime::from_unix(now);
        let regs = [
            0x00,
            to_bcd(time.second),
            to_bcd(time.minute),
            to_bcd(time.hour),
            to_bcd(time.day),
            to_bcd(time.month),
            to_bcd(u8::try_from(time.year.saturating_sub(2_000) % 100).unwrap_or(0)),
            0x00,
        ];
        self.write_registers(REG_HUNDREDTHS, &regs)
    }

    fn program_alarm(&mut self, at: UnixSeconds, repeat: AlarmRepeat) -> Result<(), Self::Error> {
        let time = CalendarTime::from_unix(at);
        let alarm = [
            0x00,
            to_bcd(time.second),
            to_bcd(time.minute),
            to_bcd(time.hour),
            to_bcd(time.day),
            to_bcd(time.month),
            0x00,
        ];
        self.write_registers(REG_ALARM_HUNDREDTHS, &alarm)?;

        // RPT field selects which alarm registers participate in the match.
        let rpt: u8 = match repeat {
            AlarmRepeat::None => 0b001,
            AlarmRepeat::EveryDay => 0b100,
            AlarmRepeat::EveryHour => 0b101,
            AlarmRepeat::EveryMinute => 0b110,
        };
        self.write_registers(REG_TIMER_CONTROL, &[rpt << 2])?;

        // Clear a stale alarm flag before unmasking the interrupt, otherwise
        // the latch fires the instant the mask opens.
        self.write_registers(REG_STATUS, &[0x00])?;
        self.write_registers(REG_INT_MASK, &[INT_MASK_AIE])
    }
}

struct CalendarTime {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

impl CalendarTime {
    fn from_unix(now: UnixSeconds) -> Self {
        let days = i64::try_from(now / SECONDS_PER_DAY).unwrap_or(0);
        let (year, month, day) = civil_from_days(days);
        let tod = TimeOfDay::from_unix(now);
        Self {
            year: u16::try_from(year).unwrap_or(2_000),
            month,
            day,
            hour: tod.hour,
            minute: tod.minute,
            second: tod.second,
        }
    }

    fn to_unix(&self) -> UnixSeconds {
        let days = days_from_civil(
            i64::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        );
        let seconds = days * 86_400
            + i64::from(self.hour) * 3_600
            + i64::from(self.minute) * 60
            + i64::from(self.second);
        u64::try_from(seconds).unwrap_or(0)
    }
}

fn to_bcd(value: u8) -> u8 {
    (value / 10) << 4 | (value % 10)
}

fn from_bcd(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let adjusted_year = if month <= 2 { year - 1 } else { year };
    let era = adjusted_year.div_euclid(400);
    let year_of_era = adjusted_year - era * 400;
    let shifted_month = i64::from(if month > 2 { month - 3 } else { month + 9 });
    let day_of_year = (153 * shifted_month + 2) / 5 + i64::from(day) - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

/// Inverse of [`days_from_civil`].
// The month and day results are bounded by the floor arithmetic, so the
// narrowing conversions cannot truncate.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let shifted = days + 719_468;
    let era = shifted.div_euclid(146_097);
    let day_of_era = shifted - era * 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1_460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let year = year_of_era + era * 400;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let shifted_month = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * shifted_month + 2) / 5 + 1;
    let month = if shifted_month < 10 {
        shifted_month + 3
    } else {
        shifted_month - 9
    };
    let year = if month <= 2 { year + 1 } else { year };
    (year, month as u8, day as u8)
}
