//! Time-of-day schedule patterns and the calendar arithmetic behind them.
//!
//! Each job carries a [`SchedulePattern`] whose hour/minute/second fields are
//! either a wildcard or an exact value. The scheduler engine decomposes the
//! wall clock into a [`TimeOfDay`] for matching, and asks the pattern for the
//! next matching instant when it needs to arm the hardware wake alarm. All
//! arithmetic is UTC with 86 400-second days.

/// Absolute wall-clock timestamp in whole seconds since the Unix epoch.
pub type UnixSeconds = u64;

/// Sentinel `last_run` value meaning a job has never executed.
pub const NEVER_RUN: UnixSeconds = 0;

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 3_600;
const SECONDS_PER_DAY: u64 = 86_400;

/// Decomposed UTC wall-clock fields used for pattern matching.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl TimeOfDay {
    /// Decomposes a timestamp into its UTC hour/minute/second fields.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // all quotients/remainders < 60 or < 24
    pub const fn from_unix(timestamp: UnixSeconds) -> Self {
        let of_day = timestamp % SECONDS_PER_DAY;
        Self {
            hour: (of_day / SECONDS_PER_HOUR) as u8,
            minute: ((of_day % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE) as u8,
            second: (of_day % SECONDS_PER_MINUTE) as u8,
        }
    }
}

/// One schedule component: matches any value, or exactly one.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimeField {
    Any,
    Exact(u8),
}

impl TimeField {
    /// Returns `true` when `value` satisfies this field.
    #[must_use]
    pub const fn matches(self, value: u8) -> bool {
        match self {
            TimeField::Any => true,
            TimeField::Exact(expected) => expected == value,
        }
    }

    const fn is_exact(self) -> bool {
        matches!(self, TimeField::Exact(_))
    }

    const fn in_range(self, max: u8) -> bool {
        match self {
            TimeField::Any => true,
            TimeField::Exact(value) => value <= max,
        }
    }
}

/// Field that failed range validation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PatternError {
    HourOutOfRange(u8),
    MinuteOutOfRange(u8),
    SecondOutOfRange(u8),
}

/// Wildcard-or-exact trigger pattern over the UTC time of day.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SchedulePattern {
    pub hour: TimeField,
    pub minute: TimeField,
    pub second: TimeField,
}

impl SchedulePattern {
    #[must_use]
    pub const fn new(hour: TimeField, minute: TimeField, second: TimeField) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    /// Pattern firing once per minute at the given second.
    #[must_use]
    pub const fn at_second(second: u8) -> Self {
        Self::new(TimeField::Any, TimeField::Any, TimeField::Exact(second))
    }

    /// Validates that every exact field sits in its natural range.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range field.
    pub const fn validate(&self) -> Result<(), PatternError> {
        if let TimeField::Exact(hour) = self.hour
            && hour > 23
        {
            return Err(PatternError::HourOutOfRange(hour));
        }
        if let TimeField::Exact(minute) = self.minute
            && minute > 59
        {
            return Err(PatternError::MinuteOutOfRange(minute));
        }
        if let TimeField::Exact(second) = self.second
            && second > 59
        {
            return Err(PatternError::SecondOutOfRange(second));
        }
        Ok(())
    }

    /// Returns `true` when every field is a wildcard, i.e. the pattern would
    /// be due on every single poll.
    #[must_use]
    pub const fn is_always_due(&self) -> bool {
        !self.hour.is_exact() && !self.minute.is_exact() && !self.second.is_exact()
    }

    /// Returns `true` when the decomposed time satisfies every field.
    #[must_use]
    pub const fn matches(&self, time: TimeOfDay) -> bool {
        self.hour.matches(time.hour)
            && self.minute.matches(time.minute)
            && self.second.matches(time.second)
    }

    /// Start of the matching instant containing `now`, at the granularity of
    /// the finest non-wildcard field. A job whose `last_run` falls at or after
    /// this point has already executed for the current match.
    #[must_use]
    pub const fn window_start(&self, now: UnixSeconds) -> UnixSeconds {
        if self.second.is_exact() {
            now
        } else if self.minute.is_exact() {
            now - now % SECONDS_PER_MINUTE
        } else if self.hour.is_exact() {
            now - now % SECONDS_PER_HOUR
        } else {
            now
        }
    }

    /// Smallest timestamp strictly greater than `after` whose fields all
    /// match. Exact, never at or before `after`; wraps across minute, hour,
    /// and day boundaries as needed.
    #[must_use]
    pub fn next_match_after(&self, after: UnixSeconds) -> UnixSeconds {
        debug_assert!(self.in_range());

        let day_start = after - after % SECONDS_PER_DAY;
        let of_day = u32::try_from(after % SECONDS_PER_DAY).unwrap_or(0);

        if let Some(next) = self.next_time_of_day(of_day + 1) {
            return day_start + u64::from(next);
        }

        // No match left today; a valid pattern always matches somewhere in a
        // full day, so take the first match tomorrow.
        let first = self.next_time_of_day(0).unwrap_or(0);
        day_start + SECONDS_PER_DAY + u64::from(first)
    }

    /// Smallest time-of-day at or after `from` (seconds into the day) that
    /// matches, or `None` when the remainder of the day has no match.
    #[allow(clippy::cast_possible_truncation)] // loop bounds keep hour < 24, minute < 60
    fn next_time_of_day(&self, from: u32) -> Option<u32> {
        if from >= 86_400 {
            return None;
        }
        let from_hour = from / 3_600;
        for hour in from_hour..24 {
            if !self.hour.matches(hour as u8) {
                continue;
            }
            let minute_floor = if hour == from_hour { (from % 3_600) / 60 } else { 0 };
            for minute in minute_floor..60 {
                if !self.minute.matches(minute as u8) {
                    continue;
                }
                let base = hour * 3_600 + minute * 60;
                let second_floor = from.saturating_sub(base);
                match self.second {
                    TimeField::Any => return Some(base + second_floor),
                    TimeField::Exact(second) => {
                        let second = u32::from(second);
                        if second >= second_floor {
                            return Some(base + second);
                        }
                    }
                }
            }
        }
        None
    }

    const fn in_range(&self) -> bool {
        self.hour.in_range(23) && self.minute.in_range(59) && self.second.in_range(59)
    }
}
