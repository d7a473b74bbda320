//! Job table data model and the runner seam that executes job actions.
//!
//! The table is a compile-time constant: each entry names a job, its trigger
//! pattern, the minimum supply voltage it may run at, and a [`JobKind`]
//! describing what the action does. The kinds form a closed enum rather than
//! a table of function pointers, so dispatch is checked and every kind can
//! carry its own typed parameters.

use crate::history::RecordStore;
use crate::samplelog;
use crate::schedule::{PatternError, SchedulePattern, UnixSeconds};

/// ADC channel wired to the photoresistor divider.
pub const PHOTORESISTOR_CHANNEL: u8 = 16;

/// Fixed payload for the periodic radio beacon.
pub const BEACON_PAYLOAD: &[u8] = b"harvester beacon";

/// Closed set of actions this node knows how to run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JobKind {
    /// Compensated BMP280 temperature, logged in milli-degrees Celsius.
    Temperature,
    /// Compensated BMP280 barometric pressure, logged in pascals.
    Pressure,
    /// Photoresistor resistance, logged in ohms.
    Light { adc_channel: u8 },
    /// Dominant microphone frequency, logged in hertz.
    Microphone,
    /// Transmit a fixed beacon packet; nothing is logged.
    RadioBeacon { payload: &'static [u8] },
}

/// Immutable description of one periodic job.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct JobSpec {
    /// Unique identifier; also the key for persisted history.
    pub name: &'static str,
    /// Admission gate: the job may not run below this supply voltage.
    pub minimum_voltage: f32,
    /// Time-of-day trigger pattern.
    pub schedule: SchedulePattern,
    /// What the job does when it fires.
    pub kind: JobKind,
}

impl JobSpec {
    #[must_use]
    pub const fn new(
        name: &'static str,
        minimum_voltage: f32,
        schedule: SchedulePattern,
        kind: JobKind,
    ) -> Self {
        Self {
            name,
            minimum_voltage,
            schedule,
            kind,
        }
    }
}

/// Default deployment table.
///
/// Voltage floors come from bench measurements of each job's brown-out point
/// plus headroom; the supply ADC tops out at 2.0 V so no floor may exceed it.
/// Jobs are staggered across the minute so at most one is due per second.
pub const JOB_TABLE: [JobSpec; 5] = [
    JobSpec::new(
        "temperature",
        1.8,
        SchedulePattern::at_second(10),
        JobKind::Temperature,
    ),
    JobSpec::new(
        "pressure",
        1.9,
        SchedulePattern::at_second(20),
        JobKind::Pressure,
    ),
    JobSpec::new(
        "light",
        1.8,
        SchedulePattern::at_second(30),
        JobKind::Light {
            adc_channel: PHOTORESISTOR_CHANNEL,
        },
    ),
    JobSpec::new(
        "microphone",
        2.0,
        SchedulePattern::at_second(40),
        JobKind::Microphone,
    ),
    JobSpec::new(
        "radio",
        1.8,
        SchedulePattern::at_second(50),
        JobKind::RadioBeacon {
            payload: BEACON_PAYLOAD,
        },
    ),
];

/// Job table configuration errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableError {
    /// Two entries share a name, which would alias their persisted history.
    DuplicateName { index: usize },
    /// A schedule field is outside its natural range.
    InvalidPattern { index: usize, error: PatternError },
    /// Every field is a wildcard; the job would fire on every poll.
    AlwaysDue { index: usize },
}

/// Validates table invariants at startup.
///
/// # Errors
///
/// Returns the first violated invariant with the offending entry's index.
pub fn validate_table(table: &[JobSpec]) -> Result<(), TableError> {
    for (index, job) in table.iter().enumerate() {
        job.schedule
            .validate()
            .map_err(|error| TableError::InvalidPattern { index, error })?;
        if job.schedule.is_always_due() {
            return Err(TableError::AlwaysDue { index });
        }
        if table[..index].iter().any(|earlier| earlier.name == job.name) {
            return Err(TableError::DuplicateName { index });
        }
    }
    Ok(())
}

/// Executes job actions on behalf of the scheduler engine.
///
/// The engine treats execution as fire-and-forget: a returned error does not
/// undo the run, it only tells the caller the action's effect was a no-op.
pub trait JobRunner {
    type Error;

    /// Runs the action for `job` at wall-clock time `now`.
    ///
    /// # Errors
    ///
    /// Implementation-specific. The scheduler records the run either way.
    fn run(&mut self, job: &JobSpec, now: UnixSeconds) -> Result<(), Self::Error>;
}

/// Runner that performs no work. Useful for scheduling-only tests.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopJobRunner;

impl NoopJobRunner {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl JobRunner for NoopJobRunner {
    type Error = core::convert::Infallible;

    fn run(&mut self, _: &JobSpec, _: UnixSeconds) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Synchronous sensor and radio drivers consumed by [`SensorJobRunner`].
///
/// Implementations may busy-wait internally (ADC conversion polling, DMA
/// buffer fills); every call completes on hardware completion, never on a
/// timeout.
pub trait SensorSuite {
    type Error;

    /// Compensated ambient temperature in milli-degrees Celsius.
    ///
    /// # Errors
    ///
    /// Driver or bus failures; the sample is discarded.
    fn read_temperature_millicelsius(&mut self) -> Result<i32, Self::Error>;

    /// Compensated barometric pressure in pascals.
    ///
    /// # Errors
    ///
    /// Driver or bus failures; the sample is discarded.
    fn read_pressure_pascals(&mut self) -> Result<u32, Self::Error>;

    /// Photoresistor resistance in ohms, sampled on the given ADC channel.
    ///
    /// # Errors
    ///
    /// Driver or bus failures; the sample is discarded.
    fn read_light_ohms(&mut self, adc_channel: u8) -> Result<u32, Self::Error>;

    /// Dominant frequency of a microphone capture in hertz.
    ///
    /// # Errors
    ///
    /// Driver or bus failures; the sample is discarded.
    fn read_peak_frequency_hz(&mut self) -> Result<u32, Self::Error>;

    /// Transmits one radio packet.
    ///
    /// # Errors
    ///
    /// Radio failures; the packet may not have gone out.
    fn send_packet(&mut self, payload: &[u8]) -> Result<(), Self::Error>;
}

/// CSV stream and header for the temperature job.
pub const TEMPERATURE_LOG: &str = "temperature_data.csv";
pub const TEMPERATURE_HEADER: &str = "time,temperature data celsius\r\n";
/// CSV stream and header for the pressure job.
pub const PRESSURE_LOG: &str = "pressure_data.csv";
pub const PRESSURE_HEADER: &str = "time,pressure data pascals\r\n";
/// CSV stream and header for the light job.
pub const LIGHT_LOG: &str = "light_data.csv";
pub const LIGHT_HEADER: &str = "time,light data ohms\r\n";
/// CSV stream and header for the microphone job.
pub const MICROPHONE_LOG: &str = "microphone_data.csv";
pub const MICROPHONE_HEADER: &str = "time,microphone data Hz\r\n";

/// Error raised by [`SensorJobRunner`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensorJobError<D, L> {
    /// The sensor driver failed; no sample was taken.
    Driver(D),
    /// The sample was taken but could not be logged.
    Log(L),
}

/// Production runner: samples the matching sensor and appends a CSV line.
///
/// Owns the measurement log store; the scheduler's history store is separate
/// so the two never contend for one handle.
pub struct SensorJobRunner<D, L> {
    drivers: D,
    log: L,
}

impl<D, L> SensorJobRunner<D, L>
where
    D: SensorSuite,
    L: RecordStore,
{
    pub const fn new(drivers: D, log: L) -> Self {
        Self { drivers, log }
    }

    /// Read-only view of the measurement log store.
    #[must_use]
    pub fn log(&self) -> &L {
        &self.log
    }

    /// Releases the drivers and log store.
    #[must_use]
    pub fn into_parts(self) -> (D, L) {
        (self.drivers, self.log)
    }
}

impl<D, L> JobRunner for SensorJobRunner<D, L>
where
    D: SensorSuite,
    L: RecordStore,
{
    type Error = SensorJobError<D::Error, L::Error>;

    fn run(&mut self, job: &JobSpec, now: UnixSeconds) -> Result<(), Self::Error> {
        match job.kind {
            JobKind::Temperature => {
                let millicelsius = self
                    .drivers
                    .read_temperature_millicelsius()
                    .map_err(SensorJobError::Driver)?;
                samplelog::append_sample(
                    &mut self.log,
                    TEMPERATURE_LOG,
                    TEMPERATURE_HEADER,
                    now,
                    millicelsius,
                )
                .map_err(SensorJobError::Log)
            }
            JobKind::Pressure => {
                let pascals = self
                    .drivers
                    .read_pressure_pascals()
                    .map_err(SensorJobError::Driver)?;
                samplelog::append_sample(
                    &mut self.log,
                    PRESSURE_LOG,
                    PRESSURE_HEADER,
                    now,
                    pascals,
                )
                .map_err(SensorJobError::Log)
            }
            JobKind::Light { adc_channel } => {
                let ohms = self
                    .drivers
                    .read_light_ohms(adc_channel)
                    .map_err(SensorJobError::Driver)?;
                samplelog::append_sample(&mut self.log, LIGHT_LOG, LIGHT_HEADER, now, ohms)
                    .map_err(SensorJobError::Log)
            }
            JobKind::Microphone => {
                let hertz = self
                    .drivers
                    .read_peak_frequency_hz()
                    .map_err(SensorJobError::Driver)?;
                samplelog::append_sample(
                    &mut self.log,
                    MICROPHONE_LOG,
                    MICROPHONE_HEADER,
                    now,
                    hertz,
                )
                .map_err(SensorJobError::Log)
            }
            JobKind::RadioBeacon { payload } => self
                .drivers
                .send_packet(payload)
                .map_err(SensorJobError::Driver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryRecordStore;
    use crate::schedule::TimeField;

    #[test]
    fn default_table_is_valid() {
        assert_eq!(validate_table(&JOB_TABLE), Ok(()));
    }

    #[test]
    fn duplicate_names_rejected() {
        static TABLE: [JobSpec; 2] = [
            JobSpec::new(
                "light",
                1.8,
                SchedulePattern::at_second(30),
                JobKind::Light { adc_channel: 16 },
            ),
            JobSpec::new(
                "light",
                1.8,
                SchedulePattern::at_second(40),
                JobKind::Light { adc_channel: 17 },
            ),
        ];
        assert_eq!(
            validate_table(&TABLE),
            Err(TableError::DuplicateName { index: 1 })
        );
    }

    #[test]
    fn always_due_pattern_rejected() {
        static TABLE: [JobSpec; 1] = [JobSpec::new(
            "temperature",
            1.8,
            SchedulePattern::new(TimeField::Any, TimeField::Any, TimeField::Any),
            JobKind::Temperature,
        )];
        assert_eq!(validate_table(&TABLE), Err(TableError::AlwaysDue { index: 0 }));
    }

    #[test]
    fn out_of_range_field_rejected() {
        static TABLE: [JobSpec; 1] = [JobSpec::new(
            "temperature",
            1.8,
            SchedulePattern::at_second(61),
            JobKind::Temperature,
        )];
        assert!(matches!(
            validate_table(&TABLE),
            Err(TableError::InvalidPattern { index: 0, .. })
        ));
    }

    struct FixedSensors;

    impl SensorSuite for FixedSensors {
        type Error = core::convert::Infallible;

        fn read_temperature_millicelsius(&mut self) -> Result<i32, Self::Error> {
            Ok(21_500)
        }

        fn read_pressure_pascals(&mut self) -> Result<u32, Self::Error> {
            Ok(101_325)
        }

        fn read_light_ohms(&mut self, _: u8) -> Result<u32, Self::Error> {
            Ok(4_700)
        }

        fn read_peak_frequency_hz(&mut self) -> Result<u32, Self::Error> {
            Ok(440)
        }

        fn send_packet(&mut self, _: &[u8]) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[test]
    fn sensor_runner_logs_csv_per_kind() {
        let log: MemoryRecordStore<8, 512> = MemoryRecordStore::new();
        let mut runner = SensorJobRunner::new(FixedSensors, log);

        for job in &JOB_TABLE {
            runner.run(job, 5_000).unwrap();
        }

        let text = core::str::from_utf8(runner.log().contents(TEMPERATURE_LOG).unwrap()).unwrap();
        assert_eq!(text, "time,temperature data celsius\r\n5000,21500\r\n");

        let text = core::str::from_utf8(runner.log().contents(LIGHT_LOG).unwrap()).unwrap();
        assert!(text.ends_with("5000,4700\r\n"));

        // Beacon logs nothing.
        assert!(runner.log().contents("radio_data.csv").is_none());
    }
}
