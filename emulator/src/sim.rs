//! Deterministic host-side simulation of the harvester node.
//!
//! Each iteration models one power cycle: the node boots, restores history,
//! drains whatever is due, arms the wake alarm, checkpoints, and "powers
//! off"; the simulation then jumps the shared clock to the armed alarm. A
//! crash can be injected between cycles by tearing the newest history pair,
//! which exercises the backward-scan recovery on the following boot.

use std::cell::Cell;
use std::rc::Rc;

use harvester_core::engine::MAX_JOBS;
use harvester_core::history::RECORD_COPY_LEN;
use harvester_core::jobs::{JOB_TABLE, SensorJobRunner, SensorSuite};
use harvester_core::node::{AlarmRepeat, Node, NodeConfig, VoltageSensor, WallClock};
use harvester_core::schedule::{TimeOfDay, UnixSeconds};

use crate::store::HostRecordStore;

/// Supply-voltage scenario driven over the simulated timeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SupplyProfile {
    /// Healthy harvest: every job admissible.
    Steady,
    /// Supply dips below the hungrier jobs on alternating minutes.
    Cloudy,
    /// Starved supply: nothing is admissible, only the alarm keeps moving.
    Night,
}

impl SupplyProfile {
    /// Parses a `--profile` argument value.
    ///
    /// # Errors
    ///
    /// Unknown profile tags.
    pub fn from_tag(tag: &str) -> Result<Self, String> {
        match tag {
            "steady" => Ok(SupplyProfile::Steady),
            "cloudy" => Ok(SupplyProfile::Cloudy),
            "night" => Ok(SupplyProfile::Night),
            other => Err(format!("Unknown profile `{other}`")),
        }
    }

    fn voltage_at(self, now: UnixSeconds) -> f32 {
        match self {
            SupplyProfile::Steady => 2.0,
            SupplyProfile::Cloudy => {
                if (now / 60) % 2 == 0 {
                    1.95
                } else {
                    1.85
                }
            }
            SupplyProfile::Night => 1.2,
        }
    }
}

/// Settable wall clock shared between the node and the simulation driver.
pub struct SimClock {
    now: Rc<Cell<UnixSeconds>>,
    alarm: Rc<Cell<Option<UnixSeconds>>>,
}

impl SimClock {
    fn new(now: Rc<Cell<UnixSeconds>>, alarm: Rc<Cell<Option<UnixSeconds>>>) -> Self {
        Self { now, alarm }
    }
}

impl WallClock for SimClock {
    type Error = std::convert::Infallible;

    fn now(&mut self) -> Result<UnixSeconds, Self::Error> {
        Ok(self.now.get())
    }

    fn set(&mut self, now: UnixSeconds) -> Result<(), Self::Error> {
        self.now.set(now);
        Ok(())
    }

    fn program_alarm(&mut self, at: UnixSeconds, _: AlarmRepeat) -> Result<(), Self::Error> {
        self.alarm.set(Some(at));
        Ok(())
    }
}

/// Supply sensor evaluating the profile at the shared clock's current time.
pub struct SimSupply {
    profile: SupplyProfile,
    now: Rc<Cell<UnixSeconds>>,
}

impl VoltageSensor for SimSupply {
    type Error = std::convert::Infallible;

    fn sample(&mut self) -> Result<f32, Self::Error> {
        Ok(self.profile.voltage_at(self.now.get()))
    }
}

/// Synthetic but deterministic environment readings.
pub struct SimSensors {
    now: Rc<Cell<UnixSeconds>>,
    packets_sent: u32,
}

impl SensorSuite for SimSensors {
    type Error = std::convert::Infallible;

    fn read_temperature_millicelsius(&mut self) -> Result<i32, Self::Error> {
        // Slow daily swing around 18 C.
        let phase = i64::try_from(self.now.get() % 86_400).unwrap_or(0);
        Ok(18_000 + i32::try_from((phase - 43_200) / 10).unwrap_or(0))
    }

    fn read_pressure_pascals(&mut self) -> Result<u32, Self::Error> {
        Ok(101_325 + u32::try_from(self.now.get() % 700).unwrap_or(0))
    }

    fn read_light_ohms(&mut self, _: u8) -> Result<u32, Self::Error> {
        Ok(4_700 + u32::try_from(self.now.get() % 1_000).unwrap_or(0))
    }

    fn read_peak_frequency_hz(&mut self) -> Result<u32, Self::Error> {
        Ok(440)
    }

    fn send_packet(&mut self, _: &[u8]) -> Result<(), Self::Error> {
        self.packets_sent += 1;
        Ok(())
    }
}

type SimRunner = SensorJobRunner<SimSensors, HostRecordStore>;

/// Options for one simulation run.
pub struct SimOptions {
    pub profile: SupplyProfile,
    pub minutes: u64,
    pub inject_crash: bool,
}

/// Drives the node through simulated power cycles and returns trace lines.
#[must_use]
pub fn run(options: &SimOptions) -> Vec<String> {
    let now = Rc::new(Cell::new(5u64));
    let alarm = Rc::new(Cell::new(None));

    let mut history = HostRecordStore::new();
    let mut runner = SimRunner::new(
        SimSensors {
            now: Rc::clone(&now),
            packets_sent: 0,
        },
        HostRecordStore::new(),
    );

    let mut trace = Vec::new();
    let mut total_runs = 0u32;
    let mut crash_pending = options.inject_crash;
    let horizon = 5 + options.minutes * 60;

    while now.get() < horizon {
        let clock = SimClock::new(Rc::clone(&now), Rc::clone(&alarm));
        let supply = SimSupply {
            profile: options.profile,
            now: Rc::clone(&now),
        };

        let mut node = Node::<_, _, _, _, MAX_JOBS>::initialize(
            clock,
            supply,
            history,
            runner,
            &JOB_TABLE,
            NodeConfig::default(),
        )
        .expect("job table is valid");

        let plan = node.run_until_sleep().expect("simulated peripherals cannot fail");
        let time = TimeOfDay::from_unix(now.get());
        trace.push(format!(
            "{:02}:{:02}:{:02} supply={:.2}V ran={} wake={:?}",
            time.hour,
            time.minute,
            time.second,
            options.profile.voltage_at(now.get()),
            plan.jobs_run,
            plan.wake_at,
        ));
        total_runs += plan.jobs_run;

        let (_, _, returned_history, returned_runner) =
            node.shutdown().expect("the host store never rejects appends");
        history = returned_history;
        runner = returned_runner;

        // One torn checkpoint, part-way through the run: the newest pair of
        // the temperature stream loses its second copy.
        if crash_pending && total_runs >= 3 {
            let len = history
                .contents("temperature")
                .map(<[u8]>::len)
                .unwrap_or(0);
            if len >= RECORD_COPY_LEN && history.truncate("temperature", len - RECORD_COPY_LEN) {
                trace.push("** power failed mid-checkpoint; tore newest pair **".into());
                crash_pending = false;
            }
        }

        match alarm.take() {
            Some(wake_at) => now.set(wake_at),
            None => break,
        }
    }

    trace.push(format!("total jobs run: {total_runs}"));
    for stream in [
        harvester_core::jobs::TEMPERATURE_LOG,
        harvester_core::jobs::PRESSURE_LOG,
        harvester_core::jobs::LIGHT_LOG,
        harvester_core::jobs::MICROPHONE_LOG,
    ] {
        let lines = runner
            .log()
            .contents(stream)
            .map(|bytes| bytes.split(|byte| *byte == b'\n').count().saturating_sub(1))
            .unwrap_or(0);
        trace.push(format!("{stream}: {lines} line(s)"));
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_profile_runs_every_job_each_minute() {
        let trace = run(&SimOptions {
            profile: SupplyProfile::Steady,
            minutes: 2,
            inject_crash: false,
        });
        let total = trace
            .iter()
            .find_map(|line| line.strip_prefix("total jobs run: "))
            .and_then(|value| value.parse::<u32>().ok())
            .expect("trace reports totals");
        assert_eq!(total, 10);
    }

    #[test]
    fn night_profile_runs_nothing() {
        let trace = run(&SimOptions {
            profile: SupplyProfile::Night,
            minutes: 2,
            inject_crash: false,
        });
        assert!(trace.iter().any(|line| line == "total jobs run: 0"));
    }

    #[test]
    fn hour_of_steady_cycles_checkpoints_every_wake() {
        // Five checkpoints per minute for an hour; the history store must
        // absorb all of them, not just the first few minutes' worth.
        let trace = run(&SimOptions {
            profile: SupplyProfile::Steady,
            minutes: 60,
            inject_crash: false,
        });
        assert!(trace.iter().any(|line| line == "total jobs run: 300"));
    }

    #[test]
    fn whole_day_run_reports_full_csv_line_counts() {
        let trace = run(&SimOptions {
            profile: SupplyProfile::Steady,
            minutes: 1_440,
            inject_crash: false,
        });
        assert!(trace.iter().any(|line| line == "total jobs run: 7200"));

        // One header plus one sample per minute, none dropped.
        let expected = format!(
            "{}: 1441 line(s)",
            harvester_core::jobs::TEMPERATURE_LOG
        );
        assert!(trace.iter().any(|line| *line == expected));
    }

    #[test]
    fn injected_crash_recovers_and_reruns() {
        let trace = run(&SimOptions {
            profile: SupplyProfile::Steady,
            minutes: 3,
            inject_crash: true,
        });
        assert!(trace.iter().any(|line| line.contains("tore newest pair")));
        let total = trace
            .iter()
            .find_map(|line| line.strip_prefix("total jobs run: "))
            .and_then(|value| value.parse::<u32>().ok())
            .expect("trace reports totals");
        // The torn checkpoint costs nothing here: the re-run happens on the
        // next scheduled occurrence regardless.
        assert!(total >= 15);
    }
}
