//! End-to-end scenario: three staggered jobs driven across a simulated
//! minute at one-second resolution.

use harvester_core::engine::Scheduler;
use harvester_core::jobs::{JobKind, JobRunner, JobSpec};
use harvester_core::schedule::{SchedulePattern, UnixSeconds};

static TABLE: [JobSpec; 3] = [
    JobSpec::new(
        "temperature",
        0.0,
        SchedulePattern::at_second(10),
        JobKind::Temperature,
    ),
    JobSpec::new(
        "pressure",
        0.0,
        SchedulePattern::at_second(20),
        JobKind::Pressure,
    ),
    JobSpec::new(
        "light",
        0.0,
        SchedulePattern::at_second(30),
        JobKind::Light { adc_channel: 16 },
    ),
];

#[derive(Default)]
struct TraceRunner {
    ran: Vec<(&'static str, UnixSeconds)>,
}

impl JobRunner for TraceRunner {
    type Error = ();

    fn run(&mut self, job: &JobSpec, now: UnixSeconds) -> Result<(), Self::Error> {
        self.ran.push((job.name, now));
        Ok(())
    }
}

#[test]
fn one_minute_sweep_runs_each_job_once_in_order() {
    let mut scheduler: Scheduler = Scheduler::new(&TABLE).unwrap();
    let mut runner = TraceRunner::default();

    let minute_start: UnixSeconds = 12 * 3_600; // arbitrary minute boundary
    for offset in 0..60 {
        scheduler.poll(minute_start + offset, 2.0, &mut runner);
    }

    assert_eq!(
        runner.ran,
        [
            ("temperature", minute_start + 10),
            ("pressure", minute_start + 20),
            ("light", minute_start + 30),
        ]
    );

    // After the last execution the next wake is the following minute's
    // second 10.
    let after_last = minute_start + 59;
    assert_eq!(
        scheduler.next_due_time(after_last),
        Some(minute_start + 60 + 10)
    );
}

#[test]
fn second_sweep_repeats_the_cycle() {
    let mut scheduler: Scheduler = Scheduler::new(&TABLE).unwrap();
    let mut runner = TraceRunner::default();

    let start: UnixSeconds = 0;
    for offset in 0..120 {
        scheduler.poll(start + offset, 2.0, &mut runner);
    }

    assert_eq!(runner.ran.len(), 6);
    assert_eq!(runner.ran[3], ("temperature", 70));
    assert_eq!(runner.ran[4], ("pressure", 80));
    assert_eq!(runner.ran[5], ("light", 90));
}
