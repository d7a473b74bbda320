use harvester_core::engine::Scheduler;
use harvester_core::jobs::{JobKind, JobRunner, JobSpec};
use harvester_core::schedule::{SchedulePattern, UnixSeconds};

static TABLE: [JobSpec; 3] = [
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
        "microphone",
        2.0,
        SchedulePattern::at_second(40),
        JobKind::Microphone,
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
fn voltage_floor_gates_each_job_independently() {
    let mut scheduler: Scheduler = Scheduler::new(&TABLE).unwrap();
    let mut runner = TraceRunner::default();

    // 1.85 V: enough for temperature, not for pressure or microphone.
    assert!(scheduler.poll(10, 1.85, &mut runner));
    assert!(!scheduler.poll(20, 1.85, &mut runner));
    assert!(!scheduler.poll(40, 1.85, &mut runner));

    assert_eq!(runner.ran, [("temperature", 10)]);
    assert_eq!(scheduler.last_run(1), Some(0));
    assert_eq!(scheduler.last_run(2), Some(0));
}

#[test]
fn missed_occurrence_is_not_made_up_later() {
    let mut scheduler: Scheduler = Scheduler::new(&TABLE).unwrap();
    let mut runner = TraceRunner::default();

    // Pressure's window passes while the supply is starved.
    assert!(!scheduler.poll(20, 1.5, &mut runner));
    // Voltage recovers one second later; the window is gone.
    assert!(!scheduler.poll(21, 2.0, &mut runner));
    // The next scheduled occurrence runs normally.
    assert!(scheduler.poll(80, 2.0, &mut runner));

    assert_eq!(runner.ran, [("pressure", 80)]);
}

#[test]
fn exact_threshold_is_admissible() {
    let mut scheduler: Scheduler = Scheduler::new(&TABLE).unwrap();
    let mut runner = TraceRunner::default();

    assert!(scheduler.poll(40, 2.0, &mut runner));
    assert_eq!(runner.ran, [("microphone", 40)]);
}

#[test]
fn repeated_polls_within_one_second_run_once() {
    let mut scheduler: Scheduler = Scheduler::new(&TABLE).unwrap();
    let mut runner = TraceRunner::default();

    for _ in 0..5 {
        scheduler.poll(10, 2.0, &mut runner);
    }
    assert_eq!(runner.ran.len(), 1);
}
