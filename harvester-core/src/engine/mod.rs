//! Energy-aware scheduler engine.
//!
//! The engine owns the read-only job table plus one mutable [`JobHistory`]
//! slot per entry, and is driven entirely by the run loop: it never reads
//! hardware itself. A single [`Scheduler::poll`] executes at most one job so
//! the supply voltage sampled just before the call stays representative of
//! the voltage the job actually sees.

use heapless::Vec;

use crate::history::{self, RecordStore};
use crate::jobs::{JobRunner, JobSpec, TableError, validate_table};
use crate::schedule::{NEVER_RUN, TimeOfDay, UnixSeconds};

/// Largest job table the engine is sized for by default.
pub const MAX_JOBS: usize = 8;

/// Mutable per-job execution record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct JobHistory {
    /// Timestamp of the most recent run, or [`NEVER_RUN`].
    pub last_run: UnixSeconds,
}

impl JobHistory {
    #[must_use]
    pub const fn never() -> Self {
        Self { last_run: NEVER_RUN }
    }
}

/// Errors surfaced while constructing a [`Scheduler`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedulerError {
    /// The job table violates a configuration invariant.
    Table(TableError),
    /// More jobs than history slots.
    TooManyJobs { count: usize },
}

/// Scheduler state: the job table and its histories, indexed identically.
#[derive(Debug)]
pub struct Scheduler<const CAPACITY: usize = MAX_JOBS> {
    table: &'static [JobSpec],
    histories: Vec<JobHistory, CAPACITY>,
}

impl<const CAPACITY: usize> Scheduler<CAPACITY> {
    /// Validates the table and builds a scheduler with blank histories.
    ///
    /// # Errors
    ///
    /// Rejects invalid tables and tables larger than `CAPACITY`.
    pub fn new(table: &'static [JobSpec]) -> Result<Self, SchedulerError> {
        validate_table(table).map_err(SchedulerError::Table)?;
        let mut histories = Vec::new();
        for _ in table {
            histories
                .push(JobHistory::never())
                .map_err(|_| SchedulerError::TooManyJobs { count: table.len() })?;
        }
        Ok(Self { table, histories })
    }

    /// The configured job table.
    #[must_use]
    pub fn jobs(&self) -> &'static [JobSpec] {
        self.table
    }

    /// Per-job histories, indexed like [`Self::jobs`].
    #[must_use]
    pub fn histories(&self) -> &[JobHistory] {
        &self.histories
    }

    /// Last-run timestamp for the job at `index`, if in range.
    #[must_use]
    pub fn last_run(&self, index: usize) -> Option<UnixSeconds> {
        self.histories.get(index).map(|history| history.last_run)
    }

    /// Overwrites the in-memory last-run timestamp for the job at `index`.
    /// Returns `false` when the index is out of range.
    pub fn set_last_run(&mut self, index: usize, last_run: UnixSeconds) -> bool {
        match self.histories.get_mut(index) {
            Some(history) => {
                history.last_run = last_run;
                true
            }
            None => false,
        }
    }

    /// Newest last-run timestamp across all jobs ([`NEVER_RUN`] when none
    /// has ever executed). The run loop compares this against the clock to
    /// detect regression.
    #[must_use]
    pub fn latest_last_run(&self) -> UnixSeconds {
        self.histories
            .iter()
            .map(|history| history.last_run)
            .max()
            .unwrap_or(NEVER_RUN)
    }

    /// Executes the first due and admissible job, if any.
    ///
    /// A job is due when its pattern matches `now` and it has not already run
    /// within the current matching window; it is admissible when `voltage`
    /// meets its floor. The job's `last_run` is updated before the action
    /// runs, and a failing action still counts as a run: progress is
    /// preferred over retry. Returns `true` when a job executed.
    pub fn poll<R: JobRunner>(
        &mut self,
        now: UnixSeconds,
        voltage: f32,
        runner: &mut R,
    ) -> bool {
        let time = TimeOfDay::from_unix(now);
        for (job, history) in self.table.iter().zip(self.histories.iter_mut()) {
            if !job.schedule.matches(time) {
                continue;
            }
            if history.last_run != NEVER_RUN && history.last_run >= job.schedule.window_start(now)
            {
                continue;
            }
            if voltage < job.minimum_voltage {
                // Due but inadmissible: skip silently. A persistently starved
                // supply misses this occurrence entirely; that trade-off is
                // part of the admission-control contract.
                continue;
            }
            history.last_run = now;
            let _ = runner.run(job, now);
            return true;
        }
        false
    }

    /// Earliest instant strictly after `after` at which any job becomes due,
    /// ignoring voltage. Drives the hardware wake alarm; `None` only for an
    /// empty table.
    #[must_use]
    pub fn next_due_time(&self, after: UnixSeconds) -> Option<UnixSeconds> {
        self.table
            .iter()
            .map(|job| job.schedule.next_match_after(after))
            .min()
    }

    /// Loads every job's history from the store, tolerating corruption.
    ///
    /// # Errors
    ///
    /// Propagates store failures, which are fatal at boot.
    pub fn restore<S: RecordStore>(&mut self, store: &mut S) -> Result<(), S::Error> {
        for (job, history) in self.table.iter().zip(self.histories.iter_mut()) {
            history.last_run = history::load(store, job.name)?;
        }
        Ok(())
    }

    /// Appends every job's current history to the store.
    ///
    /// Called at controlled checkpoints (shutdown), not after each run, to
    /// bound write amplification. A crash before the next checkpoint loses at
    /// most one run per job.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn persist<S: RecordStore>(&mut self, store: &mut S) -> Result<(), S::Error> {
        for (job, history) in self.table.iter().zip(self.histories.iter()) {
            history::save(store, job.name, history.last_run)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryRecordStore;
    use crate::jobs::{JobKind, NoopJobRunner};
    use crate::schedule::SchedulePattern;

    static TWO_JOBS: [JobSpec; 2] = [
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
    ];

    /// Runner that records which jobs it was asked to execute.
    struct RecordingRunner {
        ran: heapless::Vec<&'static str, 8>,
        fail: bool,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                ran: heapless::Vec::new(),
                fail: false,
            }
        }
    }

    impl JobRunner for RecordingRunner {
        type Error = ();

        fn run(&mut self, job: &JobSpec, _: UnixSeconds) -> Result<(), Self::Error> {
            self.ran.push(job.name).ok();
            if self.fail { Err(()) } else { Ok(()) }
        }
    }

    #[test]
    fn due_and_admissible_job_runs() {
        let mut scheduler: Scheduler = Scheduler::new(&TWO_JOBS).unwrap();
        let mut runner = RecordingRunner::new();

        assert!(scheduler.poll(10, 2.0, &mut runner));
        assert_eq!(runner.ran.as_slice(), ["temperature"]);
        assert_eq!(scheduler.last_run(0), Some(10));
    }

    #[test]
    fn undervolted_job_is_skipped_without_side_effects() {
        let mut scheduler: Scheduler = Scheduler::new(&TWO_JOBS).unwrap();
        let mut runner = RecordingRunner::new();

        assert!(!scheduler.poll(20, 1.5, &mut runner));
        assert!(runner.ran.is_empty());
        assert_eq!(scheduler.last_run(1), Some(NEVER_RUN));
    }

    #[test]
    fn poll_is_idempotent_within_the_matching_instant() {
        let mut scheduler: Scheduler = Scheduler::new(&TWO_JOBS).unwrap();
        let mut runner = RecordingRunner::new();

        assert!(scheduler.poll(10, 2.0, &mut runner));
        assert!(!scheduler.poll(10, 2.0, &mut runner));
        assert_eq!(runner.ran.len(), 1);
    }

    #[test]
    fn job_fires_again_on_next_occurrence() {
        let mut scheduler: Scheduler = Scheduler::new(&TWO_JOBS).unwrap();
        let mut runner = RecordingRunner::new();

        assert!(scheduler.poll(10, 2.0, &mut runner));
        assert!(scheduler.poll(70, 2.0, &mut runner));
        assert_eq!(runner.ran.as_slice(), ["temperature", "temperature"]);
        assert_eq!(scheduler.last_run(0), Some(70));
    }

    #[test]
    fn failed_action_still_counts_as_a_run() {
        let mut scheduler: Scheduler = Scheduler::new(&TWO_JOBS).unwrap();
        let mut runner = RecordingRunner::new();
        runner.fail = true;

        assert!(scheduler.poll(10, 2.0, &mut runner));
        assert_eq!(scheduler.last_run(0), Some(10));
        assert!(!scheduler.poll(10, 2.0, &mut runner));
    }

    #[test]
    fn one_job_per_poll() {
        // Both jobs share second 10 here, so both are due at once.
        static CLASHING: [JobSpec; 2] = [
            JobSpec::new(
                "first",
                0.0,
                SchedulePattern::at_second(10),
                JobKind::Temperature,
            ),
            JobSpec::new(
                "second",
                0.0,
                SchedulePattern::at_second(10),
                JobKind::Pressure,
            ),
        ];
        let mut scheduler: Scheduler = Scheduler::new(&CLASHING).unwrap();
        let mut runner = RecordingRunner::new();

        assert!(scheduler.poll(10, 2.0, &mut runner));
        assert_eq!(runner.ran.as_slice(), ["first"]);
        assert!(scheduler.poll(10, 2.0, &mut runner));
        assert_eq!(runner.ran.as_slice(), ["first", "second"]);
    }

    #[test]
    fn inadmissible_first_job_does_not_block_later_one() {
        static CLASHING: [JobSpec; 2] = [
            JobSpec::new(
                "thirsty",
                1.9,
                SchedulePattern::at_second(10),
                JobKind::Pressure,
            ),
            JobSpec::new(
                "frugal",
                1.0,
                SchedulePattern::at_second(10),
                JobKind::Temperature,
            ),
        ];
        let mut scheduler: Scheduler = Scheduler::new(&CLASHING).unwrap();
        let mut runner = RecordingRunner::new();

        assert!(scheduler.poll(10, 1.5, &mut runner));
        assert_eq!(runner.ran.as_slice(), ["frugal"]);
    }

    #[test]
    fn next_due_time_takes_table_minimum() {
        let scheduler: Scheduler = Scheduler::new(&TWO_JOBS).unwrap();
        assert_eq!(scheduler.next_due_time(0), Some(10));
        assert_eq!(scheduler.next_due_time(10), Some(20));
        assert_eq!(scheduler.next_due_time(20), Some(70));
        assert_eq!(scheduler.next_due_time(25), Some(70));
    }

    #[test]
    fn restore_and_persist_round_trip() {
        let mut store: MemoryRecordStore<4, 256> = MemoryRecordStore::new();
        let mut scheduler: Scheduler = Scheduler::new(&TWO_JOBS).unwrap();
        let mut runner = NoopJobRunner::new();

        assert!(scheduler.poll(3_610, 2.0, &mut runner));
        scheduler.persist(&mut store).unwrap();

        let mut rebooted: Scheduler = Scheduler::new(&TWO_JOBS).unwrap();
        rebooted.restore(&mut store).unwrap();
        assert_eq!(rebooted.last_run(0), Some(3_610));
        assert_eq!(rebooted.last_run(1), Some(NEVER_RUN));
    }

    #[test]
    fn capacity_overflow_reported() {
        let result: Result<Scheduler<1>, _> = Scheduler::new(&TWO_JOBS);
        assert_eq!(result.unwrap_err(), SchedulerError::TooManyJobs { count: 2 });
    }
}
