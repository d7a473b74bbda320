//! Run loop tying the scheduler engine to the hardware seams.
//!
//! One owned [`Node`] is constructed at startup and threaded explicitly
//! through the whole cycle; there is no ambient global state. The loop runs
//! single-threaded with no preemption: sample the supply, read the clock,
//! poll the engine, and once nothing is due, arm the hardware wake alarm and
//! hand control back to the power-management layer, which cuts power until
//! the alarm fires and the process restarts from initialization.

use crate::engine::{MAX_JOBS, Scheduler, SchedulerError};
use crate::history::RecordStore;
use crate::jobs::{JobRunner, JobSpec};
use crate::schedule::{NEVER_RUN, UnixSeconds};

/// Hardware repeat mode for the wake alarm.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum AlarmRepeat {
    /// One-shot alarm.
    None,
    /// Re-fires every minute; a missed wake costs at most a minute.
    #[default]
    EveryMinute,
    EveryHour,
    EveryDay,
}

/// Wall-clock and wake-alarm access (the external RTC).
pub trait WallClock {
    type Error;

    /// Current wall-clock time.
    ///
    /// # Errors
    ///
    /// RTC access failures; fatal for the run loop.
    fn now(&mut self) -> Result<UnixSeconds, Self::Error>;

    /// Rewrites the wall clock.
    ///
    /// # Errors
    ///
    /// RTC access failures; fatal for the run loop.
    fn set(&mut self, now: UnixSeconds) -> Result<(), Self::Error>;

    /// Arms the hardware wake alarm for `at`.
    ///
    /// # Errors
    ///
    /// RTC access failures; fatal for the run loop.
    fn program_alarm(&mut self, at: UnixSeconds, repeat: AlarmRepeat) -> Result<(), Self::Error>;
}

/// Instantaneous supply-voltage measurement (the external ADC).
pub trait VoltageSensor {
    type Error;

    /// Measured supply voltage in volts. May busy-wait for the conversion.
    ///
    /// # Errors
    ///
    /// ADC failures; fatal for the run loop.
    fn sample(&mut self) -> Result<f32, Self::Error>;
}

/// Run loop configuration, threaded in at initialization.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeConfig {
    /// Debug accommodation: when the RTC has regressed behind the newest
    /// persisted `last_run` (clock drift across bench sessions), advance the
    /// clock to that timestamp and write it back. Off in production.
    pub reconcile_clock: bool,
    /// Repeat mode used when arming the wake alarm.
    pub alarm_repeat: AlarmRepeat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            reconcile_clock: false,
            alarm_repeat: AlarmRepeat::EveryMinute,
        }
    }
}

/// Fatal run-loop failure. Any of these means the device should reset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeError<C, V, S> {
    /// The job table failed validation.
    Scheduler(SchedulerError),
    Clock(C),
    Voltage(V),
    Store(S),
}

/// What the run loop decided before yielding to power-down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SleepPlan {
    /// Alarm timestamp that was armed, or `None` for an empty job table.
    pub wake_at: Option<UnixSeconds>,
    /// Number of jobs executed before going idle.
    pub jobs_run: u32,
}

/// Owned context for one power cycle: peripherals in, scheduling out.
pub struct Node<C, V, S, R, const CAPACITY: usize = MAX_JOBS> {
    clock: C,
    voltage: V,
    store: S,
    runner: R,
    scheduler: Scheduler<CAPACITY>,
    config: NodeConfig,
}

impl<C, V, S, R, const CAPACITY: usize> Node<C, V, S, R, CAPACITY>
where
    C: WallClock,
    V: VoltageSensor,
    S: RecordStore,
    R: JobRunner,
{
    /// Builds the node and restores every job history from the store.
    ///
    /// # Errors
    ///
    /// Table validation and store failures; both are boot-fatal.
    pub fn initialize(
        clock: C,
        voltage: V,
        mut store: S,
        runner: R,
        table: &'static [JobSpec],
        config: NodeConfig,
    ) -> Result<Self, NodeError<C::Error, V::Error, S::Error>> {
        let mut scheduler = Scheduler::new(table).map_err(NodeError::Scheduler)?;
        scheduler.restore(&mut store).map_err(NodeError::Store)?;
        Ok(Self {
            clock,
            voltage,
            store,
            runner,
            scheduler,
            config,
        })
    }

    /// Read-only view of the scheduler state.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler<CAPACITY> {
        &self.scheduler
    }

    /// Drains every currently-due job, then arms the wake alarm.
    ///
    /// Voltage is re-sampled before every poll so admission decisions track
    /// the supply as jobs drain it. Always terminates: each poll either runs
    /// a job (bounded by the table and the matching windows) or ends the
    /// loop.
    ///
    /// # Errors
    ///
    /// Clock, ADC, or store failures; fatal.
    pub fn run_until_sleep(
        &mut self,
    ) -> Result<SleepPlan, NodeError<C::Error, V::Error, S::Error>> {
        let mut jobs_run = 0u32;
        loop {
            let voltage = self.voltage.sample().map_err(NodeError::Voltage)?;
            let mut now = self.clock.now().map_err(NodeError::Clock)?;

            if self.config.reconcile_clock {
                let newest = self.scheduler.latest_last_run();
                if newest != NEVER_RUN && newest > now {
                    self.clock.set(newest).map_err(NodeError::Clock)?;
                    now = self.clock.now().map_err(NodeError::Clock)?;
                }
            }

            if self.scheduler.poll(now, voltage, &mut self.runner) {
                jobs_run = jobs_run.saturating_add(1);
                continue;
            }

            // Nothing due. The poll above may have taken real time, so read
            // the clock again before computing the wake instant.
            let now = self.clock.now().map_err(NodeError::Clock)?;
            let wake_at = self.scheduler.next_due_time(now);
            if let Some(at) = wake_at {
                self.clock
                    .program_alarm(at, self.config.alarm_repeat)
                    .map_err(NodeError::Clock)?;
            }
            return Ok(SleepPlan { wake_at, jobs_run });
        }
    }

    /// Flushes every job history to the store and releases the peripherals.
    ///
    /// This is the only persistence checkpoint: the power-management layer
    /// must call it before cutting power. An abrupt power loss beforehand
    /// re-runs at most the last unsaved occurrence of each job, which is the
    /// documented trade-off of deferring writes.
    ///
    /// # Errors
    ///
    /// Store failures; the histories stay unflushed.
    pub fn shutdown(mut self) -> Result<(C, V, S, R), NodeError<C::Error, V::Error, S::Error>> {
        self.scheduler
            .persist(&mut self.store)
            .map_err(NodeError::Store)?;
        Ok((self.clock, self.voltage, self.store, self.runner))
    }
}
