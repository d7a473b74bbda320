use embassy_time::Timer;

use crate::hw::power::PowerLatch;
use crate::runtime::HarvesterNode;

/// One complete power cycle: drain due jobs, checkpoint, arm the alarm, and
/// drop the regulator latch.
#[embassy_executor::task]
pub async fn run(mut node: HarvesterNode, mut latch: PowerLatch<'static>) -> ! {
    match node.run_until_sleep() {
        Ok(plan) => defmt::info!(
            "cycle complete: ran {} job(s), wake at {}",
            plan.jobs_run,
            plan.wake_at.unwrap_or(0)
        ),
        Err(err) => defmt::warn!("run loop failed: {}", defmt::Debug2Format(&err)),
    }

    if let Err(err) = node.shutdown() {
        defmt::warn!("checkpoint failed: {}", defmt::Debug2Format(&err));
    }

    latch.release();

    // On battery the rail is already collapsing. Under a bench supply we
    // stay alive, so idle until the RTC alarm resets the board.
    loop {
        Timer::after_secs(60).await;
    }
}
