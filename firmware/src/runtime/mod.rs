use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::flash::Flash;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use static_cell::StaticCell;

use harvester_core::engine::MAX_JOBS;
use harvester_core::jobs::{JOB_TABLE, SensorJobRunner};
use harvester_core::node::{AlarmRepeat, Node, NodeConfig};

use crate::hw::power::{AnalogInputs, PowerLatch, SupplyMonitor};
use crate::hw::rtc::Am1815;
use crate::hw::sensors::BoardSensors;
use crate::storage::{FlashRecordStore, HISTORY_REGIONS, LOG_REGIONS};

mod node_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

static SPI_BUS: StaticCell<RefCell<Spi<'static, Blocking>>> = StaticCell::new();
static FLASH: StaticCell<RefCell<Flash<'static, embassy_stm32::flash::Blocking>>> =
    StaticCell::new();
static ANALOG: StaticCell<RefCell<AnalogInputs<'static>>> = StaticCell::new();

pub(crate) type NodeRunner =
    SensorJobRunner<BoardSensors<'static, 'static>, FlashRecordStore<'static, 4>>;
pub(crate) type HarvesterNode = Node<
    Am1815<'static, 'static>,
    SupplyMonitor<'static, 'static>,
    FlashRecordStore<'static, 5>,
    NodeRunner,
    MAX_JOBS,
>;

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let p = hal::init(hal::Config::default());

    // Assert the regulator hold before anything else; releasing it later is
    // how the node powers itself down.
    let latch = PowerLatch::engage(Output::new(p.PC6, Level::High, Speed::Low));

    let mut spi_config = spi::Config::default();
    spi_config.frequency = Hertz(1_000_000);
    let bus = SPI_BUS.init(RefCell::new(Spi::new_blocking(
        p.SPI1, p.PA5, p.PA7, p.PA6, spi_config,
    )));
    let analog = ANALOG.init(RefCell::new(AnalogInputs::new(
        Adc::new(p.ADC1),
        p.PA0,
        p.PA1,
        p.PA4,
    )));
    let flash = FLASH.init(RefCell::new(Flash::new_blocking(p.FLASH)));

    let mut clock = Am1815::new(bus, Output::new(p.PB0, Level::High, Speed::Low));
    match clock.clear_oscillator_fault() {
        Ok(true) => defmt::warn!("rtc: oscillator stopped; wall time unreliable until reset"),
        Ok(false) => {}
        Err(err) => defmt::warn!("rtc: status read failed: {}", defmt::Debug2Format(&err)),
    }

    let sensors = BoardSensors::new(
        bus,
        analog,
        Output::new(p.PB1, Level::High, Speed::Low),
        Output::new(p.PA8, Level::High, Speed::Low),
    );
    let runner = SensorJobRunner::new(sensors, FlashRecordStore::new(flash, &LOG_REGIONS));
    let history = FlashRecordStore::new(flash, &HISTORY_REGIONS);

    let config = NodeConfig {
        reconcile_clock: true,
        alarm_repeat: AlarmRepeat::EveryMinute,
    };
    let node = match Node::<_, _, _, _, MAX_JOBS>::initialize(
        clock,
        SupplyMonitor::new(analog),
        history,
        runner,
        &JOB_TABLE,
        config,
    ) {
        Ok(node) => node,
        Err(err) => defmt::panic!("node init failed: {}", defmt::Debug2Format(&err)),
    };

    spawner
        .spawn(node_task::run(node, latch))
        .expect("failed to spawn node task");
}
