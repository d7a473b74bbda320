use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    defmt::error!("panic: {}", defmt::Display2Format(info));
    // Leave the regulator latch alone so the fault survives to the probe.
    cortex_m::asm::udf();
}
