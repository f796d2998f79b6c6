// 4x4 matrix keypad firmware for the RP2040.
//
// A hardware alarm drives the scan engine at 1kHz from interrupt context;
// the main loop drains the event and error queues at its own pace, logs a
// statistics block once a minute and drops into low power after 30 seconds
// without key activity. A falling edge on any column wakes scanning back up.

#![no_main]
#![no_std]

use cortex_m::asm;
use defmt::{info, warn};
use defmt_rtt as _;
use embedded_hal::digital::PinState;
use keypad_matrix::{EngineState, ErrorKind, KeyTransition, MatrixEngine, ScanConfig};
use panic_probe as _;
use rp2040_hal::{pac, pac::interrupt, Timer, Watchdog};

use crate::matrix_pins::MatrixPins;

mod matrix_pins;

/// The linker will place this boot block at the start of our program image. We
/// need this to help the ROM bootloader get our code up and running.
#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

const EXTERNAL_CRYSTAL_FREQUENCY_HZ: u32 = 12_000_000;

const STATS_INTERVAL_MS: u32 = 60_000;
const IDLE_BEFORE_LOW_POWER_MS: u32 = 30_000;

/// Shared with the timer and GPIO interrupt handlers.
static ENGINE: MatrixEngine<MatrixPins> = MatrixEngine::new();

#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}

#[cortex_m_rt::entry]
fn main() -> ! {
    info!("Start of main()");
    let mut pac = pac::Peripherals::take().unwrap();

    let mut watchdog = Watchdog::new(pac.WATCHDOG);

    let clocks = rp2040_hal::clocks::init_clocks_and_plls(
        EXTERNAL_CRYSTAL_FREQUENCY_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();

    // Get the GPIO peripherals.
    let sio = rp2040_hal::Sio::new(pac.SIO);

    let pins =
        rp2040_hal::gpio::Pins::new(pac.IO_BANK0, pac.PADS_BANK0, sio.gpio_bank0, &mut pac.RESETS);

    // Rows idle high; a scan step pulls one row low at a time.
    let rows = [
        pins.gpio2.into_push_pull_output_in_state(PinState::High).into_dyn_pin(),
        pins.gpio3.into_push_pull_output_in_state(PinState::High).into_dyn_pin(),
        pins.gpio4.into_push_pull_output_in_state(PinState::High).into_dyn_pin(),
        pins.gpio5.into_push_pull_output_in_state(PinState::High).into_dyn_pin(),
    ];

    // Columns idle high through their pull-ups; a closed contact reads low.
    let cols = [
        pins.gpio6.into_pull_up_input().into_dyn_pin(),
        pins.gpio7.into_pull_up_input().into_dyn_pin(),
        pins.gpio8.into_pull_up_input().into_dyn_pin(),
        pins.gpio9.into_pull_up_input().into_dyn_pin(),
    ];

    let mut timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    let alarm = timer.alarm_0().unwrap();

    ENGINE.init(MatrixPins::new(rows, cols, timer, alarm), ScanConfig::default());
    ENGINE.start();

    unsafe {
        pac::NVIC::unmask(pac::Interrupt::TIMER_IRQ_0);
        pac::NVIC::unmask(pac::Interrupt::IO_IRQ_BANK0);
    }

    info!("Scanning started (1kHz, one row per tick)");

    let now_ms = |timer: &Timer| (timer.get_counter().ticks() / 1_000) as u32;
    let mut last_stats_ms = 0u32;
    let mut last_activity_ms = 0u32;

    loop {
        while let Some(event) = ENGINE.drain_event() {
            last_activity_ms = event.timestamp_ms;
            match event.transition {
                KeyTransition::Pressed => info!(
                    "[{} ms] key {=u8:x} pressed (row={} col={})",
                    event.timestamp_ms, event.key, event.row, event.col
                ),
                KeyTransition::Released => {
                    info!("[{} ms] key {=u8:x} released", event.timestamp_ms, event.key)
                },
            }
        }

        while let Some(error) = ENGINE.drain_error() {
            last_activity_ms = error.timestamp_ms;
            match error.kind {
                ErrorKind::StuckKey => warn!(
                    "[{} ms] stuck key at row={} col={}",
                    error.timestamp_ms, error.row, error.col
                ),
                ErrorKind::GhostKey => warn!(
                    "[{} ms] ghost key suppressed at row={} col={}",
                    error.timestamp_ms, error.row, error.col
                ),
            }
        }

        let now = now_ms(&timer);

        if now.wrapping_sub(last_stats_ms) > STATS_INTERVAL_MS {
            let stats = ENGINE.statistics();
            info!(
                "stats: scans={} events={} errors={} overflows={} max={}us avg={}us",
                stats.total_scans,
                stats.total_events,
                stats.total_errors,
                stats.queue_overflows,
                stats.max_scan_time_us,
                stats.avg_scan_time_us,
            );
            last_stats_ms = now;
        }

        if now.wrapping_sub(last_activity_ms) > IDLE_BEFORE_LOW_POWER_MS
            && !ENGINE.any_key_pressed()
        {
            info!("idle, entering low power (wake on keypress)");
            ENGINE.enter_low_power();

            // The column edge interrupt flips the engine back to Active.
            while ENGINE.state() == EngineState::LowPower {
                asm::wfi();
            }

            info!("woke from keypress");
            last_activity_ms = now_ms(&timer);
        }
    }
}

#[interrupt]
fn TIMER_IRQ_0() {
    ENGINE.scan_step();
}

#[interrupt]
fn IO_IRQ_BANK0() {
    ENGINE.wake_edge();
}
