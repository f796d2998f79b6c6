//! RP2040 implementation of the engine's hardware interface.
//!
//! Owns the matrix GPIO, the microsecond timer and alarm 0. The alarm is
//! the periodic scan tick; falling edges on the column inputs are the
//! low-power wake source.

use cortex_m::asm;
use embedded_hal::digital::{InputPin, OutputPin};
use fugit::MicrosDurationU32;
use keypad_matrix::{
    backend::{Level, MatrixBackend},
    MATRIX_COLS, MATRIX_ROWS,
};
use rp2040_hal::{
    gpio::{DynPinId, FunctionSioInput, FunctionSioOutput, Interrupt, Pin, PullDown, PullUp},
    timer::{Alarm, Alarm0},
    Timer,
};

pub type RowPin = Pin<DynPinId, FunctionSioOutput, PullDown>;
pub type ColPin = Pin<DynPinId, FunctionSioInput, PullUp>;

pub struct MatrixPins {
    rows: [RowPin; MATRIX_ROWS],
    cols: [ColPin; MATRIX_COLS],
    timer: Timer,
    alarm: Alarm0,
}

impl MatrixPins {
    pub fn new(
        rows: [RowPin; MATRIX_ROWS],
        cols: [ColPin; MATRIX_COLS],
        timer: Timer,
        alarm: Alarm0,
    ) -> Self {
        Self { rows, cols, timer, alarm }
    }
}

impl MatrixBackend for MatrixPins {
    fn set_row_level(&mut self, row: usize, level: Level) {
        match level {
            Level::High => self.rows[row].set_high().unwrap(),
            Level::Low => self.rows[row].set_low().unwrap(),
        }
    }

    fn read_column(&mut self, col: usize) -> bool {
        // Pull-up inputs: a closed contact pulls the column low.
        self.cols[col].is_low().unwrap()
    }

    fn settle(&mut self) {
        // ~1us at 125MHz system clock.
        asm::delay(125);
    }

    fn now_ms(&mut self) -> u32 {
        (self.timer.get_counter().ticks() / 1_000) as u32
    }

    fn now_us(&mut self) -> u32 {
        self.timer.get_counter().ticks() as u32
    }

    fn start_scan_timer(&mut self, interval_us: u32) {
        self.alarm.schedule(MicrosDurationU32::micros(interval_us)).unwrap();
        self.alarm.enable_interrupt();
    }

    fn stop_scan_timer(&mut self) {
        self.alarm.disable_interrupt();
        self.alarm.cancel().ok();
    }

    fn ack_scan_timer(&mut self) {
        self.alarm.clear_interrupt();
    }

    fn arm_wake_edges(&mut self) {
        for col in self.cols.iter_mut() {
            col.set_interrupt_enabled(Interrupt::EdgeLow, true);
        }
    }

    fn disarm_wake_edges(&mut self) {
        for col in self.cols.iter_mut() {
            col.set_interrupt_enabled(Interrupt::EdgeLow, false);
            col.clear_interrupt(Interrupt::EdgeLow);
        }
    }
}
