//! Hardware capability interface consumed by the scanning engine.
//!
//! The engine is written once against this trait; the firmware crate
//! implements it on real RP2040 pins and the hardware alarm, host tests
//! implement it with a scripted clock and contact matrix.

/// Electrical level driven onto a row output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    High,
    Low,
}

/// Platform services the engine needs.
///
/// Every method must complete in bounded time; several of them are called
/// from interrupt context.
pub trait MatrixBackend {
    /// Drive one row output. Rows idle high; a scan pulls one row low.
    fn set_row_level(&mut self, row: usize, level: Level);

    /// Read one column input. Returns `true` when the contact is closed.
    /// Implementations translate the pull-up/active-low electrical level.
    fn read_column(&mut self, col: usize) -> bool;

    /// Short delay (~1us) between driving a row and reading its columns.
    fn settle(&mut self);

    /// Monotonic millisecond counter. Allowed to wrap.
    fn now_ms(&mut self) -> u32;

    /// Monotonic microsecond counter, used for scan duration statistics.
    fn now_us(&mut self) -> u32;

    /// Schedule the next periodic scan tick and enable its interrupt.
    fn start_scan_timer(&mut self, interval_us: u32);

    /// Disable the periodic tick and cancel any pending one.
    fn stop_scan_timer(&mut self);

    /// Clear a pending scan tick without rescheduling.
    fn ack_scan_timer(&mut self);

    /// Enable a falling-edge interrupt on every column input.
    fn arm_wake_edges(&mut self);

    /// Disable the column edge interrupts and clear any pending flags.
    fn disarm_wake_edges(&mut self);
}
