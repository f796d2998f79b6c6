//! Interrupt-driven scanning engine for a 4x4 mechanical key matrix.
//!
//! The engine turns raw contact levels into debounced, timestamped key
//! events, flags ghost and stuck keys, and bridges interrupt-time scanning
//! to a normal-priority consumer through fixed-capacity queues. All hardware
//! access goes through the [`backend::MatrixBackend`] trait, so the same
//! engine runs against real GPIO in firmware and a mock in host tests.

#![cfg_attr(not(test), no_std)]

pub mod backend;
mod debounce;
pub mod engine;
pub mod key_event;
pub mod key_mapping;
mod queue;
pub mod stats;

pub use engine::{EngineState, MatrixEngine, ScanConfig};
pub use key_event::{ErrorEvent, ErrorKind, KeyEvent, KeyTransition};
pub use key_mapping::Keymap;
pub use stats::ScanStatistics;

/// Matrix geometry. The driver targets a single physical 4x4 keypad.
pub const MATRIX_ROWS: usize = 4;
pub const MATRIX_COLS: usize = 4;

/// Queue sizing, matching the reference driver.
pub const EVENT_QUEUE_CAPACITY: usize = 32;
pub const ERROR_QUEUE_CAPACITY: usize = 8;
