//! Event values produced by the scanner and consumed by the application.

/// Debounced key transition kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyTransition {
    Pressed,
    Released,
}

/// One debounced key transition. Produced at most once per cell per
/// transition, consumed exactly once by the drain that returns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyEvent {
    /// Key code looked up in the active keymap.
    pub key: u8,
    pub transition: KeyTransition,
    pub row: u8,
    pub col: u8,
    pub timestamp_ms: u32,
}

/// Matrix anomaly class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// A cell stayed pressed/held past the configured timeout.
    StuckKey,
    /// A press confirmation was ambiguous (>=2 pressed keys in both its
    /// row and its column) and was suppressed.
    GhostKey,
}

/// One detected anomaly. Same producer/consumer contract as [`KeyEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub row: u8,
    pub col: u8,
    pub timestamp_ms: u32,
}
