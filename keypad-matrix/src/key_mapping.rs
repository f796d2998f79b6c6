//! Row/column to key code mapping.

use crate::{MATRIX_COLS, MATRIX_ROWS};

/// 4x4 mapping from (row, column) to an application-defined key code.
/// Replaced as a whole with [`crate::MatrixEngine::set_keymap`], never
/// partially mutated; read-only during scanning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Keymap([[u8; MATRIX_COLS]; MATRIX_ROWS]);

impl Keymap {
    /// Standard hex keypad layout.
    #[rustfmt::skip]
    pub const HEX: Keymap = Keymap([
        [0x1, 0x2, 0x3, 0xA],
        [0x4, 0x5, 0x6, 0xB],
        [0x7, 0x8, 0x9, 0xC],
        [0x0, 0xF, 0xE, 0xD],
    ]);

    pub const fn new(codes: [[u8; MATRIX_COLS]; MATRIX_ROWS]) -> Self {
        Self(codes)
    }

    pub fn code(&self, row: usize, col: usize) -> u8 {
        self.0[row][col]
    }
}

impl Default for Keymap {
    fn default() -> Self {
        Self::HEX
    }
}
