//! Per-cell debounce state machine.
//!
//! A cell is promoted to `Pressed` only after the raw contact has read
//! closed continuously for the press window, and demoted to `Idle` only
//! after it has read open continuously for the release window. Any raw
//! dropout inside a window re-arms the timer. `Held` is reached from
//! `Pressed` purely by dwell (the contact is still closed one full matrix
//! cycle later) and exists for the stuck-key detector to observe.
//!
//! Press confirmation is two-phase: [`Cell::poll`] reports
//! [`Poll::PressReady`] without committing, so the caller can veto the
//! transition (ghost detection) before any event exists. Release commits
//! directly.

/// Resting state of one matrix cell. `Released` is an emitted event, not a
/// state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CellState {
    Idle,
    Pressed,
    Held,
}

/// Outcome of feeding one raw sample to a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Poll {
    /// No logical transition this step.
    None,
    /// Press window satisfied; caller must commit or reject.
    PressReady,
    /// Release window satisfied, cell is back to `Idle`.
    Released,
}

#[derive(Clone, Copy)]
pub(crate) struct Cell {
    state: CellState,
    /// Timestamp of the most recent committed state change.
    last_transition_ms: u32,
    /// Start of the debounce window currently being waited out, if any.
    pending_since: Option<u32>,
}

impl Cell {
    pub(crate) const fn new() -> Self {
        Self { state: CellState::Idle, last_transition_ms: 0, pending_since: None }
    }

    pub(crate) fn state(&self) -> CellState {
        self.state
    }

    pub(crate) fn last_transition_ms(&self) -> u32 {
        self.last_transition_ms
    }

    /// Feed one raw contact sample taken at `now_ms`.
    pub(crate) fn poll(
        &mut self,
        pressed: bool,
        now_ms: u32,
        press_window_ms: u32,
        release_window_ms: u32,
    ) -> Poll {
        match (self.state, pressed) {
            (CellState::Idle, true) => match self.pending_since {
                None => {
                    self.pending_since = Some(now_ms);
                    Poll::None
                },
                Some(since) if now_ms.wrapping_sub(since) >= press_window_ms => Poll::PressReady,
                Some(_) => Poll::None,
            },
            (CellState::Idle, false) => {
                // Bounce cleared before the window elapsed; re-arm.
                self.pending_since = None;
                Poll::None
            },
            (CellState::Pressed, true) => {
                // Still closed one full cycle after the press: dwell to Held.
                self.state = CellState::Held;
                self.last_transition_ms = now_ms;
                self.pending_since = None;
                Poll::None
            },
            (CellState::Held, true) => {
                self.pending_since = None;
                Poll::None
            },
            (CellState::Pressed | CellState::Held, false) => match self.pending_since {
                None => {
                    self.pending_since = Some(now_ms);
                    Poll::None
                },
                Some(since) if now_ms.wrapping_sub(since) >= release_window_ms => {
                    self.state = CellState::Idle;
                    self.last_transition_ms = now_ms;
                    self.pending_since = None;
                    Poll::Released
                },
                Some(_) => Poll::None,
            },
        }
    }

    /// Complete a `PressReady` transition.
    pub(crate) fn commit_press(&mut self, now_ms: u32) {
        self.state = CellState::Pressed;
        self.last_transition_ms = now_ms;
        self.pending_since = None;
    }

    /// Veto a `PressReady` transition. The cell stays `Idle` and the press
    /// window re-arms on the next closed sample.
    pub(crate) fn reject_press(&mut self) {
        self.pending_since = None;
    }
}
