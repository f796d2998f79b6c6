//! The scanning engine: scheduler, anomaly detectors, queues and power
//! state machine behind a single synchronization boundary.
//!
//! Two execution contexts touch the engine. The periodic timer interrupt
//! calls [`MatrixEngine::scan_step`] and the column edge interrupt calls
//! [`MatrixEngine::wake_edge`]; everything else runs at normal priority.
//! All shared state lives in one `critical_section::Mutex`, every operation
//! holds it for a bounded amount of work and nothing ever blocks on the
//! other side. Reads hand out copies, never references.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::{
    backend::{Level, MatrixBackend},
    debounce::{Cell, CellState, Poll},
    key_event::{ErrorEvent, ErrorKind, KeyEvent, KeyTransition},
    key_mapping::Keymap,
    queue::EventQueue,
    stats::ScanStatistics,
    ERROR_QUEUE_CAPACITY, EVENT_QUEUE_CAPACITY, MATRIX_COLS, MATRIX_ROWS,
};

/// Handler invoked synchronously at scan time instead of enqueueing.
/// Runs in interrupt context with scanning paused: keep it short and never
/// block in it.
pub type KeyEventCallback = fn(KeyEvent);
pub type ErrorEventCallback = fn(ErrorEvent);

/// Engine timing configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanConfig {
    /// Continuous-closed time required to confirm a press.
    pub debounce_press_ms: u32,
    /// Continuous-open time required to confirm a release.
    pub debounce_release_ms: u32,
    /// Held dwell after which a cell is reported as stuck.
    pub stuck_timeout_ms: u32,
    /// Period of the scan tick. One tick scans one row, so four ticks
    /// cover the matrix once.
    pub scan_interval_us: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            debounce_press_ms: 20,
            debounce_release_ms: 50,
            stuck_timeout_ms: 5_000,
            scan_interval_us: 1_000,
        }
    }
}

/// Engine lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineState {
    Stopped,
    /// Periodic scan tick running.
    Active,
    /// Scan tick stopped, column edge interrupts armed as the wake source.
    LowPower,
}

struct Shared<B> {
    backend: B,
    config: ScanConfig,
    keymap: Keymap,
    state: EngineState,
    /// Row scanned by the next step, round-robin mod 4.
    current_row: usize,
    cells: [[Cell; MATRIX_COLS]; MATRIX_ROWS],
    events: EventQueue<KeyEvent, EVENT_QUEUE_CAPACITY>,
    errors: EventQueue<ErrorEvent, ERROR_QUEUE_CAPACITY>,
    key_callback: Option<KeyEventCallback>,
    error_callback: Option<ErrorEventCallback>,
    ghost_detection: bool,
    stuck_detection: bool,
    stats: ScanStatistics,
}

/// The scanning engine. `const`-constructible so it can live in a `static`
/// shared with interrupt handlers; [`MatrixEngine::init`] supplies the
/// hardware backend at startup. Every operation before `init` is a no-op
/// that returns an empty default.
pub struct MatrixEngine<B> {
    shared: Mutex<RefCell<Option<Shared<B>>>>,
}

impl<B: MatrixBackend> MatrixEngine<B> {
    pub const fn new() -> Self {
        Self { shared: Mutex::new(RefCell::new(None)) }
    }

    /// Take ownership of the hardware backend. The engine starts `Stopped`
    /// with the default keymap, both detectors enabled and the row cursor
    /// at row 0.
    pub fn init(&self, backend: B, config: ScanConfig) {
        critical_section::with(|cs| {
            *self.shared.borrow_ref_mut(cs) = Some(Shared {
                backend,
                config,
                keymap: Keymap::default(),
                state: EngineState::Stopped,
                current_row: 0,
                cells: [[Cell::new(); MATRIX_COLS]; MATRIX_ROWS],
                events: EventQueue::new(),
                errors: EventQueue::new(),
                key_callback: None,
                error_callback: None,
                ghost_detection: true,
                stuck_detection: true,
                stats: ScanStatistics::default(),
            });
        });
    }

    fn with<R>(&self, default: R, f: impl FnOnce(&mut Shared<B>) -> R) -> R {
        critical_section::with(|cs| match &mut *self.shared.borrow_ref_mut(cs) {
            Some(shared) => f(shared),
            None => default,
        })
    }

    /// Replace the keymap as a whole.
    pub fn set_keymap(&self, keymap: Keymap) {
        self.with((), |s| s.keymap = keymap);
    }

    /// Start periodic scanning. No-op unless `Stopped`.
    pub fn start(&self) {
        self.with((), |s| {
            if s.state == EngineState::Stopped {
                let interval = s.config.scan_interval_us;
                s.backend.start_scan_timer(interval);
                s.state = EngineState::Active;
            }
        });
    }

    /// Stop scanning from any state. Safe to call mid-scan; it only
    /// prevents the next tick, never preempts one already executing.
    pub fn stop(&self) {
        self.with((), |s| {
            match s.state {
                EngineState::Active => s.backend.stop_scan_timer(),
                EngineState::LowPower => s.backend.disarm_wake_edges(),
                EngineState::Stopped => return,
            }
            s.state = EngineState::Stopped;
        });
    }

    /// Stop the scan tick and arm the column edge interrupts as a wake
    /// source. No-op unless `Active`.
    pub fn enter_low_power(&self) {
        self.with((), |s| {
            if s.state == EngineState::Active {
                s.backend.stop_scan_timer();
                s.backend.arm_wake_edges();
                s.state = EngineState::LowPower;
            }
        });
    }

    /// Explicitly leave low power without waiting for a key edge.
    pub fn exit_low_power(&self) {
        self.with((), Shared::wake);
    }

    /// Entry point for the column edge interrupt. Disarms the wake source
    /// and resumes periodic scanning.
    pub fn wake_edge(&self) {
        self.with((), Shared::wake);
    }

    /// Entry point for the periodic timer interrupt: scan one row.
    pub fn scan_step(&self) {
        self.with((), |s| {
            s.backend.ack_scan_timer();
            if s.state != EngineState::Active {
                // A stale tick after stop is cleared but not rescheduled.
                return;
            }
            let interval = s.config.scan_interval_us;
            s.backend.start_scan_timer(interval);

            let scan_start_us = s.backend.now_us();
            s.stats.begin_scan();

            let row = s.current_row;
            for r in 0..MATRIX_ROWS {
                s.backend.set_row_level(r, Level::High);
            }
            s.backend.set_row_level(row, Level::Low);
            s.backend.settle();

            let now = s.backend.now_ms();
            for col in 0..MATRIX_COLS {
                let pressed = s.backend.read_column(col);
                s.poll_cell(row, col, pressed, now);
            }

            s.backend.set_row_level(row, Level::High);
            s.current_row = (row + 1) % MATRIX_ROWS;

            let duration = s.backend.now_us().wrapping_sub(scan_start_us);
            s.stats.end_scan(duration);
        });
    }

    /// Register (or clear) a key event handler. While registered, the
    /// event queue is bypassed entirely for key events.
    pub fn set_key_callback(&self, callback: Option<KeyEventCallback>) {
        self.with((), |s| s.key_callback = callback);
    }

    /// Register (or clear) an error handler. Same contract as
    /// [`MatrixEngine::set_key_callback`].
    pub fn set_error_callback(&self, callback: Option<ErrorEventCallback>) {
        self.with((), |s| s.error_callback = callback);
    }

    /// Return the oldest unread key event, or `None`. Never blocks.
    pub fn drain_event(&self) -> Option<KeyEvent> {
        self.with(None, |s| s.events.pop())
    }

    /// Return the oldest unread error event, or `None`. Never blocks.
    pub fn drain_error(&self) -> Option<ErrorEvent> {
        self.with(None, |s| s.errors.pop())
    }

    /// True if any cell is logically pressed or held.
    pub fn any_key_pressed(&self) -> bool {
        self.with(false, |s| {
            s.cells.iter().flatten().any(|cell| cell.state() != CellState::Idle)
        })
    }

    pub fn pending_event_count(&self) -> usize {
        self.with(0, |s| s.events.len())
    }

    pub fn clear_events(&self) {
        self.with((), |s| s.events.clear());
    }

    pub fn set_ghost_detection(&self, enabled: bool) {
        self.with((), |s| s.ghost_detection = enabled);
    }

    pub fn set_stuck_detection(&self, enabled: bool, timeout_ms: u32) {
        self.with((), |s| {
            s.stuck_detection = enabled;
            s.config.stuck_timeout_ms = timeout_ms;
        });
    }

    /// Copy out the current statistics.
    pub fn statistics(&self) -> ScanStatistics {
        self.with(ScanStatistics::default(), |s| s.stats)
    }

    pub fn reset_statistics(&self) {
        self.with((), |s| s.stats.reset());
    }

    pub fn state(&self) -> EngineState {
        self.with(EngineState::Stopped, |s| s.state)
    }
}

impl<B: MatrixBackend> Shared<B> {
    fn wake(&mut self) {
        self.backend.disarm_wake_edges();
        if self.state == EngineState::LowPower {
            let interval = self.config.scan_interval_us;
            self.backend.start_scan_timer(interval);
            self.state = EngineState::Active;
        }
    }

    fn poll_cell(&mut self, row: usize, col: usize, pressed: bool, now: u32) {
        let press_ms = self.config.debounce_press_ms;
        let release_ms = self.config.debounce_release_ms;

        match self.cells[row][col].poll(pressed, now, press_ms, release_ms) {
            Poll::None => {
                if pressed
                    && self.stuck_detection
                    && self.cells[row][col].state() == CellState::Held
                {
                    let held_for = now.wrapping_sub(self.cells[row][col].last_transition_ms());
                    if held_for > self.config.stuck_timeout_ms {
                        // Re-emitted every step while the condition lasts;
                        // consumers see a stream, not a single edge.
                        self.emit_error(ErrorKind::StuckKey, row, col, now);
                    }
                }
            },
            Poll::PressReady => {
                if self.ghost_detection && self.is_ghost(row, col) {
                    self.cells[row][col].reject_press();
                    self.emit_error(ErrorKind::GhostKey, row, col, now);
                } else {
                    self.cells[row][col].commit_press(now);
                    self.emit_key(KeyTransition::Pressed, row, col, now);
                }
            },
            Poll::Released => self.emit_key(KeyTransition::Released, row, col, now),
        }
    }

    /// With three real presses forming an "L", the fourth intersection of
    /// a diodeless matrix reads closed. A press confirmation that has two
    /// pressed companions in both its row and its column is ambiguous, so
    /// it is reported instead of committed.
    fn is_ghost(&self, row: usize, col: usize) -> bool {
        let pressed_in_row = self.cells[row]
            .iter()
            .filter(|cell| cell.state() != CellState::Idle)
            .count();
        let pressed_in_col = self
            .cells
            .iter()
            .filter(|cells| cells[col].state() != CellState::Idle)
            .count();

        pressed_in_row >= 2 && pressed_in_col >= 2
    }

    fn emit_key(&mut self, transition: KeyTransition, row: usize, col: usize, now: u32) {
        let event = KeyEvent {
            key: self.keymap.code(row, col),
            transition,
            row: row as u8,
            col: col as u8,
            timestamp_ms: now,
        };

        self.stats.note_event();
        match self.key_callback {
            Some(callback) => callback(event),
            None => {
                if !self.events.push(event) {
                    self.stats.note_overflow();
                }
            },
        }
    }

    fn emit_error(&mut self, kind: ErrorKind, row: usize, col: usize, now: u32) {
        let error = ErrorEvent { kind, row: row as u8, col: col as u8, timestamp_ms: now };

        self.stats.note_error();
        match self.error_callback {
            Some(callback) => callback(error),
            None => {
                if !self.errors.push(error) {
                    self.stats.note_overflow();
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc, sync::Mutex, vec::Vec};

    use super::{EngineState, MatrixEngine, ScanConfig};
    use crate::{
        backend::{Level, MatrixBackend},
        key_event::{ErrorKind, KeyEvent, KeyTransition},
        MATRIX_COLS, MATRIX_ROWS,
    };

    #[derive(Default)]
    struct MockState {
        now_ms: u32,
        contacts: [[bool; MATRIX_COLS]; MATRIX_ROWS],
        driven_row: Option<usize>,
        timer_running: bool,
        wake_armed: bool,
        us_calls: u32,
    }

    struct MockBackend(Rc<RefCell<MockState>>);

    impl MatrixBackend for MockBackend {
        fn set_row_level(&mut self, row: usize, level: Level) {
            let mut mock = self.0.borrow_mut();
            match level {
                Level::Low => mock.driven_row = Some(row),
                Level::High => {
                    if mock.driven_row == Some(row) {
                        mock.driven_row = None;
                    }
                },
            }
        }

        fn read_column(&mut self, col: usize) -> bool {
            let mock = self.0.borrow();
            match mock.driven_row {
                Some(row) => mock.contacts[row][col],
                None => false,
            }
        }

        fn settle(&mut self) {}

        fn now_ms(&mut self) -> u32 {
            self.0.borrow().now_ms
        }

        fn now_us(&mut self) -> u32 {
            // Advances 25us per call, so every scan appears to take 25us.
            let mut mock = self.0.borrow_mut();
            mock.us_calls += 1;
            mock.now_ms.wrapping_mul(1_000).wrapping_add(mock.us_calls * 25)
        }

        fn start_scan_timer(&mut self, _interval_us: u32) {
            self.0.borrow_mut().timer_running = true;
        }

        fn stop_scan_timer(&mut self) {
            self.0.borrow_mut().timer_running = false;
        }

        fn ack_scan_timer(&mut self) {}

        fn arm_wake_edges(&mut self) {
            self.0.borrow_mut().wake_armed = true;
        }

        fn disarm_wake_edges(&mut self) {
            self.0.borrow_mut().wake_armed = false;
        }
    }

    fn engine_fixture() -> (MatrixEngine<MockBackend>, Rc<RefCell<MockState>>) {
        let state = Rc::new(RefCell::new(MockState::default()));
        let engine = MatrixEngine::new();
        engine.init(MockBackend(Rc::clone(&state)), ScanConfig::default());
        engine.start();
        (engine, state)
    }

    fn set_contact(state: &Rc<RefCell<MockState>>, row: usize, col: usize, closed: bool) {
        state.borrow_mut().contacts[row][col] = closed;
    }

    /// Scan all four rows with the clock at `t_ms`.
    fn scan_cycle(engine: &MatrixEngine<MockBackend>, state: &Rc<RefCell<MockState>>, t_ms: u32) {
        state.borrow_mut().now_ms = t_ms;
        for _ in 0..MATRIX_ROWS {
            engine.scan_step();
        }
    }

    /// Run cycles from `from_ms` to `to_ms` inclusive, 4ms apart.
    fn scan_until(
        engine: &MatrixEngine<MockBackend>,
        state: &Rc<RefCell<MockState>>,
        from_ms: u32,
        to_ms: u32,
    ) {
        let mut t = from_ms;
        while t <= to_ms {
            scan_cycle(engine, state, t);
            t += 4;
        }
    }

    #[test]
    fn debounced_press_emits_exactly_one_event() {
        let (engine, state) = engine_fixture();

        set_contact(&state, 0, 0, true);
        scan_until(&engine, &state, 0, 40);

        let event = engine.drain_event().unwrap();
        assert_eq!(
            event,
            KeyEvent {
                key: 0x1,
                transition: KeyTransition::Pressed,
                row: 0,
                col: 0,
                timestamp_ms: 20,
            }
        );
        assert_eq!(engine.drain_event(), None);
        assert!(engine.any_key_pressed());
    }

    #[test]
    fn bounce_shorter_than_the_window_never_emits() {
        let (engine, state) = engine_fixture();

        set_contact(&state, 1, 2, true);
        scan_until(&engine, &state, 0, 16);
        set_contact(&state, 1, 2, false);
        scan_until(&engine, &state, 20, 120);

        assert_eq!(engine.drain_event(), None);
        assert!(!engine.any_key_pressed());
    }

    #[test]
    fn release_emits_once_after_its_own_window() {
        let (engine, state) = engine_fixture();

        set_contact(&state, 2, 3, true);
        scan_until(&engine, &state, 0, 24);
        set_contact(&state, 2, 3, false);
        scan_until(&engine, &state, 100, 200);

        let pressed = engine.drain_event().unwrap();
        assert_eq!(pressed.transition, KeyTransition::Pressed);
        assert_eq!(pressed.key, 0xC);

        let released = engine.drain_event().unwrap();
        assert_eq!(released.transition, KeyTransition::Released);
        assert_eq!(released.timestamp_ms, 152);
        assert_eq!(engine.drain_event(), None);
        assert!(!engine.any_key_pressed());
    }

    #[test]
    fn ghost_press_is_suppressed_and_reported() {
        let (engine, state) = engine_fixture();

        // Three real presses forming an "L" around (2, 2).
        set_contact(&state, 2, 0, true);
        set_contact(&state, 2, 1, true);
        set_contact(&state, 0, 2, true);
        set_contact(&state, 1, 2, true);
        scan_until(&engine, &state, 0, 24);
        assert_eq!(engine.pending_event_count(), 4);
        while engine.drain_event().is_some() {}

        set_contact(&state, 2, 2, true);
        scan_until(&engine, &state, 30, 54);

        let error = engine.drain_error().unwrap();
        assert_eq!(error.kind, ErrorKind::GhostKey);
        assert_eq!((error.row, error.col), (2, 2));
        assert_eq!(engine.drain_event(), None);

        // With detection off the same press confirms normally.
        engine.set_ghost_detection(false);
        scan_until(&engine, &state, 60, 84);
        let event = engine.drain_event().unwrap();
        assert_eq!(event.transition, KeyTransition::Pressed);
        assert_eq!((event.row, event.col), (2, 2));
    }

    #[test]
    fn stuck_key_is_reported_repeatedly_until_disabled() {
        let (engine, state) = engine_fixture();

        set_contact(&state, 1, 1, true);
        scan_until(&engine, &state, 0, 24);
        while engine.drain_event().is_some() {}

        // Held since t=24; the timeout is measured from there.
        scan_cycle(&engine, &state, 6_000);
        let first = engine.drain_error().unwrap();
        assert_eq!(first.kind, ErrorKind::StuckKey);
        assert_eq!((first.row, first.col), (1, 1));

        scan_cycle(&engine, &state, 6_004);
        assert!(engine.drain_error().is_some());

        engine.set_stuck_detection(false, 5_000);
        scan_cycle(&engine, &state, 6_008);
        assert_eq!(engine.drain_error(), None);
    }

    #[test]
    fn event_queue_is_fifo_and_drops_the_newest_on_overflow() {
        let (engine, state) = engine_fixture();
        engine.set_ghost_detection(false);

        // 16 presses + 16 releases fill the queue exactly.
        for row in 0..MATRIX_ROWS {
            for col in 0..MATRIX_COLS {
                set_contact(&state, row, col, true);
            }
        }
        scan_until(&engine, &state, 0, 24);
        for row in 0..MATRIX_ROWS {
            for col in 0..MATRIX_COLS {
                set_contact(&state, row, col, false);
            }
        }
        scan_until(&engine, &state, 100, 200);
        assert_eq!(engine.pending_event_count(), 32);

        // One more confirmed press has nowhere to go.
        set_contact(&state, 0, 0, true);
        scan_until(&engine, &state, 300, 324);

        let stats = engine.statistics();
        assert_eq!(stats.queue_overflows, 1);
        assert_eq!(stats.total_events, 33);
        assert_eq!(engine.pending_event_count(), 32);

        // Oldest first, presses in scan order, then the releases.
        for row in 0..MATRIX_ROWS {
            for col in 0..MATRIX_COLS {
                let event = engine.drain_event().unwrap();
                assert_eq!(event.transition, KeyTransition::Pressed);
                assert_eq!((event.row as usize, event.col as usize), (row, col));
            }
        }
        for _ in 0..16 {
            assert_eq!(engine.drain_event().unwrap().transition, KeyTransition::Released);
        }
        assert_eq!(engine.drain_event(), None);
    }

    #[test]
    fn low_power_round_trip_resumes_scanning_on_a_wake_edge() {
        let (engine, state) = engine_fixture();
        scan_cycle(&engine, &state, 0);

        engine.enter_low_power();
        assert_eq!(engine.state(), EngineState::LowPower);
        assert!(!state.borrow().timer_running);
        assert!(state.borrow().wake_armed);

        // A stray tick while asleep does not scan.
        let scans_before = engine.statistics().total_scans;
        engine.scan_step();
        assert_eq!(engine.statistics().total_scans, scans_before);

        engine.wake_edge();
        assert_eq!(engine.state(), EngineState::Active);
        assert!(state.borrow().timer_running);
        assert!(!state.borrow().wake_armed);

        scan_cycle(&engine, &state, 10);
        assert_eq!(engine.statistics().total_scans, scans_before + 4);

        // Double entry/exit are no-ops.
        engine.exit_low_power();
        assert_eq!(engine.state(), EngineState::Active);
    }

    #[test]
    fn stop_works_from_low_power_too() {
        let (engine, state) = engine_fixture();

        engine.enter_low_power();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!state.borrow().wake_armed);

        // A wake edge after stop must not restart scanning.
        engine.wake_edge();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!state.borrow().timer_running);
    }

    #[test]
    fn statistics_accumulate_and_reset() {
        let (engine, state) = engine_fixture();

        scan_until(&engine, &state, 0, 36);
        let stats = engine.statistics();
        assert_eq!(stats.total_scans, 40);
        assert_eq!(stats.max_scan_time_us, 25);
        assert_eq!(stats.avg_scan_time_us, 25);

        set_contact(&state, 0, 0, true);
        scan_until(&engine, &state, 40, 64);
        let with_event = engine.statistics();
        assert!(with_event.total_scans > stats.total_scans);
        assert_eq!(with_event.total_events, 1);

        engine.reset_statistics();
        assert_eq!(engine.statistics(), Default::default());
    }

    #[test]
    fn clear_events_empties_the_queue_but_not_the_matrix() {
        let (engine, state) = engine_fixture();

        set_contact(&state, 3, 3, true);
        scan_until(&engine, &state, 0, 24);
        assert_eq!(engine.pending_event_count(), 1);

        engine.clear_events();
        assert_eq!(engine.pending_event_count(), 0);
        assert_eq!(engine.drain_event(), None);
        assert!(engine.any_key_pressed());
    }

    #[test]
    fn custom_keymap_applies_to_new_events() {
        let (engine, state) = engine_fixture();
        engine.set_keymap(crate::Keymap::new([
            [10, 11, 12, 13],
            [14, 15, 16, 17],
            [18, 19, 20, 21],
            [22, 23, 24, 25],
        ]));

        set_contact(&state, 1, 2, true);
        scan_until(&engine, &state, 0, 24);
        assert_eq!(engine.drain_event().unwrap().key, 16);
    }

    static CALLBACK_EVENTS: Mutex<Vec<KeyEvent>> = Mutex::new(Vec::new());

    fn record_event(event: KeyEvent) {
        CALLBACK_EVENTS.lock().unwrap().push(event);
    }

    #[test]
    fn registered_callback_bypasses_the_queue() {
        let (engine, state) = engine_fixture();
        CALLBACK_EVENTS.lock().unwrap().clear();
        engine.set_key_callback(Some(record_event));

        set_contact(&state, 0, 1, true);
        scan_until(&engine, &state, 0, 24);

        assert_eq!(engine.pending_event_count(), 0);
        let delivered = CALLBACK_EVENTS.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].key, 0x2);
        assert_eq!(engine.statistics().total_events, 1);
    }

    #[test]
    fn operations_before_init_are_harmless() {
        let engine: MatrixEngine<MockBackend> = MatrixEngine::new();

        engine.start();
        engine.scan_step();
        engine.enter_low_power();
        assert_eq!(engine.drain_event(), None);
        assert_eq!(engine.drain_error(), None);
        assert_eq!(engine.pending_event_count(), 0);
        assert!(!engine.any_key_pressed());
        assert_eq!(engine.statistics(), Default::default());
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
