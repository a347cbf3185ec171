//! Presentation Meter
//!
//! Paces a growing list of frames for display. Frames arrive in bursts
//! (one server update can yield several boards); the meter walks a cursor
//! through them one step at a time, holding at any outstanding wait gate,
//! and publishes a [`MeterStatus`] after every move.
//!
//! Subscribers may call back into the meter from inside a notification
//! (typically `wait_for` to hold playback for an animation). Such calls
//! mutate state immediately but never re-enter delivery: the change is
//! flagged and flushed as one fresh pass once the current delivery ends.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::{Serialize, Deserialize};
use tracing::trace;

use crate::core::emitter::{Emitter, ReadOnlyEmitter};
use crate::meter::task::{Gate, Task};

// =============================================================================
// CONFIG
// =============================================================================

/// Meter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Start in playing mode.
    pub playing: bool,
    /// Keep frames behind the cursor.
    pub history: bool,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            playing: true,
            history: true,
        }
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Derived playback mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterMode {
    /// Advancing, or held by a gate.
    Playing,
    /// Stopped by the user.
    Paused,
    /// At the last frame with nothing outstanding.
    Idle,
}

/// Published snapshot.
///
/// Two statuses are equal when they share the same frame list (by
/// identity), cursor and mode.
#[derive(Debug)]
pub struct MeterStatus<T> {
    /// Frame list. Replaced, never mutated, on every change.
    pub states: Rc<Vec<T>>,
    /// Cursor.
    pub idx: usize,
    /// Derived mode.
    pub mode: MeterMode,
}

impl<T> Clone for MeterStatus<T> {
    fn clone(&self) -> Self {
        Self {
            states: Rc::clone(&self.states),
            idx: self.idx,
            mode: self.mode,
        }
    }
}

impl<T> PartialEq for MeterStatus<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.states, &other.states) && self.idx == other.idx && self.mode == other.mode
    }
}

impl<T> MeterStatus<T> {
    /// Frame under the cursor.
    pub fn current(&self) -> Option<&T> {
        self.states.get(self.idx)
    }

    /// True when nothing more will be presented until new frames arrive.
    pub fn will_emit(&self) -> bool {
        self.mode == MeterMode::Idle
    }
}

// =============================================================================
// METER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmitState {
    Idle,
    Emitting,
    EmittingWithPendingFlush,
}

/// Re-entrancy guard: emission progress, and whether gates are being
/// force-finished (their completion handlers are ignored meanwhile).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Open(EmitState),
    Clearing(EmitState),
}

impl Guard {
    fn emit(self) -> EmitState {
        match self {
            Guard::Open(emit) | Guard::Clearing(emit) => emit,
        }
    }

    fn with_emit(self, emit: EmitState) -> Self {
        match self {
            Guard::Open(_) => Guard::Open(emit),
            Guard::Clearing(_) => Guard::Clearing(emit),
        }
    }

    fn is_clearing(self) -> bool {
        matches!(self, Guard::Clearing(_))
    }
}

struct State<T> {
    states: Rc<Vec<T>>,
    idx: usize,
    playing: bool,
    history: bool,
    waiting: Vec<Task>,
    guard: Guard,
}

impl<T: Clone> State<T> {
    fn mode(&self) -> MeterMode {
        if !self.playing {
            MeterMode::Paused
        } else if !self.waiting.is_empty() || self.idx + 1 < self.states.len() {
            MeterMode::Playing
        } else {
            MeterMode::Idle
        }
    }

    fn status(&self) -> MeterStatus<T> {
        MeterStatus {
            states: Rc::clone(&self.states),
            idx: self.idx,
            mode: self.mode(),
        }
    }

    fn can_advance(&self) -> bool {
        self.playing && self.waiting.is_empty() && self.idx + 1 < self.states.len()
    }

    fn move_cursor(&mut self, idx: usize) {
        self.idx = idx;
        if !self.history && idx > 0 {
            self.states = Rc::new(self.states[idx..].to_vec());
            self.idx = 0;
        }
    }

    /// Returns false (and flags a flush) if a delivery is in progress.
    fn try_begin_pass(&mut self) -> bool {
        match self.guard.emit() {
            EmitState::Idle => true,
            _ => {
                self.guard = self.guard.with_emit(EmitState::EmittingWithPendingFlush);
                false
            }
        }
    }
}

struct Inner<T> {
    state: RefCell<State<T>>,
    emitter: Emitter<MeterStatus<T>>,
}

/// Frame pacing scheduler.
pub struct Meter<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Meter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Meter<T> {
    /// Meter with no frames.
    pub fn new(config: MeterConfig) -> Self {
        Self::from_states(Vec::new(), config)
    }

    /// Meter presenting `initial`.
    pub fn with_initial(initial: T, config: MeterConfig) -> Self {
        Self::from_states(vec![initial], config)
    }

    fn from_states(states: Vec<T>, config: MeterConfig) -> Self {
        let state = State {
            states: Rc::new(states),
            idx: 0,
            playing: config.playing,
            history: config.history,
            waiting: Vec::new(),
            guard: Guard::Open(EmitState::Idle),
        };
        let emitter = Emitter::new(state.status());

        Self {
            inner: Rc::new(Inner {
                state: RefCell::new(state),
                emitter,
            }),
        }
    }

    /// Status stream.
    pub fn emitter(&self) -> ReadOnlyEmitter<MeterStatus<T>> {
        self.inner.emitter.read_only()
    }

    /// Last published status.
    pub fn status(&self) -> MeterStatus<T> {
        self.inner.emitter.get()
    }

    /// Number of outstanding gates.
    pub fn waiting(&self) -> usize {
        self.inner.state.borrow().waiting.len()
    }

    /// Append frames and resume advancing.
    ///
    /// On an empty meter the first new frame is presented before advancing.
    pub fn push_states(&self, frames: impl IntoIterator<Item = T>) {
        let was_empty = {
            let mut s = self.inner.state.borrow_mut();
            let was_empty = s.states.is_empty();
            let mut next = (*s.states).clone();
            next.extend(frames);
            s.states = Rc::new(next);
            was_empty
        };

        if was_empty {
            self.emit();
        }
        self.iterate();
    }

    /// Cancel all gates and replace the frames, cursor at 0.
    pub fn reset(&self, frames: impl IntoIterator<Item = T>) {
        self.clear_waiting();
        {
            let mut s = self.inner.state.borrow_mut();
            s.states = Rc::new(frames.into_iter().collect());
            s.idx = 0;
        }
        trace!("Meter reset");
        self.emit();
        self.iterate();
    }

    /// Pause, cancel all gates, and jump the cursor.
    ///
    /// Out-of-range targets leave the cursor where it is.
    pub fn set_idx(&self, target: isize) {
        {
            self.inner.state.borrow_mut().playing = false;
        }
        self.clear_waiting();
        {
            let mut s = self.inner.state.borrow_mut();
            if let Ok(idx) = usize::try_from(target) {
                if idx < s.states.len() {
                    s.move_cursor(idx);
                }
            }
        }
        self.iterate();
    }

    /// [`Meter::set_idx`] with a target computed from `(idx, len)`.
    pub fn set_idx_with(&self, f: impl FnOnce(usize, usize) -> isize) {
        let (idx, len) = {
            let s = self.inner.state.borrow();
            (s.idx, s.states.len())
        };
        self.set_idx(f(idx, len));
    }

    /// Start or stop automatic advancement.
    pub fn set_play(&self, playing: bool) {
        self.inner.state.borrow_mut().playing = playing;
        self.iterate();
    }

    /// [`Meter::set_play`] with a value computed from the current one.
    pub fn set_play_with(&self, f: impl FnOnce(bool) -> bool) {
        let playing = self.inner.state.borrow().playing;
        self.set_play(f(playing));
    }

    /// Keep or discard frames behind the cursor from the next advance on.
    pub fn set_history(&self, history: bool) {
        self.inner.state.borrow_mut().history = history;
    }

    /// Hold advancement until `gate` completes.
    ///
    /// A task that is already finished adds no gate.
    ///
    /// # Panics
    ///
    /// A delay gate (`Duration` or millis) panics when registered outside a
    /// `tokio::task::LocalSet`; see [`Task::delay`].
    pub fn wait_for(&self, gate: impl Into<Gate>) {
        let task = gate.into().into_task();
        if task.is_finished() {
            self.iterate();
            return;
        }

        let id = task.id();
        let weak: Weak<Inner<T>> = Rc::downgrade(&self.inner);
        task.on_finish(move || {
            if let Some(inner) = weak.upgrade() {
                Meter { inner }.gate_finished(id);
            }
        });

        self.inner.state.borrow_mut().waiting.push(task);
        trace!(gate = id, "Meter waiting on gate");
        self.iterate();
    }

    fn gate_finished(&self, id: usize) {
        {
            let mut s = self.inner.state.borrow_mut();
            if s.guard.is_clearing() {
                return;
            }
            s.waiting.retain(|t| t.id() != id);
        }
        trace!(gate = id, "Meter gate finished");
        self.iterate();
    }

    fn clear_waiting(&self) {
        let (tasks, nested) = {
            let mut s = self.inner.state.borrow_mut();
            let nested = s.guard.is_clearing();
            s.guard = Guard::Clearing(s.guard.emit());
            (std::mem::take(&mut s.waiting), nested)
        };
        if !tasks.is_empty() {
            trace!(count = tasks.len(), "Meter cancelling gates");
        }
        for task in tasks {
            task.finish();
        }
        if !nested {
            let mut s = self.inner.state.borrow_mut();
            s.guard = Guard::Open(s.guard.emit());
        }
    }

    /// Publish the current status without moving the cursor.
    fn emit(&self) {
        if !self.inner.state.borrow_mut().try_begin_pass() {
            return;
        }
        if self.deliver() {
            self.iterate();
        }
    }

    /// Step the cursor until the last frame, a gate or a pause, emitting
    /// after every step.
    fn iterate(&self) {
        loop {
            let advanced = {
                let mut s = self.inner.state.borrow_mut();
                if !s.try_begin_pass() {
                    return;
                }
                if s.can_advance() {
                    let next = s.idx + 1;
                    s.move_cursor(next);
                    true
                } else {
                    false
                }
            };

            let pending = self.deliver();
            if !advanced && !pending {
                return;
            }
        }
    }

    /// Run one delivery; true if a flush was requested during it.
    fn deliver(&self) -> bool {
        let status = {
            let mut s = self.inner.state.borrow_mut();
            s.guard = s.guard.with_emit(EmitState::Emitting);
            s.status()
        };

        self.inner.emitter.next(status);

        let mut s = self.inner.state.borrow_mut();
        let pending = s.guard.emit() == EmitState::EmittingWithPendingFlush;
        s.guard = s.guard.with_emit(EmitState::Idle);
        pending
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::emitter::Subscription;
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    type Log<T> = Rc<RefCell<Vec<(Option<T>, MeterMode)>>>;

    fn record<T: Clone + 'static>(meter: &Meter<T>) -> (Log<T>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let sub = meter.emitter().subscribe(move |status: &MeterStatus<T>, _| {
            l.borrow_mut().push((status.current().cloned(), status.mode));
        });
        (log, sub)
    }

    fn current<T: Clone + 'static>(meter: &Meter<T>) -> Option<T> {
        meter.status().current().cloned()
    }

    #[test]
    fn test_push_advances_to_last() {
        let meter = Meter::with_initial("x", MeterConfig::default());
        let (log, _sub) = record(&meter);

        meter.push_states(["a", "b", "c"]);

        let status = meter.status();
        assert_eq!(status.current(), Some(&"c"));
        assert_eq!(status.mode, MeterMode::Idle);
        assert!(status.will_emit());

        let seen: Vec<_> = log.borrow().iter().map(|(v, _)| *v).collect();
        assert_eq!(seen, vec![Some("a"), Some("b"), Some("c")]);
    }

    #[test]
    fn test_push_into_empty_presents_first_frame() {
        let meter = Meter::new(MeterConfig::default());
        let (log, _sub) = record(&meter);
        assert_eq!(meter.status().current(), None);

        meter.push_states(["a", "b"]);

        let seen: Vec<_> = log.borrow().iter().map(|(v, _)| *v).collect();
        assert_eq!(seen, vec![Some("a"), Some("b")]);
    }

    #[test]
    fn test_gate_blocks_until_finished() {
        let meter = Meter::with_initial(0, MeterConfig::default());
        let gate = Task::new();

        meter.wait_for(&gate);
        meter.push_states([1, 2, 3]);

        assert_eq!(current(&meter), Some(0));
        assert_eq!(meter.status().mode, MeterMode::Playing);

        gate.finish();
        assert_eq!(current(&meter), Some(3));
        assert_eq!(meter.status().mode, MeterMode::Idle);
        assert_eq!(meter.waiting(), 0);
    }

    #[test]
    fn test_set_idx_cancels_gate() {
        let meter = Meter::with_initial(0, MeterConfig::default());
        let gate = Task::new();
        meter.wait_for(&gate);
        meter.push_states([1, 2, 3]);

        meter.set_idx(2);

        assert!(gate.is_finished());
        assert_eq!(meter.waiting(), 0);
        let status = meter.status();
        assert_eq!(status.idx, 2);
        assert_eq!(status.mode, MeterMode::Paused);

        // The cancelled gate left playback paused.
        meter.set_play(true);
        assert_eq!(current(&meter), Some(3));
    }

    #[test]
    fn test_set_idx_out_of_range_keeps_cursor() {
        let meter = Meter::with_initial(0, MeterConfig { playing: false, history: true });
        meter.push_states([1, 2]);

        meter.set_idx(9);
        assert_eq!(meter.status().idx, 0);
        meter.set_idx(-1);
        assert_eq!(meter.status().idx, 0);

        meter.set_idx_with(|_, len| len as isize - 1);
        assert_eq!(meter.status().idx, 2);
    }

    #[test]
    fn test_pause_and_resume() {
        let meter = Meter::with_initial(0, MeterConfig::default());
        meter.set_play(false);
        meter.push_states([1, 2]);

        assert_eq!(current(&meter), Some(0));
        assert_eq!(meter.status().mode, MeterMode::Paused);

        meter.set_play_with(|p| !p);
        assert_eq!(current(&meter), Some(2));
    }

    #[test]
    fn test_subscriber_can_gate_from_notification() {
        let meter = Meter::with_initial("x", MeterConfig::default());
        let gate = Task::new();

        let m = meter.clone();
        let g = gate.clone();
        let _sub = meter.emitter().subscribe(move |status, _| {
            if status.current() == Some(&"b") && !g.is_finished() {
                m.wait_for(&g);
            }
        });

        meter.push_states(["a", "b", "c"]);
        assert_eq!(current(&meter), Some("b"));
        assert_eq!(meter.status().mode, MeterMode::Playing);

        gate.finish();
        assert_eq!(current(&meter), Some("c"));
    }

    #[test]
    fn test_cancel_guard_survives_nested_clear() {
        let meter = Meter::with_initial(0, MeterConfig::default());
        let (a, b) = (Task::new(), Task::new());
        meter.wait_for(&a);
        meter.wait_for(&b);
        meter.push_states([1, 2]);

        // Cancelling `a` jumps again, clearing from inside the clear.
        let m = meter.clone();
        a.on_finish(move || m.set_idx(0));

        meter.set_idx(1);
        assert!(a.is_finished() && b.is_finished());
        assert_eq!(meter.waiting(), 0);
        assert_eq!(meter.status().idx, 1);
        assert_eq!(meter.status().mode, MeterMode::Paused);

        // Gate completions are handled again once the clear is over.
        let c = Task::new();
        meter.wait_for(&c);
        meter.set_play(true);
        assert_eq!(current(&meter), Some(1));
        c.finish();
        assert_eq!(current(&meter), Some(2));
    }

    #[test]
    fn test_subscriber_changes_are_flushed_not_nested() {
        let meter = Meter::with_initial(0, MeterConfig::default());
        let depth = Rc::new(Cell::new(0usize));
        let max_depth = Rc::new(Cell::new(0usize));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (pushed, jumped, resumed) = (Cell::new(false), Cell::new(false), Cell::new(false));

        let m = meter.clone();
        let (d, md, log) = (Rc::clone(&depth), Rc::clone(&max_depth), Rc::clone(&seen));
        let _sub = meter.emitter().subscribe(move |status: &MeterStatus<i32>, _| {
            d.set(d.get() + 1);
            md.set(md.get().max(d.get()));
            let current = status.current().copied();
            log.borrow_mut().push((current, status.mode));

            if current == Some(2) && !pushed.replace(true) {
                m.push_states([4, 5]);
            } else if current == Some(4) && !jumped.replace(true) {
                m.set_idx(1);
            } else if status.mode == MeterMode::Paused && !resumed.replace(true) {
                m.set_play(true);
            }
            d.set(d.get() - 1);
        });

        meter.push_states([1, 2, 3]);

        assert_eq!(max_depth.get(), 1);
        assert_eq!(depth.get(), 0);

        let seen = seen.borrow();
        let values: Vec<i32> = seen.iter().filter_map(|(v, _)| *v).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 1, 2, 3, 4, 5]);

        // Increasing everywhere except at the one jump.
        let jump = seen.iter().position(|(_, mode)| *mode == MeterMode::Paused).unwrap();
        assert_eq!(jump, 4);
        assert!(values[..jump].windows(2).all(|w| w[0] < w[1]));
        assert!(values[jump..].windows(2).all(|w| w[0] < w[1]));

        // The frames pushed from inside the callback were presented.
        let status = meter.status();
        assert_eq!(status.current(), Some(&5));
        assert_eq!(status.mode, MeterMode::Idle);
    }

    #[test]
    fn test_history_off_trims_frames() {
        let meter = Meter::with_initial(0, MeterConfig { playing: true, history: false });
        meter.push_states([1, 2, 3]);

        let status = meter.status();
        assert_eq!(status.states.as_slice(), &[3]);
        assert_eq!(status.idx, 0);

        meter.set_history(true);
        meter.push_states([4, 5]);
        assert_eq!(meter.status().states.len(), 3);
    }

    #[test]
    fn test_reset_replaces_frames() {
        let meter = Meter::with_initial(0, MeterConfig::default());
        let gate = Task::new();
        meter.wait_for(&gate);
        meter.push_states([1, 2]);

        meter.reset([10, 11]);
        assert!(gate.is_finished());
        assert_eq!(current(&meter), Some(11));
        assert_eq!(meter.status().states.as_slice(), &[10, 11]);
    }

    #[test]
    fn test_finished_task_adds_no_gate() {
        let meter = Meter::with_initial(0, MeterConfig::default());
        let done = Task::new();
        done.finish();

        meter.wait_for(done);
        assert_eq!(meter.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_gate() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let meter = Meter::with_initial(0, MeterConfig::default());
                meter.wait_for(500u64);
                meter.push_states([1]);
                assert_eq!(current(&meter), Some(0));

                tokio::time::sleep(Duration::from_millis(600)).await;
                assert_eq!(current(&meter), Some(1));
                assert_eq!(meter.status().mode, MeterMode::Idle);
            })
            .await;
    }
}
