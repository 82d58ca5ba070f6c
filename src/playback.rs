//! Playback: swap pre-rendered buffers on vsync with the right delays.
//!
//! The loop is a small state machine re-evaluated on every iteration:
//! - **Running**: show the frame at the cursor, sleep its delay, advance
//! - **Holding**: a still image, or the last frame with play-once set; sleep long
//! - **Blanked**: `showing` is off; swap in an empty buffer and idle briefly
//!
//! Control state lives in shared atomics ([`PlaybackController`]) and a
//! terminal [`InterruptFlag`]. Every sleep is a condition-variable wait. The
//! interrupt ends it right away, and so does a control change that alters
//! the current step; anything else lets it run to its full length.
//!
//! ## Rust concepts
//! - `Arc<AtomicBool>` for lock-free flags shared across threads
//! - `Condvar::wait_timeout_while` for an interruptible sleep
//! - Pure functions (`plan_step`) for logic that is easy to test

use crate::display::{BufferId, Display};
use crate::prepare::ReadyFrame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How long a still image (or the final frame of a play-once run) is held
/// before the loop re-evaluates.
pub const DEFAULT_HOLD: Duration = Duration::from_secs(86_400);

/// Idle time per iteration while blanked.
pub const DEFAULT_BLANK_IDLE: Duration = Duration::from_millis(100);

// ── Wake-ups ─────────────────────────────────────────────────────────

/// Counter + condition variable used to cut a sleep short.
///
/// A waiter remembers the epoch it saw before reading any flags; a change
/// made after that point bumps the epoch and cannot be missed.
#[derive(Debug, Default)]
struct Wakeup {
    epoch: Mutex<u64>,
    cvar: Condvar,
}

impl Wakeup {
    fn epoch(&self) -> u64 {
        *self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        *epoch = epoch.wrapping_add(1);
        self.cvar.notify_all();
    }

    /// Sleep for `timeout` unless notified after `seen` or `done` holds.
    /// Returns true if woken.
    fn wait(&self, seen: u64, timeout: Duration, done: impl Fn() -> bool) -> bool {
        let guard = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        let (_guard, result) = self
            .cvar
            .wait_timeout_while(guard, timeout, |epoch| *epoch == seen && !done())
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }
}

// ── Interrupt ────────────────────────────────────────────────────────

/// Terminal stop request. Once raised it stays raised.
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
    wakeup: Arc<Wakeup>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop, waking it if it is asleep.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.wakeup.notify();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Sleep for `timeout`, or until a notification after `seen` or the
    /// interrupt. Returns true if woken early.
    fn sleep(&self, seen: u64, timeout: Duration) -> bool {
        self.wakeup.wait(seen, timeout, || self.is_raised())
    }
}

// ── Controller ───────────────────────────────────────────────────────

/// Flags read fresh by the loop on every iteration.
#[derive(Debug)]
pub struct PlaybackState {
    showing: AtomicBool,
    play_once: AtomicBool,
}

/// Handle for changing playback behavior from any thread.
///
/// Last write wins. Writing the value a flag already has is a no-op; a real
/// change wakes the loop, which picks it up at the next iteration boundary.
#[derive(Clone, Debug)]
pub struct PlaybackController {
    state: Arc<PlaybackState>,
    interrupt: InterruptFlag,
}

impl PlaybackController {
    /// Start in the showing, looping state.
    pub fn new(interrupt: InterruptFlag) -> Self {
        Self {
            state: Arc::new(PlaybackState {
                showing: AtomicBool::new(true),
                play_once: AtomicBool::new(false),
            }),
            interrupt,
        }
    }

    pub fn set_showing(&self, showing: bool) {
        if self.state.showing.swap(showing, Ordering::SeqCst) != showing {
            self.interrupt.wakeup.notify();
        }
    }

    pub fn set_play_once(&self, play_once: bool) {
        if self.state.play_once.swap(play_once, Ordering::SeqCst) != play_once {
            self.interrupt.wakeup.notify();
        }
    }

    pub fn showing(&self) -> bool {
        self.state.showing.load(Ordering::SeqCst)
    }

    pub fn play_once(&self) -> bool {
        self.state.play_once.load(Ordering::SeqCst)
    }

    /// Stop playback for good.
    pub fn stop(&self) {
        self.interrupt.raise();
    }

    pub fn interrupt(&self) -> &InterruptFlag {
        &self.interrupt
    }
}

// ── Stepping ─────────────────────────────────────────────────────────

/// What one loop iteration does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Swap in the blank buffer.
    Blank,
    /// Swap in frame `index`; `hold` means sleep the long hold duration.
    Show { index: usize, hold: bool },
}

/// Decide the next step from the frame cursor and the current flags.
///
/// `position` is the index of the next frame to show (`< len`).
pub fn plan_step(position: usize, len: usize, showing: bool, play_once: bool) -> Step {
    if !showing {
        return Step::Blank;
    }
    let hold = len <= 1 || (play_once && position + 1 >= len);
    Step::Show {
        index: position,
        hold,
    }
}

/// Cursor after executing `step`. Only a non-holding frame advances it.
pub fn next_position(position: usize, len: usize, step: Step) -> usize {
    match step {
        Step::Show { hold: false, .. } => (position + 1) % len.max(1),
        _ => position,
    }
}

/// Sleep durations that are not taken from the frames themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackTiming {
    pub hold: Duration,
    pub blank_idle: Duration,
}

impl Default for PlaybackTiming {
    fn default() -> Self {
        Self {
            hold: DEFAULT_HOLD,
            blank_idle: DEFAULT_BLANK_IDLE,
        }
    }
}

/// Counters for a finished playback session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub iterations: u64,
    pub frames_shown: u64,
    pub blank_swaps: u64,
}

// ── Loop ─────────────────────────────────────────────────────────────

/// Drives a display through a list of ready frames until interrupted.
pub struct PlaybackLoop<'a, D: Display> {
    display: &'a mut D,
    frames: &'a [ReadyFrame],
    blank: BufferId,
    controller: PlaybackController,
    timing: PlaybackTiming,
}

impl<'a, D: Display> PlaybackLoop<'a, D> {
    /// `blank` must be a buffer of `display` that is never drawn into.
    pub fn new(
        display: &'a mut D,
        frames: &'a [ReadyFrame],
        blank: BufferId,
        controller: PlaybackController,
        timing: PlaybackTiming,
    ) -> Self {
        Self {
            display,
            frames,
            blank,
            controller,
            timing,
        }
    }

    /// Run until the interrupt flag is raised.
    ///
    /// There is no error path: swaps and sleeps cannot fail at this layer.
    pub fn run(&mut self) -> PlaybackReport {
        let mut report = PlaybackReport::default();
        if self.frames.is_empty() {
            tracing::warn!("Nothing to play");
            return report;
        }

        let len = self.frames.len();
        let interrupt = self.controller.interrupt().clone();
        let mut position = 0;
        let mut was_holding = false;

        tracing::info!("Playback started ({} frame(s))", len);

        loop {
            // Epoch before flag: a raise in between still bumps the epoch.
            let epoch = interrupt.wakeup.epoch();
            if interrupt.is_raised() {
                break;
            }
            let step = self.plan(position);

            let sleep = match step {
                Step::Blank => {
                    self.display.swap_on_vsync(self.blank);
                    report.blank_swaps += 1;
                    self.timing.blank_idle
                }
                Step::Show { index, hold } => {
                    let frame = &self.frames[index];
                    self.display.swap_on_vsync(frame.buffer());
                    report.frames_shown += 1;

                    if hold && !was_holding {
                        tracing::debug!("Holding on frame {}", index);
                    }
                    was_holding = hold;

                    if hold { self.timing.hold } else { frame.delay() }
                }
            };

            report.iterations += 1;
            self.pause(epoch, sleep, position, step);
            position = next_position(position, len, step);
        }

        tracing::info!(
            "Playback stopped after {} iterations ({} frames shown, {} blank)",
            report.iterations,
            report.frames_shown,
            report.blank_swaps
        );
        report
    }

    fn plan(&self, position: usize) -> Step {
        plan_step(
            position,
            self.frames.len(),
            self.controller.showing(),
            self.controller.play_once(),
        )
    }

    /// Sleep `duration` after executing `step` at `position`.
    ///
    /// Ends early on the interrupt, or when the flags now plan a different
    /// step. Wake-ups that leave the plan unchanged resume the remaining time.
    fn pause(&self, mut epoch: u64, duration: Duration, position: usize, step: Step) {
        let interrupt = self.controller.interrupt();
        let deadline = Instant::now().checked_add(duration);
        loop {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => duration,
            };
            if !interrupt.sleep(epoch, remaining) {
                return;
            }
            epoch = interrupt.wakeup.epoch();
            if interrupt.is_raised() || self.plan(position) != step {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{MemoryDisplay, Surface};
    use crate::prepare::prepare;
    use crate::source::{FrameSequence, RawFrame};
    use crate::Color;
    use image::{Rgba, RgbaImage};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::mpsc;
    use std::thread;

    /// Replay `plan_step`/`next_position` for `iterations` steps and return
    /// the displayed frame indices.
    fn simulate(len: usize, play_once: bool, iterations: usize) -> Vec<usize> {
        let mut position = 0;
        let mut shown = Vec::new();
        for _ in 0..iterations {
            let step = plan_step(position, len, true, play_once);
            if let Step::Show { index, .. } = step {
                shown.push(index);
            }
            position = next_position(position, len, step);
        }
        shown
    }

    #[test]
    fn still_image_holds_on_first_iteration() {
        assert_eq!(plan_step(0, 1, true, false), Step::Show { index: 0, hold: true });
        assert_eq!(plan_step(0, 1, true, true), Step::Show { index: 0, hold: true });
        assert_eq!(simulate(1, false, 5), vec![0; 5]);
    }

    #[rstest]
    #[case(2)]
    #[case(3)]
    #[case(7)]
    fn looping_is_periodic(#[case] len: usize) {
        let shown = simulate(len, false, len * 4 + 1);
        for (i, index) in shown.iter().enumerate() {
            assert_eq!(*index, i % len);
        }
    }

    #[rstest]
    #[case(2)]
    #[case(3)]
    #[case(5)]
    fn play_once_stops_on_last_frame(#[case] len: usize) {
        let shown = simulate(len, true, len * 3);
        for (i, index) in shown.iter().enumerate() {
            assert_eq!(*index, i.min(len - 1));
        }
        assert_eq!(
            plan_step(len - 1, len, true, true),
            Step::Show { index: len - 1, hold: true }
        );
    }

    #[test]
    fn blanking_does_not_move_the_cursor() {
        assert_eq!(plan_step(2, 3, false, false), Step::Blank);
        assert_eq!(next_position(2, 3, Step::Blank), 2);
    }

    #[test]
    fn interrupt_is_terminal() {
        let flag = InterruptFlag::new();
        assert!(!flag.is_raised());
        flag.raise();
        flag.raise();
        assert!(flag.is_raised());
        assert!(flag.clone().is_raised());
    }

    #[test]
    fn controller_defaults_to_showing_and_looping() {
        let controller = PlaybackController::new(InterruptFlag::new());
        assert!(controller.showing());
        assert!(!controller.play_once());

        let other = controller.clone();
        other.set_showing(false);
        other.set_play_once(true);
        assert!(!controller.showing());
        assert!(controller.play_once());
    }

    #[test]
    fn raise_cuts_a_long_wait_short() {
        let flag = InterruptFlag::new();
        let epoch = flag.wakeup.epoch();
        let start = Instant::now();
        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                flag.raise();
            });
            assert!(flag.sleep(epoch, Duration::from_secs(30)));
        });
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn sleep_sees_a_raise_that_already_bumped_the_epoch() {
        let flag = InterruptFlag::new();
        flag.raise();
        let epoch = flag.wakeup.epoch();
        let start = Instant::now();
        assert!(flag.sleep(epoch, Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn setters_only_notify_on_change() {
        let controller = PlaybackController::new(InterruptFlag::new());
        let wakeup = &controller.interrupt().wakeup;
        let epoch = wakeup.epoch();

        controller.set_showing(true);
        controller.set_play_once(false);
        assert_eq!(wakeup.epoch(), epoch);

        controller.set_showing(false);
        assert_eq!(wakeup.epoch(), epoch + 1);
        controller.set_showing(false);
        controller.set_play_once(true);
        assert_eq!(wakeup.epoch(), epoch + 2);
    }

    #[test]
    fn notify_before_wait_is_not_lost() {
        let wakeup = Wakeup::default();
        let epoch = wakeup.epoch();
        wakeup.notify();
        assert!(wakeup.wait(epoch, Duration::from_secs(30), || false));
    }

    // ── Loop against an in-memory display ───────────────────────────

    type SwapHook = Box<dyn FnMut(usize, BufferId) + Send>;

    /// Memory display that runs a hook after every swap.
    struct HookedDisplay {
        inner: MemoryDisplay,
        hook: SwapHook,
    }

    impl Display for HookedDisplay {
        fn width(&self) -> u32 {
            self.inner.width()
        }
        fn height(&self) -> u32 {
            self.inner.height()
        }
        fn create_buffer(&mut self) -> BufferId {
            self.inner.create_buffer()
        }
        fn transform(&mut self, buffer: BufferId) -> impl Surface + '_ {
            self.inner.transform(buffer)
        }
        fn swap_on_vsync(&mut self, buffer: BufferId) {
            self.inner.swap_on_vsync(buffer);
            (self.hook)(self.inner.swap_history().len(), buffer);
        }
        fn clear(&mut self) {
            self.inner.clear();
        }
        fn release(&mut self, buffer: BufferId) {
            self.inner.release(buffer);
        }
    }

    struct Fixture {
        display: HookedDisplay,
        frames: Vec<ReadyFrame>,
        blank: BufferId,
    }

    impl Fixture {
        fn new(durations: &[u32], hook: SwapHook) -> Self {
            let mut display = HookedDisplay {
                inner: MemoryDisplay::new(2, 2),
                hook,
            };
            let raw = durations
                .iter()
                .enumerate()
                .map(|(i, d)| {
                    RawFrame::new(RgbaImage::from_pixel(2, 2, Rgba([i as u8, 0, 0, 255])), *d)
                })
                .collect();
            let seq = FrameSequence::new(raw, 2, 2).unwrap();
            let frames = prepare(&mut display, &seq);
            let blank = display.create_buffer();
            Self {
                display,
                frames,
                blank,
            }
        }

        fn run(&mut self, controller: PlaybackController, timing: PlaybackTiming) -> PlaybackReport {
            PlaybackLoop::new(
                &mut self.display,
                &self.frames,
                self.blank,
                controller,
                timing,
            )
            .run()
        }

        /// Swap history as frame indices, with `None` for the blank buffer.
        fn shown(&self) -> Vec<Option<usize>> {
            self.display
                .inner
                .swap_history()
                .iter()
                .map(|b| self.frames.iter().position(|f| f.buffer() == *b))
                .collect()
        }
    }

    fn stop_after(swaps: usize, interrupt: InterruptFlag) -> SwapHook {
        Box::new(move |count, _| {
            if count >= swaps {
                interrupt.raise();
            }
        })
    }

    #[test]
    fn loops_frames_until_interrupted() {
        let interrupt = InterruptFlag::new();
        let controller = PlaybackController::new(interrupt.clone());
        let mut fx = Fixture::new(&[1, 1, 1], stop_after(7, interrupt));

        let report = fx.run(controller, PlaybackTiming::default());

        let expected: Vec<Option<usize>> = [0, 1, 2, 0, 1, 2, 0].into_iter().map(Some).collect();
        assert_eq!(fx.shown(), expected);
        assert_eq!(report.frames_shown, 7);
        assert_eq!(report.blank_swaps, 0);
    }

    #[test]
    fn still_image_is_swapped_once_then_held() {
        let interrupt = InterruptFlag::new();
        let controller = PlaybackController::new(interrupt.clone());
        let mut fx = Fixture::new(&[0], Box::new(|_, _| {}));

        let start = Instant::now();
        let report = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(100));
                interrupt.raise();
            });
            fx.run(controller, PlaybackTiming::default())
        });

        assert_eq!(fx.shown(), vec![Some(0)]);
        assert_eq!(report.iterations, 1);
        // The one-day hold ended as soon as the interrupt was raised.
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn still_image_ignores_changes_that_do_not_affect_it() {
        let interrupt = InterruptFlag::new();
        let controller = PlaybackController::new(interrupt.clone());
        let writer = controller.clone();
        let mut fx = Fixture::new(&[0], Box::new(|_, _| {}));

        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..20 {
                    writer.set_showing(true);
                    writer.set_play_once(i % 2 == 0);
                    thread::sleep(Duration::from_millis(5));
                }
                interrupt.raise();
            });
            fx.run(controller, PlaybackTiming::default())
        });

        assert_eq!(fx.shown(), vec![Some(0)]);
    }

    #[test]
    fn repeated_writes_do_not_shorten_a_frame() {
        let interrupt = InterruptFlag::new();
        let controller = PlaybackController::new(interrupt.clone());
        let writer = controller.clone();
        // One second per frame.
        let mut fx = Fixture::new(&[100, 100], Box::new(|_, _| {}));

        let report = thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..50 {
                    writer.set_showing(true);
                    writer.set_play_once(false);
                    thread::sleep(Duration::from_millis(10));
                }
                interrupt.raise();
            });
            fx.run(controller, PlaybackTiming::default())
        });

        assert_eq!(report.frames_shown, 1);
        assert_eq!(fx.shown(), vec![Some(0)]);
    }

    #[test]
    fn interrupt_landing_between_epoch_and_flag_reads_is_seen() {
        let interrupt = InterruptFlag::new();
        let controller = PlaybackController::new(interrupt.clone());
        let raiser = interrupt.clone();
        let mut fx = Fixture::new(&[0], Box::new(|_, _| {}));
        let timing = PlaybackTiming {
            hold: Duration::from_secs(30),
            ..PlaybackTiming::default()
        };
        let (locked_tx, locked_rx) = mpsc::channel();

        let start = Instant::now();
        let report = thread::scope(|s| {
            s.spawn(move || {
                // Hold the epoch lock so the loop blocks on its first read,
                // then raise the way `raise` does while it waits.
                let mut epoch = raiser.wakeup.epoch.lock().unwrap();
                locked_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(100));
                raiser.raised.store(true, Ordering::SeqCst);
                *epoch += 1;
                raiser.wakeup.cvar.notify_all();
            });
            locked_rx.recv().unwrap();
            fx.run(controller, timing)
        });

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(report.frames_shown, 0);
        assert!(fx.shown().is_empty());
    }

    #[test]
    fn play_once_holds_on_last_frame() {
        let interrupt = InterruptFlag::new();
        let controller = PlaybackController::new(interrupt.clone());
        controller.set_play_once(true);
        let mut fx = Fixture::new(&[1, 1, 1], Box::new(|_, _| {}));

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(300));
                interrupt.raise();
            });
            fx.run(controller, PlaybackTiming::default())
        });

        assert_eq!(fx.shown(), vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn blanking_resumes_at_reached_frame() {
        let interrupt = InterruptFlag::new();
        let controller = PlaybackController::new(interrupt.clone());
        let hook_controller = controller.clone();
        let hook: SwapHook = Box::new(move |count, _| match count {
            2 => hook_controller.set_showing(false),
            4 => hook_controller.set_showing(true),
            6 => hook_controller.stop(),
            _ => {}
        });
        let mut fx = Fixture::new(&[1, 1, 1], hook);

        let timing = PlaybackTiming {
            blank_idle: Duration::from_millis(5),
            ..PlaybackTiming::default()
        };
        let report = fx.run(controller, timing);

        assert_eq!(
            fx.shown(),
            vec![Some(0), Some(1), None, None, Some(2), Some(0)]
        );
        assert_eq!(report.blank_swaps, 2);
        assert_eq!(report.frames_shown, 4);
    }

    #[test]
    fn interrupt_before_start_swaps_nothing() {
        let interrupt = InterruptFlag::new();
        interrupt.raise();
        let mut fx = Fixture::new(&[1, 1], Box::new(|_, _| {}));

        let report = fx.run(PlaybackController::new(interrupt), PlaybackTiming::default());

        assert_eq!(report, PlaybackReport::default());
        assert!(fx.shown().is_empty());
    }

    #[test]
    fn blank_buffer_stays_empty() {
        let interrupt = InterruptFlag::new();
        let controller = PlaybackController::new(interrupt.clone());
        controller.set_showing(false);
        let mut fx = Fixture::new(&[1], stop_after(1, interrupt));

        fx.run(controller, PlaybackTiming::default());

        let pixels = fx.display.inner.pixels(fx.blank).unwrap();
        assert!(pixels.iter().all(|c| *c == Color::BLACK));
        assert_eq!(fx.shown(), vec![None]);
    }
}
