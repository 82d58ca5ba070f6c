//! Render thread: decode → preprocess → play on one dedicated thread.
//!
//! The thread blocks between buffer swaps, so nothing latency-sensitive may
//! share it. The rest of the process talks to it through a
//! [`PlaybackController`] (inbound) and a channel of [`PipelineEvent`]s
//! (outbound).
//!
//! ## Rust concepts
//! - `std::sync::mpsc` channels for thread communication
//! - Generic closures (`FnOnce() -> Result<D>`) to build non-`Send` values
//!   on the thread that owns them
//! - `JoinHandle` to collect the thread's result

use crate::display::Display;
use crate::error::{Error, Result};
use crate::playback::{PlaybackController, PlaybackLoop, PlaybackReport, PlaybackTiming};
use crate::prepare::prepare;
use crate::source::{Decoder, load_animation};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Progress notifications from the render thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The display is initialized; frames will be scaled to this size.
    DisplayReady { width: u32, height: u32 },
    /// The file decoded into `frames` frames.
    Decoded { frames: usize },
    /// Every frame has its own filled buffer.
    Prepared { frames: usize },
    PlaybackStarted,
    PlaybackStopped(PlaybackReport),
}

/// What to play and how.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub path: PathBuf,
    pub timing: PlaybackTiming,
}

impl PipelineOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timing: PlaybackTiming::default(),
        }
    }
}

fn notify(events: &Sender<PipelineEvent>, event: PipelineEvent) {
    // Nobody listening is fine.
    let _ = events.send(event);
}

/// Decode, preprocess and play `options.path` on an open display.
///
/// Decode errors abort before any buffer is created. After the interrupt,
/// the display is cleared and every buffer released.
pub fn play_file<D, Dec>(
    display: &mut D,
    decoder: &Dec,
    options: &PipelineOptions,
    controller: PlaybackController,
    events: &Sender<PipelineEvent>,
) -> Result<PlaybackReport>
where
    D: Display,
    Dec: Decoder + ?Sized,
{
    let sequence = load_animation(decoder, &options.path, display.width(), display.height())?;
    notify(
        events,
        PipelineEvent::Decoded {
            frames: sequence.len(),
        },
    );

    let frames = prepare(display, &sequence);
    // Raw pixels are not needed once the buffers are filled.
    drop(sequence);
    notify(
        events,
        PipelineEvent::Prepared {
            frames: frames.len(),
        },
    );

    let blank = display.create_buffer();

    notify(events, PipelineEvent::PlaybackStarted);
    let report = PlaybackLoop::new(display, &frames, blank, controller, options.timing).run();

    display.clear();
    for frame in &frames {
        display.release(frame.buffer());
    }
    display.release(blank);

    notify(events, PipelineEvent::PlaybackStopped(report));
    Ok(report)
}

/// Open the display, then [`play_file`] on it.
///
/// If the display cannot be opened, nothing is decoded or drawn.
pub fn run_pipeline<D, F, Dec>(
    open_display: F,
    decoder: &Dec,
    options: &PipelineOptions,
    controller: PlaybackController,
    events: &Sender<PipelineEvent>,
) -> Result<PlaybackReport>
where
    D: Display,
    F: FnOnce() -> Result<D>,
    Dec: Decoder + ?Sized,
{
    let mut display = open_display()?;
    notify(
        events,
        PipelineEvent::DisplayReady {
            width: display.width(),
            height: display.height(),
        },
    );
    play_file(&mut display, decoder, options, controller, events)
}

/// A running render thread and its event stream.
pub struct RenderThread {
    handle: JoinHandle<Result<PlaybackReport>>,
    events: Receiver<PipelineEvent>,
}

impl RenderThread {
    /// Spawn the pipeline on a thread named `render`.
    ///
    /// The display is built by `open_display` on the render thread itself,
    /// since hardware handles cannot move between threads.
    pub fn spawn<D, F, Dec>(
        open_display: F,
        decoder: Dec,
        options: PipelineOptions,
        controller: PlaybackController,
    ) -> std::io::Result<Self>
    where
        D: Display,
        F: FnOnce() -> Result<D> + Send + 'static,
        Dec: Decoder + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("render".to_string())
            .spawn(move || run_pipeline(open_display, &decoder, &options, controller, &tx))?;

        Ok(Self { handle, events: rx })
    }

    /// Feed every event to `on_event` until the thread finishes, then return
    /// its result.
    pub fn wait(self, mut on_event: impl FnMut(PipelineEvent)) -> Result<PlaybackReport> {
        for event in self.events {
            on_event(event);
        }
        self.handle.join().map_err(|_| Error::RenderThread)?
    }
}
