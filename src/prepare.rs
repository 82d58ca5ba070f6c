//! Frame preprocessing: render every frame into its own buffer before playback.
//!
//! Playback then only swaps buffers and sleeps. All per-pixel work happens
//! here, once, at the cost of one full display buffer per frame.

use crate::Color;
use crate::display::{BufferId, Display, Surface};
use crate::source::{FrameSequence, RawFrame};
use std::time::Duration;

/// Shortest frame delay: one hundredth of a second.
pub const MIN_DELAY_MICROS: u64 = 10_000;

/// A pre-filled display buffer and how long to show it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadyFrame {
    buffer: BufferId,
    delay_micros: u64,
}

impl ReadyFrame {
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Always at least [`MIN_DELAY_MICROS`].
    pub fn delay_micros(&self) -> u64 {
        self.delay_micros
    }

    pub fn delay(&self) -> Duration {
        Duration::from_micros(self.delay_micros)
    }
}

/// Frame delay in microseconds for a duration in hundredths of a second.
///
/// Zero-length frames (common in GIFs) are shown for one hundredth.
pub fn compute_delay_micros(duration_hundredths: u32) -> u64 {
    u64::from(duration_hundredths.max(1)) * MIN_DELAY_MICROS
}

/// Draw the opaque pixels of `frame` onto `surface`.
///
/// Fully transparent pixels are skipped and keep whatever the buffer held.
fn draw_opaque(surface: &mut impl Surface, frame: &RawFrame) {
    for (x, y, pixel) in frame.image.enumerate_pixels() {
        if let Some(color) = Color::from_rgba(*pixel) {
            surface.set_pixel(x, y, color);
        }
    }
}

/// Render every frame of `sequence` into a fresh buffer of `display`.
///
/// The returned frames are in sequence order and own their buffers until the
/// caller releases them.
pub fn prepare<D: Display>(display: &mut D, sequence: &FrameSequence) -> Vec<ReadyFrame> {
    tracing::info!("Preprocessing {} frame(s) for display", sequence.len());

    sequence
        .iter()
        .map(|frame| {
            let buffer = display.create_buffer();
            draw_opaque(&mut display.transform(buffer), frame);
            ReadyFrame {
                buffer,
                delay_micros: compute_delay_micros(frame.duration_hundredths),
            }
        })
        .collect()
}
