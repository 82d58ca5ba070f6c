//! Play still images and animations on an RGB LED matrix.
//!
//! The pipeline is split into stages that each do one thing:
//! - [`source`]: decode a file into complete, display-sized frames
//! - [`prepare`]: render every frame into its own off-screen buffer up front
//! - [`playback`]: swap buffers on vsync with the right delays, until interrupted
//! - [`render`]: run those stages on the render thread and report progress
//!
//! Hardware access goes through the [`display::Display`] trait, so everything
//! except [`matrix`] builds and tests without `rpi-led-matrix`.

pub mod display;
pub mod error;
#[cfg(feature = "hardware")]
pub mod matrix;
pub mod playback;
pub mod prepare;
pub mod render;
pub mod source;

pub use error::{DecodeError, Error, Result};

#[cfg(feature = "hardware")]
use rpi_led_matrix::{LedMatrix, LedMatrixOptions, LedRuntimeOptions};

use playback::InterruptFlag;

// ── Panel configuration ────────────────────────────────────────────

/// Physical layout of the LED panels.
///
/// `rows`/`cols` describe one panel. Panels can be daisy-chained
/// (`chain`, extends the width) and driven on parallel outputs
/// (`parallel`, extends the height).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PanelConfig {
    pub rows: u32,
    pub cols: u32,
    pub chain: u32,
    pub parallel: u32,
}

impl PanelConfig {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self {
            rows,
            cols,
            chain: 1,
            parallel: 1,
        }
    }

    pub fn with_chain(self, chain: u32, parallel: u32) -> Self {
        Self {
            chain,
            parallel,
            ..self
        }
    }

    /// Physical width of the whole display in pixels.
    pub fn width(&self) -> u32 {
        self.cols * self.chain
    }

    /// Physical height of the whole display in pixels.
    pub fn height(&self) -> u32 {
        self.rows * self.parallel
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self::new(64, 64)
    }
}

// ── Color ──────────────────────────────────────────────────────────

/// 8-bit RGB color, decoupled from the hardware crate.
///
/// At the hardware boundary we convert via `Into<LedColor>`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Self = Self::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// The RGB part of an RGBA pixel, or `None` if it is fully transparent.
    pub fn from_rgba(rgba: image::Rgba<u8>) -> Option<Self> {
        let [r, g, b, a] = rgba.0;
        (a != 0).then_some(Self::new(r, g, b))
    }
}

#[cfg(feature = "hardware")]
impl From<Color> for rpi_led_matrix::LedColor {
    fn from(c: Color) -> Self {
        rpi_led_matrix::LedColor {
            red: c.r,
            green: c.g,
            blue: c.b,
        }
    }
}

// ── Matrix initialization ──────────────────────────────────────────

/// Default panel brightness in percent.
pub const DEFAULT_BRIGHTNESS: u8 = 90;

/// Create a matrix configured for our hardware:
/// Pi + Adafruit Bonnet + configurable panel layout.
///
/// Fails when GPIO is unavailable (e.g. not running as root) or an option is
/// out of range. Nothing is drawn before this succeeds.
#[cfg(feature = "hardware")]
pub fn create_matrix(panel: PanelConfig, brightness: u8) -> Result<LedMatrix> {
    let hw = |e: &str| Error::HardwareInit(e.to_string());

    let mut options = LedMatrixOptions::new();
    options.set_rows(panel.rows);
    options.set_cols(panel.cols);
    options.set_chain_length(panel.chain);
    options.set_parallel(panel.parallel);
    options.set_hardware_mapping("adafruit-hat");
    options.set_brightness(brightness).map_err(hw)?;

    // Full 8-bit color depth, ~143Hz refresh
    options.set_pwm_bits(8).map_err(hw)?;
    options.set_pwm_lsb_nanoseconds(130);

    let mut rt_options = LedRuntimeOptions::new();
    rt_options.set_gpio_slowdown(2);

    LedMatrix::new(Some(options), Some(rt_options)).map_err(hw)
}

/// Install a Ctrl+C handler that raises the returned interrupt flag.
///
/// The flag also wakes a playback loop that is sleeping on a long hold, so
/// shutdown is prompt even while a still image is on screen.
pub fn setup_signal_handler() -> Result<InterruptFlag> {
    let interrupt = InterruptFlag::new();
    let flag = interrupt.clone();

    ctrlc::set_handler(move || {
        tracing::info!("Interrupt received, stopping playback");
        flag.raise();
    })?;

    Ok(interrupt)
}

// ── Tests ──────────────────────────────────────────────────────────
