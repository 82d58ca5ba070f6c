//! LED image viewer
//!
//! Shows a still image or plays an animation on an RGB LED matrix. Every
//! frame is rendered into its own buffer before playback starts, so the
//! display loop only swaps buffers on vsync.
//!
//! ## Architecture
//! - **Render thread**: owns the matrix, runs decode → preprocess → playback
//! - **Main thread**: parses config, installs the Ctrl+C handler, logs progress
//!
//! ## Usage
//! ```sh
//! sudo ./target/release/led-image-viewer anim.gif --rows 32 --cols 32 --chain 4
//! ./target/release/led-image-viewer anim.gif --dry-run   # no hardware needed
//! ```

use clap::Parser;
use led_image_viewer::display::{MemoryDisplay, Rotation, Transform};
use led_image_viewer::playback::{PlaybackController, PlaybackTiming};
use led_image_viewer::render::{PipelineEvent, PipelineOptions, RenderThread};
use led_image_viewer::source::{ImageDecoder, ScaleMode};
use led_image_viewer::{DEFAULT_BRIGHTNESS, PanelConfig, setup_signal_handler};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Show an image or animation on an RGB LED matrix
#[derive(Parser)]
#[command(name = "led-image-viewer")]
#[command(version)]
struct Args {
    /// Image or animation to show (GIF, PNG/APNG, JPEG, BMP)
    image_path: PathBuf,

    /// Rows per panel
    #[arg(long, default_value = "64", value_parser = clap::value_parser!(u32).range(1..))]
    rows: u32,

    /// Columns per panel
    #[arg(long, default_value = "64", value_parser = clap::value_parser!(u32).range(1..))]
    cols: u32,

    /// Number of daisy-chained panels
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    chain: u32,

    /// Number of parallel chains
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..=3))]
    parallel: u32,

    /// Brightness in percent
    #[arg(long, default_value_t = DEFAULT_BRIGHTNESS, value_parser = clap::value_parser!(u8).range(1..=100))]
    brightness: u8,

    /// Clockwise rotation in degrees: 0, 90, 180 or 270
    #[arg(long, default_value = "0", value_parser = parse_rotation)]
    rotate: Rotation,

    /// Mirror horizontally
    #[arg(long)]
    mirror_x: bool,

    /// Mirror vertically
    #[arg(long)]
    mirror_y: bool,

    /// Keep the aspect ratio instead of stretching to the panel
    #[arg(long)]
    fit: bool,

    /// Play an animation once and stay on the last frame
    #[arg(long)]
    once: bool,

    /// Seconds a still frame is held before the loop looks again
    #[arg(long, default_value = "86400", value_parser = clap::value_parser!(u64).range(1..))]
    hold_secs: u64,

    /// Idle time between blank swaps, in milliseconds
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u64).range(1..))]
    blank_idle_ms: u64,

    /// Render into memory instead of driving the panel
    #[arg(long)]
    dry_run: bool,
}

fn parse_rotation(s: &str) -> Result<Rotation, String> {
    s.parse::<u32>()
        .ok()
        .and_then(Rotation::from_degrees)
        .ok_or_else(|| format!("rotation must be 0, 90, 180 or 270, got {s}"))
}

fn log_event(event: PipelineEvent) {
    match event {
        PipelineEvent::DisplayReady { width, height } => {
            tracing::info!("Display ready: {}x{}", width, height);
        }
        PipelineEvent::Decoded { frames } => tracing::info!("Decoded {} frame(s)", frames),
        PipelineEvent::Prepared { frames } => tracing::info!("Prepared {} buffer(s)", frames),
        PipelineEvent::PlaybackStarted => {
            tracing::info!("Displaying. Press Ctrl+C to exit.");
        }
        PipelineEvent::PlaybackStopped(report) => {
            tracing::info!("Stopped after {} frame swaps", report.frames_shown);
        }
    }
}

#[cfg(feature = "hardware")]
fn spawn_matrix(
    panel: PanelConfig,
    brightness: u8,
    transform: Transform,
    decoder: ImageDecoder,
    options: PipelineOptions,
    controller: PlaybackController,
) -> std::io::Result<RenderThread> {
    use led_image_viewer::matrix::MatrixDisplay;

    RenderThread::spawn(
        move || MatrixDisplay::open(panel, brightness, transform),
        decoder,
        options,
        controller,
    )
}

#[cfg(not(feature = "hardware"))]
fn spawn_matrix(
    panel: PanelConfig,
    _brightness: u8,
    transform: Transform,
    decoder: ImageDecoder,
    options: PipelineOptions,
    controller: PlaybackController,
) -> std::io::Result<RenderThread> {
    tracing::warn!("Built without the 'hardware' feature; rendering to memory");
    spawn_memory(panel, transform, decoder, options, controller)
}

fn spawn_memory(
    panel: PanelConfig,
    transform: Transform,
    decoder: ImageDecoder,
    options: PipelineOptions,
    controller: PlaybackController,
) -> std::io::Result<RenderThread> {
    RenderThread::spawn(
        move || {
            Ok(MemoryDisplay::with_transform(
                panel.width(),
                panel.height(),
                transform,
            ))
        },
        decoder,
        options,
        controller,
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // No ANSI codes: output usually ends up in journald.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .compact()
        .init();

    let args = Args::parse();
    let panel = PanelConfig::new(args.rows, args.cols).with_chain(args.chain, args.parallel);
    let transform = Transform {
        rotation: args.rotate,
        mirror_x: args.mirror_x,
        mirror_y: args.mirror_y,
    };
    let decoder = ImageDecoder::new(if args.fit {
        ScaleMode::Fit
    } else {
        ScaleMode::Stretch
    });
    let options = PipelineOptions {
        path: args.image_path.clone(),
        timing: PlaybackTiming {
            hold: Duration::from_secs(args.hold_secs),
            blank_idle: Duration::from_millis(args.blank_idle_ms),
        },
    };

    tracing::info!("LED image viewer v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Panel: {}x{} ({} chained, {} parallel)",
        panel.width(),
        panel.height(),
        panel.chain,
        panel.parallel
    );
    tracing::info!("Image: {}", args.image_path.display());

    let interrupt = setup_signal_handler()?;
    let controller = PlaybackController::new(interrupt);
    controller.set_play_once(args.once);

    let render = if args.dry_run {
        spawn_memory(panel, transform, decoder, options, controller)?
    } else {
        spawn_matrix(panel, args.brightness, transform, decoder, options, controller)?
    };

    render.wait(log_event)?;

    tracing::info!("Shutting down cleanly.");
    Ok(())
}
