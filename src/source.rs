//! Frame source: decode a still image or animation into display-sized frames.
//!
//! Animations come out coalesced: every frame is a complete picture, so
//! nothing downstream has to track GIF disposal or blending state.
//!
//! ## Rust concepts
//! - A `Decoder` trait so tests can feed frames without touching the disk
//! - `image::AnimationDecoder` for multi-frame GIF/APNG
//! - Validating invariants once in a constructor (`FrameSequence::new`)

use crate::error::DecodeError;
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, Frame, ImageFormat, ImageReader, RgbaImage};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// One complete frame plus how long to show it.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub image: RgbaImage,
    /// Display time in hundredths of a second, as stored by GIF.
    pub duration_hundredths: u32,
}

impl RawFrame {
    pub fn new(image: RgbaImage, duration_hundredths: u32) -> Self {
        Self {
            image,
            duration_hundredths,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Non-empty list of frames that all have the same, display-sized dimensions.
///
/// A sequence of length 1 is a still image.
#[derive(Clone, Debug)]
pub struct FrameSequence {
    frames: Vec<RawFrame>,
    width: u32,
    height: u32,
}

impl FrameSequence {
    pub fn new(frames: Vec<RawFrame>, width: u32, height: u32) -> Result<Self, DecodeError> {
        if frames.is_empty() {
            return Err(DecodeError::EmptySequence);
        }

        if let Some((index, frame)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.width() != width || f.height() != height)
        {
            return Err(DecodeError::FrameSize {
                index,
                actual_width: frame.width(),
                actual_height: frame.height(),
                width,
                height,
            });
        }

        Ok(Self {
            frames,
            width,
            height,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false for a constructed sequence.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RawFrame> {
        self.frames.iter()
    }
}

impl<'a> IntoIterator for &'a FrameSequence {
    type Item = &'a RawFrame;
    type IntoIter = std::slice::Iter<'a, RawFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// Decoding capability: file to frames, frames to a target size.
pub trait Decoder {
    /// Decode every frame in the file, coalesced into full pictures.
    fn decode(&self, path: &Path) -> Result<Vec<RawFrame>, DecodeError>;

    /// Scale every frame to exactly `width` x `height`.
    fn scale(&self, frames: Vec<RawFrame>, width: u32, height: u32) -> Vec<RawFrame>;
}

/// How frames are fitted to the display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScaleMode {
    /// Stretch to the exact display size, ignoring aspect ratio.
    #[default]
    Stretch,
    /// Keep the aspect ratio and center; the padding stays transparent.
    Fit,
}

/// [`Decoder`] backed by the `image` crate.
///
/// GIF and APNG are decoded frame by frame; every other supported format
/// yields one still frame.
#[derive(Clone, Copy, Debug)]
pub struct ImageDecoder {
    pub scale_mode: ScaleMode,
    pub filter: FilterType,
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new(ScaleMode::default())
    }
}

impl ImageDecoder {
    pub fn new(scale_mode: ScaleMode) -> Self {
        Self {
            scale_mode,
            filter: FilterType::Lanczos3,
        }
    }

    fn scale_image(&self, image: RgbaImage, width: u32, height: u32) -> RgbaImage {
        if image.dimensions() == (width, height) {
            return image;
        }

        match self.scale_mode {
            ScaleMode::Stretch => imageops::resize(&image, width, height, self.filter),
            ScaleMode::Fit => {
                let (w, h) = fit_within(image.width(), image.height(), width, height);
                let scaled = if image.dimensions() == (w, h) {
                    image
                } else {
                    imageops::resize(&image, w, h, self.filter)
                };
                let mut canvas = RgbaImage::new(width, height);
                let x = i64::from((width - w) / 2);
                let y = i64::from((height - h) / 2);
                imageops::replace(&mut canvas, &scaled, x, y);
                canvas
            }
        }
    }
}

impl Decoder for ImageDecoder {
    fn decode(&self, path: &Path) -> Result<Vec<RawFrame>, DecodeError> {
        let io_err = |source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        };
        let image_err = |source| DecodeError::Image {
            path: path.to_path_buf(),
            source,
        };

        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(io_err)?;

        match reader.format() {
            Some(ImageFormat::Gif) => {
                let decoder = GifDecoder::new(reader.into_inner()).map_err(image_err)?;
                collect_animation(decoder).map_err(image_err)
            }
            Some(ImageFormat::Png) => decode_png(reader.into_inner()).map_err(image_err),
            _ => {
                let image = reader.decode().map_err(image_err)?;
                Ok(vec![RawFrame::new(image.to_rgba8(), 0)])
            }
        }
    }

    fn scale(&self, frames: Vec<RawFrame>, width: u32, height: u32) -> Vec<RawFrame> {
        frames
            .into_iter()
            .map(|f| RawFrame::new(self.scale_image(f.image, width, height), f.duration_hundredths))
            .collect()
    }
}

fn decode_png(reader: BufReader<File>) -> image::ImageResult<Vec<RawFrame>> {
    let decoder = PngDecoder::new(reader)?;
    if decoder.is_apng()? {
        collect_animation(decoder.apng()?)
    } else {
        let image = image::DynamicImage::from_decoder(decoder)?;
        Ok(vec![RawFrame::new(image.to_rgba8(), 0)])
    }
}

fn collect_animation<'a>(decoder: impl AnimationDecoder<'a>) -> image::ImageResult<Vec<RawFrame>> {
    let frames = decoder.into_frames().collect_frames()?;
    Ok(frames.into_iter().map(raw_frame).collect())
}

fn raw_frame(frame: Frame) -> RawFrame {
    let duration = delay_hundredths(frame.delay());
    RawFrame::new(frame.into_buffer(), duration)
}

/// Convert a frame delay to hundredths of a second, rounding to nearest.
fn delay_hundredths(delay: image::Delay) -> u32 {
    let (numer, denom) = delay.numer_denom_ms();
    if denom == 0 {
        return 0;
    }
    let tenths_of_ms = u64::from(denom) * 10;
    let hundredths = (u64::from(numer) + tenths_of_ms / 2) / tenths_of_ms;
    u32::try_from(hundredths).unwrap_or(u32::MAX)
}

/// Largest size with the source aspect ratio that fits in the target.
fn fit_within(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let (sw, sh) = (u64::from(src_w.max(1)), u64::from(src_h.max(1)));
    let (mw, mh) = (u64::from(max_w), u64::from(max_h));

    let (w, h) = if sw * mh <= sh * mw {
        (sw * mh / sh, mh)
    } else {
        (mw, sh * mw / sw)
    };
    // Both are bounded by the target size, so they fit in u32.
    (w.clamp(1, mw) as u32, h.clamp(1, mh) as u32)
}

/// Load a still image or animation, scaled to `width` x `height`.
///
/// Fails before anything touches the display if the file yields no frames.
pub fn load_animation<D: Decoder + ?Sized>(
    decoder: &D,
    path: &Path,
    width: u32,
    height: u32,
) -> Result<FrameSequence, DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::InvalidTarget { width, height });
    }

    tracing::info!("Reading image {}", path.display());
    let frames = decoder.decode(path)?;

    let Some(first) = frames.first() else {
        return Err(DecodeError::NoFrames {
            path: path.to_path_buf(),
        });
    };

    if frames.len() > 1 {
        tracing::info!("Assembling animation with {} frames", frames.len());
    }
    tracing::info!(
        "Scaling {}x{} -> {}x{}",
        first.width(),
        first.height(),
        width,
        height
    );

    let frames = decoder.scale(frames, width, height);
    FrameSequence::new(frames, width, height)
}
