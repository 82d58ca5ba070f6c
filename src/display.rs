//! Display abstraction: off-screen buffers, geometric transforms, vsync swaps.
//!
//! The pipeline never talks to LED hardware directly. It talks to a
//! [`Display`], which hands out opaque [`BufferId`]s, lends a drawable
//! [`Surface`] for a buffer, and swaps a buffer onto the panel. The real
//! panel lives in [`crate::matrix`]; [`MemoryDisplay`] is the in-memory twin
//! used by tests and `--dry-run`.
//!
//! ## Rust concepts
//! - Traits as capability interfaces (swap real hardware for a fake)
//! - Return-position `impl Trait` in traits for borrowed drawing surfaces
//! - Newtype ids instead of raw pointers for buffer handles

use crate::Color;

/// Handle to an off-screen buffer owned by a [`Display`].
///
/// The display keeps the pixel storage; the pipeline only holds the id and
/// lends it back for drawing and swapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);

/// Something pixels can be written into.
pub trait Surface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Write one pixel. Out-of-range coordinates are ignored.
    fn set_pixel(&mut self, x: u32, y: u32, color: Color);
}

/// A double-buffered display that swaps whole frames on vertical sync.
pub trait Display {
    /// Logical width, after the display's transform.
    fn width(&self) -> u32;
    /// Logical height, after the display's transform.
    fn height(&self) -> u32;

    /// Allocate a fresh, cleared off-screen buffer.
    fn create_buffer(&mut self) -> BufferId;

    /// Borrow the transformed drawing surface for a buffer.
    fn transform(&mut self, buffer: BufferId) -> impl Surface + '_;

    /// Show `buffer`, blocking until the swap is committed at the next refresh.
    fn swap_on_vsync(&mut self, buffer: BufferId);

    /// Blank the panel.
    fn clear(&mut self);

    /// Give a buffer's storage back. The id must not be used afterwards.
    fn release(&mut self, buffer: BufferId);
}

// ── Transform ──────────────────────────────────────────────────────

/// Clockwise rotation between logical and physical pixel layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Parse a rotation in degrees. Only multiples of 90 are valid.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Self::None),
            90 => Some(Self::Cw90),
            180 => Some(Self::Cw180),
            270 => Some(Self::Cw270),
            _ => None,
        }
    }

    fn swaps_axes(self) -> bool {
        matches!(self, Self::Cw90 | Self::Cw270)
    }
}

/// Mapping from logical (image) coordinates to physical panel coordinates.
///
/// Mirroring is applied in logical space first, then the rotation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transform {
    pub rotation: Rotation,
    pub mirror_x: bool,
    pub mirror_y: bool,
}

impl Transform {
    /// Logical size seen by the drawing code for a physical panel size.
    pub fn logical_size(&self, physical_width: u32, physical_height: u32) -> (u32, u32) {
        if self.rotation.swaps_axes() {
            (physical_height, physical_width)
        } else {
            (physical_width, physical_height)
        }
    }

    /// Map a logical coordinate to a physical one.
    ///
    /// Returns `None` when the coordinate lies outside the logical area.
    pub fn map(
        &self,
        x: u32,
        y: u32,
        physical_width: u32,
        physical_height: u32,
    ) -> Option<(u32, u32)> {
        let (lw, lh) = self.logical_size(physical_width, physical_height);
        if x >= lw || y >= lh {
            return None;
        }

        let x = if self.mirror_x { lw - 1 - x } else { x };
        let y = if self.mirror_y { lh - 1 - y } else { y };

        let (w, h) = (physical_width, physical_height);
        Some(match self.rotation {
            Rotation::None => (x, y),
            Rotation::Cw90 => (w - 1 - y, x),
            Rotation::Cw180 => (w - 1 - x, h - 1 - y),
            Rotation::Cw270 => (y, h - 1 - x),
        })
    }
}

/// Wraps a physical surface and exposes it in logical coordinates.
pub struct TransformedSurface<S> {
    inner: S,
    transform: Transform,
}

impl<S: Surface> TransformedSurface<S> {
    pub fn new(inner: S, transform: Transform) -> Self {
        Self { inner, transform }
    }
}

impl<S: Surface> Surface for TransformedSurface<S> {
    fn width(&self) -> u32 {
        self.transform
            .logical_size(self.inner.width(), self.inner.height())
            .0
    }

    fn height(&self) -> u32 {
        self.transform
            .logical_size(self.inner.width(), self.inner.height())
            .1
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        let (w, h) = (self.inner.width(), self.inner.height());
        if let Some((px, py)) = self.transform.map(x, y, w, h) {
            self.inner.set_pixel(px, py, color);
        }
    }
}

// ── In-memory display ──────────────────────────────────────────────

/// A [`Display`] that keeps every buffer in memory and records what happens.
///
/// Buffers are stored in physical layout, so tests can check that the
/// transform was applied.
#[derive(Debug)]
pub struct MemoryDisplay {
    width: u32,
    height: u32,
    transform: Transform,
    buffers: Vec<Option<Vec<Color>>>,
    swaps: Vec<BufferId>,
    front: Option<BufferId>,
    created: usize,
    clears: usize,
}

impl MemoryDisplay {
    /// Create a display with the given physical size and no transform.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_transform(width, height, Transform::default())
    }

    pub fn with_transform(width: u32, height: u32, transform: Transform) -> Self {
        Self {
            width,
            height,
            transform,
            buffers: Vec::new(),
            swaps: Vec::new(),
            front: None,
            created: 0,
            clears: 0,
        }
    }

    /// Every buffer swapped in so far, in order.
    pub fn swap_history(&self) -> &[BufferId] {
        &self.swaps
    }

    /// The buffer currently on screen (`None` after a clear).
    pub fn front(&self) -> Option<BufferId> {
        self.front
    }

    /// Number of buffers ever allocated.
    pub fn buffers_created(&self) -> usize {
        self.created
    }

    /// Number of buffers still allocated.
    pub fn buffers_live(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    pub fn clear_count(&self) -> usize {
        self.clears
    }

    /// Read a pixel in physical coordinates.
    pub fn pixel(&self, buffer: BufferId, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let pixels = self.buffers.get(buffer.0)?.as_ref()?;
        pixels.get((y * self.width + x) as usize).copied()
    }

    /// Full physical pixel contents of a buffer, row-major.
    pub fn pixels(&self, buffer: BufferId) -> Option<&[Color]> {
        self.buffers.get(buffer.0)?.as_deref()
    }
}

struct MemorySurface<'a> {
    pixels: &'a mut [Color],
    width: u32,
    height: u32,
}

impl Surface for MemorySurface<'_> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize] = color;
        }
    }
}

impl Display for MemoryDisplay {
    fn width(&self) -> u32 {
        self.transform.logical_size(self.width, self.height).0
    }

    fn height(&self) -> u32 {
        self.transform.logical_size(self.width, self.height).1
    }

    fn create_buffer(&mut self) -> BufferId {
        let id = BufferId(self.buffers.len());
        self.buffers
            .push(Some(vec![Color::BLACK; (self.width * self.height) as usize]));
        self.created += 1;
        id
    }

    fn transform(&mut self, buffer: BufferId) -> impl Surface + '_ {
        // A released or unknown buffer gets an empty surface: writes are dropped.
        let pixels: &mut [Color] = match self.buffers.get_mut(buffer.0) {
            Some(Some(pixels)) => pixels.as_mut_slice(),
            _ => &mut [],
        };
        let (width, height) = if pixels.is_empty() {
            (0, 0)
        } else {
            (self.width, self.height)
        };
        TransformedSurface::new(
            MemorySurface {
                pixels,
                width,
                height,
            },
            self.transform,
        )
    }

    fn swap_on_vsync(&mut self, buffer: BufferId) {
        self.swaps.push(buffer);
        self.front = Some(buffer);
    }

    fn clear(&mut self) {
        self.clears += 1;
        self.front = None;
    }

    fn release(&mut self, buffer: BufferId) {
        if let Some(slot) = self.buffers.get_mut(buffer.0) {
            *slot = None;
        }
        if self.front == Some(buffer) {
            self.front = None;
        }
    }
}
