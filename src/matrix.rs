//! [`Display`] implementation for a real panel via `rpi-led-matrix`.
//!
//! The C library is not thread-safe and its handles are not `Send`, so a
//! `MatrixDisplay` must be created on the thread that uses it (the render
//! thread).
//!
//! `LedMatrix::swap` takes a canvas by value and hands back the one that was
//! on screen. We keep one canvas slot per [`BufferId`]: the swapped-in canvas
//! leaves its slot, and the returned canvas goes back into the slot of the
//! buffer that was showing before.

use crate::display::{BufferId, Display, Surface, Transform, TransformedSurface};
use crate::{Color, PanelConfig, Result, create_matrix};
use rpi_led_matrix::{LedCanvas, LedMatrix};

pub struct MatrixDisplay {
    matrix: LedMatrix,
    panel: PanelConfig,
    transform: Transform,
    /// `None` while the buffer is on screen or after release.
    slots: Vec<Option<LedCanvas>>,
    /// Canvases not tied to a buffer id (the initial one, the cleared one).
    spare: Vec<LedCanvas>,
    front: Option<BufferId>,
}

impl MatrixDisplay {
    /// Initialize the matrix. Fails with [`crate::Error::HardwareInit`].
    pub fn open(panel: PanelConfig, brightness: u8, transform: Transform) -> Result<Self> {
        let matrix = create_matrix(panel, brightness)?;
        tracing::info!(
            "LED matrix ready: {}x{} (brightness {}%)",
            panel.width(),
            panel.height(),
            brightness
        );
        Ok(Self {
            matrix,
            panel,
            transform,
            slots: Vec::new(),
            spare: Vec::new(),
            front: None,
        })
    }

    /// Put the canvas that just left the screen back where it belongs.
    fn park(&mut self, previous: LedCanvas) {
        match self.front.take() {
            Some(id) => match self.slots.get_mut(id.0) {
                Some(slot @ None) => *slot = Some(previous),
                _ => self.spare.push(previous),
            },
            None => self.spare.push(previous),
        }
    }
}

struct CanvasSurface<'a> {
    canvas: Option<&'a mut LedCanvas>,
    width: u32,
    height: u32,
}

impl Surface for CanvasSurface<'_> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x >= self.width || y >= self.height {
            return;
        }
        if let Some(canvas) = self.canvas.as_deref_mut() {
            canvas.set(x as i32, y as i32, &color.into());
        }
    }
}

impl Display for MatrixDisplay {
    fn width(&self) -> u32 {
        self.transform
            .logical_size(self.panel.width(), self.panel.height())
            .0
    }

    fn height(&self) -> u32 {
        self.transform
            .logical_size(self.panel.width(), self.panel.height())
            .1
    }

    fn create_buffer(&mut self) -> BufferId {
        let mut canvas = self.matrix.offscreen_canvas();
        canvas.clear();
        self.slots.push(Some(canvas));
        BufferId(self.slots.len() - 1)
    }

    fn transform(&mut self, buffer: BufferId) -> impl Surface + '_ {
        let canvas = self.slots.get_mut(buffer.0).and_then(Option::as_mut);
        if canvas.is_none() {
            tracing::warn!("Buffer {} is not drawable (on screen or released)", buffer.0);
        }
        TransformedSurface::new(
            CanvasSurface {
                canvas,
                width: self.panel.width(),
                height: self.panel.height(),
            },
            self.transform,
        )
    }

    fn swap_on_vsync(&mut self, buffer: BufferId) {
        if self.front == Some(buffer) {
            return;
        }
        let Some(canvas) = self.slots.get_mut(buffer.0).and_then(Option::take) else {
            tracing::warn!("Cannot swap unknown buffer {}", buffer.0);
            return;
        };
        let previous = self.matrix.swap(canvas);
        self.park(previous);
        self.front = Some(buffer);
    }

    fn clear(&mut self) {
        let mut canvas = self
            .spare
            .pop()
            .unwrap_or_else(|| self.matrix.offscreen_canvas());
        canvas.clear();
        let previous = self.matrix.swap(canvas);
        self.park(previous);
    }

    fn release(&mut self, buffer: BufferId) {
        if let Some(slot) = self.slots.get_mut(buffer.0) {
            // Canvases belong to the matrix; dropping the handle just forgets it.
            slot.take();
        }
        if self.front == Some(buffer) {
            // Its canvas comes back as a spare on the next swap.
            self.front = None;
        }
    }
}
