//! Render host interface and GPU-to-CPU pixel readback.
//!
//! The embedding application implements [`RenderHost`]. Every call happens on
//! the render thread, from inside `VideoCapture::tick` or
//! `VideoCapture::end_of_frame`.

use crate::error::CaptureError;
use crate::frame::BYTES_PER_PIXEL;
use crate::panorama::{Cubemap, EulerAngles};

/// Opaque identifier of a render target owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u32);

impl TargetId {
    /// The host's presented surface (the shared, on-screen target).
    pub const SURFACE: TargetId = TargetId(0);
}

/// Parameters for allocating an off-screen render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDesc {
    pub width: u32,
    pub height: u32,
    /// MSAA sample count (1, 2, 4 or 8)
    pub antialiasing: u32,
    pub depth_bits: u32,
}

impl TargetDesc {
    pub fn new(width: u32, height: u32, antialiasing: u32) -> Self {
        Self {
            width,
            height,
            antialiasing,
            depth_bits: 24,
        }
    }
}

/// Operations the capture pipeline needs from the host renderer.
pub trait RenderHost {
    /// Current size of the presented surface in pixels.
    fn surface_size(&self) -> (u32, u32);

    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId, CaptureError>;

    fn release_target(&mut self, target: TargetId);

    /// Redirect the host's main camera into `target` (`None` restores the
    /// presented surface).
    fn attach_capture_target(&mut self, target: Option<TargetId>);

    /// Render the scene into `target`. With an orientation, the capture camera
    /// is rotated to those Euler angles first (used for cubemap faces).
    fn render(
        &mut self,
        target: TargetId,
        orientation: Option<EulerAngles>,
    ) -> Result<(), CaptureError>;

    /// Copy the bottom-left `width x height` region of `target` into
    /// `buffer` as packed RGB, rows bottom-first.
    fn read_pixels(
        &mut self,
        target: TargetId,
        width: u32,
        height: u32,
        buffer: &mut [u8],
    ) -> Result<(), CaptureError>;

    /// Reproject a cubemap into an equirectangular image stored in `target`.
    fn reproject_equirectangular(
        &mut self,
        cubemap: &Cubemap,
        target: TargetId,
    ) -> Result<(), CaptureError>;
}

/// Reads fixed-size frames from a render target.
#[derive(Debug, Clone, Copy)]
pub struct GpuReadback {
    width: u32,
    height: u32,
}

impl GpuReadback {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes one readback produces.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Read `target` into `buffer`, which must be exactly `frame_bytes` long.
    pub fn read<H: RenderHost + ?Sized>(
        &self,
        host: &mut H,
        target: TargetId,
        buffer: &mut [u8],
    ) -> Result<(), CaptureError> {
        let expected = self.frame_bytes();
        if buffer.len() != expected {
            return Err(CaptureError::BufferSize {
                expected,
                actual: buffer.len(),
            });
        }
        host.read_pixels(target, self.width, self.height, buffer)
    }
}
