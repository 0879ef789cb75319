//! Software render host.
//!
//! Draws procedural content instead of a real scene: the presented surface
//! shows a scrolling gradient and panorama face renders show a sky whose color
//! encodes the view direction. Used by the CLI demo recorder and by tests.

use crate::error::CaptureError;
use crate::frame::BYTES_PER_PIXEL;
use crate::panorama::{equirect, CubeFace, Cubemap, EulerAngles};
use crate::readback::{RenderHost, TargetDesc, TargetId};
use std::collections::HashMap;

/// Color for a world direction: each axis mapped from `[-1, 1]` to `[0, 255]`.
pub fn direction_color(dir: [f32; 3]) -> [u8; 3] {
    let len = (dir[0] * dir[0] + dir[1] * dir[1] + dir[2] * dir[2]).sqrt();
    let len = if len > 0.0 { len } else { 1.0 };
    let channel = |c: f32| (((c / len) + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8;
    [channel(dir[0]), channel(dir[1]), channel(dir[2])]
}

struct SoftTarget {
    desc: TargetDesc,
    /// Rows bottom-first
    pixels: Vec<u8>,
}

pub struct PatternHost {
    surface: (u32, u32),
    time: f64,
    next_id: u32,
    targets: HashMap<TargetId, SoftTarget>,
    capture_target: Option<TargetId>,
    fail_create: bool,
}

impl PatternHost {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: (width, height),
            time: 0.0,
            next_id: 1,
            targets: HashMap::new(),
            capture_target: None,
            fail_create: false,
        }
    }

    /// Advance the animation clock.
    pub fn advance(&mut self, delta: f64) {
        self.time += delta.max(0.0);
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface = (width, height);
    }

    /// Make every subsequent `create_target` fail (for error-path tests).
    pub fn set_fail_create(&mut self, fail: bool) {
        self.fail_create = fail;
    }

    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn capture_target(&self) -> Option<TargetId> {
        self.capture_target
    }

    fn draw_gradient(&self, width: u32, height: u32, buffer: &mut [u8]) {
        let shift = (self.time * 60.0) as u32;
        for (y, row) in buffer
            .chunks_exact_mut(width as usize * BYTES_PER_PIXEL)
            .take(height as usize)
            .enumerate()
        {
            for (x, px) in row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                px[0] = (x as u32).wrapping_add(shift) as u8;
                px[1] = (y as u32 * 255 / height.max(1)) as u8;
                px[2] = 128;
            }
        }
    }
}

fn draw_sky(face: CubeFace, width: u32, height: u32, pixels: &mut [u8]) {
    for y in 0..height {
        // Rows are stored bottom-first, face coordinates run top-down
        let j = height - 1 - y;
        let tc = 2.0 * (j as f32 + 0.5) / height as f32 - 1.0;
        for i in 0..width {
            let sc = 2.0 * (i as f32 + 0.5) / width as f32 - 1.0;
            let o = (y as usize * width as usize + i as usize) * BYTES_PER_PIXEL;
            pixels[o..o + BYTES_PER_PIXEL].copy_from_slice(&direction_color(face.direction(sc, tc)));
        }
    }
}

impl RenderHost for PatternHost {
    fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId, CaptureError> {
        if self.fail_create {
            return Err(CaptureError::Host("target allocation failed".to_string()));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(CaptureError::Host(format!(
                "invalid target size {}x{}",
                desc.width, desc.height
            )));
        }
        let id = TargetId(self.next_id);
        self.next_id += 1;
        self.targets.insert(
            id,
            SoftTarget {
                desc: *desc,
                pixels: vec![0u8; desc.width as usize * desc.height as usize * BYTES_PER_PIXEL],
            },
        );
        Ok(id)
    }

    fn release_target(&mut self, target: TargetId) {
        if self.capture_target == Some(target) {
            self.capture_target = None;
        }
        self.targets.remove(&target);
    }

    fn attach_capture_target(&mut self, target: Option<TargetId>) {
        self.capture_target = target;
    }

    fn render(
        &mut self,
        target: TargetId,
        orientation: Option<EulerAngles>,
    ) -> Result<(), CaptureError> {
        let face = match orientation {
            Some(angles) => Some(CubeFace::from_euler(angles).ok_or_else(|| {
                CaptureError::Host(format!("unsupported camera orientation {:?}", angles))
            })?),
            None => None,
        };
        let mut pixels = {
            let soft = self
                .targets
                .get_mut(&target)
                .ok_or_else(|| CaptureError::Host(format!("unknown target {:?}", target)))?;
            std::mem::take(&mut soft.pixels)
        };
        let desc = self.targets[&target].desc;
        match face {
            Some(face) => draw_sky(face, desc.width, desc.height, &mut pixels),
            None => self.draw_gradient(desc.width, desc.height, &mut pixels),
        }
        if let Some(soft) = self.targets.get_mut(&target) {
            soft.pixels = pixels;
        }
        Ok(())
    }

    fn read_pixels(
        &mut self,
        target: TargetId,
        width: u32,
        height: u32,
        buffer: &mut [u8],
    ) -> Result<(), CaptureError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if buffer.len() < expected {
            return Err(CaptureError::BufferSize {
                expected,
                actual: buffer.len(),
            });
        }

        // The camera output is drawn on demand
        if target == TargetId::SURFACE || self.capture_target == Some(target) {
            self.draw_gradient(width, height, buffer);
            return Ok(());
        }

        let soft = self
            .targets
            .get(&target)
            .ok_or_else(|| CaptureError::Host(format!("unknown target {:?}", target)))?;
        if width > soft.desc.width || height > soft.desc.height {
            return Err(CaptureError::Host(format!(
                "read of {}x{} exceeds target {}x{}",
                width, height, soft.desc.width, soft.desc.height
            )));
        }
        let src_row = soft.desc.width as usize * BYTES_PER_PIXEL;
        let dst_row = width as usize * BYTES_PER_PIXEL;
        for y in 0..height as usize {
            buffer[y * dst_row..(y + 1) * dst_row]
                .copy_from_slice(&soft.pixels[y * src_row..y * src_row + dst_row]);
        }
        Ok(())
    }

    fn reproject_equirectangular(
        &mut self,
        cubemap: &Cubemap,
        target: TargetId,
    ) -> Result<(), CaptureError> {
        let soft = self
            .targets
            .get_mut(&target)
            .ok_or_else(|| CaptureError::Host(format!("unknown target {:?}", target)))?;
        equirect::project(cubemap, soft.desc.width, soft.desc.height, &mut soft.pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_color() {
        assert_eq!(direction_color([0.0, 0.0, 1.0]), [128, 128, 255]);
        assert_eq!(direction_color([-2.0, 0.0, 0.0]), [0, 128, 128]);
    }

    #[test]
    fn test_targets_lifecycle() {
        let mut host = PatternHost::new(320, 240);
        let target = host.create_target(&TargetDesc::new(64, 64, 1)).unwrap();
        host.attach_capture_target(Some(target));
        assert_eq!(host.capture_target(), Some(target));
        host.release_target(target);
        assert_eq!(host.capture_target(), None);
        assert_eq!(host.live_targets(), 0);

        host.set_fail_create(true);
        assert!(host.create_target(&TargetDesc::new(64, 64, 1)).is_err());
    }

    #[test]
    fn test_face_render_readback() {
        let mut host = PatternHost::new(320, 240);
        let target = host.create_target(&TargetDesc::new(8, 8, 1)).unwrap();
        host.render(target, Some(CubeFace::PositiveY.euler())).unwrap();
        let mut buffer = vec![0u8; 8 * 8 * 3];
        host.read_pixels(target, 8, 8, &mut buffer).unwrap();
        // Bottom row of the +Y face leans toward +Z
        assert!(buffer[2] > 128);
        assert!(host
            .render(target, Some(EulerAngles::new(45.0, 0.0, 0.0)))
            .is_err());
    }
}
