//! 360° capture: six face renders assembled into a cubemap grid or reprojected
//! into an equirectangular image.
//!
//! Face texel convention: rows are stored top-down, `sc`/`tc` are the texel
//! center coordinates mapped to `[-1, 1]` (left to right, top to bottom). World
//! axes follow the host camera: +X right, +Y up, +Z forward.

use crate::config::{CaptureConfig, PanoramaProjection};
use crate::error::CaptureError;
use crate::frame::BYTES_PER_PIXEL;
use crate::readback::{GpuReadback, RenderHost, TargetDesc, TargetId};
use tracing::debug;

/// Camera rotation in degrees (pitch about X, yaw about Y, roll about Z).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerAngles {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl EulerAngles {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    /// Render order, also the storage order inside [`Cubemap`].
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn index(self) -> usize {
        match self {
            CubeFace::PositiveX => 0,
            CubeFace::NegativeX => 1,
            CubeFace::PositiveY => 2,
            CubeFace::NegativeY => 3,
            CubeFace::PositiveZ => 4,
            CubeFace::NegativeZ => 5,
        }
    }

    /// Capture camera orientation for this face.
    pub fn euler(self) -> EulerAngles {
        match self {
            CubeFace::PositiveX => EulerAngles::new(0.0, 90.0, 0.0),
            CubeFace::NegativeX => EulerAngles::new(0.0, -90.0, 0.0),
            CubeFace::PositiveY => EulerAngles::new(-90.0, 0.0, 0.0),
            CubeFace::NegativeY => EulerAngles::new(90.0, 0.0, 0.0),
            CubeFace::PositiveZ => EulerAngles::new(0.0, 0.0, 0.0),
            CubeFace::NegativeZ => EulerAngles::new(0.0, 180.0, 0.0),
        }
    }

    /// The face a camera with these angles renders, if any.
    pub fn from_euler(angles: EulerAngles) -> Option<CubeFace> {
        const TOLERANCE: f32 = 0.01;
        let wrap = |deg: f32| deg.rem_euclid(360.0);
        let close = |a: f32, b: f32| {
            let diff = (wrap(a) - wrap(b)).abs();
            diff < TOLERANCE || (360.0 - diff) < TOLERANCE
        };
        CubeFace::ALL.into_iter().find(|face| {
            let e = face.euler();
            close(e.x, angles.x) && close(e.y, angles.y) && close(e.z, angles.z)
        })
    }

    /// Cell of this face in the 3x2 grid as (column, row from top).
    pub fn grid_cell(self) -> (u32, u32) {
        match self {
            CubeFace::PositiveX => (0, 0),
            CubeFace::NegativeX => (1, 0),
            CubeFace::PositiveY => (2, 0),
            CubeFace::NegativeY => (0, 1),
            CubeFace::PositiveZ => (1, 1),
            CubeFace::NegativeZ => (2, 1),
        }
    }

    /// World direction (not normalized) through face coordinates `sc`, `tc`.
    pub fn direction(self, sc: f32, tc: f32) -> [f32; 3] {
        match self {
            CubeFace::PositiveX => [1.0, -tc, -sc],
            CubeFace::NegativeX => [-1.0, -tc, sc],
            CubeFace::PositiveY => [sc, 1.0, tc],
            CubeFace::NegativeY => [sc, -1.0, -tc],
            CubeFace::PositiveZ => [sc, -tc, 1.0],
            CubeFace::NegativeZ => [-sc, -tc, -1.0],
        }
    }

    /// Face and face coordinates hit by a world direction.
    pub fn locate(dir: [f32; 3]) -> (CubeFace, f32, f32) {
        let [x, y, z] = dir;
        let (ax, ay, az) = (x.abs(), y.abs(), z.abs());
        if ax >= ay && ax >= az {
            if x >= 0.0 {
                (CubeFace::PositiveX, -z / ax, -y / ax)
            } else {
                (CubeFace::NegativeX, z / ax, -y / ax)
            }
        } else if ay >= az {
            if y >= 0.0 {
                (CubeFace::PositiveY, x / ay, z / ay)
            } else {
                (CubeFace::NegativeY, x / ay, -z / ay)
            }
        } else if z >= 0.0 {
            (CubeFace::PositiveZ, x / az, -y / az)
        } else {
            (CubeFace::NegativeZ, -x / az, -y / az)
        }
    }
}

/// Six square RGB faces, rows top-down.
#[derive(Debug, Clone)]
pub struct Cubemap {
    size: u32,
    faces: Vec<Vec<u8>>,
}

impl Cubemap {
    pub fn new(size: u32) -> Self {
        let face_bytes = size as usize * size as usize * BYTES_PER_PIXEL;
        Self {
            size,
            faces: vec![vec![0u8; face_bytes]; 6],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn face(&self, face: CubeFace) -> &[u8] {
        &self.faces[face.index()]
    }

    pub fn face_mut(&mut self, face: CubeFace) -> &mut [u8] {
        &mut self.faces[face.index()]
    }

    /// Store a bottom-first readback as a face, mirroring rows (`y -> size-1-y`).
    pub fn set_face_mirrored(&mut self, face: CubeFace, src: &[u8]) -> Result<(), CaptureError> {
        let size = self.size as usize;
        let row = size * BYTES_PER_PIXEL;
        let dst = &mut self.faces[face.index()];
        if src.len() != dst.len() {
            return Err(CaptureError::BufferSize {
                expected: dst.len(),
                actual: src.len(),
            });
        }
        for (y, src_row) in src.chunks_exact(row).enumerate() {
            let start = (size - 1 - y) * row;
            dst[start..start + row].copy_from_slice(src_row);
        }
        Ok(())
    }

    pub fn texel(&self, face: CubeFace, i: u32, j: u32) -> [u8; 3] {
        texel_in(&self.faces[face.index()], self.size, i, j)
    }

    /// Nearest texel along a world direction.
    pub fn sample(&self, dir: [f32; 3]) -> [u8; 3] {
        let (face, sc, tc) = CubeFace::locate(dir);
        let i = coord_to_texel(sc, self.size);
        let j = coord_to_texel(tc, self.size);
        self.texel(face, i, j)
    }

    /// Blend every border texel with its neighbor across the seam so the
    /// reprojected image shows no visible edges.
    pub fn smooth_edges(&mut self) {
        let n = self.size as i64;
        if n == 0 {
            return;
        }
        let source = self.faces.clone();

        for face in CubeFace::ALL {
            for j in 0..n {
                for i in 0..n {
                    let di = border_step(i, n);
                    let dj = border_step(j, n);
                    if di == 0 && dj == 0 {
                        continue;
                    }
                    // One texel outside this face
                    let sc = 2.0 * ((i + di) as f32 + 0.5) / n as f32 - 1.0;
                    let tc = 2.0 * ((j + dj) as f32 + 0.5) / n as f32 - 1.0;
                    let (neighbor, nsc, ntc) = CubeFace::locate(face.direction(sc, tc));
                    let across = texel_in(
                        &source[neighbor.index()],
                        self.size,
                        coord_to_texel(nsc, self.size),
                        coord_to_texel(ntc, self.size),
                    );
                    let own = texel_in(&source[face.index()], self.size, i as u32, j as u32);

                    let offset = texel_offset(self.size, i as u32, j as u32);
                    let dst = &mut self.faces[face.index()][offset..offset + BYTES_PER_PIXEL];
                    for c in 0..BYTES_PER_PIXEL {
                        dst[c] = ((own[c] as u16 + across[c] as u16) / 2) as u8;
                    }
                }
            }
        }
    }
}

fn border_step(i: i64, n: i64) -> i64 {
    if i == 0 {
        -1
    } else if i == n - 1 {
        1
    } else {
        0
    }
}

fn coord_to_texel(c: f32, size: u32) -> u32 {
    let t = ((c + 1.0) * 0.5 * size as f32).floor();
    (t.max(0.0) as u32).min(size.saturating_sub(1))
}

fn texel_offset(size: u32, i: u32, j: u32) -> usize {
    (j as usize * size as usize + i as usize) * BYTES_PER_PIXEL
}

fn texel_in(face: &[u8], size: u32, i: u32, j: u32) -> [u8; 3] {
    let o = texel_offset(size, i, j);
    [face[o], face[o + 1], face[o + 2]]
}

/// CPU cubemap to equirectangular projection.
pub mod equirect {
    use super::Cubemap;
    use crate::error::CaptureError;
    use crate::frame::BYTES_PER_PIXEL;
    use std::f32::consts::{FRAC_PI_2, PI};

    /// World direction through the center of equirect pixel `(u, v)`, `v`
    /// counted from the top row.
    pub fn direction(u: u32, v: u32, width: u32, height: u32) -> [f32; 3] {
        let lon = (u as f32 + 0.5) / width as f32 * 2.0 * PI - PI;
        let lat = FRAC_PI_2 - (v as f32 + 0.5) / height as f32 * PI;
        [lat.cos() * lon.sin(), lat.sin(), lat.cos() * lon.cos()]
    }

    /// Fill `out` with a `width x height` equirectangular image, rows
    /// bottom-first like a readback.
    pub fn project(
        cubemap: &Cubemap,
        width: u32,
        height: u32,
        out: &mut [u8],
    ) -> Result<(), CaptureError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if out.len() != expected {
            return Err(CaptureError::BufferSize {
                expected,
                actual: out.len(),
            });
        }
        let row = width as usize * BYTES_PER_PIXEL;
        for v in 0..height {
            let start = (height - 1 - v) as usize * row;
            let dst_row = &mut out[start..start + row];
            for u in 0..width {
                let texel = cubemap.sample(direction(u, v, width, height));
                let o = u as usize * BYTES_PER_PIXEL;
                dst_row[o..o + BYTES_PER_PIXEL].copy_from_slice(&texel);
            }
        }
        Ok(())
    }
}

/// Renders the six faces of a panoramic frame and assembles the output image.
pub struct Reprojector {
    projection: PanoramaProjection,
    face_size: u32,
    frame_width: u32,
    frame_height: u32,
    face_target: TargetId,
    frame_target: Option<TargetId>,
    face_buffer: Vec<u8>,
    cubemap: Option<Cubemap>,
}

impl Reprojector {
    /// Allocate the face target (and, for equirectangular output, the frame
    /// target) on the host.
    pub fn new<H: RenderHost + ?Sized>(
        host: &mut H,
        config: &CaptureConfig,
    ) -> Result<Self, CaptureError> {
        let projection = config.projection.ok_or_else(|| {
            CaptureError::InvalidParameters("panorama capture without projection".to_string())
        })?;
        let face_size = config.face_size;

        let face_target =
            host.create_target(&TargetDesc::new(face_size, face_size, config.antialiasing))?;

        let frame_target = match projection {
            PanoramaProjection::Cubemap => None,
            PanoramaProjection::Equirectangular => {
                match host.create_target(&TargetDesc::new(config.width, config.height, 1)) {
                    Ok(target) => Some(target),
                    Err(e) => {
                        host.release_target(face_target);
                        return Err(e);
                    }
                }
            }
        };

        let cubemap = (projection == PanoramaProjection::Equirectangular)
            .then(|| Cubemap::new(face_size));

        debug!(
            "Reprojector ready: {:?}, face {}px, frame {}x{}",
            projection, face_size, config.width, config.height
        );

        Ok(Self {
            projection,
            face_size,
            frame_width: config.width,
            frame_height: config.height,
            face_target,
            frame_target,
            face_buffer: vec![0u8; face_size as usize * face_size as usize * BYTES_PER_PIXEL],
            cubemap,
        })
    }

    pub fn projection(&self) -> PanoramaProjection {
        self.projection
    }

    /// Render all six faces and write the assembled frame (rows bottom-first)
    /// into `frame`.
    pub fn capture<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        frame: &mut [u8],
    ) -> Result<(), CaptureError> {
        let expected = self.frame_width as usize * self.frame_height as usize * BYTES_PER_PIXEL;
        if frame.len() != expected {
            return Err(CaptureError::BufferSize {
                expected,
                actual: frame.len(),
            });
        }

        for face in CubeFace::ALL {
            host.render(self.face_target, Some(face.euler()))?;
            host.read_pixels(
                self.face_target,
                self.face_size,
                self.face_size,
                &mut self.face_buffer,
            )?;
            match self.cubemap.as_mut() {
                Some(cubemap) => cubemap.set_face_mirrored(face, &self.face_buffer)?,
                None => blit_face(
                    frame,
                    self.frame_width,
                    &self.face_buffer,
                    self.face_size,
                    face,
                ),
            }
        }

        if let (Some(cubemap), Some(target)) = (self.cubemap.as_mut(), self.frame_target) {
            cubemap.smooth_edges();
            host.reproject_equirectangular(cubemap, target)?;
            GpuReadback::new(self.frame_width, self.frame_height).read(host, target, frame)?;
        }
        Ok(())
    }

    /// Release host targets. Call once when the session stops.
    pub fn release<H: RenderHost + ?Sized>(&mut self, host: &mut H) {
        host.release_target(self.face_target);
        if let Some(target) = self.frame_target.take() {
            host.release_target(target);
        }
    }
}

/// Copy a bottom-first face readback into its grid cell of a bottom-first
/// `3f x 2f` frame.
fn blit_face(frame: &mut [u8], frame_width: u32, face_pixels: &[u8], size: u32, face: CubeFace) {
    let (col, row_from_top) = face.grid_cell();
    let f = size as usize;
    let face_row = f * BYTES_PER_PIXEL;
    let frame_row = frame_width as usize * BYTES_PER_PIXEL;
    // Bottom-first: the top grid row occupies the upper half of the buffer
    let y0 = (1 - row_from_top) as usize * f;
    let x0 = col as usize * face_row;
    for (y, src) in face_pixels.chunks_exact(face_row).enumerate() {
        let start = (y0 + y) * frame_row + x0;
        frame[start..start + face_row].copy_from_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptureFormat, CaptureSettings, CubemapSize, FrameSize};
    use crate::host::{direction_color, PatternHost};

    fn close(a: [u8; 3], b: [u8; 3], tolerance: i32) -> bool {
        a.iter()
            .zip(b.iter())
            .all(|(&x, &y)| (x as i32 - y as i32).abs() <= tolerance)
    }

    fn pixel_bottom_first(frame: &[u8], width: u32, height: u32, u: u32, v_top: u32) -> [u8; 3] {
        let y = height - 1 - v_top;
        let o = (y as usize * width as usize + u as usize) * BYTES_PER_PIXEL;
        [frame[o], frame[o + 1], frame[o + 2]]
    }

    #[test]
    fn test_face_euler_table() {
        assert_eq!(CubeFace::PositiveX.euler(), EulerAngles::new(0.0, 90.0, 0.0));
        assert_eq!(CubeFace::NegativeY.euler(), EulerAngles::new(90.0, 0.0, 0.0));
        assert_eq!(CubeFace::NegativeZ.euler(), EulerAngles::new(0.0, 180.0, 0.0));
        for face in CubeFace::ALL {
            assert_eq!(CubeFace::from_euler(face.euler()), Some(face));
        }
        assert_eq!(
            CubeFace::from_euler(EulerAngles::new(0.0, 270.0, 0.0)),
            Some(CubeFace::NegativeX)
        );
        assert_eq!(CubeFace::from_euler(EulerAngles::new(10.0, 0.0, 0.0)), None);
    }

    #[test]
    fn test_locate_inverts_direction() {
        let coords = [-0.9f32, -0.3, 0.0, 0.4, 0.85];
        for face in CubeFace::ALL {
            for &sc in &coords {
                for &tc in &coords {
                    let (found, s, t) = CubeFace::locate(face.direction(sc, tc));
                    assert_eq!(found, face);
                    assert!((s - sc).abs() < 1e-5 && (t - tc).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_set_face_mirrored_flips_rows() {
        let size = 4u32;
        let mut cubemap = Cubemap::new(size);
        // Every byte of row y holds y
        let src: Vec<u8> = (0..size)
            .flat_map(|y| std::iter::repeat(y as u8).take(size as usize * 3))
            .collect();
        cubemap.set_face_mirrored(CubeFace::NegativeZ, &src).unwrap();
        for y in 0..size {
            for x in 0..size {
                let texel = cubemap.texel(CubeFace::NegativeZ, x, y);
                assert_eq!(texel, [(size - 1 - y) as u8; 3]);
            }
        }
        assert!(cubemap.set_face_mirrored(CubeFace::PositiveX, &src[1..]).is_err());
    }

    #[test]
    fn test_smooth_edges_blends_across_seam() {
        let size = 8u32;
        let mut cubemap = Cubemap::new(size);
        for face in CubeFace::ALL {
            let color = match face {
                CubeFace::PositiveZ => [200, 0, 0],
                CubeFace::PositiveX => [0, 0, 100],
                _ => [0, 0, 0],
            };
            for texel in cubemap.face_mut(face).chunks_exact_mut(3) {
                texel.copy_from_slice(&color);
            }
        }
        cubemap.smooth_edges();

        // +Z right edge meets +X left edge
        assert_eq!(cubemap.texel(CubeFace::PositiveZ, size - 1, 3), [100, 0, 50]);
        assert_eq!(cubemap.texel(CubeFace::PositiveX, 0, 3), [100, 0, 50]);
        // Interior untouched
        assert_eq!(cubemap.texel(CubeFace::PositiveZ, 3, 3), [200, 0, 0]);
        // +Z left edge meets -X, which is black
        assert_eq!(cubemap.texel(CubeFace::PositiveZ, 0, 3), [100, 0, 0]);
    }

    #[test]
    fn test_cubemap_grid_layout() {
        let settings = CaptureSettings {
            format: CaptureFormat::Panorama,
            projection: PanoramaProjection::Cubemap,
            cubemap_size: CubemapSize::Face512,
            ..Default::default()
        };
        let mut config = settings.resolve((640, 480)).unwrap();
        // Small faces keep the test fast
        config.face_size = 16;
        config.width = 48;
        config.height = 32;

        let mut host = PatternHost::new(640, 480);
        let mut reprojector = Reprojector::new(&mut host, &config).unwrap();
        let mut frame = vec![0u8; 48 * 32 * 3];
        reprojector.capture(&mut host, &mut frame).unwrap();

        for face in CubeFace::ALL {
            let (col, row) = face.grid_cell();
            let center = pixel_bottom_first(&frame, 48, 32, col * 16 + 8, row * 16 + 8);
            let expected = direction_color(face.direction(0.0, 0.0));
            assert!(
                close(center, expected, 20),
                "{:?}: {:?} vs {:?}",
                face,
                center,
                expected
            );
        }

        reprojector.release(&mut host);
        assert_eq!(host.live_targets(), 0);
    }

    #[test]
    fn test_equirectangular_projection() {
        let settings = CaptureSettings {
            format: CaptureFormat::Panorama,
            projection: PanoramaProjection::Equirectangular,
            frame_size: FrameSize::Sd640x480,
            ..Default::default()
        };
        let mut config = settings.resolve((640, 480)).unwrap();
        config.face_size = 32;
        config.width = 64;
        config.height = 32;

        let mut host = PatternHost::new(640, 480);
        let mut reprojector = Reprojector::new(&mut host, &config).unwrap();
        assert_eq!(host.live_targets(), 2);

        let mut frame = vec![0u8; 64 * 32 * 3];
        reprojector.capture(&mut host, &mut frame).unwrap();

        // Center looks forward, three quarters across looks right, top row looks up
        let forward = pixel_bottom_first(&frame, 64, 32, 32, 16);
        assert!(close(forward, direction_color([0.0, 0.0, 1.0]), 25));
        let right = pixel_bottom_first(&frame, 64, 32, 48, 16);
        assert!(close(right, direction_color([1.0, 0.0, 0.0]), 25));
        let up = pixel_bottom_first(&frame, 64, 32, 10, 0);
        assert!(close(up, direction_color([0.0, 1.0, 0.0]), 25));

        reprojector.release(&mut host);
        assert_eq!(host.live_targets(), 0);
    }

    #[test]
    fn test_project_rejects_wrong_size() {
        let cubemap = Cubemap::new(4);
        let mut out = vec![0u8; 10];
        assert!(equirect::project(&cubemap, 8, 4, &mut out).is_err());
    }
}
