//! Captured frame units and the reusable pixel buffer pool.

use std::sync::{Arc, Mutex};

/// Bytes per pixel of captured frames (packed RGB, no padding).
pub const BYTES_PER_PIXEL: usize = 3;

/// One captured image plus the number of output frames it represents.
#[derive(Debug)]
pub struct FrameUnit {
    /// RGB pixel data, rows bottom-first (GPU readback order)
    pub pixels: Vec<u8>,
    /// Number of encoded frames this image stands for (always >= 1)
    pub repeat_count: u32,
}

impl FrameUnit {
    pub fn new(pixels: Vec<u8>, repeat_count: u32) -> Self {
        Self {
            pixels,
            repeat_count,
        }
    }
}

/// Pool of frame-sized buffers shared by the producer and the encoder worker.
///
/// The producer checks a buffer out for each readback; the worker checks it
/// back in after the encoder consumed it. Buffers beyond `capacity` are
/// released instead of retained.
#[derive(Debug, Clone)]
pub struct FrameBufferPool {
    free: Arc<Mutex<Vec<Vec<u8>>>>,
    frame_size: usize,
    capacity: usize,
}

impl FrameBufferPool {
    /// Create a pool for frames of `width * height` RGB pixels.
    pub fn new(width: u32, height: u32, capacity: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
            frame_size: width as usize * height as usize * BYTES_PER_PIXEL,
            capacity,
        }
    }

    /// Expected size in bytes of every buffer from this pool.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Take a buffer of exactly `frame_size` bytes.
    /// Contents of reused buffers are stale and must be overwritten.
    pub fn checkout(&self) -> Vec<u8> {
        let reused = self
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop());
        match reused {
            Some(buffer) => buffer,
            None => vec![0u8; self.frame_size],
        }
    }

    /// Return a buffer to the pool. Buffers of the wrong size are dropped.
    pub fn checkin(&self, buffer: Vec<u8>) {
        if buffer.len() != self.frame_size {
            return;
        }
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.capacity {
                free.push(buffer);
            }
        }
    }

    /// Number of idle buffers currently held.
    pub fn available(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }
}

/// Mirror an image vertically: row `y` of `src` becomes row `height - 1 - y`
/// of `dst`.
pub fn flip_rows(src: &[u8], dst: &mut [u8], width: u32, height: u32) {
    let row_size = width as usize * BYTES_PER_PIXEL;
    let total = row_size * height as usize;
    for (i, row) in src[..total].chunks_exact(row_size).enumerate() {
        let dest_start = (height as usize - 1 - i) * row_size;
        dst[dest_start..dest_start + row_size].copy_from_slice(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_allocates_frame_sized_buffers() {
        let pool = FrameBufferPool::new(4, 2, 2);
        assert_eq!(pool.frame_size(), 24);
        assert_eq!(pool.checkout().len(), 24);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_checkin_reuses_buffers() {
        let pool = FrameBufferPool::new(2, 2, 2);
        let mut buffer = pool.checkout();
        buffer[0] = 42;
        pool.checkin(buffer);
        assert_eq!(pool.available(), 1);

        let reused = pool.checkout();
        assert_eq!(reused[0], 42);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_checkin_respects_capacity_and_size() {
        let pool = FrameBufferPool::new(2, 2, 1);
        pool.checkin(vec![0u8; 12]);
        pool.checkin(vec![0u8; 12]);
        assert_eq!(pool.available(), 1);

        pool.checkout();
        pool.checkin(vec![0u8; 5]);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_flip_rows() {
        // 1x3 image, one pixel per row
        let src = [1, 1, 1, 2, 2, 2, 3, 3, 3];
        let mut dst = [0u8; 9];
        flip_rows(&src, &mut dst, 1, 3);
        assert_eq!(dst, [3, 3, 3, 2, 2, 2, 1, 1, 1]);
    }
}
