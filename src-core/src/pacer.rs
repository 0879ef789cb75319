//! Converts variable render-loop time into a fixed output framerate.
//!
//! The host renders at whatever rate it can; the encoder wants exactly
//! `fps` frames per second of wall-clock time. Instead of capturing every
//! rendered frame, the pacer counts how many output frames are due and
//! captures one image whenever at least one new frame is owed. The image is
//! then emitted with a repeat count covering every frame owed since the last
//! capture, so a slow host stretches one image over several output frames
//! rather than stalling or drifting.

/// Tolerance in frames against floating-point accumulation error, so that
/// e.g. two ticks of 1/60 s at 30 fps count as exactly one frame.
const DUE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct FramePacer {
    framerate: u32,
    /// Clamp applied to each delta in offline-render mode
    max_delta: Option<f64>,
    capturing_time: f64,
    captured_frame_count: u64,
    in_flight: bool,
}

impl FramePacer {
    pub fn new(framerate: u32) -> Self {
        Self {
            framerate: framerate.max(1),
            max_delta: None,
            capturing_time: 0.0,
            captured_frame_count: 0,
            in_flight: false,
        }
    }

    /// Offline rendering: every tick accounts for at most one output frame,
    /// so a renderer slower than real time still yields one image per frame.
    pub fn offline(framerate: u32) -> Self {
        let mut pacer = Self::new(framerate);
        pacer.max_delta = Some(1.0 / pacer.framerate as f64);
        pacer
    }

    /// Account for one render tick of `delta` seconds.
    ///
    /// Returns true when a capture should be triggered: more frames are due
    /// than have been captured and no capture is currently in flight.
    pub fn advance(&mut self, delta: f64) -> bool {
        let mut delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };
        if let Some(max) = self.max_delta {
            delta = delta.min(max);
        }
        self.capturing_time += delta;
        self.is_due()
    }

    /// Whether a capture should be triggered now.
    pub fn is_due(&self) -> bool {
        !self.in_flight && self.frames_due() > self.captured_frame_count
    }

    /// Total output frames owed since the session started.
    pub fn frames_due(&self) -> u64 {
        (self.capturing_time * self.framerate as f64 + DUE_EPSILON).floor() as u64
    }

    /// Mark a capture as in flight until `complete_capture` or `cancel_capture`.
    pub fn begin_capture(&mut self) {
        self.in_flight = true;
    }

    /// Finish the in-flight capture and return its repeat count.
    ///
    /// The count covers every frame owed since the previous capture; zero
    /// means nothing is owed and the image should not be emitted.
    pub fn complete_capture(&mut self) -> u32 {
        self.in_flight = false;
        let due = self.frames_due();
        let repeat = due.saturating_sub(self.captured_frame_count);
        self.captured_frame_count = self.captured_frame_count.max(due);
        u32::try_from(repeat).unwrap_or(u32::MAX)
    }

    /// Abandon the in-flight capture without consuming any owed frames.
    pub fn cancel_capture(&mut self) {
        self.in_flight = false;
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn captured_frame_count(&self) -> u64 {
        self.captured_frame_count
    }

    pub fn capturing_time(&self) -> f64 {
        self.capturing_time
    }

    pub fn framerate(&self) -> u32 {
        self.framerate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random deltas between 1 ms and ~100 ms.
    fn jittery_deltas(count: usize, mut seed: u64) -> Vec<f64> {
        (0..count)
            .map(|_| {
                seed = seed
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                0.001 + ((seed >> 33) % 100_000) as f64 / 1_000_000.0
            })
            .collect()
    }

    fn run(pacer: &mut FramePacer, deltas: &[f64]) -> (u64, Vec<u64>) {
        let mut repeat_sum = 0u64;
        let mut counts = Vec::new();
        for &dt in deltas {
            if pacer.advance(dt) {
                pacer.begin_capture();
                repeat_sum += pacer.complete_capture() as u64;
            }
            counts.push(pacer.captured_frame_count());
        }
        (repeat_sum, counts)
    }

    #[test]
    fn test_two_to_one_render_ratio() {
        let mut pacer = FramePacer::new(30);
        let mut triggers = 0;
        let mut repeats = Vec::new();
        for _ in 0..10 {
            if pacer.advance(1.0 / 60.0) {
                triggers += 1;
                pacer.begin_capture();
                repeats.push(pacer.complete_capture());
            }
        }
        assert_eq!(triggers, 5);
        assert_eq!(repeats, vec![1; 5]);
        assert_eq!(pacer.captured_frame_count(), 5);
    }

    #[test]
    fn test_slow_host_coalesces_frames() {
        let mut pacer = FramePacer::new(30);
        assert!(pacer.advance(0.1));
        pacer.begin_capture();
        assert_eq!(pacer.complete_capture(), 3);
        assert!(pacer.advance(0.25));
        pacer.begin_capture();
        assert_eq!(pacer.complete_capture(), 7);
    }

    #[test]
    fn test_repeat_sum_matches_elapsed_time() {
        for (seed, fps) in [(1u64, 30u32), (7, 24), (42, 60), (99, 18), (1234, 45)] {
            let deltas = jittery_deltas(500, seed);
            let mut pacer = FramePacer::new(fps);
            let (repeat_sum, counts) = run(&mut pacer, &deltas);

            let total: f64 = deltas.iter().sum();
            let expected = (total * fps as f64 + DUE_EPSILON).floor() as u64;
            assert_eq!(repeat_sum, expected, "seed {} fps {}", seed, fps);
            assert!(counts.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_in_flight_blocks_second_trigger() {
        let mut pacer = FramePacer::new(30);
        assert!(pacer.advance(0.05));
        pacer.begin_capture();
        assert!(!pacer.advance(0.05));
        assert!(pacer.in_flight());
        // Frames owed while in flight are folded into the pending capture
        assert_eq!(pacer.complete_capture(), 3);
        assert!(!pacer.is_due());
    }

    #[test]
    fn test_cancel_keeps_frames_owed() {
        let mut pacer = FramePacer::new(30);
        assert!(pacer.advance(0.04));
        pacer.begin_capture();
        pacer.cancel_capture();
        assert_eq!(pacer.captured_frame_count(), 0);
        assert!(pacer.is_due());
    }

    #[test]
    fn test_offline_mode_clamps_delta() {
        let mut pacer = FramePacer::offline(30);
        assert!(pacer.advance(2.0));
        pacer.begin_capture();
        assert_eq!(pacer.complete_capture(), 1);
    }

    #[test]
    fn test_negative_and_nan_deltas_are_ignored() {
        let mut pacer = FramePacer::new(30);
        assert!(!pacer.advance(-1.0));
        assert!(!pacer.advance(f64::NAN));
        assert_eq!(pacer.capturing_time(), 0.0);
    }
}
