//! Frame hand-off from the render thread to the encoder worker.
//!
//! A FIFO of [`FrameUnit`]s guarded by a single mutex, with condition
//! variables so the worker can sleep until frames arrive and, under the
//! blocking policy, the producer can wait for room.

use crate::frame::FrameUnit;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

/// Default number of frames held before the backpressure policy applies
/// (a little over two seconds at 30 fps).
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// What happens when the encoder falls behind the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Never limit the queue. Memory grows without bound if the encoder stalls.
    Unbounded,
    /// Drop the oldest queued image when full. Its repeat count is carried
    /// into the next queued frame so the output duration is unchanged.
    DropOldest { capacity: usize },
    /// Block the producer until the worker makes room.
    BlockProducer { capacity: usize },
}

impl Default for QueuePolicy {
    fn default() -> Self {
        QueuePolicy::DropOldest {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl QueuePolicy {
    fn capacity(self) -> Option<usize> {
        match self {
            QueuePolicy::Unbounded => None,
            QueuePolicy::DropOldest { capacity } | QueuePolicy::BlockProducer { capacity } => {
                Some(capacity.max(1))
            }
        }
    }
}

/// Result of pushing a frame.
#[derive(Debug)]
pub enum PushOutcome {
    Queued,
    /// The oldest frame was dropped to make room; its buffer is handed back
    /// so it can be returned to the pool.
    DroppedOldest { buffer: Vec<u8> },
}

struct QueueInner {
    frames: Mutex<VecDeque<FrameUnit>>,
    not_empty: Condvar,
    not_full: Condvar,
    policy: QueuePolicy,
    closed: AtomicBool,
    dropped: AtomicU64,
}

/// Thread-safe FIFO of captured frames. Clones share the same queue.
#[derive(Clone)]
pub struct FrameQueue {
    inner: Arc<QueueInner>,
}

impl FrameQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                frames: Mutex::new(VecDeque::new()),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                policy,
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FrameUnit>> {
        self.inner
            .frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn policy(&self) -> QueuePolicy {
        self.inner.policy
    }

    /// Producer: append a frame, applying the backpressure policy.
    pub fn try_push(&self, unit: FrameUnit) -> PushOutcome {
        let mut frames = self.lock();
        let mut outcome = PushOutcome::Queued;

        if let Some(capacity) = self.inner.policy.capacity() {
            match self.inner.policy {
                QueuePolicy::BlockProducer { .. } => {
                    while frames.len() >= capacity && !self.inner.closed.load(Ordering::SeqCst) {
                        frames = self
                            .inner
                            .not_full
                            .wait(frames)
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                    }
                }
                _ => {
                    if frames.len() >= capacity {
                        if let Some(oldest) = frames.pop_front() {
                            let dropped = self.inner.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                            if dropped == 1 || dropped.is_power_of_two() {
                                warn!(
                                    "Encoder falling behind, dropped {} frame(s) so far",
                                    dropped
                                );
                            }
                            let carry = oldest.repeat_count;
                            match frames.front_mut() {
                                Some(next) => {
                                    next.repeat_count = next.repeat_count.saturating_add(carry)
                                }
                                None => {
                                    // Capacity of one: fold into the incoming frame
                                    return self.push_locked(
                                        frames,
                                        FrameUnit::new(
                                            unit.pixels,
                                            unit.repeat_count.saturating_add(carry),
                                        ),
                                        PushOutcome::DroppedOldest {
                                            buffer: oldest.pixels,
                                        },
                                    );
                                }
                            }
                            outcome = PushOutcome::DroppedOldest {
                                buffer: oldest.pixels,
                            };
                        }
                    }
                }
            }
        }

        self.push_locked(frames, unit, outcome)
    }

    fn push_locked(
        &self,
        mut frames: MutexGuard<'_, VecDeque<FrameUnit>>,
        unit: FrameUnit,
        outcome: PushOutcome,
    ) -> PushOutcome {
        frames.push_back(unit);
        drop(frames);
        self.inner.not_empty.notify_one();
        outcome
    }

    /// Consumer: take the oldest frame if any.
    pub fn try_pop(&self) -> Option<FrameUnit> {
        let unit = self.lock().pop_front();
        if unit.is_some() {
            self.inner.not_full.notify_one();
        }
        unit
    }

    /// Consumer: take the oldest frame, waiting up to `timeout` for one to
    /// arrive. Returns early when woken by [`FrameQueue::close`].
    pub fn pop_timeout(&self, timeout: Duration) -> Option<FrameUnit> {
        let mut frames = self.lock();
        if frames.is_empty() && !self.inner.closed.load(Ordering::SeqCst) {
            frames = self
                .inner
                .not_empty
                .wait_timeout(frames, timeout)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        let unit = frames.pop_front();
        drop(frames);
        if unit.is_some() {
            self.inner.not_full.notify_one();
        }
        unit
    }

    /// Called on stop. Producers no longer block and a waiting consumer
    /// wakes; frames already queued can still be popped.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.not_full.notify_all();
        self.inner.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Frames dropped by the drop-oldest policy since creation.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped.load(Ordering::SeqCst)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn unit(tag: u8, repeat: u32) -> FrameUnit {
        FrameUnit::new(vec![tag; 3], repeat)
    }

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new(QueuePolicy::Unbounded);
        for tag in 0..5 {
            queue.try_push(unit(tag, 1));
        }
        let tags: Vec<u8> = std::iter::from_fn(|| queue.try_pop())
            .map(|u| u.pixels[0])
            .collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4]);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_fifo_order_with_interleaving() {
        let queue = FrameQueue::new(QueuePolicy::Unbounded);
        let mut popped = Vec::new();
        let mut next = 0u8;
        // push 2, pop 1, repeated, then empty the rest
        for _ in 0..10 {
            queue.try_push(unit(next, 1));
            queue.try_push(unit(next + 1, 1));
            next += 2;
            popped.push(queue.try_pop().unwrap().pixels[0]);
        }
        while let Some(u) = queue.try_pop() {
            popped.push(u.pixels[0]);
        }
        assert_eq!(popped, (0..20).collect::<Vec<u8>>());
    }

    #[test]
    fn test_fifo_order_across_threads() {
        let queue = FrameQueue::new(QueuePolicy::Unbounded);
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            for tag in 0..200u32 {
                producer.try_push(FrameUnit::new(tag.to_le_bytes().to_vec(), 1));
            }
        });

        let mut received = Vec::new();
        while received.len() < 200 {
            if let Some(u) = queue.pop_timeout(Duration::from_millis(10)) {
                received.push(u32::from_le_bytes(u.pixels[..4].try_into().unwrap()));
            }
        }
        handle.join().unwrap();
        assert_eq!(received, (0..200).collect::<Vec<u32>>());
    }

    #[test]
    fn test_drop_oldest_preserves_duration() {
        let queue = FrameQueue::new(QueuePolicy::DropOldest { capacity: 2 });
        assert!(matches!(queue.try_push(unit(0, 2)), PushOutcome::Queued));
        assert!(matches!(queue.try_push(unit(1, 1)), PushOutcome::Queued));
        match queue.try_push(unit(2, 3)) {
            PushOutcome::DroppedOldest { buffer } => assert_eq!(buffer, vec![0; 3]),
            other => panic!("expected drop, got {:?}", other),
        }
        assert_eq!(queue.dropped_frames(), 1);

        let remaining: Vec<(u8, u32)> = std::iter::from_fn(|| queue.try_pop())
            .map(|u| (u.pixels[0], u.repeat_count))
            .collect();
        assert_eq!(remaining, vec![(1, 3), (2, 3)]);
    }

    #[test]
    fn test_drop_oldest_capacity_one_folds_into_incoming() {
        let queue = FrameQueue::new(QueuePolicy::DropOldest { capacity: 1 });
        queue.try_push(unit(0, 2));
        queue.try_push(unit(1, 1));
        let only = queue.try_pop().unwrap();
        assert_eq!((only.pixels[0], only.repeat_count), (1, 3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_block_producer_waits_for_room() {
        let queue = FrameQueue::new(QueuePolicy::BlockProducer { capacity: 1 });
        queue.try_push(unit(0, 1));

        let producer = queue.clone();
        let handle = thread::spawn(move || {
            producer.try_push(unit(1, 1));
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop().unwrap().pixels[0], 0);
        handle.join().unwrap();
        assert_eq!(queue.try_pop().unwrap().pixels[0], 1);
    }

    #[test]
    fn test_close_releases_blocked_producer() {
        let queue = FrameQueue::new(QueuePolicy::BlockProducer { capacity: 1 });
        queue.try_push(unit(0, 1));

        let producer = queue.clone();
        let handle = thread::spawn(move || {
            producer.try_push(unit(1, 1));
        });
        thread::sleep(Duration::from_millis(20));
        queue.close();
        handle.join().unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_pop_timeout_returns_none_when_empty() {
        let queue = FrameQueue::new(QueuePolicy::default());
        let start = std::time::Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_closed_queue_keeps_queued_frames() {
        let queue = FrameQueue::new(QueuePolicy::BlockProducer { capacity: 1 });
        queue.try_push(unit(0, 1));
        queue.close();
        // No longer blocks once closed
        queue.try_push(unit(1, 1));
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)).unwrap().pixels[0], 0);
        assert_eq!(queue.try_pop().unwrap().pixels[0], 1);
        assert!(queue.is_empty());

        let start = std::time::Instant::now();
        assert!(queue.pop_timeout(Duration::from_secs(30)).is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
