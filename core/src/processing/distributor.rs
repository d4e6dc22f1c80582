use crate::source::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A published frame together with the generation it was published under.
#[derive(Debug)]
pub struct FrameSnapshot {
    pub generation: u64,
    pub frame: Frame,
}

/// Owns the most recent frame. Publishing replaces it; nothing is queued.
///
/// The lock is held only to swap or clone the `Arc`, so readers never stall the
/// acquisition thread and a slow reader simply misses intermediate generations.
pub struct FrameDistributor {
    slot: Mutex<Option<Arc<FrameSnapshot>>>,
    generation: AtomicU64,
    published: Condvar,
}

impl FrameDistributor {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
            published: Condvar::new(),
        }
    }

    pub fn publish(&self, frame: Frame) -> Arc<FrameSnapshot> {
        let snapshot = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            let generation = self.generation.load(Ordering::Acquire) + 1;
            let snapshot = Arc::new(FrameSnapshot { generation, frame });
            *slot = Some(snapshot.clone());
            self.generation.store(generation, Ordering::Release);
            snapshot
        };
        self.published.notify_all();
        snapshot
    }

    pub fn current(&self) -> Option<Arc<FrameSnapshot>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for a frame newer than `after`.
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<Arc<FrameSnapshot>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(snapshot) = slot.as_ref().filter(|s| s.generation > after) {
                return Some(snapshot.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = self
                .published
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Drops the held frame. The generation counter keeps counting from where it was.
    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Default for FrameDistributor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ByteOrganization, FrameGeometry};
    use std::thread;

    fn frame(value: u16) -> Frame {
        Frame::filled(FrameGeometry::new(4, 2, ByteOrganization::Bil), value)
    }

    #[test]
    fn publish_replaces_frame_and_bumps_generation() {
        let distributor = FrameDistributor::new();
        assert!(distributor.current().is_none());
        distributor.publish(frame(1));
        let held = distributor.current().unwrap();
        distributor.publish(frame(2));
        assert_eq!(held.generation, 1);
        assert_eq!(held.frame.samples()[0], 1);
        let latest = distributor.current().unwrap();
        assert_eq!(latest.generation, 2);
        assert_eq!(latest.frame.samples()[0], 2);
    }

    #[test]
    fn concurrent_readers_see_whole_frames_and_rising_generations() {
        let distributor = Arc::new(FrameDistributor::new());
        let reader = {
            let distributor = distributor.clone();
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..2_000 {
                    if let Some(snapshot) = distributor.current() {
                        assert!(snapshot.generation >= last);
                        last = snapshot.generation;
                        let first = snapshot.frame.samples()[0];
                        assert!(snapshot.frame.samples().iter().all(|&v| v == first));
                    }
                }
            })
        };
        for value in 0..500u16 {
            distributor.publish(frame(value));
        }
        reader.join().unwrap();
        assert_eq!(distributor.generation(), 500);
    }

    #[test]
    fn wait_newer_times_out_without_publish() {
        let distributor = FrameDistributor::new();
        distributor.publish(frame(0));
        assert!(distributor
            .wait_newer(1, Duration::from_millis(10))
            .is_none());
        assert!(distributor
            .wait_newer(0, Duration::from_millis(10))
            .is_some());
    }
}
