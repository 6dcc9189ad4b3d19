use {
    parking_lot::{Condvar, Mutex},
    std::collections::VecDeque,
    std::sync::atomic::{AtomicBool, AtomicU64, Ordering},
    std::time::Duration,
};

/// Items a stage queue can apply the keyframe-protection rule to.
pub trait QueueItem {
    fn is_key(&self) -> bool {
        false
    }
}

impl QueueItem for crate::media::MediaPacket {
    fn is_key(&self) -> bool {
        crate::media::MediaPacket::is_key(self)
    }
}

impl QueueItem for crate::media::MediaFrame {}

impl QueueItem for std::sync::Arc<crate::media::MediaPacket> {
    fn is_key(&self) -> bool {
        crate::media::MediaPacket::is_key(self)
    }
}

/// Bounded inter-stage FIFO: mutex + condvar, with the transcoder's drop
/// discipline. When full, a pushing thread waits up to its budget, then
/// evicts the oldest non-key item to make room; key frames are only
/// evicted when the queue holds nothing else.
pub struct StageQueue<T> {
    buffer: Mutex<VecDeque<T>>,
    capacity: usize,
    killed: AtomicBool,
    dropped: AtomicU64,
    readable: Condvar,
    writable: Condvar,
}

impl<T: QueueItem> StageQueue<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            killed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Push from a stage thread: block up to `budget` for space, then
    /// evict per the drop discipline.
    pub fn push_with_budget(&self, item: T, budget: Duration) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            let _ = self.writable.wait_for(&mut buffer, budget);
        }
        if self.killed.load(Ordering::Acquire) {
            return;
        }
        if buffer.len() >= self.capacity {
            Self::evict(&mut buffer);
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(item);
        drop(buffer);
        self.readable.notify_one();
    }

    /// Push from async context: never waits, evicts immediately on full.
    pub fn push_nonblocking(&self, item: T) {
        if self.killed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.capacity {
                Self::evict(&mut buffer);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            buffer.push_back(item);
        }
        self.readable.notify_one();
    }

    fn evict(buffer: &mut VecDeque<T>) {
        if let Some(pos) = buffer.iter().position(|item| !item.is_key()) {
            buffer.remove(pos);
        } else {
            buffer.pop_front();
        }
    }

    /// Block until an item arrives; `None` once the queue is killed.
    pub fn pop(&self) -> Option<T> {
        let mut buffer = self.buffer.lock();
        loop {
            if self.killed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(item) = buffer.pop_front() {
                drop(buffer);
                self.writable.notify_one();
                return Some(item);
            }
            self.readable.wait(&mut buffer);
        }
    }

    /// Idempotent: flips the kill flag and wakes every waiter.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CodecId, MediaPacket, PacketFlag, Timebase};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn packet(pts: i64, key: bool) -> MediaPacket {
        MediaPacket {
            track_id: 0,
            codec_id: CodecId::H264,
            data: Bytes::new(),
            pts,
            dts: pts,
            duration: 33,
            timebase: Timebase::new(1, 1000),
            flag: if key { PacketFlag::Key } else { PacketFlag::Delta },
            fragmentation: None,
        }
    }

    #[test]
    fn test_keyframe_survives_eviction() {
        let queue = StageQueue::new(2);
        queue.push_nonblocking(packet(0, true));
        queue.push_nonblocking(packet(33, false));
        queue.push_nonblocking(packet(66, false)); // evicts pts=33, not the key
        assert_eq!(queue.dropped(), 1);

        assert!(queue.pop().unwrap().is_key());
        assert_eq!(queue.pop().unwrap().pts, 66);
    }

    #[test]
    fn test_all_key_queue_evicts_head() {
        let queue = StageQueue::new(2);
        queue.push_nonblocking(packet(0, true));
        queue.push_nonblocking(packet(33, true));
        queue.push_nonblocking(packet(66, true));
        assert_eq!(queue.pop().unwrap().pts, 33);
    }

    #[test]
    fn test_kill_unblocks_pop() {
        let queue: Arc<StageQueue<MediaPacket>> = Arc::new(StageQueue::new(2));
        let popper = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop())
        };
        std::thread::sleep(Duration::from_millis(50));
        queue.kill();
        assert!(popper.join().unwrap().is_none());
        queue.kill(); // idempotent
    }

    #[test]
    fn test_budget_push_makes_room() {
        let queue = StageQueue::new(1);
        queue.push_nonblocking(packet(0, false));
        queue.push_with_budget(packet(33, false), Duration::from_millis(20));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().pts, 33);
    }
}
