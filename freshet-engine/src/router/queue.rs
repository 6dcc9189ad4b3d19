use {
    super::define::OverflowPolicy,
    crate::media::SharedMediaPacket,
    parking_lot::Mutex,
    std::collections::VecDeque,
    std::sync::atomic::{AtomicBool, AtomicU64, Ordering},
    tokio::sync::Notify,
};

/// Bounded per-observer inbound queue.
///
/// `push` never suspends: the dispatcher calls it on the fan-out path and
/// the configured [`OverflowPolicy`] decides which packet loses when the
/// queue is full. The observer side awaits `recv`.
pub struct PacketQueue {
    buffer: Mutex<VecDeque<SharedMediaPacket>>,
    capacity: usize,
    policy: OverflowPolicy,
    closed: AtomicBool,
    dropped: AtomicU64,
    notify: Notify,
}

impl PacketQueue {
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueue without blocking. Returns `false` if a packet was dropped
    /// (either the incoming one or the evicted head, per policy).
    pub fn push(&self, packet: SharedMediaPacket) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let mut kept = true;
        {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::DropNewest => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return false;
                    }
                    OverflowPolicy::DropOldest => {
                        buffer.pop_front();
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        kept = false;
                    }
                }
            }
            buffer.push_back(packet);
        }
        self.notify.notify_one();
        kept
    }

    /// Await the next packet; `None` after `close` once the queue drains.
    pub async fn recv(&self) -> Option<SharedMediaPacket> {
        loop {
            // Register interest before the emptiness check so a push
            // between the check and the await cannot be missed.
            let notified = self.notify.notified();

            if let Some(packet) = self.buffer.lock().pop_front() {
                return Some(packet);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
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

    fn packet(pts: i64) -> SharedMediaPacket {
        Arc::new(MediaPacket {
            track_id: 0,
            codec_id: CodecId::H264,
            data: Bytes::from_static(b"x"),
            pts,
            dts: pts,
            duration: 33,
            timebase: Timebase::new(1, 1000),
            flag: PacketFlag::Delta,
            fragmentation: None,
        })
    }

    #[tokio::test]
    async fn test_drop_newest_keeps_head() {
        let queue = PacketQueue::new(2, OverflowPolicy::DropNewest);
        assert!(queue.push(packet(0)));
        assert!(queue.push(packet(1)));
        assert!(!queue.push(packet(2)));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.recv().await.unwrap().pts, 0);
        assert_eq!(queue.recv().await.unwrap().pts, 1);
    }

    #[tokio::test]
    async fn test_drop_oldest_evicts_head() {
        let queue = PacketQueue::new(2, OverflowPolicy::DropOldest);
        queue.push(packet(0));
        queue.push(packet(1));
        queue.push(packet(2));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.recv().await.unwrap().pts, 1);
        assert_eq!(queue.recv().await.unwrap().pts, 2);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = PacketQueue::new(4, OverflowPolicy::DropNewest);
        queue.push(packet(7));
        queue.close();
        assert_eq!(queue.recv().await.unwrap().pts, 7);
        assert!(queue.recv().await.is_none());
        assert!(!queue.push(packet(8)));
    }
}
