use {bytes::Bytes, std::collections::VecDeque};

/// Per-SSRC retransmission buffer: the last `capacity` marshalled RTP
/// packets, looked up by sequence number when a NACK arrives.
pub struct RtpSendHistory {
    capacity: usize,
    packets: VecDeque<(u16, Bytes)>,
}

impl RtpSendHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            packets: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, sequence_number: u16, wire: Bytes) {
        if self.packets.len() >= self.capacity {
            self.packets.pop_front();
        }
        self.packets.push_back((sequence_number, wire));
    }

    #[must_use]
    pub fn get(&self, sequence_number: u16) -> Option<Bytes> {
        self.packets
            .iter()
            .rev()
            .find(|(seq, _)| *seq == sequence_number)
            .map(|(_, wire)| wire.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_eviction() {
        let mut history = RtpSendHistory::new(3);
        for seq in 0u16..5 {
            history.record(seq, Bytes::from(vec![seq as u8]));
        }
        assert!(history.get(0).is_none());
        assert!(history.get(1).is_none());
        assert_eq!(history.get(4).unwrap()[0], 4);
        assert_eq!(history.len(), 3);
    }
}
