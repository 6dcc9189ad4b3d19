use {
    crate::media::StreamInfo,
    bytes::Bytes,
    parking_lot::RwLock,
    std::collections::{HashMap, VecDeque},
    std::sync::Arc,
    std::time::Instant,
    tokio::sync::broadcast,
};

/// One finished media segment in the per-stream ring.
#[derive(Debug, Clone)]
pub struct SegmentData {
    pub sequence_number: u64,
    /// Duration in milliseconds of target time.
    pub duration: u64,
    pub name: String,
    pub data: Bytes,
    pub created_at: Instant,
}

/// In-flight CMAF chunk pushed to low-latency clients mid-segment.
#[derive(Debug, Clone)]
pub struct CmafChunk {
    pub segment_name: String,
    pub data: Bytes,
    pub last: bool,
}

struct StoreState {
    segments: VecDeque<SegmentData>,
    /// Playlist text regenerated atomically with every ring change, so a
    /// name advertised to a client always has materialized bytes.
    playlist: Option<String>,
    /// Init segments and other fixed files (fMP4 delivery).
    files: HashMap<String, Bytes>,
}

/// Per-stream segment cache: a ring of `capacity` entries plus the
/// playlist view over it.
pub struct StreamStore {
    pub info: Arc<StreamInfo>,
    capacity: usize,
    state: RwLock<StoreState>,
    chunk_sender: broadcast::Sender<CmafChunk>,
    /// Name of the segment currently being filled chunk-by-chunk.
    current_chunk: RwLock<Option<String>>,
}

impl StreamStore {
    #[must_use]
    pub fn new(info: Arc<StreamInfo>, capacity: usize) -> Arc<Self> {
        let (chunk_sender, _) = broadcast::channel(64);
        Arc::new(Self {
            info,
            capacity: capacity.max(1),
            state: RwLock::new(StoreState {
                segments: VecDeque::new(),
                playlist: None,
                files: HashMap::new(),
            }),
            chunk_sender,
            current_chunk: RwLock::new(None),
        })
    }

    /// Append a segment and install the playlist that advertises it, in
    /// one critical section. The oldest entry falls off when full.
    pub fn push_segment(&self, segment: SegmentData, playlist: String) {
        let mut state = self.state.write();
        if state.segments.len() >= self.capacity {
            state.segments.pop_front();
        }
        state.segments.push_back(segment);
        state.playlist = Some(playlist);
    }

    pub fn set_file(&self, name: impl Into<String>, data: Bytes) {
        self.state.write().files.insert(name.into(), data);
    }

    #[must_use]
    pub fn playlist(&self) -> Option<String> {
        self.state.read().playlist.clone()
    }

    #[must_use]
    pub fn segment(&self, name: &str) -> Option<SegmentData> {
        let state = self.state.read();
        if let Some(file) = state.files.get(name) {
            return Some(SegmentData {
                sequence_number: 0,
                duration: 0,
                name: name.to_string(),
                data: file.clone(),
                created_at: Instant::now(),
            });
        }
        state
            .segments
            .iter()
            .find(|segment| segment.name == name)
            .cloned()
    }

    /// Snapshot of the ring for playlist builders.
    #[must_use]
    pub fn segments(&self) -> Vec<SegmentData> {
        self.state.read().segments.iter().cloned().collect()
    }

    pub fn push_chunk(&self, chunk: CmafChunk) {
        *self.current_chunk.write() = if chunk.last {
            None
        } else {
            Some(chunk.segment_name.clone())
        };
        let _ = self.chunk_sender.send(chunk);
    }

    /// The in-flight segment name, if one is being chunked right now.
    #[must_use]
    pub fn current_chunk_name(&self) -> Option<String> {
        self.current_chunk.read().clone()
    }

    #[must_use]
    pub fn subscribe_chunks(&self) -> broadcast::Receiver<CmafChunk> {
        self.chunk_sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{StreamInfo, StreamSourceType};

    fn store() -> Arc<StreamStore> {
        StreamStore::new(
            Arc::new(StreamInfo::new(1, 1, "live", "s", StreamSourceType::RtmpPush)),
            3,
        )
    }

    fn segment(seq: u64) -> SegmentData {
        SegmentData {
            sequence_number: seq,
            duration: 5000,
            name: format!("{seq}.ts"),
            data: Bytes::from_static(b"\x47data"),
            created_at: Instant::now(),
        }
    }

    #[test]
    fn test_ring_drops_oldest() {
        let store = store();
        for seq in 0..5 {
            store.push_segment(segment(seq), format!("playlist-{seq}"));
        }
        let segments = store.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].sequence_number, 2);
        assert!(store.segment("1.ts").is_none());
        assert!(store.segment("4.ts").is_some());
        assert_eq!(store.playlist().as_deref(), Some("playlist-4"));
    }

    #[test]
    fn test_playlist_only_names_materialized_segments() {
        let store = store();
        store.push_segment(segment(0), "0.ts".to_string());
        let playlist = store.playlist().unwrap();
        for name in playlist.split_whitespace() {
            let found = store.segment(name).expect("advertised segment must exist");
            assert!(!found.data.is_empty());
        }
    }
}
