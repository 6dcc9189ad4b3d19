use {
    super::track::MediaTrack,
    serde::{Deserialize, Serialize},
    std::{
        collections::BTreeMap,
        fmt,
        sync::atomic::{AtomicU32, Ordering},
    },
};

static NEXT_STREAM_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a server-unique stream id.
#[must_use]
pub fn next_stream_id() -> u32 {
    NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed)
}

/// Where a stream's packets originate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamSourceType {
    RtmpPush,
    RtspPull,
    OvtPull,
    Transcoder,
}

/// Router key for one live stream: the owning application plus the
/// stream's name inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StreamIdentifier {
    pub application_id: u32,
    pub stream_name: String,
}

impl StreamIdentifier {
    #[must_use]
    pub fn new(application_id: u32, stream_name: impl Into<String>) -> Self {
        Self {
            application_id,
            stream_name: stream_name.into(),
        }
    }
}

impl fmt::Display for StreamIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "app({})/{}", self.application_id, self.stream_name)
    }
}

/// Descriptor of one logical live source and its tracks.
///
/// Tracks are keyed by track id in insertion order; every packet flowing
/// through the pipeline references one of these by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub id: u32,
    pub application_id: u32,
    pub application_name: String,
    pub name: String,
    pub source_type: StreamSourceType,
    pub tracks: BTreeMap<u32, MediaTrack>,
}

impl StreamInfo {
    #[must_use]
    pub fn new(
        id: u32,
        application_id: u32,
        application_name: impl Into<String>,
        name: impl Into<String>,
        source_type: StreamSourceType,
    ) -> Self {
        Self {
            id,
            application_id,
            application_name: application_name.into(),
            name: name.into(),
            source_type,
            tracks: BTreeMap::new(),
        }
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.insert(track.id, track);
    }

    #[must_use]
    pub fn track(&self, id: u32) -> Option<&MediaTrack> {
        self.tracks.get(&id)
    }

    #[must_use]
    pub fn identifier(&self) -> StreamIdentifier {
        StreamIdentifier::new(self.application_id, self.name.clone())
    }

    /// Human name in `app/stream` form.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.application_name, self.name)
    }
}
