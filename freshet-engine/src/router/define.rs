use {
    super::{errors::RouterError, queue::PacketQueue},
    crate::media::{MediaType, SharedMediaPacket, StreamIdentifier, StreamInfo},
    serde::Serialize,
    std::{collections::HashSet, fmt, sync::Arc},
    tokio::sync::{broadcast, mpsc, oneshot},
    uuid::Uuid,
};

/// Inbound capacity between a stream's producer and its dispatcher.
pub const PRODUCER_CHANNEL_CAPACITY: usize = 512;

/// Default per-observer queue depth.
pub const OBSERVER_QUEUE_CAPACITY: usize = 256;

/// Capacity of the router's own event channel.
pub const ROUTER_EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Capacity of each dispatcher's control channel.
pub const DISPATCHER_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// What an observer wants out of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackFilter {
    All,
    VideoOnly,
    AudioOnly,
    Tracks(HashSet<u32>),
}

impl TrackFilter {
    #[must_use]
    pub fn accepts(&self, packet: &SharedMediaPacket) -> bool {
        match self {
            Self::All => true,
            Self::VideoOnly => packet.codec_id.media_type() == MediaType::Video,
            Self::AudioOnly => packet.codec_id.media_type() == MediaType::Audio,
            Self::Tracks(ids) => ids.contains(&packet.track_id),
        }
    }
}

/// Which packet loses when an observer queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum OverflowPolicy {
    /// Discard the packet that failed to enqueue.
    #[default]
    DropNewest,
    /// Evict the queue head to make room.
    DropOldest,
}

/// The consumer classes that attach to streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObserverKind {
    Transcoder,
    WebRtc,
    Hls,
    Dash,
    Cmaf,
    Ovt,
}

impl fmt::Display for ObserverKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Transcoder => write!(f, "transcoder"),
            Self::WebRtc => write!(f, "webrtc"),
            Self::Hls => write!(f, "hls"),
            Self::Dash => write!(f, "dash"),
            Self::Cmaf => write!(f, "cmaf"),
            Self::Ovt => write!(f, "ovt"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObserverInfo {
    pub id: Uuid,
    pub kind: ObserverKind,
    pub filter: TrackFilter,
    pub policy: OverflowPolicy,
}

impl ObserverInfo {
    #[must_use]
    pub fn new(kind: ObserverKind, filter: TrackFilter) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            filter,
            policy: OverflowPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// The observer's end of its inbound queue.
pub struct ObserverConnection {
    pub observer_id: Uuid,
    pub stream_info: Arc<StreamInfo>,
    pub queue: Arc<PacketQueue>,
}

impl ObserverConnection {
    /// Receive the next packet in producer order; `None` once the stream
    /// is unregistered and the queue drained.
    pub async fn recv(&self) -> Option<SharedMediaPacket> {
        self.queue.recv().await
    }
}

impl Drop for ObserverConnection {
    fn drop(&mut self) {
        // The dispatcher reaps closed queues on its next fan-out.
        self.queue.close();
    }
}

pub type ProducerSender = mpsc::Sender<SharedMediaPacket>;
pub type ProducerReceiver = mpsc::Receiver<SharedMediaPacket>;

pub type RouterEventSender = mpsc::Sender<RouterEvent>;
pub type RouterEventReceiver = mpsc::Receiver<RouterEvent>;

pub type SubscribeResultSender = oneshot::Sender<Result<ObserverConnection, RouterError>>;
pub type PublishResultSender = oneshot::Sender<Result<ProducerSender, RouterError>>;

pub enum RouterEvent {
    Publish {
        stream_info: Arc<StreamInfo>,
        result_sender: PublishResultSender,
    },
    Unpublish {
        identifier: StreamIdentifier,
    },
    Subscribe {
        identifier: StreamIdentifier,
        info: ObserverInfo,
        result_sender: SubscribeResultSender,
    },
    Unsubscribe {
        identifier: StreamIdentifier,
        observer_id: Uuid,
    },
}

/// Stream lifecycle notifications fanned out to publisher modules.
#[derive(Clone)]
pub enum StreamEvent {
    Published { stream_info: Arc<StreamInfo> },
    Unpublished { identifier: StreamIdentifier },
}

pub type StreamEventSender = broadcast::Sender<StreamEvent>;
pub type StreamEventReceiver = broadcast::Receiver<StreamEvent>;

pub enum DispatcherEvent {
    Subscribe {
        info: ObserverInfo,
        result_sender: oneshot::Sender<Arc<PacketQueue>>,
    },
    Unsubscribe {
        observer_id: Uuid,
    },
    Close,
}
