pub mod define;
pub mod errors;
pub mod gop;
pub mod queue;
pub mod statistics;

use {
    self::define::{
        DispatcherEvent, ObserverConnection, ObserverInfo, ProducerReceiver, ProducerSender,
        RouterEvent, RouterEventReceiver, RouterEventSender, StreamEvent, StreamEventReceiver,
        StreamEventSender, DISPATCHER_EVENT_CHANNEL_CAPACITY, OBSERVER_QUEUE_CAPACITY,
        PRODUCER_CHANNEL_CAPACITY, ROUTER_EVENT_CHANNEL_CAPACITY,
    },
    dashmap::DashMap,
    self::errors::{RouterError, RouterErrorValue},
    self::gop::GopCache,
    self::queue::PacketQueue,
    self::statistics::{StreamStatistics, StreamStatsSnapshot},
    std::collections::HashMap,
    std::sync::atomic::{AtomicU64, Ordering},
    std::sync::Arc,
    tokio::sync::{broadcast, mpsc, oneshot},
    uuid::Uuid,
};

use crate::media::{MediaPacket, SharedMediaPacket, StreamIdentifier, StreamInfo};

/// How often per-observer drop warnings are logged (every N drops).
const DROP_LOG_INTERVAL: u64 = 100;

/// Producer-side handle for one registered stream. `push` never blocks;
/// when the dispatcher's inbound channel is full the packet is counted
/// and discarded.
pub struct StreamProducer {
    identifier: StreamIdentifier,
    sender: ProducerSender,
    dropped: AtomicU64,
}

impl StreamProducer {
    fn new(identifier: StreamIdentifier, sender: ProducerSender) -> Self {
        Self {
            identifier,
            sender,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, packet: MediaPacket) {
        self.push_shared(Arc::new(packet));
    }

    pub fn push_shared(&self, packet: SharedMediaPacket) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(packet) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % DROP_LOG_INTERVAL == 0 {
                tracing::warn!(
                    "stream {} dropped {dropped} packets at the producer inlet",
                    self.identifier
                );
            }
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &StreamIdentifier {
        &self.identifier
    }
}

struct ObserverSlot {
    info: ObserverInfo,
    queue: Arc<PacketQueue>,
    logged_drops: u64,
}

/// Per-stream fan-out task: receives packets from the single producer and
/// distributes them to every attached observer queue in producer order.
struct StreamDispatcher {
    stream_info: Arc<StreamInfo>,
    inbound: ProducerReceiver,
    control: mpsc::Receiver<DispatcherEvent>,
    statistics: Arc<StreamStatistics>,
}

impl StreamDispatcher {
    async fn run(mut self) {
        let mut observers: HashMap<Uuid, ObserverSlot> = HashMap::new();
        let mut gop_cache = GopCache::new();

        loop {
            tokio::select! {
                maybe_packet = self.inbound.recv() => {
                    match maybe_packet {
                        Some(packet) => {
                            self.statistics.on_packet(packet.data.len());
                            gop_cache.append(&packet);
                            Self::fan_out(&mut observers, &packet, &self.statistics);
                        }
                        // Producer handle dropped: the stream is over.
                        None => break,
                    }
                }
                maybe_event = self.control.recv() => {
                    match maybe_event {
                        Some(DispatcherEvent::Subscribe { info, result_sender }) => {
                            let queue = Arc::new(PacketQueue::new(
                                OBSERVER_QUEUE_CAPACITY,
                                info.policy,
                            ));
                            for cached in gop_cache.packets() {
                                if info.filter.accepts(cached) {
                                    queue.push(cached.clone());
                                }
                            }
                            tracing::info!(
                                "observer {}({}) attached to {}",
                                info.kind, info.id, self.stream_info.identifier()
                            );
                            observers.insert(info.id, ObserverSlot {
                                info,
                                queue: queue.clone(),
                                logged_drops: 0,
                            });
                            self.statistics
                                .observer_count
                                .store(observers.len() as u64, Ordering::Relaxed);
                            let _ = result_sender.send(queue);
                        }
                        Some(DispatcherEvent::Unsubscribe { observer_id }) => {
                            if let Some(slot) = observers.remove(&observer_id) {
                                slot.queue.close();
                            }
                            self.statistics
                                .observer_count
                                .store(observers.len() as u64, Ordering::Relaxed);
                        }
                        Some(DispatcherEvent::Close) | None => break,
                    }
                }
            }
        }

        for slot in observers.values() {
            slot.queue.close();
        }
        tracing::debug!("dispatcher for {} ended", self.stream_info.identifier());
    }

    /// Copy one packet to every matching observer. A full queue drops for
    /// that observer only; the rest still receive the packet.
    fn fan_out(
        observers: &mut HashMap<Uuid, ObserverSlot>,
        packet: &SharedMediaPacket,
        statistics: &StreamStatistics,
    ) {
        let mut closed = Vec::new();
        let mut reached = 0usize;

        for (id, slot) in observers.iter_mut() {
            if slot.queue.is_closed() {
                closed.push(*id);
                continue;
            }
            if !slot.info.filter.accepts(packet) {
                continue;
            }
            reached += 1;
            if !slot.queue.push(packet.clone()) {
                statistics.dropped_packets.fetch_add(1, Ordering::Relaxed);
                let total = slot.queue.dropped();
                if total >= slot.logged_drops + DROP_LOG_INTERVAL {
                    slot.logged_drops = total;
                    tracing::warn!(
                        "observer {}({}) dropped {total} packets (queue full)",
                        slot.info.kind, id
                    );
                }
            }
        }
        statistics.on_fan_out(packet.data.len(), reached);

        for id in closed {
            observers.remove(&id);
        }
    }
}

struct StreamEntry {
    control: mpsc::Sender<DispatcherEvent>,
    info: Arc<StreamInfo>,
}

struct RegistryEntry {
    info: Arc<StreamInfo>,
    statistics: Arc<StreamStatistics>,
}

/// The switching fabric. One per server; owns the stream table and spawns
/// a [`StreamDispatcher`] per registered stream.
pub struct MediaRouter {
    streams: HashMap<StreamIdentifier, StreamEntry>,
    event_receiver: RouterEventReceiver,
    event_sender: RouterEventSender,
    stream_event_sender: StreamEventSender,
    registry: Arc<DashMap<StreamIdentifier, RegistryEntry>>,
}

impl Default for MediaRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaRouter {
    #[must_use]
    pub fn new() -> Self {
        let (event_sender, event_receiver) = mpsc::channel(ROUTER_EVENT_CHANNEL_CAPACITY);
        let (stream_event_sender, _) = broadcast::channel(64);
        Self {
            streams: HashMap::new(),
            event_receiver,
            event_sender,
            stream_event_sender,
            registry: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn handle(&self) -> RouterHandle {
        RouterHandle {
            event_sender: self.event_sender.clone(),
            stream_event_sender: self.stream_event_sender.clone(),
            registry: self.registry.clone(),
        }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.event_receiver.recv().await {
            match event {
                RouterEvent::Publish {
                    stream_info,
                    result_sender,
                } => {
                    let result = self.publish(stream_info);
                    if result_sender.send(result).is_err() {
                        tracing::error!("publish result receiver dropped");
                    }
                }
                RouterEvent::Unpublish { identifier } => {
                    self.unpublish(&identifier);
                }
                RouterEvent::Subscribe {
                    identifier,
                    info,
                    result_sender,
                } => {
                    let result = self.subscribe(&identifier, info).await;
                    if result_sender.send(result).is_err() {
                        tracing::error!("subscribe result receiver dropped");
                    }
                }
                RouterEvent::Unsubscribe {
                    identifier,
                    observer_id,
                } => {
                    if let Some(entry) = self.streams.get(&identifier) {
                        let _ = entry
                            .control
                            .try_send(DispatcherEvent::Unsubscribe { observer_id });
                    }
                }
            }
        }
        tracing::error!("media router event loop ended: all event senders dropped");
    }

    fn publish(&mut self, stream_info: Arc<StreamInfo>) -> Result<ProducerSender, RouterError> {
        let identifier = stream_info.identifier();
        if self.streams.contains_key(&identifier) {
            return Err(RouterErrorValue::StreamExists.into());
        }

        let (producer_sender, producer_receiver) = mpsc::channel(PRODUCER_CHANNEL_CAPACITY);
        let (control_sender, control_receiver) = mpsc::channel(DISPATCHER_EVENT_CHANNEL_CAPACITY);
        let statistics = Arc::new(StreamStatistics::default());

        let dispatcher = StreamDispatcher {
            stream_info: stream_info.clone(),
            inbound: producer_receiver,
            control: control_receiver,
            statistics: statistics.clone(),
        };
        tokio::spawn(dispatcher.run());

        self.streams.insert(
            identifier.clone(),
            StreamEntry {
                control: control_sender,
                info: stream_info.clone(),
            },
        );
        self.registry.insert(
            identifier.clone(),
            RegistryEntry {
                info: stream_info.clone(),
                statistics,
            },
        );

        tracing::info!("stream registered: {identifier}");
        let _ = self
            .stream_event_sender
            .send(StreamEvent::Published { stream_info });

        Ok(producer_sender)
    }

    /// Idempotent: unregistering an unknown stream is a no-op.
    fn unpublish(&mut self, identifier: &StreamIdentifier) {
        if let Some(entry) = self.streams.remove(identifier) {
            let _ = entry.control.try_send(DispatcherEvent::Close);
            self.registry.remove(identifier);
            tracing::info!("stream unregistered: {identifier}");
            let _ = self.stream_event_sender.send(StreamEvent::Unpublished {
                identifier: identifier.clone(),
            });
        }
    }

    async fn subscribe(
        &mut self,
        identifier: &StreamIdentifier,
        info: ObserverInfo,
    ) -> Result<ObserverConnection, RouterError> {
        let entry = self
            .streams
            .get(identifier)
            .ok_or(RouterErrorValue::StreamNotFound)?;

        let observer_id = info.id;
        let stream_info = entry.info.clone();
        let (result_sender, result_receiver) = oneshot::channel();
        entry
            .control
            .send(DispatcherEvent::Subscribe {
                info,
                result_sender,
            })
            .await
            .map_err(|_| RouterError {
                value: RouterErrorValue::SendError,
            })?;

        let queue = result_receiver.await?;
        Ok(ObserverConnection {
            observer_id,
            stream_info,
            queue,
        })
    }
}

/// Cheap clonable facade over the router event loop.
#[derive(Clone)]
pub struct RouterHandle {
    event_sender: RouterEventSender,
    stream_event_sender: StreamEventSender,
    registry: Arc<DashMap<StreamIdentifier, RegistryEntry>>,
}

impl RouterHandle {
    /// Register a stream; fails if the identifier is already active.
    pub async fn publish(
        &self,
        stream_info: Arc<StreamInfo>,
    ) -> Result<StreamProducer, RouterError> {
        let identifier = stream_info.identifier();
        let (result_sender, result_receiver) = oneshot::channel();
        self.event_sender
            .send(RouterEvent::Publish {
                stream_info,
                result_sender,
            })
            .await
            .map_err(|_| RouterError {
                value: RouterErrorValue::SendError,
            })?;
        let sender = result_receiver.await??;
        Ok(StreamProducer::new(identifier, sender))
    }

    pub async fn unpublish(&self, identifier: StreamIdentifier) -> Result<(), RouterError> {
        self.event_sender
            .send(RouterEvent::Unpublish { identifier })
            .await
            .map_err(|_| RouterError {
                value: RouterErrorValue::SendError,
            })
    }

    pub async fn subscribe(
        &self,
        identifier: StreamIdentifier,
        info: ObserverInfo,
    ) -> Result<ObserverConnection, RouterError> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.event_sender
            .send(RouterEvent::Subscribe {
                identifier,
                info,
                result_sender,
            })
            .await
            .map_err(|_| RouterError {
                value: RouterErrorValue::SendError,
            })?;
        result_receiver.await?
    }

    pub async fn unsubscribe(
        &self,
        identifier: StreamIdentifier,
        observer_id: Uuid,
    ) -> Result<(), RouterError> {
        self.event_sender
            .send(RouterEvent::Unsubscribe {
                identifier,
                observer_id,
            })
            .await
            .map_err(|_| RouterError {
                value: RouterErrorValue::SendError,
            })
    }

    #[must_use]
    pub fn subscribe_stream_events(&self) -> StreamEventReceiver {
        self.stream_event_sender.subscribe()
    }

    #[must_use]
    pub fn stream_info(&self, identifier: &StreamIdentifier) -> Option<Arc<StreamInfo>> {
        self.registry.get(identifier).map(|entry| entry.info.clone())
    }

    #[must_use]
    pub fn statistics(&self, identifier: &StreamIdentifier) -> Option<StreamStatsSnapshot> {
        self.registry
            .get(identifier)
            .map(|entry| entry.statistics.snapshot())
    }

    /// Raw counter handle for publishers that account sessions.
    #[must_use]
    pub fn statistics_handle(
        &self,
        identifier: &StreamIdentifier,
    ) -> Option<Arc<StreamStatistics>> {
        self.registry
            .get(identifier)
            .map(|entry| entry.statistics.clone())
    }

    #[must_use]
    pub fn active_streams(&self) -> Vec<StreamIdentifier> {
        self.registry.iter().map(|entry| entry.key().clone()).collect()
    }
}
