use {
    crate::router::define::ObserverKind,
    crate::router::statistics::StreamStatistics,
    crate::statlog,
    parking_lot::Mutex,
    std::collections::HashMap,
    std::net::IpAddr,
    std::sync::Arc,
    std::time::{Duration, Instant},
    tokio_util::sync::CancellationToken,
};

/// Housekeeping cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3);

/// A segment session is treated as disconnected after missing this many
/// segment durations.
const SEGMENT_EXPIRY_FACTOR: u32 = 3;

/// Authorized playlist sessions are forgotten after this long.
const MAX_SESSION_AGE: Duration = Duration::from_secs(6 * 60 * 60);

/// Recorded on every admitted playlist fetch.
#[derive(Debug, Clone)]
pub struct PlaylistRequestInfo {
    pub publisher: ObserverKind,
    pub app_name: String,
    pub stream_name: String,
    pub ip_address: IpAddr,
    pub session_id: String,
    pub created_at: Instant,
}

impl PlaylistRequestInfo {
    #[must_use]
    pub fn is_request_from_same_user(&self, other: &PlaylistRequestInfo) -> bool {
        self.publisher == other.publisher
            && self.ip_address == other.ip_address
            && self.app_name == other.app_name
            && self.stream_name == other.stream_name
    }

    fn is_too_old(&self) -> bool {
        self.created_at.elapsed() > MAX_SESSION_AGE
    }
}

/// Tracks one viewer's segment fetch cadence.
#[derive(Debug, Clone)]
pub struct SegmentRequestInfo {
    pub publisher: ObserverKind,
    pub app_name: String,
    pub stream_name: String,
    pub ip_address: IpAddr,
    pub last_sequence: u64,
    /// Segment duration in milliseconds.
    pub duration: u64,
    pub count: u32,
    pub last_seen: Instant,
    /// Stream counters to decrement when the session expires.
    pub statistics: Option<Arc<StreamStatistics>>,
}

impl SegmentRequestInfo {
    /// The follow-up heuristic: same viewer, sequence advanced by one or
    /// two, within the expiry window.
    #[must_use]
    pub fn is_next_request(&self, incoming: &SegmentRequestInfo) -> bool {
        self.publisher == incoming.publisher
            && self.ip_address == incoming.ip_address
            && self.app_name == incoming.app_name
            && self.stream_name == incoming.stream_name
            && incoming.last_sequence > self.last_sequence
            && incoming.last_sequence <= self.last_sequence + 2
            && !self.is_expired()
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        let window = Duration::from_millis(self.duration.max(1000))
            * SEGMENT_EXPIRY_FACTOR;
        self.last_seen.elapsed() > window
    }
}

/// The segment publisher's session accounting: authorized playlist
/// sessions keyed by session id, and per-viewer segment cadence entries.
pub struct SessionTable {
    playlists: Mutex<HashMap<String, PlaylistRequestInfo>>,
    segments: Mutex<Vec<SegmentRequestInfo>>,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            playlists: Mutex::new(HashMap::new()),
            segments: Mutex::new(Vec::new()),
        }
    }

    /// Insert or refresh an authorized playlist session.
    pub fn authorize_playlist(&self, info: PlaylistRequestInfo) {
        let mut playlists = self.playlists.lock();
        if !playlists.contains_key(&info.session_id) {
            tracing::info!(
                "session authorized: {}/{} - {} - {}",
                info.app_name, info.stream_name, info.session_id, info.ip_address
            );
        }
        playlists.insert(info.session_id.clone(), info);
    }

    /// Token-expiry grace check: was this session id authorized earlier,
    /// from the same user?
    #[must_use]
    pub fn is_authorized_session(&self, candidate: &PlaylistRequestInfo) -> bool {
        self.playlists
            .lock()
            .get(&candidate.session_id)
            .is_some_and(|existing| existing.is_request_from_same_user(candidate))
    }

    #[must_use]
    pub fn playlist_session_for(&self, info: &SegmentRequestInfo) -> Option<String> {
        self.playlists
            .lock()
            .values()
            .find(|playlist| {
                playlist.publisher == info.publisher
                    && playlist.ip_address == info.ip_address
                    && playlist.app_name == info.app_name
                    && playlist.stream_name == info.stream_name
            })
            .map(|playlist| playlist.session_id.clone())
    }

    /// Record a segment fetch. Updates the matching entry in place when
    /// the fetch continues an existing session; otherwise inserts a new
    /// entry and bumps the stream's connected-session counter.
    pub fn update_segment_request(&self, mut info: SegmentRequestInfo) {
        let mut new_session = true;
        {
            let mut segments = self.segments.lock();
            if let Some(position) = segments.iter().position(|item| item.is_next_request(&info)) {
                info.count = segments[position].count + 1;
                segments.remove(position);
                new_session = false;
            }
            segments.push(info.clone());
        }

        if new_session {
            if let Some(statistics) = &info.statistics {
                statistics.on_session_connected();
            }
            let session_id = self
                .playlist_session_for(&info)
                .unwrap_or_else(|| info.ip_address.to_string());
            statlog::session(
                &format!("{}.SS", info.publisher),
                "createClientSession",
                &format!("{}/{}", info.app_name, info.stream_name),
                &session_id,
            );
        }
    }

    /// One housekeeping pass: drop expired segment sessions (emitting the
    /// `SESSION` accounting line) and stale playlist authorizations.
    pub fn sweep(&self) {
        let expired: Vec<SegmentRequestInfo> = {
            let mut segments = self.segments.lock();
            let (expired, alive): (Vec<_>, Vec<_>) =
                segments.drain(..).partition(|info| info.is_expired());
            *segments = alive;
            expired
        };

        for info in expired {
            if let Some(statistics) = &info.statistics {
                statistics.on_session_disconnected();
            }
            let session_id = self
                .playlist_session_for(&info)
                .unwrap_or_else(|| info.ip_address.to_string());
            statlog::session(
                &format!("{}.SS", info.publisher),
                "deleteClientSession",
                &format!("{}/{}", info.app_name, info.stream_name),
                &session_id,
            );
        }

        let mut playlists = self.playlists.lock();
        playlists.retain(|_, info| {
            let keep = !info.is_too_old();
            if !keep {
                tracing::info!(
                    "removing authorized session: {}/{} - {} - {}",
                    info.app_name, info.stream_name, info.session_id, info.ip_address
                );
            }
            keep
        });
    }

    /// Periodic sweeper task; stops with the token.
    pub fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.sweep(),
                    () = cancel.cancelled() => break,
                }
            }
        });
    }

    #[must_use]
    pub fn active_segment_sessions(&self) -> usize {
        self.segments.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_info(seq: u64, ip: &str) -> SegmentRequestInfo {
        SegmentRequestInfo {
            publisher: ObserverKind::Hls,
            app_name: "live".to_string(),
            stream_name: "s".to_string(),
            ip_address: ip.parse().unwrap(),
            last_sequence: seq,
            duration: 5000,
            count: 0,
            last_seen: Instant::now(),
            statistics: None,
        }
    }

    #[test]
    fn test_sequential_fetches_are_one_session() {
        let table = SessionTable::new();
        table.update_segment_request(segment_info(1, "1.2.3.4"));
        table.update_segment_request(segment_info(2, "1.2.3.4"));
        table.update_segment_request(segment_info(4, "1.2.3.4")); // +2: still same
        assert_eq!(table.active_segment_sessions(), 1);
    }

    #[test]
    fn test_sequence_jump_is_a_new_session() {
        let table = SessionTable::new();
        table.update_segment_request(segment_info(1, "1.2.3.4"));
        table.update_segment_request(segment_info(9, "1.2.3.4"));
        assert_eq!(table.active_segment_sessions(), 2);
    }

    #[test]
    fn test_different_ip_is_a_new_session() {
        let table = SessionTable::new();
        table.update_segment_request(segment_info(1, "1.2.3.4"));
        table.update_segment_request(segment_info(2, "5.6.7.8"));
        assert_eq!(table.active_segment_sessions(), 2);
    }

    #[test]
    fn test_authorized_session_grace_requires_same_user() {
        let table = SessionTable::new();
        let info = PlaylistRequestInfo {
            publisher: ObserverKind::Hls,
            app_name: "live".to_string(),
            stream_name: "s".to_string(),
            ip_address: "1.2.3.4".parse().unwrap(),
            session_id: "sess".to_string(),
            created_at: Instant::now(),
        };
        table.authorize_playlist(info.clone());
        assert!(table.is_authorized_session(&info));

        let other_ip = PlaylistRequestInfo {
            ip_address: "9.9.9.9".parse().unwrap(),
            ..info
        };
        assert!(!table.is_authorized_session(&other_ip));
    }
}
