use {
    super::errors::RtcError,
    super::stun::{self, StunMessage},
    bytes::Bytes,
    rand::distributions::Alphanumeric,
    rand::Rng,
    std::net::SocketAddr,
    std::time::Instant,
};

/// ICE connection state (ICE-Lite responder: no checks of our own).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Disconnected,
}

#[must_use]
pub fn generate_ufrag() -> String {
    random_string(8)
}

#[must_use]
pub fn generate_pwd() -> String {
    random_string(32)
}

fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Per-viewer ICE-Lite agent: answers binding requests carrying our
/// ufrag, records the nominated remote address.
pub struct IceSession {
    pub local_ufrag: String,
    pub local_pwd: String,
    pub remote_ufrag: Option<String>,
    pub remote_pwd: Option<String>,
    pub state: IceState,
    pub remote_address: Option<SocketAddr>,
    pub last_activity: Instant,
}

impl Default for IceSession {
    fn default() -> Self {
        Self::new()
    }
}

impl IceSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            local_ufrag: generate_ufrag(),
            local_pwd: generate_pwd(),
            remote_ufrag: None,
            remote_pwd: None,
            state: IceState::New,
            remote_address: None,
            last_activity: Instant::now(),
        }
    }

    pub fn set_remote_credentials(&mut self, ufrag: String, pwd: String) {
        self.remote_ufrag = Some(ufrag);
        self.remote_pwd = Some(pwd);
    }

    /// Whether a binding request's USERNAME (`local:remote`) belongs to
    /// this session.
    #[must_use]
    pub fn owns_username(&self, username: &str) -> bool {
        username
            .split(':')
            .next()
            .is_some_and(|local| local == self.local_ufrag)
    }

    /// Handle a verified-parseable binding request; returns the binding
    /// success response to send back.
    pub fn on_binding_request(
        &mut self,
        message: &StunMessage,
        raw: &[u8],
        source: SocketAddr,
    ) -> Result<Bytes, RtcError> {
        message.verify_integrity(raw, &self.local_pwd)?;

        self.last_activity = Instant::now();
        if self.state == IceState::New {
            self.state = IceState::Checking;
        }
        if message.use_candidate || self.remote_address.is_none() {
            if self.remote_address != Some(source) {
                tracing::debug!("ice nominated remote {source}");
            }
            self.remote_address = Some(source);
            self.state = IceState::Connected;
        }

        Ok(stun::build_binding_success(
            message.transaction_id,
            source,
            &self.local_pwd,
        ))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == IceState::Connected && self.remote_address.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_shape() {
        let session = IceSession::new();
        assert_eq!(session.local_ufrag.len(), 8);
        assert_eq!(session.local_pwd.len(), 32);
        assert!(session.owns_username(&format!("{}:remote", session.local_ufrag)));
        assert!(!session.owns_username("other:remote"));
    }
}
