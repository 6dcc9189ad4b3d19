pub mod errors;

use {
    crate::config::{ApplicationConfig, Config, VirtualHostConfig},
    crate::media::StreamIdentifier,
    crate::router::RouterHandle,
    async_trait::async_trait,
    errors::{OrchestratorError, OrchestratorErrorValue},
    parking_lot::RwLock,
    std::collections::HashMap,
    std::sync::atomic::{AtomicU32, Ordering},
    std::sync::Arc,
    std::time::Duration,
};

/// Upper bound on a pull-provider handshake (spec'd at 10 s).
pub const PULL_TIMEOUT: Duration = Duration::from_secs(10);

/// A named virtual container for streams: one application inside one
/// virtual host, carrying its module configuration.
#[derive(Debug)]
pub struct Application {
    pub id: u32,
    pub name: String,
    pub vhost_name: String,
    pub config: ApplicationConfig,
}

impl Application {
    #[must_use]
    pub fn stream_identifier(&self, stream_name: &str) -> StreamIdentifier {
        StreamIdentifier::new(self.id, stream_name)
    }
}

/// A provider capable of starting an outbound pull for a missing stream.
#[async_trait]
pub trait PullProvider: Send + Sync {
    /// URL scheme this provider answers for ("rtsp", "ovt").
    fn scheme(&self) -> &'static str;

    async fn pull(
        &self,
        application: Arc<Application>,
        stream_name: &str,
        url: &str,
    ) -> Result<(), OrchestratorError>;
}

/// Name resolution and application lifecycle across modules.
///
/// Providers ask it to resolve `(domain, app)` pairs into applications;
/// segmenting publishers ask it to request pulls for streams that are not
/// yet live.
pub struct Orchestrator {
    vhosts: Vec<VirtualHostConfig>,
    applications: RwLock<HashMap<(String, String), Arc<Application>>>,
    applications_by_id: RwLock<HashMap<u32, Arc<Application>>>,
    pull_providers: RwLock<Vec<Arc<dyn PullProvider>>>,
    next_application_id: AtomicU32,
    router: RouterHandle,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: &Config, router: RouterHandle) -> Arc<Self> {
        Arc::new(Self {
            vhosts: config.virtual_hosts.clone(),
            applications: RwLock::new(HashMap::new()),
            applications_by_id: RwLock::new(HashMap::new()),
            pull_providers: RwLock::new(Vec::new()),
            next_application_id: AtomicU32::new(1),
            router,
        })
    }

    pub fn register_pull_provider(&self, provider: Arc<dyn PullProvider>) {
        self.pull_providers.write().push(provider);
    }

    #[must_use]
    pub fn router(&self) -> RouterHandle {
        self.router.clone()
    }

    /// Map a request's host name onto a virtual host. Exact names win over
    /// `*.suffix` wildcards; a bare `*` matches anything.
    #[must_use]
    pub fn resolve_vhost(&self, domain: &str) -> Option<&VirtualHostConfig> {
        let domain = domain.split(':').next().unwrap_or(domain);

        self.vhosts
            .iter()
            .find(|vhost| vhost.domains.iter().any(|d| d == domain))
            .or_else(|| {
                self.vhosts.iter().find(|vhost| {
                    vhost.domains.iter().any(|d| {
                        d == "*"
                            || d.strip_prefix("*.")
                                .is_some_and(|suffix| domain.ends_with(&format!(".{suffix}")))
                    })
                })
            })
    }

    /// Resolve `(domain, app_name)` into an [`Application`], creating it on
    /// first touch if the vhost configures it.
    pub fn resolve_application(
        &self,
        domain: &str,
        app_name: &str,
    ) -> Result<Arc<Application>, OrchestratorError> {
        let vhost = self
            .resolve_vhost(domain)
            .ok_or_else(|| OrchestratorErrorValue::UnknownVirtualHost(domain.to_string()))?;

        let key = (vhost.name.clone(), app_name.to_string());
        if let Some(application) = self.applications.read().get(&key) {
            return Ok(application.clone());
        }

        let app_config = vhost
            .applications
            .iter()
            .find(|app| app.name == app_name)
            .ok_or_else(|| {
                OrchestratorErrorValue::UnknownApplication(format!("{domain}/{app_name}"))
            })?
            .clone();

        let application = Arc::new(Application {
            id: self.next_application_id.fetch_add(1, Ordering::Relaxed),
            name: app_name.to_string(),
            vhost_name: vhost.name.clone(),
            config: app_config,
        });
        tracing::info!(
            "application created: {}/{} (id {})",
            application.vhost_name, application.name, application.id
        );

        self.applications
            .write()
            .insert(key, application.clone());
        self.applications_by_id
            .write()
            .insert(application.id, application.clone());
        Ok(application)
    }

    #[must_use]
    pub fn application_by_id(&self, id: u32) -> Option<Arc<Application>> {
        self.applications_by_id.read().get(&id).cloned()
    }

    /// Vhost-level admission/CORS settings for a domain.
    #[must_use]
    pub fn vhost_config(&self, domain: &str) -> Option<VirtualHostConfig> {
        self.resolve_vhost(domain).cloned()
    }

    /// Ask a pull provider to bring up `stream_name`. The URL scheme picks
    /// the provider; the whole attempt is bounded by [`PULL_TIMEOUT`].
    pub async fn request_pull_stream(
        &self,
        domain: &str,
        app_name: &str,
        stream_name: &str,
        url: &str,
    ) -> Result<(), OrchestratorError> {
        let application = self.resolve_application(domain, app_name)?;

        let scheme = url.split("://").next().unwrap_or_default().to_string();
        let provider = self
            .pull_providers
            .read()
            .iter()
            .find(|p| p.scheme() == scheme)
            .cloned()
            .ok_or_else(|| OrchestratorErrorValue::NoPullProvider(scheme.clone()))?;

        match tokio::time::timeout(PULL_TIMEOUT, provider.pull(application, stream_name, url)).await
        {
            Ok(result) => result,
            Err(_) => Err(OrchestratorErrorValue::PullTimeout.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, VirtualHostConfig};
    use crate::router::MediaRouter;

    fn test_config() -> Config {
        let mut config = Config::default();
        let mut vhost = VirtualHostConfig::default();
        vhost.domains = vec!["stream.example.com".to_string(), "*.cdn.example.com".to_string()];
        config.virtual_hosts.push(vhost);
        config
    }

    #[tokio::test]
    async fn test_vhost_resolution() {
        let router = MediaRouter::new();
        let orchestrator = Orchestrator::new(&test_config(), router.handle());

        assert!(orchestrator.resolve_vhost("stream.example.com").is_some());
        assert!(orchestrator.resolve_vhost("stream.example.com:8080").is_some());
        assert!(orchestrator.resolve_vhost("edge1.cdn.example.com").is_some());
        assert!(orchestrator.resolve_vhost("nope.example.org").is_none());
    }

    #[tokio::test]
    async fn test_application_id_stable_across_lookups() {
        let router = MediaRouter::new();
        let orchestrator = Orchestrator::new(&test_config(), router.handle());

        let first = orchestrator
            .resolve_application("stream.example.com", "live")
            .unwrap();
        let second = orchestrator
            .resolve_application("stream.example.com", "live")
            .unwrap();
        assert_eq!(first.id, second.id);

        assert!(orchestrator
            .resolve_application("stream.example.com", "missing")
            .is_err());
    }
}
