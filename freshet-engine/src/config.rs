use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level server configuration, loaded once at start.
///
/// Sources, in override order: built-in defaults, the `--config` file,
/// `FRESHET_`-prefixed environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub virtual_hosts: Vec<VirtualHostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub ip: String,
    pub bind: BindConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "freshet".to_string(),
            ip: "0.0.0.0".to_string(),
            bind: BindConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    pub providers: ProviderBindConfig,
    pub publishers: PublisherBindConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderBindConfig {
    pub rtmp_port: u16,
    pub ovt_port: u16,
}

impl Default for ProviderBindConfig {
    fn default() -> Self {
        Self {
            rtmp_port: 1935,
            ovt_port: 9000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherBindConfig {
    /// WebRTC signaling (WebSocket) port.
    pub signalling_port: u16,
    /// Single UDP port for ICE/DTLS/SRTP (ICE-Lite).
    pub ice_port: u16,
    pub hls_port: u16,
    pub dash_port: u16,
    /// LL-DASH/CMAF; may equal `dash_port` to share the listener.
    pub cmaf_port: u16,
    pub ovt_port: u16,
}

impl Default for PublisherBindConfig {
    fn default() -> Self {
        Self {
            signalling_port: 3333,
            ice_port: 10000,
            hls_port: 8080,
            dash_port: 8080,
            cmaf_port: 8080,
            ovt_port: 9001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json".
    pub format: String,
    pub file_path: Option<String>,
    /// Separate writer for accounting (`SESSION`/`REQUEST`) lines.
    pub stat_file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
            stat_file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualHostConfig {
    pub name: String,
    /// Host names served by this vhost; `*.example.com` wildcards allowed.
    pub domains: Vec<String>,
    pub signed_url: Option<SignedUrlConfig>,
    /// CORS/crossdomain URL list (`*`, exact origin, wildcard subdomain).
    pub cross_domains: Vec<String>,
    pub applications: Vec<ApplicationConfig>,
}

impl Default for VirtualHostConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            domains: vec!["*".to_string()],
            signed_url: None,
            cross_domains: Vec::new(),
            applications: vec![ApplicationConfig::default()],
        }
    }
}

/// Signed-URL admission; when absent, admission is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedUrlConfig {
    pub crypto_key: String,
    pub query_string_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    pub providers: ProvidersConfig,
    pub publishers: PublishersConfig,
    pub output_profiles: Vec<OutputProfileConfig>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "live".to_string(),
            providers: ProvidersConfig::default(),
            publishers: PublishersConfig::default(),
            output_profiles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub rtmp: bool,
    pub rtsp_pull: bool,
    pub ovt: bool,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            rtmp: true,
            rtsp_pull: true,
            ovt: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishersConfig {
    pub webrtc: WebRtcPublisherConfig,
    pub hls: SegmentPublisherConfig,
    pub dash: SegmentPublisherConfig,
    pub cmaf: CmafPublisherConfig,
    pub ovt: OvtPublisherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcPublisherConfig {
    pub enabled: bool,
    /// Session idle timeout in seconds.
    pub timeout: u64,
}

impl Default for WebRtcPublisherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentPublisherConfig {
    pub enabled: bool,
    pub segment_count: usize,
    /// Target segment duration in seconds.
    pub segment_duration: u64,
}

impl Default for SegmentPublisherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            segment_count: 3,
            segment_duration: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CmafPublisherConfig {
    pub enabled: bool,
    pub segment_count: usize,
    pub segment_duration: u64,
    /// Chunk duration in milliseconds for the low-latency sink.
    pub chunk_duration_ms: u64,
}

impl Default for CmafPublisherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            segment_count: 3,
            segment_duration: 5,
            chunk_duration_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OvtPublisherConfig {
    pub enabled: bool,
}

/// One transcoding rendition derived from the ingest stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputProfileConfig {
    pub name: String,
    /// Derived stream name; `{input}` expands to the source stream name.
    pub output_stream_name: String,
    pub video: Option<VideoEncodeConfig>,
    pub audio: Option<AudioEncodeConfig>,
    /// Pass packets through untouched (no decode/encode).
    pub bypass: bool,
}

impl Default for OutputProfileConfig {
    fn default() -> Self {
        Self {
            name: "bypass".to_string(),
            output_stream_name: "{input}".to_string(),
            video: None,
            audio: None,
            bypass: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoEncodeConfig {
    /// "h264" or "vp8".
    pub codec: String,
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
}

impl Default for VideoEncodeConfig {
    fn default() -> Self {
        Self {
            codec: "h264".to_string(),
            bitrate: 2_000_000,
            width: 1280,
            height: 720,
            framerate: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEncodeConfig {
    /// "opus" or "aac".
    pub codec: String,
    pub bitrate: u64,
    pub samplerate: u32,
    pub channels: u8,
}

impl Default for AudioEncodeConfig {
    fn default() -> Self {
        Self {
            codec: "opus".to_string(),
            bitrate: 128_000,
            samplerate: 48000,
            channels: 2,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("FRESHET").separator("__"))
            .build()?;
        let mut config: Self = settings.try_deserialize()?;
        if config.virtual_hosts.is_empty() {
            config.virtual_hosts.push(VirtualHostConfig::default());
        }
        Ok(config)
    }

    /// Fail-fast sanity pass over the loaded tree.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.bind.providers.rtmp_port == 0 {
            errors.push("bind.providers.rtmp_port must be non-zero".to_string());
        }
        for vhost in &self.virtual_hosts {
            if vhost.name.is_empty() {
                errors.push("virtual host with empty name".to_string());
            }
            if vhost.applications.is_empty() {
                errors.push(format!("virtual host {} has no applications", vhost.name));
            }
            if let Some(signed) = &vhost.signed_url {
                if signed.crypto_key.is_empty() || signed.query_string_key.is_empty() {
                    errors.push(format!(
                        "virtual host {}: signed_url requires crypto_key and query_string_key",
                        vhost.name
                    ));
                }
            }
            for app in &vhost.applications {
                for segment in [&app.publishers.hls, &app.publishers.dash] {
                    if segment.enabled && segment.segment_count == 0 {
                        errors.push(format!(
                            "{}/{}: segment_count must be positive",
                            vhost.name, app.name
                        ));
                    }
                }
                for profile in &app.output_profiles {
                    if !profile.bypass && profile.video.is_none() && profile.audio.is_none() {
                        errors.push(format!(
                            "{}/{}: profile {} encodes nothing and is not bypass",
                            vhost.name, app.name, profile.name
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        // Default config has no vhosts until load() seeds one.
        let mut config = config;
        config.virtual_hosts.push(VirtualHostConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_segment_count_rejected() {
        let mut config = Config::default();
        let mut vhost = VirtualHostConfig::default();
        vhost.applications[0].publishers.hls.segment_count = 0;
        config.virtual_hosts.push(vhost);
        assert!(config.validate().is_err());
    }
}
