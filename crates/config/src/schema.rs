//! Config schema types (server, hashcash, session, locale, tls).

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub server: ServerConfig,
    pub hashcash: HashcashConfig,
    pub session: SessionConfig,
    pub locale: LocaleConfig,
    pub tls: TlsConfig,
}

/// Listener and request-handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub http_port: u16,
    pub https_port: u16,
    /// Ports tried in order when `http_port` is taken, before counting upward.
    pub http_fallback_ports: Vec<u16>,
    pub https_fallback_ports: Vec<u16>,
    /// Upper bound on bind attempts per listener before giving up.
    pub max_bind_attempts: u32,
    /// Deadline for a single capability invocation.
    pub request_timeout_secs: u64,
    /// Concurrent upstream streams allowed for proxy replies.
    pub proxy_concurrency: usize,
    pub max_body_bytes: usize,
    /// Value of the `X-Powered-By` header. Defaults to `swarm v<version>`.
    pub powered_by: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            http_port: 5566,
            https_port: 7788,
            http_fallback_ports: Vec::new(),
            https_fallback_ports: Vec::new(),
            max_bind_attempts: 100,
            request_timeout_secs: 30,
            proxy_concurrency: 64,
            max_body_bytes: 10 * 1024 * 1024,
            powered_by: None,
        }
    }
}

/// Proof-of-work gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashcashConfig {
    /// Required leading zero bits of the token digest.
    pub level: u32,
    /// How long a token stays valid after its timestamp, in milliseconds.
    pub allow_delay_ms: u64,
}

impl Default for HashcashConfig {
    fn default() -> Self {
        Self {
            level: 12,
            allow_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    /// Idle lifetime of a session.
    pub ttl_secs: u64,
    /// Cookie signing secret. A random key is generated per process when unset,
    /// which invalidates all sessions on restart.
    pub secret: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "swarm.sid".into(),
            ttl_secs: 24 * 60 * 60,
            secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocaleConfig {
    pub default: String,
    /// Locales the deployment can serve. Empty accepts anything the client asks for.
    pub supported: Vec<String>,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            default: "en".into(),
            supported: vec!["en".into(), "zh".into(), "zh-tw".into(), "zh-cn".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    /// PEM certificate. Defaults to `<data_dir>/certification/cert.pem`.
    pub cert_path: Option<String>,
    /// PEM private key. Defaults to `<data_dir>/certification/key.pem`.
    pub key_path: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cert_path: None,
            key_path: None,
        }
    }
}
