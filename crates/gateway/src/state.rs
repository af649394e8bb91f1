use std::{sync::Arc, time::Duration};

use {
    axum_extra::extract::cookie::Key,
    sha2::{Digest, Sha512},
    tokio::sync::Semaphore,
    tracing::warn,
};

use {
    swarm_config::SwarmConfig,
    swarm_sessions::{MemorySessionStore, SessionStore},
};

use crate::bots::{BotRegistry, RegistryTokenResolver, TokenResolver};

/// Connect timeout for upstream fetches made on behalf of proxy replies.
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared receptor state, wrapped in Arc for use across request tasks.
pub struct GatewayState {
    pub config: SwarmConfig,
    pub bots: Arc<BotRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    /// Signs the session cookie.
    pub cookie_key: Key,
    pub token_resolver: Arc<dyn TokenResolver>,
    /// Client used to stream proxy replies.
    pub http: reqwest::Client,
    /// Caps concurrent upstream streams.
    pub proxy_permits: Arc<Semaphore>,
    /// Server version string.
    pub version: String,
    pub name: String,
    pub hostname: String,
    /// Value of the `X-Powered-By` header.
    pub powered_by: String,
}

impl GatewayState {
    /// State with an in-memory session store and bearer tokens resolved by
    /// the `user` bot.
    pub fn new(config: SwarmConfig, bots: Arc<BotRegistry>) -> Arc<Self> {
        let ttl = Duration::from_secs(config.session.ttl_secs);
        let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(ttl));
        let resolver: Arc<dyn TokenResolver> =
            Arc::new(RegistryTokenResolver::new(Arc::clone(&bots)));
        Self::with_parts(config, bots, sessions, resolver)
    }

    pub fn with_parts(
        config: SwarmConfig,
        bots: Arc<BotRegistry>,
        sessions: Arc<dyn SessionStore>,
        token_resolver: Arc<dyn TokenResolver>,
    ) -> Arc<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());
        let version = env!("CARGO_PKG_VERSION").to_string();
        let powered_by = config
            .server
            .powered_by
            .clone()
            .unwrap_or_else(|| format!("swarm v{version}"));

        let cookie_key = match config.session.secret.as_deref() {
            Some(secret) if !secret.is_empty() => {
                Key::from(Sha512::digest(secret.as_bytes()).as_slice())
            },
            _ => {
                warn!("no session secret configured, sessions will not survive a restart");
                Key::generate()
            },
        };

        let http = reqwest::Client::builder()
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build upstream client, using defaults");
                reqwest::Client::new()
            });
        let proxy_permits = Arc::new(Semaphore::new(config.server.proxy_concurrency.max(1)));

        Arc::new(Self {
            bots,
            sessions,
            cookie_key,
            token_resolver,
            http,
            proxy_permits,
            version,
            name: "swarm".into(),
            hostname,
            powered_by,
            config,
        })
    }

    /// Deadline for a single capability invocation.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.server.request_timeout_secs.max(1))
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.session.cookie_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn powered_by_defaults_to_version() {
        let state = GatewayState::new(SwarmConfig::default(), Arc::new(BotRegistry::new()));
        assert_eq!(state.powered_by, format!("swarm v{}", state.version));
        assert_eq!(state.cookie_name(), "swarm.sid");
        assert_eq!(state.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn configured_secret_gives_stable_key() {
        let mut config = SwarmConfig::default();
        config.session.secret = Some("hunter2".into());
        config.server.powered_by = Some("acme".into());
        let a = GatewayState::new(config.clone(), Arc::new(BotRegistry::new()));
        let b = GatewayState::new(config, Arc::new(BotRegistry::new()));
        assert_eq!(a.cookie_key.master(), b.cookie_key.master());
        assert_eq!(a.powered_by, "acme");
    }
}
