//! Bot registry and the capability interface bots expose to the receptor.

use std::{collections::HashMap, sync::Arc};

use {
    anyhow::Context,
    async_trait::async_trait,
    bytes::Bytes,
    serde_json::Value,
    tracing::{debug, info},
};

use {
    swarm_protocol::{BotError, Reply},
    swarm_sessions::Session,
};

use crate::routes::RouteRegistrar;

/// Name of the bot consulted for bearer-token resolution by default.
pub const USER_BOT: &str = "user";

// ── Request view ─────────────────────────────────────────────────────────────

/// A file received in a multipart body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Normalised view of an HTTP request handed to a capability.
#[derive(Debug, Clone, Default)]
pub struct BotRequest {
    pub url: String,
    pub method: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// Parsed JSON or form body; an empty object when there is none.
    pub body: Value,
    pub files: Vec<UploadedFile>,
    pub session_id: String,
    /// Snapshot of the session when the handler was invoked.
    pub session: Session,
    pub locale: String,
}

// ── Bot trait ────────────────────────────────────────────────────────────────

/// An independently written capability provider hosted in this process.
#[async_trait]
pub trait Bot: Send + Sync {
    fn name(&self) -> &str;

    /// Called once at boot, in registration order, before any bot is ready.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once every bot has started.
    async fn ready(&self) -> anyhow::Result<()> {
        debug!(bot = self.name(), "ready");
        Ok(())
    }

    async fn execute(&self, request: BotRequest) -> Result<Reply, BotError>;

    /// Expose HTTP routes. The default exposes nothing.
    fn routes(&self, _routes: &mut RouteRegistrar) {}

    /// Bots that authenticate users return their token resolver here.
    fn token_resolver(&self) -> Option<&dyn TokenResolver> {
        None
    }
}

// ── Token resolution ─────────────────────────────────────────────────────────

/// Identity attached to a session once a bearer token checks out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
}

#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn resolve_token(&self, token: &str) -> Result<Option<Identity>, BotError>;
}

/// Resolves tokens through the registered bot with the given name.
pub struct RegistryTokenResolver {
    bots: Arc<BotRegistry>,
    bot: String,
}

impl RegistryTokenResolver {
    pub fn new(bots: Arc<BotRegistry>) -> Self {
        Self::with_bot(bots, USER_BOT)
    }

    pub fn with_bot(bots: Arc<BotRegistry>, bot: impl Into<String>) -> Self {
        Self {
            bots,
            bot: bot.into(),
        }
    }
}

#[async_trait]
impl TokenResolver for RegistryTokenResolver {
    async fn resolve_token(&self, token: &str) -> Result<Option<Identity>, BotError> {
        let Some(bot) = self.bots.find(&self.bot) else {
            return Ok(None);
        };
        match bot.token_resolver() {
            Some(resolver) => resolver.resolve_token(token).await,
            None => Ok(None),
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a bot named '{name}' is already registered")]
    Duplicate { name: String },
}

/// Directory of the bots hosted by this process, looked up by name.
///
/// Built once at startup and shared behind an `Arc`; lookups never lock.
#[derive(Default)]
pub struct BotRegistry {
    bots: Vec<Arc<dyn Bot>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bot. Names are compared case-insensitively and the first
    /// registration wins.
    pub fn register(&mut self, bot: Arc<dyn Bot>) -> Result<(), RegistryError> {
        if self.find(bot.name()).is_some() {
            return Err(RegistryError::Duplicate {
                name: bot.name().to_string(),
            });
        }
        self.bots.push(bot);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Bot>> {
        self.bots
            .iter()
            .find(|b| b.name().eq_ignore_ascii_case(name))
            .map(Arc::clone)
    }

    pub fn names(&self) -> Vec<&str> {
        self.bots.iter().map(|b| b.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    /// Run every bot's `start` hook in registration order.
    pub async fn start_all(&self) -> anyhow::Result<()> {
        for bot in &self.bots {
            bot.start()
                .await
                .with_context(|| format!("bot '{}' failed to start", bot.name()))?;
            info!(bot = bot.name(), "bot started");
        }
        Ok(())
    }

    /// Run every bot's `ready` hook in registration order.
    pub async fn ready_all(&self) -> anyhow::Result<()> {
        for bot in &self.bots {
            bot.ready()
                .await
                .with_context(|| format!("bot '{}' failed to get ready", bot.name()))?;
        }
        Ok(())
    }

    /// Let every bot add its routes.
    pub fn register_routes(&self, routes: &mut RouteRegistrar) {
        for bot in &self.bots {
            bot.routes(routes);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    struct Named {
        name: &'static str,
        started: AtomicUsize,
    }

    impl Named {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                started: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Bot for Named {
        fn name(&self) -> &str {
            self.name
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, _request: BotRequest) -> Result<Reply, BotError> {
            Ok(Reply::new().with_message(self.name))
        }
    }

    struct Users;

    #[async_trait]
    impl TokenResolver for Users {
        async fn resolve_token(&self, token: &str) -> Result<Option<Identity>, BotError> {
            Ok((token == "good").then(|| Identity { uid: "u1".into() }))
        }
    }

    #[async_trait]
    impl Bot for Users {
        fn name(&self) -> &str {
            "User"
        }

        async fn execute(&self, _request: BotRequest) -> Result<Reply, BotError> {
            Ok(Reply::new())
        }

        fn token_resolver(&self) -> Option<&dyn TokenResolver> {
            Some(self)
        }
    }

    #[test]
    fn find_is_case_insensitive() {
        let mut reg = BotRegistry::new();
        reg.register(Named::new("Tracker")).unwrap();
        assert!(reg.find("tracker").is_some());
        assert!(reg.find("TRACKER").is_some());
        assert!(reg.find("track").is_none());
    }

    #[tokio::test]
    async fn colliding_names_keep_first() {
        let mut reg = BotRegistry::new();
        reg.register(Named::new("tracker")).unwrap();
        let err = reg.register(Named::new("Tracker")).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { .. }));
        assert_eq!(reg.len(), 1);

        let reply = reg
            .find("TRACKER")
            .unwrap()
            .execute(BotRequest::default())
            .await
            .unwrap();
        assert_eq!(reply.message, "tracker");
    }

    #[tokio::test]
    async fn start_all_runs_each_bot_once() {
        let a = Named::new("a");
        let b = Named::new("b");
        let mut reg = BotRegistry::new();
        reg.register(a.clone()).unwrap();
        reg.register(b.clone()).unwrap();
        reg.start_all().await.unwrap();
        reg.ready_all().await.unwrap();
        assert_eq!(a.started.load(Ordering::SeqCst), 1);
        assert_eq!(b.started.load(Ordering::SeqCst), 1);
        assert_eq!(reg.names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn registry_resolver_uses_user_bot() {
        let mut reg = BotRegistry::new();
        reg.register(Arc::new(Users)).unwrap();
        let resolver = RegistryTokenResolver::new(Arc::new(reg));

        let id = resolver.resolve_token("good").await.unwrap();
        assert_eq!(id, Some(Identity { uid: "u1".into() }));
        assert_eq!(resolver.resolve_token("bad").await.unwrap(), None);
    }

    #[tokio::test]
    async fn registry_resolver_without_user_bot() {
        let resolver = RegistryTokenResolver::new(Arc::new(BotRegistry::new()));
        assert_eq!(resolver.resolve_token("any").await.unwrap(), None);
    }
}
