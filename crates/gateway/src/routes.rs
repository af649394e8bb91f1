//! Declarative route registration.
//!
//! Every route runs the same chain: hashcash guard, then auth guard, then the
//! adapter that builds a [`BotRequest`], calls the capability under the
//! request deadline and hands the resulting envelope to the dispatcher.

use std::{collections::HashMap, future::Future, sync::Arc};

use {
    async_trait::async_trait,
    axum::{
        Router,
        body::Body,
        extract::{FromRequest, FromRequestParts, Multipart, Path, Request, State},
        http::{HeaderMap, Method, StatusCode, header},
        response::{IntoResponse, Response},
        routing::{MethodFilter, on},
    },
    serde_json::{Map, Value},
    tracing::{debug, error, warn},
};

use swarm_protocol::{BotError, Envelope, ErrorCode, Reply};

use crate::{
    bots::{BotRegistry, BotRequest, UploadedFile},
    dispatch,
    error::GatewayError,
    hashcash,
    pipeline::RequestContext,
    state::GatewayState,
};

// ── Capabilities ─────────────────────────────────────────────────────────────

/// Anything a route can invoke.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn call(&self, request: BotRequest) -> Result<Reply, BotError>;
}

#[async_trait]
impl<F, Fut> Capability for F
where
    F: Fn(BotRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply, BotError>> + Send,
{
    async fn call(&self, request: BotRequest) -> Result<Reply, BotError> {
        (self)(request).await
    }
}

/// Forwards to a registered bot, looked up per call.
pub struct BotCapability {
    bots: Arc<BotRegistry>,
    name: String,
}

impl BotCapability {
    pub fn new(bots: Arc<BotRegistry>, name: impl Into<String>) -> Self {
        Self {
            bots,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Capability for BotCapability {
    async fn call(&self, request: BotRequest) -> Result<Reply, BotError> {
        match self.bots.find(&self.name) {
            Some(bot) => bot.execute(request).await,
            None => Err(BotError::new(ErrorCode::COMMAND_NOT_FOUND)),
        }
    }
}

// ── Descriptors ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guards {
    pub authorization: bool,
    pub hashcash: bool,
}

#[derive(Debug, Clone)]
pub struct RouteOptions {
    pub method: Method,
    pub guards: Guards,
}

impl RouteOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            guards: Guards::default(),
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// Require an authenticated session.
    pub fn with_authorization(mut self) -> Self {
        self.guards.authorization = true;
        self
    }

    /// Require a valid hashcash token.
    pub fn with_hashcash(mut self) -> Self {
        self.guards.hashcash = true;
        self
    }
}

pub struct RouteDescriptor {
    pub method: Method,
    pub path: String,
    pub guards: Guards,
    pub capability: Arc<dyn Capability>,
}

// ── Registrar ────────────────────────────────────────────────────────────────

pub struct RouteRegistrar {
    bots: Arc<BotRegistry>,
    routes: Vec<RouteDescriptor>,
}

impl RouteRegistrar {
    pub fn new(bots: Arc<BotRegistry>) -> Self {
        Self {
            bots,
            routes: Vec::new(),
        }
    }

    /// Add a route. Paths may use `:param` or `{param}` segments. A second
    /// registration for the same method and path is ignored.
    pub fn register(
        &mut self,
        options: RouteOptions,
        path: &str,
        capability: impl Capability + 'static,
    ) -> &mut Self {
        self.register_arc(options, path, Arc::new(capability))
    }

    pub fn register_arc(
        &mut self,
        options: RouteOptions,
        path: &str,
        capability: Arc<dyn Capability>,
    ) -> &mut Self {
        let Some(path) = normalize_path(path) else {
            warn!(method = %options.method, path, "malformed route path, ignoring");
            return self;
        };
        if self
            .routes
            .iter()
            .any(|r| r.path == path && r.method == options.method)
        {
            warn!(method = %options.method, path, "route already registered, ignoring");
            return self;
        }
        if let Some(existing) = self
            .routes
            .iter()
            .find(|r| r.path != path && path_shape(&r.path) == path_shape(&path))
        {
            warn!(
                method = %options.method,
                path,
                existing = %existing.path,
                "route conflicts with a differently named parameter, ignoring"
            );
            return self;
        }
        if MethodFilter::try_from(options.method.clone()).is_err() {
            warn!(method = %options.method, path, "unsupported route method, ignoring");
            return self;
        }
        self.routes.push(RouteDescriptor {
            method: options.method,
            path,
            guards: options.guards,
            capability,
        });
        self
    }

    /// Route to the bot registered under `name`.
    pub fn bot(&mut self, options: RouteOptions, path: &str, name: &str) -> &mut Self {
        let capability = BotCapability::new(Arc::clone(&self.bots), name);
        self.register(options, path, capability)
    }

    pub fn routes(&self) -> &[RouteDescriptor] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Build the axum router. Methods registered on the same path are merged
    /// into one method router.
    pub fn into_router(self) -> Router<Arc<GatewayState>> {
        let mut router = Router::new();
        for route in self.routes {
            let Ok(filter) = MethodFilter::try_from(route.method.clone()) else {
                continue;
            };
            let path = route.path.clone();
            let route = Arc::new(route);
            let handler = move |State(state): State<Arc<GatewayState>>, request: Request| {
                let route = Arc::clone(&route);
                async move { run_route(state, route, request).await }
            };
            router = router.route(&path, on(filter, handler));
        }
        router
    }
}

/// Convert `:param` and trailing `*rest` segments to axum's `{param}` and
/// `{*rest}` form and ensure a leading slash. Returns `None` for paths the
/// router would refuse: empty or repeated parameter names, a catch-all
/// before the last segment, or stray `:`, `*`, `{`, `}`.
pub fn normalize_path(path: &str) -> Option<String> {
    let raw: Vec<&str> = path.trim().trim_start_matches('/').split('/').collect();
    let last = raw.len() - 1;
    let mut names: Vec<&str> = Vec::new();
    let mut segments = Vec::with_capacity(raw.len());
    for (i, segment) in raw.iter().enumerate() {
        let (name, catch_all) = if let Some(name) = segment.strip_prefix(':') {
            (name, false)
        } else if let Some(name) = segment.strip_prefix('*') {
            (name, true)
        } else if let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            match inner.strip_prefix('*') {
                Some(name) => (name, true),
                None => (inner, false),
            }
        } else if segment.contains(['{', '}']) {
            return None;
        } else {
            segments.push((*segment).to_string());
            continue;
        };
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && (!catch_all || i == last)
            && !names.contains(&name);
        if !valid {
            return None;
        }
        names.push(name);
        segments.push(if catch_all {
            format!("{{*{name}}}")
        } else {
            format!("{{{name}}}")
        });
    }
    Some(format!("/{}", segments.join("/")))
}

/// A normalized path with parameter names erased; two paths with the same
/// shape cannot both be routed.
fn path_shape(path: &str) -> String {
    path.split('/')
        .map(|segment| match segment.strip_prefix("{*") {
            Some(_) => "{*}",
            None if segment.starts_with('{') => "{}",
            None => segment,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ── Execution ────────────────────────────────────────────────────────────────

/// The context installed by the front door, if any.
pub(crate) fn context_of(request: &Request) -> Option<Arc<RequestContext>> {
    request.extensions().get::<Arc<RequestContext>>().cloned()
}

async fn run_route(
    state: Arc<GatewayState>,
    route: Arc<RouteDescriptor>,
    request: Request,
) -> Response {
    let Some(ctx) = context_of(&request) else {
        error!(path = %route.path, "request reached a route without a context");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let envelope = evaluate(&state, &route, &ctx, request).await;
    dispatch::respond(&state, &ctx, envelope).await
}

/// Run the guard chain and the capability, producing a completed envelope.
pub(crate) async fn evaluate(
    state: &GatewayState,
    route: &RouteDescriptor,
    ctx: &RequestContext,
    request: Request,
) -> Envelope {
    if route.guards.hashcash {
        let config = &state.config.hashcash;
        let header = request
            .headers()
            .get(hashcash::HEADER)
            .and_then(|v| v.to_str().ok());
        let now = hashcash::now_ms();
        if let Err(rejection) = hashcash::verify(header, &ctx.path, config, now) {
            return Envelope::from_error(hashcash::challenge(
                header, &ctx.path, rejection, config, now,
            ));
        }
    }

    if route.guards.authorization && !ctx.is_authenticated().await {
        return Envelope::failure(ErrorCode::UNAUTHORIZED);
    }

    let bot_request = match build_request(state, ctx, request).await {
        Ok(r) => r,
        Err(e) => return Envelope::from_error(e),
    };

    match tokio::time::timeout(state.request_timeout(), route.capability.call(bot_request)).await
    {
        Ok(Ok(reply)) => Envelope::from_reply(reply),
        Ok(Err(e)) => Envelope::from_error(e),
        Err(_) => {
            warn!(method = %route.method, path = %route.path, "capability missed its deadline");
            Envelope::failure(ErrorCode::TIMEOUT)
        },
    }
}

// ── Request adapter ──────────────────────────────────────────────────────────

async fn build_request(
    state: &GatewayState,
    ctx: &RequestContext,
    request: Request,
) -> Result<BotRequest, BotError> {
    let (mut parts, body) = request.into_parts();
    let params = Path::<HashMap<String, String>>::from_request_parts(&mut parts, &())
        .await
        .map(|Path(p)| p)
        .unwrap_or_default();
    let query = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let mut bot_request = BotRequest {
        url: parts.uri.to_string(),
        method: parts.method.as_str().to_string(),
        params,
        query,
        body: Value::Object(Map::new()),
        files: Vec::new(),
        session_id: ctx.session_id.clone(),
        session: ctx.session().await,
        locale: ctx.locale.clone(),
    };

    match content_type(&parts.headers) {
        Some(ct) if ct.starts_with("multipart/form-data") => {
            let request = Request::from_parts(parts, body);
            read_multipart(request, &mut bot_request).await?;
        },
        ct => {
            let bytes = axum::body::to_bytes(body, state.config.server.max_body_bytes)
                .await
                .map_err(|e| {
                    let e = GatewayError::Body(e.to_string());
                    debug!(error = %e, path = %ctx.path, "unreadable request body");
                    invalid_input("request body could not be read")
                })?;
            bot_request.body = parse_body(ct.as_deref(), &bytes)?;
        },
    }
    Ok(bot_request)
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
}

fn invalid_input(message: &str) -> BotError {
    BotError::new(ErrorCode::INVALID_INPUT).with_message(message)
}

fn parse_body(content_type: Option<&str>, bytes: &[u8]) -> Result<Value, BotError> {
    if bytes.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match content_type {
        Some(ct) if ct.starts_with("application/json") => {
            serde_json::from_slice(bytes).map_err(|_| invalid_input("malformed JSON body"))
        },
        Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => Ok(Value::Object(
            url::form_urlencoded::parse(bytes)
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect(),
        )),
        _ => Ok(serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))),
    }
}

async fn read_multipart(request: Request<Body>, out: &mut BotRequest) -> Result<(), BotError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|_| invalid_input("malformed multipart body"))?;
    let mut fields = Map::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| invalid_input("malformed multipart body"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        if file_name.is_some() {
            let bytes = field
                .bytes()
                .await
                .map_err(|_| invalid_input("upload could not be read"))?;
            out.files.push(UploadedFile {
                field: name,
                file_name,
                content_type,
                bytes,
            });
        } else {
            let text = field
                .text()
                .await
                .map_err(|_| invalid_input("form field could not be read"))?;
            fields.insert(name, Value::String(text));
        }
    }
    out.body = Value::Object(fields);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn colon_params_become_braces() {
        assert_eq!(normalize_path("/user/:id").unwrap(), "/user/{id}");
        assert_eq!(normalize_path("item/:a/x/{b}").unwrap(), "/item/{a}/x/{b}");
        assert_eq!(normalize_path("/files/*rest").unwrap(), "/files/{*rest}");
        assert_eq!(normalize_path("/files/{*rest}").unwrap(), "/files/{*rest}");
        assert_eq!(normalize_path("/").unwrap(), "/");
    }

    #[test]
    fn unroutable_paths_are_refused() {
        for path in [
            "/odd/:",
            "/odd/*",
            "/odd/{}",
            "/odd/*rest/more",
            "/odd/:id/:id",
            "/odd/a{b",
            "/odd/:na-me",
        ] {
            assert_eq!(normalize_path(path), None, "{path}");
        }
    }

    #[test]
    fn malformed_and_conflicting_routes_are_skipped() {
        let mut routes = RouteRegistrar::new(Arc::new(BotRegistry::new()));
        routes
            .register(RouteOptions::get(), "/odd/:", |_r: BotRequest| async {
                Ok::<_, BotError>(Reply::new())
            })
            .register(RouteOptions::get(), "/wild/*", |_r: BotRequest| async {
                Ok::<_, BotError>(Reply::new())
            })
            .register(RouteOptions::get(), "/item/:id", |_r: BotRequest| async {
                Ok::<_, BotError>(Reply::new())
            })
            .register(RouteOptions::post(), "/item/:name", |_r: BotRequest| async {
                Ok::<_, BotError>(Reply::new())
            })
            .register(RouteOptions::get(), "/files/*rest", |_r: BotRequest| async {
                Ok::<_, BotError>(Reply::new())
            });
        let paths: Vec<&str> = routes.routes().iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/item/{id}", "/files/{*rest}"]);

        // Building the router must not panic on anything that was accepted.
        let _router = routes.into_router();
    }

    #[test]
    fn duplicate_routes_keep_first() {
        let mut routes = RouteRegistrar::new(Arc::new(BotRegistry::new()));
        routes
            .register(RouteOptions::get(), "/a/:id", |_r: BotRequest| async {
                Ok::<_, BotError>(Reply::new())
            })
            .register(RouteOptions::get(), "/a/{id}", |_r: BotRequest| async {
                Ok::<_, BotError>(Reply::new())
            })
            .register(
                RouteOptions::post().with_hashcash().with_authorization(),
                "/a/:id",
                |_r: BotRequest| async { Ok::<_, BotError>(Reply::new()) },
            );
        assert_eq!(routes.len(), 2);
        assert_eq!(routes.routes()[1].guards, Guards {
            authorization: true,
            hashcash: true,
        });
    }

    #[tokio::test]
    async fn missing_bot_is_command_not_found() {
        let cap = BotCapability::new(Arc::new(BotRegistry::new()), "ghost");
        let err = cap.call(BotRequest::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::COMMAND_NOT_FOUND);
    }

    #[test]
    fn bodies_by_content_type() {
        assert_eq!(
            parse_body(Some("application/json"), br#"{"a":1}"#).unwrap(),
            json!({"a": 1})
        );
        assert_eq!(
            parse_body(Some("application/x-www-form-urlencoded"), b"a=1&b=x+y").unwrap(),
            json!({"a": "1", "b": "x y"})
        );
        assert_eq!(parse_body(None, b"").unwrap(), json!({}));
        assert_eq!(parse_body(Some("text/plain"), b"hi").unwrap(), json!("hi"));

        let err = parse_body(Some("application/json"), b"{").unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_INPUT);
    }
}
