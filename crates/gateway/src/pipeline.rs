//! Front-door middleware: client identity, locale, session and bearer token.
//!
//! Runs before routing for every request and installs an
//! `Arc<RequestContext>` extension that routes and the dispatcher read from.
//! The session is saved back to the store after the response is produced.

use std::{
    net::SocketAddr,
    sync::{Arc, LazyLock},
    time::Instant,
};

use {
    axum::{
        extract::{ConnectInfo, Request, State},
        http::{
            HeaderMap, HeaderName, HeaderValue, Method,
            header::{ACCEPT_LANGUAGE, AUTHORIZATION, COOKIE},
        },
        middleware::Next,
        response::{IntoResponse, Response},
    },
    axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar},
    regex::Regex,
    serde_json::{Map, Value},
    tokio::sync::Mutex,
    tracing::{debug, error},
};

use {
    swarm_protocol::{Envelope, ErrorCode, SessionPatch},
    swarm_sessions::{Session, new_session_id},
};

use crate::{dispatch, error::GatewayError, locale, state::GatewayState};

pub const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");
pub const CLIENT_IP: HeaderName = HeaderName::from_static("client-ip");
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// One dotted-quad component, 0 to 255.
const OCTET: &str = r"(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)";

static IPV4: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(&format!(r"\b(?:{OCTET}\.){{3}}{OCTET}\b")).ok());

// ── Request context ──────────────────────────────────────────────────────────

/// Everything the front door learned about a request.
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub ip: String,
    pub port: Option<u16>,
    pub locale: String,
    pub session_id: String,
    /// The session was created by this request and needs a cookie.
    pub new_session: bool,
    session: Mutex<Session>,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(
        request: &Request,
        ip: String,
        port: Option<u16>,
        locale: String,
        session_id: String,
        session: Session,
        new_session: bool,
    ) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            headers: request.headers().clone(),
            ip,
            port,
            locale,
            session_id,
            new_session,
            session: Mutex::new(session),
            started_at: Instant::now(),
        }
    }

    /// Snapshot of the session as it stands.
    pub async fn session(&self) -> Session {
        self.session.lock().await.clone()
    }

    pub async fn apply_patch(&self, patch: &SessionPatch) {
        if !patch.is_empty() {
            self.session.lock().await.apply(patch);
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.lock().await.is_authenticated()
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Request details for warn-level logs, with credentials redacted.
    pub async fn describe(&self) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(name, value)| {
                let shown = if name == AUTHORIZATION || name == COOKIE {
                    "[redacted]".to_string()
                } else {
                    String::from_utf8_lossy(value.as_bytes()).into_owned()
                };
                (name.as_str().to_string(), Value::String(shown))
            })
            .collect();
        serde_json::json!({
            "method": self.method.as_str(),
            "path": self.path,
            "query": self.query,
            "ip": self.ip,
            "port": self.port,
            "locale": self.locale,
            "session": self.session_id,
            "uid": self.session.lock().await.uid,
            "headers": headers,
        })
    }
}

// ── Pipeline steps ───────────────────────────────────────────────────────────

/// Client address: the first IPv4 in `X-Forwarded-For`, else the raw header,
/// else the peer address. The port always comes from the peer.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> (String, Option<u16>) {
    let port = peer.map(|p| p.port());
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(forwarded) = forwarded {
        let ip = IPV4
            .as_ref()
            .and_then(|re| re.find(forwarded))
            .map_or_else(|| forwarded.to_string(), |m| m.as_str().to_string());
        return (ip, port);
    }
    let ip = peer.map_or_else(|| "0.0.0.0".to_string(), |p| p.ip().to_canonical().to_string());
    (ip, port)
}

/// The token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

async fn resolve_session(
    state: &GatewayState,
    jar: &SignedCookieJar,
) -> Result<(String, Session, bool), GatewayError> {
    if let Some(cookie) = jar.get(state.cookie_name()) {
        let id = cookie.value().to_string();
        if let Some(session) = state
            .sessions
            .load(&id)
            .await
            .map_err(GatewayError::SessionStore)?
        {
            return Ok((id, session, false));
        }
    }
    Ok((new_session_id(), Session::default(), true))
}

// ── Middleware ───────────────────────────────────────────────────────────────

pub async fn front_door(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (ip, port) = client_identity(request.headers(), peer);
    let accept_language = request
        .headers()
        .get(ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok());
    let locale = locale::negotiate(accept_language, &state.config.locale);
    let jar = SignedCookieJar::from_headers(request.headers(), state.cookie_key.clone());

    let (session_id, mut session, new_session, failure) =
        match resolve_session(&state, &jar).await {
            Ok((id, session, new)) => (id, session, new, None),
            Err(e) => (new_session_id(), Session::default(), true, Some(e)),
        };
    session.set_client(&ip, port);

    if failure.is_none()
        && let Some(token) = bearer_token(request.headers())
    {
        match state.token_resolver.resolve_token(token).await {
            Ok(Some(identity)) => session.uid = Some(identity.uid),
            Ok(None) => debug!(ip = %ip, "bearer token not recognised"),
            Err(e) => debug!(ip = %ip, error = %e, "bearer token rejected"),
        }
    }

    let ctx = Arc::new(RequestContext::new(
        &request,
        ip,
        port,
        locale,
        session_id,
        session,
        new_session,
    ));

    let response = match failure {
        Some(e) => {
            error!(error = %e, path = %ctx.path, "request pipeline failed");
            dispatch::respond(&state, &ctx, Envelope::failure(ErrorCode::UNKNOWN)).await
        },
        None => {
            request.extensions_mut().insert(Arc::clone(&ctx));
            let response = next.run(request).await;
            match state.sessions.save(&ctx.session_id, &ctx.session().await).await {
                Ok(()) => response,
                Err(e) => {
                    let e = GatewayError::SessionStore(e);
                    error!(error = %e, path = %ctx.path, "request pipeline failed");
                    dispatch::render(&state, &ctx, Envelope::failure(ErrorCode::UNKNOWN)).await
                },
            }
        },
    };

    finish(&state, &ctx, jar, response)
}

/// Attach the session cookie for new sessions and the per-response headers.
fn finish(
    state: &GatewayState,
    ctx: &RequestContext,
    jar: SignedCookieJar,
    response: Response,
) -> Response {
    let mut response = if ctx.new_session {
        let cookie = Cookie::build((state.cookie_name().to_string(), ctx.session_id.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build();
        (jar.add(cookie), response).into_response()
    } else {
        response
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&state.powered_by) {
        headers.insert(X_POWERED_BY, value);
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.ip) {
        headers.insert(CLIENT_IP, value);
    }
    response
}
