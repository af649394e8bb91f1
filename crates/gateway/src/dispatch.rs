//! Turns a completed envelope into an HTTP response.
//!
//! The first matching rule decides the wire behaviour:
//! 1. not done: 404 invalid operation
//! 2. `message` is a MIME type: binary body with that content type
//! 3. redirect flag with a URL: 301
//! 4. `message` is an http(s) URL: streamed upstream body
//! 5. `outcome >= 100`: bare status with `data` as headers
//! 6. anything else: 200 JSON envelope

use std::sync::LazyLock;

use {
    axum::{
        Json,
        body::Body,
        http::{
            HeaderName, HeaderValue, StatusCode,
            header::{CONTENT_TYPE, LOCATION},
        },
        response::{IntoResponse, Response},
    },
    futures::StreamExt,
    regex::Regex,
    tracing::{debug, info, warn},
};

use swarm_protocol::Envelope;

use crate::{pipeline::RequestContext, state::GatewayState};

/// Message of the body returned for requests nothing handled.
pub const INVALID_OPERATION: &str = "Invalid operation";

static MIME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-]+/[a-zA-Z0-9\-+.]+$").ok());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireBehavior {
    Invalid,
    Binary(String),
    Redirect(String),
    Proxy(String),
    Status(u16),
    Json,
}

pub fn is_mime(value: &str) -> bool {
    MIME.as_ref().is_some_and(|re| re.is_match(value))
}

/// Absolute http(s) URL with a host.
pub fn is_url(value: &str) -> bool {
    url::Url::parse(value)
        .is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
}

pub fn classify(envelope: &Envelope) -> WireBehavior {
    if !envelope.done {
        return WireBehavior::Invalid;
    }
    if is_mime(&envelope.message) {
        return WireBehavior::Binary(envelope.message.clone());
    }
    if envelope.redirect {
        let target = envelope
            .data
            .as_str()
            .filter(|d| is_url(d))
            .or_else(|| Some(envelope.message.as_str()).filter(|m| is_url(m)));
        if let Some(url) = target {
            return WireBehavior::Redirect(url.to_string());
        }
    }
    if is_url(&envelope.message) {
        return WireBehavior::Proxy(envelope.message.clone());
    }
    if envelope.outcome >= 100 {
        return WireBehavior::Status(u16::try_from(envelope.outcome).unwrap_or(u16::MAX));
    }
    WireBehavior::Json
}

/// Merge the session patch, render the envelope and write the access log.
pub async fn respond(state: &GatewayState, ctx: &RequestContext, envelope: Envelope) -> Response {
    ctx.apply_patch(&envelope.session_patch).await;

    if !envelope.done || envelope.error_code.is_some() {
        let described = ctx.describe().await;
        warn!(
            outcome = %envelope.outcome_label(),
            message = %envelope.message,
            context = %described,
            "request not fulfilled"
        );
    }

    let outcome = envelope.outcome_label();
    let response = render(state, ctx, envelope).await;
    info!(
        target: "swarm::access",
        method = %ctx.method,
        path = %ctx.path,
        outcome = %outcome,
        ip = %ctx.ip,
        elapsed_ms = ctx.elapsed_ms(),
        status = response.status().as_u16(),
        "request"
    );
    response
}

/// Render an envelope without touching the session or logging it.
pub async fn render(state: &GatewayState, ctx: &RequestContext, envelope: Envelope) -> Response {
    match classify(&envelope) {
        WireBehavior::Invalid => {
            let body = Envelope {
                message: INVALID_OPERATION.into(),
                ..Envelope::pending()
            };
            (
                StatusCode::NOT_FOUND,
                Json(body.to_body(ctx.elapsed_ms())),
            )
                .into_response()
        },
        WireBehavior::Binary(content_type) => {
            let bytes = envelope.data.to_bytes();
            match HeaderValue::from_str(&content_type) {
                Ok(value) => ([(CONTENT_TYPE, value)], bytes).into_response(),
                Err(_) => bytes.into_response(),
            }
        },
        WireBehavior::Redirect(url) => match HeaderValue::from_str(&url) {
            Ok(location) => (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response(),
            Err(_) => {
                warn!(url, "redirect target is not a valid header value");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            },
        },
        WireBehavior::Proxy(url) => proxy(state, &url).await,
        WireBehavior::Status(code) => status_only(code, &envelope),
        WireBehavior::Json => Json(envelope.to_body(ctx.elapsed_ms())).into_response(),
    }
}

fn status_only(code: u16, envelope: &Envelope) -> Response {
    let Ok(status) = StatusCode::from_u16(code) else {
        warn!(code, "reply asked for an invalid status code");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let mut response = status.into_response();
    if let Some(fields) = envelope.data.as_object() {
        let headers = response.headers_mut();
        for (key, value) in fields {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(&text),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                },
                _ => debug!(header = %key, "skipping invalid reply header"),
            }
        }
    }
    response
}

/// Stream `url` back to the client. Holds a proxy permit until the upstream
/// body is fully sent or the client goes away.
async fn proxy(state: &GatewayState, url: &str) -> Response {
    let Ok(permit) = state.proxy_permits.clone().acquire_owned().await else {
        return StatusCode::BAD_GATEWAY.into_response();
    };
    let upstream = match state.http.get(url).send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(url, error = %e, "upstream fetch failed");
            return StatusCode::BAD_GATEWAY.into_response();
        },
    };

    let status = upstream.status();
    let content_type = upstream.headers().get(CONTENT_TYPE).cloned();
    let stream = upstream.bytes_stream().map(move |chunk| {
        let _held = &permit;
        chunk
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use {
        super::*,
        serde_json::json,
        swarm_config::SwarmConfig,
        swarm_protocol::{BotError, ErrorCode, Reply},
        swarm_sessions::Session,
        tracing_subscriber::fmt::MakeWriter,
    };

    use crate::bots::BotRegistry;

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn done(reply: Reply) -> Envelope {
        Envelope::from_reply(reply)
    }

    #[test]
    fn mime_detection() {
        assert!(is_mime("image/png"));
        assert!(is_mime("application/vnd.api+json"));
        assert!(!is_mime("hello world"));
        assert!(!is_mime("https://example.com/a"));
        assert!(!is_mime(""));
    }

    #[test]
    fn classification_order() {
        assert_eq!(classify(&Envelope::pending()), WireBehavior::Invalid);
        assert_eq!(
            classify(&done(Reply::bytes("image/png", vec![1, 2]))),
            WireBehavior::Binary("image/png".into())
        );
        assert_eq!(
            classify(&done(Reply::redirect("https://example.com/next"))),
            WireBehavior::Redirect("https://example.com/next".into())
        );
        assert_eq!(
            classify(&done(Reply::proxy("http://127.0.0.1:9/file"))),
            WireBehavior::Proxy("http://127.0.0.1:9/file".into())
        );
        assert_eq!(
            classify(&done(Reply::status(204, [("X-Custom", "v")]))),
            WireBehavior::Status(204)
        );
        assert_eq!(
            classify(&done(Reply::data(json!({"a": 1})))),
            WireBehavior::Json
        );
        assert_eq!(
            classify(&Envelope::from_error(BotError::new(ErrorCode::INVALID_INPUT))),
            WireBehavior::Json
        );
    }

    #[test]
    fn redirect_without_url_is_plain_json() {
        let mut reply = Reply::redirect("not a url");
        reply.message = "still not".into();
        assert_eq!(classify(&done(reply)), WireBehavior::Json);
    }

    #[test]
    fn status_headers_are_copied() {
        let envelope = done(Reply::status(204, [("X-Custom", "v"), ("bad header", "x")]));
        let response = status_only(204, &envelope);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["x-custom"], "v");
        assert_eq!(response.headers().len(), 1);

        let response = status_only(1000, &envelope);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn rejection_logs_redacted_context() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let state = GatewayState::new(SwarmConfig::default(), Arc::new(BotRegistry::new()));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/thing?x=1")
            .header("authorization", "Bearer secret-token")
            .body(Body::empty())
            .unwrap();
        let ctx = RequestContext::new(
            &request,
            "10.0.0.1".into(),
            Some(4000),
            "en".into(),
            "sid".into(),
            Session::default(),
            false,
        );

        let envelope = Envelope::from_error(BotError::new(ErrorCode::INVALID_INPUT));
        let response = respond(&state, &ctx, envelope).await;
        assert_eq!(response.status(), StatusCode::OK);

        let output = captured.text();
        let warns: Vec<&str> = output.lines().filter(|l| l.contains("WARN")).collect();
        assert_eq!(warns.len(), 1, "{output}");
        let line = warns[0];
        assert!(line.contains("request not fulfilled"));
        assert!(line.contains(r#""method":"POST""#));
        assert!(line.contains(r#""path":"/api/thing""#));
        assert!(line.contains(r#""authorization":"[redacted]""#));
        assert!(!line.contains("secret-token"));
    }

    #[tokio::test]
    async fn fulfilled_request_logs_no_warning() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let state = GatewayState::new(SwarmConfig::default(), Arc::new(BotRegistry::new()));
        let request = axum::http::Request::builder()
            .uri("/ok")
            .body(Body::empty())
            .unwrap();
        let ctx = RequestContext::new(
            &request,
            "10.0.0.1".into(),
            None,
            "en".into(),
            "sid".into(),
            Session::default(),
            false,
        );

        let response = respond(&state, &ctx, done(Reply::data(json!({"a": 1})))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!captured.text().contains("WARN"));
    }
}
