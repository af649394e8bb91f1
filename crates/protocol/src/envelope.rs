use std::collections::BTreeMap;

use {
    base64::Engine,
    bytes::Bytes,
    serde::Serialize,
    serde_json::{Map, Value},
};

use crate::codes::{BotError, ErrorCode};

/// Outcome code of a fulfilled capability.
pub const SUCCESS: i64 = 1;
/// Outcome code of a rejected capability or a failed guard.
pub const FAILURE: i64 = 0;

/// Session mutations declared by a handler: `Some` sets a key, `None` deletes it.
pub type SessionPatch = BTreeMap<String, Option<Value>>;

// ── Payload ──────────────────────────────────────────────────────────────────

/// The `data` part of a reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    Empty,
    Json(Value),
    Bytes(Bytes),
}

impl Payload {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Json(Value::Object(m)) => Some(m),
            _ => None,
        }
    }

    /// JSON view used in envelope bodies. Binary data is base64-encoded.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Empty => Value::Object(Map::new()),
            Self::Json(v) => v.clone(),
            Self::Bytes(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
        }
    }

    /// Raw body bytes for passthrough responses.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Json(Value::String(s)) => Bytes::from(s.clone()),
            Self::Json(v) => Bytes::from(v.to_string()),
            Self::Bytes(b) => b.clone(),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

// ── Reply ────────────────────────────────────────────────────────────────────

/// What a capability returns on success.
///
/// The dispatcher picks the wire behaviour from these fields: a MIME type in
/// `message` means binary passthrough, an http(s) URL in `message` means proxy,
/// `redirect` with a URL means 301, an `outcome >= 100` means status + headers.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    /// Overrides the success outcome code (e.g. an HTTP status).
    pub outcome: Option<i64>,
    pub message: String,
    pub data: Payload,
    pub session: SessionPatch,
    pub redirect: bool,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain JSON reply.
    pub fn data(data: impl Into<Payload>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Binary content served verbatim with the given content type.
    pub fn bytes(content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            message: content_type.into(),
            data: Payload::Bytes(bytes.into()),
            ..Self::default()
        }
    }

    /// 301 redirect to `url`.
    pub fn redirect(url: impl Into<String>) -> Self {
        Self {
            data: Payload::Json(Value::String(url.into())),
            redirect: true,
            ..Self::default()
        }
    }

    /// Stream the body of `url` back to the client.
    pub fn proxy(url: impl Into<String>) -> Self {
        Self {
            message: url.into(),
            ..Self::default()
        }
    }

    /// Bare status response carrying only headers.
    pub fn status<K, V>(status: u16, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let headers: Map<String, Value> = headers
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        Self {
            outcome: Some(i64::from(status)),
            data: Payload::Json(Value::Object(headers)),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn set_session(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.session.insert(key.into(), Some(value.into()));
        self
    }

    pub fn unset_session(mut self, key: impl Into<String>) -> Self {
        self.session.insert(key.into(), None);
        self
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::data(value)
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// Normalised result of a request, consumed once by the dispatcher.
///
/// An envelope that was never completed (`done == false`) is answered with a
/// 404 regardless of its other fields.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub outcome: i64,
    pub message: String,
    pub data: Payload,
    pub error_code: Option<ErrorCode>,
    pub session_patch: SessionPatch,
    pub redirect: bool,
    pub done: bool,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            outcome: FAILURE,
            message: String::new(),
            data: Payload::Empty,
            error_code: None,
            session_patch: SessionPatch::new(),
            redirect: false,
            done: false,
        }
    }
}

impl Envelope {
    /// Placeholder for a request no route has answered yet.
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn from_reply(reply: Reply) -> Self {
        Self {
            outcome: reply.outcome.unwrap_or(SUCCESS),
            message: reply.message,
            data: reply.data,
            error_code: None,
            session_patch: reply.session,
            redirect: reply.redirect,
            done: true,
        }
    }

    pub fn from_error(err: BotError) -> Self {
        Self {
            outcome: FAILURE,
            message: err.message,
            data: err.data.map(Payload::Json).unwrap_or_default(),
            error_code: Some(err.code),
            session_patch: SessionPatch::new(),
            redirect: false,
            done: true,
        }
    }

    pub fn failure(code: ErrorCode) -> Self {
        Self::from_error(BotError::new(code))
    }

    /// `outcome`, or `outcome:code` when an error code is present.
    pub fn outcome_label(&self) -> String {
        match &self.error_code {
            Some(code) => format!("{}:{code}", self.outcome),
            None => self.outcome.to_string(),
        }
    }

    pub fn to_body(&self, cost_ms: u64) -> EnvelopeBody<'_> {
        EnvelopeBody {
            result: self.outcome,
            message: &self.message,
            data: self.data.to_json(),
            code: self.error_code.as_ref(),
            cost: cost_ms,
        }
    }
}

/// JSON shape of an envelope on the wire.
#[derive(Debug, Serialize)]
pub struct EnvelopeBody<'a> {
    pub result: i64,
    pub message: &'a str,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'a ErrorCode>,
    pub cost: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn reply_becomes_done_success() {
        let env = Envelope::from_reply(
            Reply::data(json!([1, 2, 3]))
                .with_message("listed")
                .set_session("cart", 3)
                .unset_session("draft"),
        );
        assert!(env.done);
        assert_eq!(env.outcome, SUCCESS);
        assert_eq!(env.data, Payload::Json(json!([1, 2, 3])));
        assert_eq!(env.message, "listed");
        assert_eq!(env.session_patch.get("cart"), Some(&Some(json!(3))));
        assert_eq!(env.session_patch.get("draft"), Some(&None));
    }

    #[test]
    fn error_becomes_done_failure() {
        let env = Envelope::from_error(
            BotError::new(ErrorCode::INVALID_INPUT).with_data(json!({"field": "email"})),
        );
        assert!(env.done);
        assert_eq!(env.outcome, FAILURE);
        assert_eq!(env.error_code, Some(ErrorCode::INVALID_INPUT));
        assert_eq!(env.message, "invalid input");
        assert_eq!(env.outcome_label(), "0:10000");
    }

    #[test]
    fn pending_is_not_done() {
        let env = Envelope::pending();
        assert!(!env.done);
        assert_eq!(env.outcome_label(), "0");
    }

    #[test]
    fn status_reply_carries_headers() {
        let env = Envelope::from_reply(Reply::status(204, [("X-Custom", "v")]));
        assert_eq!(env.outcome, 204);
        assert_eq!(
            env.data.as_object().and_then(|m| m.get("X-Custom")),
            Some(&json!("v"))
        );
    }

    #[test]
    fn body_omits_absent_code() {
        let env = Envelope::from_reply(Reply::new().with_message("ok"));
        let body = serde_json::to_value(env.to_body(7)).unwrap();
        assert_eq!(
            body,
            json!({"result": 1, "message": "ok", "data": {}, "cost": 7})
        );

        let env = Envelope::failure(ErrorCode::INVALID_HASHCASH);
        let body = serde_json::to_value(env.to_body(0)).unwrap();
        assert_eq!(body["code"], json!("10101"));
    }

    #[test]
    fn binary_payload_passthrough_bytes() {
        let reply = Reply::bytes("image/png", vec![0x89, 0x50, 0x4e, 0x47]);
        assert_eq!(reply.message, "image/png");
        assert_eq!(reply.data.to_bytes().as_ref(), &[0x89, 0x50, 0x4e, 0x47]);
    }
}
