use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};

// ── Error codes ──────────────────────────────────────────────────────────────

/// A stable five-digit error code surfaced to clients as a string.
///
/// Codes outside the catalogue collapse to [`ErrorCode::UNKNOWN`], so a client
/// never sees a code it cannot look up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(Cow<'static, str>);

impl ErrorCode {
    pub const COMMAND_NOT_FOUND: Self = Self(Cow::Borrowed("00002"));
    pub const INVALID_HASHCASH: Self = Self(Cow::Borrowed("10101"));
    pub const INVALID_INPUT: Self = Self(Cow::Borrowed("10000"));
    pub const INVALID_LANGUAGE: Self = Self(Cow::Borrowed("10601"));
    pub const TIMEOUT: Self = Self(Cow::Borrowed("00001"));
    pub const UNAUTHORIZED: Self = Self(Cow::Borrowed("10201"));
    pub const UNKNOWN: Self = Self(Cow::Borrowed("00000"));

    /// Normalise a numeric or string code: short codes are zero-padded to five
    /// digits, anything not in the catalogue becomes [`ErrorCode::UNKNOWN`].
    pub fn new(code: impl fmt::Display) -> Self {
        let raw = code.to_string();
        let raw = raw.trim();
        let padded = if raw.len() < 5 {
            format!("{raw:0>5}")
        } else {
            raw.to_string()
        };
        match CATALOGUE.iter().find(|(c, _)| *c == padded) {
            Some((c, _)) => Self(Cow::Borrowed(c)),
            None => Self::UNKNOWN,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable description from the catalogue.
    pub fn describe(&self) -> &'static str {
        CATALOGUE
            .iter()
            .find(|(c, _)| *c == self.as_str())
            .map(|(_, d)| *d)
            .unwrap_or("unknown exception")
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        Self::new(code)
    }
}

const CATALOGUE: &[(&str, &str)] = &[
    ("00000", "unknown exception"),
    ("00001", "timeout"),
    ("00002", "command not found"),
    ("01001", "DB write error"),
    ("01002", "DB read error"),
    ("01003", "DB update error"),
    ("01004", "DB delete error"),
    ("10000", "invalid input"),
    ("10001", "invalid time format"),
    ("10002", "invalid quality"),
    ("10003", "invalid image format"),
    ("10004", "invalid image width"),
    ("10101", "invalid hashcash"),
    ("10201", "user not authorized"),
    ("10301", "invalid verify code"),
    ("10601", "invalid language"),
    ("12001", "invalid email"),
    ("19001", "invalid source file"),
    ("19002", "file size too small"),
    ("19003", "not image file"),
    ("19004", "file size too huge"),
    ("19005", "not video file"),
    ("19006", "not subtitle file"),
    ("19100", "invalid uid"),
    ("19101", "incorrect account/password"),
    ("19102", "invalid user data"),
    ("19103", "incorrect old password"),
    ("19104", "incorrect reset code"),
    ("22001", "occupied email"),
    ("29101", "duplicate user data"),
    ("31000", "only local database can run test"),
    ("39101", "register data not found"),
    ("39102", "user not found"),
    ("40301", "verification failed too many times"),
    ("42001", "email quota exceeded"),
    ("49101", "login failed too many times"),
    ("49102", "reset failed too many times"),
    ("69101", "user no permission to login"),
    ("70201", "overdue token"),
    ("88900", "upload failed"),
    ("89000", "delete failed"),
];

// ── Bot error ────────────────────────────────────────────────────────────────

/// Rejection raised by a capability. Always surfaced to the client, never fatal.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct BotError {
    pub code: ErrorCode,
    pub message: String,
    /// Optional diagnostic payload returned as the envelope `data`.
    pub data: Option<serde_json::Value>,
}

impl BotError {
    pub fn new(code: impl Into<ErrorCode>) -> Self {
        let code = code.into();
        Self {
            message: code.describe().to_string(),
            code,
            data: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<ErrorCode> for BotError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}
