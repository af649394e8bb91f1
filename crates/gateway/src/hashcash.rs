//! Proof-of-work gate.
//!
//! A client proves work for a path by sending `Hashcash: <timestamp>:<nonce>`
//! where `SHA-256("<path>:<timestamp>:<nonce>")` has at least `level` leading
//! zero bits. Tokens are never stored, so a token can be replayed until
//! `allow_delay_ms` has elapsed since its timestamp.

use std::time::{SystemTime, UNIX_EPOCH};

use {
    serde_json::{Map, Value},
    sha2::{Digest, Sha256},
};

use {
    swarm_config::HashcashConfig,
    swarm_protocol::{BotError, ErrorCode},
};

/// Request header carrying the token.
pub const HEADER: &str = "hashcash";

/// Upper bound on nonces tried by [`solve`].
const SOLVE_LIMIT: u64 = 1 << 22;

/// A parsed `timestamp:nonce` pair. Non-numeric fields read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub timestamp: u64,
    pub nonce: u64,
}

impl Token {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw
            .trim()
            .split(':')
            .map(|p| p.trim().parse::<u64>().unwrap_or(0));
        Self {
            timestamp: parts.next().unwrap_or(0),
            nonce: parts.next().unwrap_or(0),
        }
    }
}

/// Why a token was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Missing,
    FutureTime,
    Timeout,
    Insufficient,
}

impl Rejection {
    /// Extra hint included in the challenge for time-related failures.
    pub fn information(self) -> Option<&'static str> {
        match self {
            Self::FutureTime => Some("future time"),
            Self::Timeout => Some("timeout"),
            Self::Missing | Self::Insufficient => None,
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// The string a nonce is appended to before hashing.
pub fn content(path: &str, timestamp: u64) -> String {
    format!("{path}:{timestamp}:")
}

pub fn digest(content: &str, nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hasher.finalize().into()
}

pub fn leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in bytes {
        if *byte == 0 {
            bits += 8;
        } else {
            return bits + byte.leading_zeros();
        }
    }
    bits
}

pub fn check(content: &str, nonce: u64, level: u32) -> bool {
    leading_zero_bits(&digest(content, nonce)) >= level
}

/// Hex SHA-256 of the content alone, as handed out in challenges.
pub fn challenge_hash(content: &str) -> String {
    Sha256::digest(content.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Client side: find the smallest nonce that satisfies `level`, giving up
/// after a bounded number of attempts. Never called while serving.
pub fn solve(content: &str, level: u32) -> Option<u64> {
    (0..SOLVE_LIMIT).find(|nonce| check(content, *nonce, level))
}

/// Check the header value for `path` against the clock.
pub fn verify(
    header: Option<&str>,
    path: &str,
    config: &HashcashConfig,
    now: u64,
) -> Result<Token, Rejection> {
    let raw = header.map(str::trim).filter(|h| !h.is_empty());
    let Some(raw) = raw else {
        return Err(Rejection::Missing);
    };
    let token = Token::parse(raw);
    if token.timestamp > now {
        return Err(Rejection::FutureTime);
    }
    if now - token.timestamp >= config.allow_delay_ms {
        return Err(Rejection::Timeout);
    }
    if !check(&content(path, token.timestamp), token.nonce, config.level) {
        return Err(Rejection::Insufficient);
    }
    Ok(token)
}

/// The `10101` error returned for a rejected token. `sample` is a fresh
/// `now:hash(path:now:)` challenge showing the content the client must work
/// on; it is not itself a valid token.
pub fn challenge(
    header: Option<&str>,
    path: &str,
    rejection: Rejection,
    config: &HashcashConfig,
    now: u64,
) -> BotError {
    let mut data = Map::new();
    data.insert(
        "hashcash".into(),
        header.map_or(Value::Null, |h| Value::String(h.to_string())),
    );
    let sample = format!("{now}:{}", challenge_hash(&content(path, now)));
    data.insert("sample".into(), Value::String(sample));
    if let Some(info) = rejection.information() {
        data.insert("information".into(), Value::String(info.into()));
    }
    BotError::new(ErrorCode::INVALID_HASHCASH).with_data(Value::Object(data))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config(level: u32) -> HashcashConfig {
        HashcashConfig {
            level,
            allow_delay_ms: 10_000,
        }
    }

    fn stamp(path: &str, timestamp: u64, level: u32) -> String {
        let nonce = solve(&content(path, timestamp), level).unwrap();
        format!("{timestamp}:{nonce}")
    }

    #[test]
    fn token_parse_coerces_garbage() {
        assert_eq!(Token::parse("12:34"), Token {
            timestamp: 12,
            nonce: 34
        });
        assert_eq!(Token::parse("abc:7"), Token {
            timestamp: 0,
            nonce: 7
        });
        assert_eq!(Token::parse("5"), Token {
            timestamp: 5,
            nonce: 0
        });
    }

    #[test]
    fn counts_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0xff]), 0);
        assert_eq!(leading_zero_bits(&[0x00, 0x10]), 11);
        assert_eq!(leading_zero_bits(&[0x00, 0x00]), 16);
    }

    #[test]
    fn solved_token_is_accepted() {
        let now = now_ms();
        let header = stamp("/api/echo", now - 100, 8);
        let token = verify(Some(&header), "/api/echo", &config(8), now).unwrap();
        assert_eq!(token.timestamp, now - 100);
    }

    #[test]
    fn token_is_bound_to_path() {
        let now = now_ms();
        let header = stamp("/a", now, 16);
        assert_eq!(
            verify(Some(&header), "/b", &config(16), now),
            Err(Rejection::Insufficient)
        );
    }

    #[test]
    fn replay_after_delay_times_out() {
        let now = now_ms();
        let header = stamp("/x", now - 10_000, 4);
        let err = verify(Some(&header), "/x", &config(4), now).unwrap_err();
        assert_eq!(err, Rejection::Timeout);
        assert_eq!(err.information(), Some("timeout"));
    }

    #[test]
    fn future_timestamp_rejected() {
        let now = now_ms();
        let header = stamp("/x", now + 5_000, 4);
        let err = verify(Some(&header), "/x", &config(4), now).unwrap_err();
        assert_eq!(err, Rejection::FutureTime);
        assert_eq!(err.information(), Some("future time"));
    }

    #[test]
    fn missing_header_rejected() {
        assert_eq!(
            verify(None, "/x", &config(4), now_ms()),
            Err(Rejection::Missing)
        );
        assert_eq!(
            verify(Some("  "), "/x", &config(4), now_ms()),
            Err(Rejection::Missing)
        );
    }

    #[test]
    fn challenge_sample_is_not_a_token() {
        let now = now_ms();
        let err = challenge(Some("1:2"), "/x", Rejection::Timeout, &config(20), now);
        assert_eq!(err.code, ErrorCode::INVALID_HASHCASH);

        let data = err.data.unwrap();
        assert_eq!(data["hashcash"], "1:2");
        assert_eq!(data["information"], "timeout");
        let sample = data["sample"].as_str().unwrap();
        assert_eq!(
            sample,
            format!("{now}:{}", challenge_hash(&content("/x", now)))
        );
        assert_eq!(
            verify(Some(sample), "/x", &config(20), now),
            Err(Rejection::Insufficient)
        );

        let err = challenge(None, "/x", Rejection::Missing, &config(4), now);
        let data = err.data.unwrap();
        assert!(data["hashcash"].is_null());
        assert!(data.get("information").is_none());
    }

    #[test]
    fn challenge_hash_is_hex_sha256() {
        assert_eq!(
            challenge_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
