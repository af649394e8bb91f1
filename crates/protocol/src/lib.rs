//! Wire-level types shared between the receptor and the bots it fronts.
//!
//! Every route handler produces a [`Reply`] (or a [`BotError`]); the receptor
//! wraps it in an [`Envelope`], which the response dispatcher consumes exactly
//! once to decide what goes on the wire.

pub mod codes;
pub mod envelope;

pub use {
    codes::{BotError, ErrorCode},
    envelope::{Envelope, EnvelopeBody, FAILURE, Payload, Reply, SUCCESS, SessionPatch},
};
