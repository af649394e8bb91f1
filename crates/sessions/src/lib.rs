//! HTTP session state for the receptor.
//!
//! A session is addressed by an opaque id carried in a signed cookie and holds
//! the client's `ip`/`port`, the authenticated `uid`, and whatever keys bots
//! add through session patches.

pub mod session;
pub mod store;

pub use {
    session::Session,
    store::{MemorySessionStore, SessionStore, new_session_id},
};
