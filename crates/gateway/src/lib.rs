//! Receptor: the HTTP(S) front door of a process hosting many bots.
//!
//! Lifecycle:
//! 1. Register bots, run their `start` hooks
//! 2. Build routes (built-ins, then each bot's)
//! 3. Bind HTTP and HTTPS with port fallback
//! 4. Run every bot's `ready` hook once both listeners are up
//!
//! Per request: front door (identity, locale, session, token) → guards
//! (hashcash, then auth) → capability → envelope → dispatcher.

pub mod bots;
pub mod dispatch;
pub mod error;
pub mod hashcash;
pub mod listener;
pub mod locale;
pub mod pipeline;
pub mod routes;
pub mod server;
pub mod state;
#[cfg(feature = "tls")]
pub mod tls;

pub use {
    bots::{Bot, BotRegistry, BotRequest, Identity, TokenResolver, UploadedFile},
    routes::{Capability, RouteOptions, RouteRegistrar},
    server::{build_gateway_app, gateway_routes, start_gateway},
    state::GatewayState,
};
