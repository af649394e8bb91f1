//! Listener management with port fallback.
//!
//! Each protocol walks `Binding(port) -> Listening(port)`. An address already
//! in use moves on to the next port: the front of the fallback list, else the
//! previous port plus one. Any other bind error is fatal. The first successful
//! bind is signalled once; if the server later stops with an error the manager
//! rebinds on the next port without signalling again.

use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    io,
    net::{IpAddr, SocketAddr},
};

use {
    tokio::{net::TcpListener, sync::oneshot},
    tracing::{info, warn},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::Https => "https",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("{protocol} listener failed on port {port}: {source}")]
    Io {
        protocol: Protocol,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("{protocol} listener gave up after {attempts} attempts (last port {last_port})")]
    Exhausted {
        protocol: Protocol,
        attempts: u32,
        last_port: u16,
    },
}

/// Current port plus the ordered fallbacks still to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortState {
    pub current: u16,
    pub fallbacks: VecDeque<u16>,
}

impl PortState {
    pub fn new(port: u16, fallbacks: impl IntoIterator<Item = u16>) -> Self {
        Self {
            current: port,
            fallbacks: fallbacks.into_iter().collect(),
        }
    }

    /// Move to the next candidate. `None` once counting upward overflows.
    pub fn advance(&mut self) -> Option<u16> {
        let next = match self.fallbacks.pop_front() {
            Some(port) => port,
            None => self.current.checked_add(1)?,
        };
        self.current = next;
        Some(next)
    }
}

pub struct ListenerManager {
    protocol: Protocol,
    addr: IpAddr,
    ports: PortState,
    max_attempts: u32,
    attempts: u32,
    attempted: Vec<u16>,
    signal: Option<oneshot::Sender<u16>>,
}

impl ListenerManager {
    pub fn new(protocol: Protocol, addr: IpAddr, ports: PortState, max_attempts: u32) -> Self {
        Self {
            protocol,
            addr,
            ports,
            max_attempts: max_attempts.max(1),
            attempts: 0,
            attempted: Vec::new(),
            signal: None,
        }
    }

    /// Receive the port of the first successful bind.
    pub fn on_listening(&mut self) -> oneshot::Receiver<u16> {
        let (tx, rx) = oneshot::channel();
        self.signal = Some(tx);
        rx
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Every port a bind was attempted on, in order.
    pub fn attempted(&self) -> &[u16] {
        &self.attempted
    }

    /// Bind the current port, moving along on address conflicts.
    pub async fn bind(&mut self) -> Result<TcpListener, BindError> {
        loop {
            let port = self.ports.current;
            if self.attempts >= self.max_attempts {
                return Err(self.exhausted(port));
            }
            self.attempts += 1;
            self.attempted.push(port);

            match TcpListener::bind(SocketAddr::new(self.addr, port)).await {
                Ok(listener) => {
                    let bound = listener.local_addr().map(|a| a.port()).unwrap_or(port);
                    info!(protocol = %self.protocol, port = bound, "listening");
                    if let Some(tx) = self.signal.take() {
                        let _ = tx.send(bound);
                    }
                    return Ok(listener);
                },
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    info!(protocol = %self.protocol, port, "port in use, trying next");
                    if self.ports.advance().is_none() {
                        return Err(self.exhausted(port));
                    }
                },
                Err(source) => {
                    return Err(BindError::Io {
                        protocol: self.protocol,
                        port,
                        source,
                    });
                },
            }
        }
    }

    /// Bind and hand each listener to `serve`. When `serve` fails the next
    /// port is bound. Returns once `serve` finishes cleanly or binding gives up.
    pub async fn run<F, Fut>(mut self, mut serve: F) -> Result<(), BindError>
    where
        F: FnMut(TcpListener) -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        loop {
            let listener = self.bind().await?;
            let port = self.ports.current;
            match serve(listener).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(protocol = %self.protocol, port, error = %e, "server stopped, rebinding");
                    if self.ports.advance().is_none() {
                        return Err(self.exhausted(port));
                    }
                },
            }
        }
    }

    fn exhausted(&self, last_port: u16) -> BindError {
        BindError::Exhausted {
            protocol: self.protocol,
            attempts: self.attempts,
            last_port,
        }
    }
}
