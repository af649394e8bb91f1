/// Failures at the request-pipeline boundary. These never reach a client
/// verbatim; they are logged and answered with a generic failure envelope.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("session store failed: {0:#}")]
    SessionStore(anyhow::Error),

    #[error("request body rejected: {0}")]
    Body(String),
}
