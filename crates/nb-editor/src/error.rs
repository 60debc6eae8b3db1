use nb_session::ProtocolError;
use nb_transport::TransportError;

/// Errors raised by [`crate::BufferRegistry`] lookups and mutations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no buffer is registered under id {0}")]
    UnknownId(u64),
    #[error("more than one buffer is registered under id {0}; this is a registry invariant violation")]
    AmbiguousId(u64),
}

/// Failure to launch the editor subprocess.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn editor process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("editor executable path was not configured")]
    MissingExecutable,
}

/// Top-level error returned by every [`crate::Wrapper`] method, aggregating
/// the lower layers' error types the way a host-facing facade should: one
/// type to match on, with `#[from]` conversions for each layer beneath it.
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
}
