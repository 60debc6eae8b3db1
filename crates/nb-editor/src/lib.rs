//! # Overview
//!
//! `nb-editor` is the outermost crate of the editor control plane: it owns
//! the [`BufferRegistry`] (bijective buffer id ↔ path mapping) and the
//! [`Wrapper`] facade that an embedding host programs against, built on top
//! of `nb-session`'s protocol engine and `nb-transport`'s line transport.
//!
//! # Design
//!
//! [`Wrapper`] holds the [`nb_session::ProtocolEngine`] and the
//! [`BufferRegistry`] by value, side by side; there is no cyclic ownership
//! between them (see `nb-session`'s module docs). Every public `Wrapper`
//! method that talks to the engine immediately drains and routes any
//! editor-originated events the engine collected, so subscribers never see
//! a registry mutation out of order relative to the call that triggered it.
//!
//! [`EditorLauncher`] is the trait boundary through which the editor
//! subprocess is spawned; [`ProcessLauncher`] is the provided real
//! implementation, kept separate from the core contract so tests can
//! supply a fake that never actually launches a process.
//!
//! # Errors
//!
//! [`EditorError`] aggregates every lower-layer error type (`nb_session::ProtocolError`,
//! `nb_transport::TransportError`, [`RegistryError`], [`LaunchError`]) behind
//! one type so `Wrapper` methods return a single error to the host.
//!
//! # See also
//!
//! - `nb-session` for the protocol engine and session state machine.
//! - `nb-wire` for the argument codec.
//! - `nb-transport` for the line transport.

mod error;
mod launcher;
mod registry;
mod wrapper;

pub use error::{EditorError, LaunchError, RegistryError};
pub use launcher::{EditorLauncher, EditorProcess, ProcessLauncher};
pub use registry::{BufferEvent, BufferRegistry};
pub use wrapper::{Cursor, Wrapper};

#[cfg(test)]
mod tests;
