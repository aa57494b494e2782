//! Common types shared across the DocMirror crates.
//!
//! This module provides the error taxonomy and the remote-node identifiers
//! used by the remote client, the mirroring engine and the CLI.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{AccessToken, NodeId, NodeKind, RemoteNode};
