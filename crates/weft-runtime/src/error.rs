#![forbid(unsafe_code)]

//! Runtime error type.
//!
//! Only resource failures are reported here. Violated invariants (wrong
//! thread, nested top-level loop, freeing an untracked id) panic instead.

use weft_backend::PumpError;
use weft_core::IdError;

use crate::config::ConfigError;

/// Errors reported by the runtime to its caller.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An identifier or message-code space is exhausted.
    #[error(transparent)]
    Ids(#[from] IdError),
    /// A worker or task thread could not be spawned.
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    /// The message pump rejected a post.
    #[error(transparent)]
    Pump(#[from] PumpError),
}
