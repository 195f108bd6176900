//! Engine error type.
//!
//! Script-facing failures travel as `mlua::Error` inside the interpreter;
//! this enum covers the Rust-side surface (state construction, loading,
//! command parsing) and converts into `mlua::Error` where a script caused it.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElunaError {
    #[error("interpreter error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("cannot read script root `{path}`: {source}")]
    ScriptRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read `{path}`: {source}")]
    ReadScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error loading `{path}`: {message}")]
    Compile { path: PathBuf, message: String },

    #[error("not a reload command: `{0}`")]
    NotReloadCommand(String),

    #[error("invalid reload argument `{0}`")]
    InvalidReloadArgument(String),

    #[error("Unknown event type (regtype {reg_type}, id {id}, event {event})")]
    UnknownEvent { reg_type: u8, id: u32, event: u32 },

    #[error("Couldn't find a {kind} with (ID: {entry})!")]
    UnknownEntry { kind: &'static str, entry: u32 },

    #[error("Eluna is disabled")]
    Disabled,

    #[error("state is busy dispatching; reload deferred")]
    Busy,
}

impl From<ElunaError> for mlua::Error {
    fn from(err: ElunaError) -> Self {
        match err {
            ElunaError::Lua(e) => e,
            other => mlua::Error::runtime(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ElunaError>;
