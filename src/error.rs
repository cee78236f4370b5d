//! Crate-level error types.
//!
//! Watcher and hook callbacks use `anyhow::Result` (caller code, arbitrary
//! failure shapes); everything the engine itself can fail on is a typed
//! variant here.

use thiserror::Error;

/// Errors surfaced by the engine itself (not by caller callbacks).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("settings store: {0}")]
    Settings(#[from] SettingsError),

    #[error("selector: {0}")]
    Selector(#[from] SelectorError),

    #[error("module `{name}` load failed: {source}")]
    ModuleLoad {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("node {0:?} is not in the document")]
    StaleNode(crate::dom::NodeId),

    #[error("url pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Errors from the user settings store.
///
/// Policy: these propagate - a module running with the wrong enablement
/// is worse than a module not running, so no silent defaulting.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed settings file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("settings root must be a JSON object")]
    NotAnObject,
}

/// Errors from compiling a selector string into a matcher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,

    #[error("unexpected character `{ch}` at offset {offset}")]
    Unexpected { ch: char, offset: usize },

    #[error("unterminated attribute test")]
    UnterminatedAttr,
}
