//! domwatch - a reactive page-augmentation engine.
//!
//! Watches a live, externally-mutated document tree and delivers matching
//! nodes to registered watchers, while a lifecycle manager loads, reloads
//! and unloads augmentation modules as the host application navigates.
//!
//! The engine core is fully synchronous and deterministic: every concern
//! (mutation dispatch, timers, visibility, navigation) is advanced by one
//! [`Engine::tick`] call. An optional tokio [`Runtime`] pumps the tick at
//! a fixed interval for embedders that want a background loop.
//!
//! ```text
//! host mutations -> Document records -> MutationDispatcher -> watchers
//! url changes    -> PageClassifier   -> ModuleManager      -> load/reload/unload
//! ```

pub mod dom;
pub mod engine;
pub mod error;
pub mod logger;
pub mod manager;
pub mod module;
pub mod settings;
pub mod timers;
pub mod watch;

pub use dom::{Document, MutationRecord, NodeId, Rect, Selector};
pub use engine::{Engine, EngineBuilder, Runtime};
pub use error::EngineError;
pub use manager::{LobbyContext, ModuleAction, ModuleManager, PageClassifier, PageTag, Pages, UrlPatterns};
pub use module::{Module, ModuleCtx};
pub use settings::{JsonFileStore, MemoryStore, SettingsStore};
pub use timers::{TimerHandle, TimerWheel};
pub use watch::{MutationDispatcher, Owner, VisibilityGate, WatchId};
