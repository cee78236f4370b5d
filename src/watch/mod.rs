//! Mutation watching - registry, dispatcher, visibility gate.
//!
//! One dispatcher per engine observes the whole document; every watcher
//! shares it through the registry rather than installing its own observer.
//!
//! ```text
//! Document records -> MutationDispatcher::pump -> per-record delivery
//!                                              -> coalesced rescan
//! ```
//!
//! Four appearance contracts are layered on the dispatcher (see
//! [`MutationDispatcher`]), plus a one-shot disappearance watch. Watcher
//! callbacks return `anyhow::Result`; an error is logged and never stops
//! delivery to other watchers.

mod dispatcher;
mod registry;
mod visibility;


pub use dispatcher::MutationDispatcher;
pub use registry::{Owner, WatchId};
pub use visibility::VisibilityGate;

use crate::dom::{Document, NodeId};

/// Per-node watcher callback.
pub type WatchCallback = Box<dyn FnMut(&mut Document, NodeId) -> anyhow::Result<()> + Send>;

/// Whole-match-list watcher callback (document order).
pub type BatchCallback = Box<dyn FnMut(&mut Document, &[NodeId]) -> anyhow::Result<()> + Send>;

/// Extra per-candidate gate for filtered appearance watches.
pub type NodeTest = Box<dyn Fn(&Document, NodeId) -> bool + Send>;

/// One-shot callback for visibility-deferred work.
pub type VisibilityCallback = Box<dyn FnOnce(&mut Document, NodeId) -> anyhow::Result<()> + Send>;
