//! Live document tree - the embedding substrate.
//!
//! The engine does not own a browser. This module provides the arena-backed
//! document the host mutates; every mutating call records a
//! [`MutationRecord`], and the dispatcher drains that queue when pumped -
//! the crate's rendition of a MutationObserver record stream.
//!
//! The engine itself never interprets node content. It only calls
//! caller-supplied [`Matcher`] predicates and the document-order query
//! helpers here. [`Selector`] is a convenience layer that compiles a
//! compact selector string into a `Matcher`.

mod document;
mod mutation;
mod selector;


pub use document::{Document, Node, NodeId, Rect};
pub use mutation::MutationRecord;
pub use selector::Selector;

/// A node predicate. The engine hardcodes no selector syntax; watchers
/// supply one of these (usually via [`Selector::matcher`]).
pub type Matcher = Box<dyn Fn(&Document, NodeId) -> bool + Send>;
