use rustc_hash::FxHashMap;

use super::{Owner, VisibilityCallback};
use crate::dom::{Document, NodeId};

/// A callback parked until its node scrolls into the viewport.
struct PendingVisibilityTask {
    owner: Option<Owner>,
    cb: VisibilityCallback,
}

/// Defers expensive or visually-dependent work until a node's bounding
/// box intersects the viewport (threshold 0 - any visible pixel counts).
///
/// Guarantees:
/// - a node carries at most one pending callback (re-registration replaces);
/// - each `when_visible` call fires at most once, however often the node
///   later enters and leaves the viewport.
pub struct VisibilityGate {
    pending: FxHashMap<NodeId, PendingVisibilityTask>,
}

impl VisibilityGate {
    pub fn new() -> Self {
        Self {
            pending: FxHashMap::default(),
        }
    }

    /// Run `cb` once `node` is visible. Already-visible nodes fire
    /// synchronously, inside this call.
    pub fn when_visible(
        &mut self,
        doc: &mut Document,
        node: NodeId,
        owner: Option<Owner>,
        cb: VisibilityCallback,
    ) {
        if Self::visible(doc, node) {
            fire(cb, doc, node);
            return;
        }
        if self.pending.insert(node, PendingVisibilityTask { owner, cb }).is_some() {
            crate::debug!("watch"; "visibility watch replaced for {node:?}");
        }
    }

    fn visible(doc: &Document, node: NodeId) -> bool {
        doc.is_attached(node)
            && doc
                .bounds(node)
                .is_some_and(|b| b.intersects(&doc.viewport()))
    }

    /// Fire every pending task whose node is now visible; drop tasks
    /// whose node no longer exists.
    pub fn pump(&mut self, doc: &mut Document) {
        let mut due: Vec<NodeId> = self
            .pending
            .keys()
            .copied()
            .filter(|&n| Self::visible(doc, n))
            .collect();
        due.sort_unstable();
        for node in due {
            if let Some(task) = self.pending.remove(&node) {
                fire(task.cb, doc, node);
            }
        }
        self.pending.retain(|&node, _| doc.contains(node));
    }

    /// Discard pending tasks owned by a torn-down module session.
    pub fn release_owner(&mut self, owner: &Owner) {
        self.pending
            .retain(|_, task| task.owner.as_ref() != Some(owner));
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for VisibilityGate {
    fn default() -> Self {
        Self::new()
    }
}

fn fire(cb: VisibilityCallback, doc: &mut Document, node: NodeId) {
    if let Err(err) = cb(doc, node) {
        crate::log!("error"; "visibility callback failed: {err:#}");
    }
}
