use rustc_hash::FxHashSet;

use super::registry::{WatchKind, WatchRegistry, WatchTask};
use super::{BatchCallback, NodeTest, Owner, WatchCallback, WatchId};
use crate::dom::{Document, Matcher, MutationRecord, NodeId};

/// The single observer for the whole document.
///
/// Pure and synchronous: [`Self::pump`] drains the document's pending
/// records, delivers them to every registered task in registration order,
/// and then - coalesced to at most once per pump - rescans the live
/// document for the watch-all and batch contracts. The rescan covers
/// fragments attached in one operation (descendants produce no records of
/// their own) and attribute changes that make a node start matching.
pub struct MutationDispatcher {
    registry: WatchRegistry,
    armed: bool,
}

impl MutationDispatcher {
    pub fn new() -> Self {
        Self {
            registry: WatchRegistry::default(),
            armed: false,
        }
    }

    /// Arm the observer. Idempotent: arming twice is a no-op.
    pub fn register(&mut self) {
        if !self.armed {
            crate::debug!("watch"; "observer armed");
            self.armed = true;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Disconnect: drop every task and disarm. A later [`Self::register`]
    /// starts from a clean slate - no stale closures survive.
    pub fn release(&mut self) {
        crate::debug!("watch"; "observer released ({} tasks dropped)", self.registry.len());
        self.registry.clear();
        self.armed = false;
    }

    /// Release a single registration.
    pub fn release_watch(&mut self, id: WatchId) -> bool {
        self.registry.release(id)
    }

    /// Release everything a module session registered.
    pub fn release_owner(&mut self, owner: &Owner) -> usize {
        let released = self.registry.release_owner(owner);
        if released > 0 {
            crate::debug!("watch"; "released {} tasks for {}", released, owner);
        }
        released
    }

    pub fn task_count(&self) -> usize {
        self.registry.len()
    }

    // =========================================================================
    // Registration contracts
    // =========================================================================

    /// Contract 1: fire for every currently-matching element now, then
    /// once more per newly-appearing match, forever. No dedup.
    pub fn watch_appear(
        &mut self,
        doc: &mut Document,
        owner: Owner,
        matcher: Matcher,
        cb: WatchCallback,
    ) -> WatchId {
        let id = self
            .registry
            .insert(owner, matcher, WatchKind::Appear { test: None, cb });
        self.deliver_current(doc, id);
        id
    }

    /// Contract 2: as [`Self::watch_appear`], gated by an extra per-node test.
    pub fn watch_appear_filtered(
        &mut self,
        doc: &mut Document,
        owner: Owner,
        matcher: Matcher,
        test: NodeTest,
        cb: WatchCallback,
    ) -> WatchId {
        let id = self
            .registry
            .insert(owner, matcher, WatchKind::Appear { test: Some(test), cb });
        self.deliver_current(doc, id);
        id
    }

    /// Contract 3: each distinct matching element exactly once per
    /// registration, however many times the mutation stream references it.
    pub fn watch_all(
        &mut self,
        doc: &mut Document,
        owner: Owner,
        matcher: Matcher,
        cb: WatchCallback,
    ) -> WatchId {
        let kind = WatchKind::DedupAll {
            processed: FxHashSet::default(),
            cb,
        };
        let id = self.registry.insert(owner, matcher, kind);
        self.deliver_current(doc, id);
        id
    }

    /// Contract 4: deliver the entire current match list (document order)
    /// whenever at least one relevant mutation occurred and at least one
    /// match exists.
    pub fn watch_batch(
        &mut self,
        doc: &mut Document,
        owner: Owner,
        matcher: Matcher,
        cb: BatchCallback,
    ) -> WatchId {
        let id = self
            .registry
            .insert(owner, matcher, WatchKind::Batch { cb });
        self.deliver_current(doc, id);
        id
    }

    /// Disappearance watch: fires on the first mutation batch whose
    /// removed fragment matches, then auto-releases.
    pub fn watch_removed(
        &mut self,
        owner: Owner,
        matcher: Matcher,
        cb: WatchCallback,
    ) -> WatchId {
        self.registry
            .insert(owner, matcher, WatchKind::Removed { cb })
    }

    /// Registration-time delivery of already-present matches.
    fn deliver_current(&mut self, doc: &mut Document, id: WatchId) {
        let Some(task) = self.registry.last_mut() else {
            return;
        };
        debug_assert_eq!(task.id, id);
        let matches = doc.query_all(&|d, n| (task.matcher)(d, n));
        match &mut task.kind {
            WatchKind::Appear { test, cb } => {
                for node in matches {
                    if test.as_ref().is_none_or(|t| t(doc, node)) {
                        invoke(cb, doc, node, &task.owner);
                    }
                }
            }
            WatchKind::DedupAll { processed, cb } => {
                for node in matches {
                    if processed.insert(node) {
                        invoke(cb, doc, node, &task.owner);
                    }
                }
            }
            WatchKind::Batch { cb } => {
                if !matches.is_empty() {
                    invoke_batch(cb, doc, &matches, &task.owner);
                }
            }
            WatchKind::Removed { .. } => {}
        }
    }

    // =========================================================================
    // Pump
    // =========================================================================

    /// Drain and deliver one batch of records.
    ///
    /// Ordering: per-record delivery runs first, then one coalesced rescan
    /// for the same pump - so a node observed directly is already in its
    /// task's processed set by the time the rescan walks the document.
    pub fn pump(&mut self, doc: &mut Document) {
        let records = doc.take_records();
        if !self.armed || records.is_empty() {
            return;
        }

        let mut fired_oneshots: Vec<WatchId> = Vec::new();
        for record in &records {
            match *record {
                MutationRecord::ChildAdded { node, .. } => self.deliver_added(doc, node),
                MutationRecord::ChildRemoved { node, .. } => {
                    self.deliver_removed(doc, node, &mut fired_oneshots)
                }
                MutationRecord::Attribute { .. } | MutationRecord::CharacterData { .. } => {}
            }
        }
        for id in fired_oneshots {
            self.registry.release(id);
        }

        // Any childList/attribute/characterData change qualifies; the
        // pending flag is implicit in "records was non-empty".
        self.rescan(doc);
    }

    /// Per-record appearance delivery: the fragment top plus its matching
    /// descendants, to every task in registration order.
    fn deliver_added(&mut self, doc: &mut Document, top: NodeId) {
        let subtree = doc.subtree(top);
        for task in self.registry.iter_mut() {
            let matches: Vec<NodeId> = subtree
                .iter()
                .copied()
                .filter(|&n| (task.matcher)(doc, n))
                .collect();
            if matches.is_empty() {
                continue;
            }
            match &mut task.kind {
                WatchKind::Appear { test, cb } => {
                    for node in matches {
                        if test.as_ref().is_none_or(|t| t(doc, node)) {
                            invoke(cb, doc, node, &task.owner);
                        }
                    }
                }
                WatchKind::DedupAll { processed, cb } => {
                    for node in matches {
                        if processed.insert(node) {
                            invoke(cb, doc, node, &task.owner);
                        }
                    }
                }
                // Batch contract delivers whole lists from the rescan.
                WatchKind::Batch { .. } | WatchKind::Removed { .. } => {}
            }
        }
    }

    fn deliver_removed(&mut self, doc: &mut Document, top: NodeId, fired: &mut Vec<WatchId>) {
        let subtree = doc.subtree(top);
        for task in self.registry.iter_mut() {
            if fired.contains(&task.id) {
                continue;
            }
            let WatchKind::Removed { cb } = &mut task.kind else {
                continue;
            };
            let Some(node) = subtree.iter().copied().find(|&n| (task.matcher)(doc, n)) else {
                continue;
            };
            invoke(cb, doc, node, &task.owner);
            fired.push(task.id);
        }
    }

    /// Coalesced full rescan: watch-all tasks get not-yet-processed
    /// matches, batch tasks get the whole current list.
    fn rescan(&mut self, doc: &mut Document) {
        for task in self.registry.iter_mut() {
            match &mut task.kind {
                WatchKind::DedupAll { processed, cb } => {
                    // Freed slots can never be re-delivered (generational
                    // ids), so dropping them only bounds the set's size.
                    processed.retain(|&n| doc.contains(n));
                    let found = doc.query_all(&|d, n| (task.matcher)(d, n));
                    for node in found {
                        if processed.insert(node) {
                            invoke(cb, doc, node, &task.owner);
                        }
                    }
                }
                WatchKind::Batch { cb } => {
                    let found = doc.query_all(&|d, n| (task.matcher)(d, n));
                    if !found.is_empty() {
                        invoke_batch(cb, doc, &found, &task.owner);
                    }
                }
                WatchKind::Appear { .. } | WatchKind::Removed { .. } => {}
            }
        }
    }
}

impl Default for MutationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Fault isolation boundary: one watcher's error must never abort
/// delivery to the others.
fn invoke(cb: &mut WatchCallback, doc: &mut Document, node: NodeId, owner: &Owner) {
    if let Err(err) = cb(doc, node) {
        crate::log!("error"; "watcher callback failed ({owner}): {err:#}");
    }
}

fn invoke_batch(cb: &mut BatchCallback, doc: &mut Document, nodes: &[NodeId], owner: &Owner) {
    if let Err(err) = cb(doc, nodes) {
        crate::log!("error"; "batch watcher failed ({owner}): {err:#}");
    }
}
