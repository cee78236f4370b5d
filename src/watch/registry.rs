use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use super::{BatchCallback, NodeTest, WatchCallback};
use crate::dom::{Matcher, NodeId};

/// Identifies who owns a registration: module name plus the opaque session
/// id of the load that created it. Teardown releases by owner, so a
/// reloaded module can never be handed its previous session's watches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    module: Arc<str>,
    session: Arc<str>,
}

impl Owner {
    pub fn new(module: impl Into<Arc<str>>, session: impl Into<Arc<str>>) -> Self {
        Self {
            module: module.into(),
            session: session.into(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn session(&self) -> &str {
        &self.session
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.module, self.session)
    }
}

/// Handle to one watch registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

/// Delivery contract of a task.
pub(super) enum WatchKind {
    /// Every match, every time it appears. No dedup; optional extra test.
    Appear {
        test: Option<NodeTest>,
        cb: WatchCallback,
    },
    /// Each distinct element exactly once, whether seen via a direct
    /// record or via rescan. The processed set holds plain `NodeId`
    /// values - generational ids, so a recycled slot can never collide
    /// with a delivered-and-freed node.
    DedupAll {
        processed: FxHashSet<NodeId>,
        cb: WatchCallback,
    },
    /// The full current match list whenever a relevant mutation occurred
    /// and at least one match exists.
    Batch { cb: BatchCallback },
    /// One-shot disappearance watch; auto-released after first delivery.
    Removed { cb: WatchCallback },
}

impl WatchKind {
    pub(super) fn label(&self) -> &'static str {
        match self {
            Self::Appear { .. } => "appear",
            Self::DedupAll { .. } => "all",
            Self::Batch { .. } => "batch",
            Self::Removed { .. } => "removed",
        }
    }
}

pub(super) struct WatchTask {
    pub(super) id: WatchId,
    pub(super) owner: Owner,
    pub(super) matcher: Matcher,
    pub(super) kind: WatchKind,
}

/// Registration-ordered task store. Order is a delivery guarantee:
/// earlier registrations see each mutation batch first.
#[derive(Default)]
pub(super) struct WatchRegistry {
    tasks: Vec<WatchTask>,
    next_id: u64,
}

impl WatchRegistry {
    pub(super) fn insert(&mut self, owner: Owner, matcher: Matcher, kind: WatchKind) -> WatchId {
        let id = WatchId(self.next_id);
        self.next_id += 1;
        crate::debug!("watch"; "register {} task #{} for {}", kind.label(), id.0, owner);
        self.tasks.push(WatchTask { id, owner, matcher, kind });
        id
    }

    pub(super) fn release(&mut self, id: WatchId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }

    pub(super) fn release_owner(&mut self, owner: &Owner) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| &t.owner != owner);
        before - self.tasks.len()
    }

    pub(super) fn clear(&mut self) {
        self.tasks.clear();
    }

    pub(super) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(super) fn iter_mut(&mut self) -> impl Iterator<Item = &mut WatchTask> {
        self.tasks.iter_mut()
    }

    /// Most-recently inserted task (used for registration-time delivery).
    pub(super) fn last_mut(&mut self) -> Option<&mut WatchTask> {
        self.tasks.last_mut()
    }
}
