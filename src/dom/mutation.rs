use super::NodeId;

/// One observed change to the document, in the order it happened.
///
/// `ChildAdded`/`ChildRemoved` reference the top of the attached or
/// detached fragment only - descendants travel with it and are found by
/// subtree inspection, exactly like `addedNodes`/`removedNodes` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationRecord {
    /// A fragment rooted at `node` was attached under `parent`.
    ChildAdded { node: NodeId, parent: NodeId },
    /// A fragment rooted at `node` was detached from `parent`.
    ChildRemoved { node: NodeId, parent: NodeId },
    /// An attribute (or the inline display style) of `node` changed.
    Attribute { node: NodeId },
    /// The text content of `node` changed.
    CharacterData { node: NodeId },
}

impl MutationRecord {
    /// The node the record is about.
    pub fn node(&self) -> NodeId {
        match *self {
            Self::ChildAdded { node, .. }
            | Self::ChildRemoved { node, .. }
            | Self::Attribute { node }
            | Self::CharacterData { node } => node,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ChildAdded { .. } => "added",
            Self::ChildRemoved { .. } => "removed",
            Self::Attribute { .. } => "attribute",
            Self::CharacterData { .. } => "text",
        }
    }
}
