use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::MutationRecord;
use crate::error::EngineError;

/// Generational handle to a node.
///
/// Invariants:
/// - A freed slot reused for a new node carries a bumped generation, so a
///   stale id held by a watcher never resolves to the wrong node.
/// - `NodeId` is a plain value; holding one keeps nothing alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Axis-aligned box in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Strict overlap test: any visible pixel counts, touching edges do not.
    pub fn intersects(&self, other: &Rect) -> bool {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        left < right && top < bottom
    }
}

/// An element node. Text lives inline on the element; the engine never
/// needs standalone text nodes.
#[derive(Debug, Default)]
pub struct Node {
    tag: String,
    attrs: FxHashMap<String, String>,
    text: String,
    /// Inline `display` style property (the only style the engine touches).
    display: Option<String>,
    /// Layout box, host-maintained. `None` = not laid out yet.
    bounds: Option<Rect>,
    parent: Option<NodeId>,
    children: SmallVec<[NodeId; 4]>,
}

impl Node {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// The live tree. Externally mutated by the host; the engine reads it via
/// predicate matching and writes node insertions, attributes and display
/// toggles. Every mutating call appends a [`MutationRecord`] which the
/// dispatcher drains on pump.
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    url: String,
    viewport: Rect,
    records: Vec<MutationRecord>,
}

impl Document {
    /// Create a document with an empty `body` root.
    pub fn new() -> Self {
        let root = NodeId { index: 0, generation: 0 };
        let body = Node {
            tag: "body".to_string(),
            ..Node::default()
        };
        Self {
            slots: vec![Slot { generation: 0, node: Some(body) }],
            free: Vec::new(),
            root,
            url: String::from("about:blank"),
            viewport: Rect::new(0, 0, 1280, 720),
            records: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Host-side navigation. The engine only ever polls this for equality
    /// against the previously seen value; no event is recorded.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    /// Host-side scroll/resize. Not a mutation record; the visibility
    /// gate re-evaluates pending nodes on every pump.
    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    // =========================================================================
    // Node access
    // =========================================================================

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    /// Whether the id resolves to a live node (attached or detached).
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Whether the node is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.get(current).and_then(Node::parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.get(id)?.attr(name)
    }

    pub fn display(&self, id: NodeId) -> Option<&str> {
        self.get(id)?.display()
    }

    pub fn bounds(&self, id: NodeId) -> Option<Rect> {
        self.get(id)?.bounds
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(Node::children).unwrap_or_default()
    }

    // =========================================================================
    // Mutations (each records its observation)
    // =========================================================================

    /// Create a detached element. No record until it is attached.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let node = Node {
            tag: tag.to_string(),
            ..Node::default()
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, node: Some(node) });
                NodeId { index, generation: 0 }
            }
        }
    }

    /// Attach a detached fragment under `parent`, as the last child.
    ///
    /// Records a single `ChildAdded` for the fragment top when the parent
    /// side is attached - descendants travel silently, which is exactly the
    /// case the dispatcher's rescan exists for.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), EngineError> {
        self.attach(parent, child, None)
    }

    /// Attach a detached fragment as the next sibling of `sibling`.
    pub fn insert_after(&mut self, sibling: NodeId, child: NodeId) -> Result<(), EngineError> {
        let parent = self
            .get(sibling)
            .and_then(Node::parent)
            .ok_or(EngineError::StaleNode(sibling))?;
        self.attach(parent, child, Some(sibling))
    }

    fn attach(
        &mut self,
        parent: NodeId,
        child: NodeId,
        after: Option<NodeId>,
    ) -> Result<(), EngineError> {
        if !self.contains(parent) {
            return Err(EngineError::StaleNode(parent));
        }
        let child_node = self.get(child).ok_or(EngineError::StaleNode(child))?;
        if child_node.parent.is_some() || child == self.root {
            return Err(EngineError::StaleNode(child));
        }
        // Reattaching an ancestor under its own subtree would cycle.
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(EngineError::StaleNode(child));
            }
            cursor = self.get(id).and_then(Node::parent);
        }

        let position = {
            let children = &self.slots[parent.index as usize]
                .node
                .as_ref()
                .expect("parent checked above")
                .children;
            match after {
                Some(sib) => children.iter().position(|&c| c == sib).map(|p| p + 1),
                None => None,
            }
        };
        {
            let parent_node = self.get_mut(parent).expect("parent checked above");
            match position {
                Some(pos) => parent_node.children.insert(pos, child),
                None => parent_node.children.push(child),
            }
        }
        self.get_mut(child).expect("child checked above").parent = Some(parent);

        if self.is_attached(parent) {
            self.records.push(MutationRecord::ChildAdded { node: child, parent });
        }
        Ok(())
    }

    /// Detach a subtree from its parent. Nodes stay alive (detached) so
    /// stale handles keep resolving; free them with [`Self::despawn`].
    pub fn remove_child(&mut self, id: NodeId) -> Result<(), EngineError> {
        let parent = self
            .get(id)
            .and_then(Node::parent)
            .ok_or(EngineError::StaleNode(id))?;
        let was_attached = self.is_attached(id);

        let parent_node = self.get_mut(parent).ok_or(EngineError::StaleNode(parent))?;
        parent_node.children.retain(|c| *c != id);
        self.get_mut(id).expect("node checked above").parent = None;

        if was_attached {
            self.records.push(MutationRecord::ChildRemoved { node: id, parent });
        }
        Ok(())
    }

    /// Free a detached subtree, recycling its slots. A later reuse of a
    /// slot bumps the generation, so old ids stay dead.
    pub fn despawn(&mut self, id: NodeId) -> Result<(), EngineError> {
        if id == self.root {
            return Err(EngineError::StaleNode(id));
        }
        let node = self.get(id).ok_or(EngineError::StaleNode(id))?;
        if node.parent.is_some() {
            return Err(EngineError::StaleNode(id));
        }
        for child in self.subtree(id) {
            let slot = &mut self.slots[child.index as usize];
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(child.index);
        }
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        let node = self.get_mut(id).ok_or(EngineError::StaleNode(id))?;
        node.attrs.insert(name.to_string(), value.to_string());
        if self.is_attached(id) {
            self.records.push(MutationRecord::Attribute { node: id });
        }
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<(), EngineError> {
        let node = self.get_mut(id).ok_or(EngineError::StaleNode(id))?;
        let existed = node.attrs.remove(name).is_some();
        if existed && self.is_attached(id) {
            self.records.push(MutationRecord::Attribute { node: id });
        }
        Ok(())
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), EngineError> {
        let node = self.get_mut(id).ok_or(EngineError::StaleNode(id))?;
        node.text = text.to_string();
        if self.is_attached(id) {
            self.records.push(MutationRecord::CharacterData { node: id });
        }
        Ok(())
    }

    /// Set or clear the inline `display` property. Observed as an
    /// attribute-level change, like toggling `style=` in a browser.
    pub fn set_style_display(
        &mut self,
        id: NodeId,
        display: Option<&str>,
    ) -> Result<(), EngineError> {
        let node = self.get_mut(id).ok_or(EngineError::StaleNode(id))?;
        node.display = display.map(str::to_string);
        if self.is_attached(id) {
            self.records.push(MutationRecord::Attribute { node: id });
        }
        Ok(())
    }

    /// Host-maintained layout box. Not observed (layout is not a mutation).
    pub fn set_bounds(&mut self, id: NodeId, bounds: Option<Rect>) -> Result<(), EngineError> {
        let node = self.get_mut(id).ok_or(EngineError::StaleNode(id))?;
        node.bounds = bounds;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Preorder walk of a subtree, including `id` itself. Works on
    /// detached fragments (needed for removed-node matching).
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current) {
                continue;
            }
            out.push(current);
            let children = self.children(current);
            for &child in children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// All attached nodes matching `pred`, in document order.
    pub fn query_all(&self, pred: &(dyn Fn(&Document, NodeId) -> bool)) -> Vec<NodeId> {
        self.subtree(self.root)
            .into_iter()
            .filter(|&id| pred(self, id))
            .collect()
    }

    /// First attached node matching `pred`, in document order.
    pub fn query(&self, pred: &(dyn Fn(&Document, NodeId) -> bool)) -> Option<NodeId> {
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            if pred(self, current) {
                return Some(current);
            }
            for &child in self.children(current).iter().rev() {
                stack.push(child);
            }
        }
        None
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Drain the pending mutation records. Dispatcher-only in practice.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn has_pending_records(&self) -> bool {
        !self.records.is_empty()
    }

    /// Number of live nodes (attached or detached), root included.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
