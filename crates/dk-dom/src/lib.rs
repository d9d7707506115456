//! DOM tree data structures.
//!
//! Arena-backed document model: nodes are addressed by `NodeId` and never
//! deallocated during a page's lifetime, so detached subtrees stay
//! addressable (scripts keep references to nodes they created even after
//! those nodes leave the tree).

/// ID used to address nodes in the DOM arena.
pub type NodeId = usize;

/// Name of the synthetic root element.
pub const DOCUMENT_TAG: &str = "#document";

/// One element attribute, insertion-ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeData {
    Element { tag: String, attrs: Vec<Attribute> },
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Mutable document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let root_node = Node {
            data: NodeData::Element {
                tag: DOCUMENT_TAG.to_owned(),
                attrs: Vec::new(),
            },
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root_node],
            root: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Insertion point for document-level content: the first `body`
    /// element in document order, else the root itself.
    pub fn body(&self) -> NodeId {
        self.elements_by_tag_name("body")
            .first()
            .copied()
            .unwrap_or(self.root)
    }

    /// First `head` element in document order, else the root.
    pub fn head(&self) -> NodeId {
        self.elements_by_tag_name("head")
            .first()
            .copied()
            .unwrap_or(self.root)
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeData::Text(text.to_owned()))
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        matches!(
            self.nodes.get(node).map(|n| &n.data),
            Some(NodeData::Element { .. })
        )
    }

    pub fn is_text(&self, node: NodeId) -> bool {
        matches!(
            self.nodes.get(node).map(|n| &n.data),
            Some(NodeData::Text(_))
        )
    }

    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        match self.nodes.get(node).map(|n| &n.data) {
            Some(NodeData::Element { tag, .. }) => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        match self.nodes.get(node).map(|n| &n.data) {
            Some(NodeData::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the node can reach the document root through parents.
    pub fn is_connected(&self, node: NodeId) -> bool {
        let mut current = node;
        loop {
            if current == self.root {
                return true;
            }
            match self.parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Detaches the node from its parent; the node itself stays valid.
    pub fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.retain(|child| *child != node);
        }
        if let Some(own) = self.nodes.get_mut(node) {
            own.parent = None;
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if parent >= self.nodes.len() || child >= self.nodes.len() || parent == child {
            return;
        }
        self.detach(child);
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.push(child);
        }
        if let Some(child_node) = self.nodes.get_mut(child) {
            child_node.parent = Some(parent);
        }
    }

    /// Inserts `node` into `reference`'s parent, immediately before
    /// `reference`. No-op when the reference has no parent.
    pub fn insert_before(&mut self, node: NodeId, reference: NodeId) {
        let Some(parent) = self.parent(reference) else {
            return;
        };
        if node >= self.nodes.len() || node == reference || node == parent {
            return;
        }
        self.detach(node);
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            let position = parent_node
                .children
                .iter()
                .position(|child| *child == reference)
                .unwrap_or(parent_node.children.len());
            parent_node.children.insert(position, node);
        }
        if let Some(own) = self.nodes.get_mut(node) {
            own.parent = Some(parent);
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        match self.nodes.get(node).map(|n| &n.data) {
            Some(NodeData::Element { attrs, .. }) => attrs
                .iter()
                .find(|attr| attr.name == name)
                .map(|attr| attr.value.as_str()),
            _ => None,
        }
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(NodeData::Element { attrs, .. }) = self.nodes.get_mut(node).map(|n| &mut n.data)
        {
            if let Some(existing) = attrs.iter_mut().find(|attr| attr.name == name) {
                existing.value = value.to_owned();
            } else {
                attrs.push(Attribute {
                    name: name.to_owned(),
                    value: value.to_owned(),
                });
            }
        }
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if let Some(NodeData::Element { attrs, .. }) = self.nodes.get_mut(node).map(|n| &mut n.data)
        {
            attrs.retain(|attr| attr.name != name);
        }
    }

    pub fn attributes(&self, node: NodeId) -> &[Attribute] {
        match self.nodes.get(node).map(|n| &n.data) {
            Some(NodeData::Element { attrs, .. }) => attrs.as_slice(),
            _ => &[],
        }
    }

    /// Concatenated text of the node's descendants, document order.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        if let Some(text) = self.text(node) {
            out.push_str(text);
        }
        for child in self.children(node).to_owned() {
            self.collect_text(child, out);
        }
    }

    /// All connected nodes in document (depth-first) order.
    pub fn document_order(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in self.children(node).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Connected elements in document order; `"*"` matches every element.
    pub fn elements_by_tag_name(&self, tag: &str) -> Vec<NodeId> {
        let wildcard = tag == "*";
        let lowered = tag.to_ascii_lowercase();
        self.document_order()
            .into_iter()
            .filter(|node| *node != self.root)
            .filter(|node| match self.tag_name(*node) {
                Some(name) => wildcard || name == lowered,
                None => false,
            })
            .collect()
    }

    /// First connected element whose `id` attribute equals `id`.
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.document_order()
            .into_iter()
            .find(|node| self.attribute(*node, "id") == Some(id))
    }

    /// Connected elements carrying the named attribute, document order.
    pub fn elements_with_attribute(&self, name: &str) -> Vec<NodeId> {
        self.document_order()
            .into_iter()
            .filter(|node| self.has_attribute(*node, name))
            .collect()
    }

    /// First connected element with `name` equal to `value`, document
    /// order. Selector-style lookup used for sentinel script types.
    pub fn first_with_attribute_value(&self, name: &str, value: &str) -> Option<NodeId> {
        self.document_order()
            .into_iter()
            .find(|node| self.attribute(*node, name) == Some(value))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn push_node(&mut self, data: NodeData) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }
}
