//! Virtual DOM nodes as they appear on the wire.
//!
//! A keyframe carries a whole [`VDocument`]; an insert operation carries the
//! [`VNode`] subtree being inserted. Asset references inside these trees have
//! already been rewritten to `asset:N` placeholder tokens by the inliner.

use crate::NodeId;

/// A node in wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum VNode {
    Text {
        id: NodeId,
        text: String,
    },
    Cdata {
        id: NodeId,
        data: String,
    },
    Comment {
        id: NodeId,
        data: String,
    },
    ProcessingInstruction {
        id: NodeId,
        target: String,
        data: String,
    },
    DocumentType {
        id: NodeId,
        name: String,
        public_id: Option<String>,
        system_id: Option<String>,
    },
    Element(VElement),
}

impl VNode {
    pub fn id(&self) -> NodeId {
        match self {
            VNode::Text { id, .. }
            | VNode::Cdata { id, .. }
            | VNode::Comment { id, .. }
            | VNode::ProcessingInstruction { id, .. }
            | VNode::DocumentType { id, .. } => *id,
            VNode::Element(el) => el.id,
        }
    }

    pub fn as_element(&self) -> Option<&VElement> {
        match self {
            VNode::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Total number of nodes in this subtree (including shadow children).
    pub fn subtree_len(&self) -> usize {
        match self {
            VNode::Element(el) => {
                1 + el
                    .children
                    .iter()
                    .chain(el.shadow.iter().flatten())
                    .map(VNode::subtree_len)
                    .sum::<usize>()
            }
            _ => 1,
        }
    }
}

/// An element in wire form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VElement {
    pub id: NodeId,
    pub tag: String,
    pub namespace: Option<String>,
    /// Ordered name → value mapping
    pub attributes: Vec<(String, String)>,
    pub children: Vec<VNode>,
    /// Serialized shadow-root children, for elements carrying a shadow root
    pub shadow: Option<Vec<VNode>>,
}

impl VElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// The document node as it appears in a keyframe.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VDocument {
    pub id: NodeId,
    /// Constructed stylesheets adopted by the document, in list order
    pub adopted_sheets: Vec<VAdoptedSheet>,
    pub children: Vec<VNode>,
}

/// An adopted (constructed) stylesheet in wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct VAdoptedSheet {
    pub id: u32,
    pub media: Option<String>,
    pub text: String,
}
