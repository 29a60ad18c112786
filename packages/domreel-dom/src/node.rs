use markup5ever::{local_name, namespace_url, ns, LocalName, Namespace, Prefix, QualName};

use domreel_protocol::NodeId;

use crate::stylesheet::SheetKey;

pub struct Node {
    /// Our key in the document's node slab
    pub id: usize,
    /// Our parent's key
    pub parent: Option<usize>,
    /// Our children, in tree order
    pub children: Vec<usize>,

    /// Node type (Element, Text, etc) specific data
    pub data: NodeData,

    /// The node's identifier within the recording stream, once assigned.
    /// Stream ids are stable for the life of the node and never reassigned.
    pub stream_id: Option<NodeId>,
}

impl Node {
    pub fn new(id: usize, data: NodeData) -> Self {
        Self {
            id,
            parent: None,
            children: vec![],
            data,
            stream_id: None,
        }
    }

    pub fn element_data(&self) -> Option<&ElementData> {
        match self.data {
            NodeData::Element(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn element_data_mut(&mut self) -> Option<&mut ElementData> {
        match self.data {
            NodeData::Element(ref mut data) => Some(data),
            _ => None,
        }
    }

    pub fn text_data(&self) -> Option<&TextNodeData> {
        match self.data {
            NodeData::Text(ref data) => Some(data),
            _ => None,
        }
    }

    pub fn text_data_mut(&mut self) -> Option<&mut TextNodeData> {
        match self.data {
            NodeData::Text(ref mut data) => Some(data),
            _ => None,
        }
    }

    pub fn attr(&self, name: LocalName) -> Option<&str> {
        self.element_data().and_then(|data| data.attr(name))
    }

    pub fn is_element_with_tag_name(&self, name: &LocalName) -> bool {
        self.element_data()
            .map(|data| &data.name.local == name)
            .unwrap_or(false)
    }

    pub fn is_shadow_root(&self) -> bool {
        matches!(self.data, NodeData::ShadowRoot)
    }

    /// Short name for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match &self.data {
            NodeData::Document => "document",
            NodeData::Element(_) => "element",
            NodeData::Text(data) => match data.kind {
                TextKind::Text => "text",
                TextKind::Cdata => "cdata",
                TextKind::Comment => "comment",
            },
            NodeData::ProcessingInstruction { .. } => "processing-instruction",
            NodeData::Doctype(_) => "doctype",
            NodeData::ShadowRoot => "shadow-root",
        }
    }
}

/// The different kinds of nodes in the DOM.
#[derive(Debug, Clone)]
pub enum NodeData {
    /// The `Document` itself - the root node of the document.
    Document,

    /// An element with attributes.
    Element(ElementData),

    /// Character data: a text node, CDATA section or comment.
    Text(TextNodeData),

    /// A processing instruction.
    ProcessingInstruction { target: String, data: String },

    /// A `DOCTYPE` with name, public id, and system id.
    Doctype(DoctypeData),

    /// The container for an element's shadow tree. Holds the shadow children
    /// of its host element and is never itself announced in the stream.
    ShadowRoot,
}

impl NodeData {
    pub fn downcast_element(&self) -> Option<&ElementData> {
        match self {
            NodeData::Element(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_character_data(&self) -> bool {
        matches!(self, NodeData::Text(_))
    }
}

#[derive(Debug, Clone)]
pub struct ElementData {
    /// The element's tag name, namespace and prefix
    pub name: QualName,

    /// The element's attributes
    pub attrs: Vec<Attribute>,

    /// The shadow-root container node, for elements carrying a shadow tree
    pub shadow_root: Option<usize>,

    /// The owner-backed stylesheet derived from this element's content
    /// (`<style>` elements once flushed)
    pub stylesheet: Option<SheetKey>,
}

impl ElementData {
    pub fn new(name: QualName, attrs: Vec<Attribute>) -> Self {
        ElementData {
            name,
            attrs,
            shadow_root: None,
            stylesheet: None,
        }
    }

    pub fn attr(&self, name: LocalName) -> Option<&str> {
        let attr = self.attrs.iter().find(|attr| attr.name.local == name)?;
        Some(&attr.value)
    }

    pub fn attr_by_qual(&self, name: &QualName) -> Option<&str> {
        let attr = self.attrs.iter().find(|attr| attr.name == *name)?;
        Some(&attr.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: QualName,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Text,
    Cdata,
    Comment,
}

#[derive(Debug, Clone)]
pub struct TextNodeData {
    pub kind: TextKind,
    pub content: String,
}

impl TextNodeData {
    pub fn new(content: String) -> Self {
        Self {
            kind: TextKind::Text,
            content,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DoctypeData {
    pub name: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

/// Wire spelling of an attribute name (`xlink:href`, `class`).
pub fn attr_wire_name(name: &QualName) -> String {
    match &name.prefix {
        Some(prefix) => format!("{}:{}", prefix, name.local),
        None => name.local.to_string(),
    }
}

/// Parse a wire attribute name back into a qualified name, mapping the
/// well-known prefixes to their namespaces.
pub fn attr_name_from_wire(name: &str) -> QualName {
    match name.split_once(':') {
        Some(("xlink", local)) => QualName {
            prefix: Some(Prefix::from("xlink")),
            ns: ns!(xlink),
            local: LocalName::from(local),
        },
        Some(("xml", local)) => QualName {
            prefix: Some(Prefix::from("xml")),
            ns: ns!(xml),
            local: LocalName::from(local),
        },
        Some(("xmlns", local)) => QualName {
            prefix: Some(Prefix::from("xmlns")),
            ns: ns!(xmlns),
            local: LocalName::from(local),
        },
        Some((prefix, local)) => QualName {
            prefix: Some(Prefix::from(prefix)),
            ns: ns!(),
            local: LocalName::from(local),
        },
        None => QualName {
            prefix: None,
            ns: ns!(),
            local: LocalName::from(name),
        },
    }
}

/// Wire namespace of an element: `None` for HTML, the namespace URL otherwise.
pub fn element_wire_namespace(name: &QualName) -> Option<String> {
    if name.ns == ns!(html) {
        None
    } else {
        Some(name.ns.to_string())
    }
}

/// Build an element qualified name from its wire tag and namespace.
pub fn element_name_from_wire(tag: &str, namespace: Option<&str>) -> QualName {
    QualName {
        prefix: None,
        ns: match namespace {
            Some(url) => Namespace::from(url),
            None => ns!(html),
        },
        local: LocalName::from(tag),
    }
}

/// Attributes whose values can carry asset references.
pub fn is_asset_attribute(name: &QualName) -> bool {
    if name.prefix.as_ref().map(|p| p.as_ref()) == Some("xlink") {
        return name.local == local_name!("href");
    }
    matches!(
        name.local.as_ref(),
        "src" | "href" | "poster" | "data-src" | "srcset" | "style"
    )
}
