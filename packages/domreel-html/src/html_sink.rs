use std::borrow::Cow;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashSet;

use domreel_dom::node::{Attribute, DoctypeData, ElementData, Node, NodeData};
use domreel_dom::Document;
use html5ever::{
    local_name,
    tendril::{StrTendril, TendrilSink},
    tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink},
    QualName,
};

/// Convert an html5ever Attribute which uses tendril for its value to a
/// domreel Attribute which uses String.
fn html5ever_to_domreel_attr(attr: html5ever::Attribute) -> Attribute {
    Attribute {
        name: attr.name,
        value: attr.value.to_string(),
    }
}

pub struct DocumentHtmlParser<'a> {
    doc: RefCell<&'a mut Document>,
    style_nodes: RefCell<Vec<usize>>,

    /// Errors that occurred during parsing.
    pub errors: RefCell<Vec<Cow<'static, str>>>,

    /// The document's quirks mode.
    pub quirks_mode: Cell<QuirksMode>,
}

impl DocumentHtmlParser<'_> {
    pub fn new(doc: &mut Document) -> DocumentHtmlParser<'_> {
        DocumentHtmlParser {
            doc: RefCell::new(doc),
            style_nodes: RefCell::new(Vec::new()),
            errors: RefCell::new(Vec::new()),
            quirks_mode: Cell::new(QuirksMode::NoQuirks),
        }
    }

    pub fn parse_into_doc<'d>(doc: &'d mut Document, html: &str) -> &'d mut Document {
        let sink = Self::new(doc);
        html5ever::parse_document(sink, Default::default())
            .from_utf8()
            .read_from(&mut html.as_bytes())
            .expect("reading from a string cannot fail")
    }

    fn create_node(&self, node_data: NodeData) -> usize {
        self.doc.borrow_mut().create_node(node_data)
    }

    fn create_text_node(&self, text: &str) -> usize {
        self.doc.borrow_mut().create_text_node(text)
    }

    fn node(&self, id: usize) -> Ref<'_, Node> {
        Ref::map(self.doc.borrow(), |doc| &doc.nodes[id])
    }

    fn node_mut(&self, id: usize) -> RefMut<'_, Node> {
        RefMut::map(self.doc.borrow_mut(), |doc| &mut doc.nodes[id])
    }

    fn try_append_text_to_text_node(&self, node_id: Option<usize>, text: &str) -> bool {
        let Some(node_id) = node_id else {
            return false;
        };
        let mut node = self.node_mut(node_id);

        match node.text_data_mut() {
            Some(data) => {
                data.content += text;
                true
            }
            None => false,
        }
    }

    fn last_child(&self, parent_id: usize) -> Option<usize> {
        self.node(parent_id).children.last().copied()
    }
}

impl<'b> TreeSink for DocumentHtmlParser<'b> {
    type Output = &'b mut Document;

    // we use the ID of the nodes in the tree as the handle
    type Handle = usize;

    type ElemName<'a>
        = Ref<'a, QualName>
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        let doc = self.doc.into_inner();

        // Add inline stylesheets (<style> elements)
        for id in self.style_nodes.borrow().iter() {
            doc.process_style_element(*id);
        }

        for error in self.errors.borrow().iter() {
            println!("ERROR: {}", error);
        }

        doc
    }

    fn parse_error(&self, msg: Cow<'static, str>) {
        self.errors.borrow_mut().push(msg);
    }

    fn get_document(&self) -> Self::Handle {
        0
    }

    fn elem_name<'a>(&'a self, target: &'a Self::Handle) -> Self::ElemName<'a> {
        Ref::map(self.doc.borrow(), |doc| {
            &doc.nodes[*target]
                .element_data()
                .expect("TreeSink::elem_name called on a node which is not an element!")
                .name
        })
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<html5ever::Attribute>,
        _flags: ElementFlags,
    ) -> Self::Handle {
        let attrs = attrs.into_iter().map(html5ever_to_domreel_attr).collect();
        let data = ElementData::new(name.clone(), attrs);
        let id = self.doc.borrow_mut().create_element_node(data);

        if name.local == local_name!("style") {
            self.style_nodes.borrow_mut().push(id);
        }

        id
    }

    fn create_comment(&self, text: StrTendril) -> Self::Handle {
        use domreel_dom::node::{TextKind, TextNodeData};
        self.create_node(NodeData::Text(TextNodeData {
            kind: TextKind::Comment,
            content: text.to_string(),
        }))
    }

    fn create_pi(&self, target: StrTendril, data: StrTendril) -> Self::Handle {
        self.create_node(NodeData::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        })
    }

    fn append(&self, parent_id: &Self::Handle, child: NodeOrText<Self::Handle>) {
        match child {
            NodeOrText::AppendNode(child_id) => {
                self.node_mut(*parent_id).children.push(child_id);
                self.node_mut(child_id).parent = Some(*parent_id);
            }
            NodeOrText::AppendText(text) => {
                let last_child_id = self.last_child(*parent_id);
                let has_appended = self.try_append_text_to_text_node(last_child_id, &text);
                if !has_appended {
                    let id = self.create_text_node(&text);
                    self.append(parent_id, NodeOrText::AppendNode(id));
                }
            }
        }
    }

    // Note: The tree builder promises we won't have a text node after the insertion point.
    fn append_before_sibling(&self, sibling_id: &Self::Handle, new_node: NodeOrText<Self::Handle>) {
        let sibling = self.node(*sibling_id);
        let parent_id = sibling.parent.expect("Sibling has no parent");
        let parent = self.node(parent_id);
        let sibling_pos = parent
            .children
            .iter()
            .position(|cid| cid == sibling_id)
            .expect("Sibling is not a child of parent");

        // If node to append is a text node, first attempt to merge with the
        // previous sibling
        let new_child_id = match new_node {
            NodeOrText::AppendText(text) => {
                let previous_sibling_id = match sibling_pos {
                    0 => None,
                    other => Some(parent.children[other - 1]),
                };
                let has_appended = self.try_append_text_to_text_node(previous_sibling_id, &text);
                if has_appended {
                    return;
                } else {
                    self.create_text_node(&text)
                }
            }
            NodeOrText::AppendNode(id) => id,
        };

        drop(parent);
        drop(sibling);

        self.node_mut(new_child_id).parent = Some(parent_id);
        self.node_mut(parent_id)
            .children
            .insert(sibling_pos, new_child_id);
    }

    fn append_based_on_parent_node(
        &self,
        element: &Self::Handle,
        prev_element: &Self::Handle,
        child: NodeOrText<Self::Handle>,
    ) {
        let has_parent = self.node(*element).parent.is_some();
        if has_parent {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &self,
        name: StrTendril,
        public_id: StrTendril,
        system_id: StrTendril,
    ) {
        let id = self.create_node(NodeData::Doctype(DoctypeData {
            name: name.to_string(),
            public_id: (!public_id.is_empty()).then(|| public_id.to_string()),
            system_id: (!system_id.is_empty()).then(|| system_id.to_string()),
        }));
        self.append(&0, NodeOrText::AppendNode(id));
    }

    fn get_template_contents(&self, target: &Self::Handle) -> Self::Handle {
        // Template contents are treated as regular children.
        *target
    }

    fn same_node(&self, x: &Self::Handle, y: &Self::Handle) -> bool {
        x == y
    }

    fn set_quirks_mode(&self, mode: QuirksMode) {
        self.quirks_mode.set(mode);
    }

    fn add_attrs_if_missing(&self, target: &Self::Handle, attrs: Vec<html5ever::Attribute>) {
        let mut node = self.node_mut(*target);
        let element_data = node.element_data_mut().expect("Not an element");

        let existing_names = element_data
            .attrs
            .iter()
            .map(|e| e.name.clone())
            .collect::<HashSet<_>>();

        element_data.attrs.extend(
            attrs
                .into_iter()
                .map(html5ever_to_domreel_attr)
                .filter(|attr| !existing_names.contains(&attr.name)),
        );
    }

    fn remove_from_parent(&self, target: &Self::Handle) {
        let parent_id = self
            .node_mut(*target)
            .parent
            .take()
            .expect("Node has no parent");
        self.node_mut(parent_id)
            .children
            .retain(|child_id| child_id != target);
    }

    fn reparent_children(&self, node_id: &Self::Handle, new_parent_id: &Self::Handle) {
        // Take children array from old parent
        let children = std::mem::take(&mut self.node_mut(*node_id).children);

        // Update parent reference of children
        for child_id in children.iter() {
            self.node_mut(*child_id).parent = Some(*new_parent_id);
        }

        // Add children to new parent
        self.node_mut(*new_parent_id).children.extend(&children);
    }
}

#[test]
fn parses_some_html() {
    use domreel_dom::DocumentConfig;

    let html = "<!DOCTYPE html><html><body><h1>hello world</h1></body></html>";
    let mut doc = Document::new(DocumentConfig::default());
    DocumentHtmlParser::parse_into_doc(&mut doc, html);

    // Document -> doctype + html -> head + body -> h1 -> text
    let root = doc.root_node();
    assert_eq!(root.children.len(), 2);
    let html_el = root.children[1];
    assert!(doc.nodes[html_el].is_element_with_tag_name(&local_name!("html")));
    let body = doc.nodes[html_el].children[1];
    let h1 = doc.nodes[body].children[0];
    assert_eq!(doc.text_content(h1), "hello world");
}
