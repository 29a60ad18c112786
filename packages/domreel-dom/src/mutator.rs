use std::collections::HashSet;

use markup5ever::{local_name, QualName};

use crate::document::Document;
use crate::node::{Attribute, DoctypeData, ElementData, NodeData, TextKind, TextNodeData};
use crate::observer::MutationKind;

pub enum AppendTextErr {
    /// The node is not a text node
    NotTextNode,
}

/// The mutation surface of a [`Document`].
///
/// All host-side tree changes go through this type so that the mutation
/// journal sees them; the change detector drains that journal on its next
/// tick. Style elements touched by a batch of mutations have their sheets
/// rebuilt when the mutator flushes (on drop, or explicitly).
pub struct DocumentMutator<'doc> {
    /// Document is public as an escape hatch, but users of this API should
    /// ideally avoid using it and prefer exposing additional functionality
    /// in DocumentMutator.
    pub doc: &'doc mut Document,

    // Tracked nodes for deferred processing when mutations have completed
    style_nodes: HashSet<usize>,
}

impl Drop for DocumentMutator<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

impl DocumentMutator<'_> {
    pub fn new(doc: &mut Document) -> DocumentMutator<'_> {
        DocumentMutator {
            doc,
            style_nodes: HashSet::new(),
        }
    }

    pub fn node_has_parent(&self, node_id: usize) -> bool {
        self.doc.nodes[node_id].parent.is_some()
    }

    pub fn last_child_id(&self, node_id: usize) -> Option<usize> {
        self.doc.nodes[node_id].children.last().copied()
    }

    pub fn element_name(&self, node_id: usize) -> Option<&QualName> {
        self.doc.nodes[node_id].element_data().map(|el| &el.name)
    }

    pub fn create_element(&mut self, name: QualName, attrs: Vec<Attribute>) -> usize {
        let data = ElementData::new(name, attrs);
        let id = self.doc.create_element_node(data);
        if self.is_style_node(id) {
            self.style_nodes.insert(id);
        }
        id
    }

    pub fn create_text_node(&mut self, text: &str) -> usize {
        self.doc.create_text_node(text)
    }

    pub fn create_comment_node(&mut self, data: &str) -> usize {
        self.doc.create_node(NodeData::Text(TextNodeData {
            kind: TextKind::Comment,
            content: data.to_string(),
        }))
    }

    pub fn create_cdata_node(&mut self, data: &str) -> usize {
        self.doc.create_node(NodeData::Text(TextNodeData {
            kind: TextKind::Cdata,
            content: data.to_string(),
        }))
    }

    pub fn create_pi_node(&mut self, target: &str, data: &str) -> usize {
        self.doc.create_node(NodeData::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        })
    }

    pub fn create_doctype_node(&mut self, data: DoctypeData) -> usize {
        self.doc.create_node(NodeData::Doctype(data))
    }

    /// Create the shadow-root container for a host element. Shadow trees are
    /// captured when their host is announced; later mutations inside them are
    /// not observed, matching platform observer semantics.
    pub fn attach_shadow(&mut self, host_id: usize) -> usize {
        if let Some(existing) = self.doc.nodes[host_id]
            .element_data()
            .and_then(|el| el.shadow_root)
        {
            return existing;
        }
        let shadow = self.doc.create_node(NodeData::ShadowRoot);
        self.doc.nodes[shadow].parent = Some(host_id);
        if let Some(element) = self.doc.nodes[host_id].element_data_mut() {
            element.shadow_root = Some(shadow);
        }
        shadow
    }

    /// Remove all of the children from old_parent_id and append them to new_parent_id
    pub fn reparent_children(&mut self, old_parent_id: usize, new_parent_id: usize) {
        let child_ids = std::mem::take(&mut self.doc.nodes[old_parent_id].children);
        for &child_id in &child_ids {
            self.doc.nodes[child_id].parent = None;
        }
        self.doc
            .journal
            .record(MutationKind::ChildList, old_parent_id);
        self.maybe_push_style_node(old_parent_id);
        self.append_children(new_parent_id, &child_ids);
    }

    pub fn append_children(&mut self, parent_id: usize, child_ids: &[usize]) {
        self.doc.append(parent_id, child_ids);
        self.maybe_push_style_node(parent_id);
    }

    pub fn insert_child_at(&mut self, parent_id: usize, index: usize, child_id: usize) {
        self.doc.insert_child_at(parent_id, index, child_id);
        self.maybe_push_style_node(parent_id);
    }

    pub fn insert_nodes_before(&mut self, anchor_node_id: usize, new_node_ids: &[usize]) {
        self.doc.insert_before(anchor_node_id, new_node_ids);
        self.maybe_push_parent_style_node(anchor_node_id);
    }

    pub fn insert_nodes_after(&mut self, anchor_node_id: usize, new_node_ids: &[usize]) {
        let parent_id = self.doc.nodes[anchor_node_id].parent;
        let next_sibling_id = parent_id.and_then(|parent_id| {
            let children = &self.doc.nodes[parent_id].children;
            let pos = children.iter().position(|id| *id == anchor_node_id)?;
            children.get(pos + 1).copied()
        });

        match next_sibling_id {
            Some(sibling_id) => self.doc.insert_before(sibling_id, new_node_ids),
            None => {
                if let Some(parent_id) = parent_id {
                    self.doc.append(parent_id, new_node_ids);
                }
            }
        }
        self.maybe_push_parent_style_node(anchor_node_id);
    }

    /// Detach a node, keeping it alive for re-insertion.
    pub fn remove_node(&mut self, node_id: usize) {
        self.maybe_push_parent_style_node(node_id);
        self.doc.remove_node(node_id);
    }

    /// Detach a node and reclaim its subtree's storage.
    pub fn remove_and_drop_node(&mut self, node_id: usize) {
        self.maybe_push_parent_style_node(node_id);
        self.doc.remove_and_drop_node(node_id);
    }

    pub fn append_text_to_node(&mut self, node_id: usize, text: &str) -> Result<(), AppendTextErr> {
        match self.doc.nodes[node_id].text_data_mut() {
            Some(data) => {
                data.content += text;
                self.doc.journal.record(MutationKind::CharacterData, node_id);
                self.maybe_push_parent_style_node(node_id);
                Ok(())
            }
            None => Err(AppendTextErr::NotTextNode),
        }
    }

    pub fn set_node_text(&mut self, node_id: usize, value: &str) {
        let node = &mut self.doc.nodes[node_id];
        let text = match node.data {
            NodeData::Text(ref mut text) => text,
            _ => return,
        };

        let changed = text.content != value;
        if changed {
            text.content.clear();
            text.content.push_str(value);
            self.doc.journal.record(MutationKind::CharacterData, node_id);
            self.maybe_push_parent_style_node(node_id);
        }
    }

    pub fn set_attribute(&mut self, node_id: usize, name: QualName, value: &str) {
        let node = &mut self.doc.nodes[node_id];
        let NodeData::Element(ref mut element) = node.data else {
            return;
        };

        let existing_attr = element.attrs.iter_mut().find(|a| a.name == name);
        if let Some(existing_attr) = existing_attr {
            existing_attr.value.clear();
            existing_attr.value.push_str(value);
        } else {
            element.attrs.push(Attribute {
                name: name.clone(),
                value: value.to_string(),
            });
        }
        self.doc.journal.record(MutationKind::Attributes, node_id);
    }

    pub fn clear_attribute(&mut self, node_id: usize, name: QualName) {
        let node = &mut self.doc.nodes[node_id];
        if let NodeData::Element(ref mut element) = node.data {
            let len_before = element.attrs.len();
            element.attrs.retain(|attr| attr.name != name);
            if element.attrs.len() != len_before {
                self.doc.journal.record(MutationKind::Attributes, node_id);
            }
        }
    }

    pub fn deep_clone_node(&mut self, node_id: usize) -> usize {
        self.doc.deep_clone_node(node_id)
    }
}

impl DocumentMutator<'_> {
    pub fn flush(&mut self) {
        // Add/Update inline stylesheets (<style> elements)
        for id in self.style_nodes.drain() {
            if self.doc.get_node(id).is_some() {
                self.doc.process_style_element(id);
            }
        }
    }

    fn is_style_node(&self, node_id: usize) -> bool {
        self.doc.nodes[node_id]
            .data
            .downcast_element()
            .map(|el| el.name.local == local_name!("style"))
            .unwrap_or(false)
    }

    fn maybe_push_style_node(&mut self, node_id: impl Into<Option<usize>>) {
        if let Some(node_id) = node_id.into() {
            if self.is_style_node(node_id) {
                self.style_nodes.insert(node_id);
            }
        }
    }

    fn maybe_push_parent_style_node(&mut self, node_id: usize) {
        let parent_id = self.doc.nodes[node_id].parent;
        self.maybe_push_style_node(parent_id);
    }
}
