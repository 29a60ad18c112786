//! Application of structural operations to the target document.
//!
//! Each operation is validated against the target's id map and applied in
//! sequence; a failing operation is logged and skipped, never aborting its
//! batch. Attribute values and stylesheet texts are routed through the
//! [`AssetManager`] so placeholder tokens bind to live synthetic URLs at
//! set time.

use domreel_dom::local_name;
use domreel_dom::node::{
    attr_name_from_wire, element_name_from_wire, Attribute, DoctypeData, ElementData, NodeData,
    TextKind, TextNodeData,
};
use domreel_dom::Document;
use domreel_protocol::{apply_text_edits, DomOp, NodeId, VNode};

use crate::asset_manager::AssetManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    MissingNode(NodeId),
    MissingParent(NodeId),
    NotAnElement(NodeId),
    NotCharacterData(NodeId),
    IndexOutOfBounds { index: u32, len: usize },
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyError::MissingNode(id) => write!(f, "no node with id {id}"),
            ApplyError::MissingParent(id) => write!(f, "no parent with id {id}"),
            ApplyError::NotAnElement(id) => write!(f, "node {id} is not an element"),
            ApplyError::NotCharacterData(id) => write!(f, "node {id} is not character data"),
            ApplyError::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for {len} children")
            }
        }
    }
}

impl std::error::Error for ApplyError {}

/// Apply a batch in order. A single failing op never aborts the batch.
pub fn apply_batch(
    doc: &mut Document,
    assets: &mut AssetManager,
    ops: impl IntoIterator<Item = DomOp>,
) {
    for op in ops {
        if let Err(err) = apply_op(doc, assets, op) {
            tracing::warn!("skipping failed operation: {err}");
        }
    }
}

pub fn apply_op(doc: &mut Document, assets: &mut AssetManager, op: DomOp) -> Result<(), ApplyError> {
    match op {
        DomOp::Insert {
            parent_id,
            index,
            node,
        } => {
            let parent = doc
                .node_by_stream_id(parent_id)
                .ok_or(ApplyError::MissingParent(parent_id))?;
            let len = doc.nodes[parent].children.len();
            if index as usize > len {
                return Err(ApplyError::IndexOutOfBounds { index, len });
            }
            let new_node = materialize(doc, assets, &node);
            doc.insert_child_at(parent, index as usize, new_node);
            doc.adopt_stream_ids(new_node);
            process_new_styles(doc, assets, new_node);
            Ok(())
        }
        DomOp::Remove { node_id } => {
            let node = doc
                .node_by_stream_id(node_id)
                .ok_or(ApplyError::MissingNode(node_id))?;
            release_subtree_assets(doc, assets, node);
            doc.remove_and_drop_node(node);
            Ok(())
        }
        DomOp::UpdateAttribute {
            node_id,
            name,
            value,
        } => {
            let node = doc
                .node_by_stream_id(node_id)
                .ok_or(ApplyError::MissingNode(node_id))?;
            if doc.nodes[node].element_data().is_none() {
                return Err(ApplyError::NotAnElement(node_id));
            }
            let qual = attr_name_from_wire(&name);
            let value = assets.rewrite_attr_value(node, &qual, &value);
            let element = doc.nodes[node].element_data_mut().expect("checked above");
            match element.attrs.iter_mut().find(|attr| attr.name == qual) {
                Some(attr) => attr.value = value,
                None => element.attrs.push(Attribute { name: qual, value }),
            }
            Ok(())
        }
        DomOp::RemoveAttribute { node_id, name } => {
            let node = doc
                .node_by_stream_id(node_id)
                .ok_or(ApplyError::MissingNode(node_id))?;
            let qual = attr_name_from_wire(&name);
            if let Some(element) = doc.nodes[node].element_data_mut() {
                // Removing an absent attribute is a no-op
                element.attrs.retain(|attr| attr.name != qual);
            }
            Ok(())
        }
        DomOp::UpdateText { node_id, edits } => {
            let node = doc
                .node_by_stream_id(node_id)
                .ok_or(ApplyError::MissingNode(node_id))?;
            let Some(data) = doc.nodes[node].text_data_mut() else {
                return Err(ApplyError::NotCharacterData(node_id));
            };
            data.content = apply_text_edits(&data.content, &edits);

            // Edits against a <style>'s text change its sheet
            let parent = doc.nodes[node].parent;
            if let Some(parent) = parent {
                if doc.nodes[parent].is_element_with_tag_name(&local_name!("style")) {
                    refresh_style_sheet(doc, assets, parent);
                }
            }
            Ok(())
        }
    }
}

/// Build a real subtree from a wire node, stamping stream ids and routing
/// attribute values through the asset manager.
pub fn materialize(doc: &mut Document, assets: &mut AssetManager, vnode: &VNode) -> usize {
    let node_id = match vnode {
        VNode::Text { text, .. } => doc.create_text_node(text),
        VNode::Cdata { data, .. } => doc.create_node(NodeData::Text(TextNodeData {
            kind: TextKind::Cdata,
            content: data.clone(),
        })),
        VNode::Comment { data, .. } => doc.create_node(NodeData::Text(TextNodeData {
            kind: TextKind::Comment,
            content: data.clone(),
        })),
        VNode::ProcessingInstruction { target, data, .. } => {
            doc.create_node(NodeData::ProcessingInstruction {
                target: target.clone(),
                data: data.clone(),
            })
        }
        VNode::DocumentType {
            name,
            public_id,
            system_id,
            ..
        } => doc.create_node(NodeData::Doctype(DoctypeData {
            name: name.clone(),
            public_id: public_id.clone(),
            system_id: system_id.clone(),
        })),
        VNode::Element(el) => {
            let name = element_name_from_wire(&el.tag, el.namespace.as_deref());
            let attrs: Vec<Attribute> = el
                .attributes
                .iter()
                .map(|(name, value)| Attribute {
                    name: attr_name_from_wire(name),
                    value: value.clone(),
                })
                .collect();
            let node_id = doc.create_element_node(ElementData::new(name, attrs));

            // Bind asset references now that the element exists as a site
            for i in 0..el.attributes.len() {
                let (qual, raw) = {
                    let attr = &doc.nodes[node_id].element_data().expect("element").attrs[i];
                    (attr.name.clone(), attr.value.clone())
                };
                let rewritten = assets.rewrite_attr_value(node_id, &qual, &raw);
                doc.nodes[node_id].element_data_mut().expect("element").attrs[i].value = rewritten;
            }

            for child in &el.children {
                let child_id = materialize(doc, assets, child);
                doc.append(node_id, &[child_id]);
            }

            if let Some(shadow_children) = &el.shadow {
                let shadow = doc.create_node(NodeData::ShadowRoot);
                doc.nodes[shadow].parent = Some(node_id);
                if let Some(element) = doc.nodes[node_id].element_data_mut() {
                    element.shadow_root = Some(shadow);
                }
                for child in shadow_children {
                    let child_id = materialize(doc, assets, child);
                    doc.append(shadow, &[child_id]);
                }
            }

            node_id
        }
    };

    doc.nodes[node_id].stream_id = Some(vnode.id());
    node_id
}

/// Build sheets for `<style>` elements in a freshly materialized subtree and
/// bind their nested asset references.
pub(crate) fn process_new_styles(doc: &mut Document, assets: &mut AssetManager, root: usize) {
    let node = &doc.nodes[root];
    let children = node.children.clone();
    let shadow = node.element_data().and_then(|el| el.shadow_root);

    if node.is_element_with_tag_name(&local_name!("style")) {
        refresh_style_sheet(doc, assets, root);
    }
    for child in children {
        process_new_styles(doc, assets, child);
    }
    if let Some(shadow) = shadow {
        process_new_styles(doc, assets, shadow);
    }
}

fn refresh_style_sheet(doc: &mut Document, assets: &mut AssetManager, style_node: usize) {
    doc.process_style_element(style_node);
    let Some(key) = doc.sheet_for_owner(style_node) else {
        return;
    };
    let text = doc.sheets[key].text();
    let rewritten = assets.rewrite_sheet_text(key, &text);
    doc.sheets[key].replace_text(&rewritten);
}

/// Release asset bindings held by a subtree that is about to be dropped.
fn release_subtree_assets(doc: &Document, assets: &mut AssetManager, root: usize) {
    let node = &doc.nodes[root];
    if let Some(element) = node.element_data() {
        assets.element_removed(root);
        if let Some(key) = element.stylesheet {
            assets.sheet_removed(key);
        }
        if let Some(shadow) = element.shadow_root {
            release_subtree_assets(doc, assets, shadow);
        }
    }
    for &child in &node.children {
        release_subtree_assets(doc, assets, child);
    }
}
