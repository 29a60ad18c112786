use crate::document::Document;
use crate::node::NodeData;

/// Debug-print a subtree
pub fn walk_tree(indent: usize, doc: &Document, node_id: usize) {
    let node = &doc.nodes[node_id];

    print!("{}", " ".repeat(indent));
    let id = node.id;
    let stream = node
        .stream_id
        .map(|id| format!("#{id}"))
        .unwrap_or_default();
    match &node.data {
        NodeData::Document => println!("#Document {id}{stream}"),
        NodeData::Text(data) => {
            println!("#{} {id}{stream}: {}", node.kind_name(), data.content.trim().escape_default())
        }
        NodeData::ProcessingInstruction { target, .. } => println!("<?{target}?> {id}{stream}"),
        NodeData::Doctype(data) => println!("<!DOCTYPE {}> {id}{stream}", data.name),
        NodeData::ShadowRoot => println!("#shadow-root {id}"),
        NodeData::Element(data) => {
            print!("<{} {id}{stream}", data.name.local);
            for attr in data.attrs.iter() {
                print!(" {}=\"{}\"", attr.name.local, attr.value);
            }
            println!(">");
        }
    }

    if let Some(shadow) = node.element_data().and_then(|el| el.shadow_root) {
        walk_tree(indent + 2, doc, shadow);
    }
    for &child_id in &node.children {
        walk_tree(indent + 2, doc, child_id);
    }
}

/// Structural equality of two subtrees, possibly in different documents:
/// equal node kinds, tag names, attribute sets (order-insensitive), character
/// data, and child lists at every depth. Stream ids are not compared.
pub fn subtree_structurally_equal(
    a_doc: &Document,
    a_id: usize,
    b_doc: &Document,
    b_id: usize,
) -> bool {
    let a = &a_doc.nodes[a_id];
    let b = &b_doc.nodes[b_id];

    let data_equal = match (&a.data, &b.data) {
        (NodeData::Document, NodeData::Document) => true,
        (NodeData::ShadowRoot, NodeData::ShadowRoot) => true,
        (NodeData::Text(a), NodeData::Text(b)) => a.kind == b.kind && a.content == b.content,
        (
            NodeData::ProcessingInstruction { target: at, data: ad },
            NodeData::ProcessingInstruction { target: bt, data: bd },
        ) => at == bt && ad == bd,
        (NodeData::Doctype(a), NodeData::Doctype(b)) => {
            a.name == b.name && a.public_id == b.public_id && a.system_id == b.system_id
        }
        (NodeData::Element(a), NodeData::Element(b)) => {
            a.name == b.name
                && a.attrs.len() == b.attrs.len()
                && a.attrs
                    .iter()
                    .all(|attr| b.attr_by_qual(&attr.name) == Some(attr.value.as_str()))
        }
        _ => false,
    };
    if !data_equal {
        return false;
    }

    if a.children.len() != b.children.len() {
        return false;
    }
    let shadows_equal = match (
        a.element_data().and_then(|el| el.shadow_root),
        b.element_data().and_then(|el| el.shadow_root),
    ) {
        (None, None) => true,
        (Some(a_shadow), Some(b_shadow)) => {
            subtree_structurally_equal(a_doc, a_shadow, b_doc, b_shadow)
        }
        _ => false,
    };
    if !shadows_equal {
        return false;
    }

    a.children
        .iter()
        .zip(&b.children)
        .all(|(&a_child, &b_child)| subtree_structurally_equal(a_doc, a_child, b_doc, b_child))
}
