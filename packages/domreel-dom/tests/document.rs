//! Document and mutator behavior: move semantics, journal contents, sheet
//! registry lifecycle.

use domreel_dom::node::{Attribute, NodeData};
use domreel_dom::observer::MutationKind;
use domreel_dom::stylesheet::SheetChange;
use domreel_dom::{
    namespace_url, ns, Document, DocumentConfig, DocumentMutator, QualName,
};

fn qual(name: &str) -> QualName {
    QualName {
        prefix: None,
        ns: ns!(html),
        local: name.into(),
    }
}

fn doc_with_children(tags: &[&str]) -> (Document, usize, Vec<usize>) {
    let mut doc = Document::new(DocumentConfig::default());
    let mut children = Vec::new();
    let parent = {
        let mut mutator = DocumentMutator::new(&mut doc);
        let parent = mutator.create_element(qual("div"), vec![]);
        for tag in tags {
            let child = mutator.create_element(qual(tag), vec![]);
            mutator.append_children(parent, &[child]);
            children.push(child);
        }
        mutator.append_children(0, &[parent]);
        parent
    };
    (doc, parent, children)
}

#[test]
fn appending_an_already_parented_node_moves_it() {
    let (mut doc, parent, children) = doc_with_children(&["a", "b"]);
    let other = {
        let mut mutator = DocumentMutator::new(&mut doc);
        let other = mutator.create_element(qual("section"), vec![]);
        mutator.append_children(0, &[other]);
        mutator.append_children(other, &[children[0]]);
        other
    };

    assert_eq!(doc.nodes[parent].children, vec![children[1]]);
    assert_eq!(doc.nodes[other].children, vec![children[0]]);
    assert_eq!(doc.nodes[children[0]].parent, Some(other));
}

#[test]
fn journal_records_mutations_only_while_enabled() {
    let (mut doc, parent, children) = doc_with_children(&["a"]);
    assert!(!doc.journal.has_records(), "disabled journal stays empty");

    doc.journal.set_enabled(true);
    {
        let mut mutator = DocumentMutator::new(&mut doc);
        mutator.set_attribute(children[0], qual("class"), "x");
        mutator.remove_and_drop_node(children[0]);
    }
    let (records, dropped) = doc.journal.take_records();
    assert!(records
        .iter()
        .any(|r| r.kind == MutationKind::Attributes && r.target == children[0]));
    assert!(records
        .iter()
        .any(|r| r.kind == MutationKind::ChildList && r.target == parent));
    assert_eq!(dropped, vec![children[0]]);
}

#[test]
fn clearing_an_absent_attribute_does_not_journal() {
    let (mut doc, _parent, children) = doc_with_children(&["a"]);
    doc.journal.set_enabled(true);
    {
        let mut mutator = DocumentMutator::new(&mut doc);
        mutator.clear_attribute(children[0], qual("class"));
    }
    let (records, _) = doc.journal.take_records();
    assert!(records.is_empty());
}

#[test]
fn dropping_a_subtree_reclaims_stream_ids_and_sheets() {
    let mut doc = Document::new(DocumentConfig::default());
    let style = {
        let mut mutator = DocumentMutator::new(&mut doc);
        let style = mutator.create_element(qual("style"), vec![]);
        let css = mutator.create_text_node("p { color: red }");
        mutator.append_children(style, &[css]);
        mutator.append_children(0, &[style]);
        style
    };
    doc.assign_stream_ids(0);
    let sid = doc.nodes[style].stream_id.unwrap();
    let key = doc.sheet_for_owner(style).expect("mutator flush built sheet");
    assert_eq!(doc.sheet(key).unwrap().rules.len(), 1);

    doc.remove_and_drop_node(style);
    assert_eq!(doc.node_by_stream_id(sid), None);
    assert!(doc.sheet(key).is_none(), "owner-backed sheet dropped");
}

#[test]
fn style_element_rebuilds_its_sheet_on_flush_keeping_the_key() {
    let mut doc = Document::new(DocumentConfig::default());
    let (style, css) = {
        let mut mutator = DocumentMutator::new(&mut doc);
        let style = mutator.create_element(qual("style"), vec![]);
        let css = mutator.create_text_node(".a { color: red }");
        mutator.append_children(style, &[css]);
        mutator.append_children(0, &[style]);
        (style, css)
    };
    let key = doc.sheet_for_owner(style).unwrap();

    {
        let mut mutator = DocumentMutator::new(&mut doc);
        mutator.set_node_text(css, ".a { color: blue } .b { margin: 0 }");
    }
    assert_eq!(doc.sheet_for_owner(style), Some(key), "sheet key is stable");
    assert_eq!(doc.sheet(key).unwrap().rules.len(), 2);
}

#[test]
fn adopted_list_changes_capture_sheet_text_at_call_time() {
    let mut doc = Document::new(DocumentConfig::default());
    doc.journal.set_enabled(true);

    let key = doc.create_constructed_sheet(None);
    doc.set_adopted_sheets(vec![key]);
    doc.sheet_insert_rule(key, 0, "p{color:red}").unwrap();

    let changes = doc.journal.take_sheet_changes();
    assert_eq!(changes.len(), 2);
    match &changes[0] {
        SheetChange::AdoptedListChanged { sheets } => {
            assert_eq!(sheets.len(), 1);
            assert_eq!(sheets[0].text, "", "text as of the list change, not later");
        }
        other => panic!("expected adopted-list change, got {other:?}"),
    }
    assert!(matches!(changes[1], SheetChange::RulesInsert { index: 0, .. }));
}

#[test]
fn sheet_rule_index_bounds_are_validated() {
    let mut doc = Document::new(DocumentConfig::default());
    let key = doc.create_constructed_sheet(None);
    assert!(doc.sheet_insert_rule(key, 1, "p{}").is_err());
    assert!(doc.sheet_insert_rule(key, 0, "p{}").is_ok());
    assert!(doc.sheet_delete_rule(key, 1).is_err());
    assert!(doc.sheet_delete_rule(key, 0).is_ok());
}

#[test]
fn import_subtree_copies_structure_without_stream_ids() {
    let (mut src, parent, _children) = doc_with_children(&["a", "b"]);
    src.nodes[parent].element_data_mut().unwrap().attrs.push(Attribute {
        name: qual("class"),
        value: "x".to_string(),
    });
    src.assign_stream_ids(0);

    let mut dst = Document::new(DocumentConfig::default());
    let imported = dst.import_subtree(&src, parent);
    assert!(dst.nodes[imported].stream_id.is_none());
    assert!(domreel_dom::util::subtree_structurally_equal(
        &src, parent, &dst, imported
    ));

    dst.mirror_stream_ids_from(&src, parent, imported);
    assert_eq!(dst.nodes[imported].stream_id, src.nodes[parent].stream_id);
}

#[test]
fn deep_clones_are_fresh_nodes() {
    let (mut doc, parent, children) = doc_with_children(&["a", "b"]);
    doc.assign_stream_ids(0);

    let clone = doc.deep_clone_node(parent);
    assert!(doc.nodes[clone].stream_id.is_none(), "clones carry no ids");
    assert_eq!(doc.nodes[clone].children.len(), 2);
    assert_ne!(doc.nodes[clone].children[0], children[0]);
    assert!(domreel_dom::util::subtree_structurally_equal(
        &doc, parent, &doc, clone
    ));
}

#[test]
fn text_content_concatenates_descendants() {
    let mut doc = Document::new(DocumentConfig::default());
    let div = {
        let mut mutator = DocumentMutator::new(&mut doc);
        let div = mutator.create_element(qual("div"), vec![]);
        let a = mutator.create_text_node("hello ");
        let span = mutator.create_element(qual("span"), vec![]);
        let b = mutator.create_text_node("world");
        mutator.append_children(span, &[b]);
        mutator.append_children(div, &[a, span]);
        mutator.append_children(0, &[div]);
        div
    };
    assert_eq!(doc.text_content(div), "hello world");
    assert!(matches!(doc.nodes[div].data, NodeData::Element(_)));
}
