//! Recording-side stream shape: keyframe, causally ordered ops, stylesheet
//! event ordering, asset capture.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use domreel_dom::{namespace_url, ns, Document, DocumentConfig, QualName};
use domreel_protocol::{apply_text_edits, Frame, SheetOp, VNode};
use domreel_record::{DetectorMode, Recorder, RecorderConfig};
use domreel_traits::clock::Clock;
use domreel_traits::net::{
    BoxedHandler, Bytes, DummyNetProvider, NetProvider, Request, SharedProvider,
};
use domreel_traits::sink::VecSink;

struct TestClock(AtomicU64);
impl TestClock {
    fn shared(start: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(start)))
    }
    fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}
impl Clock for TestClock {
    fn now_epoch_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resolves every fetch synchronously with fixed bytes.
struct StaticNetProvider(Bytes);
impl NetProvider for StaticNetProvider {
    fn fetch(&self, _doc_id: usize, request: Request, handler: BoxedHandler) {
        handler.bytes(request.url.to_string(), self.0.clone());
    }
}

fn qual(name: &str) -> QualName {
    QualName {
        prefix: None,
        ns: ns!(html),
        local: name.into(),
    }
}

fn test_doc(html: &str) -> Document {
    let mut doc = Document::new(DocumentConfig {
        base_url: Some("https://example.com/page".to_string()),
        viewport: None,
    });
    domreel_html::DocumentHtmlParser::parse_into_doc(&mut doc, html);
    doc
}

fn start_recorder(doc: Document) -> (Recorder<VecSink<Frame>>, Arc<TestClock>) {
    let clock = TestClock::shared(1_000);
    let recorder = Recorder::start(
        doc,
        VecSink::default(),
        Arc::new(DummyNetProvider),
        clock.clone(),
        RecorderConfig::default(),
    );
    (recorder, clock)
}

fn body_id(doc: &Document) -> usize {
    let html = doc.root_node().children[0];
    doc.nodes[html].children[1]
}

#[test]
fn zero_mutations_emit_zero_ops() {
    let doc = test_doc("<html><body><div></div></body></html>");
    let (mut recorder, clock) = start_recorder(doc);
    clock.advance(50);
    recorder.poll();
    recorder.poll();

    let sink = recorder.into_sink();
    assert_eq!(sink.frames.len(), 2, "{:?}", sink.frames);
    assert!(matches!(sink.frames[0], Frame::Timestamp { epoch_ms: 1_000 }));
    match &sink.frames[1] {
        Frame::Keyframe {
            document,
            asset_count,
        } => {
            assert_eq!(*asset_count, 0);
            assert_eq!(document.children.len(), 1);
        }
        other => panic!("expected keyframe, got {other:?}"),
    }
}

#[test]
fn inserting_a_span_emits_one_insert_with_its_subtree() {
    let doc = test_doc("<html><body><div id=\"host\"></div></body></html>");
    let (mut recorder, clock) = start_recorder(doc);

    let host = recorder.document().element_by_html_id("host").unwrap();
    let host_sid = recorder.document().nodes[host].stream_id.unwrap();
    {
        let mut mutator = recorder.mutate();
        let span = mutator.create_element(qual("span"), vec![]);
        let text = mutator.create_text_node("Test");
        mutator.append_children(span, &[text]);
        mutator.append_children(host, &[span]);
    }
    clock.advance(20);
    recorder.poll();

    let sink = recorder.into_sink();
    let adds: Vec<_> = sink
        .frames
        .iter()
        .filter_map(|f| match f {
            Frame::DomNodeAdded {
                parent_id,
                index,
                node,
                ..
            } => Some((*parent_id, *index, node.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(adds.len(), 1);
    let (parent_id, index, node) = &adds[0];
    assert_eq!(*parent_id, host_sid);
    assert_eq!(*index, 0);
    match node {
        VNode::Element(el) => {
            assert_eq!(el.tag, "span");
            assert_eq!(el.children.len(), 1);
            assert!(matches!(&el.children[0], VNode::Text { text, .. } if text == "Test"));
        }
        other => panic!("expected element, got {other:?}"),
    }
}

#[test]
fn remove_then_re_add_emits_remove_before_insert_with_fresh_id() {
    let doc = test_doc("<html><body><div id=\"host\"><p></p></div></body></html>");
    let (mut recorder, clock) = start_recorder(doc);

    let host = recorder.document().element_by_html_id("host").unwrap();
    let old_p = recorder.document().nodes[host].children[0];
    let old_sid = recorder.document().nodes[old_p].stream_id.unwrap();
    {
        let mut mutator = recorder.mutate();
        mutator.remove_and_drop_node(old_p);
        let new_p = mutator.create_element(qual("p"), vec![]);
        mutator.append_children(host, &[new_p]);
    }
    clock.advance(20);
    recorder.poll();

    let sink = recorder.into_sink();
    let mut removed = None;
    let mut added = None;
    for (pos, frame) in sink.frames.iter().enumerate() {
        match frame {
            Frame::DomNodeRemoved { node_id } => removed = Some((pos, *node_id)),
            Frame::DomNodeAdded { node, .. } => added = Some((pos, node.id())),
            _ => {}
        }
    }
    let (remove_pos, removed_id) = removed.expect("remove emitted");
    let (add_pos, added_id) = added.expect("insert emitted");
    assert_eq!(removed_id, old_sid);
    assert_ne!(added_id, old_sid, "re-added node gets a fresh id");
    assert!(remove_pos < add_pos, "removal precedes insertion");
}

#[test]
fn attribute_round_trip_emits_an_update_per_batch() {
    let doc = test_doc("<html><body><div id=\"old\"></div></body></html>");
    let (mut recorder, clock) = start_recorder(doc);

    let div = recorder.document().element_by_html_id("old").unwrap();
    recorder.mutate().set_attribute(div, qual("id"), "new");
    clock.advance(20);
    recorder.poll();
    recorder.mutate().set_attribute(div, qual("id"), "old");
    clock.advance(20);
    recorder.poll();

    let sink = recorder.into_sink();
    let updates: Vec<&str> = sink
        .frames
        .iter()
        .filter_map(|f| match f {
            Frame::DomAttributeChanged { name, value, .. } if name == "id" => {
                Some(value.as_str())
            }
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec!["new", "old"]);
}

#[test]
fn text_edits_replay_onto_the_old_content() {
    let doc = test_doc("<html><body><p id=\"msg\">breaking: rain expected</p></body></html>");
    let (mut recorder, clock) = start_recorder(doc);

    let p = recorder.document().element_by_html_id("msg").unwrap();
    let text_node = recorder.document().nodes[p].children[0];
    recorder
        .mutate()
        .set_node_text(text_node, "breaking: sun expected");
    clock.advance(20);
    recorder.poll();

    let sink = recorder.into_sink();
    let edits = sink
        .frames
        .iter()
        .find_map(|f| match f {
            Frame::DomTextChanged { edits, .. } => Some(edits.clone()),
            _ => None,
        })
        .expect("text change emitted");
    assert_eq!(
        apply_text_edits("breaking: rain expected", &edits),
        "breaking: sun expected"
    );
}

#[test]
fn mutation_and_inverse_in_one_batch_cancel_out() {
    let doc = test_doc("<html><body><div id=\"host\"></div></body></html>");
    let (mut recorder, clock) = start_recorder(doc);

    let div = recorder.document().element_by_html_id("host").unwrap();
    {
        let mut mutator = recorder.mutate();
        mutator.set_attribute(div, qual("class"), "active");
        mutator.clear_attribute(div, qual("class"));
    }
    clock.advance(20);
    recorder.poll();

    let sink = recorder.into_sink();
    assert!(
        !sink
            .frames
            .iter()
            .any(|f| matches!(f, Frame::DomAttributeChanged { .. })),
        "snapshot diff cancels a set+clear pair: {:?}",
        sink.frames
    );
}

#[test]
fn stylesheet_event_for_new_style_element_flushes_after_its_insert() {
    let doc = test_doc("<html><body></body></html>");
    let (mut recorder, clock) = start_recorder(doc);

    let body = body_id(recorder.document());
    let style = {
        let mut mutator = recorder.mutate();
        let style = mutator.create_element(qual("style"), vec![]);
        let css = mutator.create_text_node("p { color: blue }");
        mutator.append_children(style, &[css]);
        mutator.append_children(body, &[style]);
        style
    };
    // CSSOM call against the freshly built sheet, before any emission
    let key = recorder
        .document()
        .sheet_for_owner(style)
        .expect("style element processed on mutator flush");
    recorder
        .document_mut()
        .sheet_insert_rule(key, 1, "span { color: red }")
        .unwrap();

    clock.advance(20);
    recorder.poll();

    let sink = recorder.into_sink();
    let add_pos = sink
        .frames
        .iter()
        .position(|f| matches!(f, Frame::DomNodeAdded { .. }))
        .expect("style insert emitted");
    let sheet_pos = sink
        .frames
        .iter()
        .position(|f| matches!(f, Frame::StyleSheetChanged { .. }))
        .expect("sheet op emitted");
    assert!(
        add_pos < sheet_pos,
        "sheet op may not precede the frame announcing its owner: {:?}",
        sink.frames
    );
    match &sink.frames[sheet_pos] {
        Frame::StyleSheetChanged {
            sheet_id,
            adopted,
            op,
        } => {
            assert!(!adopted);
            let style_sid = recorder_sid(&sink.frames, "style");
            assert_eq!(*sheet_id, style_sid);
            assert!(
                matches!(op, SheetOp::RulesInsert { index: 1, rule } if rule == "span { color: red }")
            );
        }
        _ => unreachable!(),
    }
}

/// Find the stream id of the first element with the given tag announced by a
/// DomNodeAdded frame.
fn recorder_sid(frames: &[Frame], tag: &str) -> u32 {
    fn find(node: &VNode, tag: &str) -> Option<u32> {
        match node {
            VNode::Element(el) => {
                if el.tag == tag {
                    return Some(el.id);
                }
                el.children.iter().find_map(|c| find(c, tag))
            }
            _ => None,
        }
    }
    frames
        .iter()
        .find_map(|f| match f {
            Frame::DomNodeAdded { node, .. } => find(node, tag),
            _ => None,
        })
        .expect("tag announced")
}

#[test]
fn adopted_sheet_is_announced_before_its_rule_events() {
    let doc = test_doc("<html><body></body></html>");
    let (mut recorder, clock) = start_recorder(doc);

    let key = recorder.document_mut().create_constructed_sheet(None);
    recorder.document_mut().set_adopted_sheets(vec![key]);
    recorder
        .document_mut()
        .sheet_insert_rule(key, 0, "p { color: red }")
        .unwrap();
    clock.advance(20);
    recorder.poll();

    let sink = recorder.into_sink();
    let sheet_ops: Vec<(u32, bool, SheetOp)> = sink
        .frames
        .iter()
        .filter_map(|f| match f {
            Frame::StyleSheetChanged {
                sheet_id,
                adopted,
                op,
            } => Some((*sheet_id, *adopted, op.clone())),
            _ => None,
        })
        .collect();

    let added = sheet_ops
        .iter()
        .position(|(_, _, op)| matches!(op, SheetOp::SheetAdded { .. }))
        .expect("sheet announced");
    let list = sheet_ops
        .iter()
        .position(|(_, _, op)| matches!(op, SheetOp::AdoptedListChanged { .. }))
        .expect("adopted list emitted");
    let rule = sheet_ops
        .iter()
        .position(|(_, _, op)| matches!(op, SheetOp::RulesInsert { .. }))
        .expect("rule insert emitted");
    assert!(added < list, "sheet announced before the list naming it");
    assert!(list < rule || added < rule, "rule event after announcement");
    assert!(sheet_ops[rule].1, "rule event targets an adopted sheet");
    assert_eq!(sheet_ops[rule].0, sheet_ops[added].0);
}

#[test]
fn same_origin_image_is_captured_as_an_asset() {
    let doc = test_doc(
        "<html><body><img id=\"pic\" src=\"/images/cat.png\"></body></html>",
    );
    let clock = TestClock::shared(1_000);
    let png = Bytes::from_static(&[0x89, b'P', b'N', b'G', 1, 2, 3]);
    let net: SharedProvider = Arc::new(StaticNetProvider(png.clone()));
    let mut recorder = Recorder::start(
        doc,
        VecSink::default(),
        net,
        clock.clone(),
        RecorderConfig::default(),
    );
    recorder.poll();

    let sink = recorder.into_sink();
    let keyframe_src = sink
        .frames
        .iter()
        .find_map(|f| match f {
            Frame::Keyframe { document, .. } => {
                fn find_img(node: &VNode) -> Option<String> {
                    match node {
                        VNode::Element(el) => {
                            if el.tag == "img" {
                                return el.attr("src").map(str::to_string);
                            }
                            el.children.iter().find_map(find_img)
                        }
                        _ => None,
                    }
                }
                document.children.iter().find_map(find_img)
            }
            _ => None,
        })
        .expect("img in keyframe");
    assert_eq!(keyframe_src, "asset:1");

    let asset = sink
        .frames
        .iter()
        .find_map(|f| match f {
            Frame::Asset(asset) => Some(asset.clone()),
            _ => None,
        })
        .expect("asset frame emitted");
    assert_eq!(asset.id, 1);
    assert_eq!(asset.url, "https://example.com/images/cat.png");
    assert_eq!(asset.mime.as_deref(), Some("image/png"));
    assert_eq!(asset.bytes, png);
}

#[test]
fn cross_origin_assets_are_refused_with_empty_bytes() {
    let doc = test_doc(
        "<html><body><img src=\"https://cdn.elsewhere.net/logo.png\"></body></html>",
    );
    let (mut recorder, _clock) = start_recorder(doc);
    recorder.poll();

    let sink = recorder.into_sink();
    let asset = sink
        .frames
        .iter()
        .find_map(|f| match f {
            Frame::Asset(asset) => Some(asset.clone()),
            _ => None,
        })
        .expect("refused asset still emits a frame");
    assert!(asset.is_fallback());
    assert_eq!(asset.url, "https://cdn.elsewhere.net/logo.png");
}

#[test]
fn style_element_text_is_rewritten_in_the_keyframe() {
    let doc = test_doc(
        "<html><head><style>.a { background: url(/bg.png) }</style></head><body></body></html>",
    );
    let (recorder, _clock) = start_recorder(doc);

    let sink = recorder.into_sink();
    let style_text = sink
        .frames
        .iter()
        .find_map(|f| match f {
            Frame::Keyframe { document, .. } => {
                fn find_style(node: &VNode) -> Option<String> {
                    match node {
                        VNode::Element(el) => {
                            if el.tag == "style" {
                                if let Some(VNode::Text { text, .. }) = el.children.first() {
                                    return Some(text.clone());
                                }
                            }
                            el.children.iter().find_map(find_style)
                        }
                        _ => None,
                    }
                }
                document.children.iter().find_map(find_style)
            }
            _ => None,
        })
        .expect("style text in keyframe");
    assert!(
        style_text.contains("url(\"asset:1\")"),
        "css url interned: {style_text}"
    );
}

#[test]
fn batched_mode_coalesces_until_the_interval_elapses() {
    let doc = test_doc("<html><body><div id=\"host\"></div></body></html>");
    let clock = TestClock::shared(1_000);
    let mut recorder = Recorder::start(
        doc,
        VecSink::default(),
        Arc::new(DummyNetProvider),
        clock.clone(),
        RecorderConfig {
            mode: DetectorMode::Batched {
                interval: std::time::Duration::from_millis(100),
            },
            ..Default::default()
        },
    );

    let host = recorder.document().element_by_html_id("host").unwrap();
    recorder.mutate().set_attribute(host, qual("class"), "a");
    recorder.poll();
    // First pass runs immediately (nothing has run yet)
    recorder.mutate().set_attribute(host, qual("class"), "b");
    clock.advance(10);
    recorder.poll();
    recorder.mutate().set_attribute(host, qual("class"), "c");
    clock.advance(200);
    recorder.poll();

    let sink = recorder.into_sink();
    let values: Vec<&str> = sink
        .frames
        .iter()
        .filter_map(|f| match f {
            Frame::DomAttributeChanged { name, value, .. } if name == "class" => {
                Some(value.as_str())
            }
            _ => None,
        })
        .collect();
    // The b-mutation waited for the interval and was observed as c by then
    assert_eq!(values, vec!["a", "c"]);
}
