//! End-to-end: record a live document, replay the stream, and check that the
//! reconstructed document converges on the live one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;

use domreel::{
    encode_frame, Clock, Document, DocumentConfig, DocumentHtmlParser, DummyNetProvider, Frame,
    Player, PlayerConfig, Recorder, RecorderConfig, SharedProvider, VecSink,
};
use domreel_dom::util::subtree_structurally_equal;
use domreel_dom::{namespace_url, ns, QualName};
use domreel_traits::net::{BoxedHandler, Bytes, Request};

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

struct StaticNetProvider(Bytes);
impl domreel::NetProvider for StaticNetProvider {
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
    DocumentHtmlParser::parse_into_doc(&mut doc, html);
    doc
}

fn start(doc: Document) -> (Recorder<VecSink<Frame>>, Arc<TestClock>) {
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

/// Replay parsed frames directly.
fn replay(frames: &[Frame]) -> Player {
    let mut player = Player::new(PlayerConfig::default());
    for frame in frames {
        player.handle_frame(frame.clone());
    }
    player
}

/// Replay through the binary codec, split into awkward chunk sizes.
fn replay_encoded(frames: &[Frame]) -> Player {
    let mut stream = BytesMut::new();
    for frame in frames {
        encode_frame(frame, &mut stream);
    }
    let mut player = Player::new(PlayerConfig::default());
    for chunk in stream.chunks(13) {
        player.handle_chunk(chunk).expect("stream decodes");
    }
    player
}

fn assert_converged(live: &Document, player: &Player) {
    assert!(
        subtree_structurally_equal(live, 0, player.document(), 0),
        "player document diverged from live document"
    );
}

#[test]
fn snapshot_alone_reconstructs_the_document() {
    let doc = test_doc(
        "<html><head><title>hi</title></head>\
         <body><div class=\"a\"><p>one</p><!-- note --><p>two</p></div></body></html>",
    );
    let (recorder, _clock) = start(doc);

    let (live, sink) = recorder.finish();
    let player = replay(&sink.frames);
    assert_converged(&live, &player);

    // The binary codec path agrees
    let player = replay_encoded(&sink.frames);
    assert_converged(&live, &player);
}

#[test]
fn scenario_insert_one_span() {
    let doc = test_doc("<html><body><div id=\"host\"></div></body></html>");
    let (mut recorder, clock) = start(doc);

    let host = recorder.document().element_by_html_id("host").unwrap();
    {
        let mut mutator = recorder.mutate();
        let span = mutator.create_element(qual("span"), vec![]);
        let text = mutator.create_text_node("Test");
        mutator.append_children(span, &[text]);
        mutator.append_children(host, &[span]);
    }
    clock.advance(16);
    recorder.poll();

    let (live, sink) = recorder.finish();
    let player = replay(&sink.frames);
    assert_converged(&live, &player);

    let target_host = player
        .document()
        .element_by_html_id("host")
        .expect("host materialized");
    let children = &player.document().nodes[target_host].children;
    assert_eq!(children.len(), 1);
    let span = children[0];
    assert!(player.document().nodes[span]
        .element_data()
        .map(|el| el.name.local.as_ref() == "span")
        .unwrap_or(false));
    assert_eq!(player.document().text_content(span), "Test");
}

#[test]
fn scenario_remove_then_re_add() {
    let doc = test_doc("<html><body><div id=\"host\"><p></p></div></body></html>");
    let (mut recorder, clock) = start(doc);

    let host = recorder.document().element_by_html_id("host").unwrap();
    let old_p = recorder.document().nodes[host].children[0];
    let old_sid = recorder.document().nodes[old_p].stream_id.unwrap();
    {
        let mut mutator = recorder.mutate();
        mutator.remove_and_drop_node(old_p);
        let new_p = mutator.create_element(qual("p"), vec![]);
        mutator.append_children(host, &[new_p]);
    }
    clock.advance(16);
    recorder.poll();

    let (live, sink) = recorder.finish();
    let player = replay(&sink.frames);
    assert_converged(&live, &player);

    let target_host = player.document().element_by_html_id("host").unwrap();
    let children = &player.document().nodes[target_host].children;
    assert_eq!(children.len(), 1, "a single p remains");
    let new_sid = player.document().nodes[children[0]].stream_id.unwrap();
    assert_ne!(new_sid, old_sid, "the re-added p carries a fresh id");
    assert!(player.document().node_by_stream_id(old_sid).is_none());
}

#[test]
fn scenario_attribute_round_trip() {
    let doc = test_doc("<html><body><div id=\"old\"></div></body></html>");
    let (mut recorder, clock) = start(doc);

    let div = recorder.document().element_by_html_id("old").unwrap();
    let div_sid = recorder.document().nodes[div].stream_id.unwrap();
    recorder.mutate().set_attribute(div, qual("id"), "new");
    clock.advance(16);
    recorder.poll();
    recorder.mutate().set_attribute(div, qual("id"), "old");
    clock.advance(16);
    recorder.poll();

    let (live, sink) = recorder.finish();
    let updates = sink
        .frames
        .iter()
        .filter(|f| matches!(f, Frame::DomAttributeChanged { name, .. } if name == "id"))
        .count();
    assert!(updates >= 2);

    let player = replay(&sink.frames);
    assert_converged(&live, &player);
    let target = player.document().node_by_stream_id(div_sid).unwrap();
    assert_eq!(
        player.document().nodes[target]
            .element_data()
            .unwrap()
            .attr("id".into()),
        Some("old")
    );
}

#[test]
fn scenario_image_asset() {
    let png = Bytes::from_static(&[0x89, b'P', b'N', b'G', 4, 2]);
    let doc = test_doc("<html><body><img id=\"pic\" src=\"/cat.png\"></body></html>");
    let clock = TestClock::shared(1_000);
    let net: SharedProvider = Arc::new(StaticNetProvider(png.clone()));
    let mut recorder = Recorder::start(
        doc,
        VecSink::default(),
        net,
        clock,
        RecorderConfig::default(),
    );
    recorder.poll();

    let sink = recorder.into_sink();
    let player = replay_encoded(&sink.frames);
    assert!(player.assets_settled());

    let img = player.document().element_by_html_id("pic").unwrap();
    let src = player.document().nodes[img]
        .element_data()
        .unwrap()
        .attr("src".into())
        .unwrap()
        .to_string();
    let entry = player
        .asset_manager()
        .object_urls()
        .get(&src)
        .expect("img src resolves in-memory");
    assert_eq!(entry.bytes, png, "delivered bytes round-tripped");
}

#[test]
fn scenario_css_nested_asset() {
    let image = Bytes::from_static(&[0xFF, 0xD8, 0xFF, 1]);
    let doc = test_doc(
        "<html><head><style>.a { background: url(/bg.jpg) }</style></head><body></body></html>",
    );
    let clock = TestClock::shared(1_000);
    let net: SharedProvider = Arc::new(StaticNetProvider(image.clone()));
    let mut recorder = Recorder::start(
        doc,
        VecSink::default(),
        net,
        clock,
        RecorderConfig::default(),
    );
    recorder.poll();

    let sink = recorder.into_sink();
    let player = replay(&sink.frames);

    // Find the style element's sheet in the target and read its css back
    let doc = player.document();
    let style = doc
        .nodes
        .iter()
        .find_map(|(id, node)| node.is_element_with_tag_name(&"style".into()).then_some(id))
        .expect("style element materialized");
    let key = doc.sheet_for_owner(style).expect("sheet built");
    let css = doc.sheet(key).unwrap().text();
    assert!(!css.contains("asset:"), "placeholders substituted: {css}");

    let url = css
        .split("url(\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .expect("background url present");
    let entry = player
        .asset_manager()
        .object_urls()
        .get(url)
        .expect("background resolves in-memory");
    assert_eq!(entry.bytes, image);
}

#[test]
fn scenario_adopted_sheet_rule_insert_before_announcement() {
    let mut doc = test_doc("<html><body></body></html>");
    // The constructed sheet exists, empty, before recording starts
    let key = doc.create_constructed_sheet(None);
    doc.set_adopted_sheets(vec![key]);

    let (mut recorder, clock) = start(doc);
    recorder
        .document_mut()
        .sheet_insert_rule(key, 0, "p{color:red}")
        .unwrap();
    clock.advance(16);
    recorder.poll();

    let sink = recorder.into_sink();
    // The keyframe precedes the rule event
    let keyframe_pos = sink
        .frames
        .iter()
        .position(|f| matches!(f, Frame::Keyframe { .. }))
        .unwrap();
    let rule_pos = sink
        .frames
        .iter()
        .position(|f| matches!(f, Frame::StyleSheetChanged { .. }))
        .expect("rule event emitted");
    assert!(keyframe_pos < rule_pos);

    let player = replay(&sink.frames);
    let doc = player.document();
    assert_eq!(doc.adopted_sheets.len(), 1);
    let sheet = doc.sheet(doc.adopted_sheets[0]).unwrap();
    assert_eq!(sheet.rules, vec!["p{color:red}".to_string()]);
}

#[test]
fn reorders_and_nested_edits_converge() {
    let doc = test_doc(
        "<html><body><ul id=\"list\"><li>a</li><li>b</li><li>c</li></ul></body></html>",
    );
    let (mut recorder, clock) = start(doc);

    let list = recorder.document().element_by_html_id("list").unwrap();

    // Batch 1: move the last li to the front and edit its text
    {
        let children = recorder.document().nodes[list].children.clone();
        let mut mutator = recorder.mutate();
        let last = children[2];
        mutator.remove_node(last);
        mutator.insert_child_at(list, 0, last);
        let text = mutator.doc.nodes[last].children[0];
        mutator.set_node_text(text, "c moved");
    }
    clock.advance(16);
    recorder.poll();

    // Batch 2: drop the middle of the new order, append a fresh li
    {
        let children = recorder.document().nodes[list].children.clone();
        let mut mutator = recorder.mutate();
        mutator.remove_and_drop_node(children[1]);
        let li = mutator.create_element(
            qual("li"),
            vec![domreel_dom::node::Attribute {
                name: qual("class"),
                value: "fresh".to_string(),
            }],
        );
        let text = mutator.create_text_node("d");
        mutator.append_children(li, &[text]);
        mutator.append_children(list, &[li]);
    }
    clock.advance(16);
    recorder.poll();

    let (live, sink) = recorder.finish();
    let player = replay_encoded(&sink.frames);
    assert_converged(&live, &player);

    let target_list = player.document().element_by_html_id("list").unwrap();
    let texts: Vec<String> = player.document().nodes[target_list]
        .children
        .iter()
        .map(|&li| player.document().text_content(li))
        .collect();
    assert_eq!(texts, vec!["c moved", "b", "d"]);
}

#[test]
fn convergence_over_multiple_batches() {
    let doc = test_doc(
        "<html><body><div id=\"host\"><p>hello</p></div><span id=\"tag\">x</span></body></html>",
    );
    let (mut recorder, clock) = start(doc);

    {
        let mut mutator = recorder.mutate();
        let host = mutator.doc.element_by_html_id("host").unwrap();
        let div = mutator.create_element(qual("div"), vec![]);
        let text = mutator.create_text_node("nested");
        mutator.append_children(div, &[text]);
        mutator.append_children(host, &[div]);
        mutator.set_attribute(host, qual("data-phase"), "1");
    }
    clock.advance(16);
    recorder.poll();

    {
        let mut mutator = recorder.mutate();
        let tag = mutator.doc.element_by_html_id("tag").unwrap();
        let tag_text = mutator.doc.nodes[tag].children[0];
        mutator.set_node_text(tag_text, "xyz ünïcode");
        let host = mutator.doc.element_by_html_id("host").unwrap();
        mutator.clear_attribute(host, qual("data-phase"));
        let p = mutator.doc.nodes[host].children[0];
        mutator.remove_and_drop_node(p);
    }
    clock.advance(16);
    recorder.poll();

    let (live, sink) = recorder.finish();
    let player = replay_encoded(&sink.frames);
    assert_converged(&live, &player);
}

#[test]
fn shadow_content_is_captured_with_its_host() {
    let mut doc = test_doc("<html><body><div id=\"host\"></div></body></html>");
    let host = doc.element_by_html_id("host").unwrap();
    {
        let mut mutator = domreel::DocumentMutator::new(&mut doc);
        let shadow = mutator.attach_shadow(host);
        let inner = mutator.create_element(qual("span"), vec![]);
        let text = mutator.create_text_node("inside");
        mutator.append_children(inner, &[text]);
        mutator.append_children(shadow, &[inner]);
    }

    let (recorder, _clock) = start(doc);
    let (live, sink) = recorder.finish();
    let player = replay(&sink.frames);
    assert_converged(&live, &player);

    let target_host = player.document().element_by_html_id("host").unwrap();
    let shadow = player.document().nodes[target_host]
        .element_data()
        .unwrap()
        .shadow_root
        .expect("shadow materialized");
    assert_eq!(player.document().text_content(shadow), "inside");
}

#[test]
fn id_stability_across_batches() {
    let doc = test_doc("<html><body><div id=\"host\"></div></body></html>");
    let (mut recorder, clock) = start(doc);

    let host = recorder.document().element_by_html_id("host").unwrap();
    let sid = recorder.document().nodes[host].stream_id.unwrap();

    recorder.mutate().set_attribute(host, qual("a"), "1");
    clock.advance(16);
    recorder.poll();
    recorder.mutate().set_attribute(host, qual("b"), "2");
    clock.advance(16);
    recorder.poll();
    assert_eq!(
        recorder.document().nodes[host].stream_id,
        Some(sid),
        "id never reassigned"
    );

    let sink = recorder.into_sink();
    for frame in &sink.frames {
        if let Frame::DomAttributeChanged { node_id, .. } = frame {
            assert_eq!(*node_id, sid, "every attribute op targets the stable id");
        }
    }
}
