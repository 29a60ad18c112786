//! The recording orchestrator.
//!
//! Owns the live document for the duration of a recording: hosts mutate it
//! through [`Recorder::mutate`], and the recorder turns those mutations into
//! frames on its cooperative `poll` tick. The emitted stream is a Timestamp,
//! a Keyframe, Asset frames as bytes arrive, then DomOp and SheetOp frames
//! per detector batch.

use std::sync::mpsc::{channel, Receiver, Sender};

use rustc_hash::FxHashMap;
use url::Url;

use domreel_dom::{Document, DocumentMutator};
use domreel_protocol::urls::{format_asset_token, is_self_contained_url, rewrite_css_urls};
use domreel_protocol::{Asset, AssetId, DomOp, Frame};
use domreel_traits::clock::SharedClock;
use domreel_traits::net::{Bytes, Request, SharedProvider};
use domreel_traits::sink::FrameSink;

use crate::assets::{AssetFetch, AssetFetchHandler, AssetKind, PendingAssets, RecorderEvent};
use crate::detector::{collect_elements, DetectorMode, DomChangeDetector};
use crate::inliner::{kind_for_url, serialize_document, InlineContext};
use crate::sheet_tracker::{SheetFrame, StyleSheetTracker};

pub struct RecorderConfig {
    /// Diff scheduling: immediate (next poll after a mutation) or batched at
    /// a fixed interval
    pub mode: DetectorMode,
    /// Capture the bytes of cross-origin subresources. When disabled they
    /// are recorded as empty-bytes assets and the player falls back to the
    /// original URL.
    pub inline_cross_origin: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mode: DetectorMode::Immediate,
            inline_cross_origin: false,
        }
    }
}

pub struct Recorder<S: FrameSink<Frame>> {
    doc: Document,
    sink: S,
    clock: SharedClock,
    net: SharedProvider,
    config: RecorderConfig,

    assets: PendingAssets,
    asset_kinds: FxHashMap<AssetId, AssetKind>,
    detector: DomChangeDetector,
    tracker: StyleSheetTracker,

    tx: Sender<RecorderEvent>,
    rx: Receiver<RecorderEvent>,

    stopped: bool,
    last_timestamp_ms: u64,
}

impl<S: FrameSink<Frame>> Recorder<S> {
    /// Begin recording: assigns stream ids to the whole document, emits the
    /// keyframe, and starts capturing referenced assets.
    pub fn start(
        mut doc: Document,
        sink: S,
        net: SharedProvider,
        clock: SharedClock,
        config: RecorderConfig,
    ) -> Self {
        doc.journal.set_enabled(true);
        let (tx, rx) = channel();

        let mut tracker = StyleSheetTracker::new();
        let adopted = doc.adopted_sheets.clone();
        for &key in &adopted {
            tracker.ensure_sheet_stream_id(&mut doc, key);
        }

        let mut assets = PendingAssets::new();
        let mut ctx = InlineContext::new(&mut assets, config.inline_cross_origin);
        let vdocument = serialize_document(&mut doc, &mut ctx);
        let fetches = ctx.fetches;

        let detector = DomChangeDetector::new(&mut doc, config.mode);

        let mut recorder = Self {
            doc,
            sink,
            clock,
            net,
            config,
            assets,
            asset_kinds: FxHashMap::default(),
            detector,
            tracker,
            tx,
            rx,
            stopped: false,
            last_timestamp_ms: 0,
        };

        let now = recorder.clock.now_epoch_ms();
        recorder.emit(Frame::Timestamp { epoch_ms: now });
        recorder.last_timestamp_ms = now;
        recorder.emit(Frame::Keyframe {
            document: vdocument,
            asset_count: fetches.len() as u32,
        });

        // The keyframe announced every element and adopted sheet
        let mut elements = Vec::new();
        collect_elements(&recorder.doc, 0, &mut elements);
        for element in elements {
            let frames = recorder.tracker.mark_emitted(&recorder.doc, element);
            recorder.emit_sheet_frames(frames);
        }
        for key in adopted.iter().copied() {
            let frames = recorder.tracker.mark_sheet_announced(&mut recorder.doc, key);
            recorder.emit_sheet_frames(frames);
        }
        recorder.tracker.set_initial_adopted(adopted);

        recorder.issue_fetches(fetches);
        recorder
    }

    /// The mutation surface of the live document. Changes land in the stream
    /// on the next `poll`.
    pub fn mutate(&mut self) -> DocumentMutator<'_> {
        DocumentMutator::new(&mut self.doc)
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Escape hatch for style-object-model calls and other direct document
    /// access.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn record_viewport(&mut self, width: u32, height: u32) {
        self.doc.viewport.width = width;
        self.doc.viewport.height = height;
        self.emit(Frame::ViewportResized { width, height });
    }

    pub fn record_scroll(&mut self, x: u32, y: u32) {
        self.doc.viewport.scroll_x = x;
        self.doc.viewport.scroll_y = y;
        self.emit(Frame::ScrollOffsetChanged { x, y });
    }

    /// Cooperative tick: drain completed fetches, route stylesheet events,
    /// and run a diff pass if one is due.
    pub fn poll(&mut self) {
        if self.stopped {
            return;
        }
        self.drain_asset_events();
        self.process_sheet_changes();

        let (records, dropped) = self.doc.journal.take_records();
        for node in dropped {
            self.tracker.mark_removed(node);
        }
        self.detector.on_mutations(&records);

        let now = self.clock.now_epoch_ms();
        let pass = {
            let mut ctx = InlineContext::new(&mut self.assets, self.config.inline_cross_origin);
            self.detector
                .poll(&mut self.doc, &mut ctx, now)
                .map(|pass| (pass, std::mem::take(&mut ctx.fetches)))
        };
        if let Some((pass, fetches)) = pass {
            self.emit_pass(pass, now);
            self.issue_fetches(fetches);
        }
    }

    /// Stop recording: flush pending emissions and disconnect observation.
    /// Fetches still in flight are abandoned; their assets are emitted only
    /// if they completed before the final drain.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.drain_asset_events();
        self.process_sheet_changes();

        let (records, dropped) = self.doc.journal.take_records();
        for node in dropped {
            self.tracker.mark_removed(node);
        }
        self.detector.on_mutations(&records);

        let now = self.clock.now_epoch_ms();
        let pass = {
            let mut ctx = InlineContext::new(&mut self.assets, self.config.inline_cross_origin);
            self.detector
                .flush(&mut self.doc, &mut ctx)
                .map(|pass| (pass, std::mem::take(&mut ctx.fetches)))
        };
        if let Some((pass, fetches)) = pass {
            self.emit_pass(pass, now);
            self.issue_fetches(fetches);
        }
        self.drain_asset_events();

        self.doc.journal.set_enabled(false);
        self.stopped = true;
    }

    /// Tear down, returning the sink (useful for buffered-sink tests).
    pub fn into_sink(mut self) -> S {
        self.stop();
        self.sink
    }

    /// Tear down, returning the final live document and the sink.
    pub fn finish(mut self) -> (Document, S) {
        self.stop();
        (self.doc, self.sink)
    }

    fn emit(&mut self, frame: Frame) {
        self.sink.emit(frame);
    }

    fn emit_sheet_frames(&mut self, frames: Vec<SheetFrame>) {
        for frame in frames {
            self.emit(Frame::StyleSheetChanged {
                sheet_id: frame.sheet_id,
                adopted: frame.adopted,
                op: frame.op,
            });
        }
    }

    fn process_sheet_changes(&mut self) {
        let changes = self.doc.journal.take_sheet_changes();
        if changes.is_empty() {
            return;
        }
        let frames = self.tracker.process_changes(&mut self.doc, changes);
        self.emit_sheet_frames(frames);
    }

    fn emit_pass(&mut self, pass: crate::detector::DetectorPass, now: u64) {
        if pass.items.is_empty() {
            return;
        }
        if now > self.last_timestamp_ms {
            self.emit(Frame::Timestamp { epoch_ms: now });
            self.last_timestamp_ms = now;
        }
        for item in pass.items {
            let frame = op_to_frame(item.op, item.asset_count);
            self.emit(frame);
            // Announcements unlock queued stylesheet events for the freshly
            // inserted owners
            for owner in item.announced {
                let frames = self.tracker.mark_emitted(&self.doc, owner);
                self.emit_sheet_frames(frames);
            }
        }
    }

    fn issue_fetches(&mut self, fetches: Vec<AssetFetch>) {
        for fetch in fetches {
            self.asset_kinds.insert(fetch.id, fetch.kind);
            if fetch.policy_blocked {
                self.emit(Frame::Asset(Asset {
                    id: fetch.id,
                    url: fetch.url.to_string(),
                    mime: None,
                    bytes: Bytes::new(),
                }));
                continue;
            }
            self.net.fetch(
                self.doc.id(),
                Request::get(fetch.url.clone()),
                Box::new(AssetFetchHandler {
                    id: fetch.id,
                    url: fetch.url.to_string(),
                    tx: self.tx.clone(),
                }),
            );
        }
    }

    fn drain_asset_events(&mut self) {
        let mut chained: Vec<AssetFetch> = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            match event {
                RecorderEvent::AssetLoaded {
                    id,
                    url,
                    mime,
                    bytes,
                } => {
                    let kind = self
                        .asset_kinds
                        .get(&id)
                        .copied()
                        .unwrap_or(AssetKind::Media);
                    if kind == AssetKind::Stylesheet {
                        let (rewritten, mut fetches) = self.inline_nested_css(&url, &bytes);
                        chained.append(&mut fetches);
                        self.emit(Frame::Asset(Asset {
                            id,
                            url,
                            mime: mime.or_else(|| Some("text/css".to_string())),
                            bytes: Bytes::from(rewritten.into_bytes()),
                        }));
                    } else {
                        self.emit(Frame::Asset(Asset {
                            id,
                            url,
                            mime,
                            bytes,
                        }));
                    }
                }
                RecorderEvent::AssetFailed { id, url } => {
                    self.emit(Frame::Asset(Asset {
                        id,
                        url,
                        mime: None,
                        bytes: Bytes::new(),
                    }));
                }
            }
        }
        self.issue_fetches(chained);
    }

    /// Stylesheet assets get their own nested `url(...)` references rewritten
    /// to placeholders — resolved against the sheet's URL, not the document
    /// base — and those nested assets captured in turn.
    fn inline_nested_css(&mut self, sheet_url: &str, bytes: &[u8]) -> (String, Vec<AssetFetch>) {
        let text = String::from_utf8_lossy(bytes);
        let base = Url::parse(sheet_url).ok();
        let mut fetches = Vec::new();

        let assets = &mut self.assets;
        let doc = &self.doc;
        let inline_cross_origin = self.config.inline_cross_origin;
        let rewritten = rewrite_css_urls(&text, |raw| {
            if is_self_contained_url(raw) {
                return None;
            }
            let url = base.as_ref()?.join(raw).ok()?;
            let (asset_id, fresh) = assets.intern(&url);
            if fresh {
                let policy_blocked =
                    !inline_cross_origin && url.origin() != doc.base_url().origin();
                fetches.push(AssetFetch {
                    id: asset_id,
                    url,
                    kind: kind_for_url(raw),
                    policy_blocked,
                });
            }
            Some(format_asset_token(asset_id))
        });

        (rewritten, fetches)
    }
}

fn op_to_frame(op: DomOp, asset_count: u32) -> Frame {
    match op {
        DomOp::Insert {
            parent_id,
            index,
            node,
        } => Frame::DomNodeAdded {
            parent_id,
            index,
            node,
            asset_count,
        },
        DomOp::Remove { node_id } => Frame::DomNodeRemoved { node_id },
        DomOp::UpdateAttribute {
            node_id,
            name,
            value,
        } => Frame::DomAttributeChanged {
            node_id,
            name,
            value,
        },
        DomOp::RemoveAttribute { node_id, name } => Frame::DomAttributeRemoved { node_id, name },
        DomOp::UpdateText { node_id, edits } => Frame::DomTextChanged { node_id, edits },
    }
}
