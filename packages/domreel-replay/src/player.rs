//! The playback orchestrator.
//!
//! Consumes frames (parsed, or raw stream chunks) in production order and
//! dispatches them to the mutator, stylesheet mutator and asset manager.
//! Asset frames may arrive before, interleaved with, or after the keyframe
//! or insert they belong to; binding requests against unresolved assets
//! simply create pending entries.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use domreel_dom::stylesheet::SheetKey;
use domreel_dom::{Document, DocumentConfig};
use domreel_protocol::{
    DecodeError, DomOp, Frame, FrameDecoder, NodeId, VAdoptedSheet, VDocument,
};
use domreel_traits::clock::{SharedClock, SystemClock};

use crate::apply::{apply_op, materialize};
use crate::asset_manager::AssetManager;
use crate::sheet_mutator::{StyleSheetMutator, DEFAULT_BUDGET_MS, DEFAULT_RETRY_LIMIT};

pub struct PlayerConfig {
    /// Bounded backoff for sheet ops whose sheet has not materialized
    pub sheet_retry_limit: u32,
    pub sheet_budget_ms: u64,
    pub clock: Option<SharedClock>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sheet_retry_limit: DEFAULT_RETRY_LIMIT,
            sheet_budget_ms: DEFAULT_BUDGET_MS,
            clock: None,
        }
    }
}

pub struct Player {
    doc: Document,
    assets: AssetManager,
    sheets: StyleSheetMutator,
    decoder: FrameDecoder,
    clock: SharedClock,

    ready: bool,
    last_timestamp_ms: Option<u64>,
    /// Asset frames promised by the keyframe and inserts seen so far
    expected_assets: u64,
    received_assets: u64,
    /// Most recent recorded size per resized node
    node_sizes: FxHashMap<NodeId, (u32, u32)>,
}

impl Default for Player {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}

impl Player {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            doc: Document::new(DocumentConfig::default()),
            assets: AssetManager::new(),
            sheets: StyleSheetMutator::new(config.sheet_retry_limit, config.sheet_budget_ms),
            decoder: FrameDecoder::new(),
            clock: config
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock) as SharedClock),
            ready: false,
            last_timestamp_ms: None,
            expected_assets: 0,
            received_assets: 0,
            node_sizes: FxHashMap::default(),
        }
    }

    /// The internal document is prepared eagerly; this reports readiness for
    /// hosts that gate rendering on it.
    pub fn ready(&self) -> bool {
        true
    }

    /// Whether a keyframe has been applied yet.
    pub fn has_keyframe(&self) -> bool {
        self.ready
    }

    /// Whether every asset frame promised so far has arrived.
    pub fn assets_settled(&self) -> bool {
        self.received_assets >= self.expected_assets
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn asset_manager(&self) -> &AssetManager {
        &self.assets
    }

    pub fn last_timestamp_ms(&self) -> Option<u64> {
        self.last_timestamp_ms
    }

    pub fn node_size(&self, node_id: NodeId) -> Option<(u32, u32)> {
        self.node_sizes.get(&node_id).copied()
    }

    /// Feed raw stream bytes; complete frames are applied in order. A
    /// [`DecodeError`] other than underflow poisons the stream and is
    /// returned to the transport to resync or close.
    pub fn handle_chunk(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        self.decoder.push(bytes);
        while let Some(frame) = self.decoder.next_frame()? {
            self.handle_frame(frame);
        }
        Ok(())
    }

    /// Apply one parsed frame.
    pub fn handle_frame(&mut self, frame: Frame) {
        let now = self.clock.now_epoch_ms();
        match frame {
            Frame::Timestamp { epoch_ms } => {
                self.last_timestamp_ms = Some(epoch_ms);
            }
            Frame::Keyframe {
                document,
                asset_count,
            } => {
                self.expected_assets += asset_count as u64;
                self.apply_keyframe(document);
                self.ready = true;
            }
            Frame::Asset(asset) => {
                self.received_assets += 1;
                self.assets.on_asset(&mut self.doc, asset);
            }
            Frame::ViewportResized { width, height } => {
                self.doc.viewport.width = width;
                self.doc.viewport.height = height;
            }
            Frame::ScrollOffsetChanged { x, y } => {
                self.doc.viewport.scroll_x = x;
                self.doc.viewport.scroll_y = y;
            }
            Frame::DomNodeAdded {
                parent_id,
                index,
                node,
                asset_count,
            } => {
                self.expected_assets += asset_count as u64;
                self.apply_dom_op(DomOp::Insert {
                    parent_id,
                    index,
                    node,
                });
            }
            Frame::DomNodeRemoved { node_id } => {
                self.apply_dom_op(DomOp::Remove { node_id });
            }
            Frame::DomAttributeChanged {
                node_id,
                name,
                value,
            } => {
                self.apply_dom_op(DomOp::UpdateAttribute {
                    node_id,
                    name,
                    value,
                });
            }
            Frame::DomAttributeRemoved { node_id, name } => {
                self.apply_dom_op(DomOp::RemoveAttribute { node_id, name });
            }
            Frame::DomTextChanged { node_id, edits } => {
                self.apply_dom_op(DomOp::UpdateText { node_id, edits });
            }
            Frame::DomNodeResized {
                node_id,
                width,
                height,
            } => {
                self.node_sizes.insert(node_id, (width, height));
            }
            Frame::StyleSheetChanged {
                sheet_id,
                adopted,
                op,
            } => {
                self.sheets
                    .apply(&mut self.doc, &mut self.assets, sheet_id, adopted, op, now);
            }
            Frame::Unsupported { tag } => {
                tracing::debug!("ignoring unsupported frame tag {tag}");
            }
        }
        self.sheets.poll(&mut self.doc, &mut self.assets, now);
    }

    /// Idle tick: retries parked stylesheet operations.
    pub fn poll(&mut self) {
        let now = self.clock.now_epoch_ms();
        self.sheets.poll(&mut self.doc, &mut self.assets, now);
    }

    /// Tear down the reconstructed document, releasing every binding and
    /// revoking every synthetic URL.
    pub fn teardown(&mut self) {
        let children = self.doc.root_node().children.clone();
        for child in children {
            let Some(node_id) = self.doc.nodes[child].stream_id else {
                continue;
            };
            let _ = self.apply_dom_op_inner(DomOp::Remove { node_id });
        }
        self.assets.teardown();
        self.ready = false;
    }

    fn apply_dom_op(&mut self, op: DomOp) {
        if let Err(err) = self.apply_dom_op_inner(op) {
            tracing::warn!("skipping failed operation: {err}");
        }
    }

    fn apply_dom_op_inner(&mut self, op: DomOp) -> Result<(), crate::apply::ApplyError> {
        apply_op(&mut self.doc, &mut self.assets, op)
    }

    fn apply_keyframe(&mut self, vdocument: VDocument) {
        if self.ready {
            // A second keyframe restarts the document wholesale
            self.teardown();
            self.doc = Document::new(DocumentConfig::default());
        }

        self.doc.nodes[0].stream_id = Some(vdocument.id);
        self.doc.adopt_stream_ids(0);

        for child in &vdocument.children {
            let node = materialize(&mut self.doc, &mut self.assets, child);
            self.doc.append(0, &[node]);
            self.doc.adopt_stream_ids(node);
        }
        // Sheets for keyframe-carried <style> elements
        let children = self.doc.root_node().children.clone();
        for child in children {
            crate::apply::process_new_styles(&mut self.doc, &mut self.assets, child);
        }

        for VAdoptedSheet { id, media, text } in vdocument.adopted_sheets {
            let key: SheetKey = self.doc.create_constructed_sheet(media);
            self.doc.sheets[key].stream_id = Some(id);
            let rewritten = self.assets.rewrite_sheet_text(key, &text);
            self.doc.sheets[key].replace_text(&rewritten);
            self.doc.adopted_sheets.push(key);
        }
    }
}
