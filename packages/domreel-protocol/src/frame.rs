//! Frame types carried by the recording stream.

use bytes::Bytes;

use crate::op::TextEdit;
use crate::vdom::{VDocument, VNode};
use crate::{AssetId, NodeId};

pub mod tag {
    pub const TIMESTAMP: u32 = 0;
    pub const KEYFRAME: u32 = 1;
    pub const ASSET: u32 = 2;
    pub const VIEWPORT_RESIZED: u32 = 3;
    pub const SCROLL_OFFSET_CHANGED: u32 = 4;
    // 5..=9 belong to the user-input tracker and are opaque to this crate
    pub const DOM_NODE_ADDED: u32 = 10;
    pub const DOM_NODE_REMOVED: u32 = 11;
    pub const DOM_ATTRIBUTE_CHANGED: u32 = 12;
    pub const DOM_ATTRIBUTE_REMOVED: u32 = 13;
    pub const DOM_TEXT_CHANGED: u32 = 14;
    pub const DOM_NODE_RESIZED: u32 = 15;
    pub const STYLE_SHEET_CHANGED: u32 = 16;
}

/// A captured external resource.
///
/// `bytes` is empty when the fetch failed or was refused (cross-origin
/// inlining disabled); the player then falls back to loading `url` itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub id: AssetId,
    pub url: String,
    pub mime: Option<String>,
    pub bytes: Bytes,
}

impl Asset {
    pub fn is_fallback(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A stylesheet operation, carried by a `StyleSheetChanged` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetOp {
    RulesInsert { index: u32, rule: String },
    RulesDelete { index: u32 },
    Replace { text: String },
    /// The adopted-sheets list of the document (or shadow root) identified by
    /// the frame's `sheet_id` changed to exactly these sheet ids, in order.
    AdoptedListChanged { sheet_ids: Vec<u32> },
    SheetAdded { text: String },
    SheetRemoved,
}

/// A single record in the recording stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Timestamp {
        epoch_ms: u64,
    },
    Keyframe {
        document: VDocument,
        /// Number of Asset frames belonging to this keyframe. They may arrive
        /// before, interleaved with, or after the keyframe itself.
        asset_count: u32,
    },
    Asset(Asset),
    ViewportResized {
        width: u32,
        height: u32,
    },
    ScrollOffsetChanged {
        x: u32,
        y: u32,
    },
    DomNodeAdded {
        parent_id: NodeId,
        index: u32,
        node: VNode,
        /// Number of Asset frames introduced by this insertion.
        asset_count: u32,
    },
    DomNodeRemoved {
        node_id: NodeId,
    },
    DomAttributeChanged {
        node_id: NodeId,
        name: String,
        value: String,
    },
    DomAttributeRemoved {
        node_id: NodeId,
        name: String,
    },
    DomTextChanged {
        node_id: NodeId,
        edits: Vec<TextEdit>,
    },
    DomNodeResized {
        node_id: NodeId,
        width: u32,
        height: u32,
    },
    StyleSheetChanged {
        sheet_id: u32,
        adopted: bool,
        op: SheetOp,
    },
    /// A frame this crate does not interpret (input/focus/selection tags
    /// produced by external trackers). The payload is skipped losslessly.
    Unsupported {
        tag: u32,
    },
}

impl Frame {
    pub fn tag(&self) -> u32 {
        match self {
            Frame::Timestamp { .. } => tag::TIMESTAMP,
            Frame::Keyframe { .. } => tag::KEYFRAME,
            Frame::Asset(_) => tag::ASSET,
            Frame::ViewportResized { .. } => tag::VIEWPORT_RESIZED,
            Frame::ScrollOffsetChanged { .. } => tag::SCROLL_OFFSET_CHANGED,
            Frame::DomNodeAdded { .. } => tag::DOM_NODE_ADDED,
            Frame::DomNodeRemoved { .. } => tag::DOM_NODE_REMOVED,
            Frame::DomAttributeChanged { .. } => tag::DOM_ATTRIBUTE_CHANGED,
            Frame::DomAttributeRemoved { .. } => tag::DOM_ATTRIBUTE_REMOVED,
            Frame::DomTextChanged { .. } => tag::DOM_TEXT_CHANGED,
            Frame::DomNodeResized { .. } => tag::DOM_NODE_RESIZED,
            Frame::StyleSheetChanged { .. } => tag::STYLE_SHEET_CHANGED,
            Frame::Unsupported { tag } => *tag,
        }
    }
}
