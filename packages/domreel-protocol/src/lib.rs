//! Domreel-protocol
//!
//! The wire model for Domreel recordings: virtual DOM nodes, structural
//! operations, stylesheet operations, frames, and the length-prefixed binary
//! codec that carries them. This crate is deliberately free of any DOM or IO
//! dependencies so that both the recording and playback sides (and external
//! tools) can link it cheaply.

pub mod codec;
pub mod css;
pub mod frame;
pub mod op;
pub mod urls;
pub mod vdom;

pub use codec::{decode_frame, encode_frame, DecodeError, FrameDecoder};
pub use frame::{Asset, Frame, SheetOp};
pub use op::{apply_text_edits, DomOp, TextEdit};
pub use vdom::{VAdoptedSheet, VDocument, VElement, VNode};

/// Identifier of a node within a recording. Dense and monotonic; never reused.
pub type NodeId = u32;

/// Identifier of a captured asset within a recording.
pub type AssetId = u32;
