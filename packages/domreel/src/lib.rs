//! Domreel
//!
//! Records a live document — tree structure, stylesheet state, referenced
//! assets — into a self-contained binary stream, and replays that stream in
//! a passive viewer without network access to the original origin.
//!
//! The crates underneath split along the recording boundary:
//!  - [`domreel_dom`]: the retained document both sides operate on
//!  - [`domreel_record`]: change detection, inlining, stylesheet tracking
//!  - [`domreel_replay`]: frame application, asset resolution
//!  - [`domreel_protocol`]: wire model and the binary frame codec
//!  - [`domreel_net`]: a tokio/reqwest fetch provider (feature `net`)

pub use domreel_dom::{Document, DocumentConfig, DocumentMutator, NodeIdMap};
pub use domreel_html::DocumentHtmlParser;
pub use domreel_protocol::{
    decode_frame, encode_frame, Asset, DecodeError, DomOp, Frame, FrameDecoder, SheetOp, TextEdit,
    VDocument, VElement, VNode,
};
pub use domreel_record::{DetectorMode, Recorder, RecorderConfig};
pub use domreel_replay::{Player, PlayerConfig};
pub use domreel_traits::clock::{Clock, SharedClock, SystemClock};
pub use domreel_traits::net::{DummyNetProvider, NetProvider, SharedProvider};
pub use domreel_traits::sink::{FrameSink, VecSink};

#[cfg(feature = "net")]
pub use domreel_net::Provider as NetFetchProvider;
