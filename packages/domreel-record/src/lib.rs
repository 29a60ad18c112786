//! Domreel-record
//!
//! The recording side of Domreel: watches a live [`Document`](domreel_dom::Document),
//! emits a keyframe followed by a causally ordered stream of structural and
//! stylesheet operations, and captures the external assets the tree
//! references.

pub mod assets;
pub mod detector;
pub mod inliner;
pub mod recorder;
pub mod sheet_tracker;
pub mod text_diff;

pub use assets::{AssetFetch, AssetKind, PendingAssets, RecorderEvent};
pub use detector::{DetectorMode, DomChangeDetector};
pub use recorder::{Recorder, RecorderConfig};
pub use sheet_tracker::StyleSheetTracker;
pub use text_diff::string_diff;
