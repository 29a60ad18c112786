//! Domreel-replay
//!
//! The playback side of Domreel: consumes a recorded frame stream and
//! reconstructs the document it describes — tree, stylesheet state and
//! assets — without network access to the original origin.

pub mod apply;
pub mod asset_manager;
pub mod object_url;
pub mod player;
pub mod sheet_mutator;

pub use apply::{apply_batch, apply_op, ApplyError};
pub use asset_manager::AssetManager;
pub use object_url::ObjectUrlStore;
pub use player::{Player, PlayerConfig};
pub use sheet_mutator::StyleSheetMutator;
