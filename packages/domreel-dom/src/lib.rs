//! Domreel-dom
//!
//! A slab-backed retained DOM shared by the recording and playback sides of
//! Domreel. It carries exactly the state the recording pipeline needs — tree
//! structure, attributes, character data, stylesheet objects and per-node
//! stream identifiers — and none of the styling or layout machinery of a full
//! engine.
//!
//! Hosts mutate a document through [`DocumentMutator`], which keeps the
//! mutation journal that the change detector consumes.

pub mod config;
/// The document itself: node storage, stylesheet registry, journals.
pub mod document;
pub mod id_map;
pub mod mutator;
/// The nodes themselves, and their data.
pub mod node;
pub mod observer;
pub mod stylesheet;
pub mod url;
pub mod util;

pub use config::DocumentConfig;
pub use document::{Document, Viewport};
pub use id_map::NodeIdMap;
pub use markup5ever::{local_name, namespace_url, ns, LocalName, Namespace, Prefix, QualName};
pub use mutator::DocumentMutator;
pub use node::{Attribute, DoctypeData, ElementData, Node, NodeData, TextKind, TextNodeData};
pub use observer::{MutationJournal, MutationRecord};
pub use stylesheet::{SheetChange, SheetKey, StyleSheet};
