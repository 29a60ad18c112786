//! Stylesheet objects and the style-object-model surface of a document.
//!
//! Two kinds of sheet live in the registry: owner-backed sheets derived from
//! a `<style>` (or `<link>`) element's content, and constructed sheets that a
//! host attaches through the document's adopted-sheets list. Rule-level
//! mutations go through [`Document`](crate::Document) methods so the journal
//! sees every call the way a platform tracker would see CSSOM invocations.

use domreel_protocol::css::split_rules;

pub type SheetKey = usize;

#[derive(Debug, Clone)]
pub struct StyleSheet {
    /// Top-level rule texts, in order
    pub rules: Vec<String>,
    pub media: Option<String>,
    /// The owning node, for sheets backed by an element
    pub owner: Option<usize>,
    /// The recording id stamped on this sheet the first time the stylesheet
    /// tracker sees it (constructed sheets only; owner-backed sheets are
    /// identified by their owner's node id)
    pub stream_id: Option<u32>,
}

impl StyleSheet {
    pub fn new_constructed(media: Option<String>) -> Self {
        Self {
            rules: Vec::new(),
            media,
            owner: None,
            stream_id: None,
        }
    }

    pub fn new_owner_backed(owner: usize, text: &str) -> Self {
        Self {
            rules: split_rules(text),
            media: None,
            owner: Some(owner),
            stream_id: None,
        }
    }

    pub fn is_constructed(&self) -> bool {
        self.owner.is_none()
    }

    /// The sheet's full text, derived from its rule list.
    pub fn text(&self) -> String {
        self.rules.join("\n")
    }

    pub fn replace_text(&mut self, text: &str) {
        self.rules = split_rules(text);
    }
}

/// A style-object-model mutation, journaled at call time.
#[derive(Debug, Clone)]
pub enum SheetChange {
    RulesInsert {
        sheet: SheetKey,
        index: u32,
        rule: String,
    },
    RulesDelete {
        sheet: SheetKey,
        index: u32,
    },
    Replace {
        sheet: SheetKey,
        text: String,
    },
    /// The document's adopted-sheets list was set to exactly these sheets.
    /// Sheet text is captured at call time: events journaled later must not
    /// leak into the announcement of a sheet.
    AdoptedListChanged { sheets: Vec<AdoptedSheetSnapshot> },
}

#[derive(Debug, Clone)]
pub struct AdoptedSheetSnapshot {
    pub key: SheetKey,
    pub text: String,
    pub media: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SheetError {
    MissingSheet(SheetKey),
    IndexOutOfBounds { index: u32, len: usize },
}

impl std::fmt::Display for SheetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetError::MissingSheet(key) => write!(f, "no stylesheet with key {key}"),
            SheetError::IndexOutOfBounds { index, len } => {
                write!(f, "rule index {index} out of bounds for {len} rules")
            }
        }
    }
}

impl std::error::Error for SheetError {}
