//! The stylesheet tracker.
//!
//! Consumes the document's sheet-mutation journal (the stand-in for CSSOM
//! prototype interception) and turns it into ordered stylesheet events. The
//! emit queue enforces the one ordering rule that matters: no event for a
//! sheet may be delivered before the stream has announced the sheet's
//! identity — the owning node for owner-backed sheets, the constructed sheet
//! itself for adopted ones. Events for unannounced identities queue per
//! owner and flush, in insertion order, when the recorder announces them.
//!
//! The tracker never assigns node ids; that is the change detector's job,
//! and assigning them here would create exactly the announcement race the
//! queue exists to prevent.

use rustc_hash::{FxHashMap, FxHashSet};

use domreel_dom::stylesheet::{AdoptedSheetSnapshot, SheetChange, SheetKey};
use domreel_dom::Document;
use domreel_protocol::SheetOp;

/// A ready-to-emit stylesheet event.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetFrame {
    pub sheet_id: u32,
    pub adopted: bool,
    pub op: SheetOp,
}

#[derive(Default)]
pub struct StyleSheetTracker {
    /// Pending events for owner-backed sheets, keyed by the owning node
    owner_queues: FxHashMap<usize, Vec<SheetOp>>,
    /// Pending events for constructed sheets not yet announced
    sheet_queues: FxHashMap<SheetKey, Vec<SheetOp>>,
    announced_owners: FxHashSet<usize>,
    announced_sheets: FxHashSet<SheetKey>,
    /// The adopted list as last announced, for added/removed diffing
    last_adopted: Vec<SheetKey>,
    next_sheet_id: u32,
}

impl StyleSheetTracker {
    pub fn new() -> Self {
        Self {
            next_sheet_id: 1,
            ..Default::default()
        }
    }

    /// Stamp a constructed sheet with its stream id on first sight.
    pub fn ensure_sheet_stream_id(&mut self, doc: &mut Document, key: SheetKey) -> u32 {
        if let Some(id) = doc.sheet(key).and_then(|sheet| sheet.stream_id) {
            return id;
        }
        let id = self.next_sheet_id;
        self.next_sheet_id += 1;
        if let Some(sheet) = doc.sheets.get_mut(key) {
            sheet.stream_id = Some(id);
        }
        id
    }

    /// Drain journaled style-object mutations into emittable events, queueing
    /// those whose sheet identity has not been announced yet.
    pub fn process_changes(
        &mut self,
        doc: &mut Document,
        changes: Vec<SheetChange>,
    ) -> Vec<SheetFrame> {
        let mut out = Vec::new();
        for change in changes {
            match change {
                SheetChange::RulesInsert { sheet, index, rule } => {
                    self.route(doc, sheet, SheetOp::RulesInsert { index, rule }, &mut out)
                }
                SheetChange::RulesDelete { sheet, index } => {
                    self.route(doc, sheet, SheetOp::RulesDelete { index }, &mut out)
                }
                SheetChange::Replace { sheet, text } => {
                    self.route(doc, sheet, SheetOp::Replace { text }, &mut out)
                }
                SheetChange::AdoptedListChanged { sheets } => {
                    self.adopted_list_changed(doc, sheets, &mut out)
                }
            }
        }
        out
    }

    fn route(&mut self, doc: &Document, key: SheetKey, op: SheetOp, out: &mut Vec<SheetFrame>) {
        let Some(sheet) = doc.sheet(key) else {
            tracing::warn!("style mutation against unknown sheet {key}");
            return;
        };
        match sheet.owner {
            Some(owner) => {
                if self.announced_owners.contains(&owner) {
                    match doc.get_node(owner).and_then(|node| node.stream_id) {
                        Some(sheet_id) => out.push(SheetFrame {
                            sheet_id,
                            adopted: false,
                            op,
                        }),
                        None => tracing::warn!("announced sheet owner {owner} has no stream id"),
                    }
                } else {
                    self.owner_queues.entry(owner).or_default().push(op);
                }
            }
            None => {
                if self.announced_sheets.contains(&key) {
                    let sheet_id = sheet.stream_id.unwrap_or_default();
                    out.push(SheetFrame {
                        sheet_id,
                        adopted: true,
                        op,
                    });
                } else {
                    self.sheet_queues.entry(key).or_default().push(op);
                }
            }
        }
    }

    fn adopted_list_changed(
        &mut self,
        doc: &mut Document,
        sheets: Vec<AdoptedSheetSnapshot>,
        out: &mut Vec<SheetFrame>,
    ) {
        // Sheets leaving every adopted list are retired
        let departed: Vec<SheetKey> = self
            .last_adopted
            .iter()
            .copied()
            .filter(|key| !sheets.iter().any(|snapshot| snapshot.key == *key))
            .collect();
        for key in departed {
            if self.announced_sheets.remove(&key) {
                let sheet_id = doc
                    .sheet(key)
                    .and_then(|sheet| sheet.stream_id)
                    .unwrap_or_default();
                out.push(SheetFrame {
                    sheet_id,
                    adopted: true,
                    op: SheetOp::SheetRemoved,
                });
            }
        }

        // Unseen sheets are announced — with the text they had when the list
        // changed, so later queued rule events apply on top exactly once —
        // before the list that references them.
        let mut sheet_ids = Vec::with_capacity(sheets.len());
        for snapshot in &sheets {
            let sheet_id = self.ensure_sheet_stream_id(doc, snapshot.key);
            sheet_ids.push(sheet_id);
            if !self.announced_sheets.contains(&snapshot.key) {
                out.push(SheetFrame {
                    sheet_id,
                    adopted: true,
                    op: SheetOp::SheetAdded {
                        text: snapshot.text.clone(),
                    },
                });
                self.announced_sheets.insert(snapshot.key);
                for op in self.sheet_queues.remove(&snapshot.key).unwrap_or_default() {
                    out.push(SheetFrame {
                        sheet_id,
                        adopted: true,
                        op,
                    });
                }
            }
        }

        let document_id = doc.root_node().stream_id.unwrap_or_default();
        out.push(SheetFrame {
            sheet_id: document_id,
            adopted: true,
            op: SheetOp::AdoptedListChanged { sheet_ids },
        });
        self.last_adopted = sheets.into_iter().map(|snapshot| snapshot.key).collect();
    }

    /// The stream has announced this node (keyframe or insert op): flush any
    /// events queued for sheets it owns, in insertion order.
    pub fn mark_emitted(&mut self, doc: &Document, owner: usize) -> Vec<SheetFrame> {
        self.announced_owners.insert(owner);
        let Some(queue) = self.owner_queues.remove(&owner) else {
            return Vec::new();
        };
        let Some(sheet_id) = doc.get_node(owner).and_then(|node| node.stream_id) else {
            tracing::warn!("flushing sheet queue for owner {owner} without a stream id");
            return Vec::new();
        };
        queue
            .into_iter()
            .map(|op| SheetFrame {
                sheet_id,
                adopted: false,
                op,
            })
            .collect()
    }

    /// A constructed sheet announced directly by a keyframe's adopted list.
    pub fn mark_sheet_announced(
        &mut self,
        doc: &mut Document,
        key: SheetKey,
    ) -> Vec<SheetFrame> {
        let sheet_id = self.ensure_sheet_stream_id(doc, key);
        self.announced_sheets.insert(key);
        self.sheet_queues
            .remove(&key)
            .unwrap_or_default()
            .into_iter()
            .map(|op| SheetFrame {
                sheet_id,
                adopted: true,
                op,
            })
            .collect()
    }

    /// The owner was removed before ever being announced: its queue must not
    /// accumulate for a dead node.
    pub fn mark_removed(&mut self, owner: usize) {
        self.owner_queues.remove(&owner);
        self.announced_owners.remove(&owner);
    }

    /// Record the adopted list carried by the keyframe, so the next
    /// adopted-list change diffs against it.
    pub fn set_initial_adopted(&mut self, keys: Vec<SheetKey>) {
        self.last_adopted = keys;
    }
}
