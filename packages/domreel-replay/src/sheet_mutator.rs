//! Application of stylesheet operations to the target document.
//!
//! A sheet op can arrive a beat before its sheet exists: the owner element
//! was announced but its content not yet processed, or (for a `<link>`
//! owner) the sheet never materializes at all in a passive viewer. Ops whose
//! sheet cannot be found are parked and retried on subsequent frames and
//! polls, bounded by a retry budget and a wall-clock budget; exhaustion
//! produces a diagnostic rather than a halt.

use domreel_dom::stylesheet::SheetKey;
use domreel_dom::Document;
use domreel_protocol::SheetOp;

use crate::asset_manager::AssetManager;

/// Default retry budget: 50 retries at one per tick, with an absolute
/// wall-clock cap of five seconds.
pub const DEFAULT_RETRY_LIMIT: u32 = 50;
pub const DEFAULT_BUDGET_MS: u64 = 5_000;

struct PendingSheetOp {
    sheet_id: u32,
    adopted: bool,
    op: SheetOp,
    retries: u32,
    first_seen_ms: u64,
}

pub struct StyleSheetMutator {
    pending: Vec<PendingSheetOp>,
    retry_limit: u32,
    budget_ms: u64,
}

impl Default for StyleSheetMutator {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_LIMIT, DEFAULT_BUDGET_MS)
    }
}

impl StyleSheetMutator {
    pub fn new(retry_limit: u32, budget_ms: u64) -> Self {
        Self {
            pending: Vec::new(),
            retry_limit,
            budget_ms,
        }
    }

    /// Apply one stylesheet operation, parking it if its sheet has not
    /// materialized yet.
    pub fn apply(
        &mut self,
        doc: &mut Document,
        assets: &mut AssetManager,
        sheet_id: u32,
        adopted: bool,
        op: SheetOp,
        now_ms: u64,
    ) {
        if let Some(op) = try_apply(doc, assets, sheet_id, adopted, op) {
            self.pending.push(PendingSheetOp {
                sheet_id,
                adopted,
                op,
                retries: 0,
                first_seen_ms: now_ms,
            });
        }
    }

    /// Retry parked operations. Called on every frame and poll tick.
    pub fn poll(&mut self, doc: &mut Document, assets: &mut AssetManager, now_ms: u64) {
        let mut still_pending = Vec::new();
        for mut pending in self.pending.drain(..) {
            match try_apply(doc, assets, pending.sheet_id, pending.adopted, pending.op) {
                None => {}
                Some(op) => {
                    pending.op = op;
                    pending.retries += 1;
                    let out_of_budget = pending.retries > self.retry_limit
                        || now_ms.saturating_sub(pending.first_seen_ms) > self.budget_ms;
                    if out_of_budget {
                        report_sheet_not_found(doc, &pending);
                    } else {
                        still_pending.push(pending);
                    }
                }
            }
        }
        self.pending = still_pending;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Returns the op back if the sheet could not be found yet.
fn try_apply(
    doc: &mut Document,
    assets: &mut AssetManager,
    sheet_id: u32,
    adopted: bool,
    op: SheetOp,
) -> Option<SheetOp> {
    // Sheet-lifecycle and list ops address the registry, not one sheet
    match &op {
        SheetOp::SheetAdded { text } => {
            let key = doc.create_constructed_sheet(None);
            doc.sheets[key].stream_id = Some(sheet_id);
            let rewritten = assets.rewrite_sheet_text(key, text);
            doc.sheets[key].replace_text(&rewritten);
            return None;
        }
        SheetOp::SheetRemoved => {
            if let Some(key) = find_adopted_sheet(doc, sheet_id) {
                assets.sheet_removed(key);
                doc.adopted_sheets.retain(|&k| k != key);
                doc.sheets.try_remove(key);
            }
            return None;
        }
        SheetOp::AdoptedListChanged { sheet_ids } => {
            let keys: Vec<SheetKey> = sheet_ids
                .iter()
                .filter_map(|&id| find_adopted_sheet(doc, id))
                .collect();
            if keys.len() != sheet_ids.len() {
                tracing::warn!("adopted list references unannounced sheets: {sheet_ids:?}");
            }
            doc.adopted_sheets = keys;
            return None;
        }
        _ => {}
    }

    let Some(key) = resolve_sheet(doc, sheet_id, adopted) else {
        return Some(op);
    };

    match op {
        SheetOp::RulesInsert { index, rule } => {
            let rewritten = assets.rewrite_sheet_text(key, &rule);
            let sheet = &mut doc.sheets[key];
            let len = sheet.rules.len();
            if index as usize > len {
                tracing::warn!("rule index {index} out of bounds for {len} rules");
            } else {
                sheet.rules.insert(index as usize, rewritten);
            }
        }
        SheetOp::RulesDelete { index } => {
            let sheet = &mut doc.sheets[key];
            let len = sheet.rules.len();
            if index as usize >= len {
                tracing::warn!("rule index {index} out of bounds for {len} rules");
            } else {
                sheet.rules.remove(index as usize);
            }
        }
        SheetOp::Replace { text } => {
            let rewritten = assets.rewrite_sheet_text(key, &text);
            doc.sheets[key].replace_text(&rewritten);
        }
        SheetOp::SheetAdded { .. } | SheetOp::SheetRemoved | SheetOp::AdoptedListChanged { .. } => {
            unreachable!("handled above")
        }
    }
    None
}

fn resolve_sheet(doc: &Document, sheet_id: u32, adopted: bool) -> Option<SheetKey> {
    if adopted {
        find_adopted_sheet(doc, sheet_id)
    } else {
        let owner = doc.node_by_stream_id(sheet_id)?;
        doc.sheet_for_owner(owner)
    }
}

fn find_adopted_sheet(doc: &Document, sheet_id: u32) -> Option<SheetKey> {
    doc.sheets
        .iter()
        .find(|(_, sheet)| sheet.is_constructed() && sheet.stream_id == Some(sheet_id))
        .map(|(key, _)| key)
}

/// Bounded backoff exhausted: report everything a human needs to see why.
fn report_sheet_not_found(doc: &Document, pending: &PendingSheetOp) {
    let owner = doc.node_by_stream_id(pending.sheet_id);
    let owner_ids: Vec<u32> = doc
        .sheets
        .iter()
        .filter_map(|(_, sheet)| sheet.owner)
        .filter_map(|node| doc.get_node(node).and_then(|n| n.stream_id))
        .collect();
    let owned = doc.sheets.iter().filter(|(_, s)| !s.is_constructed()).count();
    let adopted = doc.sheets.iter().filter(|(_, s)| s.is_constructed()).count();
    tracing::error!(
        "stylesheet {} (adopted: {}) not found after {} retries: owner node {}, \
         sheet owner ids {:?}, {} owned / {} adopted sheets",
        pending.sheet_id,
        pending.adopted,
        pending.retries,
        if owner.is_some() { "exists" } else { "missing" },
        owner_ids,
        owned,
        adopted,
    );
}
