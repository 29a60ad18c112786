//! The DOM change detector.
//!
//! Keeps a shadow snapshot — a second document structurally equal to the live
//! tree as of the last emission — and, on each pass, diffs the dirty
//! subtrees against it, emitting operations in causal order: attributes of a
//! node before its children, sibling alignment before recursion into matched
//! children. The snapshot is mutated in the same pass so it equals the live
//! tree again when the batch is delivered.
//!
//! The node embedded in an insert operation and the node installed into the
//! snapshot are always distinct objects: the wire form is a fresh
//! serialization and the snapshot copy is a fresh import with mirrored ids.
//! Sharing either with the live tree would let the playback mutator splice
//! the snapshot.

use std::time::Duration;

use rustc_hash::FxHashSet;

use domreel_dom::node::{attr_wire_name, Attribute, NodeData};
use domreel_dom::observer::MutationRecord;
use domreel_dom::{Document, DocumentConfig};
use domreel_protocol::{DomOp, NodeId};

use crate::inliner::{serialize_subtree, InlineContext};
use crate::text_diff::string_diff;

/// How diff passes are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorMode {
    /// Run a pass on the first poll after mutations arrive. At most one tick
    /// is pending at a time.
    Immediate,
    /// Run a pass at most once per interval.
    Batched { interval: Duration },
}

impl Default for DetectorMode {
    fn default() -> Self {
        DetectorMode::Immediate
    }
}

/// One operation of a pass, with the assets and announcements it introduced.
pub struct EmittedOp {
    pub op: DomOp,
    /// Fresh assets referenced by this op's inserted subtree
    pub asset_count: u32,
    /// Live element nodes announced by this op (owners for the stylesheet
    /// tracker's emit queue)
    pub announced: Vec<usize>,
}

/// The ordered output of one processing pass.
pub struct DetectorPass {
    pub items: Vec<EmittedOp>,
}

pub struct DomChangeDetector {
    snapshot: Document,
    mode: DetectorMode,
    dirty: FxHashSet<usize>,
    tick_pending: bool,
    last_pass_ms: Option<u64>,
}

impl DomChangeDetector {
    /// Build the detector for a live document, mirroring its stream ids into
    /// a fresh snapshot. Ids are assigned to any untracked live nodes first.
    pub fn new(live: &mut Document, mode: DetectorMode) -> Self {
        live.assign_stream_ids(0);

        let mut snapshot = Document::new(DocumentConfig::default());
        let children = live.root_node().children.clone();
        for child in children {
            let imported = snapshot.import_subtree(live, child);
            snapshot.append(0, &[imported]);
        }
        snapshot.mirror_stream_ids_from(live, 0, 0);

        Self {
            snapshot,
            mode,
            dirty: FxHashSet::default(),
            tick_pending: false,
            last_pass_ms: None,
        }
    }

    /// The shadow snapshot (primarily for assertions in tests).
    pub fn snapshot(&self) -> &Document {
        &self.snapshot
    }

    /// Observer delivery: mark mutation targets dirty. Actual diffing waits
    /// for the next tick.
    pub fn on_mutations(&mut self, records: &[MutationRecord]) {
        if records.is_empty() {
            return;
        }
        for record in records {
            self.dirty.insert(record.target);
        }
        self.tick_pending = true;
    }

    pub fn has_pending(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn due(&self, now_ms: u64) -> bool {
        if self.dirty.is_empty() {
            return false;
        }
        match self.mode {
            DetectorMode::Immediate => self.tick_pending,
            DetectorMode::Batched { interval } => match self.last_pass_ms {
                Some(last) => now_ms.saturating_sub(last) >= interval.as_millis() as u64,
                None => true,
            },
        }
    }

    /// Run a pass now regardless of schedule, if anything is dirty. Used by
    /// the recorder's stop path to flush pending emissions.
    pub fn flush(
        &mut self,
        live: &mut Document,
        ctx: &mut InlineContext,
    ) -> Option<DetectorPass> {
        if self.dirty.is_empty() {
            return None;
        }
        self.tick_pending = false;
        Some(self.run_pass(live, ctx))
    }

    /// Run a pass if one is due. Returns the causally ordered batch.
    pub fn poll(
        &mut self,
        live: &mut Document,
        ctx: &mut InlineContext,
        now_ms: u64,
    ) -> Option<DetectorPass> {
        if !self.due(now_ms) {
            return None;
        }
        self.tick_pending = false;
        self.last_pass_ms = Some(now_ms);
        Some(self.run_pass(live, ctx))
    }

    fn run_pass(&mut self, live: &mut Document, ctx: &mut InlineContext) -> DetectorPass {
        let dirty = std::mem::take(&mut self.dirty);

        // Keep only targets still inside the tracked root, then drop any that
        // have a dirty ancestor (their diff is covered from above).
        let tracked: FxHashSet<usize> = dirty
            .into_iter()
            .filter(|&target| is_tracked(live, target))
            .collect();
        let mut roots: Vec<usize> = tracked
            .iter()
            .copied()
            .filter(|&target| !has_dirty_ancestor(live, target, &tracked))
            .collect();
        // Deterministic processing order
        roots.sort_by_key(|&target| (live.nodes[target].stream_id, target));

        let mut items = Vec::new();
        for root in roots {
            let Some(stream_id) = live.get_node(root).and_then(|node| node.stream_id) else {
                // Covered by an ancestor insert or removed again already
                continue;
            };
            let Some(snap_node) = self.snapshot.id_map.get_by_id(stream_id) else {
                continue;
            };
            self.diff_subtree(live, ctx, root, snap_node, &mut items);
        }

        DetectorPass { items }
    }

    fn diff_subtree(
        &mut self,
        live: &mut Document,
        ctx: &mut InlineContext,
        live_id: usize,
        snap_id: usize,
        out: &mut Vec<EmittedOp>,
    ) {
        let stream_id = match live.nodes[live_id].stream_id {
            Some(id) => id,
            None => return,
        };

        enum Shape {
            Element,
            Text,
            Container,
            Leaf,
            Mismatch,
        }
        let shape = match (&live.nodes[live_id].data, &self.snapshot.nodes[snap_id].data) {
            (NodeData::Element(a), NodeData::Element(b)) if a.name == b.name => Shape::Element,
            (NodeData::Text(a), NodeData::Text(b)) if a.kind == b.kind => Shape::Text,
            (NodeData::Document, NodeData::Document) => Shape::Container,
            (NodeData::ProcessingInstruction { .. }, NodeData::ProcessingInstruction { .. })
            | (NodeData::Doctype(_), NodeData::Doctype(_)) => Shape::Leaf,
            _ => Shape::Mismatch,
        };

        match shape {
            Shape::Mismatch => {
                // A prior missed mutation; skip this subtree for the batch,
                // the snapshot self-corrects on the next full-subtree dirty.
                tracing::warn!(
                    "node type mismatch for stream id {stream_id}: live {} vs snapshot {}",
                    live.nodes[live_id].kind_name(),
                    self.snapshot.nodes[snap_id].kind_name(),
                );
            }
            Shape::Leaf => {}
            Shape::Text => self.diff_text(live, live_id, snap_id, stream_id, out),
            Shape::Element => {
                self.diff_attributes(live, live_id, snap_id, stream_id, out);
                self.align_children(live, ctx, live_id, snap_id, stream_id, out);
            }
            Shape::Container => {
                self.align_children(live, ctx, live_id, snap_id, stream_id, out);
            }
        }
    }

    fn diff_attributes(
        &mut self,
        live: &Document,
        live_id: usize,
        snap_id: usize,
        stream_id: NodeId,
        out: &mut Vec<EmittedOp>,
    ) {
        let live_attrs: Vec<Attribute> = live.nodes[live_id]
            .element_data()
            .map(|el| el.attrs.clone())
            .unwrap_or_default();
        let snap_attrs: Vec<Attribute> = self.snapshot.nodes[snap_id]
            .element_data()
            .map(|el| el.attrs.clone())
            .unwrap_or_default();

        for snap_attr in &snap_attrs {
            match live_attrs.iter().find(|a| a.name == snap_attr.name) {
                None => out.push(plain_op(DomOp::RemoveAttribute {
                    node_id: stream_id,
                    name: attr_wire_name(&snap_attr.name),
                })),
                Some(live_attr) if live_attr.value != snap_attr.value => {
                    out.push(plain_op(DomOp::UpdateAttribute {
                        node_id: stream_id,
                        name: attr_wire_name(&live_attr.name),
                        value: live_attr.value.clone(),
                    }))
                }
                Some(_) => {}
            }
        }
        for live_attr in &live_attrs {
            if !snap_attrs.iter().any(|a| a.name == live_attr.name) {
                out.push(plain_op(DomOp::UpdateAttribute {
                    node_id: stream_id,
                    name: attr_wire_name(&live_attr.name),
                    value: live_attr.value.clone(),
                }));
            }
        }

        if let Some(element) = self.snapshot.nodes[snap_id].element_data_mut() {
            element.attrs = live_attrs;
        }
    }

    fn diff_text(
        &mut self,
        live: &Document,
        live_id: usize,
        snap_id: usize,
        stream_id: NodeId,
        out: &mut Vec<EmittedOp>,
    ) {
        let live_content = live.nodes[live_id]
            .text_data()
            .map(|data| data.content.clone())
            .unwrap_or_default();
        let snap_content = self.snapshot.nodes[snap_id]
            .text_data()
            .map(|data| data.content.clone())
            .unwrap_or_default();

        if live_content == snap_content {
            return;
        }
        let edits = string_diff(&snap_content, &live_content);
        out.push(plain_op(DomOp::UpdateText {
            node_id: stream_id,
            edits,
        }));
        if let Some(data) = self.snapshot.nodes[snap_id].text_data_mut() {
            data.content = live_content;
        }
    }

    /// Two-pointer alignment of a parent's child lists, by stream id.
    fn align_children(
        &mut self,
        live: &mut Document,
        ctx: &mut InlineContext,
        live_parent: usize,
        snap_parent: usize,
        parent_sid: NodeId,
        out: &mut Vec<EmittedOp>,
    ) {
        let live_children = live.nodes[live_parent].children.clone();
        let live_id_set: FxHashSet<NodeId> = live_children
            .iter()
            .filter_map(|&c| live.nodes[c].stream_id)
            .collect();

        let mut matched: Vec<(usize, usize)> = Vec::new();
        let mut l_idx = 0usize;
        let mut s_idx = 0usize;

        loop {
            let snap_children = self.snapshot.nodes[snap_parent].children.clone();
            let snap_child = snap_children.get(s_idx).copied();
            let live_child = live_children.get(l_idx).copied();

            match (snap_child, live_child) {
                (None, None) => break,
                (Some(sc), None) => {
                    self.retire_snapshot_child(sc, out);
                }
                (None, Some(lc)) => {
                    self.insert_live_child(live, ctx, lc, l_idx, snap_parent, s_idx, parent_sid, out);
                    s_idx += 1;
                    l_idx += 1;
                }
                (Some(sc), Some(lc)) => {
                    let Some(snap_sid) = self.snapshot.nodes[sc].stream_id else {
                        tracing::warn!("snapshot node {sc} without a stream id; dropping");
                        self.snapshot.remove_and_drop_node(sc);
                        continue;
                    };
                    let live_sid = live.nodes[lc].stream_id;

                    if live_sid == Some(snap_sid) {
                        matched.push((lc, sc));
                        s_idx += 1;
                        l_idx += 1;
                        continue;
                    }

                    let snap_sibling_ids: FxHashSet<NodeId> = snap_children
                        .iter()
                        .filter_map(|&c| self.snapshot.nodes[c].stream_id)
                        .collect();
                    let live_child_known_here = live_sid
                        .map(|id| snap_sibling_ids.contains(&id))
                        .unwrap_or(false);

                    if !live_id_set.contains(&snap_sid) {
                        // Removal: the snapshot child is gone from the live
                        // list. Checked before insertion so a remove+re-add
                        // pair leaves the wire in lifecycle order.
                        self.retire_snapshot_child(sc, out);
                        // snapshot list shrank; s_idx stays
                    } else if !live_child_known_here {
                        // Insertion: the live child never belonged to this
                        // sibling list
                        self.insert_live_child(
                            live, ctx, lc, l_idx, snap_parent, s_idx, parent_sid, out,
                        );
                        s_idx += 1;
                        l_idx += 1;
                    } else {
                        // Both exist later: reorder/replace as remove+insert
                        self.retire_snapshot_child(sc, out);
                        self.insert_live_child(
                            live, ctx, lc, l_idx, snap_parent, s_idx, parent_sid, out,
                        );
                        s_idx += 1;
                        l_idx += 1;
                    }
                }
            }
        }

        // Sibling-level operations settled; propagate deeper changes
        for (lc, sc) in matched {
            self.diff_subtree(live, ctx, lc, sc, out);
        }
    }

    fn retire_snapshot_child(&mut self, snap_child: usize, out: &mut Vec<EmittedOp>) {
        if let Some(stream_id) = self.snapshot.nodes[snap_child].stream_id {
            out.push(plain_op(DomOp::Remove {
                node_id: stream_id,
            }));
        }
        self.snapshot.remove_and_drop_node(snap_child);
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_live_child(
        &mut self,
        live: &mut Document,
        ctx: &mut InlineContext,
        live_child: usize,
        live_index: usize,
        snap_parent: usize,
        snap_index: usize,
        parent_sid: NodeId,
        out: &mut Vec<EmittedOp>,
    ) {
        // A child moved in from another parent still lives in the snapshot at
        // its old position; retire it there first so the removal precedes the
        // insert on the wire.
        if let Some(stream_id) = live.nodes[live_child].stream_id {
            if let Some(old_snap) = self.snapshot.id_map.get_by_id(stream_id) {
                self.retire_snapshot_child(old_snap, out);
            }
        }

        let fetches_before = ctx.fetches.len();
        let Some(vnode) = serialize_subtree(live, ctx, live_child) else {
            return;
        };
        let asset_count = (ctx.fetches.len() - fetches_before) as u32;

        // Snapshot gets its own clone with mirrored ids; the vnode above is
        // the wire's separate copy.
        let imported = self.snapshot.import_subtree(live, live_child);
        self.snapshot
            .mirror_stream_ids_from(live, live_child, imported);
        self.snapshot
            .insert_child_at(snap_parent, snap_index, imported);

        let mut announced = Vec::new();
        collect_elements(live, live_child, &mut announced);

        out.push(EmittedOp {
            op: DomOp::Insert {
                parent_id: parent_sid,
                index: live_index as u32,
                node: vnode,
            },
            asset_count,
            announced,
        });
    }
}

fn plain_op(op: DomOp) -> EmittedOp {
    EmittedOp {
        op,
        asset_count: 0,
        announced: Vec::new(),
    }
}

/// Whether a node is currently inside the tracked root, without crossing a
/// shadow boundary (mutations inside shadow trees are not observed).
fn is_tracked(live: &Document, target: usize) -> bool {
    let Some(mut node) = live.get_node(target) else {
        return false;
    };
    loop {
        if node.is_shadow_root() {
            return false;
        }
        match node.parent {
            Some(parent) => match live.get_node(parent) {
                Some(parent_node) => node = parent_node,
                None => return false,
            },
            None => return node.id == 0,
        }
    }
}

fn has_dirty_ancestor(live: &Document, target: usize, dirty: &FxHashSet<usize>) -> bool {
    let mut current = live.nodes[target].parent;
    while let Some(node_id) = current {
        if dirty.contains(&node_id) {
            return true;
        }
        current = live.nodes[node_id].parent;
    }
    false
}

pub(crate) fn collect_elements(live: &Document, root: usize, out: &mut Vec<usize>) {
    let node = &live.nodes[root];
    if let Some(element) = node.element_data() {
        out.push(root);
        if let Some(shadow) = element.shadow_root {
            collect_elements(live, shadow, out);
        }
    }
    for &child in &node.children {
        collect_elements(live, child, out);
    }
}
