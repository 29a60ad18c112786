use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use markup5ever::local_name;
use rustc_hash::FxHashMap;
use slab::Slab;
use url::Url;

use crate::config::DocumentConfig;
use crate::id_map::NodeIdMap;
use crate::node::{ElementData, Node, NodeData, TextNodeData};
use crate::observer::{MutationJournal, MutationKind};
use crate::stylesheet::{SheetChange, SheetError, SheetKey, StyleSheet};
use crate::url::DocumentUrl;

/// Global document id counter, so net callbacks can address a document
static DOCUMENT_COUNT: AtomicUsize = AtomicUsize::new(0);

/// The viewport state a recording carries alongside the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scroll_x: u32,
    pub scroll_y: u32,
}

/// A document: a slab of nodes rooted at node 0, the stream-id map, the
/// stylesheet registry and the mutation journal.
pub struct Document {
    id: usize,

    pub nodes: Slab<Node>,
    url: DocumentUrl,

    /// Stream id ↔ node mapping for this document
    pub id_map: NodeIdMap,

    pub sheets: Slab<StyleSheet>,
    /// Constructed sheets adopted by the document, in list order
    pub adopted_sheets: Vec<SheetKey>,

    pub journal: MutationJournal,
    pub viewport: Viewport,

    /// Map of `id` attribute values to nodes
    nodes_to_id: FxHashMap<String, usize>,
}

impl Document {
    pub fn new(config: DocumentConfig) -> Self {
        let url = config
            .base_url
            .as_deref()
            .and_then(|url| DocumentUrl::from_str(url).ok())
            .unwrap_or_default();

        let mut doc = Self {
            id: DOCUMENT_COUNT.fetch_add(1, Ordering::SeqCst),
            nodes: Slab::new(),
            url,
            id_map: NodeIdMap::new(),
            sheets: Slab::new(),
            adopted_sheets: Vec::new(),
            journal: MutationJournal::default(),
            viewport: config.viewport.unwrap_or_default(),
            nodes_to_id: FxHashMap::default(),
        };

        // The root node (id 0) is the Document
        doc.create_node(NodeData::Document);
        doc
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn base_url(&self) -> &Url {
        &self.url
    }

    pub fn resolve_url(&self, raw: &str) -> Option<Url> {
        self.url.resolve_relative(raw)
    }

    pub fn root_node(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn get_node(&self, node_id: usize) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn get_node_mut(&mut self, node_id: usize) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    /// The node with the given `id` attribute value, if any
    pub fn element_by_html_id(&self, html_id: &str) -> Option<usize> {
        self.nodes_to_id.get(html_id).copied()
    }

    pub fn create_node(&mut self, node_data: NodeData) -> usize {
        let entry = self.nodes.vacant_entry();
        let id = entry.key();
        entry.insert(Node::new(id, node_data));
        id
    }

    pub fn create_text_node(&mut self, text: &str) -> usize {
        let data = NodeData::Text(TextNodeData::new(text.to_string()));
        self.create_node(data)
    }

    pub fn create_element_node(&mut self, data: ElementData) -> usize {
        let html_id = data.attr(local_name!("id")).map(str::to_string);
        let id = self.create_node(NodeData::Element(data));
        if let Some(html_id) = html_id {
            self.nodes_to_id.insert(html_id, id);
        }
        id
    }

    /// Concatenated text content of a node's subtree
    pub fn text_content(&self, node_id: usize) -> String {
        fn visit(doc: &Document, node_id: usize, out: &mut String) {
            let node = &doc.nodes[node_id];
            if let NodeData::Text(data) = &node.data {
                out.push_str(&data.content);
            }
            for &child in &node.children {
                visit(doc, child, out);
            }
        }
        let mut out = String::new();
        visit(self, node_id, &mut out);
        out
    }

    // -----------------------------------------------------------------------
    // Tree surgery. Insertion of an already-parented node is a move.
    // -----------------------------------------------------------------------

    pub fn append(&mut self, parent_id: usize, child_ids: &[usize]) {
        for &child_id in child_ids {
            self.detach(child_id);
            self.nodes[parent_id].children.push(child_id);
            self.nodes[child_id].parent = Some(parent_id);
        }
        self.journal.record(MutationKind::ChildList, parent_id);
    }

    pub fn insert_child_at(&mut self, parent_id: usize, index: usize, child_id: usize) {
        self.detach(child_id);
        let index = index.min(self.nodes[parent_id].children.len());
        self.nodes[parent_id].children.insert(index, child_id);
        self.nodes[child_id].parent = Some(parent_id);
        self.journal.record(MutationKind::ChildList, parent_id);
    }

    pub fn insert_before(&mut self, anchor_node_id: usize, new_node_ids: &[usize]) {
        let parent_id = match self.nodes[anchor_node_id].parent {
            Some(parent_id) => parent_id,
            None => return,
        };
        for &new_node_id in new_node_ids {
            self.detach(new_node_id);
            let anchor_pos = self.nodes[parent_id]
                .children
                .iter()
                .position(|id| *id == anchor_node_id)
                .unwrap_or(self.nodes[parent_id].children.len());
            self.nodes[parent_id].children.insert(anchor_pos, new_node_id);
            self.nodes[new_node_id].parent = Some(parent_id);
        }
        self.journal.record(MutationKind::ChildList, parent_id);
    }

    /// Detach a node from its parent, keeping its storage (it may be
    /// re-inserted elsewhere, which is how moves happen).
    pub fn remove_node(&mut self, node_id: usize) {
        if let Some(parent_id) = self.detach(node_id) {
            self.journal.record(MutationKind::ChildList, parent_id);
        }
    }

    /// Detach a node and reclaim the storage of its whole subtree.
    pub fn remove_and_drop_node(&mut self, node_id: usize) {
        self.remove_node(node_id);
        self.drop_node_ignoring_parent(node_id);
    }

    fn detach(&mut self, node_id: usize) -> Option<usize> {
        let parent_id = self.nodes[node_id].parent.take()?;
        self.nodes[parent_id].children.retain(|id| *id != node_id);
        Some(parent_id)
    }

    pub(crate) fn drop_node_ignoring_parent(&mut self, node_id: usize) {
        let Some(node) = self.nodes.try_remove(node_id) else {
            return;
        };
        self.journal.record_dropped(node_id);
        if let Some(stream_id) = node.stream_id {
            // Reclaim the id only if it still points at this node; a fresh
            // clone may have re-registered it.
            if self.id_map.get_by_id(stream_id) == Some(node_id) {
                self.id_map.forget(stream_id);
            }
        }

        if let NodeData::Element(element) = &node.data {
            if let Some(sheet_key) = element.stylesheet {
                self.sheets.try_remove(sheet_key);
            }
            if let Some(shadow) = element.shadow_root {
                self.drop_node_ignoring_parent(shadow);
            }
        }
        for &child in &node.children {
            self.drop_node_ignoring_parent(child);
        }
    }

    /// Clone a subtree within this document. The clone is a fresh set of
    /// nodes: no stream ids, no owner-backed sheets.
    pub fn deep_clone_node(&mut self, node_id: usize) -> usize {
        let node = &self.nodes[node_id];
        let mut data = node.data.clone();
        let children = node.children.clone();
        let shadow = node.element_data().and_then(|el| el.shadow_root);

        if let NodeData::Element(element) = &mut data {
            element.stylesheet = None;
            element.shadow_root = None;
        }
        let new_node_id = self.create_node(data);

        let new_children: Vec<usize> = children
            .into_iter()
            .map(|child_id| self.deep_clone_node(child_id))
            .collect();
        for &child_id in &new_children {
            self.nodes[child_id].parent = Some(new_node_id);
        }
        self.nodes[new_node_id].children = new_children;

        if let Some(shadow) = shadow {
            let new_shadow = self.deep_clone_node(shadow);
            self.nodes[new_shadow].parent = Some(new_node_id);
            if let Some(element) = self.nodes[new_node_id].element_data_mut() {
                element.shadow_root = Some(new_shadow);
            }
        }

        new_node_id
    }

    /// Clone a subtree out of another document into this one. Stream ids are
    /// not carried over; callers mirror or assign ids afterwards.
    pub fn import_subtree(&mut self, src: &Document, src_root: usize) -> usize {
        let src_node = &src.nodes[src_root];
        let mut data = src_node.data.clone();
        if let NodeData::Element(element) = &mut data {
            element.stylesheet = None;
            element.shadow_root = None;
        }
        let dst_root = self.create_node(data);

        let dst_children: Vec<usize> = src_node
            .children
            .iter()
            .map(|&src_child| self.import_subtree(src, src_child))
            .collect();
        for &child_id in &dst_children {
            self.nodes[child_id].parent = Some(dst_root);
        }
        self.nodes[dst_root].children = dst_children;

        if let Some(src_shadow) = src_node.element_data().and_then(|el| el.shadow_root) {
            let dst_shadow = self.import_subtree(src, src_shadow);
            self.nodes[dst_shadow].parent = Some(dst_root);
            if let Some(element) = self.nodes[dst_root].element_data_mut() {
                element.shadow_root = Some(dst_shadow);
            }
        }

        dst_root
    }

    // -----------------------------------------------------------------------
    // Stylesheets
    // -----------------------------------------------------------------------

    /// Build (or rebuild) the owner-backed sheet of a `<style>` element from
    /// its text content. The sheet keeps its key across rebuilds so its
    /// identity — the owner's node id — is stable.
    pub fn process_style_element(&mut self, target_id: usize) {
        let css = self.text_content(target_id);
        let existing = self
            .nodes[target_id]
            .element_data()
            .and_then(|el| el.stylesheet);

        match existing {
            Some(key) => {
                if let Some(sheet) = self.sheets.get_mut(key) {
                    sheet.replace_text(&css);
                }
            }
            None => {
                let key = self.sheets.insert(StyleSheet::new_owner_backed(target_id, &css));
                if let Some(element) = self.nodes[target_id].element_data_mut() {
                    element.stylesheet = Some(key);
                }
            }
        }
    }

    pub fn create_constructed_sheet(&mut self, media: Option<String>) -> SheetKey {
        self.sheets.insert(StyleSheet::new_constructed(media))
    }

    pub fn sheet(&self, key: SheetKey) -> Option<&StyleSheet> {
        self.sheets.get(key)
    }

    /// The sheet owned by a node, if its content has been processed.
    pub fn sheet_for_owner(&self, node_id: usize) -> Option<SheetKey> {
        self.nodes
            .get(node_id)?
            .element_data()?
            .stylesheet
    }

    pub fn sheet_insert_rule(
        &mut self,
        key: SheetKey,
        index: u32,
        rule: &str,
    ) -> Result<(), SheetError> {
        let sheet = self.sheets.get_mut(key).ok_or(SheetError::MissingSheet(key))?;
        let len = sheet.rules.len();
        if index as usize > len {
            return Err(SheetError::IndexOutOfBounds { index, len });
        }
        sheet.rules.insert(index as usize, rule.to_string());
        self.journal.record_sheet_change(SheetChange::RulesInsert {
            sheet: key,
            index,
            rule: rule.to_string(),
        });
        Ok(())
    }

    pub fn sheet_delete_rule(&mut self, key: SheetKey, index: u32) -> Result<(), SheetError> {
        let sheet = self.sheets.get_mut(key).ok_or(SheetError::MissingSheet(key))?;
        let len = sheet.rules.len();
        if index as usize >= len {
            return Err(SheetError::IndexOutOfBounds { index, len });
        }
        sheet.rules.remove(index as usize);
        self.journal
            .record_sheet_change(SheetChange::RulesDelete { sheet: key, index });
        Ok(())
    }

    pub fn sheet_replace(&mut self, key: SheetKey, text: &str) -> Result<(), SheetError> {
        let sheet = self.sheets.get_mut(key).ok_or(SheetError::MissingSheet(key))?;
        sheet.replace_text(text);
        self.journal.record_sheet_change(SheetChange::Replace {
            sheet: key,
            text: text.to_string(),
        });
        Ok(())
    }

    /// Set the document's adopted-sheets list, replacing the previous one.
    pub fn set_adopted_sheets(&mut self, keys: Vec<SheetKey>) {
        let snapshots = keys
            .iter()
            .filter_map(|&key| {
                let sheet = self.sheets.get(key)?;
                Some(crate::stylesheet::AdoptedSheetSnapshot {
                    key,
                    text: sheet.text(),
                    media: sheet.media.clone(),
                })
            })
            .collect();
        self.adopted_sheets = keys;
        self.journal
            .record_sheet_change(SheetChange::AdoptedListChanged { sheets: snapshots });
    }

    // -----------------------------------------------------------------------
    // Stream ids
    // -----------------------------------------------------------------------

    /// Assign stream ids to a subtree of this document, depth-first.
    pub fn assign_stream_ids(&mut self, root: usize) {
        self.id_map.assign_subtree(&mut self.nodes, root);
    }

    /// Register the pre-existing stream ids of a subtree in the map.
    pub fn adopt_stream_ids(&mut self, root: usize) {
        self.id_map.adopt_subtree(&self.nodes, root);
    }

    /// Forget the stream ids of a subtree.
    pub fn release_stream_ids(&mut self, root: usize) {
        self.id_map.remove_subtree(&self.nodes, root);
    }

    /// Copy the stream-id structure of a subtree in `src` onto the
    /// structurally identical subtree `dst_root` of this document.
    pub fn mirror_stream_ids_from(&mut self, src: &Document, src_root: usize, dst_root: usize) {
        self.id_map
            .mirror_subtree(&src.nodes, src_root, &mut self.nodes, dst_root);
    }

    /// The node registered under a stream id.
    pub fn node_by_stream_id(&self, id: domreel_protocol::NodeId) -> Option<usize> {
        self.id_map.get_by_id(id)
    }

    pub fn print_tree(&self) {
        crate::util::walk_tree(0, self, 0);
    }
}
