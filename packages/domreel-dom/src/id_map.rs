//! The bidirectional mapping between stream identifiers and nodes.
//!
//! Stream ids are dense, monotonic and assigned on first encounter during a
//! depth-first pre-order walk. The id is stamped on the node itself
//! ([`Node::stream_id`]) for O(1) lookup and mirrored here id → slab key.
//! Shadow-root container nodes are deliberately never given ids — they do not
//! appear on the wire — but their children are walked like any others.

use rustc_hash::FxHashMap;
use slab::Slab;

use domreel_protocol::NodeId;

use crate::node::Node;

pub struct NodeIdMap {
    by_id: FxHashMap<NodeId, usize>,
    next_id: NodeId,
}

impl Default for NodeIdMap {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeIdMap {
    pub fn new() -> Self {
        Self {
            by_id: FxHashMap::default(),
            // Ids are positive; zero is never assigned.
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// The stream id of a node, if it has been assigned one.
    pub fn id_of(&self, nodes: &Slab<Node>, node_id: usize) -> Option<NodeId> {
        nodes.get(node_id)?.stream_id
    }

    /// The node currently registered under a stream id.
    pub fn get_by_id(&self, id: NodeId) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    /// Drop a single id from the map.
    pub fn forget(&mut self, id: NodeId) {
        self.by_id.remove(&id);
    }

    /// The stream id of a node, assigning a fresh one if absent.
    pub fn get_id(&mut self, nodes: &mut Slab<Node>, node_id: usize) -> NodeId {
        if let Some(id) = nodes[node_id].stream_id {
            self.by_id.entry(id).or_insert(node_id);
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        nodes[node_id].stream_id = Some(id);
        self.by_id.insert(id, node_id);
        id
    }

    /// Assign ids to a whole subtree, depth-first pre-order. Idempotent:
    /// already-assigned nodes keep their ids and only genuinely new
    /// descendants receive fresh ones.
    pub fn assign_subtree(&mut self, nodes: &mut Slab<Node>, root: usize) {
        if !nodes[root].is_shadow_root() {
            self.get_id(nodes, root);
        }
        let children = subtree_edges(nodes, root);
        for child in children {
            self.assign_subtree(nodes, child);
        }
    }

    /// Install the pre-existing stream ids of a subtree (e.g. one materialized
    /// from an operation) into the map, reseeding the allocation counter past
    /// the highest adopted id so recorded and fresh ranges never collide.
    pub fn adopt_subtree(&mut self, nodes: &Slab<Node>, root: usize) {
        if let Some(id) = nodes[root].stream_id {
            self.by_id.insert(id, root);
            if id >= self.next_id {
                self.next_id = id + 1;
            }
        }
        for child in subtree_edges(nodes, root) {
            self.adopt_subtree(nodes, child);
        }
    }

    /// Copy the id structure of `src` (in another document) onto the
    /// structurally identical subtree `dst`, registering the copies here.
    pub fn mirror_subtree(
        &mut self,
        src_nodes: &Slab<Node>,
        src: usize,
        dst_nodes: &mut Slab<Node>,
        dst: usize,
    ) {
        let src_node = &src_nodes[src];
        if let Some(id) = src_node.stream_id {
            dst_nodes[dst].stream_id = Some(id);
            self.by_id.insert(id, dst);
            if id >= self.next_id {
                self.next_id = id + 1;
            }
        }
        let src_children = subtree_edges(src_nodes, src);
        let dst_children = subtree_edges(dst_nodes, dst);
        debug_assert_eq!(
            src_children.len(),
            dst_children.len(),
            "mirrored subtrees must be structurally identical"
        );
        for (src_child, dst_child) in src_children.into_iter().zip(dst_children) {
            self.mirror_subtree(src_nodes, src_child, dst_nodes, dst_child);
        }
    }

    /// Delete the ids of a node and all its descendants from the map. The
    /// stamp on the detached nodes is left in place; it is irrelevant once
    /// the node is out of the tree.
    pub fn remove_subtree(&mut self, nodes: &Slab<Node>, root: usize) {
        let node = &nodes[root];
        match node.stream_id {
            Some(id) => {
                self.by_id.remove(&id);
            }
            None => {
                if !node.is_shadow_root() {
                    // A tracked descendant without an id means an earlier pass
                    // missed it. Remove what is known and keep going.
                    tracing::warn!("orphaned child {} during subtree removal", root);
                }
            }
        }
        for child in subtree_edges(nodes, root) {
            self.remove_subtree(nodes, child);
        }
    }
}

/// Children of a node for id-walking purposes: tree children plus the shadow
/// container of an element, whose own children are tracked.
fn subtree_edges(nodes: &Slab<Node>, node_id: usize) -> Vec<usize> {
    let node = &nodes[node_id];
    let mut edges = node.children.clone();
    if let Some(shadow) = node.element_data().and_then(|el| el.shadow_root) {
        edges.push(shadow);
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeData, TextNodeData};

    fn tree() -> (Slab<Node>, usize) {
        let mut nodes = Slab::new();
        let root = nodes.insert(Node::new(0, NodeData::Document));
        nodes[root].id = root;
        let child = nodes.insert(Node::new(0, NodeData::Text(TextNodeData::new("a".into()))));
        nodes[child].id = child;
        nodes[child].parent = Some(root);
        nodes[root].children.push(child);
        (nodes, root)
    }

    #[test]
    fn assignment_is_dense_and_idempotent() {
        let (mut nodes, root) = tree();
        let mut map = NodeIdMap::new();
        map.assign_subtree(&mut nodes, root);
        assert_eq!(nodes[root].stream_id, Some(1));
        assert_eq!(nodes[nodes[root].children[0]].stream_id, Some(2));

        // A fresh child appended later gets the next id; existing ids hold.
        let extra = nodes.insert(Node::new(0, NodeData::Text(TextNodeData::new("b".into()))));
        nodes[extra].id = extra;
        nodes[extra].parent = Some(root);
        nodes[root].children.push(extra);
        map.assign_subtree(&mut nodes, root);
        assert_eq!(nodes[root].stream_id, Some(1));
        assert_eq!(nodes[extra].stream_id, Some(3));
    }

    #[test]
    fn adoption_reseeds_the_counter() {
        let (mut nodes, root) = tree();
        nodes[root].stream_id = Some(40);
        let child = nodes[root].children[0];
        nodes[child].stream_id = Some(41);

        let mut map = NodeIdMap::new();
        map.adopt_subtree(&nodes, root);
        assert_eq!(map.get_by_id(41), Some(child));

        let extra = nodes.insert(Node::new(0, NodeData::Text(TextNodeData::new("c".into()))));
        nodes[extra].id = extra;
        assert_eq!(map.get_id(&mut nodes, extra), 42);
    }

    #[test]
    fn removal_reclaims_ids() {
        let (mut nodes, root) = tree();
        let mut map = NodeIdMap::new();
        map.assign_subtree(&mut nodes, root);
        let child = nodes[root].children[0];
        map.remove_subtree(&nodes, child);
        assert_eq!(map.get_by_id(2), None);
        assert_eq!(map.get_by_id(1), Some(root));
    }
}
