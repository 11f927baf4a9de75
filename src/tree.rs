//! Node arena and transposition map.
//!
//! Nodes live in an append-only arena and refer to each other by [`NodeId`].
//! The arena is behind a read-write lock that is only held long enough to
//! clone an `Arc<Node>` or push a new node; node locks are never taken while
//! it is held. The transposition map has its own mutex and is always locked
//! before the arena when both are needed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::game::Action;
use crate::node::{Child, Node, NodeId};
use crate::settings::SearchSettings;

/// Longest line [`Tree::best_line`] will follow.
const MAX_LINE: usize = 512;

/// Statistics of one root edge.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSummary {
    pub action: Action,
    pub visits: u32,
    /// Mean value for the side to move at the root.
    pub q: f32,
    pub prior: f32,
}

/// Principal line of the search with the root statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct BestLine {
    pub actions: Vec<Action>,
    /// Value of the root for its side to move.
    pub value: f32,
    pub visits: u32,
    pub edges: Vec<EdgeSummary>,
}

/// Search graph shared by all search threads.
#[derive(Debug)]
pub struct Tree {
    nodes: RwLock<Vec<Arc<Node>>>,
    table: Mutex<HashMap<u64, NodeId>>,
    root: NodeId,
}

impl Tree {
    /// A tree holding only `root`.
    pub fn new(root: Node) -> Self {
        let hash = root.hash_key();
        let terminal = root.lock().num_children() == 0;
        let mut table = HashMap::new();
        if !terminal {
            table.insert(hash, NodeId(0));
        }
        Self {
            nodes: RwLock::new(vec![Arc::new(root)]),
            table: Mutex::new(table),
            root: NodeId(0),
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Shared handle to a node.
    #[inline]
    pub fn node(&self, id: NodeId) -> Arc<Node> {
        Arc::clone(&self.nodes.read()[id.index()])
    }

    pub fn root_node(&self) -> Arc<Node> {
        self.node(self.root)
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Always false: a tree holds at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// All nodes, in creation order.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    /// Number of entries in the transposition map.
    pub fn table_len(&self) -> usize {
        self.table.lock().len()
    }

    /// Append a node that is not shared through the transposition map.
    pub fn push(&self, node: Node) -> NodeId {
        let mut nodes = self.nodes.write();
        let id = NodeId(nodes.len() as u32);
        nodes.push(Arc::new(node));
        id
    }

    /// Look `hash` up in the transposition map, creating the node with `make`
    /// on a miss. Returns the node and whether it already existed.
    ///
    /// Two threads racing for the same position both go through the map
    /// lock, so exactly one of them creates the node.
    pub fn get_or_insert(&self, hash: u64, make: impl FnOnce() -> Node) -> (NodeId, bool) {
        let mut table = self.table.lock();
        if let Some(&id) = table.get(&hash) {
            return (id, true);
        }
        let id = self.push(make());
        table.insert(hash, id);
        (id, false)
    }

    /// Attach `child` to the claimed slot `idx` of `parent`.
    pub fn link(&self, parent: NodeId, idx: usize, child: NodeId) {
        self.node(parent).lock().set_child(idx, child);
        self.node(child).lock().add_parent();
    }

    /// Most visited line from the root together with the root statistics.
    pub fn best_line(&self, settings: &SearchSettings) -> BestLine {
        let root = self.root_node();
        let (value, visits, edges, first) = {
            let d = root.lock();
            let edges = (0..d.num_children())
                .map(|i| EdgeSummary {
                    action: d.actions()[i],
                    visits: d.child_visits(i),
                    q: d.edge_q(i, settings.q_init),
                    prior: d.priors()[i],
                })
                .collect();
            (d.value(), d.visits(), edges, d.best_child().map(|i| (i, d.actions()[i], d.child(i))))
        };

        let mut actions = Vec::new();
        let mut next = first;
        while let Some((_, action, child)) = next {
            actions.push(action);
            next = match child {
                Child::Node(id) if actions.len() < MAX_LINE => {
                    let node = self.node(id);
                    let d = node.lock();
                    d.best_child().map(|i| (i, d.actions()[i], d.child(i)))
                }
                _ => None,
            };
        }

        BestLine {
            actions,
            value,
            visits,
            edges,
        }
    }

    /// A new tree made of the sub-graph reachable from `new_root`.
    ///
    /// Nodes are renumbered densely, in-flight counters are cleared, and the
    /// transposition map and parent counts are rebuilt for the kept nodes.
    pub fn subtree(&self, new_root: NodeId) -> Tree {
        let old = self.nodes.read();
        let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([new_root]);
        remap.insert(new_root, NodeId(0));

        while let Some(id) = queue.pop_front() {
            order.push(id);
            let d = old[id.index()].lock();
            for i in 0..d.num_children() {
                if let Child::Node(child) = d.child(i) {
                    if !remap.contains_key(&child) {
                        remap.insert(child, NodeId(remap.len() as u32));
                        queue.push_back(child);
                    }
                }
            }
        }

        let mut parents = vec![0u32; order.len()];
        let mut nodes = Vec::with_capacity(order.len());
        let mut table = HashMap::new();
        for &id in &order {
            let node = &old[id.index()];
            let mut data = node.lock().clone();
            for slot in data.children.iter_mut() {
                *slot = match *slot {
                    Child::Node(c) => {
                        let new_id = remap[&c];
                        parents[new_id.index()] += 1;
                        Child::Node(new_id)
                    }
                    // Claims only exist while a search runs.
                    Child::Claimed | Child::Empty => Child::Empty,
                };
            }
            data.clear_virtual();
            if !data.is_terminal() {
                table.insert(node.hash_key(), remap[&id]);
            }
            nodes.push(Arc::new(Node::from_data(node.hash_key(), data)));
        }
        for (node, &count) in nodes.iter().zip(&parents) {
            node.lock().parents = count;
        }

        Tree {
            nodes: RwLock::new(nodes),
            table: Mutex::new(table),
            root: NodeId(0),
        }
    }
}
