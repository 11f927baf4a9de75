//! One search worker.
//!
//! A [`SearchThread`] repeatedly builds a mini-batch of leaves, evaluates the
//! new ones with a single evaluator call, and backs every collected
//! trajectory up. All threads of a search share the [`Tree`]; each owns its
//! scratch buffers and its random generator.
//!
//! Lock discipline: a thread holds at most one node lock at a time and never
//! holds one across an evaluator call or an alpha-beta sub-search.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, trace, warn};

use crate::constants::{DEPTH_INIT, TRANSPOSITION_Q_DIFF};
use crate::evaluator::{sanitize_value, EvalBatch, EvalOutput, Evaluator, EvaluatorError};
use crate::game::{classify, Action, GameState, Outcome};
use crate::minimax::AlphaBeta;
use crate::node::{Child, Node, NodeId};
use crate::settings::{SearchLimits, SearchSettings};
use crate::tree::Tree;

/// One edge on a trajectory: the node and the child index taken there.
pub type Step = (NodeId, usize);

/// Per-thread counters, merged into the search report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadStats {
    /// Leaves sent to the evaluator.
    pub new_nodes: u64,
    pub collisions: u64,
    pub transpositions: u64,
    /// Terminal or proven leaves backed up directly.
    pub terminals: u64,
    pub tb_hits: u64,
    pub batches: u64,
    pub minimax_calls: u64,
    pub depth_sum: u64,
    pub depth_max: usize,
}

impl ThreadStats {
    pub fn merge(&mut self, other: &ThreadStats) {
        self.new_nodes += other.new_nodes;
        self.collisions += other.collisions;
        self.transpositions += other.transpositions;
        self.terminals += other.terminals;
        self.tb_hits += other.tb_hits;
        self.batches += other.batches;
        self.minimax_calls += other.minimax_calls;
        self.depth_sum += other.depth_sum;
        self.depth_max = self.depth_max.max(other.depth_max);
    }

    /// Leaves of any kind that ended a selection.
    pub fn selections(&self) -> u64 {
        self.new_nodes + self.collisions + self.transpositions + self.terminals
    }
}

/// Where a selection ended.
enum Leaf<S> {
    /// A node created by this thread that needs the evaluator.
    New { id: NodeId, state: S },
    /// A terminal or proven node; `value` is from its own point of view.
    Proven {
        value: f32,
        outcome: Option<Outcome>,
    },
    /// A shared node whose value is backed up without descending further.
    Transposition { value: f32 },
    /// A node some thread is still waiting on.
    Collision,
}

/// Exploration override picked at the start of a selection.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Override {
    None,
    /// Follow the most visited edges for this many plies, then pick randomly.
    Greedy(usize),
    /// Take the first unexplored checking move found on the way down.
    Checks,
}

/// A new leaf waiting for its evaluator results.
struct PendingLeaf {
    id: NodeId,
    trajectory: Vec<Step>,
    checks: Option<Vec<bool>>,
    tablebase: Option<Outcome>,
    /// Value from the sub-search run at the leaf, replacing the evaluator's.
    minimax_value: Option<f32>,
}

/// Worker state of one search thread.
pub struct SearchThread<'a, S: GameState, E: Evaluator<S>> {
    tree: &'a Tree,
    root_state: &'a S,
    evaluator: &'a E,
    settings: &'a SearchSettings,
    limits: &'a SearchLimits,
    stop: &'a AtomicBool,
    rng: fastrand::Rng,

    trajectory: Vec<Step>,
    actions: Vec<Action>,
    new_nodes: Vec<PendingLeaf>,
    states: Vec<S>,
    inputs: Vec<f32>,
    collisions: Vec<Vec<Step>>,
    transpositions: Vec<(Vec<Step>, f32)>,
    terminals: usize,
    error: Option<EvaluatorError>,
    stats: ThreadStats,
}

impl<'a, S: GameState, E: Evaluator<S>> SearchThread<'a, S, E> {
    pub fn new(
        index: usize,
        tree: &'a Tree,
        root_state: &'a S,
        evaluator: &'a E,
        settings: &'a SearchSettings,
        limits: &'a SearchLimits,
        stop: &'a AtomicBool,
    ) -> Self {
        let batch = settings.batch_size.max(1);
        Self {
            tree,
            root_state,
            evaluator,
            settings,
            limits,
            stop,
            rng: fastrand::Rng::with_seed(settings.seed.wrapping_add(index as u64)),
            trajectory: Vec::with_capacity(DEPTH_INIT),
            actions: Vec::with_capacity(DEPTH_INIT),
            new_nodes: Vec::with_capacity(batch),
            states: Vec::with_capacity(batch),
            inputs: Vec::with_capacity(batch * root_state.input_len()),
            collisions: Vec::with_capacity(batch),
            transpositions: Vec::with_capacity(batch * 2),
            terminals: 0,
            error: None,
            stats: ThreadStats::default(),
        }
    }

    /// Search until stopped, out of limits, or the root is solved.
    pub fn run(mut self) -> Result<ThreadStats, EvaluatorError> {
        while self.is_running() {
            self.create_mini_batch();
            self.evaluate_and_backup();
            if let Some(e) = self.error.take() {
                self.stop.store(true, Ordering::Relaxed);
                return Err(e);
            }
        }
        Ok(self.stats)
    }

    fn is_running(&self) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return false;
        }
        let node_count = self.tree.len() as u64;
        let root = self.tree.root_node();
        let d = root.lock();
        d.exact_outcome().is_none() && self.limits.nodes_ok(node_count, d.visits())
    }

    /// Select leaves until one of the batch caps is reached.
    ///
    /// Terminal leaves are backed up right away; everything else is queued.
    pub fn create_mini_batch(&mut self) {
        let batch = self.settings.batch_size.max(1);
        while self.new_nodes.len() < batch
            && self.collisions.len() < batch
            && self.transpositions.len() < batch * 2
            && self.terminals < self.settings.terminal_node_cache()
        {
            let leaf = self.get_new_child_to_evaluate();
            let depth = self.trajectory.len();
            self.stats.depth_sum += depth as u64;
            self.stats.depth_max = self.stats.depth_max.max(depth);
            let trajectory = mem::take(&mut self.trajectory);

            match leaf {
                Leaf::New { id, state } => self.queue_new_leaf(id, state, trajectory),
                Leaf::Proven { value, outcome } => {
                    self.backup_value(&trajectory, value, outcome);
                    self.terminals += 1;
                    self.stats.terminals += 1;
                    self.trajectory = trajectory;
                }
                Leaf::Transposition { value } => {
                    self.transpositions.push((trajectory, value));
                    self.stats.transpositions += 1;
                }
                Leaf::Collision => {
                    self.collisions.push(trajectory);
                    self.stats.collisions += 1;
                }
            }
        }
    }

    fn pick_override(&mut self) -> Override {
        let greedy = self.settings.epsilon_greedy_counter;
        let checks = self.settings.epsilon_checks_counter;
        if greedy > 0 && self.rng.u32(..greedy) == 0 {
            Override::Greedy(random_depth(&mut self.rng))
        } else if checks > 0 && self.rng.u32(..checks) == 0 {
            Override::Checks
        } else {
            Override::None
        }
    }

    /// Walk from the root to the next leaf, applying virtual loss on every
    /// edge taken. The path is left in `self.trajectory`.
    fn get_new_child_to_evaluate(&mut self) -> Leaf<S> {
        self.trajectory.clear();
        self.actions.clear();
        let mut mode = self.pick_override();
        let mut check_state = (mode == Override::Checks).then(|| self.root_state.clone());
        let mut id = self.tree.root();

        loop {
            let node = self.tree.node(id);
            let mut d = node.lock();

            let idx = if d.claim_minimax(self.settings) {
                drop(d);
                let choice = self.run_minimax(id);
                d = node.lock();
                match choice {
                    Some((idx, value)) => {
                        d.finish_minimax(value.map(|v| (idx, v)));
                        idx
                    }
                    None => {
                        d.finish_minimax(None);
                        d.select_child(self.settings)
                    }
                }
            } else {
                match mode {
                    Override::Greedy(0) => {
                        mode = Override::None;
                        d.random_playout_idx(&mut self.rng)
                    }
                    Override::Greedy(n) => match d.most_visited_child() {
                        Some(idx) => {
                            mode = Override::Greedy(n - 1);
                            idx
                        }
                        None => {
                            mode = Override::None;
                            d.random_playout_idx(&mut self.rng)
                        }
                    },
                    Override::Checks if !d.checks_inspected => {
                        let found = check_state
                            .as_ref()
                            .and_then(|s| d.unexplored_check(|a| s.gives_check(a)));
                        match found {
                            Some(idx) => {
                                mode = Override::None;
                                idx
                            }
                            None => {
                                d.checks_inspected = true;
                                d.select_child(self.settings)
                            }
                        }
                    }
                    _ => d.select_child(self.settings),
                }
            };

            d.apply_virtual_loss(idx);
            self.trajectory.push((id, idx));
            let action = d.actions()[idx];
            self.actions.push(action);
            if let Some(s) = check_state.as_mut() {
                s.do_action(action);
            }

            let child = match d.child(idx) {
                Child::Empty => {
                    d.claim_child(idx);
                    drop(d);
                    return self.create_child(id, idx);
                }
                Child::Claimed => return Leaf::Collision,
                Child::Node(child) => child,
            };
            let edge_visits = d.child_visits(idx);
            let edge_q = self.settings.parent_value(d.edge_q(idx, self.settings.q_init));
            drop(d);

            let child_node = self.tree.node(child);
            let mut c = child_node.lock();
            if !c.has_results() {
                return Leaf::Collision;
            }
            if c.is_terminal() {
                let value = c.proven_visit();
                return Leaf::Proven {
                    value,
                    outcome: c.exact_outcome(),
                };
            }
            if let Some(outcome) = c.exact_outcome() {
                return Leaf::Proven {
                    value: outcome.value(),
                    outcome: Some(outcome),
                };
            }
            if self.settings.use_transposition_table && c.parents() > 1 {
                let node_value = c.value();
                if edge_visits == 0 {
                    return Leaf::Transposition { value: node_value };
                }
                if (edge_q as f64 - node_value as f64).abs() > TRANSPOSITION_Q_DIFF {
                    // Value that brings the edge mean onto the node's value.
                    let target = edge_visits as f32 * (node_value - edge_q) + edge_q;
                    return Leaf::Transposition {
                        value: target.clamp(-1.0, 1.0),
                    };
                }
            }
            id = child;
        }
    }

    /// State at the end of `self.actions`.
    fn replay(&self) -> S {
        let mut state = self.root_state.clone();
        for &a in &self.actions {
            state.do_action(a);
        }
        state
    }

    /// Create the node for the slot this thread just claimed.
    fn create_child(&mut self, parent: NodeId, idx: usize) -> Leaf<S> {
        let state = self.replay();
        let hash = state.hash_key();
        let legal = state.legal_actions();

        if let Some(outcome) = classify(&state, &legal) {
            let id = self.tree.push(Node::terminal(hash, outcome));
            self.tree.link(parent, idx, id);
            let value = self.tree.node(id).lock().proven_visit();
            return Leaf::Proven {
                value,
                outcome: Some(outcome),
            };
        }

        if !self.settings.use_transposition_table {
            let id = self.tree.push(Node::new(hash, legal));
            self.tree.link(parent, idx, id);
            return Leaf::New { id, state };
        }

        let (id, found) = self.tree.get_or_insert(hash, || Node::new(hash, legal));
        self.tree.link(parent, idx, id);
        if !found {
            return Leaf::New { id, state };
        }

        let node = self.tree.node(id);
        let d = node.lock();
        trace!(hash, "transposition hit");
        if !d.has_results() {
            Leaf::Collision
        } else if let Some(outcome) = d.exact_outcome() {
            Leaf::Proven {
                value: outcome.value(),
                outcome: Some(outcome),
            }
        } else {
            Leaf::Transposition { value: d.value() }
        }
    }

    fn queue_new_leaf(&mut self, id: NodeId, mut state: S, trajectory: Vec<Step>) {
        let checks: Option<Vec<bool>> = self.settings.enhance_checks.then(|| {
            let node = self.tree.node(id);
            let d = node.lock();
            d.actions().iter().map(|&a| state.gives_check(a)).collect()
        });
        let tablebase = state.tablebase();
        if tablebase.is_some() {
            self.stats.tb_hits += 1;
        }

        let minimax_value = if self.settings.minimax_at_leaf && self.settings.minimax_depth > 0 {
            let mut ab = AlphaBeta::new(self.evaluator, self.settings);
            match ab.run(&mut state, self.settings.minimax_depth) {
                Ok(line) => line.value,
                Err(e) => {
                    warn!(error = %e, "sub-search at leaf failed");
                    self.error.get_or_insert(e);
                    None
                }
            }
        } else {
            None
        };

        let start = self.inputs.len();
        self.inputs.resize(start + state.input_len(), 0.0);
        state.encode_into(&mut self.inputs[start..]);
        self.states.push(state);
        self.new_nodes.push(PendingLeaf {
            id,
            trajectory,
            checks,
            tablebase,
            minimax_value,
        });
        self.stats.new_nodes += 1;
    }

    /// Run the alpha-beta sub-search at `id`, whose latch this thread holds.
    ///
    /// Returns the child index of the best action and the sub-search value.
    fn run_minimax(&mut self, id: NodeId) -> Option<(usize, Option<f32>)> {
        self.stats.minimax_calls += 1;
        let mut state = self.replay();
        let mut ab = AlphaBeta::new(self.evaluator, self.settings);
        let line = match ab.run(&mut state, self.settings.minimax_depth) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "sub-search failed");
                self.error.get_or_insert(e);
                return None;
            }
        };
        let best = *line.pv.first()?;
        let idx = {
            let node = self.tree.node(id);
            let d = node.lock();
            d.actions().iter().position(|&a| a == best)?
        };
        debug!(
            node = id.index(),
            action = best,
            value = ?line.value,
            nodes = ab.nodes,
            "minimax sub-search"
        );
        Some((idx, line.value))
    }

    /// Evaluate the queued leaves and back every queued trajectory up.
    pub fn evaluate_and_backup(&mut self) {
        let leaves = mem::take(&mut self.new_nodes);
        if !leaves.is_empty() {
            let output = self.evaluate_batch(leaves.len());
            for (i, leaf) in leaves.iter().enumerate() {
                let value = match leaf.minimax_value {
                    Some(v) => v,
                    None => output.values.get(i).copied().map_or(0.0, sanitize_value),
                };
                let node = self.tree.node(leaf.id);
                // Tablebase hits back up the blended value.
                let value = {
                    let mut d = node.lock();
                    d.fill_results(
                        value,
                        output.policy(i),
                        leaf.checks.as_deref(),
                        true,
                        leaf.tablebase,
                        self.settings,
                    );
                    d.value()
                };
                self.backup_value(&leaf.trajectory, value, None);
            }
            self.stats.batches += 1;
            trace!(leaves = leaves.len(), "batch evaluated");
        }
        self.new_nodes = leaves;
        self.new_nodes.clear();
        self.states.clear();
        self.inputs.clear();

        for (trajectory, value) in mem::take(&mut self.transpositions) {
            self.backup_value(&trajectory, value, None);
        }
        for trajectory in mem::take(&mut self.collisions) {
            self.backup_collision(&trajectory);
        }
        self.terminals = 0;
    }

    /// One evaluator call for the whole batch. Failures are recorded and
    /// replaced by neutral results so every in-flight visit is resolved.
    fn evaluate_batch(&mut self, n: usize) -> EvalOutput {
        let batch = EvalBatch {
            inputs: &self.inputs,
            input_len: self.root_state.input_len(),
            states: &self.states,
        };
        let result = self
            .evaluator
            .evaluate_batch(&batch)
            .and_then(|out| out.check_shape(n).map(|()| out));
        match result {
            Ok(out) => out,
            Err(e) => {
                error!(error = %e, "evaluator failed, backing up neutral values");
                self.error.get_or_insert(e);
                EvalOutput::default()
            }
        }
    }

    /// Back `value` (point of view of the trajectory's last child) up to the root.
    fn backup_value(&self, trajectory: &[Step], value: f32, outcome: Option<Outcome>) {
        let mut value = value;
        let mut outcome = outcome;
        for &(id, idx) in trajectory.iter().rev() {
            let node = self.tree.node(id);
            let backed = node
                .lock()
                .backup(idx, self.settings.parent_value(value), outcome, self.settings);
            value = backed.value;
            outcome = backed.outcome;
        }
    }

    /// Remove the in-flight visits of a trajectory without changing values.
    fn backup_collision(&self, trajectory: &[Step]) {
        for &(id, idx) in trajectory.iter().rev() {
            self.tree.node(id).lock().revert_virtual_loss(idx);
        }
    }
}

/// Depth of an epsilon-greedy descent: `ceil(-log2(1 - r) - 1)` for a
/// uniform `r` in [0.01, 0.99].
fn random_depth(rng: &mut fastrand::Rng) -> usize {
    let r = rng.u32(1..100) as f64 / 100.0;
    (-(1.0 - r).log2() - 1.0).ceil().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::UniformEvaluator;
    use crate::game::{Connect4, TicTacToe};
    use crate::settings::{LeafEvaluation, PlayerMode};

    fn root_with_policy<S: GameState>(state: &S, policy: &[f32], settings: &SearchSettings) -> Tree {
        let node = Node::new(state.hash_key(), state.legal_actions());
        node.lock().fill_results(0.0, policy, None, false, None, settings);
        Tree::new(node)
    }

    fn root_tree(state: &TicTacToe, settings: &SearchSettings) -> Tree {
        root_with_policy(state, &[1.0 / 9.0; 9], settings)
    }

    #[test]
    fn test_random_depth_range() {
        let mut rng = fastrand::Rng::with_seed(1);
        for _ in 0..1000 {
            assert!(random_depth(&mut rng) <= 6);
        }
    }

    #[test]
    fn test_single_batch_creates_one_leaf() {
        let settings = SearchSettings::for_testing();
        let limits = SearchLimits::default();
        let stop = AtomicBool::new(false);
        let state = TicTacToe::new();
        let tree = root_tree(&state, &settings);
        let eval = UniformEvaluator::new(0.2);

        let mut thread = SearchThread::new(0, &tree, &state, &eval, &settings, &limits, &stop);
        thread.create_mini_batch();
        assert_eq!(thread.new_nodes.len(), 1);
        assert_eq!(tree.root_node().lock().child_virtual(0), 1);
        thread.evaluate_and_backup();

        let root = tree.root_node();
        let d = root.lock();
        assert_eq!(d.visits(), 1);
        assert_eq!(d.child_visits(0), 1);
        assert_eq!(d.child_virtual(0), 0);
        assert!((d.edge_q(0, 0.0) + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_collision_reverts_virtual_loss() {
        // O to move with two quiet moves left (7 and 8). A batch of three
        // creates both children, then keeps colliding with them.
        let settings = SearchSettings::for_testing().with_batch_size(3);
        let limits = SearchLimits::default();
        let stop = AtomicBool::new(false);
        let state = TicTacToe::from_actions(&[0, 2, 1, 3, 5, 4, 6]);
        let tree = root_tree(&state, &settings);
        let eval = UniformEvaluator::new(0.0);

        let mut thread = SearchThread::new(0, &tree, &state, &eval, &settings, &limits, &stop);
        thread.create_mini_batch();
        assert_eq!(thread.stats.new_nodes, 2);
        assert_eq!(thread.stats.collisions, 3);
        thread.evaluate_and_backup();

        let root = tree.root_node();
        let d = root.lock();
        assert_eq!(d.visits(), 2);
        assert_eq!((d.child_virtual(0), d.child_virtual(1)), (0, 0));
        assert_eq!((d.child_visits(0), d.child_visits(1)), (1, 1));
    }

    #[test]
    fn test_terminal_leaves_backed_up_immediately() {
        // X's last move fills the board.
        let settings = SearchSettings::for_testing().with_batch_size(2);
        let limits = SearchLimits::default();
        let stop = AtomicBool::new(false);
        let state = TicTacToe::from_actions(&[0, 1, 2, 4, 3, 5, 7, 6]);
        let tree = root_tree(&state, &settings);
        let eval = UniformEvaluator::new(0.0);

        let mut thread = SearchThread::new(0, &tree, &state, &eval, &settings, &limits, &stop);
        thread.create_mini_batch();
        assert_eq!(thread.stats.terminals, settings.terminal_node_cache() as u64);
        assert!(thread.new_nodes.is_empty());

        let root = tree.root_node();
        let d = root.lock();
        assert_eq!(d.visits(), 4);
        assert_eq!(d.child_virtual(0), 0);
        assert_eq!(d.exact_outcome(), Some(Outcome::Draw));
    }

    #[test]
    fn test_epsilon_checks_takes_unexplored_check() {
        // X holds columns 0 and 1 on the bottom row: 2 and 3 give check.
        let state = Connect4::from_actions(&[0, 0, 1, 1]);
        assert!(state.gives_check(2) && state.gives_check(3));
        assert!(!state.gives_check(0));
        let mut policy = [0.0; 7];
        policy[6] = 1.0;
        let limits = SearchLimits::default();
        let stop = AtomicBool::new(false);
        let eval = UniformEvaluator::new(0.0);

        let plain = SearchSettings::for_testing();
        let tree = root_with_policy(&state, &policy, &plain);
        let mut thread = SearchThread::new(0, &tree, &state, &eval, &plain, &limits, &stop);
        thread.create_mini_batch();
        thread.evaluate_and_backup();
        assert_eq!(tree.root_node().lock().child(2), Child::Empty);

        let checks = SearchSettings {
            epsilon_checks_counter: 1,
            ..SearchSettings::for_testing()
        };
        let tree = root_with_policy(&state, &policy, &checks);
        let mut thread = SearchThread::new(0, &tree, &state, &eval, &checks, &limits, &stop);
        thread.create_mini_batch();
        assert!(matches!(tree.root_node().lock().child(2), Child::Node(_)));
        thread.evaluate_and_backup();

        thread.create_mini_batch();
        assert!(matches!(tree.root_node().lock().child(3), Child::Node(_)));
        thread.evaluate_and_backup();
        assert!(!tree.root_node().lock().checks_inspected);

        // No checking move left at the root: selection falls back to PUCT.
        thread.create_mini_batch();
        thread.evaluate_and_backup();
        let root = tree.root_node();
        let d = root.lock();
        assert!(d.checks_inspected);
        assert_eq!((d.child_visits(2), d.child_visits(3)), (1, 1));
        assert_eq!(d.child_visits(6), 1);
    }

    #[test]
    fn test_transposition_catch_up_value() {
        let settings = SearchSettings::for_testing();
        let limits = SearchLimits::default();
        let stop = AtomicBool::new(false);
        let state = TicTacToe::new();
        let mut policy = [0.0; 9];
        policy[0] = 1.0;
        let tree = root_with_policy(&state, &policy, &settings);
        let eval = UniformEvaluator::new(0.0);

        // The node after action 0, valued 0.2 and reached from two parents.
        let child_state = TicTacToe::from_actions(&[0]);
        let child = Node::new(child_state.hash_key(), child_state.legal_actions());
        child
            .lock()
            .fill_results(0.2, &[1.0 / 9.0; 9], None, true, None, &settings);
        let id = tree.push(child);
        assert!(tree.root_node().lock().claim_child(0));
        tree.link(tree.root(), 0, id);
        tree.node(id).lock().add_parent();

        // Two earlier visits left the edge at -0.1 for the child.
        {
            let root = tree.root_node();
            let mut d = root.lock();
            d.child_visits[0] = 2;
            d.q_sum[0] = 0.2;
            d.visits = 2;
            d.value_sum = 0.2;
        }

        let mut thread = SearchThread::new(0, &tree, &state, &eval, &settings, &limits, &stop);
        thread.create_mini_batch();
        // 2 * (0.2 - (-0.1)) + (-0.1)
        assert_eq!(thread.stats.transpositions, 2);
        for (trajectory, value) in &thread.transpositions {
            assert_eq!(trajectory.as_slice(), &[(tree.root(), 0)]);
            assert!((value - 0.5).abs() < 1e-6, "{value}");
        }
        thread.evaluate_and_backup();

        let root = tree.root_node();
        let d = root.lock();
        assert_eq!(d.child_visits(0), 4);
        assert_eq!(d.child_virtual(0), 0);
        assert!((d.edge_q(0, 0.0) + 0.2).abs() < 1e-6);
        // The shared node is not descended into.
        assert_eq!(tree.node(id).lock().visits(), 1);
    }

    #[test]
    fn test_catch_up_value_is_clamped() {
        let settings = SearchSettings::for_testing();
        let limits = SearchLimits::default();
        let stop = AtomicBool::new(false);
        let state = TicTacToe::new();
        let mut policy = [0.0; 9];
        policy[0] = 1.0;
        let tree = root_with_policy(&state, &policy, &settings);
        let eval = UniformEvaluator::new(0.0);

        let child_state = TicTacToe::from_actions(&[0]);
        let child = Node::new(child_state.hash_key(), child_state.legal_actions());
        child
            .lock()
            .fill_results(0.9, &[1.0 / 9.0; 9], None, true, None, &settings);
        let id = tree.push(child);
        assert!(tree.root_node().lock().claim_child(0));
        tree.link(tree.root(), 0, id);
        tree.node(id).lock().add_parent();
        {
            let root = tree.root_node();
            let mut d = root.lock();
            d.child_visits[0] = 3;
            d.q_sum[0] = 0.6;
            d.visits = 3;
            d.value_sum = 0.6;
        }

        let mut thread = SearchThread::new(0, &tree, &state, &eval, &settings, &limits, &stop);
        thread.create_mini_batch();
        // 3 * (0.9 - (-0.2)) + (-0.2) is above the win value.
        assert!(!thread.transpositions.is_empty());
        assert!(thread.transpositions.iter().all(|(_, v)| *v == 1.0));
        thread.evaluate_and_backup();
    }

    #[test]
    fn test_minimax_at_leaf_replaces_evaluator_value() {
        let settings = SearchSettings {
            minimax_at_leaf: true,
            minimax_depth: 2,
            leaf_evaluation: LeafEvaluation::Rules,
            ..SearchSettings::for_testing()
        };
        let limits = SearchLimits::default();
        let stop = AtomicBool::new(false);
        let state = Connect4::from_actions(&[0, 0, 1, 1]);
        let tree = root_with_policy(&state, &[1.0 / 7.0; 7], &settings);
        let eval = UniformEvaluator::new(0.3);

        let mut thread = SearchThread::new(0, &tree, &state, &eval, &settings, &limits, &stop);
        thread.create_mini_batch();
        thread.evaluate_and_backup();

        // With no root visits every edge ties and the first one is taken.
        let mut leaf = Connect4::from_actions(&[0, 0, 1, 1, 0]);
        let expected = AlphaBeta::<Connect4>::new(&eval, &settings)
            .run(&mut leaf, 2)
            .unwrap()
            .value
            .unwrap();
        assert!((expected - 0.3).abs() > 1e-3);

        let root = tree.root_node();
        let Child::Node(id) = root.lock().child(0) else {
            panic!("leaf was not created");
        };
        assert!((tree.node(id).lock().value() - expected).abs() < 1e-6);
        assert!((root.lock().edge_q(0, 0.0) + expected).abs() < 1e-6);
    }

    #[test]
    fn test_single_player_values_keep_sign() {
        let settings = SearchSettings {
            player_mode: PlayerMode::SinglePlayer,
            ..SearchSettings::for_testing()
        };
        let limits = SearchLimits::default();
        let stop = AtomicBool::new(false);
        let state = TicTacToe::new();
        let tree = root_tree(&state, &settings);
        let eval = UniformEvaluator::new(0.5);

        // The second selection follows the first edge one ply deeper.
        let mut thread = SearchThread::new(0, &tree, &state, &eval, &settings, &limits, &stop);
        for _ in 0..2 {
            thread.create_mini_batch();
            thread.evaluate_and_backup();
        }
        assert_eq!(thread.stats.new_nodes, 2);
        assert_eq!(thread.stats.depth_max, 2);

        let root = tree.root_node();
        let d = root.lock();
        assert_eq!(d.child_visits(0), 2);
        assert!((d.edge_q(0, 0.0) - 0.5).abs() < 1e-6);
        assert!((d.value() - 0.5).abs() < 1e-6);

        let Child::Node(first) = d.child(0) else {
            panic!("first child missing");
        };
        let c = tree.node(first);
        let c = c.lock();
        assert_eq!(c.child_visits(0), 1);
        assert!((c.edge_q(0, 0.0) - 0.5).abs() < 1e-6);
        assert!((c.value() - 0.5).abs() < 1e-6);
    }
}
