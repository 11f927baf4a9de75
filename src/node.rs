//! Search tree vertices.
//!
//! A [`Node`] is one game position. Its mutable state lives in [`NodeData`]
//! behind a per-node mutex. Edge statistics (visits, value sums, in-flight
//! visits, proofs, minimax biases) are stored in the parent, one entry per
//! legal action, so a node shared by several parents through a transposition
//! keeps one set of own statistics while every incoming edge keeps its own.
//!
//! Values are always stored from the point of view of the side to move at the
//! node that owns them: `value_sum` for the node's position, `q_sum[i]` for the
//! parent choosing action `i`.

use parking_lot::{Mutex, MutexGuard};

use crate::constants::{DRAW_VALUE, LOSS_VALUE, WIN_VALUE};
use crate::evaluator::legal_priors;
use crate::game::{Action, Outcome};
use crate::settings::{BackupOperator, PlayerMode, SearchSettings, VirtualStyle};

/// Index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Content of a child slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Child {
    /// Never visited.
    Empty,
    /// A thread is creating the child node right now.
    Claimed,
    Node(NodeId),
}

/// Kind of a solved node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proof {
    Win,
    Loss,
    Draw,
    /// Result known from an endgame table; may still be upgraded to an exact proof.
    Tablebase(Outcome),
}

impl Proof {
    fn exact(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Win => Proof::Win,
            Outcome::Draw => Proof::Draw,
            Outcome::Loss => Proof::Loss,
        }
    }

    /// Outcome for the side to move if the proof is exact.
    pub fn outcome(self) -> Option<Outcome> {
        match self {
            Proof::Win => Some(Outcome::Win),
            Proof::Draw => Some(Outcome::Draw),
            Proof::Loss => Some(Outcome::Loss),
            Proof::Tablebase(_) => None,
        }
    }
}

/// Lifecycle of a node.
///
/// `Pending -> Unsolved -> MinimaxPending -> MinimaxDone`, and from any
/// evaluated state into `Solved`, which is absorbing except for the upgrade of
/// a tablebase result to an exact proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created, waiting for its evaluator results.
    Pending,
    Unsolved,
    /// A thread claimed the alpha-beta sub-search for this node.
    MinimaxPending,
    MinimaxDone,
    Solved(Proof),
}

/// Result of backing a value up through one edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backed {
    /// Value to hand to the parent, from this node's point of view.
    pub value: f32,
    /// Exact result of this node, if proven.
    pub outcome: Option<Outcome>,
}

/// Mutable state of a node, guarded by the node's lock.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub(crate) actions: Vec<Action>,
    pub(crate) priors: Vec<f32>,
    pub(crate) children: Vec<Child>,
    /// Real visits through each edge.
    pub(crate) child_visits: Vec<u32>,
    /// In-flight visits through each edge.
    pub(crate) child_virtual: Vec<u32>,
    /// Sum of backed-up values through each edge, parent's point of view.
    pub(crate) q_sum: Vec<f64>,
    /// Known result of each child, child's point of view.
    pub(crate) child_proof: Vec<Option<Outcome>>,
    /// Value installed by the alpha-beta sub-search, parent's point of view.
    pub(crate) bias: Vec<Option<f32>>,
    pub(crate) visits: u32,
    pub(crate) virtual_total: u32,
    pub(crate) value_sum: f64,
    /// Value the node was created with (evaluator or terminal value).
    pub(crate) init_value: f32,
    /// First slot that was never claimed; only moves forward.
    pub(crate) no_visit_idx: usize,
    /// Number of parents linking to this node.
    pub(crate) parents: u32,
    pub(crate) status: Status,
    /// Set once epsilon-checks found no unexplored checking move here.
    pub(crate) checks_inspected: bool,
}

/// A vertex of the search graph.
#[derive(Debug)]
pub struct Node {
    hash: u64,
    data: Mutex<NodeData>,
}

impl Node {
    /// A node waiting for evaluation with one slot per legal action.
    pub fn new(hash: u64, actions: Vec<Action>) -> Self {
        let n = actions.len();
        Self {
            hash,
            data: Mutex::new(NodeData {
                actions,
                priors: vec![0.0; n],
                children: vec![Child::Empty; n],
                child_visits: vec![0; n],
                child_virtual: vec![0; n],
                q_sum: vec![0.0; n],
                child_proof: vec![None; n],
                bias: vec![None; n],
                visits: 0,
                virtual_total: 0,
                value_sum: 0.0,
                init_value: 0.0,
                no_visit_idx: 0,
                parents: 0,
                status: Status::Pending,
                checks_inspected: false,
            }),
        }
    }

    /// A terminal node. It has no children and counts as evaluated.
    pub fn terminal(hash: u64, outcome: Outcome) -> Self {
        let node = Self::new(hash, Vec::new());
        {
            let mut d = node.data.lock();
            d.init_value = outcome.value();
            d.status = Status::Solved(Proof::exact(outcome));
        }
        node
    }

    pub(crate) fn from_data(hash: u64, data: NodeData) -> Self {
        Self {
            hash,
            data: Mutex::new(data),
        }
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, NodeData> {
        self.data.lock()
    }

    pub fn hash_key(&self) -> u64 {
        self.hash
    }
}

impl NodeData {
    pub fn has_results(&self) -> bool {
        self.status != Status::Pending
    }

    pub fn is_terminal(&self) -> bool {
        self.actions.is_empty() && self.has_results()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Exact proven result for the side to move.
    pub fn exact_outcome(&self) -> Option<Outcome> {
        match self.status {
            Status::Solved(proof) => proof.outcome(),
            _ => None,
        }
    }

    pub fn visits(&self) -> u32 {
        self.visits
    }

    pub fn num_children(&self) -> usize {
        self.actions.len()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn priors(&self) -> &[f32] {
        &self.priors
    }

    pub fn child(&self, idx: usize) -> Child {
        self.children[idx]
    }

    pub fn child_visits(&self, idx: usize) -> u32 {
        self.child_visits[idx]
    }

    pub fn child_virtual(&self, idx: usize) -> u32 {
        self.child_virtual[idx]
    }

    pub fn child_outcome(&self, idx: usize) -> Option<Outcome> {
        self.child_proof[idx]
    }

    pub fn bias(&self, idx: usize) -> Option<f32> {
        self.bias[idx]
    }

    pub fn no_visit_idx(&self) -> usize {
        self.no_visit_idx
    }

    pub fn parents(&self) -> u32 {
        self.parents
    }

    pub fn is_fully_expanded(&self) -> bool {
        self.no_visit_idx >= self.actions.len()
    }

    /// Mean value of the node for its side to move.
    ///
    /// Exact proofs override the statistics.
    pub fn value(&self) -> f32 {
        if let Some(outcome) = self.exact_outcome() {
            return outcome.value();
        }
        if self.visits == 0 {
            self.init_value
        } else {
            (self.value_sum / self.visits as f64) as f32
        }
    }

    /// Mean value of edge `idx` from this node's point of view, ignoring
    /// in-flight visits.
    pub fn edge_q(&self, idx: usize, q_init: f32) -> f32 {
        match self.child_visits[idx] {
            0 => q_init,
            n => (self.q_sum[idx] / n as f64) as f32,
        }
    }

    /// Install the evaluator's results.
    ///
    /// `checks` flags the actions giving check, used by move enhancement.
    /// `own_visit` is false for the root, whose evaluation does not count as a
    /// visit. A `tablebase` result marks the node as a tablebase hit and
    /// averages the known value into the evaluator's.
    pub fn fill_results(
        &mut self,
        value: f32,
        policy: &[f32],
        checks: Option<&[bool]>,
        own_visit: bool,
        tablebase: Option<Outcome>,
        settings: &SearchSettings,
    ) {
        assert_eq!(self.status, Status::Pending, "node already has results");

        let value = match tablebase {
            Some(outcome) => (value + outcome.value()) / 2.0,
            None => value,
        };
        self.priors = legal_priors(policy, &self.actions);
        if settings.enhance_checks {
            if let Some(checks) = checks {
                enhance_checks(&mut self.priors, checks, settings);
            }
        }
        apply_temperature(&mut self.priors, settings.node_policy_temperature);

        self.init_value = value;
        if own_visit {
            self.visits += 1;
            self.value_sum += value as f64;
        }
        self.status = match tablebase {
            Some(outcome) => Status::Solved(Proof::Tablebase(outcome)),
            None => Status::Unsolved,
        };
    }

    /// Virtual style in effect at the current visit count.
    fn effective_style(&self, settings: &SearchSettings) -> VirtualStyle {
        match settings.virtual_style {
            VirtualStyle::Mix if self.visits < settings.virtual_mix_threshold => VirtualStyle::Loss,
            VirtualStyle::Mix => VirtualStyle::Visit,
            style => style,
        }
    }

    /// Q-value and visit count of edge `idx` as seen by selection, with
    /// in-flight visits and the minimax bias applied.
    fn selection_stats(&self, idx: usize, style: VirtualStyle, settings: &SearchSettings) -> (f32, u32) {
        let n = self.child_visits[idx];
        let vc = self.child_virtual[idx];
        let s = self.q_sum[idx] as f32;
        let vl = settings.virtual_loss * vc as f32;

        let (mut q, n_eff) = match style {
            VirtualStyle::Loss | VirtualStyle::Mix => match n + vc {
                0 => (settings.q_init, 0),
                total => ((s - vl) / total as f32, total),
            },
            VirtualStyle::Visit => match n {
                0 => (settings.q_init, vc),
                _ => (s / n as f32, n + vc),
            },
            VirtualStyle::Offset => match n {
                0 => (settings.q_init - vl, 0),
                _ => ((s - vl) / n as f32, n),
            },
        };
        if let Some(b) = self.bias[idx] {
            let w = settings.minimax_weight;
            q = (q * n_eff as f32 + b * w) / (n_eff as f32 + w);
        }
        if self.child_proof[idx] == Some(Outcome::Draw) {
            q = DRAW_VALUE;
        }
        (q, n_eff)
    }

    /// Exploration constant growing slowly with the parent's visits.
    fn cpuct(&self, settings: &SearchSettings) -> f32 {
        let n = self.visits as f32;
        settings.cpuct_init + ((n + settings.cpuct_base + 1.0) / settings.cpuct_base).ln()
    }

    /// Child index maximizing the PUCT score. Ties go to the lowest index.
    ///
    /// A child proven lost for its side to move is taken immediately and
    /// children proven won are avoided.
    pub fn select_child(&self, settings: &SearchSettings) -> usize {
        assert!(
            self.has_results() && !self.actions.is_empty(),
            "select_child on a node without evaluated children"
        );
        if let Some(idx) = self.child_proof.iter().position(|p| *p == Some(Outcome::Loss)) {
            return idx;
        }

        let style = self.effective_style(settings);
        let parent_n = match style {
            VirtualStyle::Offset => self.visits,
            _ => self.visits + self.virtual_total,
        };
        let c = self.cpuct(settings) * (parent_n as f32).sqrt();

        let mut best = 0;
        let mut best_score = f32::NEG_INFINITY;
        for idx in 0..self.actions.len() {
            let score = if self.child_proof[idx] == Some(Outcome::Win) {
                f32::MIN
            } else {
                let (q, n) = self.selection_stats(idx, style, settings);
                q + c * self.priors[idx] / (1.0 + n as f32)
            };
            if score > best_score {
                best_score = score;
                best = idx;
            }
        }
        best
    }

    /// Register an in-flight visit through edge `idx`.
    pub fn apply_virtual_loss(&mut self, idx: usize) {
        self.child_virtual[idx] += 1;
        self.virtual_total += 1;
    }

    /// Remove an in-flight visit without touching the statistics.
    pub fn revert_virtual_loss(&mut self, idx: usize) {
        debug_assert!(self.child_virtual[idx] > 0, "no virtual loss to revert");
        self.child_virtual[idx] -= 1;
        self.virtual_total -= 1;
    }

    /// Take the empty slot `idx` for creation. Returns false if it is not empty.
    pub fn claim_child(&mut self, idx: usize) -> bool {
        if self.children[idx] != Child::Empty {
            return false;
        }
        self.children[idx] = Child::Claimed;
        while self.no_visit_idx < self.children.len() && self.children[self.no_visit_idx] != Child::Empty {
            self.no_visit_idx += 1;
        }
        true
    }

    /// Attach `id` to the slot claimed before.
    pub fn set_child(&mut self, idx: usize, id: NodeId) {
        assert_eq!(self.children[idx], Child::Claimed, "child slot {idx} was not claimed");
        self.children[idx] = Child::Node(id);
    }

    pub(crate) fn add_parent(&mut self) {
        self.parents += 1;
    }

    /// Count one more visit of a terminal or solved node and return its value.
    pub fn proven_visit(&mut self) -> f32 {
        let value = self.value();
        self.visits += 1;
        self.value_sum += value as f64;
        value
    }

    /// Back up `value` (this node's point of view) through edge `idx`.
    ///
    /// Consumes the in-flight visit applied during selection. `child_outcome`
    /// is the child's proven result, if any, and feeds the solver.
    pub fn backup(
        &mut self,
        idx: usize,
        value: f32,
        child_outcome: Option<Outcome>,
        settings: &SearchSettings,
    ) -> Backed {
        self.revert_virtual_loss(idx);
        self.child_visits[idx] += 1;
        self.q_sum[idx] += value as f64;
        self.visits += 1;
        self.value_sum += value as f64;

        if settings.mcts_solver && child_outcome.is_some() && self.child_proof[idx].is_none() {
            self.child_proof[idx] = child_outcome;
        }
        let outcome = self.solve(settings);

        let value = match (outcome, settings.backup_operator) {
            (Some(outcome), _) => outcome.value(),
            (None, BackupOperator::Mean) => value,
            (None, BackupOperator::PowerMean) => self.power_mean(settings.power_mean),
        };
        Backed { value, outcome }
    }

    /// Derive this node's proof from its children's, if the solver is on.
    pub fn solve(&mut self, settings: &SearchSettings) -> Option<Outcome> {
        if let Some(outcome) = self.exact_outcome() {
            return Some(outcome);
        }
        if !settings.mcts_solver || settings.player_mode == PlayerMode::SinglePlayer || self.actions.is_empty() {
            return None;
        }

        let outcome = if self.child_proof.contains(&Some(Outcome::Loss)) {
            Outcome::Win
        } else if self.child_proof.iter().all(Option::is_some) {
            if self.child_proof.iter().all(|p| *p == Some(Outcome::Win)) {
                Outcome::Loss
            } else {
                Outcome::Draw
            }
        } else {
            return None;
        };
        self.status = Status::Solved(Proof::exact(outcome));
        Some(outcome)
    }

    /// Visit-weighted power mean of the visited edges, mapped through [0, 1].
    pub fn power_mean(&self, p: f32) -> f32 {
        let mut num = 0.0f64;
        let mut total = 0u64;
        for idx in 0..self.actions.len() {
            let n = self.child_visits[idx];
            if n == 0 {
                continue;
            }
            let q = ((self.q_sum[idx] / n as f64 + 1.0) / 2.0).clamp(0.0, 1.0);
            num += n as f64 * q.powf(p as f64);
            total += n as u64;
        }
        if total == 0 {
            return self.value();
        }
        let mean = (num / total as f64).powf(1.0 / p as f64);
        (mean * 2.0 - 1.0).clamp(LOSS_VALUE as f64, WIN_VALUE as f64) as f32
    }

    /// Claim the alpha-beta sub-search if this node reached the switching
    /// threshold and never ran it.
    pub fn claim_minimax(&mut self, settings: &SearchSettings) -> bool {
        if settings.switching_at_visits == 0
            || self.status != Status::Unsolved
            || self.visits < settings.switching_at_visits
        {
            return false;
        }
        self.status = Status::MinimaxPending;
        true
    }

    /// Release the sub-search latch, installing `bias` as `(edge, value)`.
    pub fn finish_minimax(&mut self, bias: Option<(usize, f32)>) {
        if let Some((idx, value)) = bias {
            self.bias[idx] = Some(value);
        }
        if self.status == Status::MinimaxPending {
            self.status = Status::MinimaxDone;
        }
    }

    /// Index of the existing child with the most real visits.
    pub fn most_visited_child(&self) -> Option<usize> {
        (0..self.children.len())
            .filter(|&i| matches!(self.children[i], Child::Node(_)))
            .max_by_key(|&i| (self.child_visits[i], std::cmp::Reverse(i)))
    }

    /// Index of the move to play: a proven win if one exists, otherwise the
    /// most visited edge.
    pub fn best_child(&self) -> Option<usize> {
        if let Some(idx) = self.child_proof.iter().position(|p| *p == Some(Outcome::Loss)) {
            return Some(idx);
        }
        (0..self.actions.len())
            .filter(|&i| self.child_visits[i] > 0)
            .max_by_key(|&i| {
                let avoid = self.child_proof[i] == Some(Outcome::Win);
                (!avoid, self.child_visits[i], std::cmp::Reverse(i))
            })
    }

    /// Slot chosen by a random playout: a uniformly random child once every
    /// slot was tried, otherwise the first untried slot.
    pub fn random_playout_idx(&self, rng: &mut fastrand::Rng) -> usize {
        if self.is_fully_expanded() {
            rng.usize(..self.actions.len())
        } else {
            self.no_visit_idx
        }
    }

    /// First never-visited child whose action gives check, per `gives_check`.
    pub fn unexplored_check(&self, gives_check: impl Fn(Action) -> bool) -> Option<usize> {
        (0..self.actions.len())
            .find(|&i| self.children[i] == Child::Empty && gives_check(self.actions[i]))
    }

    /// Clear in-flight counters; used when a sub-tree is carried over.
    pub(crate) fn clear_virtual(&mut self) {
        self.child_virtual.iter_mut().for_each(|v| *v = 0);
        self.virtual_total = 0;
        if self.status == Status::MinimaxPending {
            self.status = Status::Unsolved;
        }
    }
}

/// Boost low-prior checking moves and renormalize.
fn enhance_checks(priors: &mut [f32], checks: &[bool], settings: &SearchSettings) {
    let mut changed = false;
    for (p, &check) in priors.iter_mut().zip(checks) {
        if check && *p < settings.check_threshold {
            *p += settings.check_factor;
            changed = true;
        }
    }
    if changed {
        normalize(priors);
    }
}

fn apply_temperature(priors: &mut [f32], temperature: f32) {
    if temperature <= 0.0 || (temperature - 1.0).abs() < f32::EPSILON {
        return;
    }
    let exp = 1.0 / temperature;
    priors.iter_mut().for_each(|p| *p = p.powf(exp));
    normalize(priors);
}

fn normalize(priors: &mut [f32]) {
    let sum: f32 = priors.iter().sum();
    if sum > 0.0 {
        priors.iter_mut().for_each(|p| *p /= sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluated(n: usize, settings: &SearchSettings) -> Node {
        let node = Node::new(0, (0..n as Action).collect());
        node.lock()
            .fill_results(0.0, &vec![1.0 / n as f32; n], None, false, None, settings);
        node
    }

    #[test]
    fn test_uniform_selection_spreads_visits() {
        let settings = SearchSettings::for_testing();
        let node = evaluated(3, &settings);
        let mut d = node.lock();
        let mut picked = Vec::new();
        for _ in 0..3 {
            let idx = d.select_child(&settings);
            assert!(d.claim_child(idx) || d.child(idx) != Child::Empty);
            d.apply_virtual_loss(idx);
            d.backup(idx, -0.2, None, &settings);
            picked.push(idx);
        }
        assert_eq!(picked, vec![0, 1, 2]);
        assert_eq!(d.visits(), 3);
        assert!((0..3).all(|i| d.child_visits(i) == 1));
    }

    #[test]
    fn test_virtual_loss_revert_is_exact() {
        for style in [
            VirtualStyle::Loss,
            VirtualStyle::Visit,
            VirtualStyle::Offset,
            VirtualStyle::Mix,
        ] {
            let settings = SearchSettings {
                virtual_style: style,
                ..SearchSettings::for_testing()
            };
            let node = evaluated(4, &settings);
            let mut d = node.lock();
            for _ in 0..5 {
                let idx = d.select_child(&settings);
                d.apply_virtual_loss(idx);
                d.backup(idx, 0.3, None, &settings);
            }
            let before = d.clone();
            let first = d.select_child(&settings);
            d.apply_virtual_loss(first);
            let second = d.select_child(&settings);
            d.apply_virtual_loss(second);
            d.revert_virtual_loss(second);
            d.revert_virtual_loss(first);
            assert_eq!(*d, before, "{style:?}");
        }
    }

    #[test]
    fn test_virtual_loss_discourages_same_child() {
        let settings = SearchSettings::for_testing();
        let node = evaluated(2, &settings);
        let mut d = node.lock();
        let first = d.select_child(&settings);
        d.apply_virtual_loss(first);
        assert_ne!(d.select_child(&settings), first);
    }

    #[test]
    fn test_solver_win_from_lost_child() {
        let settings = SearchSettings::for_testing();
        let node = evaluated(3, &settings);
        let mut d = node.lock();
        d.apply_virtual_loss(2);
        let backed = d.backup(2, 1.0, Some(Outcome::Loss), &settings);
        assert_eq!(backed.outcome, Some(Outcome::Win));
        assert_eq!(backed.value, WIN_VALUE);
        assert_eq!(d.status(), Status::Solved(Proof::Win));
        assert_eq!(d.select_child(&settings), 2);
    }

    #[test]
    fn test_solver_loss_and_draw() {
        let settings = SearchSettings::for_testing();
        let lost = evaluated(2, &settings);
        let mut d = lost.lock();
        for i in 0..2 {
            d.apply_virtual_loss(i);
            d.backup(i, -1.0, Some(Outcome::Win), &settings);
        }
        assert_eq!(d.exact_outcome(), Some(Outcome::Loss));
        drop(d);

        let drawn = evaluated(2, &settings);
        let mut d = drawn.lock();
        d.apply_virtual_loss(0);
        d.backup(0, -1.0, Some(Outcome::Win), &settings);
        assert_eq!(d.exact_outcome(), None);
        d.apply_virtual_loss(1);
        d.backup(1, 0.0, Some(Outcome::Draw), &settings);
        assert_eq!(d.exact_outcome(), Some(Outcome::Draw));
    }

    #[test]
    fn test_solved_never_reverts() {
        let settings = SearchSettings::for_testing();
        let node = evaluated(2, &settings);
        let mut d = node.lock();
        d.apply_virtual_loss(0);
        d.backup(0, 1.0, Some(Outcome::Loss), &settings);
        for _ in 0..10 {
            d.apply_virtual_loss(1);
            let backed = d.backup(1, -0.9, None, &settings);
            assert_eq!(backed.value, WIN_VALUE);
        }
        assert_eq!(d.status(), Status::Solved(Proof::Win));
        assert_eq!(d.value(), WIN_VALUE);
    }

    #[test]
    fn test_solver_disabled() {
        let settings = SearchSettings::for_testing().with_solver(false);
        let node = evaluated(1, &settings);
        let mut d = node.lock();
        d.apply_virtual_loss(0);
        let backed = d.backup(0, 1.0, Some(Outcome::Loss), &settings);
        assert_eq!(backed.outcome, None);
        assert_eq!(d.status(), Status::Unsolved);
    }

    #[test]
    fn test_tablebase_upgrade() {
        let settings = SearchSettings::for_testing();
        let node = Node::new(0, vec![0, 1]);
        let mut d = node.lock();
        d.fill_results(0.0, &[0.5, 0.5], None, true, Some(Outcome::Win), &settings);
        assert_eq!(d.status(), Status::Solved(Proof::Tablebase(Outcome::Win)));
        assert!((d.value() - 0.5).abs() < 1e-6);
        d.apply_virtual_loss(1);
        d.backup(1, 1.0, Some(Outcome::Loss), &settings);
        assert_eq!(d.status(), Status::Solved(Proof::Win));
    }

    #[test]
    fn test_terminal_node() {
        let node = Node::terminal(7, Outcome::Loss);
        let mut d = node.lock();
        assert!(d.is_terminal());
        assert_eq!(d.proven_visit(), LOSS_VALUE);
        assert_eq!(d.visits(), 1);
    }

    #[test]
    fn test_minimax_latch_and_bias() {
        let settings = SearchSettings::for_testing().with_minimax(2, 2);
        let node = evaluated(2, &settings);
        let mut d = node.lock();
        assert!(!d.claim_minimax(&settings));
        for _ in 0..2 {
            d.apply_virtual_loss(0);
            d.backup(0, 0.0, None, &settings);
        }
        assert!(d.claim_minimax(&settings));
        assert!(!d.claim_minimax(&settings));
        d.finish_minimax(Some((1, 0.8)));
        assert_eq!(d.status(), Status::MinimaxDone);
        assert_eq!(d.bias(1), Some(0.8));
        assert_eq!(d.select_child(&settings), 1);
    }

    #[test]
    fn test_enhance_checks_and_temperature() {
        let settings = SearchSettings {
            enhance_checks: true,
            node_policy_temperature: 2.0,
            ..SearchSettings::for_testing()
        };
        let node = Node::new(0, vec![0, 1]);
        let mut d = node.lock();
        d.fill_results(0.0, &[0.95, 0.05], Some(&[false, true]), true, None, &settings);
        let p = d.priors();
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        // 0.55 / 1.5 boosted, then flattened by the temperature.
        assert!(p[1] > 0.4 && p[1] < 0.5);
    }

    #[test]
    fn test_claim_advances_no_visit_idx() {
        let settings = SearchSettings::for_testing();
        let node = evaluated(3, &settings);
        let mut d = node.lock();
        assert!(d.claim_child(1));
        assert_eq!(d.no_visit_idx(), 0);
        assert!(d.claim_child(0));
        assert_eq!(d.no_visit_idx(), 2);
        assert!(!d.claim_child(0));
        d.set_child(0, NodeId(4));
        assert_eq!(d.child(0), Child::Node(NodeId(4)));
    }

    #[test]
    fn test_power_mean_leans_to_best_edge() {
        let settings = SearchSettings::for_testing();
        let node = evaluated(2, &settings);
        let mut d = node.lock();
        d.apply_virtual_loss(0);
        d.backup(0, 0.8, None, &settings);
        d.apply_virtual_loss(1);
        d.backup(1, -0.8, None, &settings);
        assert!(d.power_mean(3.0) > 0.0);
        assert!(d.power_mean(1.0).abs() < 1e-5);
    }
}
