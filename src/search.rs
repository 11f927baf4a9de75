//! Search coordinator.
//!
//! [`Searcher`] owns the root position, the search graph, and the evaluator.
//! `run_search` evaluates the root if needed, runs N [`SearchThread`]s on
//! scoped OS threads sharing the graph, enforces the move time, and blocks
//! until every thread has stopped.

use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::constants::POLL_INTERVAL_MS;
use crate::evaluator::{sanitize_value, EvalBatch, Evaluator, EvaluatorError};
use crate::game::{classify, Action, GameState, Outcome};
use crate::node::{Child, Node};
use crate::search_thread::{SearchThread, ThreadStats};
use crate::settings::{SearchLimits, SearchSettings};
use crate::tree::{BestLine, Tree};

/// Errors that can end a search.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("No root position set")]
    NoRoot,

    #[error("Root position is already decided: {0:?}")]
    TerminalRoot(Outcome),

    #[error("Action {0} is not legal in the root position")]
    IllegalAction(Action),

    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),
}

/// Summary of a finished search.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub best_action: Option<Action>,
    /// Root value for the side to move.
    pub value: f32,
    pub root_visits: u32,
    /// Nodes in the graph.
    pub nodes: usize,
    pub elapsed: Duration,
    /// Selections per second.
    pub nps: f64,
    pub depth_avg: f64,
    pub depth_max: usize,
    /// Exact result of the root, if the solver proved it.
    pub solved: Option<Outcome>,
    pub stats: ThreadStats,
}

/// Handle that stops a running search from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Multi-threaded search over one root position.
pub struct Searcher<S: GameState, E: Evaluator<S>> {
    evaluator: E,
    settings: SearchSettings,
    limits: SearchLimits,
    root_state: Option<S>,
    tree: Option<Tree>,
    stop: Arc<AtomicBool>,
}

impl<S: GameState, E: Evaluator<S>> Searcher<S, E> {
    pub fn new(evaluator: E, settings: SearchSettings) -> Self {
        Self {
            evaluator,
            settings,
            limits: SearchLimits::default(),
            root_state: None,
            tree: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Replace the settings. The graph is kept.
    pub fn set_settings(&mut self, settings: SearchSettings) {
        self.settings = settings;
    }

    pub fn limits(&self) -> &SearchLimits {
        &self.limits
    }

    pub fn set_search_limits(&mut self, limits: SearchLimits) {
        self.limits = limits;
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn root_state(&self) -> Option<&S> {
        self.root_state.as_ref()
    }

    pub fn tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }

    /// Start from `state` with an empty graph.
    pub fn set_root_state(&mut self, state: S) {
        self.root_state = Some(state);
        self.tree = None;
    }

    /// Play `action` from the root and make its node the new root.
    ///
    /// The sub-graph below that node is kept when it was already evaluated;
    /// returns whether it was.
    pub fn set_root_node(&mut self, action: Action) -> Result<bool, SearchError> {
        let state = self.root_state.as_mut().ok_or(SearchError::NoRoot)?;
        if !state.legal_actions().contains(&action) {
            return Err(SearchError::IllegalAction(action));
        }
        state.do_action(action);

        let kept = self.tree.as_ref().and_then(|tree| {
            let child = {
                let root = tree.root_node();
                let d = root.lock();
                let idx = d.actions().iter().position(|&a| a == action)?;
                d.child(idx)
            };
            let Child::Node(id) = child else {
                return None;
            };
            let usable = {
                let node = tree.node(id);
                let c = node.lock();
                c.has_results() && !c.is_terminal()
            };
            usable.then(|| tree.subtree(id))
        });
        let reused = kept.is_some();
        if let Some(tree) = &kept {
            debug!(nodes = tree.len(), action, "kept sub-tree");
        }
        self.tree = kept;
        Ok(reused)
    }

    /// Handle for stopping a search from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// Ask the running search to stop. Threads finish their current batch.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Principal line and root statistics of the current graph.
    pub fn get_best_line(&self) -> Option<BestLine> {
        self.tree.as_ref().map(|tree| tree.best_line(&self.settings))
    }

    /// Search with `threads` workers until a limit is hit, the root is
    /// solved, or [`Searcher::stop`] is called.
    pub fn run_search(&mut self, threads: usize) -> Result<SearchReport, SearchError> {
        let state = self.root_state.as_ref().ok_or(SearchError::NoRoot)?;
        let legal = state.legal_actions();
        if let Some(outcome) = classify(state, &legal) {
            return Err(SearchError::TerminalRoot(outcome));
        }
        let tree: &Tree = self
            .tree
            .get_or_insert_with(|| Tree::new(Node::new(state.hash_key(), legal)));
        let (evaluator, settings, limits) = (&self.evaluator, &self.settings, &self.limits);
        evaluate_root(tree, state, evaluator, settings)?;

        let stop: &AtomicBool = &self.stop;
        stop.store(false, Ordering::Relaxed);
        let threads = threads.max(1);
        let start = Instant::now();

        let results: Vec<Result<ThreadStats, EvaluatorError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|i| {
                    scope.spawn(move || {
                        SearchThread::new(i, tree, state, evaluator, settings, limits, stop).run()
                    })
                })
                .collect();

            while !handles.iter().all(|h| h.is_finished()) {
                if limits.movetime.is_some_and(|t| start.elapsed() >= t) {
                    stop.store(true, Ordering::Relaxed);
                }
                thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| panic::resume_unwind(e)))
                .collect()
        });

        let mut stats = ThreadStats::default();
        for result in results {
            stats.merge(&result?);
        }

        let elapsed = start.elapsed();
        let line = tree.best_line(settings);
        let solved = tree.root_node().lock().exact_outcome();
        let selections = stats.selections();
        let report = SearchReport {
            best_action: line.actions.first().copied(),
            value: line.value,
            root_visits: line.visits,
            nodes: tree.len(),
            elapsed,
            nps: selections as f64 / elapsed.as_secs_f64().max(1e-9),
            depth_avg: if selections > 0 {
                stats.depth_sum as f64 / selections as f64
            } else {
                0.0
            },
            depth_max: stats.depth_max,
            solved,
            stats,
        };
        info!(
            best = ?report.best_action,
            value = report.value,
            visits = report.root_visits,
            nodes = report.nodes,
            nps = report.nps as u64,
            depth = report.depth_max,
            solved = ?report.solved,
            threads,
            "search finished"
        );
        Ok(report)
    }
}

/// Give the root its evaluator results if it has none yet.
///
/// The root's evaluation does not count as a visit.
fn evaluate_root<S: GameState, E: Evaluator<S>>(
    tree: &Tree,
    state: &S,
    evaluator: &E,
    settings: &SearchSettings,
) -> Result<(), EvaluatorError> {
    let root = tree.root_node();
    let actions = {
        let d = root.lock();
        if d.has_results() {
            return Ok(());
        }
        d.actions().to_vec()
    };

    let mut inputs = vec![0.0; state.input_len()];
    state.encode_into(&mut inputs);
    let batch = EvalBatch {
        inputs: &inputs,
        input_len: inputs.len(),
        states: std::slice::from_ref(state),
    };
    let out = evaluator.evaluate_batch(&batch)?;
    out.check_shape(1)?;
    let value = sanitize_value(out.values[0]);
    let checks: Option<Vec<bool>> = settings
        .enhance_checks
        .then(|| actions.iter().map(|&a| state.gives_check(a)).collect());

    root.lock().fill_results(
        value,
        out.policy(0),
        checks.as_deref(),
        false,
        state.tablebase(),
        settings,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::UniformEvaluator;
    use crate::game::TicTacToe;

    fn searcher() -> Searcher<TicTacToe, UniformEvaluator> {
        Searcher::new(UniformEvaluator::new(0.0), SearchSettings::for_testing())
    }

    #[test]
    fn test_no_root() {
        assert!(matches!(searcher().run_search(1), Err(SearchError::NoRoot)));
    }

    #[test]
    fn test_terminal_root() {
        let mut s = searcher();
        s.set_root_state(TicTacToe::from_actions(&[0, 3, 1, 4, 2]));
        assert!(matches!(
            s.run_search(1),
            Err(SearchError::TerminalRoot(Outcome::Loss))
        ));
    }

    #[test]
    fn test_simulation_limit() {
        let mut s = searcher();
        s.set_root_state(TicTacToe::new());
        s.set_search_limits(SearchLimits::simulations(50));
        let report = s.run_search(1).unwrap();
        assert_eq!(report.root_visits, 50);
        assert!(!s.stop_handle().is_stopped());
        assert!(report.best_action.is_some());
        assert!(report.nodes > report.stats.new_nodes as usize);
    }

    #[test]
    fn test_stop_handle_ends_unbounded_search() {
        let mut s = searcher();
        s.set_root_state(TicTacToe::new());
        let handle = s.stop_handle();
        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(30));
                handle.stop();
            });
            // Tic-tac-toe may get solved before the stop arrives; both end the search.
            let report = s.run_search(2).unwrap();
            assert!(report.root_visits > 0);
        });
        assert!(handle.is_stopped());
    }

    #[test]
    fn test_movetime() {
        let mut s = Searcher::new(UniformEvaluator::new(0.0), SearchSettings::for_testing());
        s.set_root_state(crate::game::Connect4::new());
        s.set_search_limits(SearchLimits::movetime(20));
        let report = s.run_search(2).unwrap();
        assert!(report.elapsed >= Duration::from_millis(20));
        assert!(report.root_visits > 0);
    }

    #[test]
    fn test_set_root_node_reuses_subtree() {
        let mut s = searcher();
        s.set_root_state(TicTacToe::new());
        s.set_search_limits(SearchLimits::simulations(200));
        s.run_search(1).unwrap();

        let best = s.get_best_line().unwrap().actions[0];
        let old_len = s.tree().unwrap().len();
        assert!(s.set_root_node(best).unwrap());
        let tree = s.tree().unwrap();
        let root = tree.root_node();
        assert!(root.lock().has_results());
        assert!(root.lock().visits() > 0);
        assert!(tree.len() < old_len);
        assert_eq!(s.root_state().unwrap().legal_actions().len(), 8);

        // The kept graph is searched further.
        s.set_search_limits(SearchLimits::simulations(root.lock().visits() + 20));
        drop(root);
        s.run_search(1).unwrap();

        assert!(matches!(
            s.set_root_node(best),
            Err(SearchError::IllegalAction(_))
        ));
    }
}
