//! Bounded-depth negamax with alpha-beta pruning.
//!
//! Used in two places: as the hybrid sub-search that search threads run on
//! nodes crossing the switching threshold, and as a standalone agent.
//!
//! The search works on one mutable state with do/undo. Every action applied
//! is undone before the function returns, including on pruning exits and
//! evaluator errors. Moves are tried in legal-action order.
//!
//! Values are `Option<f32>`: `None` marks a line whose value is unknown (the
//! rule-based leaf evaluation had nothing to say). Such lines are skipped and
//! never move alpha.

use std::panic;
use std::thread;

use tracing::debug;

use crate::constants::MINIMAX_INFINITY;
use crate::evaluator::{Evaluator, EvaluatorError};
use crate::game::{classify, Action, GameState};
use crate::settings::{LeafEvaluation, PlayerMode, SearchSettings};

/// Result of a sub-search.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// Value for the side to move at the searched position.
    pub value: Option<f32>,
    /// Index of the best action in legal-action order.
    pub best_idx: Option<usize>,
    /// Principal variation, starting with the best action.
    pub pv: Vec<Action>,
}

impl Line {
    fn leaf(value: Option<f32>) -> Self {
        Self {
            value,
            best_idx: None,
            pv: Vec::new(),
        }
    }
}

/// Negamax searcher over one leaf evaluation mode.
pub struct AlphaBeta<'a, S: GameState> {
    /// `None` evaluates leaves with the rules engine.
    evaluator: Option<&'a dyn Evaluator<S>>,
    player_mode: PlayerMode,
    /// Positions visited so far.
    pub nodes: u64,
}

impl<'a, S: GameState> AlphaBeta<'a, S> {
    pub fn new(evaluator: &'a dyn Evaluator<S>, settings: &SearchSettings) -> Self {
        Self {
            evaluator: match settings.leaf_evaluation {
                LeafEvaluation::Network => Some(evaluator),
                LeafEvaluation::Rules => None,
            },
            player_mode: settings.player_mode,
            nodes: 0,
        }
    }

    /// Search `state` to `depth` plies with the full window.
    pub fn run(&mut self, state: &mut S, depth: u8) -> Result<Line, EvaluatorError> {
        self.search(state, depth, -MINIMAX_INFINITY, MINIMAX_INFINITY)
    }

    fn evaluate_leaf(&self, state: &S) -> Result<Option<f32>, EvaluatorError> {
        match self.evaluator {
            Some(evaluator) => evaluator.evaluate(state).map(Some),
            None => Ok(state.static_value()),
        }
    }

    /// Fail-soft negamax. The returned value is exact inside `(alpha, beta)`.
    pub fn search(
        &mut self,
        state: &mut S,
        depth: u8,
        mut alpha: f32,
        beta: f32,
    ) -> Result<Line, EvaluatorError> {
        self.nodes += 1;
        let legal = state.legal_actions();
        if let Some(outcome) = classify(state, &legal) {
            return Ok(Line::leaf(Some(outcome.value())));
        }
        if depth == 0 {
            return self.evaluate_leaf(state).map(Line::leaf);
        }

        let two_player = self.player_mode == PlayerMode::TwoPlayer;
        let mut best = Line::leaf(None);
        for (idx, &action) in legal.iter().enumerate() {
            state.do_action(action);
            let child = if two_player {
                self.search(state, depth - 1, -beta, -alpha)
            } else {
                self.search(state, depth - 1, -MINIMAX_INFINITY, MINIMAX_INFINITY)
            };
            state.undo_action(action);
            let child = child?;

            let Some(child_value) = child.value else {
                continue;
            };
            let value = if two_player { -child_value } else { child_value };
            if best.value.is_none_or(|b| value > b) {
                let mut pv = Vec::with_capacity(child.pv.len() + 1);
                pv.push(action);
                pv.extend_from_slice(&child.pv);
                best = Line {
                    value: Some(value),
                    best_idx: Some(idx),
                    pv,
                };
            }
            if value > alpha {
                alpha = value;
            }
            if two_player && alpha >= beta {
                break;
            }
        }
        Ok(best)
    }
}

/// Result of the standalone alpha-beta agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResult {
    pub value: Option<f32>,
    pub best_action: Option<Action>,
    pub pv: Vec<Action>,
    pub nodes: u64,
}

/// Search `state` to `depth` plies and return the best action.
///
/// With more than one thread the root actions are split among threads, each
/// searching its share with the full window. The best action is the first in
/// legal order reaching the maximum, which is also what the single-threaded
/// search returns, so the result does not depend on the thread count.
pub fn alpha_beta_agent<S: GameState>(
    state: &S,
    depth: u8,
    evaluator: &dyn Evaluator<S>,
    settings: &SearchSettings,
) -> Result<AgentResult, EvaluatorError> {
    let threads = settings.threads.max(1);
    let legal = state.legal_actions();

    if threads == 1 || legal.len() < 2 || depth == 0 {
        let mut searcher = AlphaBeta::new(evaluator, settings);
        let line = searcher.run(&mut state.clone(), depth)?;
        return Ok(AgentResult {
            value: line.value,
            best_action: line.pv.first().copied(),
            pv: line.pv,
            nodes: searcher.nodes,
        });
    }

    let results: Vec<Vec<(usize, Result<Line, EvaluatorError>, u64)>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads.min(legal.len()))
            .map(|t| {
                let legal = &legal;
                scope.spawn(move || {
                    let mut searcher = AlphaBeta::new(evaluator, settings);
                    let mut pos = state.clone();
                    (t..legal.len())
                        .step_by(threads)
                        .map(|idx| {
                            let before = searcher.nodes;
                            pos.do_action(legal[idx]);
                            let line = searcher.run(&mut pos, depth - 1);
                            pos.undo_action(legal[idx]);
                            (idx, line, searcher.nodes - before)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| panic::resume_unwind(e)))
            .collect()
    });

    let mut per_action: Vec<Option<Line>> = vec![None; legal.len()];
    let mut nodes = 1;
    for (idx, line, n) in results.into_iter().flatten() {
        per_action[idx] = Some(line?);
        nodes += n;
    }

    let two_player = settings.player_mode == PlayerMode::TwoPlayer;
    let mut best = AgentResult {
        value: None,
        best_action: None,
        pv: Vec::new(),
        nodes,
    };
    for (idx, line) in per_action.into_iter().enumerate() {
        let Some(child_value) = line.as_ref().and_then(|l| l.value) else {
            continue;
        };
        let value = if two_player { -child_value } else { child_value };
        if best.value.is_none_or(|b| value > b) {
            best.value = Some(value);
            best.best_action = Some(legal[idx]);
            best.pv = std::iter::once(legal[idx])
                .chain(line.into_iter().flat_map(|l| l.pv))
                .collect();
        }
    }
    debug!(
        value = ?best.value,
        best = ?best.best_action,
        nodes = best.nodes,
        "alpha-beta agent finished"
    );
    Ok(best)
}
