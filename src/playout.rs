//! Monte Carlo playouts (random game simulation) as an evaluator.
//!
//! A playout plays uniformly random legal moves until the game ends and
//! scores the result from the point of view of the side to move at the start.
//! [`RolloutEvaluator`] averages several playouts per position and returns a
//! uniform policy, which makes it a network-free stand-in for demos.

use crate::evaluator::{EvalBatch, EvalOutput, Evaluator, EvaluatorError};
use crate::game::{classify, GameState};

/// Play random moves from `state` until the game ends or `max_plies` is hit.
///
/// Returns the result for the side to move in `state`:
/// +1 win, 0 draw or unfinished, -1 loss.
pub fn playout<S: GameState>(state: &S, rng: &mut fastrand::Rng, max_plies: usize) -> f32 {
    let mut pos = state.clone();
    let mut plies = 0;

    loop {
        let legal = pos.legal_actions();
        if let Some(outcome) = classify(&pos, &legal) {
            let v = outcome.value();
            // Outcome is for the side to move at the end of the playout.
            return if plies % 2 == 0 { v } else { -v };
        }
        if plies >= max_plies {
            return 0.0;
        }
        pos.do_action(legal[rng.usize(..legal.len())]);
        plies += 1;
    }
}

/// Evaluator averaging random playouts.
#[derive(Debug, Clone)]
pub struct RolloutEvaluator {
    /// Playouts per position.
    pub rollouts: u32,
    /// Maximum length of a playout.
    pub max_plies: usize,
    pub seed: u64,
}

impl Default for RolloutEvaluator {
    fn default() -> Self {
        Self {
            rollouts: 16,
            max_plies: 200,
            seed: 1,
        }
    }
}

impl RolloutEvaluator {
    pub fn new(rollouts: u32, seed: u64) -> Self {
        Self {
            rollouts: rollouts.max(1),
            seed,
            ..Self::default()
        }
    }
}

impl<S: GameState> Evaluator<S> for RolloutEvaluator {
    fn evaluate_batch(&self, batch: &EvalBatch<'_, S>) -> Result<EvalOutput, EvaluatorError> {
        let policy_len = batch.states.first().map_or(0, |s| s.policy_len());
        let policy = vec![1.0 / policy_len.max(1) as f32; policy_len];
        let mut out = EvalOutput::with_capacity(batch.len(), policy_len);

        for state in batch.states {
            // Seeded by position so results do not depend on batch layout.
            let mut rng = fastrand::Rng::with_seed(self.seed ^ state.hash_key());
            let total: f32 = (0..self.rollouts)
                .map(|_| playout(state, &mut rng, self.max_plies))
                .sum();
            out.push(total / self.rollouts as f32, &policy);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Connect4, TicTacToe};

    #[test]
    fn test_playout_terminal_position() {
        // X has won; O to move has lost.
        let s = TicTacToe::from_actions(&[0, 3, 1, 4, 2]);
        let mut rng = fastrand::Rng::with_seed(7);
        assert_eq!(playout(&s, &mut rng, 100), -1.0);
    }

    #[test]
    fn test_playout_range() {
        let s = Connect4::new();
        let mut rng = fastrand::Rng::with_seed(3);
        for _ in 0..20 {
            let v = playout(&s, &mut rng, 100);
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_rollout_evaluator_deterministic() {
        let states = vec![TicTacToe::from_actions(&[4]), TicTacToe::from_actions(&[0])];
        let inputs = vec![0.0; 27 * 2];
        let batch = EvalBatch {
            inputs: &inputs,
            input_len: 27,
            states: &states,
        };
        let eval = RolloutEvaluator::new(32, 11);
        let a = eval.evaluate_batch(&batch).unwrap();
        let b = eval.evaluate_batch(&batch).unwrap();
        assert_eq!(a.values, b.values);
        assert_eq!(a.policy(1).len(), 9);
    }
}
