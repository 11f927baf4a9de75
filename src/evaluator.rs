//! Evaluator interface for batched position evaluation.
//!
//! The search hands an evaluator a batch of encoded positions and expects a
//! value and a policy per position. In a full engine this is a neural network;
//! this module provides the trait, the batch containers, output sanitising,
//! and two simple evaluators for testing and demos.

use thiserror::Error;
use tracing::warn;

use crate::game::{Action, GameState};

/// Errors that can occur during evaluation.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("Evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("Evaluator returned {got} results for a batch of {expected}")]
    ShapeMismatch { expected: usize, got: usize },
}

/// A batch of positions to evaluate.
///
/// `inputs` holds `states.len()` consecutive encodings of `input_len` floats.
/// The states themselves are passed along for evaluators that work on the
/// rules engine directly (rollouts, rule-based values).
pub struct EvalBatch<'a, S> {
    pub inputs: &'a [f32],
    pub input_len: usize,
    pub states: &'a [S],
}

impl<S> EvalBatch<'_, S> {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Encoded input of the position at `idx`.
    pub fn input(&self, idx: usize) -> &[f32] {
        &self.inputs[idx * self.input_len..(idx + 1) * self.input_len]
    }
}

/// Evaluator output for a batch.
#[derive(Debug, Clone, Default)]
pub struct EvalOutput {
    /// One value per position, for the side to move.
    pub values: Vec<f32>,
    /// `values.len()` consecutive policies of `policy_len` entries.
    pub policies: Vec<f32>,
    pub policy_len: usize,
    /// Optional extra outputs, `values.len()` consecutive chunks. The search
    /// only checks their shape.
    pub auxiliary: Option<Vec<f32>>,
}

impl EvalOutput {
    pub fn with_capacity(batch: usize, policy_len: usize) -> Self {
        Self {
            values: Vec::with_capacity(batch),
            policies: Vec::with_capacity(batch * policy_len),
            policy_len,
            auxiliary: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: f32, policy: &[f32]) {
        self.values.push(value);
        self.policies.extend_from_slice(policy);
    }

    /// Check that the output covers a batch of `n` positions.
    ///
    /// Short policies are tolerated (they fall back to uniform priors), a
    /// wrong number of values or ragged auxiliary outputs are not.
    pub fn check_shape(&self, n: usize) -> Result<(), EvaluatorError> {
        if self.values.len() != n {
            return Err(EvaluatorError::ShapeMismatch {
                expected: n,
                got: self.values.len(),
            });
        }
        match &self.auxiliary {
            Some(aux) if n > 0 && aux.len() % n != 0 => Err(EvaluatorError::ShapeMismatch {
                expected: n,
                got: aux.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Auxiliary output of the position at `idx`, if the evaluator gave any.
    pub fn auxiliary(&self, idx: usize) -> Option<&[f32]> {
        let aux = self.auxiliary.as_ref()?;
        let chunk = aux.len().checked_div(self.values.len())?;
        aux.get(idx * chunk..(idx + 1) * chunk)
    }

    /// Policy of the position at `idx`; empty if the output is too short.
    pub fn policy(&self, idx: usize) -> &[f32] {
        let start = idx * self.policy_len;
        let end = start + self.policy_len;
        if end <= self.policies.len() {
            &self.policies[start..end]
        } else {
            &[]
        }
    }
}

/// Trait for position evaluators.
///
/// Implementations are shared by all search threads, so they take `&self`
/// and must be `Send + Sync`.
pub trait Evaluator<S: GameState>: Send + Sync {
    /// Evaluate every position of the batch.
    fn evaluate_batch(&self, batch: &EvalBatch<'_, S>) -> Result<EvalOutput, EvaluatorError>;

    /// Value of a single position for its side to move.
    fn evaluate(&self, state: &S) -> Result<f32, EvaluatorError> {
        let mut inputs = vec![0.0; state.input_len()];
        state.encode_into(&mut inputs);
        let batch = EvalBatch {
            inputs: &inputs,
            input_len: inputs.len(),
            states: std::slice::from_ref(state),
        };
        let out = self.evaluate_batch(&batch)?;
        match out.values.first() {
            Some(&v) => Ok(sanitize_value(v)),
            None => Err(EvaluatorError::ShapeMismatch {
                expected: 1,
                got: 0,
            }),
        }
    }
}

/// Replace non-finite values by a neutral value and clamp into [-1, 1].
pub fn sanitize_value(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        warn!(value, "evaluator returned a non-finite value, using 0");
        0.0
    }
}

/// Priors of `actions` taken from a full policy vector, normalized.
///
/// A policy that does not cover every action, or that has no positive mass on
/// the legal actions, is replaced by the uniform distribution.
pub fn legal_priors(policy: &[f32], actions: &[Action]) -> Vec<f32> {
    if actions.is_empty() {
        return Vec::new();
    }
    let uniform = || vec![1.0 / actions.len() as f32; actions.len()];

    if actions.iter().any(|&a| a as usize >= policy.len()) {
        warn!(
            policy_len = policy.len(),
            actions = actions.len(),
            "malformed policy, using uniform priors"
        );
        return uniform();
    }
    let mut priors: Vec<f32> = actions
        .iter()
        .map(|&a| {
            let p = policy[a as usize];
            if p.is_finite() { p.max(0.0) } else { 0.0 }
        })
        .collect();
    let sum: f32 = priors.iter().sum();
    if sum <= 0.0 {
        return uniform();
    }
    priors.iter_mut().for_each(|p| *p /= sum);
    priors
}

/// Uniform evaluator: a fixed value and equal probability for every action.
#[derive(Debug, Clone, Default)]
pub struct UniformEvaluator {
    pub value: f32,
}

impl UniformEvaluator {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl<S: GameState> Evaluator<S> for UniformEvaluator {
    fn evaluate_batch(&self, batch: &EvalBatch<'_, S>) -> Result<EvalOutput, EvaluatorError> {
        let policy_len = batch.states.first().map_or(0, |s| s.policy_len());
        let policy = vec![1.0 / policy_len.max(1) as f32; policy_len];
        let mut out = EvalOutput::with_capacity(batch.len(), policy_len);
        for _ in 0..batch.len() {
            out.push(self.value, &policy);
        }
        Ok(out)
    }
}

/// Rule-based evaluator: the rules engine's static value and a uniform policy.
///
/// Deterministic, which makes it the evaluator of choice for tests comparing
/// searches across thread counts.
#[derive(Debug, Clone, Default)]
pub struct RuleEvaluator;

impl<S: GameState> Evaluator<S> for RuleEvaluator {
    fn evaluate_batch(&self, batch: &EvalBatch<'_, S>) -> Result<EvalOutput, EvaluatorError> {
        let policy_len = batch.states.first().map_or(0, |s| s.policy_len());
        let policy = vec![1.0 / policy_len.max(1) as f32; policy_len];
        let mut out = EvalOutput::with_capacity(batch.len(), policy_len);
        for state in batch.states {
            out.push(state.static_value().unwrap_or(0.0), &policy);
        }
        Ok(out)
    }
}
