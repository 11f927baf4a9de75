//! Constants for value ranges, search defaults, and tuning parameters.
//!
//! This module contains the default configuration values of the engine.
//! [`crate::settings::SearchSettings::default`] is built from these constants,
//! and the option table in [`crate::settings`] validates against the ranges
//! declared here.

// =============================================================================
// Value Range
// =============================================================================

/// Value of a proven win for the side to move.
pub const WIN_VALUE: f32 = 1.0;

/// Value of a proven draw.
pub const DRAW_VALUE: f32 = 0.0;

/// Value of a proven loss for the side to move.
pub const LOSS_VALUE: f32 = -1.0;

/// Window bound used by the alpha-beta sub-search (outside the value range).
pub const MINIMAX_INFINITY: f32 = 2.0;

// =============================================================================
// MCTS Selection
// =============================================================================

/// Initial exploration constant of the PUCT formula.
pub const CPUCT_INIT: f32 = 2.5;

/// Visit base of the logarithmic cpuct growth term.
pub const CPUCT_BASE: f32 = 19652.0;

/// Q-value assumed for edges that were never visited (first play urgency).
pub const Q_INIT: f32 = 0.0;

/// Value subtracted per in-flight visit when virtual loss is applied.
pub const VIRTUAL_LOSS: f32 = 1.0;

/// Parent visit count above which `VirtualStyle::Mix` switches from
/// virtual loss to virtual visit.
pub const VIRTUAL_MIX_THRESHOLD: u32 = 1000;

/// Minimum difference between an edge's Q-value and the shared node's value
/// that makes a transposition return its own value instead of descending.
pub const TRANSPOSITION_Q_DIFF: f64 = 0.01;

// =============================================================================
// Batching
// =============================================================================

/// Default number of new leaves evaluated per evaluator call.
pub const BATCH_SIZE: usize = 16;

/// Upper bound for the batch size option.
pub const MAX_BATCH_SIZE: usize = 8192;

// =============================================================================
// Exploration Overrides
// =============================================================================

/// One in `EPSILON_GREEDY_COUNTER` selections start with a random playout.
/// Zero disables the override.
pub const EPSILON_GREEDY_COUNTER: u32 = 20;

/// One in `EPSILON_CHECKS_COUNTER` selections force an unexplored checking move.
/// Zero disables the override.
pub const EPSILON_CHECKS_COUNTER: u32 = 100;

/// Prior probability below which a checking move gets boosted.
pub const CHECK_THRESHOLD: f32 = 0.1;

/// Amount added to the prior of a boosted checking move.
pub const CHECK_FACTOR: f32 = 0.5;

/// Temperature applied to the prior policy of every new node.
pub const NODE_POLICY_TEMPERATURE: f32 = 1.7;

// =============================================================================
// Hybrid Minimax
// =============================================================================

/// Visit count of a node at which the alpha-beta sub-search is triggered.
/// Zero disables the trigger.
pub const SWITCHING_AT_VISITS: u32 = 0;

/// Depth of the alpha-beta sub-search.
pub const MINIMAX_DEPTH: u8 = 2;

/// Visit-equivalent weight of the minimax value installed on an edge.
pub const MINIMAX_WEIGHT: f32 = 1.0;

// =============================================================================
// Threads and Limits
// =============================================================================

/// Default number of search threads.
pub const THREADS: usize = 2;

/// Upper bound for the threads option.
pub const MAX_THREADS: usize = 512;

/// Initial capacity of per-thread trajectory and action buffers.
pub const DEPTH_INIT: usize = 64;

/// How often the coordinator polls the clock while threads are running.
pub const POLL_INTERVAL_MS: u64 = 2;

/// Default number of simulations for the demo and the protocol `go` command.
pub const N_SIMS: u32 = 800;
