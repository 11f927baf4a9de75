//! Search settings, search limits, and the textual option table.
//!
//! [`SearchSettings`] is an immutable value threaded through every search
//! component; nothing in the crate reads configuration from global state.
//! [`EngineOptions`] bundles settings with limits and implements the
//! `setoption` table used by the protocol layer.

use std::time::Duration;

use thiserror::Error;

use crate::constants::*;

/// How values are accumulated when backing up through a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOperator {
    /// Arithmetic mean of all backed-up values.
    Mean,
    /// Visit-weighted power mean of the node's child edge values.
    PowerMean,
}

/// How in-flight visits are accounted for during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualStyle {
    /// Count the in-flight visit and subtract the virtual loss from the value sum.
    Loss,
    /// Count the in-flight visit only; the mean value is left unchanged.
    Visit,
    /// Subtract the virtual loss from the value sum only.
    Offset,
    /// `Loss` below the mix threshold of parent visits, `Visit` above it.
    Mix,
}

/// Leaf evaluation of the alpha-beta sub-search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafEvaluation {
    /// Ask the evaluator for the value of every depth-zero position.
    Network,
    /// Use the rules engine's static value.
    Rules,
}

/// Whether the value changes sign between plies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerMode {
    TwoPlayer,
    SinglePlayer,
}

/// Which search the protocol's `go` command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    /// Monte-Carlo graph search (transpositions shared).
    Mcgs,
    /// Plain Monte-Carlo tree search.
    Mcts,
    /// Bounded-depth alpha-beta only.
    AlphaBeta,
}

/// Tuning parameters of the search.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// New leaves per evaluator call.
    pub batch_size: usize,
    pub cpuct_init: f32,
    pub cpuct_base: f32,
    /// Q-value of unvisited edges.
    pub q_init: f32,
    pub virtual_loss: f32,
    pub virtual_style: VirtualStyle,
    pub virtual_mix_threshold: u32,
    /// One in `n` selections starts with a random playout (0 disables).
    pub epsilon_greedy_counter: u32,
    /// One in `n` selections forces an unexplored checking move (0 disables).
    pub epsilon_checks_counter: u32,
    /// Boost low-prior checking moves when a node receives its policy.
    pub enhance_checks: bool,
    pub check_threshold: f32,
    pub check_factor: f32,
    pub node_policy_temperature: f32,
    /// Node visit count at which the alpha-beta sub-search runs (0 disables).
    pub switching_at_visits: u32,
    pub minimax_depth: u8,
    pub minimax_weight: f32,
    /// Run the sub-search from every new leaf and evaluate its principal variation's end.
    pub minimax_at_leaf: bool,
    pub leaf_evaluation: LeafEvaluation,
    pub use_transposition_table: bool,
    /// Propagate proven wins, losses, and draws.
    pub mcts_solver: bool,
    pub backup_operator: BackupOperator,
    /// Exponent of the power-mean back-up operator.
    pub power_mean: f32,
    pub player_mode: PlayerMode,
    pub threads: usize,
    /// Base seed of the per-thread random generators.
    pub seed: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            cpuct_init: CPUCT_INIT,
            cpuct_base: CPUCT_BASE,
            q_init: Q_INIT,
            virtual_loss: VIRTUAL_LOSS,
            virtual_style: VirtualStyle::Mix,
            virtual_mix_threshold: VIRTUAL_MIX_THRESHOLD,
            epsilon_greedy_counter: EPSILON_GREEDY_COUNTER,
            epsilon_checks_counter: EPSILON_CHECKS_COUNTER,
            enhance_checks: true,
            check_threshold: CHECK_THRESHOLD,
            check_factor: CHECK_FACTOR,
            node_policy_temperature: NODE_POLICY_TEMPERATURE,
            switching_at_visits: SWITCHING_AT_VISITS,
            minimax_depth: MINIMAX_DEPTH,
            minimax_weight: MINIMAX_WEIGHT,
            minimax_at_leaf: false,
            leaf_evaluation: LeafEvaluation::Network,
            use_transposition_table: true,
            mcts_solver: true,
            backup_operator: BackupOperator::Mean,
            power_mean: 2.0,
            player_mode: PlayerMode::TwoPlayer,
            threads: THREADS,
            seed: 0x5eed,
        }
    }
}

impl SearchSettings {
    /// Deterministic settings for tests: no randomized overrides, no policy
    /// post-processing, no minimax.
    pub fn for_testing() -> Self {
        Self {
            batch_size: 1,
            epsilon_greedy_counter: 0,
            epsilon_checks_counter: 0,
            enhance_checks: false,
            node_policy_temperature: 1.0,
            virtual_style: VirtualStyle::Loss,
            threads: 1,
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    pub fn with_threads(mut self, n: usize) -> Self {
        self.threads = n.max(1);
        self
    }

    pub fn with_transpositions(mut self, enabled: bool) -> Self {
        self.use_transposition_table = enabled;
        self
    }

    pub fn with_solver(mut self, enabled: bool) -> Self {
        self.mcts_solver = enabled;
        self
    }

    pub fn with_minimax(mut self, switching_at_visits: u32, depth: u8) -> Self {
        self.switching_at_visits = switching_at_visits;
        self.minimax_depth = depth;
        self
    }

    pub fn with_backup_operator(mut self, op: BackupOperator) -> Self {
        self.backup_operator = op;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The value seen by the parent of a node whose own value is `value`.
    #[inline]
    pub fn parent_value(&self, value: f32) -> f32 {
        match self.player_mode {
            PlayerMode::TwoPlayer => -value,
            PlayerMode::SinglePlayer => value,
        }
    }

    /// Maximum number of terminal hits collected in one mini-batch.
    pub fn terminal_node_cache(&self) -> usize {
        match self.player_mode {
            PlayerMode::TwoPlayer => self.batch_size * 2,
            PlayerMode::SinglePlayer => 1,
        }
    }
}

/// Stop conditions of one search. Zero means unlimited.
#[derive(Debug, Clone, Default)]
pub struct SearchLimits {
    /// Cap on the number of nodes in the tree.
    pub nodes: u64,
    /// Cap on root visits.
    pub simulations: u32,
    /// Hard cap on tree size regardless of `nodes`.
    pub nodes_limit: u64,
    /// Depth of the standalone alpha-beta search.
    pub depth: u8,
    pub movetime: Option<Duration>,
}

impl SearchLimits {
    pub fn simulations(n: u32) -> Self {
        Self {
            simulations: n,
            ..Self::default()
        }
    }

    pub fn movetime(ms: u64) -> Self {
        Self {
            movetime: Some(Duration::from_millis(ms)),
            ..Self::default()
        }
    }

    /// True if the tree size and root visits are still below their caps.
    pub fn nodes_ok(&self, node_count: u64, root_visits: u32) -> bool {
        (self.nodes == 0 || node_count < self.nodes)
            && (self.simulations == 0 || root_visits < self.simulations)
            && (self.nodes_limit == 0 || node_count < self.nodes_limit)
    }

    /// True if nothing but an external stop can end the search.
    pub fn is_unbounded(&self) -> bool {
        self.nodes == 0 && self.simulations == 0 && self.nodes_limit == 0 && self.movetime.is_none()
    }
}

/// Errors raised by [`EngineOptions::set_option`].
#[derive(Debug, Error, PartialEq)]
pub enum OptionError {
    #[error("Given option {0} does not exist")]
    Unknown(String),

    #[error("Invalid value '{value}' for option {name}")]
    InvalidValue { name: String, value: String },

    #[error("Value {value} for option {name} is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: i64,
        min: i64,
        max: i64,
    },
}

/// Settings, limits, and search type as adjusted by `setoption`.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub settings: SearchSettings,
    pub limits: SearchLimits,
    pub search_type: SearchType,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            settings: SearchSettings::default(),
            limits: SearchLimits::default(),
            search_type: SearchType::Mcgs,
        }
    }
}

impl EngineOptions {
    /// Apply one named option. Names are case-insensitive.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<(), OptionError> {
        let s = &mut self.settings;
        let value = value.trim();
        match name.to_ascii_lowercase().as_str() {
            "batch_size" => s.batch_size = int(name, value, 1, MAX_BATCH_SIZE as i64)? as usize,
            "centi_cpuct_init" => s.cpuct_init = int(name, value, 1, 99999)? as f32 / 100.0,
            "cpuct_base" => s.cpuct_base = int(name, value, 1, 99999)? as f32,
            "centi_epsilon_checks" => {
                s.epsilon_checks_counter = centi_counter(int(name, value, 0, 100)?)
            }
            "centi_epsilon_greedy" => {
                s.epsilon_greedy_counter = centi_counter(int(name, value, 0, 100)?)
            }
            "centi_node_temperature" => {
                s.node_policy_temperature = int(name, value, 1, 99999)? as f32 / 100.0
            }
            "centi_virtual_loss" => s.virtual_loss = int(name, value, 0, 99999)? as f32 / 100.0,
            "enhance_checks" => s.enhance_checks = boolean(name, value)?,
            "mcts_solver" => s.mcts_solver = boolean(name, value)?,
            "minimax_depth" => s.minimax_depth = int(name, value, 0, 32)? as u8,
            "minimax_at_leaf" => s.minimax_at_leaf = boolean(name, value)?,
            "switching_at_visits" => {
                s.switching_at_visits = int(name, value, 0, 99_999_999)? as u32
            }
            "leaf_evaluation" => {
                s.leaf_evaluation = match value.to_ascii_lowercase().as_str() {
                    "network" => LeafEvaluation::Network,
                    "rules" => LeafEvaluation::Rules,
                    _ => return Err(invalid(name, value)),
                }
            }
            "backup_operator" => {
                s.backup_operator = match value.to_ascii_lowercase().as_str() {
                    "mean" => BackupOperator::Mean,
                    "power_mean" => BackupOperator::PowerMean,
                    _ => return Err(invalid(name, value)),
                }
            }
            "centi_power_mean" => s.power_mean = int(name, value, 100, 99999)? as f32 / 100.0,
            "search_player_mode" => {
                s.player_mode = match value.to_ascii_lowercase().as_str() {
                    "two_player" => PlayerMode::TwoPlayer,
                    "single_player" => PlayerMode::SinglePlayer,
                    _ => return Err(invalid(name, value)),
                }
            }
            "search_type" => {
                self.search_type = match value.to_ascii_lowercase().as_str() {
                    "mcgs" => SearchType::Mcgs,
                    "mcts" => SearchType::Mcts,
                    "alphabeta" => SearchType::AlphaBeta,
                    _ => return Err(invalid(name, value)),
                };
                s.use_transposition_table = self.search_type == SearchType::Mcgs;
            }
            "virtual_style" => {
                s.virtual_style = match value.to_ascii_lowercase().as_str() {
                    "virtual_loss" => VirtualStyle::Loss,
                    "virtual_visit" => VirtualStyle::Visit,
                    "virtual_offset" => VirtualStyle::Offset,
                    "virtual_mix" => VirtualStyle::Mix,
                    _ => return Err(invalid(name, value)),
                }
            }
            "virtual_mix_threshold" => {
                s.virtual_mix_threshold = int(name, value, 1, 99_999_999)? as u32
            }
            "threads" => s.threads = int(name, value, 1, MAX_THREADS as i64)? as usize,
            "seed" => s.seed = int(name, value, 0, i64::MAX)? as u64,
            "nodes" => self.limits.nodes = int(name, value, 0, 99_999_999)? as u64,
            "nodes_limit" => self.limits.nodes_limit = int(name, value, 0, 999_999_999)? as u64,
            "simulations" => self.limits.simulations = int(name, value, 0, 99_999_999)? as u32,
            "fixed_movetime" => {
                let ms = int(name, value, 0, 99_999_999)? as u64;
                self.limits.movetime = (ms > 0).then(|| Duration::from_millis(ms));
            }
            _ => return Err(OptionError::Unknown(name.to_string())),
        }
        Ok(())
    }
}

/// Convert a percentage into a "one in n" counter; 0 disables.
fn centi_counter(percent: i64) -> u32 {
    if percent == 0 {
        0
    } else {
        (100.0 / percent as f64).round() as u32
    }
}

fn invalid(name: &str, value: &str) -> OptionError {
    OptionError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn int(name: &str, value: &str, min: i64, max: i64) -> Result<i64, OptionError> {
    let v: i64 = value.parse().map_err(|_| invalid(name, value))?;
    if v < min || v > max {
        return Err(OptionError::OutOfRange {
            name: name.to_string(),
            value: v,
            min,
            max,
        });
    }
    Ok(v)
}

fn boolean(name: &str, value: &str) -> Result<bool, OptionError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Ok(true),
        "false" | "0" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = SearchSettings::default();
        assert_eq!(s.batch_size, BATCH_SIZE);
        assert!(s.use_transposition_table);
        assert!(s.mcts_solver);
    }

    #[test]
    fn test_parent_value_sign() {
        let mut s = SearchSettings::default();
        assert_eq!(s.parent_value(0.25), -0.25);
        s.player_mode = PlayerMode::SinglePlayer;
        assert_eq!(s.parent_value(0.25), 0.25);
        assert_eq!(s.terminal_node_cache(), 1);
    }

    #[test]
    fn test_limits() {
        let limits = SearchLimits::simulations(10);
        assert!(limits.nodes_ok(1000, 9));
        assert!(!limits.nodes_ok(1000, 10));
        assert!(SearchLimits::default().is_unbounded());
        assert!(!SearchLimits::movetime(5).is_unbounded());
    }

    #[test]
    fn test_set_option_centi_values() {
        let mut opts = EngineOptions::default();
        opts.set_option("Centi_CPuct_Init", "300").unwrap();
        assert!((opts.settings.cpuct_init - 3.0).abs() < 1e-6);

        opts.set_option("centi_epsilon_greedy", "5").unwrap();
        assert_eq!(opts.settings.epsilon_greedy_counter, 20);

        opts.set_option("Centi_Epsilon_Checks", "0").unwrap();
        assert_eq!(opts.settings.epsilon_checks_counter, 0);
    }

    #[test]
    fn test_set_option_search_type() {
        let mut opts = EngineOptions::default();
        opts.set_option("Search_Type", "mcts").unwrap();
        assert_eq!(opts.search_type, SearchType::Mcts);
        assert!(!opts.settings.use_transposition_table);

        opts.set_option("Search_Type", "mcgs").unwrap();
        assert!(opts.settings.use_transposition_table);
    }

    #[test]
    fn test_set_option_limits() {
        let mut opts = EngineOptions::default();
        opts.set_option("Simulations", "400").unwrap();
        opts.set_option("Fixed_Movetime", "250").unwrap();
        assert_eq!(opts.limits.simulations, 400);
        assert_eq!(opts.limits.movetime, Some(Duration::from_millis(250)));

        opts.set_option("Fixed_Movetime", "0").unwrap();
        assert_eq!(opts.limits.movetime, None);
    }

    #[test]
    fn test_set_option_errors() {
        let mut opts = EngineOptions::default();
        assert_eq!(
            opts.set_option("No_Such_Option", "1"),
            Err(OptionError::Unknown("No_Such_Option".to_string()))
        );
        assert!(matches!(
            opts.set_option("Batch_Size", "0"),
            Err(OptionError::OutOfRange { .. })
        ));
        assert!(matches!(
            opts.set_option("MCTS_Solver", "maybe"),
            Err(OptionError::InvalidValue { .. })
        ));
        assert!(matches!(
            opts.set_option("Virtual_Style", "virtual_nothing"),
            Err(OptionError::InvalidValue { .. })
        ));
    }
}
