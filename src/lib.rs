//! ara-search: a concurrent Monte Carlo graph search engine.
//!
//! Several search threads share one search graph. Each thread collects a
//! mini-batch of leaves under virtual loss, evaluates them with one call to
//! an [`evaluator::Evaluator`], and backs the results up. Positions reached
//! by different move orders share a node through a transposition map, proven
//! results propagate with the MCTS solver, and nodes with enough visits can
//! hand their move choice to a bounded-depth alpha-beta search.
//!
//! ## Modules
//!
//! - [`constants`] - Values and default tuning parameters
//! - [`settings`] - Search settings, limits, and the option table
//! - [`game`] - The `GameState` interface and two reference games
//! - [`evaluator`] - Batched evaluator interface and simple evaluators
//! - [`playout`] - Random playouts used as an evaluator
//! - [`node`] - Per-node statistics, selection, virtual loss, back-up, solver
//! - [`tree`] - Node arena, transposition map, principal line, sub-tree reuse
//! - [`minimax`] - Negamax alpha-beta search and the standalone agent
//! - [`search_thread`] - One worker's select / evaluate / back-up loop
//! - [`search`] - The multi-threaded coordinator
//! - [`protocol`] - Line-based text protocol
//!
//! ## Example
//!
//! ```
//! use ara_search::evaluator::UniformEvaluator;
//! use ara_search::game::TicTacToe;
//! use ara_search::search::Searcher;
//! use ara_search::settings::{SearchLimits, SearchSettings};
//!
//! let mut searcher = Searcher::new(UniformEvaluator::new(0.0), SearchSettings::default());
//! searcher.set_root_state(TicTacToe::from_actions(&[0, 3, 1, 4]));
//! searcher.set_search_limits(SearchLimits::simulations(200));
//!
//! let report = searcher.run_search(2).unwrap();
//! assert_eq!(report.best_action, Some(2));
//! ```

pub mod constants;
pub mod evaluator;
pub mod game;
pub mod minimax;
pub mod node;
pub mod playout;
pub mod protocol;
pub mod search;
pub mod search_thread;
pub mod settings;
pub mod tree;
