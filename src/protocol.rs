//! Line-based text protocol driving a [`Searcher`] for one game.
//!
//! Each command gets one response block, `=` on success and `?` on failure,
//! optionally carrying the numeric id the command was prefixed with.
//!
//! ## Supported Commands
//!
//! - `name`, `version` - Engine identification
//! - `isready` - Answer `readyok`
//! - `setoption name <N> value <V>` - Change a search option
//! - `position startpos [moves <a> <b> ...]` - Set the game position
//! - `go [nodes N] [simulations N] [movetime MS] [depth D]` - Search and
//!   answer with the best move. `simulations` counts new root visits, on top
//!   of those kept from the previous search
//! - `d` - Print the board
//! - `list_commands`, `known_command <cmd>` - Command discovery
//! - `quit` - Exit the loop
//!
//! ## Example
//!
//! ```ignore
//! use ara_search::evaluator::UniformEvaluator;
//! use ara_search::game::TicTacToe;
//! use ara_search::protocol::Protocol;
//! let mut engine = Protocol::new(TicTacToe::new(), UniformEvaluator::new(0.0));
//! engine.run(std::io::stdin().lock(), std::io::stdout())?;
//! ```

use std::io::{self, BufRead, Write};
use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::{MINIMAX_DEPTH, N_SIMS};
use crate::evaluator::Evaluator;
use crate::game::{Action, GameState};
use crate::minimax::alpha_beta_agent;
use crate::search::Searcher;
use crate::settings::{EngineOptions, SearchType};

const KNOWN_COMMANDS: &[&str] = &[
    "d",
    "go",
    "isready",
    "known_command",
    "list_commands",
    "name",
    "position",
    "quit",
    "setoption",
    "version",
];

/// Protocol engine state.
pub struct Protocol<S: GameState, E: Evaluator<S>> {
    /// Position `position startpos` resets to.
    start: S,
    /// Actions played from `start`.
    moves: Vec<Action>,
    options: EngineOptions,
    searcher: Searcher<S, E>,
}

impl<S: GameState, E: Evaluator<S>> Protocol<S, E> {
    pub fn new(start: S, evaluator: E) -> Self {
        Self::with_options(start, evaluator, EngineOptions::default())
    }

    pub fn with_options(start: S, evaluator: E, options: EngineOptions) -> Self {
        let mut searcher = Searcher::new(evaluator, options.settings.clone());
        searcher.set_search_limits(options.limits.clone());
        searcher.set_root_state(start.clone());
        Self {
            start,
            moves: Vec::new(),
            options,
            searcher,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn searcher(&self) -> &Searcher<S, E> {
        &self.searcher
    }

    /// Run the command loop until `quit` or end of input.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> io::Result<()> {
        for line in input.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (id, command_line) = Self::parse_id(line);
            let parts: Vec<&str> = command_line.split_whitespace().collect();
            let Some((command, args)) = parts.split_first() else {
                continue;
            };
            let command = command.to_lowercase();

            let (success, message) = self.execute(&command, args);
            let prefix = if success { '=' } else { '?' };
            let id_str = id.map(|i| i.to_string()).unwrap_or_default();
            writeln!(output, "{prefix}{id_str} {message}\n")?;
            output.flush()?;

            if command == "quit" {
                break;
            }
        }
        Ok(())
    }

    /// Split an optional numeric command id from the start of the line.
    fn parse_id(line: &str) -> (Option<u32>, &str) {
        let trimmed = line.trim();
        let end = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        if end > 0 {
            if let Ok(id) = trimmed[..end].parse::<u32>() {
                return (Some(id), trimmed[end..].trim());
            }
        }
        (None, trimmed)
    }

    /// Execute one command and return (success, response).
    pub fn execute(&mut self, command: &str, args: &[&str]) -> (bool, String) {
        match command {
            "name" => (true, env!("CARGO_PKG_NAME").to_string()),

            "version" => (true, env!("CARGO_PKG_VERSION").to_string()),

            "isready" => (true, "readyok".to_string()),

            "quit" => (true, String::new()),

            "list_commands" => (true, KNOWN_COMMANDS.join("\n")),

            "known_command" => match args.first() {
                Some(name) => {
                    let known = KNOWN_COMMANDS.contains(&name.to_lowercase().as_str());
                    (true, known.to_string())
                }
                None => (false, "missing argument".to_string()),
            },

            "d" => match self.searcher.root_state() {
                Some(state) => (true, format!("\n{}", state.render().trim_end())),
                None => (false, "no position".to_string()),
            },

            "setoption" => self.set_option(args),

            "position" => self.position(args),

            "go" => self.go(args),

            _ => (false, format!("unknown command: {command}")),
        }
    }

    /// `setoption name <N> value <V>`. Options take effect with a fresh graph.
    fn set_option(&mut self, args: &[&str]) -> (bool, String) {
        let (Some(&"name"), Some(name)) = (args.first(), args.get(1)) else {
            return (false, "expected: setoption name <N> value <V>".to_string());
        };
        let value = match args.get(2) {
            Some(&"value") => args[3..].join(" "),
            _ => return (false, "missing value".to_string()),
        };
        match self.options.set_option(name, &value) {
            Ok(()) => {
                debug!(name = %name, value = %value, "option set");
                self.searcher.set_settings(self.options.settings.clone());
                self.searcher.set_search_limits(self.options.limits.clone());
                self.searcher.set_root_state(self.current_state());
                (true, String::new())
            }
            Err(e) => (false, e.to_string()),
        }
    }

    /// `position startpos [moves ...]`.
    ///
    /// When the new move list extends the current one, the searched graph is
    /// kept and moved down to the new position.
    fn position(&mut self, args: &[&str]) -> (bool, String) {
        if args.first() != Some(&"startpos") {
            return (false, "expected: position startpos [moves ...]".to_string());
        }
        let move_args = match args.get(1) {
            None => &[][..],
            Some(&"moves") => &args[2..],
            Some(other) => return (false, format!("unexpected token: {other}")),
        };

        let mut state = self.start.clone();
        let mut moves = Vec::with_capacity(move_args.len());
        for text in move_args {
            match state.parse_action(text) {
                Some(action) => {
                    state.do_action(action);
                    moves.push(action);
                }
                None => return (false, format!("illegal move: {text}")),
            }
        }

        if moves.starts_with(&self.moves) && moves.len() > self.moves.len() {
            let extra = moves[self.moves.len()..].to_vec();
            for action in extra {
                if let Err(e) = self.searcher.set_root_node(action) {
                    warn!(error = %e, "could not follow move, starting a new graph");
                    self.searcher.set_root_state(state.clone());
                    break;
                }
            }
        } else if moves != self.moves {
            self.searcher.set_root_state(state);
        }
        self.moves = moves;
        (true, String::new())
    }

    /// `go [nodes N] [simulations N] [movetime MS] [depth D]`.
    ///
    /// `simulations` counts new root visits; visits the root carried over from
    /// an earlier `position` are added to the cap.
    fn go(&mut self, args: &[&str]) -> (bool, String) {
        let mut limits = self.options.limits.clone();
        let mut simulations = None;
        for pair in args.chunks(2) {
            let [key, value] = pair else {
                return (false, format!("missing value for {}", pair[0]));
            };
            let Ok(n) = value.parse::<u64>() else {
                return (false, format!("invalid value for {key}: {value}"));
            };
            match *key {
                "nodes" => limits.nodes = n,
                "simulations" => simulations = Some(n.min(u32::MAX as u64) as u32),
                "movetime" => limits.movetime = Some(Duration::from_millis(n)),
                "depth" => limits.depth = n.min(u8::MAX as u64) as u8,
                _ => return (false, format!("unknown limit: {key}")),
            }
        }
        if let Some(n) = simulations {
            let carried = self
                .searcher
                .tree()
                .map_or(0, |tree| tree.root_node().lock().visits());
            limits.simulations = carried.saturating_add(n);
        }

        let state = self.current_state();
        if self.options.search_type == SearchType::AlphaBeta {
            let depth = match limits.depth {
                0 if self.options.settings.minimax_depth > 0 => self.options.settings.minimax_depth,
                0 => MINIMAX_DEPTH,
                d => d,
            };
            return match alpha_beta_agent(&state, depth, self.searcher.evaluator(), &self.options.settings) {
                Ok(result) => match result.best_action {
                    Some(best) => {
                        let pv: Vec<String> = result.pv.iter().map(|&a| state.action_to_string(a)).collect();
                        (
                            true,
                            format!(
                                "info depth {depth} value {:.3} nodes {} pv {}\nbestmove {}",
                                result.value.unwrap_or(0.0),
                                result.nodes,
                                pv.join(" "),
                                state.action_to_string(best)
                            ),
                        )
                    }
                    None => (false, "no move found".to_string()),
                },
                Err(e) => (false, e.to_string()),
            };
        }

        if limits.is_unbounded() {
            limits.simulations = N_SIMS;
        }
        self.searcher.set_search_limits(limits);
        let report = self.searcher.run_search(self.options.settings.threads);
        self.searcher.set_search_limits(self.options.limits.clone());

        match report {
            Ok(report) => match report.best_action {
                Some(best) => {
                    let pv: Vec<String> = self
                        .searcher
                        .get_best_line()
                        .map(|line| line.actions.iter().map(|&a| state.action_to_string(a)).collect())
                        .unwrap_or_default();
                    (
                        true,
                        format!(
                            "info value {:.3} visits {} nodes {} nps {:.0} pv {}\nbestmove {}",
                            report.value,
                            report.root_visits,
                            report.nodes,
                            report.nps,
                            pv.join(" "),
                            state.action_to_string(best)
                        ),
                    )
                }
                None => (false, "no move found".to_string()),
            },
            Err(e) => (false, e.to_string()),
        }
    }

    fn current_state(&self) -> S {
        let mut state = self.start.clone();
        for &a in &self.moves {
            state.do_action(a);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::UniformEvaluator;
    use crate::game::TicTacToe;

    fn engine() -> Protocol<TicTacToe, UniformEvaluator> {
        let mut options = EngineOptions::default();
        options.settings = crate::settings::SearchSettings::for_testing();
        Protocol::with_options(TicTacToe::new(), UniformEvaluator::new(0.0), options)
    }

    #[test]
    fn test_parse_id_with_id() {
        let (id, cmd) = Protocol::<TicTacToe, UniformEvaluator>::parse_id("123 name");
        assert_eq!(id, Some(123));
        assert_eq!(cmd, "name");
    }

    #[test]
    fn test_parse_id_without_id() {
        let (id, cmd) = Protocol::<TicTacToe, UniformEvaluator>::parse_id("name");
        assert_eq!(id, None);
        assert_eq!(cmd, "name");
    }

    #[test]
    fn test_name_command() {
        let mut engine = engine();
        let (success, response) = engine.execute("name", &[]);
        assert!(success);
        assert_eq!(response, "ara-search");
    }

    #[test]
    fn test_known_command() {
        let mut engine = engine();
        assert_eq!(engine.execute("known_command", &["go"]), (true, "true".to_string()));
        assert_eq!(engine.execute("known_command", &["genmove"]), (true, "false".to_string()));
    }

    #[test]
    fn test_setoption() {
        let mut engine = engine();
        let (success, _) = engine.execute("setoption", &["name", "Batch_Size", "value", "4"]);
        assert!(success);
        assert_eq!(engine.options().settings.batch_size, 4);
        assert_eq!(engine.searcher().settings().batch_size, 4);

        let (success, response) = engine.execute("setoption", &["name", "Nope", "value", "1"]);
        assert!(!success);
        assert!(response.contains("Nope"));

        let (success, _) = engine.execute("setoption", &["name", "Batch_Size"]);
        assert!(!success);
    }

    #[test]
    fn test_position_and_illegal_move() {
        let mut engine = engine();
        let (success, _) = engine.execute("position", &["startpos", "moves", "4", "0"]);
        assert!(success);
        assert_eq!(engine.searcher().root_state().unwrap().legal_actions().len(), 7);

        let (success, response) = engine.execute("position", &["startpos", "moves", "4", "4"]);
        assert!(!success);
        assert!(response.contains("illegal"));
    }

    #[test]
    fn test_go_finds_win() {
        let mut engine = engine();
        engine.execute("position", &["startpos", "moves", "0", "3", "1", "4"]);
        let (success, response) = engine.execute("go", &["simulations", "200"]);
        assert!(success);
        assert!(response.ends_with("bestmove 2"), "{response}");
    }

    #[test]
    fn test_go_simulations_added_to_reused_root() {
        let mut options = EngineOptions::default();
        options.settings = crate::settings::SearchSettings::for_testing();
        let mut engine =
            Protocol::with_options(crate::game::Connect4::new(), UniformEvaluator::new(0.0), options);
        assert!(engine.execute("go", &["simulations", "200"]).0);

        let best = engine.searcher().get_best_line().unwrap().actions[0].to_string();
        assert!(engine.execute("position", &["startpos", "moves", best.as_str()]).0);
        let carried = engine.searcher().tree().unwrap().root_node().lock().visits();
        assert!(carried > 0);

        let (success, response) = engine.execute("go", &["simulations", "20"]);
        assert!(success, "{response}");
        let visits = engine.searcher().tree().unwrap().root_node().lock().visits();
        assert!(visits >= carried + 20, "{visits} after {carried}");
    }

    #[test]
    fn test_go_alphabeta() {
        let mut engine = engine();
        engine.execute("setoption", &["name", "Search_Type", "value", "alphabeta"]);
        engine.execute("position", &["startpos", "moves", "0", "4", "1"]);
        let (success, response) = engine.execute("go", &["depth", "3"]);
        assert!(success);
        assert!(response.ends_with("bestmove 2"), "{response}");
    }

    #[test]
    fn test_go_bad_limits() {
        let mut engine = engine();
        assert!(!engine.execute("go", &["nodes"]).0);
        assert!(!engine.execute("go", &["nodes", "x"]).0);
        assert!(!engine.execute("go", &["plies", "3"]).0);
    }

    #[test]
    fn test_run_loop() {
        let mut engine = engine();
        let input = b"1 name\nisready\n# comment\nfoo\nquit\nname\n";
        let mut output = Vec::new();
        engine.run(&input[..], &mut output).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert_eq!(
            text,
            "=1 ara-search\n\n= readyok\n\n? unknown command: foo\n\n= \n\n"
        );
    }
}
