//! ara-search: hybrid MCTS / alpha-beta search engine.
//!
//! ## Usage
//!
//! - `ara-search` - Show a demo
//! - `ara-search protocol` - Read commands from stdin
//! - `ara-search demo` - Play one game with the MCTS searcher
//! - `ara-search alphabeta` - Run the alpha-beta agent on the start position

use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use ara_search::constants::{BATCH_SIZE, MINIMAX_DEPTH, N_SIMS, THREADS};
use ara_search::game::{Connect4, GameState, TicTacToe};
use ara_search::minimax::alpha_beta_agent;
use ara_search::playout::RolloutEvaluator;
use ara_search::protocol::Protocol;
use ara_search::search::Searcher;
use ara_search::settings::{EngineOptions, SearchLimits, SearchSettings};

/// Hybrid MCTS / alpha-beta search engine
#[derive(Parser)]
#[command(name = "ara-search")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Game to play
    #[arg(long, value_enum, default_value_t = Game::Connect4, global = true)]
    game: Game,

    /// Number of search threads
    #[arg(long, default_value_t = THREADS, global = true)]
    threads: usize,

    /// Leaves evaluated per evaluator call
    #[arg(long, default_value_t = BATCH_SIZE, global = true)]
    batch_size: usize,

    /// Root visits per move
    #[arg(long, default_value_t = N_SIMS, global = true)]
    simulations: u32,

    /// Alpha-beta depth in plies
    #[arg(long, default_value_t = MINIMAX_DEPTH, global = true)]
    depth: u8,

    /// Random seed
    #[arg(long, default_value_t = 1, global = true)]
    seed: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the text protocol on stdin/stdout
    Protocol,
    /// Let the searcher play a game against itself
    Demo,
    /// Search the start position with the alpha-beta agent
    Alphabeta,
}

#[derive(Clone, Copy, ValueEnum)]
enum Game {
    Tictactoe,
    Connect4,
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.game {
        Game::Tictactoe => run(&cli, TicTacToe::new()),
        Game::Connect4 => run(&cli, Connect4::new()),
    }
}

fn options(cli: &Cli) -> EngineOptions {
    let mut options = EngineOptions::default();
    options.settings = SearchSettings {
        threads: cli.threads.max(1),
        batch_size: cli.batch_size.max(1),
        seed: cli.seed,
        ..SearchSettings::default()
    };
    options.limits = SearchLimits {
        simulations: cli.simulations,
        depth: cli.depth,
        ..SearchLimits::default()
    };
    options
}

fn run<S: GameState>(cli: &Cli, start: S) -> Result<()> {
    let options = options(cli);
    let evaluator = RolloutEvaluator::new(16, cli.seed);

    match cli.command {
        Some(Commands::Protocol) => {
            let mut engine = Protocol::with_options(start, evaluator, options);
            engine
                .run(io::stdin().lock(), io::stdout())
                .context("protocol loop failed")?;
        }
        Some(Commands::Alphabeta) => {
            let result = alpha_beta_agent(&start, cli.depth, &evaluator, &options.settings)
                .context("alpha-beta search failed")?;
            let pv: Vec<String> = result.pv.iter().map(|&a| start.action_to_string(a)).collect();
            println!("{}", start.render());
            println!(
                "Best move: {}",
                result
                    .best_action
                    .map(|a| start.action_to_string(a))
                    .unwrap_or_else(|| "none".to_string())
            );
            println!("Value: {:.3}", result.value.unwrap_or(0.0));
            println!("PV: {}", pv.join(" "));
            println!("Nodes: {}", result.nodes);
        }
        Some(Commands::Demo) | None => run_demo(start, evaluator, options)?,
    }
    Ok(())
}

fn run_demo<S: GameState>(start: S, evaluator: RolloutEvaluator, options: EngineOptions) -> Result<()> {
    println!("ara-search: hybrid MCTS / alpha-beta search\n");

    let threads = options.settings.threads;
    let per_move = options.limits.simulations;
    let mut searcher = Searcher::new(evaluator, options.settings);
    searcher.set_root_state(start);

    loop {
        let Some(state) = searcher.root_state() else {
            break;
        };
        println!("{}", state.render());
        if state.legal_actions().is_empty() || state.terminal().is_some() {
            break;
        }

        // Root visits carried over from the previous move count toward the cap.
        let carried = searcher
            .tree()
            .map(|tree| tree.root_node().lock().visits())
            .unwrap_or(0);
        searcher.set_search_limits(SearchLimits {
            simulations: carried + per_move,
            ..options.limits.clone()
        });
        let report = searcher.run_search(threads).context("search failed")?;
        let Some(best) = report.best_action else {
            break;
        };
        let name = searcher
            .root_state()
            .map(|s| s.action_to_string(best))
            .unwrap_or_default();
        println!(
            "Move {name}: value {:+.3}, {} visits, {} nodes, {:.0} nps\n",
            report.value, report.root_visits, report.nodes, report.nps
        );
        let reused = searcher.set_root_node(best)?;
        info!(action = %name, reused, "played");
    }

    match searcher.root_state().and_then(|s| s.terminal()) {
        Some(outcome) => println!("Game over: {outcome:?} for the side to move"),
        None => println!("Game over"),
    }
    Ok(())
}
