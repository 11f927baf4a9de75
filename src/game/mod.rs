//! Game-state interface consumed by the search, plus two reference games.
//!
//! The search never looks inside a position. Everything it needs is behind
//! [`GameState`]: move generation, make/undo, terminal detection, a hash key
//! for transpositions, and an encoding for the evaluator.
//!
//! Actions are plain `u16` indices into the evaluator's policy vector, so a
//! policy entry for action `a` is `policy[a as usize]`.

pub mod connect4;
pub mod tictactoe;

pub use connect4::Connect4;
pub use tictactoe::TicTacToe;

use crate::constants::{DRAW_VALUE, LOSS_VALUE, WIN_VALUE};

/// A move, doubling as the index of its entry in the policy vector.
pub type Action = u16;

/// Game result from the point of view of the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Draw,
    Loss,
}

impl Outcome {
    /// Value of the outcome for the side to move.
    pub fn value(self) -> f32 {
        match self {
            Outcome::Win => WIN_VALUE,
            Outcome::Draw => DRAW_VALUE,
            Outcome::Loss => LOSS_VALUE,
        }
    }

    /// The same result seen by the other player.
    pub fn flip(self) -> Outcome {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Draw => Outcome::Draw,
            Outcome::Loss => Outcome::Win,
        }
    }
}

/// A position of a sequential game with undo support.
///
/// Implementations must be cheap to clone: every search thread replays the
/// root state along its path to build new leaves.
pub trait GameState: Clone + Send + Sync + 'static {
    /// Legal actions in a fixed enumeration order. Empty once the game is over.
    fn legal_actions(&self) -> Vec<Action>;

    fn do_action(&mut self, action: Action);

    /// Revert `action`, which must be the last action applied.
    fn undo_action(&mut self, action: Action);

    /// The result for the side to move, or `None` while the game goes on.
    fn terminal(&self) -> Option<Outcome>;

    /// Hash of the position, equal for transposed positions.
    fn hash_key(&self) -> u64;

    /// Number of floats written by [`GameState::encode_into`].
    fn input_len(&self) -> usize;

    /// Write the evaluator input for this position into `buf`.
    fn encode_into(&self, buf: &mut [f32]);

    /// Length of the evaluator's policy vector.
    fn policy_len(&self) -> usize;

    /// Index of the player to move (0 or 1).
    fn side_to_move(&self) -> u8;

    /// True if `action` creates an immediate threat the opponent must answer.
    fn gives_check(&self, _action: Action) -> bool {
        false
    }

    /// Rule-based value for the side to move, `None` when unknown.
    fn static_value(&self) -> Option<f32> {
        None
    }

    /// Known result from an endgame table, if the position is covered.
    fn tablebase(&self) -> Option<Outcome> {
        None
    }

    fn action_to_string(&self, action: Action) -> String {
        action.to_string()
    }

    /// Parse a legal action from its textual form.
    fn parse_action(&self, s: &str) -> Option<Action> {
        let action: Action = s.trim().parse().ok()?;
        self.legal_actions().contains(&action).then_some(action)
    }

    /// Printable board.
    fn render(&self) -> String;
}

/// Terminal classification used by the search.
///
/// A position without legal actions is terminal even if the rules engine
/// does not report a result; it is scored as a draw.
pub fn classify<S: GameState>(state: &S, legal: &[Action]) -> Option<Outcome> {
    state
        .terminal()
        .or_else(|| legal.is_empty().then_some(Outcome::Draw))
}

/// Zobrist key for a (square, piece) pair, derived with splitmix64.
pub(crate) const fn zobrist(index: u64) -> u64 {
    let mut z = index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
