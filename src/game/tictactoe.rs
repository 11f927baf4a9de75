//! Tic-tac-toe on a 3x3 board.
//!
//! Cells are numbered 0..9 row by row; the action for a cell is its number.

use super::{zobrist, Action, GameState, Outcome};

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Key component toggled when the side to move changes.
const SIDE_KEY: u64 = zobrist(1000);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicTacToe {
    /// +1 for the first player, -1 for the second, 0 for empty.
    board: [i8; 9],
    to_move: i8,
    hash: u64,
}

impl Default for TicTacToe {
    fn default() -> Self {
        Self::new()
    }
}

impl TicTacToe {
    pub fn new() -> Self {
        Self {
            board: [0; 9],
            to_move: 1,
            hash: 0,
        }
    }

    /// Build a position by playing `actions` from the empty board.
    pub fn from_actions(actions: &[Action]) -> Self {
        let mut s = Self::new();
        for &a in actions {
            s.do_action(a);
        }
        s
    }

    pub fn cell(&self, idx: usize) -> i8 {
        self.board[idx]
    }

    fn winner(&self) -> Option<i8> {
        LINES.iter().find_map(|l| {
            let v = self.board[l[0]];
            (v != 0 && v == self.board[l[1]] && v == self.board[l[2]]).then_some(v)
        })
    }

    /// Lines holding two stones of `player` and one empty cell.
    fn threats(&self, player: i8) -> usize {
        LINES
            .iter()
            .filter(|l| {
                let own = l.iter().filter(|&&c| self.board[c] == player).count();
                let empty = l.iter().filter(|&&c| self.board[c] == 0).count();
                own == 2 && empty == 1
            })
            .count()
    }

    fn piece_key(cell: usize, player: i8) -> u64 {
        zobrist(cell as u64 * 2 + (player > 0) as u64)
    }
}

impl GameState for TicTacToe {
    fn legal_actions(&self) -> Vec<Action> {
        if self.winner().is_some() {
            return Vec::new();
        }
        (0..9)
            .filter(|&i| self.board[i] == 0)
            .map(|i| i as Action)
            .collect()
    }

    fn do_action(&mut self, action: Action) {
        let idx = action as usize;
        assert_eq!(self.board[idx], 0, "cell {idx} is occupied");
        self.board[idx] = self.to_move;
        self.hash ^= Self::piece_key(idx, self.to_move) ^ SIDE_KEY;
        self.to_move = -self.to_move;
    }

    fn undo_action(&mut self, action: Action) {
        let idx = action as usize;
        self.to_move = -self.to_move;
        debug_assert_eq!(self.board[idx], self.to_move);
        self.hash ^= Self::piece_key(idx, self.to_move) ^ SIDE_KEY;
        self.board[idx] = 0;
    }

    fn terminal(&self) -> Option<Outcome> {
        match self.winner() {
            // Only the player who just moved can have completed a line.
            Some(_) => Some(Outcome::Loss),
            None if self.board.iter().all(|&c| c != 0) => Some(Outcome::Draw),
            None => None,
        }
    }

    fn hash_key(&self) -> u64 {
        self.hash
    }

    fn input_len(&self) -> usize {
        27
    }

    fn encode_into(&self, buf: &mut [f32]) {
        buf[..27].fill(0.0);
        for (i, &c) in self.board.iter().enumerate() {
            if c == self.to_move {
                buf[i] = 1.0;
            } else if c != 0 {
                buf[9 + i] = 1.0;
            }
        }
        if self.to_move > 0 {
            buf[18..27].fill(1.0);
        }
    }

    fn policy_len(&self) -> usize {
        9
    }

    fn side_to_move(&self) -> u8 {
        (self.to_move < 0) as u8
    }

    fn gives_check(&self, action: Action) -> bool {
        let mut next = self.clone();
        next.do_action(action);
        next.winner().is_none() && next.threats(self.to_move) > 0
    }

    fn static_value(&self) -> Option<f32> {
        if let Some(outcome) = self.terminal() {
            return Some(outcome.value());
        }
        let own = self.threats(self.to_move) as f32;
        let other = self.threats(-self.to_move) as f32;
        // The side to move converts any threat of its own immediately.
        if own > 0.0 {
            return Some(0.9);
        }
        Some((-0.3 * other).max(-0.9))
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for row in 0..3 {
            for col in 0..3 {
                out.push(match self.board[row * 3 + col] {
                    1 => 'X',
                    -1 => 'O',
                    _ => '.',
                });
            }
            out.push('\n');
        }
        out
    }
}
