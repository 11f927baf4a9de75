//! Connect four on the standard 7x6 board.
//!
//! The action is the column (0..7). Row 0 is the bottom row.

use super::{zobrist, Action, GameState, Outcome};

pub const COLS: usize = 7;
pub const ROWS: usize = 6;

const SIDE_KEY: u64 = zobrist(5000);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connect4 {
    /// Row-major, bottom row first. +1 first player, -1 second, 0 empty.
    board: [i8; COLS * ROWS],
    heights: [u8; COLS],
    to_move: i8,
    plies: u8,
    hash: u64,
}

impl Default for Connect4 {
    fn default() -> Self {
        Self::new()
    }
}

impl Connect4 {
    pub fn new() -> Self {
        Self {
            board: [0; COLS * ROWS],
            heights: [0; COLS],
            to_move: 1,
            plies: 0,
            hash: 0,
        }
    }

    pub fn from_actions(actions: &[Action]) -> Self {
        let mut s = Self::new();
        for &a in actions {
            s.do_action(a);
        }
        s
    }

    #[inline]
    fn at(&self, col: usize, row: usize) -> i8 {
        self.board[row * COLS + col]
    }

    /// True if the stone at (col, row) is part of four in a row.
    fn connects_at(&self, col: usize, row: usize) -> bool {
        let player = self.at(col, row);
        if player == 0 {
            return false;
        }
        const DIRS: [(isize, isize); 4] = [(1, 0), (0, 1), (1, 1), (1, -1)];
        DIRS.iter().any(|&(dc, dr)| {
            let count_dir = |sign: isize| {
                let mut n = 0;
                let (mut c, mut r) = (col as isize + sign * dc, row as isize + sign * dr);
                while c >= 0
                    && r >= 0
                    && (c as usize) < COLS
                    && (r as usize) < ROWS
                    && self.at(c as usize, r as usize) == player
                {
                    n += 1;
                    c += sign * dc;
                    r += sign * dr;
                }
                n
            };
            1 + count_dir(1) + count_dir(-1) >= 4
        })
    }

    fn has_winner(&self) -> bool {
        (0..COLS).any(|c| (0..self.heights[c] as usize).any(|r| self.connects_at(c, r)))
    }

    /// Columns where `player` would complete four by dropping a stone now.
    fn winning_drops(&self, player: i8) -> usize {
        let mut scratch = self.clone();
        (0..COLS)
            .filter(|&c| {
                let r = scratch.heights[c] as usize;
                if r >= ROWS {
                    return false;
                }
                scratch.board[r * COLS + c] = player;
                let wins = scratch.connects_at(c, r);
                scratch.board[r * COLS + c] = 0;
                wins
            })
            .count()
    }

    fn piece_key(idx: usize, player: i8) -> u64 {
        zobrist(idx as u64 * 2 + (player > 0) as u64)
    }
}

impl GameState for Connect4 {
    fn legal_actions(&self) -> Vec<Action> {
        if self.has_winner() {
            return Vec::new();
        }
        (0..COLS)
            .filter(|&c| (self.heights[c] as usize) < ROWS)
            .map(|c| c as Action)
            .collect()
    }

    fn do_action(&mut self, action: Action) {
        let col = action as usize;
        let row = self.heights[col] as usize;
        assert!(row < ROWS, "column {col} is full");
        let idx = row * COLS + col;
        self.board[idx] = self.to_move;
        self.heights[col] += 1;
        self.hash ^= Self::piece_key(idx, self.to_move) ^ SIDE_KEY;
        self.to_move = -self.to_move;
        self.plies += 1;
    }

    fn undo_action(&mut self, action: Action) {
        let col = action as usize;
        self.heights[col] -= 1;
        let idx = self.heights[col] as usize * COLS + col;
        self.to_move = -self.to_move;
        self.plies -= 1;
        self.hash ^= Self::piece_key(idx, self.to_move) ^ SIDE_KEY;
        self.board[idx] = 0;
    }

    fn terminal(&self) -> Option<Outcome> {
        if self.has_winner() {
            Some(Outcome::Loss)
        } else if self.plies as usize == COLS * ROWS {
            Some(Outcome::Draw)
        } else {
            None
        }
    }

    fn hash_key(&self) -> u64 {
        self.hash
    }

    fn input_len(&self) -> usize {
        2 * COLS * ROWS
    }

    fn encode_into(&self, buf: &mut [f32]) {
        let n = COLS * ROWS;
        buf[..2 * n].fill(0.0);
        for (i, &c) in self.board.iter().enumerate() {
            if c == self.to_move {
                buf[i] = 1.0;
            } else if c != 0 {
                buf[n + i] = 1.0;
            }
        }
    }

    fn policy_len(&self) -> usize {
        COLS
    }

    fn side_to_move(&self) -> u8 {
        (self.to_move < 0) as u8
    }

    fn gives_check(&self, action: Action) -> bool {
        let mut next = self.clone();
        next.do_action(action);
        !next.has_winner() && next.winning_drops(self.to_move) > 0
    }

    fn static_value(&self) -> Option<f32> {
        if let Some(outcome) = self.terminal() {
            return Some(outcome.value());
        }
        if self.winning_drops(self.to_move) > 0 {
            return Some(0.9);
        }
        let other = self.winning_drops(-self.to_move) as f32;
        Some((-0.4 * other).max(-0.9))
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for row in (0..ROWS).rev() {
            for col in 0..COLS {
                out.push(match self.at(col, row) {
                    1 => 'X',
                    -1 => 'O',
                    _ => '.',
                });
            }
            out.push('\n');
        }
        out.push_str("0123456\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertical_win() {
        let s = Connect4::from_actions(&[0, 1, 0, 1, 0, 1, 0]);
        assert_eq!(s.terminal(), Some(Outcome::Loss));
        assert!(s.legal_actions().is_empty());
    }

    #[test]
    fn test_diagonal_win() {
        // X builds the a1-d4 diagonal.
        let s = Connect4::from_actions(&[0, 1, 1, 2, 2, 3, 2, 3, 3, 6, 3]);
        assert_eq!(s.terminal(), Some(Outcome::Loss));
    }

    #[test]
    fn test_full_column_not_legal() {
        let s = Connect4::from_actions(&[0, 0, 0, 0, 0, 0]);
        assert!(!s.legal_actions().contains(&0));
        assert_eq!(s.legal_actions().len(), COLS - 1);
    }

    #[test]
    fn test_undo_roundtrip() {
        let mut s = Connect4::from_actions(&[3, 3, 4]);
        let before = s.clone();
        s.do_action(2);
        s.undo_action(2);
        assert_eq!(s, before);
    }

    #[test]
    fn test_gives_check_and_static_value() {
        // X holds columns 0 and 1 on the bottom row, O stacked on top.
        let s = Connect4::from_actions(&[0, 0, 1, 1]);
        assert!(s.gives_check(2));
        let threat = Connect4::from_actions(&[0, 0, 1, 1, 2, 2]);
        assert_eq!(threat.static_value(), Some(0.9));
    }
}
