use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ROWS: usize = 6;
pub const COLS: usize = 7;

/// A player's fixed identity within one room. Determines move ownership and
/// win attribution; serialized as its numeric cell value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Slot {
    One = 1,
    Two = 2,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::One => Slot::Two,
            Slot::Two => Slot::One,
        }
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> u8 {
        slot as u8
    }
}

impl TryFrom<u8> for Slot {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Slot::One),
            2 => Ok(Slot::Two),
            other => Err(format!("invalid slot value {}", other)),
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("column full")]
pub struct ColumnFull;

/// The 6x7 playing field. Row 0 is the top; cells hold 0 (empty) or a slot
/// value. Pure data, no locking; the owning room serializes access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    cells: [[u8; COLS]; ROWS],
}

impl Default for Board {
    fn default() -> Self {
        Board {
            cells: [[0; COLS]; ROWS],
        }
    }
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell(&self, row: usize, col: usize) -> u8 {
        self.cells[row][col]
    }

    /// Drop a piece into `col`: the first empty cell scanning from the bottom
    /// row upward is filled and its row returned. A full column leaves the
    /// board untouched.
    pub fn drop_piece(&mut self, col: usize, slot: Slot) -> Result<usize, ColumnFull> {
        for row in (0..ROWS).rev() {
            if self.cells[row][col] == 0 {
                self.cells[row][col] = slot as u8;
                return Ok(row);
            }
        }
        Err(ColumnFull)
    }

    /// Whether the piece at (row, col) completes four in a row for `slot`.
    /// Scans both directions along each of the four axes through the cell.
    pub fn is_winning_cell(&self, row: usize, col: usize, slot: Slot) -> bool {
        const AXES: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];
        AXES.iter().any(|&(dr, dc)| {
            let run = 1
                + self.run_length(row, col, dr, dc, slot)
                + self.run_length(row, col, -dr, -dc, slot);
            run >= 4
        })
    }

    /// Contiguous same-slot cells from (row, col) exclusive, stepping by
    /// (dr, dc) until the edge or a different cell.
    fn run_length(&self, row: usize, col: usize, dr: isize, dc: isize, slot: Slot) -> usize {
        let mut count = 0;
        let mut r = row as isize + dr;
        let mut c = col as isize + dc;
        while (0..ROWS as isize).contains(&r)
            && (0..COLS as isize).contains(&c)
            && self.cells[r as usize][c as usize] == slot as u8
        {
            count += 1;
            r += dr;
            c += dc;
        }
        count
    }

    /// With gravity fill, a full top row means a full board.
    pub fn is_full(&self) -> bool {
        self.cells[0].iter().all(|&cell| cell != 0)
    }

    /// (slot-1 pieces, slot-2 pieces)
    pub fn piece_counts(&self) -> (usize, usize) {
        let mut ones = 0;
        let mut twos = 0;
        for row in &self.cells {
            for &cell in row {
                match cell {
                    1 => ones += 1,
                    2 => twos += 1,
                    _ => {}
                }
            }
        }
        (ones, twos)
    }
}
