// src/term/mod.rs

//! The character grid fed by the pty.
//!
//! `TerminalGrid` is a fixed `GRID_ROWS x GRID_COLS` array of byte codes plus a
//! cursor. It interprets exactly two control bytes (CR and LF, both of which
//! start a new line) and stores printable ASCII verbatim. Everything else is
//! logged and dropped: there is no escape sequence parser behind this grid.

use crate::config::{GRID_COLS, GRID_ROWS};
use log::{debug, trace};

/// Code stored in a cell that has never been written (or has been scrolled in).
pub const EMPTY_CELL: u8 = 0;

/// One row of cell codes.
pub type Row = [u8; GRID_COLS];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalGrid {
    cells: [Row; GRID_ROWS],
    cursor_row: usize,
    /// Ranges over `0..=GRID_COLS`. `GRID_COLS` means the last column was just
    /// written and the next printable byte wraps.
    cursor_col: usize,
}

impl Default for TerminalGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalGrid {
    /// An empty grid with the cursor at the origin.
    pub fn new() -> Self {
        TerminalGrid {
            cells: [[EMPTY_CELL; GRID_COLS]; GRID_ROWS],
            cursor_row: 0,
            cursor_col: 0,
        }
    }

    /// Applies one byte from the pty.
    pub fn feed(&mut self, byte: u8) {
        match byte {
            b'\r' | b'\n' => self.advance_line(),
            32..=126 => self.put(byte),
            0..=31 => debug!("TerminalGrid: ignoring control byte {:#04x}", byte),
            _ => debug!("TerminalGrid: ignoring non-ASCII byte {:#04x}", byte),
        }
    }

    /// Applies every byte of `bytes`, in order.
    pub fn feed_bytes(&mut self, bytes: &[u8]) {
        trace!("TerminalGrid: feeding {} bytes", bytes.len());
        for &byte in bytes {
            self.feed(byte);
        }
    }

    /// Cursor position as `(row, col)`.
    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_row, self.cursor_col)
    }

    /// Code stored at `(row, col)`, `EMPTY_CELL` for an empty cell.
    ///
    /// # Panics
    /// If `row >= GRID_ROWS` or `col >= GRID_COLS`.
    pub fn cell_at(&self, row: usize, col: usize) -> u8 {
        self.cells[row][col]
    }

    /// Row `row`, or `None` past the last row.
    pub fn row(&self, row: usize) -> Option<&Row> {
        self.cells.get(row)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.cells.iter()
    }

    /// Iterates `(row, col, code)` over every non-empty cell, row-major.
    pub fn occupied_cells(&self) -> impl Iterator<Item = (usize, usize, u8)> + '_ {
        self.cells.iter().enumerate().flat_map(|(r, row)| {
            row.iter()
                .enumerate()
                .filter(|&(_, &code)| code != EMPTY_CELL)
                .map(move |(c, &code)| (r, c, code))
        })
    }

    /// Printable text of `row` with empty cells as spaces and trailing spaces
    /// removed. Mostly useful for logging and tests.
    pub fn row_text(&self, row: usize) -> Option<String> {
        let cells = self.row(row)?;
        let text: String = cells
            .iter()
            .map(|&code| if code == EMPTY_CELL { ' ' } else { code as char })
            .collect();
        Some(text.trim_end().to_string())
    }

    fn put(&mut self, byte: u8) {
        if self.cursor_col == GRID_COLS {
            trace!("TerminalGrid: autowrap at row {}", self.cursor_row);
            self.advance_line();
        }
        self.cells[self.cursor_row][self.cursor_col] = byte;
        self.cursor_col += 1;
    }

    fn advance_line(&mut self) {
        self.cursor_col = 0;
        if self.cursor_row < GRID_ROWS - 1 {
            self.cursor_row += 1;
        } else {
            self.scroll_up();
        }
    }

    /// Drops row 0, moves every other row up by one and clears the last row.
    fn scroll_up(&mut self) {
        self.cells.copy_within(1.., 0);
        self.cells[GRID_ROWS - 1] = [EMPTY_CELL; GRID_COLS];
        trace!("TerminalGrid: scrolled");
    }
}
