//! Sparse per-level index: a 2D (x, z) grid of run-length coded y columns.
//!
//! Every column is an ordered list of [`RunEntry`] values. A cell entry covers
//! exactly one y row, a gap entry covers `length` empty rows. Together the runs
//! of a column partition `0..y_num`.

use crate::AprError;

use super::{Status, StatusTable};

/// One run of a sparse column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEntry {
    /// A particle cell and the number of particles it owns.
    Cell { status: Status, particles: u8 },
    /// `length` consecutive rows without particle cells.
    Gap { length: u32 },
}

impl RunEntry {
    /// Number of y rows this run covers.
    #[inline]
    pub fn rows(&self) -> u32 {
        match *self {
            RunEntry::Cell { .. } => 1,
            RunEntry::Gap { length } => length,
        }
    }

    #[inline]
    pub fn is_cell(&self) -> bool {
        matches!(self, RunEntry::Cell { .. })
    }
}

/// A cell decoded from a column, with its reconstructed y coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedCell {
    pub y: u32,
    pub status: Status,
    pub particles: u8,
    /// Index of the run inside its column.
    pub run: usize,
}

/// Run-length coded cells of a single resolution level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelIndex {
    level: u8,
    y_num: u32,
    x_num: u32,
    z_num: u32,
    runs: Vec<RunEntry>,
    column_offsets: Vec<usize>,
}

impl LevelIndex {
    /// Build a level from one run list per column, columns in `z * x_num + x` order.
    ///
    /// Fails if a column does not partition `0..y_num` exactly.
    pub fn from_columns(
        level: u8,
        (y_num, x_num, z_num): (u32, u32, u32),
        columns: Vec<Vec<RunEntry>>,
    ) -> Result<Self, AprError> {
        let num_columns = x_num as usize * z_num as usize;
        if columns.len() != num_columns {
            return Err(AprError::SizeMismatch {
                expected: num_columns,
                found: columns.len(),
            });
        }

        let mut runs = Vec::with_capacity(columns.iter().map(Vec::len).sum());
        let mut column_offsets = Vec::with_capacity(num_columns + 1);
        column_offsets.push(0);

        for (index, column) in columns.into_iter().enumerate() {
            let covered: u64 = column.iter().map(|r| r.rows() as u64).sum();
            let has_empty_gap = column
                .iter()
                .any(|r| matches!(r, RunEntry::Gap { length: 0 }));
            if covered != y_num as u64 || has_empty_gap {
                return Err(AprError::RunsDoNotPartitionColumn {
                    level,
                    x: (index % x_num as usize) as u32,
                    z: (index / x_num as usize) as u32,
                    covered,
                    expected: y_num as u64,
                });
            }
            runs.extend(column);
            column_offsets.push(runs.len());
        }

        Ok(Self {
            level,
            y_num,
            x_num,
            z_num,
            runs,
            column_offsets,
        })
    }

    /// Encode a column from the sorted y coordinates of its cells.
    pub fn encode_column(cells: &[(u32, Status)], y_num: u32, table: &StatusTable) -> Vec<RunEntry> {
        let mut runs = Vec::with_capacity(2 * cells.len() + 1);
        let mut next_y = 0u32;
        for &(y, status) in cells {
            debug_assert!(y >= next_y, "column cells must be sorted and unique");
            if y > next_y {
                runs.push(RunEntry::Gap { length: y - next_y });
            }
            runs.push(RunEntry::Cell {
                status,
                particles: table.particle_count(status),
            });
            next_y = y + 1;
        }
        if next_y < y_num {
            runs.push(RunEntry::Gap {
                length: y_num - next_y,
            });
        }
        runs
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    #[inline]
    pub fn y_num(&self) -> u32 {
        self.y_num
    }

    #[inline]
    pub fn x_num(&self) -> u32 {
        self.x_num
    }

    #[inline]
    pub fn z_num(&self) -> u32 {
        self.z_num
    }

    #[inline]
    pub fn num_columns(&self) -> usize {
        self.column_offsets.len() - 1
    }

    #[inline]
    pub fn column_index(&self, x: u32, z: u32) -> usize {
        z as usize * self.x_num as usize + x as usize
    }

    /// Runs of column `(x, z)`.
    #[inline]
    pub fn column(&self, x: u32, z: u32) -> &[RunEntry] {
        self.column_by_index(self.column_index(x, z))
    }

    #[inline]
    pub fn column_by_index(&self, column: usize) -> &[RunEntry] {
        &self.runs[self.column_offsets[column]..self.column_offsets[column + 1]]
    }

    /// Total number of runs stored for this level.
    pub fn num_runs(&self) -> usize {
        self.runs.len()
    }

    /// Decode the cells of column `(x, z)` in y order.
    pub fn cells(&self, x: u32, z: u32) -> ColumnCells<'_> {
        self.cells_by_index(self.column_index(x, z))
    }

    pub fn cells_by_index(&self, column: usize) -> ColumnCells<'_> {
        ColumnCells {
            runs: self.column_by_index(column),
            run: 0,
            y: 0,
        }
    }

    /// Rank of the cell at row `y` among the cells of column `(x, z)`, or
    /// `None` if the row lies in a gap.
    pub fn cell_ordinal(&self, x: u32, z: u32, y: u32) -> Option<usize> {
        let mut row = 0u32;
        let mut ordinal = 0;
        for run in self.column(x, z) {
            match *run {
                RunEntry::Gap { length } => row += length,
                RunEntry::Cell { .. } => {
                    if row == y {
                        return Some(ordinal);
                    }
                    row += 1;
                    ordinal += 1;
                }
            }
            if row > y {
                return None;
            }
        }
        None
    }
}

/// Incremental decoder over a column's runs.
///
/// The y coordinate is carried forward run by run: a gap advances it by its
/// length, a cell by one.
pub struct ColumnCells<'a> {
    runs: &'a [RunEntry],
    run: usize,
    y: u32,
}

impl Iterator for ColumnCells<'_> {
    type Item = DecodedCell;

    fn next(&mut self) -> Option<Self::Item> {
        while self.run < self.runs.len() {
            let run = self.run;
            self.run += 1;
            match self.runs[run] {
                RunEntry::Gap { length } => self.y += length,
                RunEntry::Cell { status, particles } => {
                    let y = self.y;
                    self.y += 1;
                    return Some(DecodedCell {
                        y,
                        status,
                        particles,
                        run,
                    });
                }
            }
        }
        None
    }
}
