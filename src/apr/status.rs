//! Particle cell status and the status -> multiplicity table.

use serde::{Deserialize, Serialize};

use crate::AprError;

/// Resolution class of a particle cell.
///
/// The numeric values match the conventional APR type codes, so
/// `status as u8` can be written to status images directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    /// Cell whose level was requested directly by the resolution field.
    Seed = 1,
    /// Cell adjacent to a seed region.
    Boundary = 2,
    /// Cell placed only to complete the coverage of the domain.
    #[default]
    Filler = 3,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Seed, Status::Boundary, Status::Filler];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Status::Seed),
            2 => Some(Status::Boundary),
            3 => Some(Status::Filler),
            _ => None,
        }
    }

    #[inline]
    fn slot(self) -> usize {
        self as usize - 1
    }
}

/// Number of sub-particles owned by a cell of each status.
///
/// A multiplicity of 8 splits the cell footprint into 2x2x2 octants, one
/// particle per octant. Sub-particle `k` takes its y offset from bit 0,
/// x from bit 1 and z from bit 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTable {
    counts: [u8; 3],
}

impl Default for StatusTable {
    fn default() -> Self {
        Self { counts: [1, 1, 1] }
    }
}

impl StatusTable {
    /// Create a table from the multiplicity of seed, boundary and filler cells.
    pub fn new(seed: u8, boundary: u8, filler: u8) -> Result<Self, AprError> {
        for count in [seed, boundary, filler] {
            if count != 1 && count != 8 {
                return Err(AprError::InvalidMultiplicity(count));
            }
        }
        Ok(Self {
            counts: [seed, boundary, filler],
        })
    }

    /// Table where seed cells own one particle per octant.
    pub fn with_split_seeds() -> Self {
        Self { counts: [8, 1, 1] }
    }

    #[inline]
    pub fn particle_count(&self, status: Status) -> u8 {
        self.counts[status.slot()]
    }

    pub fn counts(&self) -> [u8; 3] {
        self.counts
    }

    /// True if any status owns more than one particle.
    pub fn has_split_cells(&self) -> bool {
        self.counts.iter().any(|&c| c > 1)
    }
}

/// Offset of sub-particle `sub` inside a split cell, as `(dy, dx, dz)`.
#[inline]
pub fn octant_offset(sub: u8) -> (u32, u32, u32) {
    (
        (sub & 1) as u32,
        ((sub >> 1) & 1) as u32,
        ((sub >> 2) & 1) as u32,
    )
}
