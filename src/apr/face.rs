//! Face directions and level deltas for neighbour queries.

/// One of the six face directions of a cell.
///
/// The discriminants are the conventional direction indices
/// `[+y, -y, +x, -x, +z, -z] = [0, 1, 2, 3, 4, 5]`; numeric kernels index
/// per-direction tables with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Face {
    PlusY = 0,
    MinusY = 1,
    PlusX = 2,
    MinusX = 3,
    PlusZ = 4,
    MinusZ = 5,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::PlusY,
        Face::MinusY,
        Face::PlusX,
        Face::MinusX,
        Face::PlusZ,
        Face::MinusZ,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The face pointing the other way along the same axis.
    #[inline]
    pub fn opposite(self) -> Self {
        Self::ALL[self.index() ^ 1]
    }

    /// Axis of the face: 0 = y, 1 = x, 2 = z.
    #[inline]
    pub fn axis(self) -> usize {
        self.index() / 2
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.index() % 2 == 0
    }

    /// Unit offset `(dy, dx, dz)`.
    #[inline]
    pub fn offset(self) -> (i64, i64, i64) {
        let step = if self.is_positive() { 1 } else { -1 };
        match self.axis() {
            0 => (step, 0, 0),
            1 => (0, step, 0),
            _ => (0, 0, step),
        }
    }
}

/// Resolution of a neighbour relative to the querying cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum LevelDelta {
    Coarser = -1,
    Same = 0,
    Finer = 1,
}

impl LevelDelta {
    pub const ALL: [LevelDelta; 3] = [LevelDelta::Same, LevelDelta::Coarser, LevelDelta::Finer];

    #[inline]
    pub fn value(self) -> i8 {
        self as i8
    }
}
