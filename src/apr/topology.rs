//! Particle cell topology: cell nodes in canonical order plus range tables.
//!
//! Nodes are ordered by `(level, z, x, y)`; the particles of a node occupy the
//! consecutive indices `first_particle..first_particle + particles`. Range
//! tables give the particle bounds of every level, `(level, z)` slice and
//! `(level, z, x)` column so loops can be split at any of those granularities.
//!
//! Nodes carry no coordinates. A node's level and column follow from the
//! range tables and its y coordinate from the runs of that column.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::AprError;

use super::{Face, LevelIndex, Status, StatusTable};

/// Dimensions of the original dense image in voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDims {
    pub y_num: u32,
    pub x_num: u32,
    pub z_num: u32,
}

impl ImageDims {
    pub fn new(y_num: u32, x_num: u32, z_num: u32) -> Self {
        Self {
            y_num,
            x_num,
            z_num,
        }
    }

    #[inline]
    pub fn num_voxels(&self) -> usize {
        self.y_num as usize * self.x_num as usize * self.z_num as usize
    }

    /// True if any dimension is zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.y_num == 0 || self.x_num == 0 || self.z_num == 0
    }

    /// Smallest level at which one cell is one voxel: `ceil(log2(max dim))`.
    pub fn natural_level_max(&self) -> u8 {
        let max_dim = self.y_num.max(self.x_num).max(self.z_num).max(1);
        (32 - (max_dim - 1).leading_zeros()) as u8
    }
}

/// A stored particle cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellNode {
    pub status: Status,
    pub particles: u8,
    /// Global index of the node's first particle.
    pub first_particle: u64,
}

/// Position of a node, decoded from the range tables and runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellLocation {
    pub level: u8,
    pub x: u32,
    pub y: u32,
    pub z: u32,
    /// Index of the node's run inside its column.
    pub run: usize,
    /// One past the last node of the node's column.
    pub column_end: usize,
}

/// Per-level range tables.
#[derive(Debug, Clone)]
struct LevelRanges {
    /// Global node index at the start of each column, plus one past the end.
    column_nodes: Vec<usize>,
    /// Global particle index at the start of each column, plus one past the end.
    column_particles: Vec<u64>,
}

/// Immutable topology of particle cells across resolution levels.
#[derive(Debug, Clone)]
pub struct CellTopology {
    dims: ImageDims,
    level_min: u8,
    level_max: u8,
    pixel_level: u8,
    table: StatusTable,
    levels: Vec<LevelIndex>,
    ranges: Vec<LevelRanges>,
    nodes: Vec<CellNode>,
    /// Node of every particle; `None` when every node owns exactly one particle.
    particle_node: Option<Vec<u32>>,
    total_particles: u64,
}

impl CellTopology {
    /// Shape `(y_num, x_num, z_num)` of the cell grid at `level`, where cells at
    /// `pixel_level` are single voxels.
    pub fn grid_shape(dims: ImageDims, pixel_level: u8, level: u8) -> (u32, u32, u32) {
        let shift = pixel_level.saturating_sub(level) as u32;
        let div = |n: u32| -> u32 { ((n as u64 + (1u64 << shift) - 1) >> shift) as u32 };
        (div(dims.y_num), div(dims.x_num), div(dims.z_num))
    }

    /// Assemble a topology from one [`LevelIndex`] per level, coarsest first.
    pub fn from_levels(
        dims: ImageDims,
        level_min: u8,
        level_max: u8,
        pixel_level: u8,
        table: StatusTable,
        levels: Vec<LevelIndex>,
    ) -> Result<Self, AprError> {
        if dims.is_empty() {
            return Err(AprError::InvalidDimensions);
        }
        if level_min > level_max || level_max > pixel_level || pixel_level > 30 {
            return Err(AprError::InvalidLevels {
                level_min,
                level_max,
            });
        }
        let num_levels = (level_max - level_min) as usize + 1;
        if levels.len() != num_levels {
            return Err(AprError::SizeMismatch {
                expected: num_levels,
                found: levels.len(),
            });
        }

        let mut nodes = Vec::new();
        let mut ranges = Vec::with_capacity(num_levels);
        let mut particle = 0u64;

        for (offset, index) in levels.iter().enumerate() {
            let level = level_min + offset as u8;
            let expected = Self::grid_shape(dims, pixel_level, level);
            let found = (index.y_num(), index.x_num(), index.z_num());
            if index.level() != level || found != expected {
                return Err(AprError::InvalidFormat(format!(
                    "level {} has shape {:?}, expected {:?}",
                    index.level(),
                    found,
                    expected
                )));
            }

            let mut column_nodes = Vec::with_capacity(index.num_columns() + 1);
            let mut column_particles = Vec::with_capacity(index.num_columns() + 1);

            for z in 0..index.z_num() {
                for x in 0..index.x_num() {
                    column_nodes.push(nodes.len());
                    column_particles.push(particle);
                    for cell in index.cells(x, z) {
                        if cell.particles != table.particle_count(cell.status) {
                            return Err(AprError::InvalidMultiplicity(cell.particles));
                        }
                        if cell.particles > 1 && level >= pixel_level {
                            return Err(AprError::MultiParticleAtFinestLevel {
                                level,
                                count: cell.particles,
                            });
                        }
                        nodes.push(CellNode {
                            status: cell.status,
                            particles: cell.particles,
                            first_particle: particle,
                        });
                        particle += cell.particles as u64;
                    }
                }
            }
            column_nodes.push(nodes.len());
            column_particles.push(particle);
            ranges.push(LevelRanges {
                column_nodes,
                column_particles,
            });
        }

        let particle_node = if table.has_split_cells() {
            let mut map = Vec::with_capacity(particle as usize);
            for (i, node) in nodes.iter().enumerate() {
                map.extend(std::iter::repeat_n(i as u32, node.particles as usize));
            }
            Some(map)
        } else {
            None
        };

        log::debug!(
            "topology: levels {}..={}, {} cells, {} particles",
            level_min,
            level_max,
            nodes.len(),
            particle
        );

        Ok(Self {
            dims,
            level_min,
            level_max,
            pixel_level,
            table,
            levels,
            ranges,
            nodes,
            particle_node,
            total_particles: particle,
        })
    }

    /// Check that the cells cover every voxel of the image exactly once.
    ///
    /// No cell may lie beneath a coarser cell, and the clipped footprints must
    /// add up to the image volume. Only the runs are visited, so the cost
    /// follows the number of cells rather than the image size.
    pub fn validate_coverage(&self) -> Result<(), AprError> {
        let mut volume = 0u128;
        for level in self.level_min..=self.level_max {
            let index = self.level(level);
            let x_num = index.x_num() as usize;
            for column in 0..index.num_columns() {
                let (x, z) = ((column % x_num) as u32, (column / x_num) as u32);
                for cell in index.cells_by_index(column) {
                    let y = cell.y;
                    let covered = (self.level_min..level).any(|coarse| {
                        let shift = level - coarse;
                        self.find_node(coarse, x >> shift, y >> shift, z >> shift).is_some()
                    });
                    if covered {
                        return Err(AprError::OverlappingCells { level, x, y, z });
                    }
                    volume += self.footprint_volume(level, x, y, z);
                }
            }
        }
        let dims = self.dims;
        let total = dims.y_num as u128 * dims.x_num as u128 * dims.z_num as u128;
        if volume == total {
            return Ok(());
        }
        match self.first_uncovered_voxel() {
            Some((x, y, z)) => Err(AprError::UncoveredVoxel { x, y, z }),
            None => Err(AprError::InvalidFormat(format!(
                "cells cover {} of {} voxels",
                volume, total
            ))),
        }
    }

    /// Number of image voxels under the cell at `(level, x, y, z)`.
    fn footprint_volume(&self, level: u8, x: u32, y: u32, z: u32) -> u128 {
        let step = self.step_size(level) as u64;
        let side = |c: u32, n: u32| -> u128 {
            let lo = c as u64 * step;
            ((lo + step).min(n as u64).saturating_sub(lo)) as u128
        };
        side(y, self.dims.y_num) * side(x, self.dims.x_num) * side(z, self.dims.z_num)
    }

    /// First voxel, in depth-first cell order, that no cell covers.
    fn first_uncovered_voxel(&self) -> Option<(u32, u32, u32)> {
        let (y_num, x_num, z_num) = self.shape(self.level_min);
        for z in 0..z_num {
            for x in 0..x_num {
                for y in 0..y_num {
                    if let Some(voxel) = self.uncovered_beneath(self.level_min, x, y, z) {
                        return Some(voxel);
                    }
                }
            }
        }
        None
    }

    fn uncovered_beneath(&self, level: u8, x: u32, y: u32, z: u32) -> Option<(u32, u32, u32)> {
        if self.find_node(level, x, y, z).is_some() {
            return None;
        }
        if level >= self.level_max {
            let step = self.step_size(level);
            return Some((x * step, y * step, z * step));
        }
        let (cy, cx, cz) = self.shape(level + 1);
        for z1 in (2 * z..2 * z + 2).filter(|&c| c < cz) {
            for x1 in (2 * x..2 * x + 2).filter(|&c| c < cx) {
                for y1 in (2 * y..2 * y + 2).filter(|&c| c < cy) {
                    if let Some(voxel) = self.uncovered_beneath(level + 1, x1, y1, z1) {
                        return Some(voxel);
                    }
                }
            }
        }
        None
    }

    /// Check that cells sharing a face differ by at most one level.
    ///
    /// Across every face inside the image a cell must meet a cell of the
    /// same level, a coarser cell one level up, or all the children of the
    /// adjacent position that touch the face.
    pub fn validate_balance(&self) -> Result<(), AprError> {
        for level in self.level_min..=self.level_max {
            let index = self.level(level);
            let (y_num, x_num, z_num) = self.shape(level);
            for column in 0..index.num_columns() {
                let (x, z) = ((column % x_num as usize) as u32, (column / x_num as usize) as u32);
                for cell in index.cells_by_index(column) {
                    for face in Face::ALL {
                        let (dy, dx, dz) = face.offset();
                        let ny = cell.y as i64 + dy;
                        let nx = x as i64 + dx;
                        let nz = z as i64 + dz;
                        if ny < 0
                            || nx < 0
                            || nz < 0
                            || ny >= y_num as i64
                            || nx >= x_num as i64
                            || nz >= z_num as i64
                        {
                            continue;
                        }
                        if !self.face_is_balanced(level, face, nx as u32, ny as u32, nz as u32) {
                            return Err(AprError::UnbalancedCell {
                                level,
                                x,
                                y: cell.y,
                                z,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// True if the position `(x, y, z)` across `face` from a cell at `level`
    /// is covered within one level of it.
    fn face_is_balanced(&self, level: u8, face: Face, x: u32, y: u32, z: u32) -> bool {
        if self.find_node(level, x, y, z).is_some() {
            return true;
        }
        if level > self.level_min && self.find_node(level - 1, x / 2, y / 2, z / 2).is_some() {
            return true;
        }
        if level >= self.level_max {
            return false;
        }
        let (cy, cx, cz) = self.shape(level + 1);
        let limits = [cy, cx, cz];
        let axis = face.axis();
        let (a, b) = ((axis + 1) % 3, (axis + 2) % 3);
        let mut base = [2 * y, 2 * x, 2 * z];
        base[axis] += if face.is_positive() { 0 } else { 1 };
        for i in 0..2 {
            for j in 0..2 {
                let mut p = base;
                p[a] += i;
                p[b] += j;
                if p.iter().zip(limits).any(|(&c, n)| c >= n) {
                    continue;
                }
                if self.find_node(level + 1, p[1], p[0], p[2]).is_none() {
                    return false;
                }
            }
        }
        true
    }

    #[inline]
    pub fn dims(&self) -> ImageDims {
        self.dims
    }

    #[inline]
    pub fn level_min(&self) -> u8 {
        self.level_min
    }

    #[inline]
    pub fn level_max(&self) -> u8 {
        self.level_max
    }

    /// Level at which a cell covers exactly one voxel.
    #[inline]
    pub fn pixel_level(&self) -> u8 {
        self.pixel_level
    }

    #[inline]
    pub fn status_table(&self) -> &StatusTable {
        &self.table
    }

    #[inline]
    pub fn total_particles(&self) -> u64 {
        self.total_particles
    }

    #[inline]
    pub fn total_cells(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn nodes(&self) -> &[CellNode] {
        &self.nodes
    }

    #[inline]
    pub fn node(&self, index: usize) -> &CellNode {
        &self.nodes[index]
    }

    #[inline]
    pub fn has_level(&self, level: u8) -> bool {
        level >= self.level_min && level <= self.level_max
    }

    /// Sparse index of `level`. Panics if the level is outside the topology.
    #[inline]
    pub fn level(&self, level: u8) -> &LevelIndex {
        &self.levels[(level - self.level_min) as usize]
    }

    pub fn levels(&self) -> &[LevelIndex] {
        &self.levels
    }

    /// Footprint side of a cell at `level`, in voxels.
    #[inline]
    pub fn step_size(&self, level: u8) -> u32 {
        1 << (self.pixel_level - level)
    }

    /// Grid shape `(y_num, x_num, z_num)` at any level up to the pixel level.
    pub fn shape(&self, level: u8) -> (u32, u32, u32) {
        Self::grid_shape(self.dims, self.pixel_level, level)
    }

    pub fn spatial_index_y_max(&self, level: u8) -> u32 {
        self.shape(level).0
    }

    pub fn spatial_index_x_max(&self, level: u8) -> u32 {
        self.shape(level).1
    }

    pub fn spatial_index_z_max(&self, level: u8) -> u32 {
        self.shape(level).2
    }

    /// Node owning global particle `particle`.
    #[inline]
    pub fn node_of_particle(&self, particle: u64) -> usize {
        match &self.particle_node {
            Some(map) => map[particle as usize] as usize,
            None => particle as usize,
        }
    }

    /// Particle bounds of a whole level; empty outside the level range.
    pub fn level_particles(&self, level: u8) -> Range<u64> {
        if !self.has_level(level) {
            return 0..0;
        }
        let table = &self.ranges[(level - self.level_min) as usize].column_particles;
        table[0]..table[table.len() - 1]
    }

    /// Particle bounds of the `(level, z)` slice.
    pub fn z_particles(&self, level: u8, z: u32) -> Range<u64> {
        if !self.has_level(level) || z >= self.level(level).z_num() {
            return 0..0;
        }
        let x_num = self.level(level).x_num() as usize;
        let table = &self.ranges[(level - self.level_min) as usize].column_particles;
        let begin = z as usize * x_num;
        table[begin]..table[begin + x_num]
    }

    /// Particle bounds of the `(level, z, x)` column.
    pub fn zx_particles(&self, level: u8, z: u32, x: u32) -> Range<u64> {
        if !self.has_level(level) {
            return 0..0;
        }
        let index = self.level(level);
        if z >= index.z_num() || x >= index.x_num() {
            return 0..0;
        }
        let column = index.column_index(x, z);
        let table = &self.ranges[(level - self.level_min) as usize].column_particles;
        table[column]..table[column + 1]
    }

    /// Node bounds of a level.
    pub fn level_nodes(&self, level: u8) -> Range<usize> {
        if !self.has_level(level) {
            return 0..0;
        }
        let table = &self.ranges[(level - self.level_min) as usize].column_nodes;
        table[0]..table[table.len() - 1]
    }

    /// Node bounds of the `(level, z, x)` column.
    pub fn column_nodes(&self, level: u8, x: u32, z: u32) -> Range<usize> {
        let index = self.level(level);
        let column = index.column_index(x, z);
        let table = &self.ranges[(level - self.level_min) as usize].column_nodes;
        table[column]..table[column + 1]
    }

    /// Node stored at `(level, x, y, z)`, if any.
    pub fn find_node(&self, level: u8, x: u32, y: u32, z: u32) -> Option<usize> {
        if !self.has_level(level) {
            return None;
        }
        let index = self.level(level);
        if x >= index.x_num() || y >= index.y_num() || z >= index.z_num() {
            return None;
        }
        let start = self.column_nodes(level, x, z).start;
        index.cell_ordinal(x, z, y).map(|ordinal| start + ordinal)
    }

    /// Level, coordinates and run of node `node`, or `None` if there is no
    /// such node.
    pub fn locate(&self, node: usize) -> Option<CellLocation> {
        let offset = self
            .ranges
            .iter()
            .position(|r| r.column_nodes.last().is_some_and(|&end| node < end))?;
        let table = &self.ranges[offset].column_nodes;
        let column = table.partition_point(|&start| start <= node).checked_sub(1)?;
        let index = &self.levels[offset];
        let cell = index.cells_by_index(column).nth(node - table[column])?;
        let x_num = index.x_num() as usize;
        Some(CellLocation {
            level: self.level_min + offset as u8,
            x: (column % x_num) as u32,
            y: cell.y,
            z: (column / x_num) as u32,
            run: cell.run,
            column_end: table[column + 1],
        })
    }

    /// Pixels per particle of the original image.
    pub fn computational_ratio(&self) -> f64 {
        self.dims.num_voxels() as f64 / self.total_particles.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apr::AprBuilder;

    #[test]
    fn test_natural_level_max() {
        assert_eq!(ImageDims::new(1, 1, 1).natural_level_max(), 0);
        assert_eq!(ImageDims::new(2, 1, 1).natural_level_max(), 1);
        assert_eq!(ImageDims::new(5, 3, 4).natural_level_max(), 3);
        assert_eq!(ImageDims::new(64, 64, 64).natural_level_max(), 6);
    }

    #[test]
    fn test_grid_shape_rounds_up() {
        let dims = ImageDims::new(5, 4, 1);
        assert_eq!(CellTopology::grid_shape(dims, 3, 3), (5, 4, 1));
        assert_eq!(CellTopology::grid_shape(dims, 3, 2), (3, 2, 1));
        assert_eq!(CellTopology::grid_shape(dims, 3, 0), (1, 1, 1));
    }

    #[test]
    fn test_ranges_are_consistent() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(8, 8, 8), 1, 3, |y, x, z| {
            if x < 4 && y < 4 && z < 4 { 3 } else { 1 }
        })
        .unwrap();
        let topology = apr.topology();

        let mut total = 0;
        for level in topology.level_min()..=topology.level_max() {
            let level_range = topology.level_particles(level);
            assert_eq!(level_range.start, total);
            let mut z_total = level_range.start;
            for z in 0..topology.spatial_index_z_max(level) {
                let z_range = topology.z_particles(level, z);
                assert_eq!(z_range.start, z_total);
                z_total = z_range.end;
            }
            assert_eq!(z_total, level_range.end);
            total = level_range.end;
        }
        assert_eq!(total, topology.total_particles());
    }

    #[test]
    fn test_find_node() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(4, 4, 1), 1, 2, |y, _, _| {
            if y < 2 { 2 } else { 1 }
        })
        .unwrap();
        let topology = apr.topology();
        let node = topology.find_node(2, 1, 1, 0).unwrap();
        let location = topology.locate(node).unwrap();
        assert_eq!((location.level, location.x, location.y, location.z), (2, 1, 1, 0));
        assert!(topology.find_node(2, 0, 2, 0).is_none());
        assert!(topology.find_node(1, 0, 1, 0).is_some());
        assert!(topology.find_node(1, 5, 0, 0).is_none());
        assert!(topology.find_node(7, 0, 0, 0).is_none());
    }

    #[test]
    fn test_locate_inverts_find_node() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(8, 8, 4), 1, 3, |y, x, z| {
            if y < 3 && x > 4 && z == 1 { 3 } else { 1 }
        })
        .unwrap();
        let topology = apr.topology();
        for node in 0..topology.total_cells() {
            let at = topology.locate(node).unwrap();
            assert_eq!(topology.find_node(at.level, at.x, at.y, at.z), Some(node));
            assert!(node < at.column_end);
            assert!(topology.column_nodes(at.level, at.x, at.z).contains(&node));
        }
        assert!(topology.locate(topology.total_cells()).is_none());
    }

    #[test]
    fn test_coverage_check_is_sparse() {
        // One level-0 cell spans a billion voxels; the levels below hold only gaps.
        let dims = ImageDims::new(1 << 30, 1, 1);
        let mut builder = AprBuilder::new(dims, 0, 30).unwrap();
        builder.insert(0, 0, 0, 0, Status::Filler).unwrap();
        let topology = builder.build_topology().unwrap();
        assert_eq!(topology.total_particles(), 1);
        assert_eq!(topology.step_size(0), 1 << 30);

        let mut builder = AprBuilder::new(dims, 0, 30).unwrap();
        builder.insert(1, 0, 0, 0, Status::Filler).unwrap();
        assert!(matches!(
            builder.build_topology(),
            Err(AprError::UncoveredVoxel { x: 0, y: 536_870_912, z: 0 })
        ));
    }

    #[test]
    fn test_unbalanced_cells_rejected() {
        // A level-1 cell over y in 0..4 meets level-3 cells at y = 4.
        let mut builder = AprBuilder::new(ImageDims::new(8, 1, 1), 1, 3).unwrap();
        builder.insert(1, 0, 0, 0, Status::Filler).unwrap();
        builder.insert(3, 0, 4, 0, Status::Seed).unwrap();
        builder.insert(3, 0, 5, 0, Status::Seed).unwrap();
        builder.insert(2, 0, 3, 0, Status::Filler).unwrap();
        assert!(matches!(
            builder.build_topology(),
            Err(AprError::UnbalancedCell { level: 1, x: 0, y: 0, z: 0 })
        ));

        let mut builder = AprBuilder::new(ImageDims::new(8, 1, 1), 1, 3).unwrap();
        builder.insert(2, 0, 0, 0, Status::Filler).unwrap();
        builder.insert(2, 0, 1, 0, Status::Filler).unwrap();
        builder.insert(3, 0, 4, 0, Status::Seed).unwrap();
        builder.insert(3, 0, 5, 0, Status::Seed).unwrap();
        builder.insert(2, 0, 3, 0, Status::Filler).unwrap();
        assert!(builder.build_topology().is_ok());
    }

    #[test]
    fn test_computational_ratio() {
        let apr =
            AprBuilder::from_level_fn(ImageDims::new(4, 4, 4), 0, 2, |_, _, _| 0).unwrap();
        assert_eq!(apr.total_number_particles(), 1);
        assert!((apr.topology().computational_ratio() - 64.0).abs() < 1e-12);
    }
}
