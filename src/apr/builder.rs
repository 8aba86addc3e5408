//! Construction of particle cell topologies.
//!
//! Cells are either inserted one by one or derived from a required-level
//! field sampled per voxel. Either way the result is checked for exact
//! coverage of the image before it is returned.

use rayon::prelude::*;

use crate::AprError;
use crate::data::ExtraParticleData;

use super::{Apr, CellTopology, ImageDims, LevelIndex, Status, StatusTable, octant_offset};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingCell {
    z: u32,
    x: u32,
    y: u32,
    status: Status,
}

/// A leaf emitted by subdivision: `(level, x, y, z, status)`.
type Leaf = (u8, u32, u32, u32, Status);

/// Collects particle cells and assembles them into a [`CellTopology`].
#[derive(Debug, Clone)]
pub struct AprBuilder {
    dims: ImageDims,
    level_min: u8,
    level_max: u8,
    table: StatusTable,
    cells: Vec<Vec<PendingCell>>,
}

impl AprBuilder {
    /// Start an empty builder. Cells at `level_max` are single voxels.
    pub fn new(dims: ImageDims, level_min: u8, level_max: u8) -> Result<Self, AprError> {
        if dims.is_empty() {
            return Err(AprError::InvalidDimensions);
        }
        if level_min > level_max || level_max > 30 {
            return Err(AprError::InvalidLevels {
                level_min,
                level_max,
            });
        }
        Ok(Self {
            dims,
            level_min,
            level_max,
            table: StatusTable::default(),
            cells: vec![Vec::new(); (level_max - level_min) as usize + 1],
        })
    }

    pub fn with_status_table(mut self, table: StatusTable) -> Self {
        self.table = table;
        self
    }

    /// Build an APR with zero intensities from a required-level field.
    ///
    /// `required(y, x, z)` gives the level each voxel asks for; values above
    /// `level_max` are clamped.
    pub fn from_level_fn<F>(
        dims: ImageDims,
        level_min: u8,
        level_max: u8,
        required: F,
    ) -> Result<Apr, AprError>
    where
        F: Fn(u32, u32, u32) -> u8 + Sync,
    {
        let mut builder = Self::new(dims, level_min, level_max)?;
        builder.insert_required_levels(required)?;
        builder.build()
    }

    /// Grid shape of `level`.
    pub fn shape(&self, level: u8) -> (u32, u32, u32) {
        CellTopology::grid_shape(self.dims, self.level_max, level)
    }

    /// Add a single cell.
    pub fn insert(
        &mut self,
        level: u8,
        x: u32,
        y: u32,
        z: u32,
        status: Status,
    ) -> Result<&mut Self, AprError> {
        if level < self.level_min || level > self.level_max {
            return Err(AprError::CellOutOfBounds { level, x, y, z });
        }
        let (y_num, x_num, z_num) = self.shape(level);
        if y >= y_num || x >= x_num || z >= z_num {
            return Err(AprError::CellOutOfBounds { level, x, y, z });
        }
        self.cells[(level - self.level_min) as usize].push(PendingCell { z, x, y, status });
        Ok(self)
    }

    /// Insert the coarsest cells that satisfy a required-level field.
    ///
    /// A cell is kept when no voxel beneath it asks for a finer level,
    /// otherwise it is replaced by its children. Kept cells whose level equals
    /// the requested one are seeds. Cells finer than requested, which appear
    /// beside a subdivided sibling or at `level_min`, are fillers. Cells are
    /// then split further until face neighbours differ by at most one level.
    /// Seeds touching a coarser cell across a face become boundary cells.
    pub fn insert_required_levels<F>(&mut self, required: F) -> Result<&mut Self, AprError>
    where
        F: Fn(u32, u32, u32) -> u8 + Sync,
    {
        let pyramid = self.required_level_pyramid(&required);

        let mut emitted: Vec<Leaf> = Vec::new();
        let (y_num, x_num, z_num) = self.shape(self.level_min);
        let mut stack = Vec::new();
        for z in (0..z_num).rev() {
            for x in (0..x_num).rev() {
                for y in (0..y_num).rev() {
                    stack.push((self.level_min, x, y, z));
                }
            }
        }

        while let Some((level, x, y, z)) = stack.pop() {
            let wanted = pyramid.at(level, x, y, z);
            if wanted <= level {
                let status = if wanted == level {
                    Status::Seed
                } else {
                    Status::Filler
                };
                emitted.push((level, x, y, z, status));
                continue;
            }
            let (cy, cx, cz) = self.shape(level + 1);
            for k in (0..8u32).rev() {
                let (dy, dx, dz) = (k & 1, (k >> 1) & 1, (k >> 2) & 1);
                let (y1, x1, z1) = (2 * y + dy, 2 * x + dx, 2 * z + dz);
                if y1 < cy && x1 < cx && z1 < cz {
                    stack.push((level + 1, x1, y1, z1));
                }
            }
        }

        let mut emitted = self.balance(emitted);
        self.mark_boundaries(&mut emitted);

        for (level, x, y, z, status) in emitted {
            self.insert(level, x, y, z, status)?;
        }
        Ok(self)
    }

    /// Per-level maximum of the clamped required level over each footprint.
    fn required_level_pyramid<F>(&self, required: &F) -> LevelPyramid
    where
        F: Fn(u32, u32, u32) -> u8 + Sync,
    {
        let (level_min, level_max) = (self.level_min, self.level_max);
        let mut levels: Vec<Vec<u8>> = Vec::with_capacity((level_max - level_min) as usize + 1);
        let mut shapes = Vec::with_capacity(levels.capacity());

        let (y_num, x_num, z_num) = self.shape(level_max);
        let plane = y_num as usize * x_num as usize;
        let mut finest = vec![0u8; plane * z_num as usize];
        finest
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(z, slab)| {
                for x in 0..x_num {
                    for y in 0..y_num {
                        let wanted = required(y, x, z as u32).min(level_max);
                        slab[x as usize * y_num as usize + y as usize] = wanted;
                    }
                }
            });
        levels.push(finest);
        shapes.push((y_num, x_num, z_num));

        for level in (level_min..level_max).rev() {
            let (fy, fx, fz) = *shapes.last().unwrap_or(&(0, 0, 0));
            let fine = levels.last().map(Vec::as_slice).unwrap_or(&[]);
            let (y_num, x_num, z_num) = self.shape(level);
            let plane = y_num as usize * x_num as usize;
            let mut coarse = vec![0u8; plane * z_num as usize];
            coarse
                .par_chunks_mut(plane)
                .enumerate()
                .for_each(|(z, slab)| {
                    let z = z as u32;
                    for x in 0..x_num {
                        for y in 0..y_num {
                            let mut wanted = 0u8;
                            for k in 0..8u32 {
                                let (y1, x1, z1) =
                                    (2 * y + (k & 1), 2 * x + ((k >> 1) & 1), 2 * z + (k >> 2));
                                if y1 < fy && x1 < fx && z1 < fz {
                                    let idx = (z1 as usize * fx as usize + x1 as usize)
                                        * fy as usize
                                        + y1 as usize;
                                    wanted = wanted.max(fine[idx]);
                                }
                            }
                            slab[x as usize * y_num as usize + y as usize] = wanted;
                        }
                    }
                });
            levels.push(coarse);
            shapes.push((y_num, x_num, z_num));
        }

        levels.reverse();
        shapes.reverse();
        LevelPyramid {
            level_min,
            levels,
            shapes,
        }
    }

    /// Level of the leaf owning every voxel, y fastest.
    fn owner_levels(&self, leaves: &[Leaf]) -> Vec<u8> {
        let dims = self.dims;
        let (y_num, x_num, z_num) = (dims.y_num as usize, dims.x_num as usize, dims.z_num as usize);
        let mut owner = vec![0u8; dims.num_voxels()];
        for &(level, x, y, z, _) in leaves {
            let step = 1usize << (self.level_max - level);
            let (y0, x0, z0) = (y as usize * step, x as usize * step, z as usize * step);
            for vz in z0..(z0 + step).min(z_num) {
                for vx in x0..(x0 + step).min(x_num) {
                    let row = (vz * x_num + vx) * y_num;
                    owner[row + y0..row + (y0 + step).min(y_num)].fill(level);
                }
            }
        }
        owner
    }

    /// True if any voxel just outside a face of the leaf is owned at a level
    /// matching `pred`.
    fn face_owner_matches<P>(&self, owner: &[u8], leaf: Leaf, pred: P) -> bool
    where
        P: Fn(u8) -> bool,
    {
        let dims = self.dims;
        let limits = [dims.y_num as i64, dims.x_num as i64, dims.z_num as i64];
        let voxel = |p: [i64; 3]| ((p[2] * limits[1] + p[1]) * limits[0] + p[0]) as usize;

        let (level, x, y, z, _) = leaf;
        let step = 1i64 << (self.level_max - level);
        let lo = [y as i64 * step, x as i64 * step, z as i64 * step];
        let hi = [
            (lo[0] + step).min(limits[0]),
            (lo[1] + step).min(limits[1]),
            (lo[2] + step).min(limits[2]),
        ];
        for axis in 0..3 {
            for outside in [lo[axis] - 1, hi[axis]] {
                if outside < 0 || outside >= limits[axis] {
                    continue;
                }
                let (a, b) = ((axis + 1) % 3, (axis + 2) % 3);
                for u in lo[a]..hi[a] {
                    for v in lo[b]..hi[b] {
                        let mut p = [0i64; 3];
                        p[axis] = outside;
                        p[a] = u;
                        p[b] = v;
                        if pred(owner[voxel(p)]) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /// Split leaves into fillers until no face joins cells more than one
    /// level apart.
    fn balance(&self, mut leaves: Vec<Leaf>) -> Vec<Leaf> {
        let mut passes = 0;
        loop {
            let owner = self.owner_levels(&leaves);
            let split: Vec<bool> = leaves
                .par_iter()
                .map(|&leaf| self.face_owner_matches(&owner, leaf, |other| other > leaf.0 + 1))
                .collect();
            let count = split.iter().filter(|&&s| s).count();
            if count == 0 {
                if passes > 0 {
                    log::debug!("balanced required levels in {} passes", passes);
                }
                return leaves;
            }
            passes += 1;

            let mut next = Vec::with_capacity(leaves.len() + 7 * count);
            for (leaf, split) in leaves.into_iter().zip(split) {
                if !split {
                    next.push(leaf);
                    continue;
                }
                let (level, x, y, z, _) = leaf;
                let (cy, cx, cz) = self.shape(level + 1);
                for k in 0..8u8 {
                    let (dy, dx, dz) = octant_offset(k);
                    let (y1, x1, z1) = (2 * y + dy, 2 * x + dx, 2 * z + dz);
                    if y1 < cy && x1 < cx && z1 < cz {
                        next.push((level + 1, x1, y1, z1, Status::Filler));
                    }
                }
            }
            leaves = next;
        }
    }

    fn mark_boundaries(&self, leaves: &mut [Leaf]) {
        let owner = self.owner_levels(leaves);
        leaves.par_iter_mut().for_each(|leaf| {
            let level = leaf.0;
            if leaf.4 == Status::Seed && self.face_owner_matches(&owner, *leaf, |other| other < level) {
                leaf.4 = Status::Boundary;
            }
        });
    }

    /// Sort, check and encode the collected cells.
    pub fn build_topology(self) -> Result<CellTopology, AprError> {
        let mut levels = Vec::with_capacity(self.cells.len());
        for (offset, mut cells) in self.cells.into_iter().enumerate() {
            let level = self.level_min + offset as u8;
            cells.sort_unstable();
            if let Some(pair) = cells
                .windows(2)
                .find(|w| (w[0].z, w[0].x, w[0].y) == (w[1].z, w[1].x, w[1].y))
            {
                let cell = pair[1];
                return Err(AprError::OverlappingCells {
                    level,
                    x: cell.x,
                    y: cell.y,
                    z: cell.z,
                });
            }

            let shape = CellTopology::grid_shape(self.dims, self.level_max, level);
            let (y_num, x_num, z_num) = shape;
            let mut columns = Vec::with_capacity(x_num as usize * z_num as usize);
            let mut cursor = 0;
            let mut column_cells = Vec::new();
            for z in 0..z_num {
                for x in 0..x_num {
                    column_cells.clear();
                    while cursor < cells.len() && cells[cursor].z == z && cells[cursor].x == x {
                        column_cells.push((cells[cursor].y, cells[cursor].status));
                        cursor += 1;
                    }
                    columns.push(LevelIndex::encode_column(&column_cells, y_num, &self.table));
                }
            }
            levels.push(LevelIndex::from_columns(level, shape, columns)?);
        }

        let topology = CellTopology::from_levels(
            self.dims,
            self.level_min,
            self.level_max,
            self.level_max,
            self.table,
            levels,
        )?;
        topology.validate_coverage()?;
        topology.validate_balance()?;
        Ok(topology)
    }

    /// Build an APR whose particle intensities are all zero.
    pub fn build<T: Copy + Default + Send + Sync>(self) -> Result<Apr<T>, AprError> {
        let topology = self.build_topology()?;
        let intensities = ExtraParticleData::new(&topology);
        Apr::new(topology, intensities)
    }
}

/// Required levels of every cell position, coarsest level first.
struct LevelPyramid {
    level_min: u8,
    levels: Vec<Vec<u8>>,
    shapes: Vec<(u32, u32, u32)>,
}

impl LevelPyramid {
    fn at(&self, level: u8, x: u32, y: u32, z: u32) -> u8 {
        let offset = (level - self.level_min) as usize;
        let (y_num, x_num, _) = self.shapes[offset];
        self.levels[offset][(z as usize * x_num as usize + x as usize) * y_num as usize + y as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apr::Face;

    #[test]
    fn test_insert_rejects_out_of_bounds() {
        let mut builder = AprBuilder::new(ImageDims::new(4, 4, 1), 1, 2).unwrap();
        assert!(builder.insert(1, 2, 0, 0, Status::Filler).is_err());
        assert!(builder.insert(3, 0, 0, 0, Status::Filler).is_err());
        assert!(builder.insert(0, 0, 0, 0, Status::Filler).is_err());
        assert!(builder.insert(2, 3, 3, 0, Status::Seed).is_ok());
    }

    #[test]
    fn test_overlap_detected() {
        let mut builder = AprBuilder::new(ImageDims::new(2, 1, 1), 0, 1).unwrap();
        builder.insert(1, 0, 0, 0, Status::Seed).unwrap();
        builder.insert(1, 0, 0, 0, Status::Seed).unwrap();
        builder.insert(1, 0, 1, 0, Status::Seed).unwrap();
        assert!(matches!(
            builder.build_topology(),
            Err(AprError::OverlappingCells { .. })
        ));
    }

    #[test]
    fn test_nested_overlap_detected() {
        let mut builder = AprBuilder::new(ImageDims::new(2, 1, 1), 0, 1).unwrap();
        builder.insert(0, 0, 0, 0, Status::Filler).unwrap();
        builder.insert(1, 0, 1, 0, Status::Seed).unwrap();
        assert!(matches!(
            builder.build_topology(),
            Err(AprError::OverlappingCells { .. })
        ));
    }

    #[test]
    fn test_gap_detected() {
        let mut builder = AprBuilder::new(ImageDims::new(4, 1, 1), 1, 2).unwrap();
        builder.insert(1, 0, 0, 0, Status::Filler).unwrap();
        builder.insert(2, 0, 2, 0, Status::Seed).unwrap();
        assert!(matches!(
            builder.build_topology(),
            Err(AprError::UncoveredVoxel { y: 3, .. })
        ));
    }

    #[test]
    fn test_manual_build_in_canonical_order() {
        // 4x2x1 image: one coarse cell over y in 0..2, four fine cells over y in 2..4.
        let mut builder = AprBuilder::new(ImageDims::new(4, 2, 1), 0, 1).unwrap();
        builder.insert(1, 1, 3, 0, Status::Seed).unwrap();
        builder.insert(1, 0, 2, 0, Status::Seed).unwrap();
        builder.insert(1, 1, 2, 0, Status::Seed).unwrap();
        builder.insert(1, 0, 3, 0, Status::Seed).unwrap();
        // Level 0 grid is 2x1x1 here, the coarse cell is (y=0).
        builder.insert(0, 0, 0, 0, Status::Filler).unwrap();
        let topology = builder.build_topology().unwrap();

        assert_eq!(topology.total_particles(), 5);
        let order: Vec<_> = (0..topology.total_cells())
            .map(|i| topology.locate(i).unwrap())
            .map(|at| (at.level, at.x, at.y))
            .collect();
        assert_eq!(
            order,
            vec![(0, 0, 0), (1, 0, 2), (1, 0, 3), (1, 1, 2), (1, 1, 3)]
        );
    }

    #[test]
    fn test_level_fn_statuses() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(4, 4, 1), 1, 2, |y, _, _| {
            if y < 2 { 2 } else { 1 }
        })
        .unwrap();
        let topology = apr.topology();
        assert_eq!(topology.level_particles(2).end - topology.level_particles(2).start, 8);
        assert_eq!(topology.level_particles(1).end - topology.level_particles(1).start, 2);

        for (i, node) in topology.nodes().iter().enumerate() {
            let at = topology.locate(i).unwrap();
            match (at.level, at.y) {
                // Fine cells at y = 1 touch the coarse row at y = 2.
                (2, 1) => assert_eq!(node.status, Status::Boundary),
                (2, _) => assert_eq!(node.status, Status::Seed),
                _ => assert_eq!(node.status, Status::Seed),
            }
        }
    }

    #[test]
    fn test_level_fn_balances_levels() {
        // One voxel asks for level 3 beside a region content with level 1.
        let apr = AprBuilder::from_level_fn(ImageDims::new(8, 1, 1), 1, 3, |y, _, _| {
            if y == 4 { 3 } else { 1 }
        })
        .unwrap();
        let levels = crate::compute::interp_level(apr.topology()).unwrap();
        assert_eq!(levels.mesh, vec![2, 2, 2, 2, 3, 3, 2, 2]);

        let mut it = apr.iterator();
        let mut more = it.begin();
        while more {
            let y_max = it.spatial_index_y_max(it.level());
            if it.y() > 0 {
                assert_eq!(it.find_neighbours_in_direction(Face::MinusY), 1);
            }
            if it.y() + 1 < y_max {
                assert_eq!(it.find_neighbours_in_direction(Face::PlusY), 1);
            }
            more = it.it_forward();
        }
    }

    #[test]
    fn test_level_fn_below_level_min_is_filler() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(4, 4, 4), 1, 2, |_, _, _| 0).unwrap();
        assert_eq!(apr.total_number_particles(), 8);
        assert!(
            apr.topology()
                .nodes()
                .iter()
                .all(|n| n.status == Status::Filler)
        );
    }

    #[test]
    fn test_split_seeds_below_pixel_level() {
        let mut builder = AprBuilder::new(ImageDims::new(4, 4, 4), 1, 2)
            .unwrap()
            .with_status_table(StatusTable::with_split_seeds());
        builder.insert_required_levels(|_, _, _| 1).unwrap();
        let topology = builder.build_topology().unwrap();
        assert_eq!(topology.total_cells(), 8);
        assert_eq!(topology.total_particles(), 64);
        assert_eq!(topology.node_of_particle(9), 1);
    }

    #[test]
    fn test_split_seeds_at_pixel_level_rejected() {
        let mut builder = AprBuilder::new(ImageDims::new(2, 2, 2), 0, 1)
            .unwrap()
            .with_status_table(StatusTable::with_split_seeds());
        builder.insert_required_levels(|_, _, _| 1).unwrap();
        assert!(matches!(
            builder.build_topology(),
            Err(AprError::MultiParticleAtFinestLevel { .. })
        ));
    }
}
