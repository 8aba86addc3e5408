//! Stateful cursor over particles in canonical order.
//!
//! A [`CellIterator`] walks one particle at a time, decoding the y coordinate
//! incrementally from the column runs. It is cheap to copy: parallel loops
//! hand each worker its own copy and position it with
//! [`set_iterator_to_particle_by_number`](CellIterator::set_iterator_to_particle_by_number)
//! or one of the `begin_*` range starters.

use super::{CellTopology, RunEntry, Status, octant_offset};
use super::neighbours::NeighbourNodes;
use crate::AprError;

/// Iterator over the particles of an APR.
pub type AprIterator<'a> = CellIterator<'a>;
/// Iterator over the interior nodes of an APR tree.
pub type AprTreeIterator<'a> = CellIterator<'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Cursor {
    pub(super) particle: u64,
    pub(super) node: usize,
    pub(super) sub: u8,
    pub(super) level: u8,
    pub(super) x: u32,
    pub(super) y: u32,
    pub(super) z: u32,
    pub(super) run: usize,
    /// One past the last node of the current column.
    pub(super) column_end: usize,
    /// One past the last particle of the active range.
    pub(super) end: u64,
}

/// Cursor over the particles of a [`CellTopology`].
#[derive(Debug, Clone, Copy)]
pub struct CellIterator<'a> {
    pub(super) topology: &'a CellTopology,
    pub(super) cursor: Option<Cursor>,
    pub(super) found: NeighbourNodes,
}

impl<'a> CellIterator<'a> {
    pub fn new(topology: &'a CellTopology) -> Self {
        Self {
            topology,
            cursor: None,
            found: NeighbourNodes::default(),
        }
    }

    #[inline]
    pub fn topology(&self) -> &'a CellTopology {
        self.topology
    }

    #[inline]
    pub fn total_number_particles(&self) -> u64 {
        self.topology.total_particles()
    }

    #[inline]
    pub fn level_min(&self) -> u8 {
        self.topology.level_min()
    }

    #[inline]
    pub fn level_max(&self) -> u8 {
        self.topology.level_max()
    }

    pub fn spatial_index_y_max(&self, level: u8) -> u32 {
        self.topology.spatial_index_y_max(level)
    }

    pub fn spatial_index_x_max(&self, level: u8) -> u32 {
        self.topology.spatial_index_x_max(level)
    }

    pub fn spatial_index_z_max(&self, level: u8) -> u32 {
        self.topology.spatial_index_z_max(level)
    }

    pub fn particles_level_begin(&self, level: u8) -> u64 {
        self.topology.level_particles(level).start
    }

    pub fn particles_level_end(&self, level: u8) -> u64 {
        self.topology.level_particles(level).end
    }

    pub fn particles_z_begin(&self, level: u8, z: u32) -> u64 {
        self.topology.z_particles(level, z).start
    }

    pub fn particles_z_end(&self, level: u8, z: u32) -> u64 {
        self.topology.z_particles(level, z).end
    }

    pub fn particles_zx_begin(&self, level: u8, z: u32, x: u32) -> u64 {
        self.topology.zx_particles(level, z, x).start
    }

    pub fn particles_zx_end(&self, level: u8, z: u32, x: u32) -> u64 {
        self.topology.zx_particles(level, z, x).end
    }

    /// Position on the first particle overall. Returns false if there is none.
    pub fn begin(&mut self) -> bool {
        self.begin_range(0, self.topology.total_particles())
    }

    pub fn begin_level(&mut self, level: u8) -> bool {
        let range = self.topology.level_particles(level);
        self.begin_range(range.start, range.end)
    }

    pub fn begin_z(&mut self, level: u8, z: u32) -> bool {
        let range = self.topology.z_particles(level, z);
        self.begin_range(range.start, range.end)
    }

    pub fn begin_zx(&mut self, level: u8, z: u32, x: u32) -> bool {
        let range = self.topology.zx_particles(level, z, x);
        self.begin_range(range.start, range.end)
    }

    /// Position on particle `begin` and stop forward iteration at `end`.
    pub fn begin_range(&mut self, begin: u64, end: u64) -> bool {
        let end = end.min(self.topology.total_particles());
        if begin >= end {
            self.cursor = None;
            return false;
        }
        self.position(begin, end)
    }

    /// Jump directly to global particle `particle`.
    ///
    /// Forward iteration from here runs to the end of all particles. Returns
    /// false, leaving the iterator unpositioned, if `particle` is out of range.
    pub fn set_iterator_to_particle_by_number(&mut self, particle: u64) -> bool {
        let total = self.topology.total_particles();
        self.begin_range(particle, total)
    }

    /// Position on the cell stored at `(level, x, y, z)`, if there is one.
    pub fn set_iterator_to_cell(&mut self, level: u8, x: u32, y: u32, z: u32) -> bool {
        match self.topology.find_node(level, x, y, z) {
            Some(node) => self.position_node(node),
            None => false,
        }
    }

    pub(super) fn position_node(&mut self, node: usize) -> bool {
        let first = self.topology.node(node).first_particle;
        self.position(first, self.topology.total_particles())
    }

    fn position(&mut self, particle: u64, end: u64) -> bool {
        let node = self.topology.node_of_particle(particle);
        let Some(at) = self.topology.locate(node) else {
            self.cursor = None;
            return false;
        };
        self.cursor = Some(Cursor {
            particle,
            node,
            sub: (particle - self.topology.node(node).first_particle) as u8,
            level: at.level,
            x: at.x,
            y: at.y,
            z: at.z,
            run: at.run,
            column_end: at.column_end,
            end,
        });
        true
    }

    /// Advance to the next particle in canonical order.
    ///
    /// Returns false, and leaves the iterator unpositioned, when the active
    /// range is exhausted.
    pub fn it_forward(&mut self) -> bool {
        let Some(cursor) = self.cursor.as_mut() else {
            return false;
        };
        if cursor.particle + 1 >= cursor.end {
            self.cursor = None;
            return false;
        }
        cursor.particle += 1;

        let topology = self.topology;
        if cursor.sub + 1 < topology.node(cursor.node).particles {
            cursor.sub += 1;
            return true;
        }

        let next = cursor.node + 1;
        if next < cursor.column_end {
            let runs = topology.level(cursor.level).column(cursor.x, cursor.z);
            let (mut run, mut y) = (cursor.run + 1, cursor.y + 1);
            while let Some(&RunEntry::Gap { length }) = runs.get(run) {
                y += length;
                run += 1;
            }
            cursor.node = next;
            cursor.sub = 0;
            cursor.y = y;
            cursor.run = run;
            return true;
        }

        // First cell of a later column: seek through the range tables.
        let Some(at) = topology.locate(next) else {
            self.cursor = None;
            return false;
        };
        cursor.node = next;
        cursor.sub = 0;
        cursor.level = at.level;
        cursor.x = at.x;
        cursor.y = at.y;
        cursor.z = at.z;
        cursor.run = at.run;
        cursor.column_end = at.column_end;
        true
    }

    #[inline]
    pub fn is_positioned(&self) -> bool {
        self.cursor.is_some()
    }

    #[inline]
    pub(super) fn cursor(&self) -> &Cursor {
        match &self.cursor {
            Some(cursor) => cursor,
            None => panic!("iterator is not positioned on a particle"),
        }
    }

    /// Global index of the current particle.
    #[inline]
    pub fn particle_number(&self) -> u64 {
        self.cursor().particle
    }

    pub fn try_particle_number(&self) -> Result<u64, AprError> {
        self.cursor
            .as_ref()
            .map(|c| c.particle)
            .ok_or(AprError::NotPositioned)
    }

    /// Index of the current cell node.
    #[inline]
    pub fn node_index(&self) -> usize {
        self.cursor().node
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.cursor().level
    }

    /// Cell coordinates at the current level.
    #[inline]
    pub fn x(&self) -> u32 {
        self.cursor().x
    }

    #[inline]
    pub fn y(&self) -> u32 {
        self.cursor().y
    }

    #[inline]
    pub fn z(&self) -> u32 {
        self.cursor().z
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.topology.node(self.cursor().node).status
    }

    /// Numeric status code: 1 seed, 2 boundary, 3 filler.
    #[inline]
    pub fn cell_type(&self) -> u8 {
        self.status() as u8
    }

    /// Index of the current particle inside its cell.
    #[inline]
    pub fn sub_particle(&self) -> u8 {
        self.cursor().sub
    }

    /// Number of particles owned by the current cell.
    #[inline]
    pub fn particle_count(&self) -> u8 {
        self.topology.node(self.cursor().node).particles
    }

    /// Footprint side of the current cell in voxels.
    #[inline]
    pub fn step_size(&self) -> u32 {
        self.topology.step_size(self.cursor().level)
    }

    /// Side of the current particle's footprint and its offset within the
    /// cell, in voxels.
    fn particle_extent(&self) -> (u32, (u32, u32, u32)) {
        let step = self.step_size();
        if self.particle_count() > 1 {
            let half = step / 2;
            let (dy, dx, dz) = octant_offset(self.sub_particle());
            (half, (dy * half, dx * half, dz * half))
        } else {
            (step, (0, 0, 0))
        }
    }

    /// Centre of the current particle in pixel units.
    pub fn y_global(&self) -> f32 {
        let (extent, (dy, _, _)) = self.particle_extent();
        (self.y() * self.step_size() + dy) as f32 + extent as f32 * 0.5
    }

    pub fn x_global(&self) -> f32 {
        let (extent, (_, dx, _)) = self.particle_extent();
        (self.x() * self.step_size() + dx) as f32 + extent as f32 * 0.5
    }

    pub fn z_global(&self) -> f32 {
        let (extent, (_, _, dz)) = self.particle_extent();
        (self.z() * self.step_size() + dz) as f32 + extent as f32 * 0.5
    }

    /// Pixel containing the current particle's centre, clamped to the image.
    pub fn y_nearest_pixel(&self) -> u32 {
        (self.y_global() as u32).min(self.topology.dims().y_num - 1)
    }

    pub fn x_nearest_pixel(&self) -> u32 {
        (self.x_global() as u32).min(self.topology.dims().x_num - 1)
    }

    pub fn z_nearest_pixel(&self) -> u32 {
        (self.z_global() as u32).min(self.topology.dims().z_num - 1)
    }
}

impl<'a> PartialEq for CellIterator<'a> {
    /// Two iterators are equal when they walk the same structure and sit on
    /// the same particle.
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.topology, other.topology)
            && self.cursor.map(|c| c.particle) == other.cursor.map(|c| c.particle)
    }
}
