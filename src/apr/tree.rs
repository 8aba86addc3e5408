//! Interior nodes above the particle cells.
//!
//! A tree node at `(l, x, y, z)` exists when at least one particle cell lies
//! strictly beneath it. Tree nodes live on levels `level_min..level_max` of
//! the APR, are all [`Status::Filler`] and own one value each.

use rayon::prelude::*;

use crate::AprError;
use crate::data::ParticleLayout;

use super::{AprTreeIterator, CellTopology, LevelIndex, Status, StatusTable};

/// Interior nodes of an APR, indexed like its particles.
#[derive(Debug, Clone)]
pub struct AprTree {
    topology: CellTopology,
}

impl AprTree {
    /// Build the tree of `apr`: the closure of parents of its particle cells.
    pub fn build(apr: &CellTopology) -> Result<Self, AprError> {
        let level_min = apr.level_min();
        let level_max = apr.level_max().saturating_sub(1).max(level_min);
        let table = StatusTable::default();

        let mut keys: Vec<Vec<(u32, u32, u32)>> = vec![Vec::new(); (level_max - level_min) as usize + 1];
        for level in ((level_min + 1)..=apr.level_max()).rev() {
            let offset = (level - 1 - level_min) as usize;
            let index = apr.level(level);
            let x_num = index.x_num() as usize;
            let mut parents: Vec<(u32, u32, u32)> = (0..index.num_columns())
                .into_par_iter()
                .flat_map_iter(|column| {
                    let (x, z) = ((column % x_num) as u32, (column / x_num) as u32);
                    index
                        .cells_by_index(column)
                        .map(move |cell| (z / 2, x / 2, cell.y / 2))
                })
                .collect();
            if level <= level_max {
                parents.extend(keys[offset + 1].iter().map(|&(z, x, y)| (z / 2, x / 2, y / 2)));
            }
            parents.par_sort_unstable();
            parents.dedup();
            keys[offset] = parents;
        }

        let pixel_level = apr.pixel_level();
        let mut levels = Vec::with_capacity(keys.len());
        for (offset, level_keys) in keys.iter().enumerate() {
            let level = level_min + offset as u8;
            let shape = CellTopology::grid_shape(apr.dims(), pixel_level, level);
            let (y_num, x_num, z_num) = shape;
            let mut columns = Vec::with_capacity(x_num as usize * z_num as usize);
            let mut cursor = 0;
            let mut column = Vec::new();
            for z in 0..z_num {
                for x in 0..x_num {
                    column.clear();
                    while cursor < level_keys.len() && level_keys[cursor].0 == z && level_keys[cursor].1 == x {
                        column.push((level_keys[cursor].2, Status::Filler));
                        cursor += 1;
                    }
                    columns.push(LevelIndex::encode_column(&column, y_num, &table));
                }
            }
            levels.push(LevelIndex::from_columns(level, shape, columns)?);
        }

        let topology =
            CellTopology::from_levels(apr.dims(), level_min, level_max, pixel_level, table, levels)?;
        log::debug!(
            "tree: levels {}..={}, {} nodes",
            level_min,
            level_max,
            topology.total_particles()
        );
        Ok(Self { topology })
    }

    #[inline]
    pub fn topology(&self) -> &CellTopology {
        &self.topology
    }

    pub fn iterator(&self) -> AprTreeIterator<'_> {
        AprTreeIterator::new(&self.topology)
    }

    pub fn total_number_parent_cells(&self) -> u64 {
        self.topology.total_particles()
    }

    pub fn level_min(&self) -> u8 {
        self.topology.level_min()
    }

    pub fn level_max(&self) -> u8 {
        self.topology.level_max()
    }
}

impl ParticleLayout for AprTree {
    fn total_particles(&self) -> u64 {
        self.topology.total_particles()
    }
}
