//! Adaptive local minimum / maximum estimators.
//!
//! Local extrema among boundary particles seed an estimate in their tree
//! parents. Each tree level, finest first, then runs three ordered phases:
//!
//! 1. gather: a node collects the marked particles and the estimated tree
//!    nodes directly beneath it
//! 2. spread: every node adds the collections of its same-level face
//!    neighbours, reading the `current` buffers and writing `next`
//! 3. average: nodes with a non-empty collection store its mean
//!
//! Particles then take the estimate of their nearest estimated ancestor,
//! falling back to the global extremum.

use rayon::prelude::*;

use crate::AprError;
use crate::apr::{Apr, AprTree, Face, LevelDelta, Status, octant_offset};
use crate::data::ExtraParticleData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extremum {
    Min,
    Max,
}

impl Extremum {
    /// True if `value` is at least as extreme as `other`.
    fn dominates(self, value: f32, other: f32) -> bool {
        match self {
            Extremum::Min => value <= other,
            Extremum::Max => value >= other,
        }
    }
}

/// Smooth estimate of the local background minimum of the intensities.
pub fn adaptive_min<T>(apr: &Apr<T>, tree: &AprTree) -> Result<ExtraParticleData<f32>, AprError>
where
    T: Copy + Default + Into<f32> + Send + Sync,
{
    estimate(apr, tree, Extremum::Min)
}

/// Smooth estimate of the local maximum of the intensities.
pub fn adaptive_max<T>(apr: &Apr<T>, tree: &AprTree) -> Result<ExtraParticleData<f32>, AprError>
where
    T: Copy + Default + Into<f32> + Send + Sync,
{
    estimate(apr, tree, Extremum::Max)
}

fn estimate<T>(apr: &Apr<T>, tree: &AprTree, kind: Extremum) -> Result<ExtraParticleData<f32>, AprError>
where
    T: Copy + Default + Into<f32> + Send + Sync,
{
    let topology = apr.topology();
    let tree_topology = tree.topology();
    let values: ExtraParticleData<f32> = apr.intensities().map(|v| v.into());
    let marked = mark_extrema(apr, &values, kind);

    let fallback = match kind {
        Extremum::Min => values.iter().copied().fold(f32::INFINITY, f32::min),
        Extremum::Max => values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
    };

    let mut estimates: Vec<Option<f32>> = vec![None; tree.total_number_parent_cells() as usize];
    for level in (tree.level_min()..=tree.level_max()).rev() {
        let range = tree_topology.level_nodes(level);
        if range.is_empty() {
            continue;
        }
        let (head, finer) = estimates.split_at_mut(range.end);
        let finer: &[Option<f32>] = finer;
        let start = range.start;
        let finer_start = range.end;

        // gather
        let current: Vec<(f32, u32)> = (range.clone())
            .into_par_iter()
            .map_init(
                || tree.iterator(),
                |node, index| {
                    let (mut sum, mut count) = (0.0f32, 0u32);
                    if !node.set_iterator_to_particle_by_number(index as u64) {
                        return (sum, count);
                    }
                    let (x, y, z) = (node.x(), node.y(), node.z());
                    for k in 0..8u8 {
                        let (dy, dx, dz) = octant_offset(k);
                        let (cx, cy, cz) = (2 * x + dx, 2 * y + dy, 2 * z + dz);
                        if let Some(child) = topology.find_node(level + 1, cx, cy, cz) {
                            let child = topology.node(child);
                            let first = child.first_particle as usize;
                            for p in first..first + child.particles as usize {
                                if marked[p] {
                                    sum += values[p];
                                    count += 1;
                                }
                            }
                        } else if let Some(child) = tree_topology.find_node(level + 1, cx, cy, cz) {
                            if let Some(value) = finer[child - finer_start] {
                                sum += value;
                                count += 1;
                            }
                        }
                    }
                    (sum, count)
                },
            )
            .collect();

        // spread
        let next: Vec<(f32, u32)> = (range.clone())
            .into_par_iter()
            .map_init(
                || tree.iterator(),
                |it, index| {
                    let (mut sum, mut count) = current[index - start];
                    if !it.set_iterator_to_particle_by_number(index as u64) {
                        return (sum, count);
                    }
                    for face in Face::ALL {
                        let found = it.neighbour_nodes(face, LevelDelta::Same);
                        for &neighbour in found.as_slice() {
                            let (s, c) = current[neighbour - start];
                            if c > 0 {
                                sum += s;
                                count += c;
                            }
                        }
                    }
                    (sum, count)
                },
            )
            .collect();

        // average
        head[start..]
            .par_iter_mut()
            .zip(next.par_iter())
            .for_each(|(estimate, &(sum, count))| {
                *estimate = (count > 0).then(|| sum / count as f32);
            });
    }

    let mut out = ExtraParticleData::filled(apr, fallback);
    out.as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each_init(
            || (apr.iterator(), tree.iterator()),
            |(it, parent), (particle, slot)| {
                if !it.set_iterator_to_particle_by_number(particle as u64)
                    || !parent.set_iterator_to_parent(it)
                {
                    return;
                }
                loop {
                    if let Some(value) = estimates[parent.node_index()] {
                        *slot = value;
                        return;
                    }
                    let current = *parent;
                    if !parent.set_iterator_to_parent(&current) {
                        return;
                    }
                }
            },
        );

    log::debug!(
        "adaptive {:?}: {} marked particles, fallback {}",
        kind,
        marked.iter().filter(|&&m| m).count(),
        fallback
    );
    Ok(out)
}

/// Boundary particles at least as extreme as all their face neighbours.
fn mark_extrema<T: Sync>(apr: &Apr<T>, values: &ExtraParticleData<f32>, kind: Extremum) -> Vec<bool> {
    let mut marked = vec![false; values.len()];
    marked.par_iter_mut().enumerate().for_each_init(
        || (apr.iterator(), apr.iterator()),
        |(it, neighbour), (particle, mark)| {
            if !it.set_iterator_to_particle_by_number(particle as u64) || it.status() != Status::Boundary {
                return;
            }
            let value = values[particle];
            for face in Face::ALL {
                let n = it.find_neighbours_in_direction(face);
                for i in 0..n {
                    if neighbour.set_neighbour_iterator(it, face, i)
                        && !kind.dominates(value, values[&*neighbour])
                    {
                        return;
                    }
                }
            }
            *mark = true;
        },
    );
    marked
}
