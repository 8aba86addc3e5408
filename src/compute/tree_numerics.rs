//! Aggregation of particle values into the tree and broadcast back down.

use std::ops::Div;

use num::NumCast;
use rayon::prelude::*;

use crate::AprError;
use crate::apr::{AprIterator, AprTree, CellTopology, octant_offset};
use crate::data::ExtraParticleData;

/// Aggregate particle values into every tree node.
///
/// Each node combines the values of all particles beneath it with `op`,
/// starting from `U::default()`. Levels are processed finest first, each node
/// gathering from its direct children: particle cells one level down and
/// tree nodes one level down, which already hold their own aggregate. Every
/// node is written by exactly one worker, so the result does not depend on
/// scheduling.
///
/// With `normalize`, each node is divided by the number of particles
/// beneath it; with a sum `op` the node then holds the arithmetic mean of
/// those particles.
///
/// # Arguments
/// * `apr` - Topology of the particle cells `particle_data` is bound to
/// * `tree` - Tree of the same APR
/// * `particle_data` - One value per particle
/// * `tree_data` - Output, re-initialised to one value per tree node
/// * `op` - Combining function `op(value, accumulated)`
/// * `normalize` - Divide by the particle count beneath each node
pub fn fill_tree_from_particles<S, U, F>(
    apr: &CellTopology,
    tree: &AprTree,
    particle_data: &ExtraParticleData<S>,
    tree_data: &mut ExtraParticleData<U>,
    op: F,
    normalize: bool,
) -> Result<(), AprError>
where
    S: Copy + Into<U> + Sync,
    U: Copy + Default + Send + Sync + NumCast + Div<Output = U>,
    F: Fn(U, U) -> U + Sync,
{
    let expected = apr.total_particles() as usize;
    if particle_data.len() != expected {
        return Err(AprError::SizeMismatch {
            expected,
            found: particle_data.len(),
        });
    }

    let tree_topology = tree.topology();
    tree_data.init_tree(tree);
    let mut counts = vec![0u64; tree_data.len()];
    let values = tree_data.as_mut_slice();
    let particles = particle_data.as_slice();

    for level in (tree.level_min()..=tree.level_max()).rev() {
        let range = tree_topology.level_nodes(level);
        if range.is_empty() {
            continue;
        }
        let (head_values, finer_values) = values.split_at_mut(range.end);
        let (head_counts, finer_counts) = counts.split_at_mut(range.end);
        let finer_values: &[U] = finer_values;
        let finer_counts: &[u64] = finer_counts;
        let start = range.start;
        let finer_start = range.end;

        head_values[start..]
            .par_iter_mut()
            .zip(head_counts[start..].par_iter_mut())
            .enumerate()
            .for_each_init(
                || tree.iterator(),
                |node, (i, (value, count))| {
                    if !node.set_iterator_to_particle_by_number((start + i) as u64) {
                        return;
                    }
                    let (x, y, z) = (node.x(), node.y(), node.z());
                    let mut acc = U::default();
                    let mut n = 0u64;
                    for k in 0..8u8 {
                        let (dy, dx, dz) = octant_offset(k);
                        let (cx, cy, cz) = (2 * x + dx, 2 * y + dy, 2 * z + dz);
                        if let Some(child) = apr.find_node(level + 1, cx, cy, cz) {
                            let child = apr.node(child);
                            let first = child.first_particle as usize;
                            for &v in &particles[first..first + child.particles as usize] {
                                acc = op(v.into(), acc);
                                n += 1;
                            }
                        } else if let Some(child) = tree_topology.find_node(level + 1, cx, cy, cz) {
                            acc = op(finer_values[child - finer_start], acc);
                            n += finer_counts[child - finer_start];
                        }
                    }
                    *value = acc;
                    *count = n;
                },
            );
    }

    if normalize {
        values
            .par_iter_mut()
            .zip(counts.par_iter())
            .for_each(|(value, &count)| {
                if count == 0 {
                    return;
                }
                match U::from(count) {
                    Some(divisor) => *value = *value / divisor,
                    None => log::warn!("particle count {} does not fit the tree value type", count),
                }
            });
    }

    log::debug!(
        "filled {} tree nodes from {} particles (normalize: {})",
        tree_data.len(),
        expected,
        normalize
    );
    Ok(())
}

/// Copy tree values down to the particles.
///
/// Every particle takes the value of the ancestor `level_offset` levels
/// above it, or of the coarsest ancestor if the tree ends first. An offset of
/// 0 is treated as 1. Particles at the tree's `level_min` have no ancestor
/// and receive `S::default()`.
///
/// # Arguments
/// * `apr` - Topology of the particle cells
/// * `tree` - Tree of the same APR
/// * `tree_data` - One value per tree node
/// * `particle_data` - Output, re-initialised to one value per particle
/// * `level_offset` - Number of parent links to climb
pub fn pull_down_tree_to_particles<U, S>(
    apr: &CellTopology,
    tree: &AprTree,
    tree_data: &ExtraParticleData<U>,
    particle_data: &mut ExtraParticleData<S>,
    level_offset: u8,
) -> Result<(), AprError>
where
    U: Copy + Into<S> + Sync,
    S: Copy + Default + Send + Sync,
{
    let expected = tree.total_number_parent_cells() as usize;
    if tree_data.len() != expected {
        return Err(AprError::SizeMismatch {
            expected,
            found: tree_data.len(),
        });
    }

    particle_data.init(apr);
    particle_data
        .as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each_init(
            || (AprIterator::new(apr), tree.iterator()),
            |(it, parent), (particle, slot)| {
                if !it.set_iterator_to_particle_by_number(particle as u64)
                    || !parent.set_iterator_to_parent(it)
                {
                    return;
                }
                for _ in 1..level_offset.max(1) {
                    let current = *parent;
                    if !parent.set_iterator_to_parent(&current) {
                        break;
                    }
                }
                *slot = tree_data[&*parent].into();
            },
        );
    Ok(())
}

/// Tree of particle means: sum aggregation, normalised.
pub fn fill_tree_mean<S>(
    apr: &CellTopology,
    tree: &AprTree,
    particle_data: &ExtraParticleData<S>,
) -> Result<ExtraParticleData<f32>, AprError>
where
    S: Copy + Into<f32> + Sync,
{
    let mut tree_data = ExtraParticleData::default();
    fill_tree_from_particles(apr, tree, particle_data, &mut tree_data, |a, b| a + b, true)?;
    Ok(tree_data)
}

/// Tree of particle maxima.
pub fn fill_tree_max<S>(
    apr: &CellTopology,
    tree: &AprTree,
    particle_data: &ExtraParticleData<S>,
) -> Result<ExtraParticleData<f32>, AprError>
where
    S: Copy + Into<f32> + Sync,
{
    let mut tree_data = ExtraParticleData::default();
    fill_tree_from_particles(apr, tree, particle_data, &mut tree_data, f32::max, false)?;
    Ok(tree_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apr::{Apr, AprBuilder, ImageDims};

    /// One coarse particle at y in 0..2 and fine particles beneath a single tree node.
    fn two_level(z_num: u32) -> Apr<u16> {
        let apr = AprBuilder::from_level_fn(ImageDims::new(4, 2, z_num), 0, 1, |y, _, _| {
            if y >= 2 { 1 } else { 0 }
        })
        .unwrap();
        let values: Vec<u16> = (0..apr.total_number_particles() as u16)
            .map(|i| if i == 0 { 100 } else { i })
            .collect();
        let values = ExtraParticleData::from_vec(&apr, values).unwrap();
        apr.with_intensities(values).unwrap()
    }

    #[test]
    fn test_sum_and_mean_2d() {
        let apr = two_level(1);
        assert_eq!(apr.total_number_particles(), 5);
        let tree = apr.tree().unwrap();

        let mut sums = ExtraParticleData::<f32>::default();
        fill_tree_from_particles(
            apr.topology(),
            &tree,
            apr.intensities(),
            &mut sums,
            |a, b| a + b,
            false,
        )
        .unwrap();
        assert_eq!(sums.as_slice(), &[10.0]);

        let means = fill_tree_mean(apr.topology(), &tree, apr.intensities()).unwrap();
        assert_eq!(means.as_slice(), &[2.5]);

        let maxima = fill_tree_max(apr.topology(), &tree, apr.intensities()).unwrap();
        assert_eq!(maxima.as_slice(), &[4.0]);
    }

    #[test]
    fn test_sum_3d() {
        let apr = two_level(2);
        assert_eq!(apr.total_number_particles(), 9);
        let tree = apr.tree().unwrap();
        let mut sums = ExtraParticleData::<u64>::default();
        fill_tree_from_particles(
            apr.topology(),
            &tree,
            apr.intensities(),
            &mut sums,
            |a, b| a + b,
            false,
        )
        .unwrap();
        assert_eq!(sums.as_slice(), &[36]);
    }

    #[test]
    fn test_integer_mean_truncates() {
        let apr = two_level(1);
        let tree = apr.tree().unwrap();
        let mut means = ExtraParticleData::<u32>::default();
        fill_tree_from_particles(
            apr.topology(),
            &tree,
            apr.intensities(),
            &mut means,
            |a, b| a + b,
            true,
        )
        .unwrap();
        assert_eq!(means.as_slice(), &[2]);
    }

    #[test]
    fn test_pull_down() {
        let apr = two_level(1);
        let tree = apr.tree().unwrap();
        let means = fill_tree_mean(apr.topology(), &tree, apr.intensities()).unwrap();

        let mut pulled = ExtraParticleData::<f32>::default();
        pull_down_tree_to_particles(apr.topology(), &tree, &means, &mut pulled, 1).unwrap();
        assert_eq!(pulled.as_slice(), &[0.0, 2.5, 2.5, 2.5, 2.5]);
    }

    #[test]
    fn test_pull_down_climbs_and_stops_at_level_min() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(8, 8, 8), 0, 3, |_, _, _| 3).unwrap();
        let tree = apr.tree().unwrap();
        let ones = ExtraParticleData::filled(&apr, 1.0f32);
        let mut sums = ExtraParticleData::<f32>::default();
        fill_tree_from_particles(apr.topology(), &tree, &ones, &mut sums, |a, b| a + b, false)
            .unwrap();

        let mut pulled = ExtraParticleData::<f32>::default();
        pull_down_tree_to_particles(apr.topology(), &tree, &sums, &mut pulled, 1).unwrap();
        assert!(pulled.iter().all(|&v| v == 8.0));

        pull_down_tree_to_particles(apr.topology(), &tree, &sums, &mut pulled, 2).unwrap();
        assert!(pulled.iter().all(|&v| v == 64.0));

        pull_down_tree_to_particles(apr.topology(), &tree, &sums, &mut pulled, 10).unwrap();
        assert!(pulled.iter().all(|&v| v == 512.0));
    }

    #[test]
    fn test_mean_over_mixed_levels() {
        // Fine corner at level 3, the rest at level 2, all under the level-0 root.
        let apr = AprBuilder::from_level_fn(ImageDims::new(8, 8, 8), 0, 3, |y, x, z| {
            if y < 2 && x < 2 && z < 2 { 3 } else { 2 }
        })
        .unwrap();
        let tree = apr.tree().unwrap();
        let values: Vec<f32> = (0..apr.total_number_particles()).map(|i| i as f32).collect();
        let values = ExtraParticleData::from_vec(&apr, values).unwrap();
        let means = fill_tree_mean(apr.topology(), &tree, &values).unwrap();

        let n = apr.total_number_particles() as f32;
        let expected = (n - 1.0) / 2.0;
        let mut root = tree.iterator();
        assert!(root.begin_level(0));
        assert!((means[&root] - expected).abs() < 1e-3);
    }

    #[test]
    fn test_independent_of_thread_count() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(16, 12, 8), 0, 4, |y, x, z| {
            if (y as i32 - 5).abs() + (x as i32 - 6).abs() + (z as i32 - 3).abs() < 5 { 4 } else { 2 }
        })
        .unwrap();
        let tree = apr.tree().unwrap();
        let values: Vec<f32> = (0..apr.total_number_particles()).map(|i| (i % 13) as f32 * 0.37).collect();
        let values = ExtraParticleData::from_vec(&apr, values).unwrap();

        let run = |threads: usize| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| {
                    let mut sums = ExtraParticleData::<f32>::default();
                    fill_tree_from_particles(apr.topology(), &tree, &values, &mut sums, |a, b| a + b, true)
                        .unwrap();
                    sums
                })
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn test_size_mismatch() {
        let apr = two_level(1);
        let tree = apr.tree().unwrap();
        let short = ExtraParticleData::filled(&tree, 1.0f32);
        let mut out = ExtraParticleData::<f32>::default();
        assert!(matches!(
            fill_tree_from_particles(apr.topology(), &tree, &short, &mut out, |a, b| a + b, false),
            Err(AprError::SizeMismatch { expected: 5, found: 1 })
        ));
    }
}
