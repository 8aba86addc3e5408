//! Piecewise-constant reconstruction of dense images from particles.
//!
//! Each worker owns a disjoint slab of output z planes, so every pixel is
//! written by exactly one worker and the output is identical for any thread
//! count.

use rayon::prelude::*;

use crate::AprError;
use crate::apr::{AprIterator, CellIterator, CellTopology, octant_offset};
use crate::data::{ExtraParticleData, MeshData};

/// Evaluate `f` at every particle.
pub fn particle_property<T, F>(apr: &CellTopology, f: F) -> ExtraParticleData<T>
where
    T: Copy + Default + Send + Sync,
    F: Fn(&CellIterator<'_>) -> T + Sync,
{
    let mut data = ExtraParticleData::new(apr);
    data.as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each_init(
            || AprIterator::new(apr),
            |it, (particle, slot)| {
                if it.set_iterator_to_particle_by_number(particle as u64) {
                    *slot = f(it);
                }
            },
        );
    data
}

/// Full resolution image where every particle fills its footprint.
pub fn interp_img<T>(apr: &CellTopology, parts: &ExtraParticleData<T>) -> Result<MeshData<T>, AprError>
where
    T: Copy + Default + Send + Sync,
{
    interp_img_at_level(apr, parts, apr.pixel_level(), |first, _| first)
}

/// Image of particle levels.
pub fn interp_level(apr: &CellTopology) -> Result<MeshData<u8>, AprError> {
    let levels = particle_property(apr, |it| it.level());
    interp_img(apr, &levels)
}

/// Image of particle status codes.
pub fn interp_status(apr: &CellTopology) -> Result<MeshData<u8>, AprError> {
    let status = particle_property(apr, |it| it.cell_type());
    interp_img(apr, &status)
}

/// Image at `level`, where one pixel is one cell of that level's grid.
///
/// Particles at or above `level` are broadcast over their footprint.
/// Several finer particles falling into one pixel are combined with
/// `reduce`, in canonical particle order.
pub fn interp_img_at_level<T, F>(
    apr: &CellTopology,
    parts: &ExtraParticleData<T>,
    level: u8,
    reduce: F,
) -> Result<MeshData<T>, AprError>
where
    T: Copy + Default + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    let expected = apr.total_particles() as usize;
    if parts.len() != expected {
        return Err(AprError::SizeMismatch {
            expected,
            found: parts.len(),
        });
    }
    if level > apr.pixel_level() {
        return Err(AprError::InvalidLevels {
            level_min: apr.level_min(),
            level_max: level,
        });
    }

    let (y_num, x_num, z_num) = apr.shape(level);
    let plane = y_num as usize * x_num as usize;
    let mut mesh: Vec<Option<T>> = vec![None; plane * z_num as usize];
    let merge = |slot: &mut Option<T>, value: T| {
        *slot = Some(match *slot {
            Some(old) => reduce(old, value),
            None => value,
        });
    };

    for l in apr.level_min()..=apr.level_max() {
        if l <= level {
            let side = 1u32 << (level - l);
            mesh.par_chunks_mut(side as usize * plane)
                .enumerate()
                .for_each_init(
                    || AprIterator::new(apr),
                    |it, (z, slab)| {
                        let planes = (slab.len() / plane) as u32;
                        let mut more = it.begin_z(l, z as u32);
                        while more {
                            let value = parts[&*it];
                            let split = it.particle_count() > 1;
                            if split && side == 1 {
                                let idx = it.x() as usize * y_num as usize + it.y() as usize;
                                merge(&mut slab[idx], value);
                            } else {
                                let extent = if split { side / 2 } else { side };
                                let (dy, dx, dz) = if split {
                                    octant_offset(it.sub_particle())
                                } else {
                                    (0, 0, 0)
                                };
                                let y0 = it.y() * side + dy * extent;
                                let x0 = it.x() * side + dx * extent;
                                let z0 = dz * extent;
                                for zz in z0..(z0 + extent).min(planes) {
                                    for xx in x0..(x0 + extent).min(x_num) {
                                        let row = zz as usize * plane + xx as usize * y_num as usize;
                                        for yy in y0..(y0 + extent).min(y_num) {
                                            slab[row + yy as usize] = Some(value);
                                        }
                                    }
                                }
                            }
                            more = it.it_forward();
                        }
                    },
                );
        } else {
            let shift = (l - level) as u32;
            let z_max = apr.spatial_index_z_max(l);
            mesh.par_chunks_mut(plane).enumerate().for_each_init(
                || AprIterator::new(apr),
                |it, (zp, slab)| {
                    let z_begin = (zp as u32) << shift;
                    let z_end = ((zp as u32 + 1) << shift).min(z_max);
                    for z in z_begin..z_end {
                        let mut more = it.begin_z(l, z);
                        while more {
                            let idx = (it.x() >> shift) as usize * y_num as usize
                                + (it.y() >> shift) as usize;
                            merge(&mut slab[idx], parts[&*it]);
                            more = it.it_forward();
                        }
                    }
                },
            );
        }
    }

    Ok(MeshData {
        y_num,
        x_num,
        z_num,
        mesh: mesh.into_iter().map(Option::unwrap_or_default).collect(),
    })
}

/// Axis normal to a reconstructed plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Y,
    X,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Y, Axis::X, Axis::Z];

    /// Coordinate slot of the axis in `(y, x, z)` order.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Single full-resolution plane of [`interp_img`], normal to `axis` at pixel
/// `index`.
///
/// Only cells whose footprint crosses the plane are visited. The result keeps
/// the image layout with the normal axis reduced to one pixel, so a z plane
/// has dims `(y_num, x_num, 1)`.
pub fn interp_slice<T>(
    apr: &CellTopology,
    parts: &ExtraParticleData<T>,
    axis: Axis,
    index: u32,
) -> Result<MeshData<T>, AprError>
where
    T: Copy + Default + Send + Sync,
{
    let expected = apr.total_particles() as usize;
    if parts.len() != expected {
        return Err(AprError::SizeMismatch {
            expected,
            found: parts.len(),
        });
    }
    let dims = apr.dims();
    let mut size = [dims.y_num, dims.x_num, dims.z_num];
    let normal = axis.index();
    if index >= size[normal] {
        return Err(AprError::SliceOutOfRange {
            index,
            size: size[normal],
        });
    }

    // Plane rows run along `fast` and are stacked along `slow`.
    let (fast, slow) = match axis {
        Axis::Y => (1, 2),
        Axis::X => (0, 2),
        Axis::Z => (0, 1),
    };
    let row_len = size[fast] as usize;
    let mut plane = vec![T::default(); row_len * size[slow] as usize];
    let pixel_level = apr.pixel_level();

    plane.par_chunks_mut(row_len).enumerate().for_each_init(
        || AprIterator::new(apr),
        |it, (row, out)| {
            let row = row as u32;
            let mut fill = |it: &CellIterator<'_>| {
                let bounds = particle_bounds(it);
                if !bounds[normal].contains(&index) || !bounds[slow].contains(&row) {
                    return;
                }
                let start = bounds[fast].start as usize;
                let end = (bounds[fast].end as usize).min(row_len);
                if start < end {
                    out[start..end].fill(parts[it]);
                }
            };
            for level in apr.level_min()..=apr.level_max() {
                let shift = pixel_level - level;
                let mut cell = [0u32; 3];
                cell[normal] = index >> shift;
                cell[slow] = row >> shift;
                if fast == 0 {
                    let mut more = it.begin_zx(level, cell[2], cell[1]);
                    while more {
                        fill(it);
                        more = it.it_forward();
                    }
                } else {
                    for x in 0..apr.spatial_index_x_max(level) {
                        if !it.set_iterator_to_cell(level, x, cell[0], cell[2]) {
                            continue;
                        }
                        let node = it.node_index();
                        loop {
                            fill(it);
                            if !it.it_forward() || it.node_index() != node {
                                break;
                            }
                        }
                    }
                }
            }
        },
    );

    size[normal] = 1;
    Ok(MeshData {
        y_num: size[0],
        x_num: size[1],
        z_num: size[2],
        mesh: plane,
    })
}

/// Pixel ranges `[y, x, z]` of the current particle's footprint, unclipped.
fn particle_bounds(it: &CellIterator<'_>) -> [std::ops::Range<u32>; 3] {
    let step = it.step_size();
    let (extent, offset) = if it.particle_count() > 1 {
        let (dy, dx, dz) = octant_offset(it.sub_particle());
        (step / 2, [dy, dx, dz])
    } else {
        (step, [0, 0, 0])
    };
    let cell = [it.y(), it.x(), it.z()];
    std::array::from_fn(|axis| {
        let lo = cell[axis] * step + offset[axis] * extent;
        lo..lo + extent
    })
}

/// Particle values read from `image` at each particle's centre pixel.
pub fn sample_image<T>(apr: &CellTopology, image: &MeshData<T>) -> Result<ExtraParticleData<T>, AprError>
where
    T: Copy + Default + Send + Sync,
{
    if image.dims() != apr.dims() {
        return Err(AprError::InvalidDimensions);
    }
    Ok(particle_property(apr, |it| {
        image.at(it.y_nearest_pixel(), it.x_nearest_pixel(), it.z_nearest_pixel())
    }))
}
