//! Neighbour-mean smoothing over particles.

use rayon::prelude::*;

use crate::AprError;
use crate::apr::{AprIterator, CellTopology, Face};
use crate::data::ExtraParticleData;

/// Replace every particle value by the mean of itself and its face neighbours.
///
/// Neighbours are searched per face at the same level first, then coarser,
/// then finer. A neighbour cell that owns several particles contributes the
/// mean of its particles.
pub fn neighbour_mean<T>(
    apr: &CellTopology,
    data: &ExtraParticleData<T>,
) -> Result<ExtraParticleData<f32>, AprError>
where
    T: Copy + Into<f32> + Sync,
{
    let expected = apr.total_particles() as usize;
    if data.len() != expected {
        return Err(AprError::SizeMismatch {
            expected,
            found: data.len(),
        });
    }

    let values = data.as_slice();
    let cell_mean = |node: usize| -> f32 {
        let node = apr.node(node);
        let first = node.first_particle as usize;
        let cell = &values[first..first + node.particles as usize];
        cell.iter().map(|&v| v.into()).sum::<f32>() / cell.len() as f32
    };

    let mut out = vec![0.0f32; expected];
    out.par_iter_mut().enumerate().for_each_init(
        || AprIterator::new(apr),
        |it, (particle, slot)| {
            if !it.set_iterator_to_particle_by_number(particle as u64) {
                return;
            }
            let mut sum: f32 = values[particle].into();
            let mut count = 1u32;
            for face in Face::ALL {
                it.find_neighbours_in_direction(face);
                for &node in it.neighbours().as_slice() {
                    sum += cell_mean(node);
                    count += 1;
                }
            }
            *slot = sum / count as f32;
        },
    );
    ExtraParticleData::from_vec(apr, out)
}
