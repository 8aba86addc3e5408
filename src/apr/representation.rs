//! The adaptive particle representation: topology plus particle intensities.

use crate::AprError;
use crate::data::{ExtraParticleData, ParticleLayout};

use super::{AprIterator, AprTree, CellTopology, ImageDims};

/// Particle cells of an image together with one intensity per particle.
#[derive(Debug, Clone)]
pub struct Apr<T = u16> {
    topology: CellTopology,
    intensities: ExtraParticleData<T>,
}

impl<T: Copy + Default + Send + Sync> Apr<T> {
    pub fn new(topology: CellTopology, intensities: ExtraParticleData<T>) -> Result<Self, AprError> {
        if intensities.len() as u64 != topology.total_particles() {
            return Err(AprError::SizeMismatch {
                expected: topology.total_particles() as usize,
                found: intensities.len(),
            });
        }
        Ok(Self {
            topology,
            intensities,
        })
    }

    /// Replace the intensities, possibly with another value type.
    pub fn with_intensities<U: Copy + Default + Send + Sync>(
        self,
        intensities: ExtraParticleData<U>,
    ) -> Result<Apr<U>, AprError> {
        Apr::new(self.topology, intensities)
    }
}

impl<T> Apr<T> {
    #[inline]
    pub fn topology(&self) -> &CellTopology {
        &self.topology
    }

    pub fn iterator(&self) -> AprIterator<'_> {
        AprIterator::new(&self.topology)
    }

    /// Interior tree of this APR.
    pub fn tree(&self) -> Result<AprTree, AprError> {
        AprTree::build(&self.topology)
    }

    #[inline]
    pub fn total_number_particles(&self) -> u64 {
        self.topology.total_particles()
    }

    pub fn level_min(&self) -> u8 {
        self.topology.level_min()
    }

    pub fn level_max(&self) -> u8 {
        self.topology.level_max()
    }

    pub fn dims(&self) -> ImageDims {
        self.topology.dims()
    }

    pub fn computational_ratio(&self) -> f64 {
        self.topology.computational_ratio()
    }

    pub fn intensities(&self) -> &ExtraParticleData<T> {
        &self.intensities
    }

    pub fn intensities_mut(&mut self) -> &mut ExtraParticleData<T> {
        &mut self.intensities
    }

    pub fn into_parts(self) -> (CellTopology, ExtraParticleData<T>) {
        (self.topology, self.intensities)
    }
}

impl<T> ParticleLayout for Apr<T> {
    fn total_particles(&self) -> u64 {
        self.topology.total_particles()
    }
}

impl ParticleLayout for CellTopology {
    fn total_particles(&self) -> u64 {
        CellTopology::total_particles(self)
    }
}
