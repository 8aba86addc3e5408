//! Per-particle value arrays aligned with the canonical particle order.

use std::ops::{Index, IndexMut};

use rayon::prelude::*;

use crate::AprError;
use crate::apr::CellIterator;

/// Anything that defines a particle count: a topology, an APR or its tree.
pub trait ParticleLayout {
    fn total_particles(&self) -> u64;
}

/// One value per particle, stored in canonical order.
///
/// Indexing with an iterator reads the value of the particle the iterator is
/// positioned on. The data must have been initialised against the same
/// structure the iterator walks; indexing panics otherwise, while
/// [`try_get`](Self::try_get) reports the mismatch as an error.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtraParticleData<T> {
    data: Vec<T>,
}

impl<T: Copy + Default + Send + Sync> ExtraParticleData<T> {
    /// Zero-initialised data sized for `layout`.
    pub fn new(layout: &impl ParticleLayout) -> Self {
        let mut data = Self { data: Vec::new() };
        data.init(layout);
        data
    }

    /// Resize to the particle count of `layout`, resetting every value.
    pub fn init(&mut self, layout: &impl ParticleLayout) {
        self.data.clear();
        self.data.resize(layout.total_particles() as usize, T::default());
    }

    /// Same as [`init`](Self::init); reads better at tree call sites.
    pub fn init_tree(&mut self, tree: &impl ParticleLayout) {
        self.init(tree);
    }

    /// Data sized for `layout` with every value set to `value`.
    pub fn filled(layout: &impl ParticleLayout, value: T) -> Self {
        Self {
            data: vec![value; layout.total_particles() as usize],
        }
    }

    /// Wrap an existing vector, checking it against `layout`.
    pub fn from_vec(layout: &impl ParticleLayout, data: Vec<T>) -> Result<Self, AprError> {
        let expected = layout.total_particles() as usize;
        if data.len() != expected {
            return Err(AprError::SizeMismatch {
                expected,
                found: data.len(),
            });
        }
        Ok(Self { data })
    }

    pub fn fill(&mut self, value: T) {
        self.data.par_iter_mut().for_each(|v| *v = value);
    }

    /// New array with `f` applied to every value.
    pub fn map<U, F>(&self, f: F) -> ExtraParticleData<U>
    where
        U: Send,
        F: Fn(T) -> U + Sync + Send,
    {
        ExtraParticleData {
            data: self.data.par_iter().map(|&v| f(v)).collect(),
        }
    }

    pub fn map_inplace<F>(&mut self, f: F)
    where
        F: Fn(T) -> T + Sync + Send,
    {
        self.data.par_iter_mut().for_each(|v| *v = f(*v));
    }

    /// Combine with another array element by element.
    pub fn zip<U, V, F>(
        &self,
        other: &ExtraParticleData<U>,
        f: F,
    ) -> Result<ExtraParticleData<V>, AprError>
    where
        U: Copy + Sync,
        V: Send,
        F: Fn(T, U) -> V + Sync + Send,
    {
        self.check_len(other.len())?;
        Ok(ExtraParticleData {
            data: self
                .data
                .par_iter()
                .zip(other.data.par_iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    pub fn zip_inplace<U, F>(&mut self, other: &ExtraParticleData<U>, f: F) -> Result<(), AprError>
    where
        U: Copy + Sync,
        F: Fn(T, U) -> T + Sync + Send,
    {
        self.check_len(other.len())?;
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, &b)| *a = f(*a, b));
        Ok(())
    }

    /// Value at the iterator's particle.
    pub fn try_get(&self, it: &CellIterator<'_>) -> Result<T, AprError> {
        let particle = self.checked_particle(it)?;
        Ok(self.data[particle])
    }

    pub fn try_set(&mut self, it: &CellIterator<'_>, value: T) -> Result<(), AprError> {
        let particle = self.checked_particle(it)?;
        self.data[particle] = value;
        Ok(())
    }
}

impl<T> ExtraParticleData<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    fn check_len(&self, found: usize) -> Result<(), AprError> {
        if found != self.data.len() {
            return Err(AprError::SizeMismatch {
                expected: self.data.len(),
                found,
            });
        }
        Ok(())
    }

    fn checked_particle(&self, it: &CellIterator<'_>) -> Result<usize, AprError> {
        self.check_len(it.total_number_particles() as usize)?;
        Ok(it.try_particle_number()? as usize)
    }
}

impl<T> Index<&CellIterator<'_>> for ExtraParticleData<T> {
    type Output = T;

    #[inline]
    fn index(&self, it: &CellIterator<'_>) -> &T {
        assert_eq!(
            self.data.len() as u64,
            it.total_number_particles(),
            "particle data was initialised for a different structure"
        );
        &self.data[it.particle_number() as usize]
    }
}

impl<T> IndexMut<&CellIterator<'_>> for ExtraParticleData<T> {
    #[inline]
    fn index_mut(&mut self, it: &CellIterator<'_>) -> &mut T {
        assert_eq!(
            self.data.len() as u64,
            it.total_number_particles(),
            "particle data was initialised for a different structure"
        );
        &mut self.data[it.particle_number() as usize]
    }
}

impl<T> Index<usize> for ExtraParticleData<T> {
    type Output = T;

    #[inline]
    fn index(&self, particle: usize) -> &T {
        &self.data[particle]
    }
}

impl<T> IndexMut<usize> for ExtraParticleData<T> {
    #[inline]
    fn index_mut(&mut self, particle: usize) -> &mut T {
        &mut self.data[particle]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apr::{AprBuilder, ImageDims};

    struct Fixed(u64);

    impl ParticleLayout for Fixed {
        fn total_particles(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn test_init_sizes_to_layout() {
        let mut data = ExtraParticleData::<f32>::new(&Fixed(5));
        assert_eq!(data.len(), 5);
        data[2] = 1.5;
        data.init(&Fixed(3));
        assert_eq!(data.as_slice(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_map_and_zip() {
        let a = ExtraParticleData::from_vec(&Fixed(3), vec![1u16, 2, 3]).unwrap();
        let b = a.map(|v| v as f32 * 0.5);
        assert_eq!(b.as_slice(), &[0.5, 1.0, 1.5]);

        let c = a.zip(&b, |x, y| x as f32 + y).unwrap();
        assert_eq!(c.as_slice(), &[1.5, 3.0, 4.5]);

        let mut d = a.clone();
        d.zip_inplace(&a, |x, y| x * y).unwrap();
        assert_eq!(d.as_slice(), &[1, 4, 9]);

        d.map_inplace(|v| v + 1);
        assert_eq!(d.as_slice(), &[2, 5, 10]);
    }

    #[test]
    fn test_zip_size_mismatch() {
        let a = ExtraParticleData::filled(&Fixed(3), 1u8);
        let b = ExtraParticleData::filled(&Fixed(4), 1u8);
        assert!(matches!(
            a.zip(&b, |x, y| x + y),
            Err(AprError::SizeMismatch {
                expected: 3,
                found: 4
            })
        ));
    }

    #[test]
    fn test_from_vec_checks_length() {
        assert!(ExtraParticleData::from_vec(&Fixed(2), vec![1u8]).is_err());
    }

    #[test]
    fn test_iterator_access() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(4, 4, 1), 0, 2, |y, _, _| {
            if y < 2 { 2 } else { 0 }
        })
        .unwrap();
        let mut data = ExtraParticleData::<u32>::new(&apr);
        let mut it = apr.iterator();
        let mut more = it.begin();
        while more {
            data[&it] = it.y_nearest_pixel() + 100 * it.level() as u32;
            more = it.it_forward();
        }

        let mut it = apr.iterator();
        it.set_iterator_to_particle_by_number(0);
        assert_eq!(data.try_get(&it).unwrap(), data[0]);

        let small = ExtraParticleData::<u32>::new(&Fixed(1));
        assert!(matches!(
            small.try_get(&it),
            Err(AprError::SizeMismatch { .. })
        ));

        let unpositioned = apr.iterator();
        assert!(matches!(
            data.try_get(&unpositioned),
            Err(AprError::NotPositioned)
        ));
    }

    #[test]
    #[should_panic(expected = "different structure")]
    fn test_index_panics_on_foreign_iterator() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(2, 2, 2), 0, 1, |_, _, _| 1).unwrap();
        let data = ExtraParticleData::<u8>::new(&Fixed(3));
        let mut it = apr.iterator();
        it.begin();
        let _ = data[&it];
    }
}
