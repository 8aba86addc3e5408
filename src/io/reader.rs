//! Reading APR files.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::AprError;
use crate::apr::{Apr, CellTopology, LevelIndex, RunEntry, Status, StatusTable};
use crate::data::{ExtraParticleData, ParticleScalar};

use super::format::{AprHeader, CompressionType, GAP_TAG, decompress_lz4};

/// Read an APR written by [`write_apr`](super::write_apr).
///
/// The topology is rebuilt from its runs and checked for exact coverage and
/// level balance before it is returned.
pub fn read_apr<T: ParticleScalar, P: AsRef<Path>>(path: P) -> Result<Apr<T>, AprError> {
    let path = path.as_ref();
    let mut r = BufReader::new(File::open(path)?);
    let apr = read_apr_from(&mut r)?;
    log::info!(
        "read {} particles from {}",
        apr.total_number_particles(),
        path.display()
    );
    Ok(apr)
}

pub fn read_apr_from<R: Read, T: ParticleScalar>(r: &mut R) -> Result<Apr<T>, AprError> {
    let (header, body) = read_body(r)?;
    if header.flags.particles_only {
        return Err(AprError::InvalidFormat(
            "file holds particle values only, not an APR".to_string(),
        ));
    }
    check_value_tag::<T>(&header)?;
    if header.dims.is_empty() {
        return Err(AprError::InvalidDimensions);
    }
    if header.level_min > header.level_max || header.level_max > 30 {
        return Err(AprError::InvalidLevels {
            level_min: header.level_min,
            level_max: header.level_max,
        });
    }
    let [seed, boundary, filler] = header.status_counts;
    let table = StatusTable::new(seed, boundary, filler)?;

    let mut bytes = ByteReader::new(&body);
    let mut levels = Vec::with_capacity((header.level_max - header.level_min) as usize + 1);
    let mut run_count = 0u64;
    for level in header.level_min..=header.level_max {
        let shape = CellTopology::grid_shape(header.dims, header.level_max, level);
        let num_columns = shape.1 as usize * shape.2 as usize;
        let mut columns = Vec::with_capacity(num_columns.min(bytes.remaining() / 4));
        for _ in 0..num_columns {
            let count = bytes.u32()? as usize;
            let mut runs = Vec::with_capacity(count.min(bytes.remaining() / 5));
            for _ in 0..count {
                let tag = bytes.u8()?;
                let payload = bytes.u32()?;
                runs.push(decode_run(tag, payload)?);
            }
            run_count += count as u64;
            columns.push(runs);
        }
        levels.push(LevelIndex::from_columns(level, shape, columns)?);
    }
    if run_count != header.run_count {
        return Err(AprError::InvalidFormat(format!(
            "header announces {} runs, body holds {}",
            header.run_count, run_count
        )));
    }

    let topology = CellTopology::from_levels(
        header.dims,
        header.level_min,
        header.level_max,
        header.level_max,
        table,
        levels,
    )?;
    topology.validate_coverage()?;
    topology.validate_balance()?;
    if topology.total_particles() != header.particle_count {
        return Err(AprError::InvalidFormat(format!(
            "header announces {} particles, runs hold {}",
            header.particle_count,
            topology.total_particles()
        )));
    }

    let values = decode_values::<T>(bytes.rest(), header.particle_count)?;
    let intensities = ExtraParticleData::from_vec(&topology, values)?;
    Apr::new(topology, intensities)
}

/// Read particle values written by [`write_particles`](super::write_particles)
/// and bind them to `topology`.
pub fn read_particles<T: ParticleScalar, P: AsRef<Path>>(
    path: P,
    topology: &CellTopology,
) -> Result<ExtraParticleData<T>, AprError> {
    let path = path.as_ref();
    let mut r = BufReader::new(File::open(path)?);
    let data = read_particles_from(&mut r, topology)?;
    log::info!("read {} {} values from {}", data.len(), T::NAME, path.display());
    Ok(data)
}

pub fn read_particles_from<R: Read, T: ParticleScalar>(
    r: &mut R,
    topology: &CellTopology,
) -> Result<ExtraParticleData<T>, AprError> {
    let (header, body) = read_body(r)?;
    if !header.flags.particles_only {
        return Err(AprError::InvalidFormat(
            "file holds a full APR, not particle values".to_string(),
        ));
    }
    check_value_tag::<T>(&header)?;
    if header.particle_count != topology.total_particles() {
        return Err(AprError::SizeMismatch {
            expected: topology.total_particles() as usize,
            found: header.particle_count as usize,
        });
    }
    if header.dims != topology.dims() {
        return Err(AprError::InvalidFormat(format!(
            "values were written for dims {:?}, topology has {:?}",
            header.dims,
            topology.dims()
        )));
    }
    let values = decode_values::<T>(&body, header.particle_count)?;
    ExtraParticleData::from_vec(topology, values)
}

fn read_body<R: Read>(r: &mut R) -> Result<(AprHeader, Vec<u8>), AprError> {
    let header = AprHeader::read_from(r)?;
    let mut buf8 = [0u8; 8];
    r.read_exact(&mut buf8)?;
    let len = u64::from_le_bytes(buf8);

    let mut payload = Vec::new();
    r.by_ref().take(len).read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(AprError::InvalidFormat(format!(
            "body truncated: expected {} bytes, found {}",
            len,
            payload.len()
        )));
    }

    let body = match header.flags.compression {
        CompressionType::None => payload,
        CompressionType::Lz4 => decompress_lz4(&payload)?,
    };
    Ok((header, body))
}

fn check_value_tag<T: ParticleScalar>(header: &AprHeader) -> Result<(), AprError> {
    if header.value_tag != T::TAG {
        return Err(AprError::ValueTypeMismatch {
            expected: T::TAG,
            found: header.value_tag,
        });
    }
    Ok(())
}

fn decode_run(tag: u8, payload: u32) -> Result<RunEntry, AprError> {
    if tag == GAP_TAG {
        return Ok(RunEntry::Gap { length: payload });
    }
    let status = Status::from_u8(tag)
        .ok_or_else(|| AprError::InvalidFormat(format!("unknown run tag {}", tag)))?;
    let particles = u8::try_from(payload)
        .map_err(|_| AprError::InvalidFormat(format!("cell owns {} particles", payload)))?;
    Ok(RunEntry::Cell { status, particles })
}

fn decode_values<T: ParticleScalar>(bytes: &[u8], count: u64) -> Result<Vec<T>, AprError> {
    let expected = count as usize * std::mem::size_of::<T>();
    if bytes.len() != expected {
        return Err(AprError::InvalidFormat(format!(
            "expected {} bytes of {} values, found {}",
            expected,
            T::NAME,
            bytes.len()
        )));
    }
    let mut values = vec![T::zeroed(); count as usize];
    bytemuck::cast_slice_mut::<T, u8>(&mut values).copy_from_slice(bytes);
    Ok(values)
}

/// Bounds-checked little-endian reader over the decoded body.
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], AprError> {
        if self.remaining() < n {
            return Err(AprError::InvalidFormat("body truncated".to_string()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, AprError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, AprError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}
