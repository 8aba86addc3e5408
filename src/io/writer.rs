//! Writing APR files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::AprError;
use crate::apr::{Apr, CellTopology, RunEntry};
use crate::data::{ExtraParticleData, ParticleScalar};

use super::format::{
    AprFlags, AprHeader, CompressionType, GAP_TAG, compress_lz4, lz4_available,
};

/// Write an APR (topology and intensities) to `path`.
pub fn write_apr<T: ParticleScalar, P: AsRef<Path>>(
    path: P,
    apr: &Apr<T>,
    compression: CompressionType,
) -> Result<(), AprError> {
    let path = path.as_ref();
    let mut w = BufWriter::new(File::create(path)?);
    write_apr_to(&mut w, apr, compression)?;
    w.flush()?;
    log::info!(
        "wrote {} particles to {}",
        apr.total_number_particles(),
        path.display()
    );
    Ok(())
}

pub fn write_apr_to<W: Write, T: ParticleScalar>(
    w: &mut W,
    apr: &Apr<T>,
    compression: CompressionType,
) -> Result<(), AprError> {
    let topology = apr.topology();
    let mut body = Vec::new();
    let mut run_count = 0u64;
    for level in topology.levels() {
        for column in 0..level.num_columns() {
            let runs = level.column_by_index(column);
            body.extend_from_slice(&(runs.len() as u32).to_le_bytes());
            for run in runs {
                let (tag, payload) = match *run {
                    RunEntry::Gap { length } => (GAP_TAG, length),
                    RunEntry::Cell { status, particles } => (status as u8, particles as u32),
                };
                body.push(tag);
                body.extend_from_slice(&payload.to_le_bytes());
            }
            run_count += runs.len() as u64;
        }
    }
    body.extend_from_slice(bytemuck::cast_slice(apr.intensities().as_slice()));

    let header = header_for::<T>(topology, false, run_count);
    write_body(w, header, body, compression)
}

/// Write particle values bound to `topology` to `path`.
pub fn write_particles<T: ParticleScalar, P: AsRef<Path>>(
    path: P,
    topology: &CellTopology,
    data: &ExtraParticleData<T>,
    compression: CompressionType,
) -> Result<(), AprError> {
    let path = path.as_ref();
    let mut w = BufWriter::new(File::create(path)?);
    write_particles_to(&mut w, topology, data, compression)?;
    w.flush()?;
    log::info!("wrote {} {} values to {}", data.len(), T::NAME, path.display());
    Ok(())
}

pub fn write_particles_to<W: Write, T: ParticleScalar>(
    w: &mut W,
    topology: &CellTopology,
    data: &ExtraParticleData<T>,
    compression: CompressionType,
) -> Result<(), AprError> {
    let expected = topology.total_particles() as usize;
    if data.len() != expected {
        return Err(AprError::SizeMismatch {
            expected,
            found: data.len(),
        });
    }
    let body = bytemuck::cast_slice(data.as_slice()).to_vec();
    let header = header_for::<T>(topology, true, 0);
    write_body(w, header, body, compression)
}

fn header_for<T: ParticleScalar>(topology: &CellTopology, particles_only: bool, run_count: u64) -> AprHeader {
    AprHeader {
        flags: AprFlags {
            compression: CompressionType::None,
            particles_only,
        },
        dims: topology.dims(),
        level_min: topology.level_min(),
        level_max: topology.level_max(),
        status_counts: topology.status_table().counts(),
        value_tag: T::TAG,
        run_count,
        particle_count: topology.total_particles(),
    }
}

fn write_body<W: Write>(
    w: &mut W,
    mut header: AprHeader,
    body: Vec<u8>,
    compression: CompressionType,
) -> Result<(), AprError> {
    let compression = match compression {
        CompressionType::Lz4 if !lz4_available() => {
            log::warn!("lz4 feature disabled, writing uncompressed");
            CompressionType::None
        }
        other => other,
    };
    header.flags.compression = compression;
    let payload = match compression {
        CompressionType::None => body,
        CompressionType::Lz4 => compress_lz4(&body),
    };

    header.write_to(w)?;
    w.write_all(&(payload.len() as u64).to_le_bytes())?;
    w.write_all(&payload)?;
    Ok(())
}
