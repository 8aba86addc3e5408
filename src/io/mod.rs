//! Persistence of APR topologies and particle values.
//!
//! # File Format
//!
//! The `.apr` format stores the run-length coded topology and one value per
//! particle, with optional compression of the body:
//!
//! ```text
//! Header (48 bytes):
//!   Magic: "APRX" (4 bytes)
//!   Version: u16
//!   Flags: u16 (compression, particles-only)
//!   Dims: y_num, x_num, z_num (u32 each)
//!   Levels: level_min, level_max (u8 each)
//!   Status multiplicities: seed, boundary, filler (u8 each)
//!   Value type tag: u8
//!   Run count: u64
//!   Particle count: u64
//!   Reserved: 6 bytes
//!
//! Body length: u64
//!
//! Body (optionally LZ4 compressed):
//!   Per level, per column in (z, x) order:
//!     Run count: u32
//!     Runs: tag u8 (0 = gap, else status code) + payload u32
//!       (gap length or particle count)
//!   Particle values in canonical order (particle count * value size)
//! ```
//!
//! Particle values are stored with their in-memory layout, which is
//! little-endian on every supported target. Particles-only files omit the
//! runs and are bound to an existing topology when read.

mod format;
mod reader;
mod writer;

pub use format::{APR_MAGIC, APR_VERSION, AprFlags, AprHeader, CompressionType, lz4_available};
pub use reader::*;
pub use writer::*;

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::AprError;
    use crate::apr::{Apr, AprBuilder, CellTopology, ImageDims, LevelIndex, Status, StatusTable};
    use crate::data::ExtraParticleData;

    fn sample_apr() -> Apr<u16> {
        let mut builder = AprBuilder::new(ImageDims::new(12, 9, 5), 1, 4)
            .unwrap()
            .with_status_table(StatusTable::new(8, 1, 1).unwrap());
        builder
            .insert_required_levels(|y, x, z| if y < 4 && x + z < 6 { 3 } else { 2 })
            .unwrap();
        let topology = builder.build_topology().unwrap();
        let values: Vec<u16> = (0..topology.total_particles()).map(|i| (i * 7 % 65521) as u16).collect();
        let values = ExtraParticleData::from_vec(&topology, values).unwrap();
        Apr::new(topology, values).unwrap()
    }

    fn assert_same(a: &Apr<u16>, b: &Apr<u16>) {
        assert_eq!(a.dims(), b.dims());
        assert_eq!(a.topology().levels(), b.topology().levels());
        assert_eq!(a.topology().nodes(), b.topology().nodes());
        assert_eq!(a.topology().status_table(), b.topology().status_table());
        assert_eq!(a.intensities(), b.intensities());
    }

    #[test]
    fn test_apr_roundtrip_in_memory() {
        let apr = sample_apr();
        let mut buf = Vec::new();
        write_apr_to(&mut buf, &apr, CompressionType::None).unwrap();
        let decoded: Apr<u16> = read_apr_from(&mut Cursor::new(&buf)).unwrap();
        assert_same(&apr, &decoded);
    }

    #[test]
    fn test_apr_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.apr");
        let apr = sample_apr();
        write_apr(&path, &apr, CompressionType::Lz4).unwrap();
        let decoded = read_apr::<u16, _>(&path).unwrap();
        assert_same(&apr, &decoded);
    }

    #[test]
    fn test_particles_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.apr");
        let apr = sample_apr();
        let values = apr.intensities().map(|v| v as f32 * 0.5);
        write_particles(&path, apr.topology(), &values, CompressionType::None).unwrap();
        let decoded = read_particles::<f32, _>(&path, apr.topology()).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_value_type_mismatch() {
        let apr = sample_apr();
        let mut buf = Vec::new();
        write_apr_to(&mut buf, &apr, CompressionType::None).unwrap();
        let err = read_apr_from::<_, f32>(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(
            err,
            AprError::ValueTypeMismatch {
                expected: 7,
                found: 2
            }
        ));
    }

    #[test]
    fn test_particles_bound_to_wrong_topology() {
        let apr = sample_apr();
        let other = AprBuilder::from_level_fn(ImageDims::new(4, 4, 4), 0, 2, |_, _, _| 2).unwrap();
        let mut buf = Vec::new();
        write_particles_to(&mut buf, apr.topology(), apr.intensities(), CompressionType::None)
            .unwrap();
        let err = read_particles_from::<_, u16>(&mut Cursor::new(&buf), other.topology()).unwrap_err();
        assert!(matches!(err, AprError::SizeMismatch { .. }));
    }

    #[test]
    fn test_particles_file_is_not_an_apr() {
        let apr = sample_apr();
        let mut buf = Vec::new();
        write_particles_to(&mut buf, apr.topology(), apr.intensities(), CompressionType::None)
            .unwrap();
        assert!(matches!(
            read_apr_from::<_, u16>(&mut Cursor::new(&buf)),
            Err(AprError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_truncated_file() {
        let apr = sample_apr();
        let mut buf = Vec::new();
        write_apr_to(&mut buf, &apr, CompressionType::None).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(read_apr_from::<_, u16>(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn test_large_sparse_image_roundtrip() {
        let mut builder = AprBuilder::new(ImageDims::new(1 << 30, 1, 1), 0, 30).unwrap();
        builder.insert(0, 0, 0, 0, Status::Filler).unwrap();
        let apr = builder.build::<u16>().unwrap();
        let mut buf = Vec::new();
        write_apr_to(&mut buf, &apr, CompressionType::None).unwrap();
        let decoded: Apr<u16> = read_apr_from(&mut Cursor::new(&buf)).unwrap();
        assert_same(&apr, &decoded);
    }

    #[test]
    fn test_unbalanced_file_rejected() {
        // Level-1 cell over y in 0..4 next to level-3 cells at y = 4, 5.
        let table = StatusTable::default();
        let column = |cells: &[(u32, Status)], y_num| {
            vec![LevelIndex::encode_column(cells, y_num, &table)]
        };
        let levels = vec![
            LevelIndex::from_columns(1, (2, 1, 1), column(&[(0, Status::Filler)], 2)).unwrap(),
            LevelIndex::from_columns(2, (4, 1, 1), column(&[(3, Status::Filler)], 4)).unwrap(),
            LevelIndex::from_columns(3, (8, 1, 1), column(&[(4, Status::Seed), (5, Status::Seed)], 8))
                .unwrap(),
        ];
        let topology = CellTopology::from_levels(ImageDims::new(8, 1, 1), 1, 3, 3, table, levels).unwrap();
        topology.validate_coverage().unwrap();
        let values = ExtraParticleData::<u16>::new(&topology);
        let apr = Apr::new(topology, values).unwrap();

        let mut buf = Vec::new();
        write_apr_to(&mut buf, &apr, CompressionType::None).unwrap();
        assert!(matches!(
            read_apr_from::<_, u16>(&mut Cursor::new(&buf)),
            Err(AprError::UnbalancedCell { level: 1, .. })
        ));
    }

    #[test]
    fn test_corrupt_run_rejected() {
        let apr = sample_apr();
        let mut buf = Vec::new();
        write_apr_to(&mut buf, &apr, CompressionType::None).unwrap();
        // First run of the first column: turn its tag into an unknown status.
        let first_tag = AprHeader::SIZE + 8 + 4;
        buf[first_tag] = 9;
        assert!(matches!(
            read_apr_from::<_, u16>(&mut Cursor::new(&buf)),
            Err(AprError::InvalidFormat(_))
        ));
    }
}
