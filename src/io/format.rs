//! Binary format definitions for APR files.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::apr::ImageDims;

/// Magic bytes identifying an APR file.
pub const APR_MAGIC: &[u8; 4] = b"APRX";

/// Current format version.
pub const APR_VERSION: u16 = 1;

/// Run tag of a gap; cell runs use their status code.
pub const GAP_TAG: u8 = 0;

/// Compression applied to the file body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionType {
    #[default]
    None = 0,
    /// LZ4 fast compression.
    Lz4 = 1,
}

impl CompressionType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Lz4),
            _ => None,
        }
    }
}

/// Header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AprFlags {
    /// Compression type (lower 4 bits).
    pub compression: CompressionType,
    /// Body holds particle values only, without the cell topology.
    pub particles_only: bool,
}

impl AprFlags {
    pub fn to_u16(self) -> u16 {
        let mut flags = self.compression as u16;
        if self.particles_only {
            flags |= 1 << 4;
        }
        flags
    }

    pub fn from_u16(v: u16) -> io::Result<Self> {
        let compression = CompressionType::from_u8((v & 0x0F) as u8).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown compression type: {}", v & 0x0F),
            )
        })?;
        Ok(Self {
            compression,
            particles_only: (v & (1 << 4)) != 0,
        })
    }
}

/// File header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AprHeader {
    pub flags: AprFlags,
    pub dims: ImageDims,
    pub level_min: u8,
    pub level_max: u8,
    /// Particles per cell for seed, boundary and filler cells.
    pub status_counts: [u8; 3],
    /// [`ParticleScalar::TAG`](crate::data::ParticleScalar::TAG) of the stored values.
    pub value_tag: u8,
    pub run_count: u64,
    pub particle_count: u64,
}

impl AprHeader {
    /// Size of header in bytes.
    /// Magic(4) + Version(2) + Flags(2) + Dims(12) + Levels(2) + Status(3) +
    /// ValueTag(1) + RunCount(8) + ParticleCount(8) + Reserved(6) = 48
    pub const SIZE: usize = 48;

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(APR_MAGIC)?;
        w.write_all(&APR_VERSION.to_le_bytes())?;
        w.write_all(&self.flags.to_u16().to_le_bytes())?;
        w.write_all(&self.dims.y_num.to_le_bytes())?;
        w.write_all(&self.dims.x_num.to_le_bytes())?;
        w.write_all(&self.dims.z_num.to_le_bytes())?;
        w.write_all(&[self.level_min, self.level_max])?;
        w.write_all(&self.status_counts)?;
        w.write_all(&[self.value_tag])?;
        w.write_all(&self.run_count.to_le_bytes())?;
        w.write_all(&self.particle_count.to_le_bytes())?;
        // Reserved bytes
        w.write_all(&[0u8; 6])?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != APR_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid APRX magic bytes",
            ));
        }

        let mut buf2 = [0u8; 2];
        let mut buf4 = [0u8; 4];
        let mut buf8 = [0u8; 8];

        r.read_exact(&mut buf2)?;
        let version = u16::from_le_bytes(buf2);
        if version != APR_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported APRX version: {}", version),
            ));
        }

        r.read_exact(&mut buf2)?;
        let flags = AprFlags::from_u16(u16::from_le_bytes(buf2))?;

        r.read_exact(&mut buf4)?;
        let y_num = u32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let x_num = u32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let z_num = u32::from_le_bytes(buf4);

        r.read_exact(&mut buf2)?;
        let (level_min, level_max) = (buf2[0], buf2[1]);

        let mut status_counts = [0u8; 3];
        r.read_exact(&mut status_counts)?;

        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;

        r.read_exact(&mut buf8)?;
        let run_count = u64::from_le_bytes(buf8);

        r.read_exact(&mut buf8)?;
        let particle_count = u64::from_le_bytes(buf8);

        // Skip reserved bytes
        let mut reserved = [0u8; 6];
        r.read_exact(&mut reserved)?;

        Ok(Self {
            flags,
            dims: ImageDims::new(y_num, x_num, z_num),
            level_min,
            level_max,
            status_counts,
            value_tag: tag[0],
            run_count,
            particle_count,
        })
    }
}

/// Compress data using LZ4.
#[cfg(feature = "lz4")]
pub fn compress_lz4(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompress LZ4 data.
#[cfg(feature = "lz4")]
pub fn decompress_lz4(data: &[u8]) -> io::Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// True when LZ4 support is compiled in.
pub const fn lz4_available() -> bool {
    cfg!(feature = "lz4")
}

#[cfg(not(feature = "lz4"))]
pub fn compress_lz4(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}

#[cfg(not(feature = "lz4"))]
pub fn decompress_lz4(_data: &[u8]) -> io::Result<Vec<u8>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "LZ4 compressed file, but the lz4 feature is disabled",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header() -> AprHeader {
        AprHeader {
            flags: AprFlags {
                compression: CompressionType::Lz4,
                particles_only: true,
            },
            dims: ImageDims::new(640, 480, 33),
            level_min: 2,
            level_max: 10,
            status_counts: [8, 1, 1],
            value_tag: 2,
            run_count: 123_456,
            particle_count: 9_876_543_210,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let header = header();
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), AprHeader::SIZE);

        let mut cursor = Cursor::new(&buf);
        let decoded = AprHeader::read_from(&mut cursor).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = Vec::new();
        header().write_to(&mut buf).unwrap();
        buf[0] = b'X';
        let err = AprHeader::read_from(&mut Cursor::new(&buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_future_version_rejected() {
        let mut buf = Vec::new();
        header().write_to(&mut buf).unwrap();
        buf[4..6].copy_from_slice(&(APR_VERSION + 1).to_le_bytes());
        assert!(AprHeader::read_from(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn test_flags_roundtrip() {
        let flags = AprFlags {
            compression: CompressionType::None,
            particles_only: true,
        };
        assert_eq!(AprFlags::from_u16(flags.to_u16()).unwrap(), flags);
        assert!(AprFlags::from_u16(0x0F).is_err());
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn test_lz4_roundtrip() {
        let data: Vec<u8> = (0..4096).map(|i| (i % 7) as u8).collect();
        let compressed = compress_lz4(&data);
        assert!(compressed.len() < data.len());
        assert_eq!(decompress_lz4(&compressed).unwrap(), data);
    }
}
