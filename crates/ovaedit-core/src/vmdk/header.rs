//! Hosted sparse extent header.

use crate::error::{Error, Result};

/// "KDMV" read as a little-endian u32.
pub const VMDK_MAGIC: u32 = 0x564D_444B;

pub const SECTOR_SIZE: u64 = 512;

const FLAG_COMPRESSED: u32 = 1 << 16;
const FLAG_MARKERS: u32 = 1 << 17;

/// The fields of the 512-byte sparse header this crate cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseHeader {
    pub version: u32,
    pub flags: u32,
    /// Virtual capacity in sectors.
    pub capacity: u64,
    pub grain_size: u64,
    /// Embedded descriptor location, in sectors.
    pub descriptor_offset: u64,
    pub descriptor_size: u64,
}

fn le_u32(data: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn le_u64(data: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(buf)
}

impl SparseHeader {
    /// True when `data` starts with the sparse magic.
    pub fn matches(data: &[u8]) -> bool {
        data.len() >= 4 && le_u32(data, 0) == VMDK_MAGIC
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 44 {
            return Err(Error::vmdk(format!(
                "sparse header truncated at {} bytes",
                data.len()
            )));
        }
        if !Self::matches(data) {
            return Err(Error::vmdk(format!(
                "bad sparse magic 0x{:08X}",
                le_u32(data, 0)
            )));
        }
        let header = Self {
            version: le_u32(data, 4),
            flags: le_u32(data, 8),
            capacity: le_u64(data, 12),
            grain_size: le_u64(data, 20),
            descriptor_offset: le_u64(data, 28),
            descriptor_size: le_u64(data, 36),
        };
        if header.version == 0 || header.version > 3 {
            return Err(Error::vmdk(format!(
                "unsupported sparse version {}",
                header.version
            )));
        }
        Ok(header)
    }

    /// Stream-optimized extents carry grain markers and compression.
    pub fn is_stream_optimized(&self) -> bool {
        self.flags & FLAG_MARKERS != 0 && self.flags & FLAG_COMPRESSED != 0
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity * SECTOR_SIZE
    }

    /// Byte range of the embedded text descriptor, if any.
    pub fn descriptor_range(&self) -> Option<(u64, u64)> {
        if self.descriptor_offset == 0 || self.descriptor_size == 0 {
            return None;
        }
        Some((
            self.descriptor_offset * SECTOR_SIZE,
            self.descriptor_size * SECTOR_SIZE,
        ))
    }
}

#[cfg(test)]
pub(crate) fn sample_header(capacity_sectors: u64, flags: u32) -> Vec<u8> {
    let mut data = vec![0u8; SECTOR_SIZE as usize];
    data[0..4].copy_from_slice(&VMDK_MAGIC.to_le_bytes());
    data[4..8].copy_from_slice(&3u32.to_le_bytes());
    data[8..12].copy_from_slice(&flags.to_le_bytes());
    data[12..20].copy_from_slice(&capacity_sectors.to_le_bytes());
    data[20..28].copy_from_slice(&128u64.to_le_bytes());
    data
}
