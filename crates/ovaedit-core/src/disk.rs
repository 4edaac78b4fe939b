//! Disk image format detection and capacity probing.
//!
//! OVF packages carry hard disks as stream-optimized VMDKs. Anything else is
//! handed to a [`DiskConverter`] before being embedded.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::file_ref::{FileReference, OpenMode};
use crate::vmdk::{SparseHeader, VmdkDescriptor, STREAM_OPTIMIZED};

/// Bytes read when sniffing a format; covers the ISO-9660 volume descriptor.
const PROBE_LEN: usize = 0x8800;

const QCOW2_MAGIC: &[u8; 4] = b"QFI\xfb";
const ISO_MAGIC: &[u8; 5] = b"CD001";
const ISO_MAGIC_OFFSET: usize = 0x8001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskFormat {
    Vmdk,
    Qcow2,
    Iso,
    Raw,
}

impl DiskFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DiskFormat::Vmdk => "vmdk",
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Iso => "iso",
            DiskFormat::Raw => "raw",
        }
    }

    /// Value for the `ovf:format` attribute of a Disk.
    pub fn format_uri(self, subformat: Option<&str>) -> String {
        match self {
            DiskFormat::Vmdk => format!(
                "http://www.vmware.com/interfaces/specifications/vmdk.html#{}",
                subformat.unwrap_or(STREAM_OPTIMIZED)
            ),
            DiskFormat::Qcow2 => "http://www.gnome.org/~markmc/qcow-image-format.html".to_string(),
            DiskFormat::Iso => "http://www.ecma-international.org/publications/standards/Ecma-119.htm".to_string(),
            DiskFormat::Raw => "raw".to_string(),
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What probing learned about an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub format: DiskFormat,
    /// VMDK createType, e.g. `streamOptimized`.
    pub subformat: Option<String>,
    /// Virtual capacity in bytes.
    pub capacity: u64,
}

impl DiskInfo {
    /// OVF hard disks must be stream-optimized VMDKs.
    pub fn needs_conversion(&self) -> bool {
        !(self.format == DiskFormat::Vmdk && self.subformat.as_deref() == Some(STREAM_OPTIMIZED))
    }
}

/// External image converter.
pub trait DiskConverter {
    /// Convert `image`, returning the path of the new image.
    fn convert(&self, image: &Path, target_format: DiskFormat, target_subformat: Option<&str>) -> Result<PathBuf>;
}

/// Probe an image from a seekable reader of known total `size`.
pub fn probe_reader<R: Read + Seek>(mut reader: R, size: u64) -> Result<DiskInfo> {
    let mut head = Vec::with_capacity(PROBE_LEN);
    (&mut reader)
        .take(PROBE_LEN as u64)
        .read_to_end(&mut head)
        .map_err(Error::io_simple)?;

    if SparseHeader::matches(&head) {
        let header = SparseHeader::parse(&head)?;
        let subformat = if header.is_stream_optimized() {
            Some(STREAM_OPTIMIZED.to_string())
        } else {
            embedded_create_type(&mut reader, &header)?.or_else(|| Some("monolithicSparse".to_string()))
        };
        return Ok(DiskInfo {
            format: DiskFormat::Vmdk,
            subformat,
            capacity: header.capacity_bytes(),
        });
    }

    if head.starts_with(QCOW2_MAGIC) {
        if head.len() < 32 {
            return Err(Error::vmdk("qcow2 header truncated"));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&head[24..32]);
        return Ok(DiskInfo {
            format: DiskFormat::Qcow2,
            subformat: None,
            capacity: u64::from_be_bytes(buf),
        });
    }

    if head.len() >= ISO_MAGIC_OFFSET + ISO_MAGIC.len()
        && &head[ISO_MAGIC_OFFSET..ISO_MAGIC_OFFSET + ISO_MAGIC.len()] == ISO_MAGIC
    {
        return Ok(DiskInfo {
            format: DiskFormat::Iso,
            subformat: None,
            capacity: size,
        });
    }

    if VmdkDescriptor::looks_like(&head) {
        let descriptor = VmdkDescriptor::parse(&String::from_utf8_lossy(&head))?;
        return Ok(DiskInfo {
            format: DiskFormat::Vmdk,
            subformat: descriptor.create_type().map(str::to_string),
            capacity: descriptor.capacity_bytes(),
        });
    }

    Ok(DiskInfo {
        format: DiskFormat::Raw,
        subformat: None,
        capacity: size,
    })
}

fn embedded_create_type<R: Read + Seek>(reader: &mut R, header: &SparseHeader) -> Result<Option<String>> {
    let Some((offset, len)) = header.descriptor_range() else {
        return Ok(None);
    };
    reader.seek(SeekFrom::Start(offset)).map_err(Error::io_simple)?;
    let mut text = Vec::new();
    reader
        .take(len)
        .read_to_end(&mut text)
        .map_err(Error::io_simple)?;
    let descriptor = VmdkDescriptor::parse(&String::from_utf8_lossy(&text))?;
    Ok(descriptor.create_type().map(str::to_string))
}

/// Probe an image on disk.
pub fn probe(path: &Path) -> Result<DiskInfo> {
    let file = std::fs::File::open(path).map_err(|e| Error::io(e, path))?;
    let size = file.metadata().map_err(|e| Error::io(e, path))?.len();
    let info = probe_reader(file, size)?;
    debug!(path = %path.display(), format = %info.format, capacity = info.capacity, "probed disk image");
    Ok(info)
}

/// Probe a referenced file, which may live inside an archive.
pub fn probe_file(file: &FileReference) -> Result<DiskInfo> {
    if let Some(path) = file.path() {
        return probe(path);
    }
    // Archive members are not seekable; buffer the probe window.
    let size = file.size()?;
    let mut head = Vec::new();
    file.open(OpenMode::Read)?
        .take(PROBE_LEN as u64)
        .read_to_end(&mut head)
        .map_err(|e| Error::io(e, file.backing().to_string()))?;
    probe_reader(std::io::Cursor::new(head), size)
}
