//! OVA archive reading and writing.
//!
//! An OVA is an uncompressed TAR whose first member is the OVF descriptor,
//! optionally followed by the manifest and certificate, then the files the
//! descriptor references.

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use tar::{Archive, EntryType, Header};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::file_ref::{normalize_member, unix_now, FileReference};

/// One member of an OVA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OvaMember {
    /// Normalized member name.
    pub name: String,
    pub size: u64,
    pub entry_type: EntryType,
}

/// Reject absolute and parent-traversing member names.
pub fn check_member_path(name: &str) -> Result<()> {
    let path = Path::new(name);
    let unsafe_path = name.starts_with('/')
        || name.starts_with('\\')
        || path.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
    if unsafe_path {
        return Err(Error::ova(format!(
            "archive member '{}' has an absolute or parent-relative path; refusing to process a possibly malicious archive",
            name
        )));
    }
    Ok(())
}

/// List the members of an OVA in archive order, validating every path.
pub fn list_members(path: &Path) -> Result<Vec<OvaMember>> {
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let mut archive = Archive::new(BufReader::new(file));
    let mut members = Vec::new();
    for entry in archive.entries().map_err(|e| Error::io(e, path))? {
        let entry = entry.map_err(|e| Error::ova(format!("corrupt archive {}: {}", path.display(), e)))?;
        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        check_member_path(&raw)?;
        members.push(OvaMember {
            name: normalize_member(&raw),
            size: entry.size(),
            entry_type: entry.header().entry_type(),
        });
    }
    if members.is_empty() {
        return Err(Error::ova(format!("{} is an empty archive", path.display())));
    }
    Ok(members)
}

/// The descriptor member, which must come first.
pub fn descriptor_member(members: &[OvaMember]) -> Result<&OvaMember> {
    let first = members
        .first()
        .ok_or_else(|| Error::ova("archive has no members"))?;
    if !first.name.to_ascii_lowercase().ends_with(".ovf") {
        return Err(Error::ova(format!(
            "first archive member is '{}', expected an .ovf descriptor",
            first.name
        )));
    }
    Ok(first)
}

/// Read one member into memory.
pub fn read_member(archive: &Path, name: &str) -> Result<Vec<u8>> {
    FileReference::in_archive(name, archive, name).read_all()
}

/// Unpack every regular file of an OVA into `dest`.
pub fn extract(archive_path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    // Validate everything before writing anything.
    let members = list_members(archive_path)?;
    descriptor_member(&members)?;

    fs::create_dir_all(dest).map_err(|e| Error::io(e, dest))?;
    let file = File::open(archive_path).map_err(|e| Error::io(e, archive_path))?;
    let mut archive = Archive::new(BufReader::new(file));
    let mut written = Vec::new();
    for entry in archive.entries().map_err(|e| Error::io(e, archive_path))? {
        let mut entry = entry.map_err(|e| Error::io(e, archive_path))?;
        let name = normalize_member(&String::from_utf8_lossy(&entry.path_bytes()));
        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous => {
                let target = dest.join(&name);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::io(e, parent))?;
                }
                entry.unpack(&target).map_err(|e| Error::io(e, &target))?;
                debug!(member = %name, "extracted");
                written.push(target);
            }
            EntryType::Directory => {}
            other => {
                // Links are materialized by copying their target.
                if other.is_symlink() || other.is_hard_link() {
                    let target = FileReference::in_archive(&name, archive_path, &name).copy_to(dest)?;
                    written.push(target);
                } else {
                    warn!(member = %name, entry_type = ?other, "skipping unsupported archive entry");
                }
            }
        }
    }
    Ok(written)
}

/// Streams files into an OVA.
pub struct OvaWriter<W: Write> {
    builder: tar::Builder<W>,
    names: Vec<String>,
}

impl<W: Write> OvaWriter<W> {
    pub fn new(inner: W) -> Result<Self> {
        Ok(Self {
            builder: tar::Builder::new(inner),
            names: Vec::new(),
        })
    }

    fn header(size: u64) -> Header {
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(unix_now());
        header
    }

    fn record(&mut self, name: &str) -> Result<()> {
        check_member_path(name)?;
        if self.names.iter().any(|n| n == name) {
            return Err(Error::ova(format!("duplicate archive member '{}'", name)));
        }
        self.names.push(name.to_string());
        Ok(())
    }

    /// Add an in-memory file.
    pub fn add_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.add_reader(name, data.len() as u64, data)
    }

    /// Add `size` bytes read from `reader`.
    pub fn add_reader<R: Read>(&mut self, name: &str, size: u64, reader: R) -> Result<()> {
        self.record(name)?;
        let mut header = Self::header(size);
        self.builder
            .append_data(&mut header, name, reader)
            .map_err(|e| Error::ova(format!("failed to write '{}': {}", name, e)))?;
        debug!(member = %name, size, "added to archive");
        Ok(())
    }

    /// Add a referenced file under its href.
    pub fn add_reference(&mut self, file: &FileReference) -> Result<()> {
        self.record(file.name())?;
        file.append_to_archive(&mut self.builder)
    }

    /// Member names written so far.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Write the end-of-archive marker and return the inner writer.
    pub fn finish(self) -> Result<W> {
        self.builder
            .into_inner()
            .map_err(|e| Error::ova(format!("failed to finish archive: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn write_ova(dir: &Path, members: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join("test.ova");
        let mut writer = OvaWriter::new(File::create(&path).unwrap()).unwrap();
        for (name, data) in members {
            writer.add_file(name, data).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_check_member_path() {
        assert!(check_member_path("vm.ovf").is_ok());
        assert!(check_member_path("./disks/vm.vmdk").is_ok());
        assert!(check_member_path("/etc/passwd").is_err());
        assert!(check_member_path("../escape").is_err());
        assert!(check_member_path("a/../../b").is_err());
    }

    #[test]
    fn test_writer_layout() {
        let mut writer = OvaWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_file("test.ovf", b"<ovf content>").unwrap();
        let data = writer.finish().unwrap().into_inner();

        let name_end = data[0..100].iter().position(|&b| b == 0).unwrap_or(100);
        assert_eq!(&data[0..name_end], b"test.ovf");
        assert_eq!(&data[512..525], b"<ovf content>");
        // Padded to a block, then two zero blocks.
        assert_eq!(data.len() % 512, 0);
        assert!(data[data.len() - 1024..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_member_headers_carry_write_time() {
        let before = unix_now();
        let mut writer = OvaWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_file("test.ovf", b"<Envelope/>").unwrap();
        let data = writer.finish().unwrap().into_inner();

        let mut archive = Archive::new(Cursor::new(data));
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        let header = entry.header();
        assert!(header.mtime().unwrap() >= before);
        assert_eq!(header.mode().unwrap(), 0o644);
    }

    #[test]
    fn test_duplicate_members_rejected() {
        let mut writer = OvaWriter::new(Vec::new()).unwrap();
        writer.add_file("a.ovf", b"x").unwrap();
        assert!(writer.add_file("a.ovf", b"y").is_err());
        assert!(writer.add_file("../b", b"y").is_err());
        assert_eq!(writer.names(), ["a.ovf"]);
    }

    #[test]
    fn test_list_and_read_members() {
        let dir = TempDir::new().unwrap();
        let path = write_ova(dir.path(), &[("vm.ovf", b"<Envelope/>"), ("vm.mf", b"m"), ("disk.vmdk", b"disk")]);
        let members = list_members(&path).unwrap();
        let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["vm.ovf", "vm.mf", "disk.vmdk"]);
        assert_eq!(descriptor_member(&members).unwrap().name, "vm.ovf");
        assert_eq!(read_member(&path, "disk.vmdk").unwrap(), b"disk");
    }

    #[test]
    fn test_descriptor_must_come_first() {
        let dir = TempDir::new().unwrap();
        let path = write_ova(dir.path(), &[("disk.vmdk", b"disk"), ("vm.ovf", b"<Envelope/>")]);
        let members = list_members(&path).unwrap();
        assert!(matches!(descriptor_member(&members), Err(Error::Ova { .. })));
        assert!(extract(&path, &dir.path().join("out")).is_err());
    }

    #[test]
    fn test_extract() {
        let dir = TempDir::new().unwrap();
        let path = write_ova(dir.path(), &[("vm.ovf", b"<Envelope/>"), ("disk.vmdk", b"disk")]);
        let out = dir.path().join("out");
        let written = extract(&path, &out).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(fs::read(out.join("disk.vmdk")).unwrap(), b"disk");
    }

    #[test]
    fn test_malicious_member_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("evil.ova");
        let mut data = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut data);
            let mut header = Header::new_old();
            header.set_size(1);
            // Bypass the builder's own path validation.
            header.as_old_mut().name[..9].copy_from_slice(b"../evil\0\0");
            header.set_cksum();
            builder.append(&header, &b"x"[..]).unwrap();
            builder.finish().unwrap();
        }
        fs::write(&path, &data).unwrap();
        assert!(matches!(list_members(&path), Err(Error::Ova { .. })));
    }
}
