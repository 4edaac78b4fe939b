//! Handles to payload files that live on disk or inside an OVA.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tar::{Archive, EntryType, Header};
use tracing::debug;

use crate::error::{Error, Result};
use crate::manifest::ChecksumAlgorithm;

/// Link chains longer than this are treated as broken.
const MAX_LINK_DEPTH: usize = 8;

/// Where a file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    Path(PathBuf),
    Archive { archive: PathBuf, member: String },
}

impl fmt::Display for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Path(path) => write!(f, "{}", path.display()),
            Backing::Archive { archive, member } => write!(f, "{}:{}", archive.display(), member),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// An open file; closed when dropped.
pub enum FileHandle {
    Reader(io::Take<BufReader<File>>),
    Writer(BufWriter<File>),
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileHandle::Reader(r) => r.read(buf),
            FileHandle::Writer(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file was opened for writing",
            )),
        }
    }
}

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileHandle::Writer(w) => w.write(buf),
            FileHandle::Reader(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file was opened for reading",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileHandle::Writer(w) => w.flush(),
            FileHandle::Reader(_) => Ok(()),
        }
    }
}

/// Location of a member's data inside an archive.
#[derive(Debug, Clone, Copy)]
struct MemberSpan {
    offset: u64,
    size: u64,
}

/// A named payload file referenced from the descriptor.
#[derive(Debug, Clone)]
pub struct FileReference {
    name: String,
    backing: Backing,
    checksums: HashMap<ChecksumAlgorithm, String>,
}

impl FileReference {
    /// A file on the local filesystem.
    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            backing: Backing::Path(path.into()),
            checksums: HashMap::new(),
        }
    }

    /// A member of an uncompressed TAR archive.
    pub fn in_archive(name: impl Into<String>, archive: impl Into<PathBuf>, member: &str) -> Self {
        Self {
            name: name.into(),
            backing: Backing::Archive {
                archive: archive.into(),
                member: normalize_member(member),
            },
            checksums: HashMap::new(),
        }
    }

    /// The href this file is known by.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// The local path, for filesystem-backed files.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Path(path) => Some(path),
            Backing::Archive { .. } => None,
        }
    }

    fn locate(&self) -> Result<(PathBuf, MemberSpan)> {
        match &self.backing {
            Backing::Archive { archive, member } => Ok((archive.clone(), find_member(archive, member)?)),
            Backing::Path(_) => Err(Error::ova("not an archive member")),
        }
    }

    pub fn exists(&self) -> bool {
        match &self.backing {
            Backing::Path(path) => path.is_file(),
            Backing::Archive { .. } => self.locate().is_ok(),
        }
    }

    pub fn size(&self) -> Result<u64> {
        match &self.backing {
            Backing::Path(path) => Ok(fs::metadata(path).map_err(|e| Error::io(e, path))?.len()),
            Backing::Archive { .. } => Ok(self.locate()?.1.size),
        }
    }

    /// Open the file. Archive members can only be read.
    pub fn open(&self, mode: OpenMode) -> Result<FileHandle> {
        match (&self.backing, mode) {
            (Backing::Path(path), OpenMode::Read) => {
                let file = File::open(path).map_err(|e| Error::io(e, path))?;
                let len = file.metadata().map_err(|e| Error::io(e, path))?.len();
                Ok(FileHandle::Reader(BufReader::new(file).take(len)))
            }
            (Backing::Path(path), OpenMode::Write) => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::io(e, path))?;
                Ok(FileHandle::Writer(BufWriter::new(file)))
            }
            (Backing::Archive { archive, member }, OpenMode::Write) => Err(Error::unsupported(format!(
                "cannot open {} inside {} for writing",
                member,
                archive.display()
            ))),
            (Backing::Archive { .. }, OpenMode::Read) => {
                let (archive, span) = self.locate()?;
                let mut file = File::open(&archive).map_err(|e| Error::io(e, &archive))?;
                file.seek(SeekFrom::Start(span.offset))
                    .map_err(|e| Error::io(e, &archive))?;
                Ok(FileHandle::Reader(BufReader::new(file).take(span.size)))
            }
        }
    }

    /// Read the whole file into memory.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open(OpenMode::Read)?
            .read_to_end(&mut data)
            .map_err(|e| Error::io(e, self.backing.to_string()))?;
        Ok(data)
    }

    /// Hex digest of the contents, computed once per algorithm.
    pub fn checksum(&mut self, algorithm: ChecksumAlgorithm) -> Result<String> {
        if let Some(digest) = self.checksums.get(&algorithm) {
            return Ok(digest.clone());
        }
        let reader = self.open(OpenMode::Read)?;
        let digest = algorithm
            .digest_reader(reader)
            .map_err(|e| Error::io(e, self.backing.to_string()))?;
        debug!(file = %self.name, algorithm = %algorithm, "computed checksum");
        self.checksums.insert(algorithm, digest.clone());
        Ok(digest)
    }

    /// Copy the contents to `dir/<name>`, following links.
    pub fn copy_to(&self, dir: &Path) -> Result<PathBuf> {
        let target = dir.join(&self.name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent))?;
        }
        match &self.backing {
            Backing::Path(path) => {
                fs::copy(path, &target).map_err(|e| Error::io(e, path))?;
            }
            Backing::Archive { .. } => {
                let mut reader = self.open(OpenMode::Read)?;
                let mut out = File::create(&target).map_err(|e| Error::io(e, &target))?;
                io::copy(&mut reader, &mut out).map_err(|e| Error::io(e, &target))?;
            }
        }
        debug!(file = %self.name, to = %target.display(), "copied file");
        Ok(target)
    }

    /// Append as a regular file named after the href.
    pub fn append_to_archive<W: Write>(&self, builder: &mut tar::Builder<W>) -> Result<()> {
        let size = self.size()?;
        let reader = self.open(OpenMode::Read)?;
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(unix_now());
        builder
            .append_data(&mut header, &self.name, reader)
            .map_err(|e| Error::io(e, self.backing.to_string()))?;
        debug!(file = %self.name, size, "appended file to archive");
        Ok(())
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Strip leading `./` from an archive member name.
pub(crate) fn normalize_member(name: &str) -> String {
    let mut name = name;
    while let Some(rest) = name.strip_prefix("./") {
        name = rest;
    }
    name.trim_end_matches('/').to_string()
}

/// Resolve a symbolic link target relative to the member that holds it.
fn resolve_link(member: &str, target: &str) -> String {
    let mut parts: Vec<&str> = match member.rfind('/') {
        Some(i) => member[..i].split('/').collect(),
        None => Vec::new(),
    };
    for part in target.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    parts.join("/")
}

fn find_member(archive_path: &Path, member: &str) -> Result<MemberSpan> {
    let mut wanted = normalize_member(member);
    for _ in 0..MAX_LINK_DEPTH {
        let file = File::open(archive_path).map_err(|e| Error::io(e, archive_path))?;
        let mut archive = Archive::new(BufReader::new(file));
        let entries = archive.entries().map_err(|e| Error::io(e, archive_path))?;

        let mut next = None;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, archive_path))?;
            let path = entry.path().map_err(|e| Error::io(e, archive_path))?;
            if normalize_member(&path.to_string_lossy()) != wanted {
                continue;
            }
            let kind = entry.header().entry_type();
            if kind.is_hard_link() || kind.is_symlink() {
                let target = entry
                    .link_name()
                    .map_err(|e| Error::io(e, archive_path))?
                    .ok_or_else(|| Error::ova(format!("link {} has no target", wanted)))?;
                let target = target.to_string_lossy();
                next = Some(if kind.is_symlink() {
                    resolve_link(&wanted, &target)
                } else {
                    normalize_member(&target)
                });
                break;
            }
            return Ok(MemberSpan {
                offset: entry.raw_file_position(),
                size: entry.size(),
            });
        }

        match next {
            Some(target) => {
                debug!(from = %wanted, to = %target, "following archive link");
                wanted = target;
            }
            None => {
                return Err(Error::not_found(format!(
                    "{} is not in archive {}",
                    wanted,
                    archive_path.display()
                )))
            }
        }
    }
    Err(Error::ova(format!("too many links resolving {}", member)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build_archive(dir: &Path) -> PathBuf {
        let path = dir.join("pkg.ova");
        let mut builder = tar::Builder::new(File::create(&path).unwrap());

        let mut header = Header::new_ustar();
        header.set_size(5);
        header.set_mode(0o644);
        builder.append_data(&mut header, "./disk.vmdk", &b"hello"[..]).unwrap();

        let mut link = Header::new_ustar();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        builder.append_link(&mut link, "alias.vmdk", "disk.vmdk").unwrap();

        builder.into_inner().unwrap().sync_all().unwrap();
        path
    }

    #[test]
    fn test_normalize_member() {
        assert_eq!(normalize_member("./a/b.vmdk"), "a/b.vmdk");
        assert_eq!(normalize_member("././x"), "x");
        assert_eq!(normalize_member("dir/"), "dir");
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(resolve_link("a/b/link", "../c"), "a/c");
        assert_eq!(resolve_link("link", "./target"), "target");
    }

    #[test]
    fn test_path_backed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"payload").unwrap();

        let mut file = FileReference::from_path("data.bin", &path);
        assert!(file.exists());
        assert_eq!(file.size().unwrap(), 7);
        assert_eq!(file.read_all().unwrap(), b"payload");
        assert_eq!(
            file.checksum(ChecksumAlgorithm::Sha256).unwrap(),
            ChecksumAlgorithm::Sha256.digest(b"payload")
        );

        let missing = FileReference::from_path("nope", dir.path().join("nope"));
        assert!(!missing.exists());
        assert!(missing.size().is_err());
    }

    #[test]
    fn test_archive_member_and_link() {
        let dir = TempDir::new().unwrap();
        let archive = build_archive(dir.path());

        let disk = FileReference::in_archive("disk.vmdk", &archive, "disk.vmdk");
        assert!(disk.exists());
        assert_eq!(disk.size().unwrap(), 5);
        assert_eq!(disk.read_all().unwrap(), b"hello");

        let alias = FileReference::in_archive("alias.vmdk", &archive, "./alias.vmdk");
        assert_eq!(alias.read_all().unwrap(), b"hello");

        let out = TempDir::new().unwrap();
        let copied = alias.copy_to(out.path()).unwrap();
        assert_eq!(fs::read(copied).unwrap(), b"hello");

        assert!(!FileReference::in_archive("x", &archive, "x").exists());
    }

    #[test]
    fn test_archive_member_cannot_be_written() {
        let dir = TempDir::new().unwrap();
        let archive = build_archive(dir.path());
        let disk = FileReference::in_archive("disk.vmdk", &archive, "disk.vmdk");
        assert!(matches!(disk.open(OpenMode::Write), Err(Error::Unsupported { .. })));
    }

    #[test]
    fn test_append_dereferences_links() {
        let dir = TempDir::new().unwrap();
        let archive = build_archive(dir.path());
        let alias = FileReference::in_archive("alias.vmdk", &archive, "alias.vmdk");

        let mut builder = tar::Builder::new(Vec::new());
        alias.append_to_archive(&mut builder).unwrap();
        let data = builder.into_inner().unwrap();

        let mut out = Archive::new(&data[..]);
        let mut entry = out.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().entry_type(), EntryType::Regular);
        assert_eq!(entry.header().mode().unwrap(), 0o644);
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"hello");
    }
}
