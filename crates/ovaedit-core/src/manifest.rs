//! Checksum manifests (`.mf` files).
//!
//! Each line reads `ALGO(filename)= hexdigest`. OVF 0.9 and 1.x packages use
//! SHA1; 2.x packages use SHA256.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::names::OvfVersion;

/// Digest algorithm of a manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    /// The algorithm new manifests use for a descriptor version.
    pub fn for_version(version: OvfVersion) -> Self {
        match version {
            OvfVersion::V2 => ChecksumAlgorithm::Sha256,
            _ => ChecksumAlgorithm::Sha1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha1 => "SHA1",
            ChecksumAlgorithm::Sha256 => "SHA256",
        }
    }

    /// Hex digest of an in-memory buffer.
    pub fn digest(self, data: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Sha1 => format!("{:x}", Sha1::digest(data)),
            ChecksumAlgorithm::Sha256 => format!("{:x}", Sha256::digest(data)),
        }
    }

    /// Hex digest of everything `reader` yields.
    pub fn digest_reader<R: Read>(self, mut reader: R) -> io::Result<String> {
        let mut writer = DigestWriter::new(io::sink(), self);
        io::copy(&mut reader, &mut writer)?;
        let (_, digest, _) = writer.finish();
        Ok(digest)
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHA1" => Ok(ChecksumAlgorithm::Sha1),
            "SHA256" => Ok(ChecksumAlgorithm::Sha256),
            other => Err(Error::manifest(format!("unsupported checksum algorithm '{}'", other))),
        }
    }
}

enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

/// A writer that hashes everything passing through it.
pub struct DigestWriter<W: Write> {
    inner: W,
    hasher: Hasher,
    bytes_written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W, algorithm: ChecksumAlgorithm) -> Self {
        let hasher = match algorithm {
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        };
        Self {
            inner,
            hasher,
            bytes_written: 0,
        }
    }

    /// Returns the inner writer, the hex digest and the byte count.
    pub fn finish(self) -> (W, String, u64) {
        let digest = match self.hasher {
            Hasher::Sha1(h) => format!("{:x}", h.finalize()),
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
        };
        (self.inner, digest, self.bytes_written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        match &mut self.hasher {
            Hasher::Sha1(h) => h.update(&buf[..n]),
            Hasher::Sha256(h) => h.update(&buf[..n]),
        }
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub algorithm: ChecksumAlgorithm,
    pub file_name: String,
    pub digest: String,
}

/// A parsed or generated manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

/// Differences between a manifest and the files it covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestReport {
    /// Package files the manifest does not list.
    pub missing: Vec<String>,
    /// Manifest entries for files not in the package.
    pub extra: Vec<String>,
    /// `(file, expected, actual)` digest mismatches.
    pub mismatched: Vec<(String, String, String)>,
    /// Manifest lines that could not be parsed, such as unknown algorithms.
    pub invalid: Vec<String>,
}

impl ManifestReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.mismatched.is_empty() && self.invalid.is_empty()
    }
}

impl fmt::Display for ManifestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("not listed: {}", self.missing.join(", ")));
        }
        if !self.extra.is_empty() {
            parts.push(format!("listed but absent: {}", self.extra.join(", ")));
        }
        for (name, expected, actual) in &self.mismatched {
            parts.push(format!("{} expected {} got {}", name, expected, actual));
        }
        if !self.invalid.is_empty() {
            parts.push(format!("unreadable lines: {}", self.invalid.join(", ")));
        }
        if parts.is_empty() {
            write!(f, "manifest matches")
        } else {
            write!(f, "{}", parts.join("; "))
        }
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse manifest text. Blank lines are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut manifest = Self::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry = parse_line(line)
                .ok_or_else(|| Error::manifest(format!("line {}: cannot parse '{}'", lineno + 1, line)))??;
            manifest.entries.push(entry);
        }
        Ok(manifest)
    }

    /// Parse what can be parsed; unreadable lines are returned alongside.
    pub fn parse_lenient(text: &str) -> (Self, Vec<String>) {
        let mut manifest = Self::new();
        let mut invalid = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match parse_line(line) {
                Some(Ok(entry)) => manifest.entries.push(entry),
                _ => invalid.push(line.to_string()),
            }
        }
        (manifest, invalid)
    }

    /// Append an entry, replacing any existing entry for the same file.
    pub fn add(&mut self, algorithm: ChecksumAlgorithm, file_name: impl Into<String>, digest: impl Into<String>) {
        let file_name = file_name.into();
        self.entries.retain(|e| e.file_name != file_name);
        self.entries.push(ManifestEntry {
            algorithm,
            file_name,
            digest: digest.into(),
        });
    }

    pub fn get(&self, file_name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.file_name == file_name)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compare against the package's files.
    ///
    /// `digest` computes the hex digest of a named file with the algorithm
    /// its manifest entry uses.
    pub fn verify<F>(&self, files: &[&str], mut digest: F) -> Result<ManifestReport>
    where
        F: FnMut(&str, ChecksumAlgorithm) -> Result<String>,
    {
        let mut report = ManifestReport::default();
        for name in files {
            match self.get(name) {
                None => report.missing.push(name.to_string()),
                Some(entry) => {
                    let actual = digest(name, entry.algorithm)?;
                    if !actual.eq_ignore_ascii_case(&entry.digest) {
                        report
                            .mismatched
                            .push((name.to_string(), entry.digest.clone(), actual));
                    }
                }
            }
        }
        for entry in &self.entries {
            if !files.contains(&entry.file_name.as_str()) {
                report.extra.push(entry.file_name.clone());
            }
        }
        Ok(report)
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}({})= {}", entry.algorithm, entry.file_name, entry.digest)?;
        }
        Ok(())
    }
}

/// `None` when the line has no `ALGO(name)=` shape at all.
fn parse_line(line: &str) -> Option<Result<ManifestEntry>> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    if close < open {
        return None;
    }
    let digest = line[close + 1..].trim_start().strip_prefix('=')?.trim();
    let file_name = &line[open + 1..close];
    if file_name.is_empty() || digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(line[..open].parse::<ChecksumAlgorithm>().map(|algorithm| ManifestEntry {
        algorithm,
        file_name: file_name.to_string(),
        digest: digest.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            ChecksumAlgorithm::Sha256.digest(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(
            ChecksumAlgorithm::Sha1.digest(b"hello world"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn test_digest_writer_incremental() {
        let mut writer = DigestWriter::new(Vec::new(), ChecksumAlgorithm::Sha256);
        writer.write_all(b"hello").unwrap();
        writer.write_all(b" ").unwrap();
        writer.write_all(b"world").unwrap();
        let (inner, digest, bytes) = writer.finish();
        assert_eq!(digest, ChecksumAlgorithm::Sha256.digest(b"hello world"));
        assert_eq!(bytes, 11);
        assert_eq!(inner, b"hello world");
    }

    #[test]
    fn test_digest_reader() {
        let digest = ChecksumAlgorithm::Sha1.digest_reader(&b"hello world"[..]).unwrap();
        assert_eq!(digest, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[test]
    fn test_algorithm_per_version() {
        assert_eq!(ChecksumAlgorithm::for_version(OvfVersion::V0_9), ChecksumAlgorithm::Sha1);
        assert_eq!(ChecksumAlgorithm::for_version(OvfVersion::V1), ChecksumAlgorithm::Sha1);
        assert_eq!(ChecksumAlgorithm::for_version(OvfVersion::V2), ChecksumAlgorithm::Sha256);
    }

    #[test]
    fn test_parse_and_render() {
        let text = "SHA1(vm.ovf)= 2aae6c35c94fcfb415dbe95f408b9ce91ee846ed\n\nSHA256(disk one.vmdk)= ab12\n";
        let manifest = Manifest::parse(text).unwrap();
        assert_eq!(manifest.entries().len(), 2);
        let disk = manifest.get("disk one.vmdk").unwrap();
        assert_eq!(disk.algorithm, ChecksumAlgorithm::Sha256);
        assert_eq!(disk.digest, "ab12");
        assert_eq!(
            manifest.to_string(),
            "SHA1(vm.ovf)= 2aae6c35c94fcfb415dbe95f408b9ce91ee846ed\nSHA256(disk one.vmdk)= ab12\n"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(Manifest::parse("hello"), Err(Error::Manifest { .. })));
        assert!(Manifest::parse("MD5(a)= 00").is_err());
        assert!(Manifest::parse("SHA1(a)= xyz").is_err());
    }

    #[test]
    fn test_parse_lenient_keeps_readable_lines() {
        let text = "SHA1(vm.ovf)= 00ff\nSHA512(vm.ovf)= abcd\nnot a manifest line\n";
        let (manifest, invalid) = Manifest::parse_lenient(text);
        assert_eq!(manifest.entries().len(), 1);
        assert_eq!(invalid, ["SHA512(vm.ovf)= abcd", "not a manifest line"]);
    }

    #[test]
    fn test_verify_reports_every_difference() {
        let mut manifest = Manifest::new();
        manifest.add(ChecksumAlgorithm::Sha1, "a.ovf", ChecksumAlgorithm::Sha1.digest(b"a"));
        manifest.add(ChecksumAlgorithm::Sha1, "b.vmdk", "00");
        manifest.add(ChecksumAlgorithm::Sha1, "gone.iso", "00");

        let report = manifest
            .verify(&["a.ovf", "b.vmdk", "c.vmdk"], |name, algo| {
                Ok(algo.digest(name.split('.').next().unwrap().as_bytes()))
            })
            .unwrap();
        assert_eq!(report.missing, ["c.vmdk"]);
        assert_eq!(report.extra, ["gone.iso"]);
        assert_eq!(report.mismatched.len(), 1);
        assert_eq!(report.mismatched[0].0, "b.vmdk");
        assert!(!report.is_clean());
    }

    #[test]
    fn test_round_trip_both_algorithms() {
        for algo in [ChecksumAlgorithm::Sha1, ChecksumAlgorithm::Sha256] {
            let mut manifest = Manifest::new();
            manifest.add(algo, "pkg.ovf", algo.digest(b"descriptor"));
            manifest.add(algo, "disk.vmdk", algo.digest(b"disk"));
            let parsed = Manifest::parse(&manifest.to_string()).unwrap();
            assert_eq!(parsed, manifest);
            let report = parsed
                .verify(&["pkg.ovf", "disk.vmdk"], |name, algo| {
                    Ok(algo.digest(if name == "pkg.ovf" { &b"descriptor"[..] } else { &b"disk"[..] }))
                })
                .unwrap();
            assert!(report.is_clean());
        }
    }
}
