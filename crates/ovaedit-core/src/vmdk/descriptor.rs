//! Text descriptor parsing.
//!
//! A descriptor is a list of `key = "value"` lines plus extent lines of the
//! form `RW 838860800 SPARSE "disk-s001.vmdk" 0`.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::header::SECTOR_SIZE;

const ACCESS_MODES: &[&str] = &["RW", "RDONLY", "NOACCESS"];

/// One extent line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorExtent {
    pub access: String,
    pub sectors: u64,
    /// Extent kind as written, upper-cased (`FLAT`, `SPARSE`, `ZERO`, ...).
    pub kind: String,
    /// Backing file; `ZERO` extents have none.
    pub file: Option<String>,
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmdkDescriptor {
    pub entries: BTreeMap<String, String>,
    pub extents: Vec<DescriptorExtent>,
}

impl VmdkDescriptor {
    /// Cheap check on the first bytes of a file.
    pub fn looks_like(data: &[u8]) -> bool {
        let head = String::from_utf8_lossy(&data[..data.len().min(1024)]);
        head.contains("# Disk DescriptorFile") || head.contains("createType")
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut descriptor = Self::default();
        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim_matches(|c: char| c.is_whitespace() || c == '\0');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let first = line.split_whitespace().next().unwrap_or_default();
            if ACCESS_MODES.contains(&first) {
                descriptor.extents.push(parse_extent(line, number + 1)?);
            } else if let Some((key, value)) = line.split_once('=') {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                descriptor
                    .entries
                    .insert(key.trim().to_string(), value.to_string());
            } else {
                return Err(Error::vmdk(format!(
                    "descriptor line {}: unrecognized '{}'",
                    number + 1,
                    line
                )));
            }
        }
        Ok(descriptor)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn create_type(&self) -> Option<&str> {
        self.get("createType")
    }

    pub fn adapter_type(&self) -> Option<&str> {
        self.get("ddb.adapterType")
    }

    /// Sum of all extent sizes.
    pub fn capacity_bytes(&self) -> u64 {
        self.extents.iter().map(|e| e.sectors).sum::<u64>() * SECTOR_SIZE
    }
}

fn parse_extent(line: &str, number: usize) -> Result<DescriptorExtent> {
    let bad = |what: &str| Error::vmdk(format!("descriptor line {}: {} in '{}'", number, what, line));

    let (access, rest) = next_token(line);
    let (sectors, rest) = next_token(rest);
    let (kind, rest) = next_token(rest);
    let sectors: u64 = sectors.parse().map_err(|_| bad("bad extent size"))?;
    if kind.is_empty() {
        return Err(bad("missing extent type"));
    }
    let kind = kind.to_ascii_uppercase();
    let rest = rest.trim();

    let (file, offset) = if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"').ok_or_else(|| bad("unterminated file name"))?;
        let tail = quoted[end + 1..].trim();
        let offset = if tail.is_empty() {
            0
        } else {
            tail.split_whitespace()
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad("bad extent offset"))?
        };
        (Some(quoted[..end].to_string()), offset)
    } else if kind == "ZERO" {
        (None, 0)
    } else {
        return Err(bad("missing file name"));
    };

    Ok(DescriptorExtent {
        access: access.to_string(),
        sectors,
        kind,
        file,
        offset,
    })
}

/// Split off the first whitespace-delimited token.
fn next_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    s.split_at(end)
}
