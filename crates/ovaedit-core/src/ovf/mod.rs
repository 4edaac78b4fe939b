//! An OVF package: the descriptor plus the files it references.
//!
//! [`Ovf`] loads a package from an `.ovf` descriptor on disk or from an
//! `.ova` archive, exposes profile-aware editing on top of the
//! [`HardwareCollection`], and writes the result back out as either form.
//!
//! # Quick Start
//!
//! ```no_run
//! use ovaedit_core::{Ovf, OvfOptions};
//! use std::path::Path;
//!
//! let mut ovf = Ovf::load(Path::new("appliance.ova"), OvfOptions::default()).unwrap();
//! ovf.set_cpu_count(4, &["large"]).unwrap();
//! ovf.write(Path::new("appliance-edited.ova")).unwrap();
//! ```

mod disks;
mod edit;
mod product;

pub use disks::{AddDiskOptions, DiskAttachment, DiskEntry, FileEntry};
pub use product::{NetworkInfo, ProductField, ProductInfo, ProductProperty};

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

use crate::disk::{self, DiskConverter};
use crate::error::{Error, Result};
use crate::file_ref::{Backing, FileReference};
use crate::hardware::HardwareCollection;
use crate::manifest::{ChecksumAlgorithm, Manifest, ManifestReport};
use crate::names::{Attr, ItemField, NameResolver, OvfVersion, Section, Tag, STANDARD_PREFIXES};
use crate::options::{OvfOptions, ProgressCallback, WritePhase};
use crate::ova::{self, OvaWriter};
use crate::platform::{platform_for_product_class, Platform};
use crate::profile::ProfileSet;
use crate::xml::{Document, Element};

/// Raw pieces of a package before parsing.
struct Package {
    descriptor_name: String,
    descriptor: Vec<u8>,
    manifest: Option<String>,
    certificate: Option<FileReference>,
}

/// A loaded OVF package.
pub struct Ovf {
    source: PathBuf,
    source_is_archive: bool,
    options: OvfOptions,
    document: Document,
    names: NameResolver,
    hardware: HardwareCollection,
    /// Present files, in descriptor order.
    files: Vec<FileReference>,
    manifest_report: Option<ManifestReport>,
    /// Signature of the source package, if it was signed.
    certificate: Option<FileReference>,
    platform: Box<dyn Platform>,
    converter: Option<Box<dyn DiskConverter>>,
}

impl Ovf {
    /// Load a package from an `.ova` archive or an `.ovf` descriptor.
    pub fn load(path: &Path, options: OvfOptions) -> Result<Self> {
        let source_is_archive = is_archive_path(path);
        let package = if source_is_archive {
            read_archive(path)?
        } else {
            read_descriptor(path)?
        };

        let mut document = Document::parse(&package.descriptor)?;
        let namespace = document.root.name.namespace.clone().unwrap_or_default();
        let version = OvfVersion::from_namespace(&namespace)
            .ok_or_else(|| Error::ovf(format!("unrecognized OVF namespace '{}'", namespace)))?;
        if document.root.name.local != "Envelope" {
            return Err(Error::ovf(format!(
                "root element is '{}', expected Envelope",
                document.root.name.local
            )));
        }
        for (prefix, uri) in STANDARD_PREFIXES {
            document.declare_prefix(prefix, uri);
        }
        let names = NameResolver::new(version);
        info!(path = %path.display(), version = %version, "loading OVF package");

        let declared = ProfileSet::from_names(&profile_ids(&document.root, names));
        let system = find_virtual_system(&document.root, names)?;
        let section = find_section(system, names, Section::VirtualHardware)
            .ok_or_else(|| Error::ovf("virtual system has no VirtualHardwareSection"))?;
        let hardware = HardwareCollection::from_section(section, names, declared)?;

        let base = parent_dir(path);
        let href_attr = names.attr(Attr::Href);
        let mut files = Vec::new();
        for element in file_elements(&document.root, names) {
            let href = element
                .attr(&href_attr)
                .ok_or_else(|| Error::ovf("File element without ovf:href"))?;
            if ova::check_member_path(href).is_err() {
                return Err(Error::ovf(format!(
                    "File href '{}' points outside the package",
                    href
                )));
            }
            let reference = if source_is_archive {
                FileReference::in_archive(href, path, href)
            } else {
                FileReference::from_path(href, base.join(href))
            };
            if reference.exists() {
                debug!(file = href, backing = %reference.backing(), "found referenced file");
                files.push(reference);
            } else {
                warn!(file = href, "referenced file is missing; it will be dropped from the descriptor");
            }
        }

        let product_class = options
            .product_class
            .clone()
            .or_else(|| product::product_class(&document.root, names));
        let platform = platform_for_product_class(product_class.as_deref());

        let mut ovf = Self {
            source: path.to_path_buf(),
            source_is_archive,
            options,
            document,
            names,
            hardware,
            files,
            manifest_report: None,
            certificate: package.certificate,
            platform,
            converter: None,
        };

        match (&package.manifest, ovf.options.verify_manifest) {
            (Some(text), true) => ovf.verify_manifest(text, &package.descriptor, &package.descriptor_name)?,
            (Some(_), false) => debug!("manifest verification disabled"),
            (None, _) => debug!("package has no manifest"),
        }

        info!(
            items = ovf.hardware.len(),
            files = ovf.files.len(),
            profiles = ovf.hardware.declared_profiles().len(),
            "loaded OVF package"
        );
        Ok(ovf)
    }

    fn verify_manifest(&mut self, text: &str, descriptor: &[u8], descriptor_name: &str) -> Result<()> {
        let (manifest, invalid) = Manifest::parse_lenient(text);
        for line in &invalid {
            warn!(line = %line, "ignoring unreadable manifest line");
        }
        let mut listed = vec![descriptor_name.to_string()];
        listed.extend(self.files.iter().map(|f| f.name().to_string()));
        let listed: Vec<&str> = listed.iter().map(String::as_str).collect();

        let files = &mut self.files;
        let report = manifest.verify(&listed, |name, algorithm| {
            if name == descriptor_name {
                return Ok(algorithm.digest(descriptor));
            }
            files
                .iter_mut()
                .find(|f| f.name() == name)
                .ok_or_else(|| Error::not_found(format!("no file named {}", name)))?
                .checksum(algorithm)
        })?;
        let report = ManifestReport { invalid, ..report };

        if report.is_clean() {
            debug!("manifest matches package contents");
        } else if self.options.fail_on_manifest_mismatch {
            return Err(Error::manifest(report.to_string()));
        } else {
            warn!(%report, "manifest does not match package contents");
        }
        self.manifest_report = Some(report);
        Ok(())
    }

    /// Write the package to `path`: an archive for `.ova`, otherwise a
    /// descriptor with its manifest and files beside it.
    pub fn write(&mut self, path: &Path) -> Result<()> {
        self.write_with_progress(path, &|_| {})
    }

    /// [`Ovf::write`], reporting each phase to `progress`.
    pub fn write_with_progress(&mut self, path: &Path, progress: ProgressCallback<'_>) -> Result<()> {
        let to_archive = is_archive_path(path);
        // Kept alive until the archive is written.
        let _scratch = if self.source_is_archive && same_file(&self.source, path) {
            progress(&WritePhase::Staging);
            Some(self.stage_archive_members()?)
        } else {
            None
        };

        progress(&WritePhase::Descriptor);
        self.refresh_descriptor()?;
        let descriptor = self.document.to_bytes()?;

        progress(&WritePhase::Manifest);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| Error::invalid_value("output path", format!("'{}' has no file name", path.display())))?;
        let descriptor_name = if to_archive {
            format!("{}.ovf", stem)
        } else {
            path.file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.ovf", stem))
        };
        let manifest = self.build_manifest(&descriptor_name, &descriptor)?;

        let certificate = if to_archive {
            self.write_archive(path, &stem, &descriptor_name, &descriptor, &manifest, progress)?
        } else {
            self.write_directory(path, &stem, &descriptor, &manifest, progress)?
        };
        self.rebase(path, to_archive, certificate);
        progress(&WritePhase::Done);
        info!(path = %path.display(), files = self.files.len(), "wrote OVF package");
        Ok(())
    }

    fn stage_archive_members(&mut self) -> Result<TempDir> {
        let scratch = match &self.options.scratch_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| Error::io(e, dir))?;
                TempDir::new_in(dir).map_err(|e| Error::io(e, dir))?
            }
            None => TempDir::new().map_err(Error::io_simple)?,
        };
        let mut staged = 0;
        for file in &mut self.files {
            if matches!(file.backing(), Backing::Archive { .. }) {
                let copy = file.copy_to(scratch.path())?;
                *file = FileReference::from_path(file.name(), copy);
                staged += 1;
            }
        }
        if let Some(cert) = &mut self.certificate {
            if matches!(cert.backing(), Backing::Archive { .. }) {
                let copy = cert.copy_to(scratch.path())?;
                *cert = FileReference::from_path(cert.name(), copy);
                staged += 1;
            }
        }
        info!(staged, dir = %scratch.path().display(), "staged archive members before overwriting the archive");
        Ok(scratch)
    }

    /// Bring the tree in line with the hardware model and the live files.
    fn refresh_descriptor(&mut self) -> Result<()> {
        let names = self.names;
        let section = hardware_section_mut(&mut self.document.root, names)?;
        self.hardware.update_xml(section);
        self.sync_references()?;
        self.refresh_disk_capacities();
        self.prune_networks();
        Ok(())
    }

    /// Drop File entries whose file is gone and correct recorded sizes.
    fn sync_references(&mut self) -> Result<()> {
        let names = self.names;
        let href_attr = names.attr(Attr::Href);
        let id_attr = names.attr(Attr::Id);
        let size_attr = names.attr(Attr::Size);
        let file_tag = names.tag(Tag::File);
        let files = &self.files;

        let mut dropped = Vec::new();
        if let Some(references) = self.document.root.find_child_mut(&names.tag(Tag::References)) {
            references.remove_children(|e| {
                if e.name != file_tag {
                    return false;
                }
                let href = e.attr(&href_attr).unwrap_or_default();
                if files.iter().any(|f| f.name() == href) {
                    return false;
                }
                warn!(file = href, "removing reference to missing file");
                dropped.push(e.attr(&id_attr).unwrap_or_default().to_string());
                true
            });

            for element in references.child_elements_mut().filter(|e| e.name == file_tag) {
                let href = element.attr(&href_attr).unwrap_or_default().to_string();
                let Some(file) = files.iter().find(|f| f.name() == href) else {
                    continue;
                };
                let actual = file.size()?;
                match element.attr(&size_attr).map(|s| s.trim().parse::<u64>()) {
                    Some(Ok(recorded)) if recorded == actual => continue,
                    Some(Ok(recorded)) => {
                        warn!(file = %href, recorded, actual, "file size in descriptor is wrong; correcting it")
                    }
                    _ => debug!(file = %href, actual, "recording file size"),
                }
                element.set_attr(size_attr.clone(), actual.to_string());
            }
        }

        if !dropped.is_empty() {
            let file_ref = names.attr(Attr::FileRef);
            let disk_id = names.attr(Attr::DiskId);
            if let Some(section) = find_section_mut(&mut self.document.root, names, Section::Disk) {
                for element in section.child_elements_mut() {
                    if element.attr(&file_ref).map_or(false, |r| dropped.iter().any(|d| d == r)) {
                        warn!(
                            disk = element.attr(&disk_id).unwrap_or_default(),
                            "disk's file is missing; removing its file reference"
                        );
                        element.remove_attr(&file_ref);
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-derive Disk capacities from the images where they can be probed.
    fn refresh_disk_capacities(&mut self) {
        let names = self.names;
        let hrefs = file_hrefs_by_id(&self.document.root, names);
        let file_ref = names.attr(Attr::FileRef);
        let disk_id = names.attr(Attr::DiskId);
        let capacity_attr = names.attr(Attr::Capacity);
        let units_attr = names.attr(Attr::CapacityUnits);
        let disk_tag = names.tag(Tag::Disk);
        let files = &self.files;

        let Some(section) = find_section_mut(&mut self.document.root, names, Section::Disk) else {
            return;
        };
        for element in section.child_elements_mut().filter(|e| e.name == disk_tag) {
            let id = element.attr(&disk_id).unwrap_or_default().to_string();
            let Some(file) = element
                .attr(&file_ref)
                .and_then(|r| hrefs.get(r))
                .and_then(|href| files.iter().find(|f| f.name() == href))
            else {
                continue;
            };
            let info = match disk::probe_file(file) {
                Ok(info) => info,
                Err(e) => {
                    debug!(disk = %id, error = %e, "cannot probe disk image; keeping recorded capacity");
                    continue;
                }
            };
            let units = element.attr(&units_attr).unwrap_or("byte").to_string();
            let Some(factor) = allocation_units_factor(&units) else {
                warn!(disk = %id, units = %units, "unrecognized capacity units; keeping recorded capacity");
                continue;
            };
            match element.attr(&capacity_attr).map(|c| c.trim().parse::<u64>()) {
                Some(Ok(recorded)) if recorded.saturating_mul(factor) == info.capacity => continue,
                Some(Ok(recorded)) => warn!(
                    disk = %id,
                    recorded = recorded.saturating_mul(factor),
                    actual = info.capacity,
                    "disk capacity in descriptor is wrong; correcting it"
                ),
                Some(Err(_)) => {
                    debug!(disk = %id, "capacity is not a literal; keeping it");
                    continue;
                }
                None => {}
            }
            if info.capacity % factor == 0 {
                element.set_attr(capacity_attr.clone(), (info.capacity / factor).to_string());
            } else {
                element.set_attr(capacity_attr.clone(), info.capacity.to_string());
                element.remove_attr(&units_attr);
            }
        }
    }

    /// Remove networks no device connects to.
    fn prune_networks(&mut self) {
        let names = self.names;
        let connected: BTreeSet<String> = self
            .hardware
            .iter()
            .flat_map(|item| {
                let key = item.key(ItemField::Connection);
                item.values(&key)
                    .into_iter()
                    .map(|(value, _)| value.as_text())
                    .collect::<Vec<_>>()
            })
            .collect();
        let name_attr = names.attr(Attr::NetworkName);
        let network_tag = names.tag(Tag::Network);

        let Some(section) = find_section_mut(&mut self.document.root, names, Section::Network) else {
            return;
        };
        section.remove_children(|e| {
            if e.name != network_tag {
                return false;
            }
            let name = e.attr(&name_attr).unwrap_or_default();
            let unused = !connected.contains(name);
            if unused {
                warn!(network = name, "network is not used by any device; removing it");
            }
            unused
        });
    }

    fn build_manifest(&mut self, descriptor_name: &str, descriptor: &[u8]) -> Result<Manifest> {
        let algorithm = ChecksumAlgorithm::for_version(self.names.version());
        let mut manifest = Manifest::new();
        manifest.add(algorithm, descriptor_name, algorithm.digest(descriptor));
        for file in &mut self.files {
            let digest = file.checksum(algorithm)?;
            manifest.add(algorithm, file.name(), digest);
        }
        Ok(manifest)
    }

    fn write_archive(
        &self,
        path: &Path,
        stem: &str,
        descriptor_name: &str,
        descriptor: &[u8],
        manifest: &Manifest,
        progress: ProgressCallback<'_>,
    ) -> Result<Option<String>> {
        // The source stays intact until the new archive is complete.
        let dir = parent_dir(path);
        fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir))?;
        let temp = NamedTempFile::new_in(&dir).map_err(|e| Error::io(e, &dir))?;
        if let Ok(existing) = fs::metadata(path) {
            temp.as_file()
                .set_permissions(existing.permissions())
                .map_err(|e| Error::io(e, temp.path()))?;
        }

        let mut writer = OvaWriter::new(BufWriter::new(temp))?;
        writer.add_file(descriptor_name, descriptor)?;
        writer.add_file(&format!("{}.mf", stem), manifest.to_string().as_bytes())?;
        let certificate = match self.certificate_bytes() {
            Some(data) => {
                let name = format!("{}.cert", stem);
                writer.add_file(&name, &data)?;
                Some(name)
            }
            None => None,
        };
        for file in &self.files {
            progress(&WritePhase::File(file.name().to_string()));
            writer.add_reference(file)?;
        }
        let temp = writer
            .finish()?
            .into_inner()
            .map_err(|e| Error::io(e.into_error(), path))?;
        temp.persist(path).map_err(|e| Error::io(e.error, path))?;
        Ok(certificate)
    }

    /// Contents of the source certificate, or `None` with a warning when
    /// it cannot be read.
    fn certificate_bytes(&self) -> Option<Vec<u8>> {
        let cert = self.certificate.as_ref()?;
        match cert.read_all() {
            Ok(data) => {
                warn!(
                    certificate = cert.name(),
                    "carrying over the source certificate; it no longer matches the edited manifest"
                );
                Some(data)
            }
            Err(e) => {
                warn!(certificate = cert.name(), error = %e, "cannot read the source certificate; leaving it out");
                None
            }
        }
    }

    fn write_directory(
        &self,
        path: &Path,
        stem: &str,
        descriptor: &[u8],
        manifest: &Manifest,
        progress: ProgressCallback<'_>,
    ) -> Result<Option<String>> {
        let dir = parent_dir(path);
        fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir))?;
        fs::write(path, descriptor).map_err(|e| Error::io(e, path))?;
        let manifest_path = dir.join(format!("{}.mf", stem));
        fs::write(&manifest_path, manifest.to_string()).map_err(|e| Error::io(e, &manifest_path))?;
        let certificate = match self.certificate_bytes() {
            Some(data) => {
                let name = format!("{}.cert", stem);
                let cert_path = dir.join(&name);
                fs::write(&cert_path, data).map_err(|e| Error::io(e, &cert_path))?;
                Some(name)
            }
            None => None,
        };
        for file in &self.files {
            progress(&WritePhase::File(file.name().to_string()));
            let target = dir.join(file.name());
            if file.path().map_or(false, |p| same_file(p, &target)) {
                debug!(file = file.name(), "already in place");
                continue;
            }
            file.copy_to(&dir)?;
        }
        Ok(certificate)
    }

    /// Point every file at its copy in the package just written.
    fn rebase(&mut self, path: &Path, archive: bool, certificate: Option<String>) {
        let dir = parent_dir(path);
        for file in &mut self.files {
            *file = if archive {
                FileReference::in_archive(file.name(), path, file.name())
            } else {
                FileReference::from_path(file.name(), dir.join(file.name()))
            };
        }
        self.source = path.to_path_buf();
        self.source_is_archive = archive;
        self.certificate = certificate.map(|name| {
            if archive {
                FileReference::in_archive(name.as_str(), path, &name)
            } else {
                FileReference::from_path(name.as_str(), dir.join(&name))
            }
        });
    }

    /// Name of the package certificate, if the package is signed.
    pub fn certificate(&self) -> Option<&str> {
        self.certificate.as_ref().map(FileReference::name)
    }

    pub fn version(&self) -> OvfVersion {
        self.names.version()
    }

    pub fn names(&self) -> NameResolver {
        self.names
    }

    /// Where the package was loaded from, or last written to.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn hardware(&self) -> &HardwareCollection {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut HardwareCollection {
        &mut self.hardware
    }

    /// Referenced files that exist, in descriptor order.
    pub fn files(&self) -> &[FileReference] {
        &self.files
    }

    /// Result of manifest verification at load, if it ran.
    pub fn manifest_report(&self) -> Option<&ManifestReport> {
        self.manifest_report.as_ref()
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    pub fn set_platform(&mut self, platform: Box<dyn Platform>) {
        self.platform = platform;
    }

    /// Converter used by [`Ovf::add_disk`] for images that are not
    /// stream-optimized VMDKs.
    pub fn set_disk_converter(&mut self, converter: Box<dyn DiskConverter>) {
        self.converter = Some(converter);
    }

    /// Get or create a section, placed where the schema expects it.
    pub(crate) fn ensure_section(&mut self, section: Section) -> Result<&mut Element> {
        let names = self.names;
        let prefix = self
            .document
            .prefix_for(names.ovf_ns())
            .unwrap_or("ovf")
            .to_string();
        let envelope_level = is_envelope_section(section);
        let parent = if envelope_level {
            &mut self.document.root
        } else {
            find_virtual_system_mut(&mut self.document.root, names)?
        };

        let index = match parent.position_of(|e| names.is_section(e, section)) {
            Some(index) => index,
            None => {
                let wire = names.section(section);
                let mut element = Element::new(wire.element);
                if let Some(xsi_type) = wire.xsi_type {
                    element.set_attr(names.xsi_type(), format!("{}:{}", prefix, xsi_type));
                }
                element.push_child(Element::new(names.tag(Tag::Info)).with_text(section_info(section)));
                let index = if envelope_level {
                    parent
                        .position_of(|e| is_content(e, names))
                        .unwrap_or(parent.children.len())
                } else {
                    parent.children.len()
                };
                parent.insert_child(index, element);
                debug!(section = ?section, "created section");
                index
            }
        };
        parent
            .element_at_mut(index)
            .ok_or_else(|| Error::ovf(format!("lost track of {:?} section", section)))
    }

    pub(crate) fn section(&self, section: Section) -> Option<&Element> {
        if is_envelope_section(section) {
            find_section(&self.document.root, self.names, section)
        } else {
            find_virtual_system(&self.document.root, self.names)
                .ok()
                .and_then(|system| find_section(system, self.names, section))
        }
    }

    pub(crate) fn section_mut(&mut self, section: Section) -> Option<&mut Element> {
        let names = self.names;
        if is_envelope_section(section) {
            find_section_mut(&mut self.document.root, names, section)
        } else {
            find_virtual_system_mut(&mut self.document.root, names)
                .ok()
                .and_then(|system| find_section_mut(system, names, section))
        }
    }

    /// Remove a section outright.
    pub(crate) fn remove_section(&mut self, section: Section) -> bool {
        let names = self.names;
        let parent = if is_envelope_section(section) {
            Some(&mut self.document.root)
        } else {
            find_virtual_system_mut(&mut self.document.root, names).ok()
        };
        parent.map_or(false, |p| p.remove_children(|e| names.is_section(e, section)) > 0)
    }
}

/// Byte multiplier of a capacity or memory unit string such as
/// `byte * 2^30` or `MegaBytes`.
pub fn allocation_units_factor(units: &str) -> Option<u64> {
    let compact: String = units
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    match compact.as_str() {
        "byte" | "bytes" => Some(1),
        "kilobytes" | "kb" => Some(1 << 10),
        "megabytes" | "mb" => Some(1 << 20),
        "gigabytes" | "gb" => Some(1 << 30),
        "terabytes" | "tb" => Some(1 << 40),
        other => {
            let (base, exponent) = other.strip_prefix("byte*")?.split_once('^')?;
            base.parse::<u64>().ok()?.checked_pow(exponent.parse().ok()?)
        }
    }
}

fn is_archive_path(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("ova"))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// True when both paths name the same existing file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn read_archive(path: &Path) -> Result<Package> {
    let members = ova::list_members(path)?;
    let descriptor_name = ova::descriptor_member(&members)?.name.clone();
    let descriptor = ova::read_member(path, &descriptor_name)?;
    let manifest = match members
        .iter()
        .find(|m| m.name.to_ascii_lowercase().ends_with(".mf"))
    {
        Some(member) => Some(String::from_utf8_lossy(&ova::read_member(path, &member.name)?).into_owned()),
        None => None,
    };
    let certificate = members
        .iter()
        .find(|m| m.name.to_ascii_lowercase().ends_with(".cert"))
        .map(|m| FileReference::in_archive(m.name.as_str(), path, &m.name));
    debug!(members = members.len(), descriptor = %descriptor_name, "read archive index");
    Ok(Package {
        descriptor_name,
        descriptor,
        manifest,
        certificate,
    })
}

fn read_descriptor(path: &Path) -> Result<Package> {
    let descriptor = fs::read(path).map_err(|e| Error::io(e, path))?;
    let descriptor_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let manifest_path = path.with_extension("mf");
    let manifest = if manifest_path.exists() {
        Some(fs::read_to_string(&manifest_path).map_err(|e| Error::io(e, &manifest_path))?)
    } else {
        None
    };
    Ok(Package {
        descriptor_name,
        descriptor,
        manifest,
        certificate: Some(path.with_extension("cert"))
            .filter(|cert| cert.exists())
            .and_then(|cert| {
                let name = cert.file_name()?.to_string_lossy().into_owned();
                Some(FileReference::from_path(name, cert))
            }),
    })
}

/// Declared configuration ids, the default one first.
fn profile_ids(root: &Element, names: NameResolver) -> Vec<String> {
    let Some(section) = find_section(root, names, Section::DeploymentOption) else {
        return Vec::new();
    };
    let id_attr = names.attr(Attr::Id);
    let default_attr = names.attr(Attr::Default);
    let tag = names.tag(Tag::Configuration);
    let mut ids = Vec::new();
    for config in section.find_children(&tag) {
        let Some(id) = config.attr(&id_attr) else {
            continue;
        };
        let is_default = config
            .attr(&default_attr)
            .map_or(false, |d| d.trim().eq_ignore_ascii_case("true"));
        if is_default {
            ids.insert(0, id.to_string());
        } else {
            ids.push(id.to_string());
        }
    }
    ids
}

fn file_elements(root: &Element, names: NameResolver) -> Vec<&Element> {
    let file_tag = names.tag(Tag::File);
    root.find_child(&names.tag(Tag::References))
        .map(|refs| refs.child_elements().filter(|e| e.name == file_tag).collect())
        .unwrap_or_default()
}

fn file_hrefs_by_id(root: &Element, names: NameResolver) -> HashMap<String, String> {
    let id_attr = names.attr(Attr::Id);
    let href_attr = names.attr(Attr::Href);
    file_elements(root, names)
        .into_iter()
        .filter_map(|e| Some((e.attr(&id_attr)?.to_string(), e.attr(&href_attr)?.to_string())))
        .collect()
}

fn is_envelope_section(section: Section) -> bool {
    matches!(section, Section::Disk | Section::Network | Section::DeploymentOption)
}

fn is_content(element: &Element, names: NameResolver) -> bool {
    element.name == names.tag(Tag::VirtualSystem) || element.name == names.tag(Tag::VirtualSystemCollection)
}

fn section_info(section: Section) -> &'static str {
    match section {
        Section::Disk => "Virtual disk information",
        Section::Network => "The list of logical networks",
        Section::DeploymentOption => "Configuration profiles",
        Section::VirtualHardware => "Virtual hardware requirements",
        Section::Product => "Product information",
        Section::Annotation => "An annotation on this virtual machine",
        Section::Eula => "End-user license agreement",
        Section::OperatingSystem => "The kind of installed guest operating system",
    }
}

fn find_virtual_system(root: &Element, names: NameResolver) -> Result<&Element> {
    root.child_elements()
        .find(|e| names.is_virtual_system(e))
        .ok_or_else(|| Error::ovf("descriptor has no VirtualSystem"))
}

fn find_virtual_system_mut(root: &mut Element, names: NameResolver) -> Result<&mut Element> {
    root.child_elements_mut()
        .find(|e| names.is_virtual_system(e))
        .ok_or_else(|| Error::ovf("descriptor has no VirtualSystem"))
}

fn find_section(parent: &Element, names: NameResolver, section: Section) -> Option<&Element> {
    parent.child_elements().find(|e| names.is_section(e, section))
}

fn find_section_mut(parent: &mut Element, names: NameResolver, section: Section) -> Option<&mut Element> {
    if is_envelope_section(section) || names.is_virtual_system(parent) {
        return parent.child_elements_mut().find(|e| names.is_section(e, section));
    }
    let system = find_virtual_system_mut(parent, names).ok()?;
    system.child_elements_mut().find(|e| names.is_section(e, section))
}

fn hardware_section_mut(root: &mut Element, names: NameResolver) -> Result<&mut Element> {
    find_virtual_system_mut(root, names)?
        .child_elements_mut()
        .find(|e| names.is_section(e, Section::VirtualHardware))
        .ok_or_else(|| Error::ovf("virtual system has no VirtualHardwareSection"))
}
