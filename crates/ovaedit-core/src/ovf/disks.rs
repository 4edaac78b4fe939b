//! Files, disks, controllers and the drive items that tie them together.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::disk::{self, DiskFormat};
use crate::error::{Error, Result};
use crate::file_ref::FileReference;
use crate::item::{HardwareItem, PropertyKey};
use crate::names::{Attr, ItemField, NameResolver, ResourceKind, Section, Tag};
use crate::ova;
use crate::profile::ProfileSet;
use crate::vmdk::STREAM_OPTIMIZED;
use crate::xml::Element;

use super::{file_elements, find_section, Ovf};

const DISK_REF: &str = "ovf:/disk/";
const FILE_REF: &str = "ovf:/file/";
const GIB: u64 = 1 << 30;

/// A `File` entry of the References section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub id: String,
    pub href: String,
    pub size: Option<u64>,
}

impl FileEntry {
    fn from_element(element: &Element, names: NameResolver) -> Option<Self> {
        Some(Self {
            id: element.attr(&names.attr(Attr::Id))?.to_string(),
            href: element.attr(&names.attr(Attr::Href))?.to_string(),
            size: element
                .attr(&names.attr(Attr::Size))
                .and_then(|s| s.trim().parse().ok()),
        })
    }
}

/// A `Disk` entry of the DiskSection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    pub disk_id: String,
    pub file_ref: Option<String>,
    pub capacity: Option<String>,
    pub units: Option<String>,
    pub format: Option<String>,
}

impl DiskEntry {
    fn from_element(element: &Element, names: NameResolver) -> Option<Self> {
        let attr = |a: Attr| element.attr(&names.attr(a)).map(str::to_string);
        Some(Self {
            disk_id: attr(Attr::DiskId)?,
            file_ref: attr(Attr::FileRef),
            capacity: attr(Attr::Capacity),
            units: attr(Attr::CapacityUnits),
            format: attr(Attr::Format),
        })
    }

    /// Capacity in bytes, when it is a literal number.
    pub fn capacity_bytes(&self) -> Option<u64> {
        let capacity: u64 = self.capacity.as_deref()?.trim().parse().ok()?;
        let factor = super::allocation_units_factor(self.units.as_deref().unwrap_or("byte"))?;
        capacity.checked_mul(factor)
    }
}

/// How [`Ovf::add_disk`] should attach an image.
#[derive(Debug, Clone, Default)]
pub struct AddDiskOptions {
    /// `Harddisk` or `Cdrom`; guessed from the image when unset.
    pub kind: Option<ResourceKind>,
    pub file_id: Option<String>,
    pub disk_id: Option<String>,
    /// Controller type; IDE for CD-ROMs and SCSI for hard disks when unset.
    pub controller: Option<ResourceKind>,
    /// `controller:unit`, such as `0:1`.
    pub address: Option<String>,
    /// Controller ResourceSubType, such as `lsilogic`.
    pub subtype: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Profiles a newly created drive item belongs to; empty means all.
    pub profiles: Vec<String>,
}

/// Where [`Ovf::add_disk`] put an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskAttachment {
    pub file_id: String,
    pub disk_id: Option<String>,
    pub instance_id: String,
    pub controller_id: String,
}

fn field_key(names: NameResolver, field: ItemField) -> PropertyKey {
    PropertyKey::Field(names.field(field).to_string())
}

fn max_units(kind: ResourceKind) -> u64 {
    match kind {
        ResourceKind::Ide => 2,
        ResourceKind::Scsi => 16,
        _ => 30,
    }
}

fn parse_address(address: &str) -> Result<(String, Option<u64>)> {
    let bad = || Error::invalid_value("disk address", format!("'{}' is not controller:unit", address));
    match address.split_once(':') {
        Some((controller, unit)) => {
            let controller: u64 = controller.trim().parse().map_err(|_| bad())?;
            let unit: u64 = unit.trim().parse().map_err(|_| bad())?;
            Ok((controller.to_string(), Some(unit)))
        }
        None => {
            let controller: u64 = address.trim().parse().map_err(|_| bad())?;
            Ok((controller.to_string(), None))
        }
    }
}

/// Whether any value of the item's HostResource is one of `targets`.
fn references_any(item: &HardwareItem, targets: &[String]) -> bool {
    item.values(&item.key(ItemField::HostResource))
        .iter()
        .any(|(value, _)| targets.contains(&value.as_text()))
}

impl Ovf {
    pub fn file_entries(&self) -> Vec<FileEntry> {
        file_elements(&self.document.root, self.names)
            .into_iter()
            .filter_map(|e| FileEntry::from_element(e, self.names))
            .collect()
    }

    pub fn disk_entries(&self) -> Vec<DiskEntry> {
        let names = self.names;
        let tag = names.tag(Tag::Disk);
        find_section(&self.document.root, names, Section::Disk)
            .map(|section| {
                section
                    .find_children(&tag)
                    .filter_map(|e| DiskEntry::from_element(e, names))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn find_file_by_name(&self, href: &str) -> Option<FileEntry> {
        self.file_entries().into_iter().find(|f| f.href == href)
    }

    pub fn find_file_by_id(&self, id: &str) -> Option<FileEntry> {
        self.file_entries().into_iter().find(|f| f.id == id)
    }

    pub fn find_disk_by_file_id(&self, file_id: &str) -> Option<DiskEntry> {
        self.disk_entries()
            .into_iter()
            .find(|d| d.file_ref.as_deref() == Some(file_id))
    }

    /// The controller of `kind` at bus `address`.
    pub fn find_controller(&self, kind: ResourceKind, address: &str) -> Result<Option<&HardwareItem>> {
        if !kind.is_controller() {
            return Err(Error::invalid_value("controller", format!("{} is not a disk controller", kind)));
        }
        self.hardware
            .find_item(Some(kind), &[(field_key(self.names, ItemField::Address), address)], None)
    }

    /// The device at `unit` on the controller of `kind` at `address`.
    pub fn find_device_by_address(
        &self,
        controller: ResourceKind,
        address: &str,
        unit: u64,
    ) -> Result<Option<&HardwareItem>> {
        let Some(parent) = self.find_controller(controller, address)?.and_then(HardwareItem::instance_id) else {
            return Ok(None);
        };
        let unit = unit.to_string();
        self.hardware.find_item(
            None,
            &[
                (field_key(self.names, ItemField::Parent), parent.as_str()),
                (field_key(self.names, ItemField::AddressOnParent), unit.as_str()),
            ],
            None,
        )
    }

    /// Drive item whose HostResource names the file or its disk.
    pub fn find_drive_for_file(&self, file_id: &str) -> Option<&HardwareItem> {
        let mut targets = vec![format!("{}{}", FILE_REF, file_id)];
        if let Some(disk) = self.find_disk_by_file_id(file_id) {
            targets.push(format!("{}{}", DISK_REF, disk.disk_id));
        }
        self.hardware.iter().find(|item| references_any(item, &targets))
    }

    /// Create a disk controller at bus `address`.
    pub fn add_controller(&mut self, kind: ResourceKind, subtype: Option<&str>, address: &str) -> Result<String> {
        if self.find_controller(kind, address)?.is_some() {
            return Err(Error::data_conflict(format!("a {} controller already exists at address {}", kind, address)));
        }
        let id = self.hardware.new_item(kind, None)?;
        let item = self
            .hardware
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("no hardware item with instance id {}", id)))?;
        item.set_field(ItemField::Address, address, None)?;
        item.set_field(
            ItemField::ElementName,
            &format!("{} Controller {}", kind.as_str().to_ascii_uppercase(), address),
            None,
        )?;
        if let Some(subtype) = subtype {
            item.set_field(ItemField::ResourceSubType, subtype, None)?;
        }
        info!(instance = %id, kind = %kind, address, "created controller");
        Ok(id)
    }

    /// Reference the file at `path`. A file with the same name replaces the
    /// existing entry's contents and keeps its id.
    pub fn add_file(&mut self, path: &Path, file_id: Option<&str>) -> Result<FileEntry> {
        let href = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::invalid_value("file", format!("'{}' has no file name", path.display())))?;
        ova::check_member_path(&href)?;
        let size = fs::metadata(path).map_err(|e| Error::io(e, path))?.len();

        let names = self.names;
        let id_attr = names.attr(Attr::Id);
        let href_attr = names.attr(Attr::Href);
        let size_attr = names.attr(Attr::Size);
        let file_tag = names.tag(Tag::File);
        let existing = self.find_file_by_name(&href);

        if let Some(wanted) = file_id {
            let taken = self.find_file_by_id(wanted).map_or(false, |f| f.href != href);
            if taken {
                return Err(Error::data_conflict(format!("file id '{}' is already used by another file", wanted)));
            }
        }

        let id = match &existing {
            Some(entry) => {
                warn!(file = %href, id = %entry.id, "replacing existing file");
                entry.id.clone()
            }
            None => match file_id {
                Some(id) => id.to_string(),
                None => self.unused_id("file", |ovf, id| ovf.find_file_by_id(id).is_some()),
            },
        };

        let root = &mut self.document.root;
        let references_tag = names.tag(Tag::References);
        if root.find_child(&references_tag).is_none() {
            root.insert_child(0, Element::new(references_tag.clone()));
        }
        let references = root
            .find_child_mut(&references_tag)
            .ok_or_else(|| Error::ovf("lost track of References"))?;
        let current = references
            .child_elements_mut()
            .find(|e| e.name == file_tag && e.attr(&href_attr) == Some(href.as_str()));
        match current {
            Some(element) => {
                element.set_attr(id_attr, id.clone());
                element.set_attr(size_attr, size.to_string());
            }
            None => references.push_child(
                Element::new(file_tag)
                    .with_attr(href_attr, href.clone())
                    .with_attr(id_attr, id.clone())
                    .with_attr(size_attr, size.to_string()),
            ),
        }

        self.files.retain(|f| f.name() != href);
        self.files.push(FileReference::from_path(href.clone(), path));
        info!(file = %href, id = %id, size, "added file");
        Ok(FileEntry {
            id,
            href,
            size: Some(size),
        })
    }

    /// Remove a file along with the disks and drive items that use it.
    pub fn remove_file(&mut self, file_id: &str) -> Result<()> {
        let entry = self
            .find_file_by_id(file_id)
            .ok_or_else(|| Error::not_found(format!("no file with id '{}'", file_id)))?;
        let names = self.names;
        let id_attr = names.attr(Attr::Id);
        let file_ref = names.attr(Attr::FileRef);
        let disk_id_attr = names.attr(Attr::DiskId);

        let mut targets = vec![format!("{}{}", FILE_REF, file_id)];
        if let Some(section) = self.section_mut(Section::Disk) {
            section.remove_children(|e| {
                if e.attr(&file_ref) != Some(file_id) {
                    return false;
                }
                if let Some(disk) = e.attr(&disk_id_attr) {
                    debug!(disk, "removing disk backed by the file");
                    targets.push(format!("{}{}", DISK_REF, disk));
                }
                true
            });
        }

        let drives: Vec<String> = self
            .hardware
            .iter()
            .filter(|item| references_any(item, &targets))
            .filter_map(HardwareItem::instance_id)
            .collect();
        for id in drives {
            self.hardware.delete_item(&id);
        }

        if let Some(references) = self.document.root.find_child_mut(&names.tag(Tag::References)) {
            references.remove_children(|e| e.attr(&id_attr) == Some(file_id));
        }
        self.files.retain(|f| f.name() != entry.href);
        info!(file = %entry.href, id = file_id, "removed file");
        Ok(())
    }

    /// Attach a disk image: File, Disk (for hard disks) and a drive item on
    /// a controller, reusing whatever already exists for the same file.
    pub fn add_disk(&mut self, image: &Path, options: &AddDiskOptions) -> Result<DiskAttachment> {
        let probed = disk::probe(image)?;
        let kind = options.kind.unwrap_or(if probed.format == DiskFormat::Iso {
            ResourceKind::Cdrom
        } else {
            ResourceKind::Harddisk
        });
        if !matches!(kind, ResourceKind::Harddisk | ResourceKind::Cdrom | ResourceKind::Dvd) {
            return Err(Error::invalid_value("disk type", format!("{} is not a drive", kind)));
        }
        let profiles = {
            let names: Vec<&str> = options.profiles.iter().map(String::as_str).collect();
            let scope = self.profile_scope(&names)?;
            (!scope.is_empty()).then(|| ProfileSet::from_profiles(scope))
        };

        let (image, info) = if kind == ResourceKind::Harddisk && probed.needs_conversion() {
            match &self.converter {
                Some(converter) => {
                    info!(image = %image.display(), format = %probed.format, "converting disk image to streamOptimized VMDK");
                    let converted: PathBuf = converter.convert(image, DiskFormat::Vmdk, Some(STREAM_OPTIMIZED))?;
                    let info = disk::probe(&converted)?;
                    (converted, info)
                }
                None => {
                    warn!(
                        image = %image.display(),
                        format = %probed.format,
                        "no disk converter configured; embedding the image as-is"
                    );
                    (image.to_path_buf(), probed)
                }
            }
        } else {
            (image.to_path_buf(), probed)
        };

        let file = self.add_file(&image, options.file_id.as_deref())?;
        let disk_id = if kind == ResourceKind::Harddisk {
            Some(self.upsert_disk(&file.id, options.disk_id.as_deref(), &info)?)
        } else {
            None
        };
        let host_resource = match &disk_id {
            Some(id) => format!("{}{}", DISK_REF, id),
            None => format!("{}{}", FILE_REF, file.id),
        };

        let existing = self.find_drive_for_file(&file.id).and_then(HardwareItem::instance_id);
        let (instance_id, controller_id) = match existing {
            Some(id) => {
                let parent = self
                    .hardware
                    .get(&id)
                    .and_then(|item| item.get_field(ItemField::Parent, None))
                    .unwrap_or_default();
                debug!(instance = %id, "updating existing drive");
                (id, parent)
            }
            None => self.create_drive(kind, options, profiles.as_ref())?,
        };

        let item = self
            .hardware
            .get_mut(&instance_id)
            .ok_or_else(|| Error::not_found(format!("no hardware item with instance id {}", instance_id)))?;
        item.set_field(ItemField::HostResource, &host_resource, None)?;
        let name = options.name.clone().unwrap_or_else(|| match kind {
            ResourceKind::Harddisk => "Hard Disk Drive".to_string(),
            _ => "CD-ROM Drive".to_string(),
        });
        item.set_field(ItemField::ElementName, &name, None)?;
        if let Some(description) = &options.description {
            item.set_field(ItemField::Description, description, None)?;
        }

        if let (Some(subtype), Some(controller)) = (&options.subtype, self.hardware.get_mut(&controller_id)) {
            controller.set_field(ItemField::ResourceSubType, subtype, None)?;
        }

        info!(
            file = %file.href,
            instance = %instance_id,
            controller = %controller_id,
            kind = %kind,
            "attached disk"
        );
        Ok(DiskAttachment {
            file_id: file.id,
            disk_id,
            instance_id,
            controller_id,
        })
    }

    /// Create or refresh the Disk entry for `file_id`; returns its disk id.
    fn upsert_disk(&mut self, file_id: &str, disk_id: Option<&str>, info: &disk::DiskInfo) -> Result<String> {
        let names = self.names;
        let id = match (self.find_disk_by_file_id(file_id), disk_id) {
            (Some(existing), _) => existing.disk_id,
            (None, Some(id)) => {
                if self.disk_entries().iter().any(|d| d.disk_id == id) {
                    return Err(Error::data_conflict(format!("disk id '{}' is already used", id)));
                }
                id.to_string()
            }
            (None, None) => self.unused_id("vmdisk", |ovf, id| ovf.disk_entries().iter().any(|d| d.disk_id == id)),
        };
        let (capacity, units) = if info.capacity % GIB == 0 {
            ((info.capacity / GIB).to_string(), Some("byte * 2^30"))
        } else {
            (info.capacity.to_string(), None)
        };
        let format = info.format.format_uri(info.subformat.as_deref());

        let disk_tag = names.tag(Tag::Disk);
        let disk_id_attr = names.attr(Attr::DiskId);
        let section = self.ensure_section(Section::Disk)?;
        let is_disk = |e: &Element| e.name == disk_tag && e.attr(&disk_id_attr) == Some(id.as_str());
        if !section.child_elements().any(|e| is_disk(e)) {
            section.push_child(Element::new(disk_tag.clone()).with_attr(disk_id_attr.clone(), id.clone()));
        }
        let element = section
            .child_elements_mut()
            .find(|e| is_disk(e))
            .ok_or_else(|| Error::ovf(format!("lost track of disk {}", id)))?;

        element.set_attr(names.attr(Attr::FileRef), file_id);
        element.set_attr(names.attr(Attr::Capacity), capacity.clone());
        match units {
            Some(units) => element.set_attr(names.attr(Attr::CapacityUnits), units),
            None => {
                element.remove_attr(&names.attr(Attr::CapacityUnits));
            }
        }
        element.set_attr(names.attr(Attr::Format), format);
        debug!(disk = %id, file = file_id, capacity = info.capacity, "recorded disk");
        Ok(id)
    }

    /// New drive item on a controller with a free unit.
    fn create_drive(
        &mut self,
        kind: ResourceKind,
        options: &AddDiskOptions,
        profiles: Option<&ProfileSet>,
    ) -> Result<(String, String)> {
        let controller_kind = options.controller.unwrap_or(if kind == ResourceKind::Harddisk {
            ResourceKind::Scsi
        } else {
            ResourceKind::Ide
        });
        if !controller_kind.is_controller() {
            return Err(Error::invalid_value("controller", format!("{} is not a disk controller", controller_kind)));
        }

        let (controller_id, unit) = match options.address.as_deref().map(parse_address).transpose()? {
            Some((address, unit)) => {
                let controller_id = match self.find_controller(controller_kind, &address)?.and_then(HardwareItem::instance_id) {
                    Some(id) => id,
                    None => self.add_controller(controller_kind, options.subtype.as_deref(), &address)?,
                };
                let unit = match unit {
                    Some(unit) => {
                        if self.units_in_use(&controller_id).contains(&unit) {
                            return Err(Error::data_conflict(format!(
                                "{} controller {} already has a device at unit {}",
                                controller_kind, address, unit
                            )));
                        }
                        unit
                    }
                    None => self.free_unit(controller_kind, &controller_id).ok_or_else(|| {
                        Error::unsupported(format!("{} controller {} has no free unit", controller_kind, address))
                    })?,
                };
                (controller_id, unit)
            }
            None => self.any_free_slot(controller_kind, options.subtype.as_deref())?,
        };

        let id = self.hardware.new_item(kind, profiles)?;
        let item = self
            .hardware
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("no hardware item with instance id {}", id)))?;
        item.set_field(ItemField::Parent, &controller_id, None)?;
        item.set_field(ItemField::AddressOnParent, &unit.to_string(), None)?;
        Ok((id, controller_id))
    }

    /// First controller of `kind` with a free unit, creating one if needed.
    fn any_free_slot(&mut self, kind: ResourceKind, subtype: Option<&str>) -> Result<(String, u64)> {
        let controllers: Vec<(String, Option<String>)> = self
            .hardware
            .find_all_items(Some(kind), &[], None)
            .into_iter()
            .filter_map(|c| Some((c.instance_id()?, c.get_field(ItemField::Address, None))))
            .collect();
        for (id, _) in &controllers {
            if let Some(unit) = self.free_unit(kind, id) {
                return Ok((id.clone(), unit));
            }
        }
        let mut address = 0u64;
        while controllers
            .iter()
            .any(|(_, a)| a.as_deref() == Some(address.to_string().as_str()))
        {
            address += 1;
        }
        let id = self.add_controller(kind, subtype, &address.to_string())?;
        Ok((id, 0))
    }

    fn units_in_use(&self, controller_id: &str) -> Vec<u64> {
        let parent = field_key(self.names, ItemField::Parent);
        self.hardware
            .find_all_items(None, &[(parent, controller_id)], None)
            .into_iter()
            .filter_map(|item| item.get_field(ItemField::AddressOnParent, None))
            .filter_map(|a| a.trim().parse().ok())
            .collect()
    }

    fn free_unit(&self, kind: ResourceKind, controller_id: &str) -> Option<u64> {
        let used = self.units_in_use(controller_id);
        // Unit 7 is the SCSI initiator.
        (0..max_units(kind)).find(|u| !used.contains(u) && !(kind == ResourceKind::Scsi && *u == 7))
    }

    fn unused_id(&self, prefix: &str, taken: impl Fn(&Self, &str) -> bool) -> String {
        let mut n = 1;
        loop {
            let candidate = format!("{}{}", prefix, n);
            if !taken(self, &candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}
