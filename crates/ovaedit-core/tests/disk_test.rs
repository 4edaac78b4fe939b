//! Integration tests for adding and removing files, disks and controllers.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use ovaedit_core::disk::{self, DiskConverter, DiskFormat};
use ovaedit_core::{AddDiskOptions, Error, ItemField, Ovf, OvfOptions, ResourceKind};
use tempfile::TempDir;

use common::{iso_image, stream_optimized_vmdk, write_package_dir};

fn load_dir(dir: &TempDir) -> Ovf {
    let descriptor = write_package_dir(dir.path());
    Ovf::load(&descriptor, OvfOptions::default()).unwrap()
}

fn write_image(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

/// Pretends to convert by writing a stream-optimized header next to the input.
struct FakeConverter;

impl DiskConverter for FakeConverter {
    fn convert(&self, image: &Path, target_format: DiskFormat, target_subformat: Option<&str>) -> ovaedit_core::Result<PathBuf> {
        assert_eq!(target_format, DiskFormat::Vmdk);
        assert_eq!(target_subformat, Some("streamOptimized"));
        let out = image.with_extension("vmdk");
        fs::write(&out, stream_optimized_vmdk()).unwrap();
        Ok(out)
    }
}

#[test]
fn test_probe_formats() {
    let dir = TempDir::new().unwrap();
    let vmdk = disk::probe(&write_image(dir.path(), "a.vmdk", &stream_optimized_vmdk())).unwrap();
    assert_eq!(vmdk.format, DiskFormat::Vmdk);
    assert_eq!(vmdk.capacity, 1 << 30);
    assert!(!vmdk.needs_conversion());

    let iso = disk::probe(&write_image(dir.path(), "b.iso", &iso_image())).unwrap();
    assert_eq!(iso.format, DiskFormat::Iso);

    let raw = disk::probe(&write_image(dir.path(), "c.img", &[7u8; 4096])).unwrap();
    assert_eq!(raw.format, DiskFormat::Raw);
    assert_eq!(raw.capacity, 4096);
    assert!(raw.needs_conversion());
}

#[test]
fn test_lookups() {
    let dir = TempDir::new().unwrap();
    let ovf = load_dir(&dir);

    let file = ovf.find_file_by_name("disk.vmdk").unwrap();
    assert_eq!(file.id, "file1");
    assert_eq!(ovf.find_file_by_id("file1").unwrap().href, "disk.vmdk");
    let disk = ovf.find_disk_by_file_id("file1").unwrap();
    assert_eq!(disk.disk_id, "vmdisk1");
    assert_eq!(disk.capacity_bytes(), Some(1 << 30));

    let controller = ovf.find_controller(ResourceKind::Scsi, "0").unwrap().unwrap();
    assert_eq!(controller.instance_id().as_deref(), Some("3"));
    let drive = ovf.find_device_by_address(ResourceKind::Scsi, "0", 0).unwrap().unwrap();
    assert_eq!(drive.instance_id().as_deref(), Some("4"));
    assert!(ovf.find_device_by_address(ResourceKind::Scsi, "0", 1).unwrap().is_none());
    assert!(ovf.find_controller(ResourceKind::Ide, "0").unwrap().is_none());
    assert!(matches!(
        ovf.find_controller(ResourceKind::Cpu, "0"),
        Err(Error::InvalidValue { .. })
    ));
}

#[test]
fn test_add_cdrom_creates_ide_controller() {
    let dir = TempDir::new().unwrap();
    let mut ovf = load_dir(&dir);
    let iso = write_image(dir.path(), "tools.iso", &iso_image());

    let attached = ovf.add_disk(&iso, &AddDiskOptions::default()).unwrap();
    assert_eq!(attached.file_id, "file2");
    assert_eq!(attached.disk_id, None);

    let controller = ovf.find_controller(ResourceKind::Ide, "0").unwrap().unwrap();
    assert_eq!(controller.instance_id(), Some(attached.controller_id.clone()));
    let drive = ovf.find_device_by_address(ResourceKind::Ide, "0", 0).unwrap().unwrap();
    assert_eq!(drive.resource_kind(), Some(ResourceKind::Cdrom));
    assert_eq!(
        drive.get_field(ItemField::HostResource, None).as_deref(),
        Some("ovf:/file/file2")
    );
    // No Disk entry for CD-ROM images.
    assert_eq!(ovf.disk_entries().len(), 1);
}

#[test]
fn test_add_hard_disk_uses_next_free_unit() {
    let dir = TempDir::new().unwrap();
    let mut ovf = load_dir(&dir);
    let image = write_image(dir.path(), "data.vmdk", &stream_optimized_vmdk());

    let attached = ovf
        .add_disk(
            &image,
            &AddDiskOptions {
                name: Some("Data disk".to_string()),
                ..AddDiskOptions::default()
            },
        )
        .unwrap();
    assert_eq!(attached.controller_id, "3");
    assert_eq!(attached.disk_id.as_deref(), Some("vmdisk2"));

    let disk = ovf.find_disk_by_file_id(&attached.file_id).unwrap();
    assert_eq!(disk.capacity.as_deref(), Some("1"));
    assert_eq!(disk.units.as_deref(), Some("byte * 2^30"));
    assert!(disk.format.unwrap().ends_with("#streamOptimized"));

    let drive = ovf.find_device_by_address(ResourceKind::Scsi, "0", 1).unwrap().unwrap();
    assert_eq!(drive.get_field(ItemField::ElementName, None).as_deref(), Some("Data disk"));
    assert_eq!(
        drive.get_field(ItemField::HostResource, None).as_deref(),
        Some("ovf:/disk/vmdisk2")
    );
}

#[test]
fn test_add_same_image_twice_updates_in_place() {
    let dir = TempDir::new().unwrap();
    let mut ovf = load_dir(&dir);
    let image = write_image(dir.path(), "data.vmdk", &stream_optimized_vmdk());

    let first = ovf.add_disk(&image, &AddDiskOptions::default()).unwrap();
    let items = ovf.hardware().len();
    let second = ovf.add_disk(&image, &AddDiskOptions::default()).unwrap();
    assert_eq!(first, second);
    assert_eq!(ovf.hardware().len(), items);
    assert_eq!(ovf.file_entries().len(), 2);
}

#[test]
fn test_explicit_address_conflicts() {
    let dir = TempDir::new().unwrap();
    let mut ovf = load_dir(&dir);
    let image = write_image(dir.path(), "data.vmdk", &stream_optimized_vmdk());

    let taken = AddDiskOptions {
        address: Some("0:0".to_string()),
        ..AddDiskOptions::default()
    };
    assert!(matches!(
        ovf.add_disk(&image, &taken),
        Err(Error::DataConflict { .. })
    ));

    let second_bus = AddDiskOptions {
        address: Some("1:3".to_string()),
        subtype: Some("virtio".to_string()),
        ..AddDiskOptions::default()
    };
    let attached = ovf.add_disk(&image, &second_bus).unwrap();
    let controller = ovf.find_controller(ResourceKind::Scsi, "1").unwrap().unwrap();
    assert_eq!(controller.instance_id(), Some(attached.controller_id));
    assert_eq!(
        controller.get_field(ItemField::ResourceSubType, None).as_deref(),
        Some("virtio")
    );
    assert!(ovf.find_device_by_address(ResourceKind::Scsi, "1", 3).unwrap().is_some());
}

#[test]
fn test_raw_image_is_converted_when_a_converter_is_set() {
    let dir = TempDir::new().unwrap();
    let mut ovf = load_dir(&dir);
    let raw = write_image(dir.path(), "scratch.img", &[0u8; 8192]);

    ovf.set_disk_converter(Box::new(FakeConverter));
    let attached = ovf.add_disk(&raw, &AddDiskOptions::default()).unwrap();
    let file = ovf.find_file_by_id(&attached.file_id).unwrap();
    assert_eq!(file.href, "scratch.vmdk");
}

#[test]
fn test_raw_image_is_embedded_without_a_converter() {
    let dir = TempDir::new().unwrap();
    let mut ovf = load_dir(&dir);
    let raw = write_image(dir.path(), "scratch.img", &[0u8; 8192]);

    let attached = ovf.add_disk(&raw, &AddDiskOptions::default()).unwrap();
    let disk = ovf.find_disk_by_file_id(&attached.file_id).unwrap();
    assert_eq!(disk.capacity.as_deref(), Some("8192"));
    assert_eq!(disk.units, None);
    assert_eq!(disk.format.as_deref(), Some("raw"));
}

#[test]
fn test_remove_file_removes_disk_and_drive() {
    let dir = TempDir::new().unwrap();
    let mut ovf = load_dir(&dir);

    ovf.remove_file("file1").unwrap();
    assert!(ovf.find_file_by_id("file1").is_none());
    assert!(ovf.disk_entries().is_empty());
    assert!(ovf.files().is_empty());
    assert!(ovf.hardware().get("4").is_none());
    assert!(matches!(ovf.remove_file("file1"), Err(Error::NotFound { .. })));
}

#[test]
fn test_add_controller_twice_conflicts() {
    let dir = TempDir::new().unwrap();
    let mut ovf = load_dir(&dir);

    let id = ovf.add_controller(ResourceKind::Sata, None, "0").unwrap();
    assert_eq!(
        ovf.hardware().get(&id).unwrap().get_field(ItemField::ElementName, None).as_deref(),
        Some("SATA Controller 0")
    );
    assert!(matches!(
        ovf.add_controller(ResourceKind::Sata, None, "0"),
        Err(Error::DataConflict { .. })
    ));
}

#[test]
fn test_added_disk_survives_archive_write() {
    let dir = TempDir::new().unwrap();
    let mut ovf = load_dir(&dir);
    let iso = write_image(dir.path(), "tools.iso", &iso_image());
    ovf.add_disk(&iso, &AddDiskOptions::default()).unwrap();

    let out = dir.path().join("with-cd.ova");
    ovf.write(&out).unwrap();

    let reloaded = Ovf::load(&out, OvfOptions::strict()).unwrap();
    assert!(reloaded.find_file_by_name("tools.iso").is_some());
    assert!(reloaded
        .find_device_by_address(ResourceKind::Ide, "0", 0)
        .unwrap()
        .is_some());
    assert_eq!(
        ovaedit_core::ova::read_member(&out, "tools.iso").unwrap(),
        iso_image()
    );
}
