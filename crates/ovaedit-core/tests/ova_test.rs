//! Integration tests for OVA archives.

mod common;

use std::fs;
use std::io::Cursor;

use ovaedit_core::ova::{self, OvaWriter};
use ovaedit_core::{Error, Ovf, OvfOptions};
use tempfile::TempDir;

use common::{stream_optimized_vmdk, write_package_archive, DESCRIPTOR_V1};

#[test]
fn test_ova_tar_structure() {
    let mut writer = OvaWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.add_file("test.ovf", b"<ovf content>").unwrap();
    writer.add_file("test.mf", b"SHA1(test.ovf)= 00\n").unwrap();
    assert_eq!(writer.names(), ["test.ovf", "test.mf"]);
    let data = writer.finish().unwrap().into_inner();

    // First 100 bytes of the TAR header hold the member name.
    let name_end = data[0..100].iter().position(|&b| b == 0).unwrap_or(100);
    assert_eq!(std::str::from_utf8(&data[0..name_end]).unwrap(), "test.ovf");
    assert_eq!(&data[257..262], b"ustar");
    assert_eq!(&data[512..525], b"<ovf content>");
    // Second header follows the first member's padded data block.
    assert_eq!(&data[1024..1031], b"test.mf");
    assert_eq!(data.len() % 512, 0);
}

#[test]
fn test_extract_then_load() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("appliance.ova");
    write_package_archive(&archive);

    let dest = dir.path().join("unpacked");
    let written = ova::extract(&archive, &dest).unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(fs::read_to_string(dest.join("test-vm.ovf")).unwrap(), DESCRIPTOR_V1);
    assert_eq!(fs::read(dest.join("disk.vmdk")).unwrap(), stream_optimized_vmdk());

    let ovf = Ovf::load(&dest.join("test-vm.ovf"), OvfOptions::default()).unwrap();
    assert_eq!(ovf.files().len(), 1);
    assert_eq!(ovf.files()[0].path(), Some(dest.join("disk.vmdk").as_path()));
}

#[test]
fn test_descriptor_must_come_first() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("backwards.ova");
    let mut writer = OvaWriter::new(fs::File::create(&archive).unwrap()).unwrap();
    writer.add_file("disk.vmdk", &stream_optimized_vmdk()).unwrap();
    writer.add_file("test-vm.ovf", DESCRIPTOR_V1.as_bytes()).unwrap();
    writer.finish().unwrap();

    let err = Ovf::load(&archive, OvfOptions::default()).err().unwrap();
    assert!(matches!(err, Error::Ova { .. }), "got {err}");
}

#[test]
fn test_duplicate_members_rejected() {
    let mut writer = OvaWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.add_file("a.ovf", b"x").unwrap();
    assert!(writer.add_file("a.ovf", b"y").is_err());
}

#[test]
fn test_parent_paths_rejected_by_writer() {
    let mut writer = OvaWriter::new(Cursor::new(Vec::new())).unwrap();
    assert!(matches!(
        writer.add_file("../escape.ovf", b"x"),
        Err(Error::Ova { .. })
    ));
}

#[test]
fn test_not_an_archive() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.ova");
    fs::write(&path, b"").unwrap();
    assert!(ova::list_members(&path).is_err());
}
