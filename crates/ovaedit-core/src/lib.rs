//! OVAEdit Core Library
//!
//! This crate loads, edits and writes OVF packages: a descriptor plus the
//! disk images and other files it references, either as loose files or as
//! a single `.ova` TAR archive.
//!
//! # Overview
//!
//! Virtual hardware in an OVF descriptor is scoped by configuration
//! profiles: one `Item` element may apply to every profile or only to some.
//! [`HardwareItem`] keeps each property as a map from value to the set of
//! profiles holding it, and regenerates the minimal set of `Item` elements
//! when the package is written. The main entry point is [`Ovf`].
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`names`] - Version-dependent element and attribute names
//! - [`profile`] - Configuration profiles and profile sets
//! - [`xml`] - Namespace-aware XML document model
//! - [`item`] - Profile-scoped hardware items
//! - [`hardware`] - The collection of hardware items of a virtual system
//! - [`platform`] - Product-specific hardware validation
//! - [`file_ref`] - Files on disk or inside an archive
//! - [`manifest`] - Checksum manifests
//! - [`ova`] - OVA archive reading, writing and extraction
//! - [`disk`] - Disk image format probing
//! - [`vmdk`] - VMDK header and descriptor parsing
//! - [`options`] - Load and write options
//! - [`ovf`] - The package container and its editing operations
//!
//! # Quick Start
//!
//! ```no_run
//! use ovaedit_core::{Ovf, OvfOptions};
//! use std::path::Path;
//!
//! let mut ovf = Ovf::load(Path::new("/path/to/appliance.ova"), OvfOptions::default()).unwrap();
//! ovf.set_memory(4096, &[]).unwrap();
//! ovf.set_nic_count(2, &[]).unwrap();
//! ovf.write(Path::new("/path/to/edited.ova")).unwrap();
//! ```

pub mod disk;
pub mod error;
pub mod file_ref;
pub mod hardware;
pub mod item;
pub mod manifest;
pub mod names;
pub mod options;
pub mod ova;
pub mod ovf;
pub mod platform;
pub mod profile;
pub mod vmdk;
pub mod xml;

pub use error::{Error, Result};

pub use disk::{DiskConverter, DiskFormat, DiskInfo};
pub use file_ref::FileReference;
pub use hardware::HardwareCollection;
pub use item::{HardwareItem, PropertyKey, PropertyValue};
pub use manifest::{ChecksumAlgorithm, Manifest, ManifestReport};
pub use names::{ItemField, NameResolver, OvfVersion, ResourceKind};
pub use options::{OvfOptions, ProgressCallback, WritePhase};
pub use ovf::{AddDiskOptions, DiskAttachment, NetworkInfo, Ovf, ProductField, ProductInfo, ProductProperty};
pub use platform::{GenericPlatform, Platform};
pub use profile::{Profile, ProfileSet};
