//! VMDK metadata probing.
//!
//! Only what the descriptor needs is read: the subformat and the virtual
//! capacity, from either a hosted sparse header or a text descriptor.

pub mod descriptor;
pub mod header;

pub use descriptor::{DescriptorExtent, VmdkDescriptor};
pub use header::{SparseHeader, SECTOR_SIZE, VMDK_MAGIC};

/// Subformat name for stream-optimized VMDKs.
pub const STREAM_OPTIMIZED: &str = "streamOptimized";
