//! Per-product hardware validation policy.
//!
//! Only the generic policy ships with the library. Product-specific limits
//! plug in by implementing [`Platform`].

use tracing::debug;

use crate::error::{Error, Result};

/// NIC device types every hypervisor in common use understands.
const KNOWN_NIC_TYPES: &[&str] = &["E1000", "E1000e", "PCNet32", "virtio", "VMXNET3"];

/// Hardware limits and naming conventions of a guest product.
pub trait Platform {
    /// Human-readable platform name.
    fn name(&self) -> &str;

    fn validate_cpu_count(&self, count: u32) -> Result<()>;

    /// Memory is given in MiB.
    fn validate_memory_amount(&self, megabytes: u64) -> Result<()>;

    fn validate_nic_count(&self, count: usize) -> Result<()>;

    fn validate_nic_types(&self, types: &[String]) -> Result<()>;

    /// Display name of the `nic_number`-th NIC, counting from 1.
    fn guess_nic_name(&self, nic_number: usize) -> String {
        format!("Ethernet{}", nic_number)
    }
}

/// Platform with only the limits implied by the descriptor format.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericPlatform;

impl Platform for GenericPlatform {
    fn name(&self) -> &str {
        "Generic"
    }

    fn validate_cpu_count(&self, count: u32) -> Result<()> {
        if count < 1 {
            return Err(Error::invalid_value("CPU count", "must be at least 1"));
        }
        Ok(())
    }

    fn validate_memory_amount(&self, megabytes: u64) -> Result<()> {
        if megabytes < 1 {
            return Err(Error::invalid_value("memory", "must be at least 1 MiB"));
        }
        Ok(())
    }

    fn validate_nic_count(&self, _count: usize) -> Result<()> {
        Ok(())
    }

    fn validate_nic_types(&self, types: &[String]) -> Result<()> {
        for nic_type in types {
            if !KNOWN_NIC_TYPES.iter().any(|t| t.eq_ignore_ascii_case(nic_type)) {
                return Err(Error::invalid_value(
                    "NIC type",
                    format!("'{}' is not one of {}", nic_type, KNOWN_NIC_TYPES.join(", ")),
                ));
            }
        }
        Ok(())
    }
}

/// Select the platform for a product class string.
pub fn platform_for_product_class(product_class: Option<&str>) -> Box<dyn Platform> {
    if let Some(class) = product_class {
        debug!(product_class = class, "no specific platform registered, using generic");
    }
    Box::new(GenericPlatform)
}

/// Canonical spelling of a NIC type, for use as a ResourceSubType token.
pub fn canonical_nic_type(nic_type: &str) -> String {
    KNOWN_NIC_TYPES
        .iter()
        .find(|t| t.eq_ignore_ascii_case(nic_type))
        .map(|t| t.to_string())
        .unwrap_or_else(|| nic_type.to_string())
}
