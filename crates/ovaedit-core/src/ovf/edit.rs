//! Profile-aware hardware edits.
//!
//! Every setter takes the profiles to edit; an empty list edits the value
//! shared by all profiles.

use tracing::info;

use crate::error::{Error, Result};
use crate::names::{ItemField, ResourceKind};
use crate::platform::canonical_nic_type;
use crate::profile::{Profile, ProfileSet};

use super::{allocation_units_factor, Ovf};

const MIB: u64 = 1 << 20;

impl Ovf {
    /// Resolve profile names for an edit. Empty means every profile.
    pub(crate) fn profile_scope(&self, profiles: &[&str]) -> Result<Vec<Profile>> {
        if profiles.is_empty() {
            return Ok(Vec::new());
        }
        if !self.version().supports_profiles() {
            return Err(Error::unsupported(format!(
                "OVF {} descriptors have no configuration profiles; cannot edit profiles {}",
                self.version(),
                profiles.join(", ")
            )));
        }
        profiles
            .iter()
            .map(|name| {
                let profile = Profile::named(*name);
                if self.hardware.declared_profiles().contains(&profile) {
                    Ok(profile)
                } else {
                    Err(Error::not_found(format!(
                        "configuration profile '{}' is not declared",
                        name
                    )))
                }
            })
            .collect()
    }

    fn profile_set(&self, profiles: &[&str]) -> Result<Option<ProfileSet>> {
        let scope = self.profile_scope(profiles)?;
        Ok((!scope.is_empty()).then(|| ProfileSet::from_profiles(scope)))
    }

    fn query_scope(&self, profile: Option<&str>) -> Result<Option<ProfileSet>> {
        match profile {
            Some(name) => self.profile_set(&[name]),
            None => Ok(None),
        }
    }

    /// Value of `field` on the single item of `kind`.
    pub fn item_value(&self, kind: ResourceKind, field: ItemField, profile: Option<&str>) -> Result<Option<String>> {
        let scope = self.query_scope(profile)?;
        let item = self.hardware.find_item(Some(kind), &[], scope.as_ref())?;
        Ok(item.and_then(|item| item.get_field(field, scope.as_ref())))
    }

    /// Values of `field` on every item of `kind`, in instance order.
    pub fn item_values(&self, kind: ResourceKind, field: ItemField, profile: Option<&str>) -> Result<Vec<Option<String>>> {
        let scope = self.query_scope(profile)?;
        Ok(self
            .hardware
            .find_all_items(Some(kind), &[], scope.as_ref())
            .into_iter()
            .map(|item| item.get_field(field, scope.as_ref()))
            .collect())
    }

    pub fn set_cpu_count(&mut self, cpus: u32, profiles: &[&str]) -> Result<()> {
        self.platform.validate_cpu_count(cpus)?;
        let scope = self.profile_set(profiles)?;
        self.hardware.set_value_for_all_items(
            ResourceKind::Cpu,
            ItemField::VirtualQuantity,
            &cpus.to_string(),
            scope.as_ref(),
            true,
        )?;
        info!(cpus, profiles = ?profiles, "set CPU count");
        Ok(())
    }

    pub fn cpu_count(&self, profile: Option<&str>) -> Result<Option<u32>> {
        Ok(self
            .item_value(ResourceKind::Cpu, ItemField::VirtualQuantity, profile)?
            .and_then(|v| v.trim().parse().ok()))
    }

    /// Set guest memory, in MiB.
    pub fn set_memory(&mut self, megabytes: u64, profiles: &[&str]) -> Result<()> {
        self.platform.validate_memory_amount(megabytes)?;
        let scope = self.profile_set(profiles)?;
        let units = self.names.memory_units();
        self.hardware.set_value_for_all_items(
            ResourceKind::Memory,
            ItemField::AllocationUnits,
            units,
            scope.as_ref(),
            true,
        )?;
        self.hardware.set_value_for_all_items(
            ResourceKind::Memory,
            ItemField::VirtualQuantity,
            &megabytes.to_string(),
            scope.as_ref(),
            true,
        )?;
        info!(megabytes, profiles = ?profiles, "set memory");
        Ok(())
    }

    /// Guest memory in MiB.
    pub fn memory(&self, profile: Option<&str>) -> Result<Option<u64>> {
        let Some(quantity) = self.item_value(ResourceKind::Memory, ItemField::VirtualQuantity, profile)? else {
            return Ok(None);
        };
        let units = self
            .item_value(ResourceKind::Memory, ItemField::AllocationUnits, profile)?
            .unwrap_or_else(|| "byte * 2^20".to_string());
        let factor = allocation_units_factor(&units)
            .ok_or_else(|| Error::invalid_value("memory units", format!("unrecognized '{}'", units)))?;
        let quantity: u64 = quantity
            .trim()
            .parse()
            .map_err(|_| Error::invalid_value("memory", format!("'{}' is not a number", quantity)))?;
        Ok(Some(quantity.saturating_mul(factor) / MIB))
    }

    pub fn set_nic_count(&mut self, count: usize, profiles: &[&str]) -> Result<()> {
        self.platform.validate_nic_count(count)?;
        let scope = self.profile_scope(profiles)?;
        self.hardware
            .set_item_count_per_profile(ResourceKind::Ethernet, count, &scope, self.platform.as_ref())?;
        info!(count, profiles = ?profiles, "set NIC count");
        Ok(())
    }

    /// Number of NICs in `profile`, or in the default profile.
    pub fn nic_count(&self, profile: Option<&str>) -> Result<usize> {
        let profile = match profile {
            Some(name) => self.profile_scope(&[name])?.remove(0),
            None => Profile::Default,
        };
        Ok(self.hardware.get_item_count(ResourceKind::Ethernet, &profile))
    }

    /// Set the device types every NIC may use, e.g. `["VMXNET3", "E1000"]`.
    pub fn set_nic_types(&mut self, types: &[String], profiles: &[&str]) -> Result<()> {
        self.platform.validate_nic_types(types)?;
        let scope = self.profile_set(profiles)?;
        let subtype: Vec<String> = types.iter().map(|t| canonical_nic_type(t)).collect();
        self.hardware.set_value_for_all_items(
            ResourceKind::Ethernet,
            ItemField::ResourceSubType,
            &subtype.join(" "),
            scope.as_ref(),
            false,
        )?;
        info!(types = ?subtype, profiles = ?profiles, "set NIC types");
        Ok(())
    }

    /// Connect NICs to networks in order. NICs beyond the list reuse the
    /// last network; missing networks are created.
    pub fn set_nic_networks(&mut self, networks: &[String], profiles: &[&str]) -> Result<()> {
        let scope = self.profile_scope(profiles)?;
        for network in networks {
            if !self.networks().iter().any(|n| n.name == *network) {
                self.create_network(network, &format!("Logical network {}", network))?;
            }
        }
        self.hardware.set_item_values_per_profile(
            ResourceKind::Ethernet,
            ItemField::Connection,
            networks,
            &scope,
            networks.last().map(String::as_str),
        )?;
        info!(networks = ?networks, profiles = ?profiles, "set NIC networks");
        Ok(())
    }

    pub fn set_nic_mac_addresses(&mut self, macs: &[String], profiles: &[&str]) -> Result<()> {
        for mac in macs {
            validate_mac(mac)?;
        }
        let scope = self.profile_scope(profiles)?;
        self.hardware
            .set_item_values_per_profile(ResourceKind::Ethernet, ItemField::Address, macs, &scope, None)?;
        info!(macs = ?macs, profiles = ?profiles, "set NIC MAC addresses");
        Ok(())
    }

    pub fn set_nic_names(&mut self, names: &[String], profiles: &[&str]) -> Result<()> {
        let scope = self.profile_scope(profiles)?;
        self.hardware
            .set_item_values_per_profile(ResourceKind::Ethernet, ItemField::ElementName, names, &scope, None)?;
        info!(names = ?names, profiles = ?profiles, "set NIC names");
        Ok(())
    }

    pub fn set_serial_count(&mut self, count: usize, profiles: &[&str]) -> Result<()> {
        let scope = self.profile_scope(profiles)?;
        self.hardware
            .set_item_count_per_profile(ResourceKind::Serial, count, &scope, self.platform.as_ref())?;
        info!(count, profiles = ?profiles, "set serial port count");
        Ok(())
    }

    pub fn serial_count(&self, profile: Option<&str>) -> Result<usize> {
        let profile = match profile {
            Some(name) => self.profile_scope(&[name])?.remove(0),
            None => Profile::Default,
        };
        Ok(self.hardware.get_item_count(ResourceKind::Serial, &profile))
    }

    /// Set serial port connection URIs, such as `telnet://:8001`, in order.
    pub fn set_serial_connectivity(&mut self, connections: &[String], profiles: &[&str]) -> Result<()> {
        let scope = self.profile_scope(profiles)?;
        self.hardware.set_item_values_per_profile(
            ResourceKind::Serial,
            ItemField::Connection,
            connections,
            &scope,
            None,
        )?;
        info!(connections = ?connections, profiles = ?profiles, "set serial connectivity");
        Ok(())
    }

    pub fn set_scsi_subtypes(&mut self, subtypes: &[String], profiles: &[&str]) -> Result<()> {
        self.set_controller_subtypes(ResourceKind::Scsi, subtypes, profiles)
    }

    pub fn set_ide_subtypes(&mut self, subtypes: &[String], profiles: &[&str]) -> Result<()> {
        self.set_controller_subtypes(ResourceKind::Ide, subtypes, profiles)
    }

    fn set_controller_subtypes(&mut self, kind: ResourceKind, subtypes: &[String], profiles: &[&str]) -> Result<()> {
        let scope = self.profile_set(profiles)?;
        self.hardware.set_value_for_all_items(
            kind,
            ItemField::ResourceSubType,
            &subtypes.join(" "),
            scope.as_ref(),
            false,
        )?;
        info!(kind = %kind, subtypes = ?subtypes, profiles = ?profiles, "set controller subtypes");
        Ok(())
    }
}

fn validate_mac(mac: &str) -> Result<()> {
    let groups: Vec<&str> = mac.split(|c| c == ':' || c == '-').collect();
    let valid = groups.len() == 6
        && groups
            .iter()
            .all(|g| g.len() == 2 && g.chars().all(|c| c.is_ascii_hexdigit()));
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_value("MAC address", format!("'{}' is not six hex octets", mac)))
    }
}
