//! All hardware items of one virtual system.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::item::{HardwareItem, PropertyKey};
use crate::names::{Attr, ItemField, NameResolver, ResourceKind};
use crate::platform::Platform;
use crate::profile::{Profile, ProfileSet};
use crate::xml::Element;

/// Orders numeric instance ids numerically, ahead of any other ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum InstanceKey {
    Numeric(u64, String),
    Text(String),
}

impl InstanceKey {
    fn new(id: &str) -> Self {
        match id.parse::<u64>() {
            Ok(n) => InstanceKey::Numeric(n, id.to_string()),
            Err(_) => InstanceKey::Text(id.to_string()),
        }
    }
}

/// Hardware items keyed by instance id.
#[derive(Debug, Clone)]
pub struct HardwareCollection {
    names: NameResolver,
    items: BTreeMap<InstanceKey, HardwareItem>,
    /// Declared named profiles.
    declared: ProfileSet,
    item_count_at_load: usize,
}

impl HardwareCollection {
    pub fn new(names: NameResolver, declared: ProfileSet) -> Self {
        Self {
            names,
            items: BTreeMap::new(),
            declared,
            item_count_at_load: 0,
        }
    }

    /// Collect the items of a VirtualHardwareSection, merging fragments that
    /// share an instance id.
    pub fn from_section(section: &Element, names: NameResolver, declared: ProfileSet) -> Result<Self> {
        let mut collection = Self::new(names, declared);
        let config_attr = names.attr(Attr::Configuration);
        let mut fragments = 0;

        for child in section.child_elements() {
            let Ok(namespace) = names.item_namespace_for_tag(&child.name) else {
                continue;
            };
            fragments += 1;

            let profiles = ProfileSet::from_config_attr(child.attr(&config_attr));
            if let Some(undeclared) = profiles
                .names()
                .find(|name| !collection.declared.contains(&Profile::named(*name)))
            {
                return Err(Error::ovf(format!(
                    "hardware item references undeclared configuration profile '{}'",
                    undeclared
                )));
            }

            let id_name = crate::xml::QName::new(names.item_field_ns(namespace), names.field(ItemField::InstanceId));
            let id = child
                .child_text(&id_name)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .ok_or_else(|| Error::ovf(format!("hardware item without {}", id_name.local)))?;

            match collection.items.get_mut(&InstanceKey::new(&id)) {
                Some(item) => {
                    debug!(instance = %id, profiles = %profiles, "merging item fragment");
                    item.add_fragment(child)?;
                    item.mark_clean();
                }
                None => {
                    let item = HardwareItem::from_element(names, child)?;
                    collection.items.insert(InstanceKey::new(&id), item);
                }
            }
        }

        collection.item_count_at_load = collection.items.len();
        debug!(
            fragments,
            items = collection.items.len(),
            "loaded virtual hardware"
        );
        Ok(collection)
    }

    pub fn names(&self) -> NameResolver {
        self.names
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in instance-id order.
    pub fn iter(&self) -> impl Iterator<Item = &HardwareItem> {
        self.items.values()
    }

    pub fn get(&self, instance_id: &str) -> Option<&HardwareItem> {
        self.items.get(&InstanceKey::new(instance_id))
    }

    pub fn get_mut(&mut self, instance_id: &str) -> Option<&mut HardwareItem> {
        self.items.get_mut(&InstanceKey::new(instance_id))
    }

    fn get_required_mut(&mut self, instance_id: &str) -> Result<&mut HardwareItem> {
        self.items
            .get_mut(&InstanceKey::new(instance_id))
            .ok_or_else(|| Error::not_found(format!("no hardware item with instance id {}", instance_id)))
    }

    pub fn declared_profiles(&self) -> &ProfileSet {
        &self.declared
    }

    pub fn set_declared_profiles(&mut self, declared: ProfileSet) {
        self.declared = declared;
    }

    /// `Default` followed by every declared profile.
    pub fn all_profiles(&self) -> Vec<Profile> {
        std::iter::once(Profile::Default)
            .chain(self.declared.iter().cloned())
            .collect()
    }

    fn check_declared<'a>(&self, profiles: impl IntoIterator<Item = &'a Profile>) -> Result<()> {
        for profile in profiles {
            if let Profile::Named(name) = profile {
                if !self.declared.contains(profile) {
                    return Err(Error::not_found(format!(
                        "configuration profile '{}' is not declared",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// True if any item changed or items were added or removed since load.
    pub fn is_modified(&self) -> bool {
        self.items.len() != self.item_count_at_load || self.items.values().any(HardwareItem::is_modified)
    }

    /// Smallest integer id at or above `start` not in use.
    pub fn find_unused_instance_id(&self, start: u64) -> String {
        let mut candidate = start;
        while self.items.contains_key(&InstanceKey::new(&candidate.to_string())) {
            candidate += 1;
        }
        candidate.to_string()
    }

    fn insert(&mut self, item: HardwareItem) -> Result<String> {
        let id = item
            .instance_id()
            .ok_or_else(|| Error::ovf("hardware item without an instance id"))?;
        self.items.insert(InstanceKey::new(&id), item);
        Ok(id)
    }

    /// Create an item of `kind` under `profiles` (the default when empty).
    pub fn new_item(&mut self, kind: ResourceKind, profiles: Option<&ProfileSet>) -> Result<String> {
        let profiles = profiles
            .filter(|p| !p.is_empty())
            .cloned()
            .unwrap_or_else(ProfileSet::default_only);
        self.check_declared(&profiles)?;

        let id = self.find_unused_instance_id(1);
        let namespace = self.names.item_namespace_for_kind(kind);
        let mut item = HardwareItem::new(self.names, namespace);
        item.set_field(ItemField::InstanceId, &id, Some(&profiles))?;
        item.set_field(ItemField::ResourceType, kind.code(), Some(&profiles))?;
        item.set_field(ItemField::ElementName, kind.as_str(), Some(&profiles))?;

        info!(instance = %id, kind = %kind, profiles = %profiles, "created hardware item");
        self.insert(item)
    }

    /// Copy `parent_id` into a new item that exists only under `profiles`.
    ///
    /// The copy gets a fresh instance id, the next AddressOnParent, and for
    /// NICs a display name from `platform`.
    pub fn clone_item(&mut self, parent_id: &str, profiles: &ProfileSet, platform: &dyn Platform) -> Result<String> {
        self.check_declared(profiles)?;
        let parent = self
            .get(parent_id)
            .ok_or_else(|| Error::not_found(format!("no hardware item with instance id {}", parent_id)))?;

        let mut item = parent.restricted_to(profiles);
        for profile in profiles {
            if !item.has_profile(profile) {
                item.add_profile(profile, Some(parent))?;
            }
        }

        let id = self.find_unused_instance_id(1);
        item.set_field(ItemField::InstanceId, &id, None)?;
        self.disambiguate(&mut item, platform)?;

        info!(instance = %id, parent = %parent_id, profiles = %profiles, "cloned hardware item");
        self.insert(item)
    }

    fn disambiguate(&self, item: &mut HardwareItem, platform: &dyn Platform) -> Result<()> {
        let kind = item.resource_kind();
        let kind_name = kind.map(|k| k.to_string()).unwrap_or_else(|| "unknown".to_string());

        if !item.values(&item.key(ItemField::Address)).is_empty() {
            return Err(Error::unsupported(format!(
                "cannot pick a unique Address when cloning a {} item",
                kind_name
            )));
        }

        let aop = item.key(ItemField::AddressOnParent);
        let addresses: Vec<String> = item.values(&aop).iter().map(|(v, _)| v.as_text()).collect();
        match addresses.as_slice() {
            [] => {}
            [single] => {
                let address: u64 = single.trim().parse().map_err(|_| {
                    Error::unsupported(format!(
                        "cannot increment non-integer AddressOnParent '{}' of a {} item",
                        single, kind_name
                    ))
                })?;
                item.set_field(ItemField::AddressOnParent, &(address + 1).to_string(), None)?;
            }
            many => {
                return Err(Error::unsupported(format!(
                    "AddressOnParent of the {} item differs between profiles ({}); cannot increment it",
                    kind_name,
                    many.join(", ")
                )))
            }
        }

        if kind == Some(ResourceKind::Ethernet) {
            let nic_number = self.count_of_kind(ResourceKind::Ethernet) + 1;
            item.set_field(ItemField::ElementName, &platform.guess_nic_name(nic_number), None)?;
        }
        Ok(())
    }

    fn count_of_kind(&self, kind: ResourceKind) -> usize {
        self.items
            .values()
            .filter(|item| item.resource_kind() == Some(kind))
            .count()
    }

    pub fn delete_item(&mut self, instance_id: &str) -> Option<HardwareItem> {
        let removed = self.items.remove(&InstanceKey::new(instance_id));
        if removed.is_some() {
            info!(instance = %instance_id, "deleted hardware item");
        }
        removed
    }

    /// Items matching every given condition.
    ///
    /// Property values are compared against the value common to `profiles`
    /// (or to every profile when `None`), and each item must exist in every
    /// requested profile.
    pub fn find_all_items(
        &self,
        kind: Option<ResourceKind>,
        properties: &[(PropertyKey, &str)],
        profiles: Option<&ProfileSet>,
    ) -> Vec<&HardwareItem> {
        self.items
            .values()
            .filter(|item| kind.is_none() || item.resource_kind() == kind)
            .filter(|item| {
                properties
                    .iter()
                    .all(|(key, value)| item.get_text(key, profiles).as_deref() == Some(*value))
            })
            .filter(|item| profiles.map_or(true, |ps| ps.iter().all(|p| item.has_profile(p))))
            .collect()
    }

    /// The single matching item, if any.
    pub fn find_item(
        &self,
        kind: Option<ResourceKind>,
        properties: &[(PropertyKey, &str)],
        profiles: Option<&ProfileSet>,
    ) -> Result<Option<&HardwareItem>> {
        let mut found = self.find_all_items(kind, properties, profiles);
        if found.len() > 1 {
            return Err(Error::ambiguous(format!(
                "found {} {} items matching the query, expected at most one",
                found.len(),
                kind.map(|k| k.to_string()).unwrap_or_else(|| "hardware".to_string())
            )));
        }
        Ok(found.pop())
    }

    fn ids_of_kind(&self, kind: ResourceKind) -> Vec<String> {
        self.items
            .values()
            .filter(|item| item.resource_kind() == Some(kind))
            .filter_map(HardwareItem::instance_id)
            .collect()
    }

    /// Number of `kind` items present in each profile. Default items count
    /// toward every profile.
    pub fn get_item_count_per_profile(&self, kind: ResourceKind, profiles: &[Profile]) -> BTreeMap<Profile, usize> {
        let profiles = if profiles.is_empty() {
            self.all_profiles()
        } else {
            profiles.to_vec()
        };
        profiles
            .into_iter()
            .map(|profile| {
                let count = self
                    .items
                    .values()
                    .filter(|item| item.resource_kind() == Some(kind) && item.has_profile(&profile))
                    .count();
                (profile, count)
            })
            .collect()
    }

    /// Number of `kind` items in one profile.
    pub fn get_item_count(&self, kind: ResourceKind, profile: &Profile) -> usize {
        self.get_item_count_per_profile(kind, std::slice::from_ref(profile))
            .get(profile)
            .copied()
            .unwrap_or(0)
    }

    /// Make each profile have exactly `count` items of `kind`.
    ///
    /// Existing items are scanned in instance-id order: past the count they
    /// are removed from the profile, below it they are widened into it. Any
    /// shortfall is filled by cloning the last item seen, or by creating a
    /// fresh one when none exists.
    pub fn set_item_count_per_profile(
        &mut self,
        kind: ResourceKind,
        count: usize,
        profiles: &[Profile],
        platform: &dyn Platform,
    ) -> Result<()> {
        let profiles = if profiles.is_empty() {
            self.all_profiles()
        } else {
            profiles.to_vec()
        };
        self.check_declared(&profiles)?;

        let split = self.declared.clone();
        let mut seen: BTreeMap<Profile, usize> = profiles.iter().map(|p| (p.clone(), 0)).collect();
        let mut last: Option<String> = None;

        for id in self.ids_of_kind(kind) {
            let item = self.get_required_mut(&id)?;
            for profile in &profiles {
                let n = seen.entry(profile.clone()).or_insert(0);
                if item.has_profile(profile) {
                    if *n >= count {
                        debug!(instance = %id, profile = %profile, "removing surplus item from profile");
                        item.remove_profile(profile, Some(&split))?;
                    } else {
                        *n += 1;
                    }
                } else if *n < count {
                    debug!(instance = %id, profile = %profile, "adding item to profile");
                    item.add_profile(profile, None)?;
                    *n += 1;
                }
            }
            last = Some(id);
        }

        let to_add = seen.values().map(|n| count.saturating_sub(*n)).max().unwrap_or(0);
        for _ in 0..to_add {
            let mut new_profiles = ProfileSet::new();
            for profile in &profiles {
                if let Some(n) = seen.get_mut(profile) {
                    if *n < count {
                        new_profiles.insert(profile.clone());
                        *n += 1;
                    }
                }
            }
            new_profiles.normalize();

            let id = match &last {
                Some(parent) => self.clone_item(parent, &new_profiles, platform)?,
                None => {
                    let id = self.new_item(kind, Some(&new_profiles))?;
                    if kind == ResourceKind::Ethernet {
                        let name = platform.guess_nic_name(self.count_of_kind(kind));
                        self.get_required_mut(&id)?
                            .set_field(ItemField::ElementName, &name, None)?;
                    }
                    id
                }
            };
            last = Some(id);
        }

        let before = self.items.len();
        self.items.retain(|_, item| !item.is_empty());
        if self.items.len() != before {
            info!(removed = before - self.items.len(), kind = %kind, "deleted items left without profiles");
        }
        Ok(())
    }

    /// Set `field` on every item of `kind`.
    ///
    /// With `create_new`, an item is created when none exists.
    pub fn set_value_for_all_items(
        &mut self,
        kind: ResourceKind,
        field: ItemField,
        value: &str,
        profiles: Option<&ProfileSet>,
        create_new: bool,
    ) -> Result<()> {
        let mut ids = self.ids_of_kind(kind);
        if ids.is_empty() {
            if !create_new {
                warn!(kind = %kind, "no items of this kind found, nothing to do");
                return Ok(());
            }
            warn!(kind = %kind, "no items of this kind found, creating one");
            ids.push(self.new_item(kind, profiles)?);
        }
        for id in ids {
            self.get_required_mut(&id)?.set_field(field, value, profiles)?;
        }
        Ok(())
    }

    /// Assign `values` to the items of `kind` in order, one value per item,
    /// separately in each profile the item exists in. Items beyond the list
    /// get `default`, or are left alone if there is none.
    pub fn set_item_values_per_profile(
        &mut self,
        kind: ResourceKind,
        field: ItemField,
        values: &[String],
        profiles: &[Profile],
        default: Option<&str>,
    ) -> Result<()> {
        let profiles = if profiles.is_empty() {
            let mut all: Vec<Profile> = self.declared.iter().cloned().collect();
            all.push(Profile::Default);
            all
        } else {
            profiles.to_vec()
        };

        let mut remaining = values.iter();
        for id in self.ids_of_kind(kind) {
            let Some(value) = remaining.next().map(String::as_str).or(default) else {
                continue;
            };
            let item = self.get_required_mut(&id)?;
            for profile in &profiles {
                if item.has_profile(profile) {
                    let single = ProfileSet::from_profiles([profile.clone()]);
                    item.set_field(field, value, Some(&single))?;
                }
            }
            debug!(instance = %id, field = ?field, value, "updated item");
        }

        let leftover: Vec<&str> = remaining.map(String::as_str).collect();
        if !leftover.is_empty() {
            warn!(kind = %kind, leftover = ?leftover, "not all values were used; there are fewer items than values");
        }
        Ok(())
    }

    /// Rewrite the items of `section` from the collection, if anything
    /// changed since load. Returns whether the section was rewritten.
    pub fn update_xml(&mut self, section: &mut Element) -> bool {
        if !self.is_modified() {
            debug!("virtual hardware unchanged, keeping original items");
            return false;
        }
        let names = self.names;
        let is_item = |e: &Element| names.item_namespace_for_tag(&e.name).is_ok();

        let ovf_ns = names.ovf_ns();
        let index = section.position_of(is_item).unwrap_or_else(|| {
            section
                .children
                .iter()
                .rposition(|node| matches!(node, crate::xml::Node::Element(e) if e.name.namespace.as_deref() == Some(ovf_ns)))
                .map(|i| i + 1)
                .unwrap_or(section.children.len())
        });
        let removed = section.remove_children(is_item);

        let mut fragments = 0;
        for item in self.items.values_mut() {
            for fragment in item.generate_items() {
                section.insert_child(index + fragments, fragment);
                fragments += 1;
            }
            item.mark_clean();
        }
        self.item_count_at_load = self.items.len();

        info!(
            items = self.items.len(),
            fragments,
            replaced = removed,
            "regenerated virtual hardware"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{OvfVersion, OVF_V1_NS, RASD_NS};
    use crate::platform::GenericPlatform;
    use crate::xml::QName;

    fn item(id: &str, kind: &str, extra: &[(&str, &str)], config: Option<&str>) -> Element {
        let mut e = Element::new(QName::new(OVF_V1_NS, "Item"));
        if let Some(config) = config {
            e.set_attr(QName::new(OVF_V1_NS, "configuration"), config);
        }
        e.push_child(Element::new(QName::new(RASD_NS, "InstanceID")).with_text(id));
        e.push_child(Element::new(QName::new(RASD_NS, "ResourceType")).with_text(kind));
        for (name, text) in extra {
            e.push_child(Element::new(QName::new(RASD_NS, name)).with_text(*text));
        }
        e
    }

    fn section(items: Vec<Element>) -> Element {
        let mut s = Element::new(QName::new(OVF_V1_NS, "VirtualHardwareSection"))
            .with_child(Element::new(QName::new(OVF_V1_NS, "Info")).with_text("hw"));
        for i in items {
            s.push_child(i);
        }
        s
    }

    fn declared() -> ProfileSet {
        ProfileSet::from_names(&["A", "B"])
    }

    fn load(items: Vec<Element>) -> HardwareCollection {
        HardwareCollection::from_section(&section(items), NameResolver::new(OvfVersion::V1), declared()).unwrap()
    }

    fn two_nics() -> HardwareCollection {
        load(vec![
            item("1", "3", &[("VirtualQuantity", "1")], None),
            item("10", "10", &[("AddressOnParent", "7"), ("ElementName", "Ethernet1")], None),
            item("11", "10", &[("AddressOnParent", "8"), ("ElementName", "Ethernet2")], None),
        ])
    }

    #[test]
    fn test_load_merges_fragments_by_instance_id() {
        let hw = load(vec![
            item("1", "3", &[("VirtualQuantity", "1")], None),
            item("1", "3", &[("VirtualQuantity", "2")], Some("A")),
        ]);
        assert_eq!(hw.len(), 1);
        assert!(!hw.is_modified());
        let cpu = hw.get("1").unwrap();
        assert_eq!(
            cpu.get_field(ItemField::VirtualQuantity, Some(&ProfileSet::from_names(&["A"]))).as_deref(),
            Some("2")
        );
    }

    #[test]
    fn test_load_rejects_undeclared_profiles() {
        let err = HardwareCollection::from_section(
            &section(vec![item("1", "3", &[], Some("C"))]),
            NameResolver::new(OvfVersion::V1),
            declared(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Ovf { .. }));
    }

    #[test]
    fn test_items_iterate_in_natural_order() {
        let hw = load(vec![item("10", "10", &[], None), item("2", "3", &[], None), item("1", "4", &[], None)]);
        let ids: Vec<String> = hw.iter().filter_map(HardwareItem::instance_id).collect();
        assert_eq!(ids, ["1", "2", "10"]);
    }

    #[test]
    fn test_find_unused_instance_id() {
        let hw = load(vec![item("1", "3", &[], None), item("2", "4", &[], None), item("4", "5", &[], None)]);
        assert_eq!(hw.find_unused_instance_id(1), "3");
        assert_eq!(hw.find_unused_instance_id(4), "5");
    }

    #[test]
    fn test_new_item_uses_v2_namespaces() {
        let mut hw = HardwareCollection::new(NameResolver::new(OvfVersion::V2), ProfileSet::new());
        let id = hw.new_item(ResourceKind::Ethernet, None).unwrap();
        let nic = hw.get(&id).unwrap();
        assert_eq!(nic.namespace(), crate::names::ItemNamespace::Ethernet);
        assert_eq!(nic.resource_kind(), Some(ResourceKind::Ethernet));
        assert!(hw.is_modified());
    }

    #[test]
    fn test_new_item_rejects_undeclared_profile() {
        let mut hw = two_nics();
        let err = hw
            .new_item(ResourceKind::Serial, Some(&ProfileSet::from_names(&["Z"])))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_find_item() {
        let hw = two_nics();
        assert_eq!(hw.find_all_items(Some(ResourceKind::Ethernet), &[], None).len(), 2);
        assert!(matches!(
            hw.find_item(Some(ResourceKind::Ethernet), &[], None),
            Err(Error::Ambiguous { .. })
        ));

        let key = PropertyKey::Field("AddressOnParent".to_string());
        let found = hw
            .find_item(Some(ResourceKind::Ethernet), &[(key, "8")], None)
            .unwrap()
            .unwrap();
        assert_eq!(found.instance_id().as_deref(), Some("11"));
        assert!(hw.find_item(Some(ResourceKind::Serial), &[], None).unwrap().is_none());
    }

    #[test]
    fn test_count_per_profile_counts_default_items_everywhere() {
        let hw = two_nics();
        let counts = hw.get_item_count_per_profile(ResourceKind::Ethernet, &[]);
        assert_eq!(counts[&Profile::Default], 2);
        assert_eq!(counts[&Profile::named("A")], 2);
        assert_eq!(counts[&Profile::named("B")], 2);
    }

    #[test]
    fn test_grow_nics_in_one_profile() {
        let mut hw = two_nics();
        hw.set_item_count_per_profile(ResourceKind::Ethernet, 3, &[Profile::named("A")], &GenericPlatform)
            .unwrap();

        assert_eq!(hw.len(), 4);
        assert_eq!(hw.get_item_count(ResourceKind::Ethernet, &Profile::named("A")), 3);
        assert_eq!(hw.get_item_count(ResourceKind::Ethernet, &Profile::named("B")), 2);
        assert_eq!(hw.get_item_count(ResourceKind::Ethernet, &Profile::Default), 2);

        let new = hw.get("2").unwrap();
        assert_eq!(new.get_field(ItemField::AddressOnParent, None).as_deref(), Some("9"));
        assert_eq!(new.get_field(ItemField::ElementName, None).as_deref(), Some("Ethernet3"));
        assert!(!new.has_profile(&Profile::Default));
    }

    #[test]
    fn test_shrink_nics_in_one_profile_splits_default() {
        let mut hw = two_nics();
        hw.set_item_count_per_profile(ResourceKind::Ethernet, 1, &[Profile::named("B")], &GenericPlatform)
            .unwrap();
        assert_eq!(hw.len(), 3);
        assert_eq!(hw.get_item_count(ResourceKind::Ethernet, &Profile::named("B")), 1);
        assert_eq!(hw.get_item_count(ResourceKind::Ethernet, &Profile::named("A")), 2);
        assert!(!hw.get("11").unwrap().has_profile(&Profile::Default));
    }

    #[test]
    fn test_shrink_everywhere_deletes_items() {
        let mut hw = two_nics();
        hw.set_item_count_per_profile(ResourceKind::Ethernet, 1, &[], &GenericPlatform)
            .unwrap();
        assert_eq!(hw.len(), 2);
        assert!(hw.get("11").is_none());
    }

    #[test]
    fn test_create_from_scratch_when_no_items() {
        let mut hw = two_nics();
        hw.set_item_count_per_profile(ResourceKind::Serial, 2, &[], &GenericPlatform)
            .unwrap();
        assert_eq!(hw.get_item_count(ResourceKind::Serial, &Profile::Default), 2);
        assert_eq!(hw.get_item_count(ResourceKind::Serial, &Profile::named("A")), 2);
    }

    #[test]
    fn test_clone_rejects_explicit_address() {
        let mut hw = load(vec![item("3", "6", &[("Address", "0")], None)]);
        let err = hw
            .clone_item("3", &ProfileSet::default_only(), &GenericPlatform)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn test_clone_rejects_non_integer_address_on_parent() {
        let mut hw = load(vec![item("3", "17", &[("AddressOnParent", "x")], None)]);
        let err = hw
            .clone_item("3", &ProfileSet::default_only(), &GenericPlatform)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn test_set_item_values_per_profile() {
        let mut hw = two_nics();
        hw.set_item_values_per_profile(
            ResourceKind::Ethernet,
            ItemField::Connection,
            &["mgmt".to_string()],
            &[],
            Some("data"),
        )
        .unwrap();
        assert_eq!(hw.get("10").unwrap().get_field(ItemField::Connection, None).as_deref(), Some("mgmt"));
        assert_eq!(hw.get("11").unwrap().get_field(ItemField::Connection, None).as_deref(), Some("data"));
    }

    #[test]
    fn test_set_value_for_all_items_creates_when_asked() {
        let mut hw = two_nics();
        hw.set_value_for_all_items(ResourceKind::Scsi, ItemField::ResourceSubType, "lsilogic", None, false)
            .unwrap();
        assert_eq!(hw.len(), 3);
        hw.set_value_for_all_items(ResourceKind::Scsi, ItemField::ResourceSubType, "lsilogic", None, true)
            .unwrap();
        assert_eq!(hw.len(), 4);
    }

    #[test]
    fn test_update_xml_only_when_modified() {
        let mut hw = two_nics();
        let mut s = section(vec![
            item("1", "3", &[("VirtualQuantity", "1")], None),
            item("10", "10", &[("AddressOnParent", "7"), ("ElementName", "Ethernet1")], None),
            item("11", "10", &[("AddressOnParent", "8"), ("ElementName", "Ethernet2")], None),
        ]);
        assert!(!hw.update_xml(&mut s));

        hw.get_mut("1")
            .unwrap()
            .set_field(ItemField::VirtualQuantity, "2", Some(&ProfileSet::from_names(&["A"])))
            .unwrap();
        assert!(hw.update_xml(&mut s));
        let item_tag = QName::new(OVF_V1_NS, "Item");
        assert_eq!(s.find_children(&item_tag).count(), 4);
        // Info stays first.
        assert_eq!(s.child_elements().next().unwrap().name.local, "Info");
        assert!(!hw.is_modified());
    }
}
