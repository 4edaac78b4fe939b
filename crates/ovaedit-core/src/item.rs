//! Profile-scoped property store for one logical hardware device.
//!
//! A descriptor may list the same device several times, once per combination
//! of configuration profiles, each copy carrying the values that apply to
//! those profiles. [`HardwareItem`] merges every such fragment into a single
//! map of `property -> value -> profiles` and can re-linearize that map into
//! the minimal set of fragments again.
//!
//! Per property the value sets are pairwise disjoint, and a set holding
//! [`Profile::Default`] is always exactly `{Default}`. A profile without an
//! explicit value for a property inherits the value held by `Default`.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};
use crate::names::{Attr, ItemField, ItemNamespace, NameResolver, ResourceKind};
use crate::profile::{Profile, ProfileSet};
use crate::xml::{Element, QName};

/// Identifies one property of a hardware item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKey {
    /// Attribute of the item element itself, such as `ovf:required`.
    ItemAttribute(QName),
    /// Standard child field, by local name.
    Field(String),
    /// Attribute on a standard child field.
    FieldAttribute(String, QName),
    /// Vendor extension element, told apart by its `key` attribute or by
    /// its position among same-named siblings.
    Extension(QName, String),
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::ItemAttribute(name) => write!(f, "@{}", name.local),
            PropertyKey::Field(name) => write!(f, "{}", name),
            PropertyKey::FieldAttribute(field, name) => write!(f, "{}@{}", field, name.local),
            PropertyKey::Extension(name, disc) => write!(f, "{}[{}]", name.local, disc),
        }
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyValue {
    Text(String),
    /// Ordered token list; used for ResourceSubType.
    Tokens(Vec<String>),
    /// A whole vendor extension element.
    Element(Element),
}

impl PropertyValue {
    pub fn text(value: impl Into<String>) -> Self {
        PropertyValue::Text(value.into())
    }

    pub fn tokens(value: &str) -> Self {
        PropertyValue::Tokens(value.split_whitespace().map(str::to_string).collect())
    }

    /// Text form as written on the wire.
    pub fn as_text(&self) -> String {
        match self {
            PropertyValue::Text(t) => t.clone(),
            PropertyValue::Tokens(tokens) => tokens.join(" "),
            PropertyValue::Element(e) => e.text(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Element(e) => write!(f, "<{}>", e.name.local),
            other => write!(f, "{}", other.as_text()),
        }
    }
}

/// Markers stored in ElementName/Description in place of other field values.
const WILDCARDS: &[(&str, ItemField, bool)] = &[
    ("_RES_SUB_TYPE_", ItemField::ResourceSubType, true),
    ("_CONNECTION_", ItemField::Connection, true),
    ("_VQ_", ItemField::VirtualQuantity, false),
];

type ValueMap = BTreeMap<PropertyValue, ProfileSet>;

/// One logical hardware device across all profiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareItem {
    names: NameResolver,
    namespace: ItemNamespace,
    properties: BTreeMap<PropertyKey, ValueMap>,
    modified: bool,
}

impl HardwareItem {
    /// An empty item.
    pub fn new(names: NameResolver, namespace: ItemNamespace) -> Self {
        Self {
            names,
            namespace: names.effective_item_namespace(namespace),
            properties: BTreeMap::new(),
            modified: false,
        }
    }

    /// Build an item from its first descriptor fragment.
    pub fn from_element(names: NameResolver, element: &Element) -> Result<Self> {
        let namespace = names.item_namespace_for_tag(&element.name)?;
        let mut item = Self::new(names, namespace);
        item.add_fragment(element)?;
        item.modified = false;
        Ok(item)
    }

    /// Merge another fragment of the same device.
    ///
    /// Fails with a data conflict if the fragment disagrees with values
    /// already recorded for the same profiles.
    pub fn add_fragment(&mut self, element: &Element) -> Result<()> {
        let namespace = self.names.item_namespace_for_tag(&element.name)?;
        if namespace != self.namespace {
            return Err(Error::data_conflict(format!(
                "item {} appears as both {:?} and {:?}",
                self.instance_id().unwrap_or_default(),
                self.namespace,
                namespace
            )));
        }

        let config_attr = self.names.attr(Attr::Configuration);
        let profiles = ProfileSet::from_config_attr(element.attr(&config_attr));
        let field_ns = self.names.item_field_ns(self.namespace);

        for (name, value) in &element.attributes {
            if *name == config_attr {
                continue;
            }
            let key = PropertyKey::ItemAttribute(name.clone());
            self.set_property(key, PropertyValue::text(value), Some(&profiles), false)?;
        }

        let mut seen_fields: Vec<&str> = Vec::new();
        let mut extension_counts: BTreeMap<&QName, usize> = BTreeMap::new();
        let mut deferred = Vec::new();

        for child in element.child_elements() {
            if child.name.namespace.as_deref() == Some(field_ns) {
                let local = child.name.local.as_str();
                if seen_fields.contains(&local) {
                    return Err(Error::data_conflict(format!(
                        "field {} repeated within one fragment of item {}",
                        local,
                        self.instance_id().unwrap_or_default()
                    )));
                }
                seen_fields.push(local);

                let value = if local == self.names.field(ItemField::ResourceSubType) {
                    PropertyValue::tokens(&child.text())
                } else {
                    PropertyValue::text(child.text())
                };
                let key = PropertyKey::Field(local.to_string());
                if self.is_wildcard_field(&key) {
                    deferred.push((key, value, child));
                    continue;
                }
                self.set_property(key, value, Some(&profiles), false)?;
                self.add_field_attributes(local, child, &profiles)?;
            } else {
                let disc = match extension_discriminator(child) {
                    Some(key) => key,
                    None => {
                        let n = extension_counts.entry(&child.name).or_insert(0);
                        *n += 1;
                        format!("#{}", n)
                    }
                };
                let key = PropertyKey::Extension(child.name.clone(), disc);
                self.set_property(key, PropertyValue::Element(child.clone()), Some(&profiles), false)?;
            }
        }

        // Names and descriptions may embed other fields, so they go last.
        for (key, value, child) in deferred {
            let local = child.name.local.clone();
            self.set_property(key, value, Some(&profiles), false)?;
            self.add_field_attributes(&local, child, &profiles)?;
        }
        Ok(())
    }

    fn add_field_attributes(&mut self, field: &str, child: &Element, profiles: &ProfileSet) -> Result<()> {
        for (name, value) in &child.attributes {
            let key = PropertyKey::FieldAttribute(field.to_string(), name.clone());
            self.set_property(key, PropertyValue::text(value), Some(profiles), false)?;
        }
        Ok(())
    }

    pub fn names(&self) -> NameResolver {
        self.names
    }

    pub fn namespace(&self) -> ItemNamespace {
        self.namespace
    }

    /// Key of a standard field in this item's descriptor version.
    pub fn key(&self, field: ItemField) -> PropertyKey {
        PropertyKey::Field(self.names.field(field).to_string())
    }

    /// The instance id; single-valued across profiles.
    pub fn instance_id(&self) -> Option<String> {
        self.sole_value(&self.key(ItemField::InstanceId))
    }

    /// The raw ResourceType code.
    pub fn resource_type(&self) -> Option<String> {
        self.sole_value(&self.key(ItemField::ResourceType))
    }

    pub fn resource_kind(&self) -> Option<ResourceKind> {
        self.resource_type().as_deref().and_then(ResourceKind::from_code)
    }

    fn sole_value(&self, key: &PropertyKey) -> Option<String> {
        let values = self.properties.get(key)?;
        values.keys().next().map(PropertyValue::as_text)
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn mark_clean(&mut self) {
        self.modified = false;
    }

    /// Every key that currently has a value.
    pub fn keys(&self) -> impl Iterator<Item = &PropertyKey> {
        self.properties.keys()
    }

    /// Every distinct value of a property with the profiles it is set for.
    pub fn values(&self, key: &PropertyKey) -> Vec<(&PropertyValue, &ProfileSet)> {
        self.properties
            .get(key)
            .map(|values| values.iter().collect())
            .unwrap_or_default()
    }

    /// Union of every profile set on the item.
    pub fn profiles(&self) -> ProfileSet {
        let mut all = ProfileSet::new();
        for values in self.properties.values() {
            for set in values.values() {
                all.extend(set);
            }
        }
        all
    }

    /// Whether the item applies to `profile`.
    pub fn has_profile(&self, profile: &Profile) -> bool {
        let all = self.profiles();
        all.contains(profile) || all.contains_default()
    }

    /// True once every profile has been stripped.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Profiles a `None` request stands for.
    fn coverage(&self) -> ProfileSet {
        let all = self.profiles();
        if all.is_empty() {
            ProfileSet::default_only()
        } else {
            all
        }
    }

    fn key_coverage(&self, key: &PropertyKey) -> ProfileSet {
        let mut all = ProfileSet::new();
        if let Some(values) = self.properties.get(key) {
            for set in values.values() {
                all.extend(set);
            }
        }
        all
    }

    fn is_single_valued(&self, key: &PropertyKey) -> bool {
        *key == self.key(ItemField::InstanceId) || *key == self.key(ItemField::ResourceType)
    }

    fn is_wildcard_field(&self, key: &PropertyKey) -> bool {
        *key == self.key(ItemField::ElementName) || *key == self.key(ItemField::Description)
    }

    /// Set `key` to `value` for `profiles`.
    ///
    /// With no profiles, the value replaces whatever the property currently
    /// covers, or becomes the default if the property is unset. Without
    /// `overwrite`, a profile that already holds a different explicit value
    /// is a data conflict and nothing is changed.
    pub fn set_property(
        &mut self,
        key: PropertyKey,
        value: PropertyValue,
        profiles: Option<&ProfileSet>,
        overwrite: bool,
    ) -> Result<()> {
        let profiles = match profiles.filter(|p| !p.is_empty()) {
            Some(p) => p.clone(),
            None => {
                let current = self.key_coverage(&key);
                if current.is_empty() {
                    ProfileSet::default_only()
                } else {
                    current
                }
            }
        };

        let value = match (&key, value) {
            (PropertyKey::Field(name), PropertyValue::Text(text))
                if name == self.names.field(ItemField::ResourceSubType) =>
            {
                PropertyValue::tokens(&text)
            }
            (_, PropertyValue::Text(text)) if self.is_wildcard_field(&key) => {
                PropertyValue::Text(self.insert_markers(&key, &text, &profiles))
            }
            (_, value) => value,
        };

        let before = self.properties.get(&key);
        let mut values = before.cloned().unwrap_or_default();

        if !overwrite {
            let mut clashing = ProfileSet::new();
            for (existing, set) in &values {
                if *existing != value {
                    clashing.extend(&set.intersection(&profiles));
                }
            }
            if !clashing.is_empty() {
                return Err(Error::data_conflict(format!(
                    "item {}: {} is already set to a different value for profiles {}; refusing to set '{}'",
                    self.instance_id().unwrap_or_default(),
                    key,
                    clashing,
                    value
                )));
            }
        }

        for set in values.values_mut() {
            for profile in &profiles {
                set.remove(profile);
            }
        }
        values.retain(|_, set| !set.is_empty());
        let set = values.entry(value).or_default();
        set.extend(&profiles);
        set.normalize();

        if self.is_single_valued(&key) && values.len() > 1 {
            return Err(Error::data_conflict(format!(
                "item {}: {} must have a single value across all profiles",
                self.instance_id().unwrap_or_default(),
                key
            )));
        }

        if before != Some(&values) {
            debug!(item = ?self.instance_id(), property = %key, "property changed");
            self.properties.insert(key, values);
            self.modified = true;
        }
        self.settle()
    }

    /// Set a standard field, overwriting.
    pub fn set_field(&mut self, field: ItemField, value: &str, profiles: Option<&ProfileSet>) -> Result<()> {
        self.set_property(self.key(field), PropertyValue::text(value), profiles, true)
    }

    /// Remove the explicit values of `key` for `profiles`, or the whole
    /// property when no profiles are given.
    pub fn clear_property(&mut self, key: &PropertyKey, profiles: Option<&ProfileSet>) -> Result<()> {
        let Some(values) = self.properties.get_mut(key) else {
            return Ok(());
        };
        match profiles.filter(|p| !p.is_empty()) {
            None => {
                self.properties.remove(key);
                self.modified = true;
            }
            Some(profiles) => {
                let before = values.clone();
                for set in values.values_mut() {
                    for profile in profiles {
                        set.remove(profile);
                    }
                }
                values.retain(|_, set| !set.is_empty());
                if *values != before {
                    self.modified = true;
                }
                if values.is_empty() {
                    self.properties.remove(key);
                }
            }
        }
        self.settle()
    }

    /// The value of `key` shared by every profile in `profiles`.
    ///
    /// Each profile resolves to its explicit value, else to the default
    /// value. `None` asks for the value common to every profile the item
    /// covers.
    pub fn get_value(&self, key: &PropertyKey, profiles: Option<&ProfileSet>) -> Option<PropertyValue> {
        let profiles = match profiles.filter(|p| !p.is_empty()) {
            Some(p) => p.clone(),
            None => self.coverage(),
        };
        let mut result: Option<PropertyValue> = None;
        for profile in &profiles {
            let raw = self.resolve(key, profile)?;
            let value = self.render(key, raw, profile);
            match &result {
                None => result = Some(value),
                Some(existing) if *existing == value => {}
                Some(_) => return None,
            }
        }
        result
    }

    /// Text form of [`HardwareItem::get_value`].
    pub fn get_text(&self, key: &PropertyKey, profiles: Option<&ProfileSet>) -> Option<String> {
        self.get_value(key, profiles).map(|v| v.as_text())
    }

    /// Text of a standard field.
    pub fn get_field(&self, field: ItemField, profiles: Option<&ProfileSet>) -> Option<String> {
        self.get_text(&self.key(field), profiles)
    }

    /// The stored value active for one profile.
    fn resolve(&self, key: &PropertyKey, profile: &Profile) -> Option<&PropertyValue> {
        let values = self.properties.get(key)?;
        values
            .iter()
            .find(|(_, set)| set.contains(profile))
            .or_else(|| values.iter().find(|(_, set)| set.contains_default()))
            .map(|(value, _)| value)
    }

    fn insert_markers(&self, key: &PropertyKey, text: &str, profiles: &ProfileSet) -> String {
        let is_name = *key == self.key(ItemField::ElementName);
        let mut text = text.to_string();
        for (marker, field, in_description) in WILDCARDS {
            if !is_name && !in_description {
                continue;
            }
            let Some(current) = self.get_text(&self.key(*field), Some(profiles)) else {
                continue;
            };
            if current.is_empty() {
                continue;
            }
            text = replace_token(&text, &current, marker);
        }
        text
    }

    fn render(&self, key: &PropertyKey, value: &PropertyValue, profile: &Profile) -> PropertyValue {
        let PropertyValue::Text(text) = value else {
            return value.clone();
        };
        if !self.is_wildcard_field(key) || !WILDCARDS.iter().any(|(m, _, _)| text.contains(m)) {
            return value.clone();
        }
        let mut out = text.clone();
        for (marker, field, _) in WILDCARDS {
            if out.contains(marker) {
                let current = self
                    .resolve(&self.key(*field), profile)
                    .map(PropertyValue::as_text)
                    .unwrap_or_default();
                out = out.replace(marker, &current);
            }
        }
        PropertyValue::Text(out.trim().to_string())
    }

    /// Give `profile` the values it would have if it were the default.
    ///
    /// For each property of `source` (this item when `None`) the value
    /// whose set includes the default, or the property's only value, is
    /// copied. Anything else is ambiguous and nothing is changed.
    pub fn add_profile(&mut self, profile: &Profile, source: Option<&HardwareItem>) -> Result<()> {
        let from_other = source.is_some();
        let chosen = source.unwrap_or(&*self).inheritable_values()?;
        let id_key = self.key(ItemField::InstanceId);

        let before = self.properties.clone();
        for (key, value) in chosen {
            // Another item's id never replaces ours.
            let value = if from_other && key == id_key && self.properties.contains_key(&key) {
                match self.properties.get(&key).and_then(|v| v.keys().next()).cloned() {
                    Some(own) => own,
                    None => value,
                }
            } else {
                value
            };
            let values = self.properties.entry(key).or_default();
            for set in values.values_mut() {
                set.remove(profile);
            }
            values.retain(|_, set| !set.is_empty());
            let set = values.entry(value).or_default();
            set.insert(profile.clone());
            set.normalize();
        }
        if self.properties != before {
            self.modified = true;
        }
        self.settle()
    }

    fn inheritable_values(&self) -> Result<Vec<(PropertyKey, PropertyValue)>> {
        let mut chosen = Vec::with_capacity(self.properties.len());
        for (key, values) in &self.properties {
            let value = values
                .iter()
                .find(|(_, set)| set.contains_default())
                .map(|(v, _)| v)
                .or_else(|| (values.len() == 1).then(|| values.keys().next()).flatten());
            match value {
                Some(value) => chosen.push((key.clone(), value.clone())),
                None => {
                    return Err(Error::ambiguous(format!(
                        "item {}: {} has {} values and none is the default; cannot pick one to inherit",
                        self.instance_id().unwrap_or_default(),
                        key,
                        values.len()
                    )))
                }
            }
        }
        Ok(chosen)
    }

    /// Strip `profile` from every property.
    ///
    /// With `split_default_into`, a default value is replaced by the named
    /// profiles given there that no other value of the property already
    /// covers, so that `profile` stops inheriting it.
    pub fn remove_profile(&mut self, profile: &Profile, split_default_into: Option<&ProfileSet>) -> Result<()> {
        let before = self.properties.clone();
        for values in self.properties.values_mut() {
            let mut explicit = ProfileSet::new();
            for set in values.values().filter(|s| !s.contains_default()) {
                explicit.extend(set);
            }
            for set in values.values_mut() {
                let had_default = set.contains_default();
                set.remove(profile);
                if let (true, Some(declared)) = (had_default, split_default_into) {
                    let mut expanded = declared.difference(&explicit);
                    expanded.remove(profile);
                    expanded.remove(&Profile::Default);
                    *set = expanded;
                }
            }
            values.retain(|_, set| !set.is_empty());
        }
        self.properties.retain(|_, values| !values.is_empty());
        if self.properties != before {
            self.modified = true;
        }
        self.settle()
    }

    /// A structural copy holding, for each requested profile, the values
    /// active for that profile.
    pub fn restricted_to(&self, profiles: &ProfileSet) -> HardwareItem {
        let mut properties = BTreeMap::new();
        for key in self.properties.keys() {
            let mut values = ValueMap::new();
            for profile in profiles {
                if let Some(value) = self.resolve(key, profile) {
                    values.entry(value.clone()).or_insert_with(ProfileSet::new).insert(profile.clone());
                }
            }
            for set in values.values_mut() {
                set.normalize();
            }
            if !values.is_empty() {
                properties.insert(key.clone(), values);
            }
        }
        HardwareItem {
            names: self.names,
            namespace: self.namespace,
            properties,
            modified: true,
        }
    }

    /// Disjoint profile cells over which every property is constant.
    fn cells(&self) -> Vec<ProfileSet> {
        let mut cells: Vec<ProfileSet> = Vec::new();
        for values in self.properties.values() {
            for set in values.values() {
                let mut refined = Vec::with_capacity(cells.len() + 1);
                let mut remainder = set.clone();
                for cell in &cells {
                    let inside = cell.intersection(set);
                    let outside = cell.difference(set);
                    remainder = remainder.difference(cell);
                    if !inside.is_empty() {
                        refined.push(inside);
                    }
                    if !outside.is_empty() {
                        refined.push(outside);
                    }
                }
                if !remainder.is_empty() {
                    refined.push(remainder);
                }
                cells = refined;
            }
        }
        cells.sort_by_key(ProfileSet::render);
        cells
    }

    /// Serialize into one element per profile cell.
    pub fn generate_items(&self) -> Vec<Element> {
        let field_ns = self.names.item_field_ns(self.namespace);
        let config_attr = self.names.attr(Attr::Configuration);

        let mut fields: Vec<&str> = self.names.item_children().to_vec();
        let mut extra: Vec<&str> = self
            .properties
            .keys()
            .filter_map(|key| match key {
                PropertyKey::Field(name) if !fields.contains(&name.as_str()) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        extra.sort_unstable();
        fields.extend(extra);

        let mut fragments = Vec::new();
        for cell in self.cells() {
            let Some(probe) = cell.iter().next() else {
                continue;
            };
            let mut element = Element::new(self.names.item_tag(self.namespace));

            for key in self.properties.keys() {
                if let PropertyKey::ItemAttribute(name) = key {
                    if let Some(value) = self.resolve(key, probe) {
                        element.set_attr(name.clone(), value.as_text());
                    }
                }
            }
            if !cell.contains_default() {
                element.set_attr(config_attr.clone(), cell.render());
            }

            for field in &fields {
                let key = PropertyKey::Field(field.to_string());
                let Some(value) = self.resolve(&key, probe) else {
                    continue;
                };
                let text = self.render(&key, value, probe).as_text();
                let mut child = Element::new(QName::new(field_ns, field)).with_text(text);
                for attr_key in self.properties.keys() {
                    if let PropertyKey::FieldAttribute(owner, name) = attr_key {
                        if owner == field {
                            if let Some(v) = self.resolve(attr_key, probe) {
                                child.set_attr(name.clone(), v.as_text());
                            }
                        }
                    }
                }
                element.push_child(child);
            }

            for key in self.properties.keys() {
                if let PropertyKey::Extension(..) = key {
                    if let Some(PropertyValue::Element(ext)) = self.resolve(key, probe) {
                        element.push_child(ext.clone());
                    }
                }
            }
            fragments.push(element);
        }
        fragments
    }

    /// Normalize every profile set, then check the invariants.
    fn settle(&mut self) -> Result<()> {
        for values in self.properties.values_mut() {
            for set in values.values_mut() {
                set.normalize();
            }
        }
        self.validate()
    }

    /// Check the structural invariants. Profile sets are expected to be
    /// normalized already; every mutation normalizes before validating.
    pub fn validate(&self) -> Result<()> {
        let id = self.instance_id().unwrap_or_default();
        for (key, values) in &self.properties {
            if self.is_single_valued(key) && values.len() > 1 {
                return Err(Error::data_conflict(format!(
                    "item {}: {} has {} different values",
                    id,
                    key,
                    values.len()
                )));
            }
            let mut seen = ProfileSet::new();
            for (value, set) in values {
                if set.is_empty() {
                    return Err(Error::data_conflict(format!(
                        "item {}: {} value '{}' applies to no profile",
                        id, key, value
                    )));
                }
                if !seen.is_disjoint(set) {
                    return Err(Error::data_conflict(format!(
                        "item {}: {} has overlapping values for profiles {}",
                        id,
                        key,
                        seen.intersection(set)
                    )));
                }
                seen.extend(set);
            }
        }
        Ok(())
    }
}

fn extension_discriminator(element: &Element) -> Option<String> {
    element
        .attributes
        .iter()
        .find(|(name, _)| name.local == "key")
        .map(|(_, value)| value.clone())
}

/// Replace whole-token occurrences of `needle`.
///
/// An edge that is a digit may not touch another digit and an edge that is
/// a letter may not touch any alphanumeric, so `1` is found in `1 CPU` but
/// not in `10 CPU`.
pub(crate) fn replace_token(haystack: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return haystack.to_string();
    }
    let first = needle.chars().next();
    let last = needle.chars().next_back();

    let mut out = String::with_capacity(haystack.len());
    let mut i = 0;
    while let Some(pos) = haystack[i..].find(needle) {
        let start = i + pos;
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        if edge_ok(first, before) && edge_ok(last, after) {
            out.push_str(&haystack[i..start]);
            out.push_str(replacement);
            i = end;
        } else {
            let step = haystack[start..].chars().next().map(char::len_utf8).unwrap_or(1);
            out.push_str(&haystack[i..start + step]);
            i = start + step;
        }
    }
    out.push_str(&haystack[i..]);
    out
}

fn edge_ok(edge: Option<char>, neighbor: Option<char>) -> bool {
    match (edge, neighbor) {
        (Some(e), Some(n)) if e.is_ascii_digit() => !n.is_ascii_digit(),
        (Some(e), Some(n)) if e.is_alphabetic() => !n.is_alphanumeric(),
        _ => true,
    }
}
