//! Product, annotation, EULA, network and configuration profile sections.

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::names::{Attr, NameResolver, Section, Tag};
use crate::profile::{Profile, ProfileSet};
use crate::xml::{Element, QName};

use super::{find_section, find_virtual_system, profile_ids, Ovf};

/// Text fields of a ProductSection, in schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductField {
    Product,
    Vendor,
    Version,
    FullVersion,
    ProductUrl,
    VendorUrl,
}

impl ProductField {
    const ORDER: [ProductField; 6] = [
        ProductField::Product,
        ProductField::Vendor,
        ProductField::Version,
        ProductField::FullVersion,
        ProductField::ProductUrl,
        ProductField::VendorUrl,
    ];

    fn tag(self) -> Tag {
        match self {
            ProductField::Product => Tag::Product,
            ProductField::Vendor => Tag::Vendor,
            ProductField::Version => Tag::Version,
            ProductField::FullVersion => Tag::FullVersion,
            ProductField::ProductUrl => Tag::ProductUrl,
            ProductField::VendorUrl => Tag::VendorUrl,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductInfo {
    pub class: Option<String>,
    pub instance: Option<String>,
    pub product: Option<String>,
    pub vendor: Option<String>,
    pub version: Option<String>,
    pub full_version: Option<String>,
    pub product_url: Option<String>,
    pub vendor_url: Option<String>,
}

/// A `Property` of the ProductSection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductProperty {
    pub key: String,
    /// `string`, `boolean`, `uint8` ... `real64`.
    pub value_type: String,
    pub value: Option<String>,
    pub qualifiers: Option<String>,
    pub user_configurable: bool,
    pub label: Option<String>,
    pub description: Option<String>,
}

impl ProductProperty {
    fn from_element(element: &Element, names: NameResolver) -> Option<Self> {
        Some(Self {
            key: element.attr(&names.attr(Attr::Key))?.to_string(),
            value_type: element
                .attr(&names.attr(Attr::Type))
                .unwrap_or("string")
                .to_string(),
            value: element.attr(&names.attr(Attr::PropertyValue)).map(str::to_string),
            qualifiers: element.attr(&names.attr(Attr::Qualifiers)).map(str::to_string),
            user_configurable: element
                .attr(&names.attr(Attr::UserConfigurable))
                .map_or(false, |v| v.trim().eq_ignore_ascii_case("true")),
            label: element.child_text(&names.tag(Tag::Label)),
            description: element.child_text(&names.tag(Tag::Description)),
        })
    }

    /// Check `value` against the property's type and qualifiers.
    pub fn check_value(&self, value: &str) -> Result<()> {
        let bad = |message: String| Error::invalid_value(format!("property {}", self.key), message);
        let kind = self.value_type.as_str();
        if kind == "boolean" && !matches!(value.to_ascii_lowercase().as_str(), "true" | "false") {
            return Err(bad(format!("'{}' is not a boolean", value)));
        }
        if kind.starts_with("uint") && value.parse::<u64>().is_err() {
            return Err(bad(format!("'{}' is not an unsigned integer", value)));
        }
        if (kind.starts_with("sint") || kind.starts_with("int")) && value.parse::<i64>().is_err() {
            return Err(bad(format!("'{}' is not an integer", value)));
        }
        if kind.starts_with("real") && value.parse::<f64>().is_err() {
            return Err(bad(format!("'{}' is not a number", value)));
        }

        let Some(qualifiers) = &self.qualifiers else {
            return Ok(());
        };
        let length = value.chars().count();
        if let Some(min) = qualifier_number(qualifiers, "MinLen(") {
            if length < min {
                return Err(bad(format!("'{}' is shorter than {} characters", value, min)));
            }
        }
        if let Some(max) = qualifier_number(qualifiers, "MaxLen(") {
            if length > max {
                return Err(bad(format!("'{}' is longer than {} characters", value, max)));
            }
        }
        if let Some(choices) = value_map(qualifiers) {
            if !choices.iter().any(|c| c == value) {
                return Err(bad(format!("'{}' is not one of {}", value, choices.join(", "))));
            }
        }
        Ok(())
    }
}

fn qualifier_number(qualifiers: &str, prefix: &str) -> Option<usize> {
    let start = qualifiers.find(prefix)? + prefix.len();
    let end = qualifiers[start..].find(')')? + start;
    qualifiers[start..end].trim().parse().ok()
}

fn value_map(qualifiers: &str) -> Option<Vec<String>> {
    let start = qualifiers.find("ValueMap{")? + "ValueMap{".len();
    let end = qualifiers[start..].find('}')? + start;
    Some(
        qualifiers[start..end]
            .split(',')
            .map(|c| c.trim().trim_matches('"').to_string())
            .filter(|c| !c.is_empty())
            .collect(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: String,
    pub description: Option<String>,
}

/// Product class of the first ProductSection, which selects the platform.
pub(super) fn product_class(root: &Element, names: NameResolver) -> Option<String> {
    let system = find_virtual_system(root, names).ok()?;
    find_section(system, names, Section::Product)?
        .attr(&names.attr(Attr::Class))
        .map(str::to_string)
}

/// Insert `child` after the last existing sibling whose tag precedes it.
fn insert_ordered(parent: &mut Element, child: Element, preceding: &[QName]) {
    let index = parent
        .children
        .iter()
        .enumerate()
        .filter(|(_, node)| matches!(node, crate::xml::Node::Element(e) if preceding.contains(&e.name)))
        .map(|(i, _)| i + 1)
        .last()
        .unwrap_or(parent.children.len());
    parent.insert_child(index, child);
}

impl Ovf {
    pub fn product_info(&self) -> ProductInfo {
        let names = self.names;
        let Some(section) = self.section(Section::Product) else {
            return ProductInfo::default();
        };
        let text = |field: ProductField| section.child_text(&names.tag(field.tag()));
        ProductInfo {
            class: section.attr(&names.attr(Attr::Class)).map(str::to_string),
            instance: section.attr(&names.attr(Attr::Instance)).map(str::to_string),
            product: text(ProductField::Product),
            vendor: text(ProductField::Vendor),
            version: text(ProductField::Version),
            full_version: text(ProductField::FullVersion),
            product_url: text(ProductField::ProductUrl),
            vendor_url: text(ProductField::VendorUrl),
        }
    }

    /// Set one product text field, creating the section if needed.
    pub fn set_product_field(&mut self, field: ProductField, value: &str) -> Result<()> {
        let names = self.names;
        let section = self.ensure_section(Section::Product)?;
        let tag = names.tag(field.tag());
        match section.find_child_mut(&tag) {
            Some(child) => child.set_text(value),
            None => {
                let mut preceding = vec![names.tag(Tag::Info)];
                preceding.extend(
                    ProductField::ORDER
                        .iter()
                        .take_while(|f| **f != field)
                        .map(|f| names.tag(f.tag())),
                );
                insert_ordered(section, Element::new(tag).with_text(value), &preceding);
            }
        }
        info!(field = ?field, value, "set product information");
        Ok(())
    }

    pub fn product_properties(&self) -> Vec<ProductProperty> {
        let names = self.names;
        let tag = names.tag(Tag::Property);
        self.section(Section::Product)
            .map(|section| {
                section
                    .find_children(&tag)
                    .filter_map(|e| ProductProperty::from_element(e, names))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn product_property(&self, key: &str) -> Option<ProductProperty> {
        self.product_properties().into_iter().find(|p| p.key == key)
    }

    /// Set a property's value, creating a string property if none has `key`.
    pub fn set_product_property(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(existing) = self.product_property(key) {
            existing.check_value(value)?;
        }
        let names = self.names;
        let key_attr = names.attr(Attr::Key);
        let tag = names.tag(Tag::Property);
        let section = self.ensure_section(Section::Product)?;
        let existing = section
            .child_elements_mut()
            .find(|e| e.name == tag && e.attr(&key_attr) == Some(key));
        match existing {
            Some(property) => {
                property.set_attr(names.attr(Attr::PropertyValue), value);
                debug!(key, value, "updated product property");
            }
            None => {
                section.push_child(
                    Element::new(tag)
                        .with_attr(key_attr, key)
                        .with_attr(names.attr(Attr::Type), "string")
                        .with_attr(names.attr(Attr::PropertyValue), value),
                );
                info!(key, value, "created product property");
            }
        }
        Ok(())
    }

    pub fn annotation(&self) -> Option<String> {
        self.section(Section::Annotation)
            .and_then(|section| section.child_text(&self.names.tag(Tag::Annotation)))
    }

    pub fn set_annotation(&mut self, text: &str) -> Result<()> {
        let tag = self.names.tag(Tag::Annotation);
        self.ensure_section(Section::Annotation)?.set_child_text(&tag, text);
        info!("set annotation");
        Ok(())
    }

    /// License texts of every EulaSection.
    pub fn eulas(&self) -> Vec<String> {
        let names = self.names;
        let license = names.tag(Tag::License);
        let Ok(system) = find_virtual_system(&self.document.root, names) else {
            return Vec::new();
        };
        system
            .child_elements()
            .filter(|e| names.is_section(e, Section::Eula))
            .filter_map(|e| e.child_text(&license))
            .collect()
    }

    pub fn networks(&self) -> Vec<NetworkInfo> {
        let names = self.names;
        let name_attr = names.attr(Attr::NetworkName);
        let tag = names.tag(Tag::Network);
        let description = names.tag(Tag::Description);
        self.section(Section::Network)
            .map(|section| {
                section
                    .find_children(&tag)
                    .filter_map(|e| {
                        Some(NetworkInfo {
                            name: e.attr(&name_attr)?.to_string(),
                            description: e.child_text(&description),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Declare a network; an existing network of that name is left alone.
    pub fn create_network(&mut self, name: &str, description: &str) -> Result<()> {
        let names = self.names;
        let name_attr = names.attr(Attr::NetworkName);
        let tag = names.tag(Tag::Network);
        let section = self.ensure_section(Section::Network)?;
        if section.find_children(&tag).any(|e| e.attr(&name_attr) == Some(name)) {
            debug!(network = name, "network already exists");
            return Ok(());
        }
        section.push_child(
            Element::new(tag)
                .with_attr(name_attr, name)
                .with_child(Element::new(names.tag(Tag::Description)).with_text(description)),
        );
        info!(network = name, "created network");
        Ok(())
    }

    /// Declared configuration profile ids, the default one first.
    pub fn config_profiles(&self) -> Vec<String> {
        profile_ids(&self.document.root, self.names)
    }

    /// Add a configuration profile, or relabel an existing one.
    pub fn create_configuration_profile(&mut self, id: &str, label: &str, description: &str) -> Result<()> {
        if !self.version().supports_profiles() {
            return Err(Error::unsupported(format!(
                "OVF {} descriptors cannot declare configuration profiles",
                self.version()
            )));
        }
        let names = self.names;
        let id_attr = names.attr(Attr::Id);
        let tag = names.tag(Tag::Configuration);
        let label_tag = names.tag(Tag::Label);
        let description_tag = names.tag(Tag::Description);

        let section = self.ensure_section(Section::DeploymentOption)?;
        let existing = section
            .child_elements_mut()
            .find(|e| e.name == tag && e.attr(&id_attr) == Some(id));
        match existing {
            Some(config) => {
                config.set_child_text(&label_tag, label);
                config.set_child_text(&description_tag, description);
                info!(profile = id, "updated configuration profile");
            }
            None => {
                section.push_child(
                    Element::new(tag)
                        .with_attr(id_attr, id)
                        .with_child(Element::new(label_tag).with_text(label))
                        .with_child(Element::new(description_tag).with_text(description)),
                );
                info!(profile = id, "created configuration profile");
            }
        }

        let mut declared = self.hardware.declared_profiles().clone();
        declared.insert(Profile::named(id));
        self.hardware.set_declared_profiles(declared);
        Ok(())
    }

    /// Remove a profile from the descriptor and from every item. Items that
    /// existed only in that profile are deleted.
    pub fn delete_configuration_profile(&mut self, id: &str) -> Result<()> {
        let profile = Profile::named(id);
        if !self.hardware.declared_profiles().contains(&profile) {
            return Err(Error::not_found(format!("configuration profile '{}' is not declared", id)));
        }
        let names = self.names;
        let id_attr = names.attr(Attr::Id);
        let tag = names.tag(Tag::Configuration);

        let mut section_empty = false;
        if let Some(section) = self.section_mut(Section::DeploymentOption) {
            section.remove_children(|e| e.name == tag && e.attr(&id_attr) == Some(id));
            section_empty = section.find_children(&tag).next().is_none();
        }
        if section_empty {
            self.remove_section(Section::DeploymentOption);
        }

        let ids: Vec<String> = self.hardware.iter().filter_map(|item| item.instance_id()).collect();
        for instance in ids {
            let Some(item) = self.hardware.get_mut(&instance) else {
                continue;
            };
            item.remove_profile(&profile, None)?;
            if item.is_empty() {
                warn!(instance = %instance, profile = id, "item existed only in the deleted profile; deleting it");
                self.hardware.delete_item(&instance);
            }
        }

        let declared: ProfileSet = self
            .hardware
            .declared_profiles()
            .iter()
            .filter(|p| **p != profile)
            .cloned()
            .collect();
        self.hardware.set_declared_profiles(declared);
        info!(profile = id, "deleted configuration profile");
        Ok(())
    }
}
