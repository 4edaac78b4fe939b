//! Version-specific names for OVF descriptors.
//!
//! OVF has three generations with incompatible spellings: VMware's 0.9 draft,
//! DMTF 1.x, and DMTF 2.x. A [`NameResolver`] is built once for the detected
//! version and answers every "what is this element called here" question
//! through typed accessors, so the rest of the crate never branches on the
//! version itself.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::xml::QName;

/// Envelope namespace of VMware's OVF 0.9 draft.
pub const OVF_V0_9_NS: &str = "http://www.vmware.com/schema/ovf/1/envelope";
/// Envelope namespace of DMTF OVF 1.x.
pub const OVF_V1_NS: &str = "http://schemas.dmtf.org/ovf/envelope/1";
/// Envelope namespace of DMTF OVF 2.x.
pub const OVF_V2_NS: &str = "http://schemas.dmtf.org/ovf/envelope/2";

pub const RASD_NS: &str =
    "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData";
pub const VSSD_NS: &str =
    "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_VirtualSystemSettingData";
pub const SASD_NS: &str =
    "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_StorageAllocationSettingData";
pub const EPASD_NS: &str =
    "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_EthernetPortAllocationSettingData";
pub const CIM_NS: &str = "http://schemas.dmtf.org/wbem/wscim/1/common";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const VMW_NS: &str = "http://www.vmware.com/schema/ovf";

/// Conventional prefixes, declared on output for namespaces the input did not
/// already name.
pub const STANDARD_PREFIXES: &[(&str, &str)] = &[
    ("ovf", OVF_V1_NS),
    ("ovf", OVF_V2_NS),
    ("ovf", OVF_V0_9_NS),
    ("rasd", RASD_NS),
    ("vssd", VSSD_NS),
    ("sasd", SASD_NS),
    ("epasd", EPASD_NS),
    ("cim", CIM_NS),
    ("xsi", XSI_NS),
    ("vmw", VMW_NS),
];

/// Supported OVF generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OvfVersion {
    V0_9,
    V1,
    V2,
}

impl OvfVersion {
    /// Detect the version from the envelope namespace.
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            OVF_V0_9_NS => Some(OvfVersion::V0_9),
            OVF_V1_NS => Some(OvfVersion::V1),
            OVF_V2_NS => Some(OvfVersion::V2),
            _ => None,
        }
    }

    pub fn namespace(self) -> &'static str {
        match self {
            OvfVersion::V0_9 => OVF_V0_9_NS,
            OvfVersion::V1 => OVF_V1_NS,
            OvfVersion::V2 => OVF_V2_NS,
        }
    }

    /// Whether DeploymentOptionSection and `ovf:configuration` exist.
    pub fn supports_profiles(self) -> bool {
        self >= OvfVersion::V1
    }
}

impl fmt::Display for OvfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OvfVersion::V0_9 => write!(f, "0.9"),
            OvfVersion::V1 => write!(f, "1.x"),
            OvfVersion::V2 => write!(f, "2.x"),
        }
    }
}

/// Semantic device kinds and their CIM ResourceType codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Cpu,
    Memory,
    Ide,
    Scsi,
    Ethernet,
    Floppy,
    Cdrom,
    Dvd,
    Harddisk,
    Sata,
    Serial,
    Parallel,
    Usb,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 13] = [
        ResourceKind::Cpu,
        ResourceKind::Memory,
        ResourceKind::Ide,
        ResourceKind::Scsi,
        ResourceKind::Ethernet,
        ResourceKind::Floppy,
        ResourceKind::Cdrom,
        ResourceKind::Dvd,
        ResourceKind::Harddisk,
        ResourceKind::Sata,
        ResourceKind::Serial,
        ResourceKind::Parallel,
        ResourceKind::Usb,
    ];

    /// The ResourceType code written to the descriptor.
    pub fn code(self) -> &'static str {
        match self {
            ResourceKind::Cpu => "3",
            ResourceKind::Memory => "4",
            ResourceKind::Ide => "5",
            ResourceKind::Scsi => "6",
            ResourceKind::Ethernet => "10",
            ResourceKind::Floppy => "14",
            ResourceKind::Cdrom => "15",
            ResourceKind::Dvd => "16",
            ResourceKind::Harddisk => "17",
            ResourceKind::Sata => "20",
            ResourceKind::Serial => "21",
            ResourceKind::Parallel => "22",
            ResourceKind::Usb => "23",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code.trim())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Ide => "ide",
            ResourceKind::Scsi => "scsi",
            ResourceKind::Ethernet => "ethernet",
            ResourceKind::Floppy => "floppy",
            ResourceKind::Cdrom => "cdrom",
            ResourceKind::Dvd => "dvd",
            ResourceKind::Harddisk => "harddisk",
            ResourceKind::Sata => "sata",
            ResourceKind::Serial => "serial",
            ResourceKind::Parallel => "parallel",
            ResourceKind::Usb => "usb",
        }
    }

    /// Controllers that drives attach to.
    pub fn is_controller(self) -> bool {
        matches!(self, ResourceKind::Ide | ResourceKind::Scsi | ResourceKind::Sata)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::invalid_value("device kind", format!("unknown kind '{}'", s)))
    }
}

/// Which flavor of hardware item element a device uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemNamespace {
    /// `Item` with RASD children.
    Generic,
    /// `StorageItem` with SASD children (2.x only).
    Storage,
    /// `EthernetPortItem` with EPASD children (2.x only).
    Ethernet,
}

/// Top-level descriptor sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Disk,
    Network,
    DeploymentOption,
    VirtualHardware,
    Product,
    Annotation,
    Eula,
    OperatingSystem,
}

impl Section {
    fn local_name(self) -> &'static str {
        match self {
            Section::Disk => "DiskSection",
            Section::Network => "NetworkSection",
            Section::DeploymentOption => "DeploymentOptionSection",
            Section::VirtualHardware => "VirtualHardwareSection",
            Section::Product => "ProductSection",
            Section::Annotation => "AnnotationSection",
            Section::Eula => "EulaSection",
            Section::OperatingSystem => "OperatingSystemSection",
        }
    }
}

/// How a section is spelled on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionName {
    pub element: QName,
    /// 0.9 sections are generic `Section` elements told apart by `xsi:type`.
    pub xsi_type: Option<String>,
}

/// Elements in the OVF envelope namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Envelope,
    References,
    File,
    Disk,
    Network,
    Configuration,
    VirtualSystem,
    VirtualSystemCollection,
    Info,
    Name,
    Label,
    Description,
    System,
    Product,
    Vendor,
    Version,
    FullVersion,
    ProductUrl,
    VendorUrl,
    Property,
    Category,
    Annotation,
    License,
    Value,
}

/// Attributes in the OVF envelope namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    Id,
    Href,
    Size,
    DiskId,
    FileRef,
    Capacity,
    CapacityUnits,
    Format,
    PopulatedSize,
    NetworkName,
    Default,
    Configuration,
    Required,
    Key,
    Type,
    Qualifiers,
    UserConfigurable,
    PropertyValue,
    Class,
    Instance,
}

/// Standard child fields of a hardware item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemField {
    Address,
    AddressOnParent,
    AllocationUnits,
    AutomaticAllocation,
    Connection,
    Description,
    ElementName,
    HostResource,
    InstanceId,
    Parent,
    ResourceSubType,
    ResourceType,
    VirtualQuantity,
}

/// 0.9 items follow the legacy CIM_ResourceAllocationSettingData order.
const ITEM_CHILDREN_V0_9: &[&str] = &[
    "Caption",
    "Description",
    "InstanceId",
    "ResourceType",
    "OtherResourceType",
    "ResourceSubType",
    "PoolID",
    "ConsumerVisibility",
    "HostResource",
    "AllocationUnits",
    "VirtualQuantity",
    "Reservation",
    "Limit",
    "Weight",
    "AutomaticAllocation",
    "AutomaticDeallocation",
    "Parent",
    "Connection",
    "Address",
    "MappingBehavior",
    "AddressOnParent",
    "BusNumber",
];

/// 1.x and 2.x items follow the alphabetical CIM v2 schema order.
const ITEM_CHILDREN: &[&str] = &[
    "Address",
    "AddressOnParent",
    "AllocationUnits",
    "AutomaticAllocation",
    "AutomaticDeallocation",
    "Caption",
    "ChangeableType",
    "ConfigurationName",
    "Connection",
    "ConsumerVisibility",
    "Description",
    "ElementName",
    "Generation",
    "HostResource",
    "InstanceID",
    "Limit",
    "MappingBehavior",
    "OtherResourceType",
    "Parent",
    "PoolID",
    "Reservation",
    "ResourceSubType",
    "ResourceType",
    "VirtualQuantity",
    "VirtualQuantityUnits",
    "Weight",
];

/// Version-specific name tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameResolver {
    version: OvfVersion,
}

impl NameResolver {
    pub fn new(version: OvfVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> OvfVersion {
        self.version
    }

    /// The envelope namespace.
    pub fn ovf_ns(&self) -> &'static str {
        self.version.namespace()
    }

    /// An element in the envelope namespace.
    pub fn tag(&self, tag: Tag) -> QName {
        let local = match tag {
            Tag::Envelope => "Envelope",
            Tag::References => "References",
            Tag::File => "File",
            Tag::Disk => "Disk",
            Tag::Network => "Network",
            Tag::Configuration => "Configuration",
            Tag::VirtualSystem if self.version == OvfVersion::V0_9 => "Content",
            Tag::VirtualSystem => "VirtualSystem",
            Tag::VirtualSystemCollection if self.version == OvfVersion::V0_9 => "Content",
            Tag::VirtualSystemCollection => "VirtualSystemCollection",
            Tag::Info => "Info",
            Tag::Name => "Name",
            Tag::Label => "Label",
            Tag::Description => "Description",
            Tag::System => "System",
            Tag::Product => "Product",
            Tag::Vendor => "Vendor",
            Tag::Version => "Version",
            Tag::FullVersion => "FullVersion",
            Tag::ProductUrl => "ProductUrl",
            Tag::VendorUrl => "VendorUrl",
            Tag::Property => "Property",
            Tag::Category => "Category",
            Tag::Annotation => "Annotation",
            Tag::License => "License",
            Tag::Value => "Value",
        };
        QName::new(self.ovf_ns(), local)
    }

    /// An attribute in the envelope namespace.
    pub fn attr(&self, attr: Attr) -> QName {
        let local = match attr {
            Attr::Id => "id",
            Attr::Href => "href",
            Attr::Size => "size",
            Attr::DiskId => "diskId",
            Attr::FileRef => "fileRef",
            Attr::Capacity => "capacity",
            Attr::CapacityUnits => "capacityAllocationUnits",
            Attr::Format => "format",
            Attr::PopulatedSize => "populatedSize",
            Attr::NetworkName => "name",
            Attr::Default => "default",
            Attr::Configuration => "configuration",
            Attr::Required => "required",
            Attr::Key => "key",
            Attr::Type => "type",
            Attr::Qualifiers => "qualifiers",
            Attr::UserConfigurable => "userConfigurable",
            Attr::PropertyValue => "value",
            Attr::Class => "class",
            Attr::Instance => "instance",
        };
        QName::new(self.ovf_ns(), local)
    }

    /// The `xsi:type` attribute name.
    pub fn xsi_type(&self) -> QName {
        QName::new(XSI_NS, "type")
    }

    /// How a section is spelled in this version.
    pub fn section(&self, section: Section) -> SectionName {
        if self.version == OvfVersion::V0_9 {
            SectionName {
                element: QName::new(self.ovf_ns(), "Section"),
                xsi_type: Some(format!("{}_Type", section.local_name())),
            }
        } else {
            SectionName {
                element: QName::new(self.ovf_ns(), section.local_name()),
                xsi_type: None,
            }
        }
    }

    /// Type name carried by 0.9 `Content` elements for virtual systems.
    pub fn virtual_system_xsi_type(&self) -> Option<&'static str> {
        (self.version == OvfVersion::V0_9).then_some("VirtualSystem_Type")
    }

    /// True if `element` is the given section.
    pub fn is_section(&self, element: &crate::xml::Element, section: Section) -> bool {
        let name = self.section(section);
        if element.name != name.element {
            return false;
        }
        match &name.xsi_type {
            None => true,
            Some(expected) => element
                .attr(&self.xsi_type())
                .map(|t| t.rsplit(':').next() == Some(expected.as_str()))
                .unwrap_or(false),
        }
    }

    /// True if `element` is a virtual system (not a collection).
    pub fn is_virtual_system(&self, element: &crate::xml::Element) -> bool {
        if element.name != self.tag(Tag::VirtualSystem) {
            return false;
        }
        match self.virtual_system_xsi_type() {
            None => true,
            Some(expected) => element
                .attr(&self.xsi_type())
                .map(|t| t.rsplit(':').next() == Some(expected))
                .unwrap_or(false),
        }
    }

    /// Local name of a standard item field.
    pub fn field(&self, field: ItemField) -> &'static str {
        let legacy = self.version == OvfVersion::V0_9;
        match field {
            ItemField::Address => "Address",
            ItemField::AddressOnParent => "AddressOnParent",
            ItemField::AllocationUnits => "AllocationUnits",
            ItemField::AutomaticAllocation => "AutomaticAllocation",
            ItemField::Connection => "Connection",
            ItemField::Description => "Description",
            ItemField::ElementName if legacy => "Caption",
            ItemField::ElementName => "ElementName",
            ItemField::HostResource => "HostResource",
            ItemField::InstanceId if legacy => "InstanceId",
            ItemField::InstanceId => "InstanceID",
            ItemField::Parent => "Parent",
            ItemField::ResourceSubType => "ResourceSubType",
            ItemField::ResourceType => "ResourceType",
            ItemField::VirtualQuantity => "VirtualQuantity",
        }
    }

    /// Schema order of item child fields.
    pub fn item_children(&self) -> &'static [&'static str] {
        if self.version == OvfVersion::V0_9 {
            ITEM_CHILDREN_V0_9
        } else {
            ITEM_CHILDREN
        }
    }

    /// The item namespace actually available in this version.
    pub fn effective_item_namespace(&self, ns: ItemNamespace) -> ItemNamespace {
        if self.version == OvfVersion::V2 {
            ns
        } else {
            ItemNamespace::Generic
        }
    }

    /// Element tag for an item of the given namespace.
    pub fn item_tag(&self, ns: ItemNamespace) -> QName {
        let local = match self.effective_item_namespace(ns) {
            ItemNamespace::Generic => "Item",
            ItemNamespace::Storage => "StorageItem",
            ItemNamespace::Ethernet => "EthernetPortItem",
        };
        QName::new(self.ovf_ns(), local)
    }

    /// Namespace of the child fields of an item.
    pub fn item_field_ns(&self, ns: ItemNamespace) -> &'static str {
        match self.effective_item_namespace(ns) {
            ItemNamespace::Generic => RASD_NS,
            ItemNamespace::Storage => SASD_NS,
            ItemNamespace::Ethernet => EPASD_NS,
        }
    }

    /// Classify an item tag.
    pub fn item_namespace_for_tag(&self, tag: &QName) -> Result<ItemNamespace> {
        [ItemNamespace::Generic, ItemNamespace::Storage, ItemNamespace::Ethernet]
            .into_iter()
            .find(|ns| self.item_tag(*ns) == *tag)
            .ok_or_else(|| {
                Error::unsupported(format!(
                    "'{}' is not a hardware item in any known namespace for OVF {}",
                    tag, self.version
                ))
            })
    }

    /// Namespace new items of this kind are created in.
    pub fn item_namespace_for_kind(&self, kind: ResourceKind) -> ItemNamespace {
        let ns = match kind {
            ResourceKind::Ethernet => ItemNamespace::Ethernet,
            ResourceKind::Harddisk => ItemNamespace::Storage,
            _ => ItemNamespace::Generic,
        };
        self.effective_item_namespace(ns)
    }

    /// Memory allocation units string.
    pub fn memory_units(&self) -> &'static str {
        if self.version == OvfVersion::V0_9 {
            "MegaBytes"
        } else {
            "byte * 2^20"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::Element;

    #[test]
    fn test_version_detection() {
        assert_eq!(OvfVersion::from_namespace(OVF_V0_9_NS), Some(OvfVersion::V0_9));
        assert_eq!(OvfVersion::from_namespace(OVF_V1_NS), Some(OvfVersion::V1));
        assert_eq!(OvfVersion::from_namespace(OVF_V2_NS), Some(OvfVersion::V2));
        assert_eq!(OvfVersion::from_namespace("urn:other"), None);
        assert!(!OvfVersion::V0_9.supports_profiles());
        assert!(OvfVersion::V1.supports_profiles());
    }

    #[test]
    fn test_resource_codes() {
        assert_eq!(ResourceKind::Cpu.code(), "3");
        assert_eq!(ResourceKind::Ethernet.code(), "10");
        assert_eq!(ResourceKind::Harddisk.code(), "17");
        assert_eq!(ResourceKind::from_code("21"), Some(ResourceKind::Serial));
        assert_eq!(ResourceKind::from_code(" 6 "), Some(ResourceKind::Scsi));
        assert_eq!(ResourceKind::from_code("99"), None);
        assert_eq!("CDROM".parse::<ResourceKind>().unwrap(), ResourceKind::Cdrom);
        assert!("gpu".parse::<ResourceKind>().is_err());
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_code(kind.code()), Some(kind));
        }
    }

    #[test]
    fn test_field_names_per_version() {
        let v09 = NameResolver::new(OvfVersion::V0_9);
        let v1 = NameResolver::new(OvfVersion::V1);
        assert_eq!(v09.field(ItemField::InstanceId), "InstanceId");
        assert_eq!(v1.field(ItemField::InstanceId), "InstanceID");
        assert_eq!(v09.field(ItemField::ElementName), "Caption");
        assert_eq!(v1.field(ItemField::ElementName), "ElementName");
        assert_eq!(v09.item_children()[0], "Caption");
        assert_eq!(v1.item_children()[0], "Address");
    }

    #[test]
    fn test_item_namespaces_only_split_in_v2() {
        let v1 = NameResolver::new(OvfVersion::V1);
        let v2 = NameResolver::new(OvfVersion::V2);

        assert_eq!(v1.item_tag(ItemNamespace::Ethernet), QName::new(OVF_V1_NS, "Item"));
        assert_eq!(v1.item_field_ns(ItemNamespace::Storage), RASD_NS);
        assert_eq!(v1.item_namespace_for_kind(ResourceKind::Ethernet), ItemNamespace::Generic);

        assert_eq!(
            v2.item_tag(ItemNamespace::Ethernet),
            QName::new(OVF_V2_NS, "EthernetPortItem")
        );
        assert_eq!(v2.item_field_ns(ItemNamespace::Storage), SASD_NS);
        assert_eq!(
            v2.item_namespace_for_tag(&QName::new(OVF_V2_NS, "StorageItem")).unwrap(),
            ItemNamespace::Storage
        );
        assert_eq!(v2.item_namespace_for_kind(ResourceKind::Cpu), ItemNamespace::Generic);
    }

    #[test]
    fn test_unknown_item_tag_is_unsupported() {
        let v1 = NameResolver::new(OvfVersion::V1);
        let err = v1
            .item_namespace_for_tag(&QName::new(OVF_V1_NS, "StorageItem"))
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
        assert!(v1.item_namespace_for_tag(&QName::new(OVF_V2_NS, "Item")).is_err());
    }

    #[test]
    fn test_sections_in_v0_9_use_xsi_type() {
        let v09 = NameResolver::new(OvfVersion::V0_9);
        let disk = v09.section(Section::Disk);
        assert_eq!(disk.element, QName::new(OVF_V0_9_NS, "Section"));
        assert_eq!(disk.xsi_type.as_deref(), Some("DiskSection_Type"));

        let element = Element::new(disk.element.clone())
            .with_attr(v09.xsi_type(), "ovf:DiskSection_Type");
        assert!(v09.is_section(&element, Section::Disk));
        assert!(!v09.is_section(&element, Section::Network));

        let v1 = NameResolver::new(OvfVersion::V1);
        let section = Element::new(QName::new(OVF_V1_NS, "NetworkSection"));
        assert!(v1.is_section(&section, Section::Network));
    }

    #[test]
    fn test_virtual_system_names() {
        let v09 = NameResolver::new(OvfVersion::V0_9);
        let content = Element::new(QName::new(OVF_V0_9_NS, "Content"))
            .with_attr(v09.xsi_type(), "ovf:VirtualSystem_Type");
        assert!(v09.is_virtual_system(&content));
        let collection = Element::new(QName::new(OVF_V0_9_NS, "Content"))
            .with_attr(v09.xsi_type(), "ovf:VirtualSystemCollection_Type");
        assert!(!v09.is_virtual_system(&collection));

        let v2 = NameResolver::new(OvfVersion::V2);
        assert!(v2.is_virtual_system(&Element::new(QName::new(OVF_V2_NS, "VirtualSystem"))));
    }
}
