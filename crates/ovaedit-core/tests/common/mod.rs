//! Descriptor fixtures shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use ovaedit_core::ova::OvaWriter;

/// 1 GiB, in 512-byte sectors.
pub const DISK_SECTORS: u64 = 2 * 1024 * 1024;

/// A 1.x descriptor with two profiles, a CPU that differs per profile,
/// memory, a SCSI disk and two NICs.
pub const DESCRIPTOR_V1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- generated by a test fixture -->
<Envelope xmlns="http://schemas.dmtf.org/ovf/envelope/1" xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1" xmlns:rasd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData" xmlns:vssd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_VirtualSystemSettingData" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <References>
    <File ovf:href="disk.vmdk" ovf:id="file1" ovf:size="512"/>
  </References>
  <DiskSection>
    <Info>Virtual disk information</Info>
    <Disk ovf:capacity="1" ovf:capacityAllocationUnits="byte * 2^30" ovf:diskId="vmdisk1" ovf:fileRef="file1" ovf:format="http://www.vmware.com/interfaces/specifications/vmdk.html#streamOptimized"/>
  </DiskSection>
  <NetworkSection>
    <Info>The list of logical networks</Info>
    <Network ovf:name="VM Network">
      <Description>The VM Network network</Description>
    </Network>
    <Network ovf:name="Unused">
      <Description>Nothing connects here</Description>
    </Network>
  </NetworkSection>
  <DeploymentOptionSection>
    <Info>Configuration profiles</Info>
    <Configuration ovf:default="true" ovf:id="small">
      <Label>Small</Label>
      <Description>Small deployment</Description>
    </Configuration>
    <Configuration ovf:id="large">
      <Label>Large</Label>
      <Description>Large deployment</Description>
    </Configuration>
  </DeploymentOptionSection>
  <VirtualSystem ovf:id="test-vm">
    <Info>A virtual machine</Info>
    <Name>test-vm</Name>
    <ProductSection ovf:class="com.example.appliance">
      <Info>Product information</Info>
      <Product>Example Appliance</Product>
      <Vendor>Example Corp</Vendor>
      <Version>1.0</Version>
      <Property ovf:key="hostname" ovf:qualifiers="MaxLen(8)" ovf:type="string" ovf:userConfigurable="true" ovf:value="appl">
        <Label>Hostname</Label>
        <Description>Guest host name</Description>
      </Property>
      <Property ovf:key="port" ovf:type="uint16" ovf:value="22"/>
    </ProductSection>
    <AnnotationSection>
      <Info>An annotation on this virtual machine</Info>
      <Annotation>Built for testing</Annotation>
    </AnnotationSection>
    <EulaSection>
      <Info>End-user license agreement</Info>
      <License>Use at your own risk.</License>
    </EulaSection>
    <VirtualHardwareSection>
      <Info>Virtual hardware requirements</Info>
      <System>
        <vssd:ElementName>Virtual Hardware Family</vssd:ElementName>
        <vssd:InstanceID>0</vssd:InstanceID>
        <vssd:VirtualSystemType>vmx-13</vssd:VirtualSystemType>
      </System>
      <Item>
        <rasd:AllocationUnits>hertz * 10^6</rasd:AllocationUnits>
        <rasd:Description>Number of Virtual CPUs</rasd:Description>
        <rasd:ElementName>1 virtual CPU(s)</rasd:ElementName>
        <rasd:InstanceID>1</rasd:InstanceID>
        <rasd:ResourceType>3</rasd:ResourceType>
        <rasd:VirtualQuantity>1</rasd:VirtualQuantity>
      </Item>
      <Item ovf:configuration="large">
        <rasd:AllocationUnits>hertz * 10^6</rasd:AllocationUnits>
        <rasd:Description>Number of Virtual CPUs</rasd:Description>
        <rasd:ElementName>2 virtual CPU(s)</rasd:ElementName>
        <rasd:InstanceID>1</rasd:InstanceID>
        <rasd:ResourceType>3</rasd:ResourceType>
        <rasd:VirtualQuantity>2</rasd:VirtualQuantity>
      </Item>
      <Item>
        <rasd:AllocationUnits>byte * 2^20</rasd:AllocationUnits>
        <rasd:Description>Memory Size</rasd:Description>
        <rasd:ElementName>1024MB of memory</rasd:ElementName>
        <rasd:InstanceID>2</rasd:InstanceID>
        <rasd:ResourceType>4</rasd:ResourceType>
        <rasd:VirtualQuantity>1024</rasd:VirtualQuantity>
      </Item>
      <Item>
        <rasd:Address>0</rasd:Address>
        <rasd:Description>SCSI Controller</rasd:Description>
        <rasd:ElementName>SCSI Controller 0</rasd:ElementName>
        <rasd:InstanceID>3</rasd:InstanceID>
        <rasd:ResourceSubType>lsilogic</rasd:ResourceSubType>
        <rasd:ResourceType>6</rasd:ResourceType>
      </Item>
      <Item>
        <rasd:AddressOnParent>0</rasd:AddressOnParent>
        <rasd:ElementName>Hard Disk 1</rasd:ElementName>
        <rasd:HostResource>ovf:/disk/vmdisk1</rasd:HostResource>
        <rasd:InstanceID>4</rasd:InstanceID>
        <rasd:Parent>3</rasd:Parent>
        <rasd:ResourceType>17</rasd:ResourceType>
      </Item>
      <Item>
        <rasd:AddressOnParent>7</rasd:AddressOnParent>
        <rasd:AutomaticAllocation>true</rasd:AutomaticAllocation>
        <rasd:Connection>VM Network</rasd:Connection>
        <rasd:ElementName>Network adapter 1</rasd:ElementName>
        <rasd:InstanceID>5</rasd:InstanceID>
        <rasd:ResourceSubType>E1000</rasd:ResourceSubType>
        <rasd:ResourceType>10</rasd:ResourceType>
      </Item>
      <Item>
        <rasd:AddressOnParent>8</rasd:AddressOnParent>
        <rasd:AutomaticAllocation>true</rasd:AutomaticAllocation>
        <rasd:Connection>VM Network</rasd:Connection>
        <rasd:ElementName>Network adapter 2</rasd:ElementName>
        <rasd:InstanceID>6</rasd:InstanceID>
        <rasd:ResourceSubType>E1000</rasd:ResourceSubType>
        <rasd:ResourceType>10</rasd:ResourceType>
      </Item>
    </VirtualHardwareSection>
  </VirtualSystem>
</Envelope>
"#;

/// A VMware 0.9 descriptor: generic sections, no configuration profiles.
pub const DESCRIPTOR_V0_9: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope xmlns="http://www.vmware.com/schema/ovf/1/envelope" xmlns:ovf="http://www.vmware.com/schema/ovf/1/envelope" xmlns:rasd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <References/>
  <Content ovf:id="legacy" xsi:type="ovf:VirtualSystem_Type">
    <Info>A legacy virtual machine</Info>
    <Section xsi:type="ovf:VirtualHardwareSection_Type">
      <Info>Virtual hardware</Info>
      <Item>
        <rasd:Caption>1 virtual CPU</rasd:Caption>
        <rasd:InstanceId>1</rasd:InstanceId>
        <rasd:ResourceType>3</rasd:ResourceType>
        <rasd:VirtualQuantity>1</rasd:VirtualQuantity>
      </Item>
    </Section>
  </Content>
</Envelope>
"#;

/// A 1 GiB stream-optimized VMDK: just the sparse header.
pub fn stream_optimized_vmdk() -> Vec<u8> {
    let mut data = vec![0u8; 512];
    data[0..4].copy_from_slice(b"KDMV");
    data[4..8].copy_from_slice(&3u32.to_le_bytes());
    let flags: u32 = (1 << 16) | (1 << 17) | 1;
    data[8..12].copy_from_slice(&flags.to_le_bytes());
    data[12..20].copy_from_slice(&DISK_SECTORS.to_le_bytes());
    data[20..28].copy_from_slice(&128u64.to_le_bytes());
    data
}

/// A minimal ISO 9660 image: the primary volume descriptor magic at 0x8001.
pub fn iso_image() -> Vec<u8> {
    let mut data = vec![0u8; 0x8800];
    data[0x8000] = 1;
    data[0x8001..0x8006].copy_from_slice(b"CD001");
    data
}

/// Write the 1.x fixture and its disk into `dir`; returns the descriptor path.
pub fn write_package_dir(dir: &Path) -> PathBuf {
    fs::write(dir.join("disk.vmdk"), stream_optimized_vmdk()).unwrap();
    let descriptor = dir.join("test-vm.ovf");
    fs::write(&descriptor, DESCRIPTOR_V1).unwrap();
    descriptor
}

/// Write the 1.x fixture as an archive at `path`.
pub fn write_package_archive(path: &Path) {
    let file = fs::File::create(path).unwrap();
    let mut writer = OvaWriter::new(file).unwrap();
    writer.add_file("test-vm.ovf", DESCRIPTOR_V1.as_bytes()).unwrap();
    writer.add_file("disk.vmdk", &stream_optimized_vmdk()).unwrap();
    writer.finish().unwrap();
}
