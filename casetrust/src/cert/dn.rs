// Distinguished names: the ordered identity attributes of a certificate's
// subject or issuer, and the certificate type they imply.

use bytes::BytesMut;

use crate::cert::serializer::{put_element, read_element};
use crate::error::{CaseTrustError, Result};

/// Maximum number of attributes in one distinguished name.
pub const MAX_DN_ATTRIBUTES: usize = 5;

/// Maximum number of CASE authentication tags in one distinguished name.
pub const MAX_CASE_AUTH_TAGS: usize = 3;

/// Smallest operational node id.
pub const MIN_OPERATIONAL_NODE_ID: u64 = 0x0000_0000_0000_0001;

/// Largest operational node id; ids above it are reserved for groups and
/// temporary local ids.
pub const MAX_OPERATIONAL_NODE_ID: u64 = 0xFFFF_FFEF_FFFF_FFFF;

/// Set on the encoded kind tag of text attributes that use the printable
/// string form.
const PRINTABLE_FLAG: u8 = 0x80;

/// Attribute kinds. Wire tags 0x01..=0x10 carry text, 0x11..=0x15 carry a
/// 64-bit identifier and 0x16 carries a 32-bit CASE authentication tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttributeKind {
    CommonName = 0x01,
    Surname = 0x02,
    SerialNumber = 0x03,
    CountryName = 0x04,
    LocalityName = 0x05,
    StateOrProvinceName = 0x06,
    OrganizationName = 0x07,
    OrganizationalUnitName = 0x08,
    Title = 0x09,
    Name = 0x0A,
    GivenName = 0x0B,
    Initials = 0x0C,
    GenerationQualifier = 0x0D,
    DnQualifier = 0x0E,
    Pseudonym = 0x0F,
    DomainComponent = 0x10,
    NodeId = 0x11,
    FirmwareSigningId = 0x12,
    IntermediateCaId = 0x13,
    RootCaId = 0x14,
    FabricId = 0x15,
    CaseAuthTag = 0x16,
}

impl TryFrom<u8> for AttributeKind {
    type Error = CaseTrustError;

    fn try_from(value: u8) -> Result<Self> {
        use AttributeKind::*;
        let kind = match value {
            0x01 => CommonName,
            0x02 => Surname,
            0x03 => SerialNumber,
            0x04 => CountryName,
            0x05 => LocalityName,
            0x06 => StateOrProvinceName,
            0x07 => OrganizationName,
            0x08 => OrganizationalUnitName,
            0x09 => Title,
            0x0A => Name,
            0x0B => GivenName,
            0x0C => Initials,
            0x0D => GenerationQualifier,
            0x0E => DnQualifier,
            0x0F => Pseudonym,
            0x10 => DomainComponent,
            0x11 => NodeId,
            0x12 => FirmwareSigningId,
            0x13 => IntermediateCaId,
            0x14 => RootCaId,
            0x15 => FabricId,
            0x16 => CaseAuthTag,
            other => {
                return Err(CaseTrustError::UnsupportedFormat(format!(
                    "unknown DN attribute tag 0x{other:02x}"
                )))
            }
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueShape {
    U64,
    U32,
    Text,
}

impl AttributeKind {
    fn shape(self) -> ValueShape {
        match self as u8 {
            0x11..=0x15 => ValueShape::U64,
            0x16 => ValueShape::U32,
            _ => ValueShape::Text,
        }
    }

    /// Kinds that decide what a certificate *is*; at most one may appear.
    pub fn is_identity(self) -> bool {
        matches!(
            self,
            AttributeKind::NodeId
                | AttributeKind::FirmwareSigningId
                | AttributeKind::IntermediateCaId
                | AttributeKind::RootCaId
        )
    }
}

/// The value carried by one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    U64(u64),
    U32(u32),
    Text { value: String, printable: bool },
}

impl AttributeValue {
    fn shape(&self) -> ValueShape {
        match self {
            AttributeValue::U64(_) => ValueShape::U64,
            AttributeValue::U32(_) => ValueShape::U32,
            AttributeValue::Text { .. } => ValueShape::Text,
        }
    }
}

/// One relative distinguished name entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnAttribute {
    pub kind: AttributeKind,
    pub value: AttributeValue,
}

/// What a certificate is, as implied by its subject DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificateType {
    #[default]
    Unspecified,
    Root,
    IntermediateCa,
    OperationalNode,
    FirmwareSigning,
}

pub fn is_operational_node_id(id: u64) -> bool {
    (MIN_OPERATIONAL_NODE_ID..=MAX_OPERATIONAL_NODE_ID).contains(&id)
}

pub fn is_valid_fabric_id(id: u64) -> bool {
    id != 0
}

/// A CASE authentication tag is `identifier:16 || version:16`; version 0 is
/// invalid.
pub fn is_valid_case_auth_tag(tag: u32) -> bool {
    tag & 0xFFFF != 0
}

/// Ordered, bounded sequence of identity attributes. Equality is positional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    attributes: Vec<DnAttribute>,
}

impl DistinguishedName {
    pub fn new() -> Self {
        Self::default()
    }

    /// DN of a root CA certificate.
    pub fn root(rcac_id: u64) -> Result<Self> {
        let mut dn = Self::new();
        dn.add_u64(AttributeKind::RootCaId, rcac_id)?;
        Ok(dn)
    }

    /// DN of an intermediate CA certificate.
    pub fn intermediate(icac_id: u64) -> Result<Self> {
        let mut dn = Self::new();
        dn.add_u64(AttributeKind::IntermediateCaId, icac_id)?;
        Ok(dn)
    }

    /// DN of an operational node certificate.
    pub fn node(node_id: u64, fabric_id: u64) -> Result<Self> {
        let mut dn = Self::new();
        dn.add_u64(AttributeKind::NodeId, node_id)?;
        dn.add_u64(AttributeKind::FabricId, fabric_id)?;
        Ok(dn)
    }

    /// Append an attribute, enforcing the DN invariants.
    pub fn add_attribute(&mut self, kind: AttributeKind, value: AttributeValue) -> Result<()> {
        if kind.shape() != value.shape() {
            return Err(CaseTrustError::InvalidArgument(format!(
                "{kind:?} does not accept a {:?} value",
                value.shape()
            )));
        }
        if self.attributes.len() >= MAX_DN_ATTRIBUTES {
            return Err(CaseTrustError::ResourceExhausted(format!(
                "distinguished name holds at most {MAX_DN_ATTRIBUTES} attributes"
            )));
        }

        let duplicate = self.attributes.iter().any(|a| a.kind == kind);
        match (kind, &value) {
            (k, _) if k.is_identity() && duplicate => {
                return Err(CaseTrustError::MalformedIdentity(format!(
                    "second {k:?} attribute"
                )));
            }
            (AttributeKind::NodeId, AttributeValue::U64(id)) if !is_operational_node_id(*id) => {
                return Err(CaseTrustError::InvalidArgument(format!(
                    "node id 0x{id:016x} is outside the operational range"
                )));
            }
            (AttributeKind::FabricId, AttributeValue::U64(id)) => {
                if !is_valid_fabric_id(*id) {
                    return Err(CaseTrustError::InvalidArgument("fabric id 0".into()));
                }
                if duplicate {
                    return Err(CaseTrustError::MalformedIdentity(
                        "second FabricId attribute".into(),
                    ));
                }
            }
            (AttributeKind::CaseAuthTag, AttributeValue::U32(tag)) => {
                if !is_valid_case_auth_tag(*tag) {
                    return Err(CaseTrustError::InvalidArgument(format!(
                        "CASE authentication tag 0x{tag:08x} has version 0"
                    )));
                }
                if self.case_auth_tags().len() >= MAX_CASE_AUTH_TAGS {
                    return Err(CaseTrustError::MalformedIdentity(format!(
                        "more than {MAX_CASE_AUTH_TAGS} CASE authentication tags"
                    )));
                }
            }
            _ => {}
        }

        self.attributes.push(DnAttribute { kind, value });
        Ok(())
    }

    pub fn add_u64(&mut self, kind: AttributeKind, value: u64) -> Result<()> {
        self.add_attribute(kind, AttributeValue::U64(value))
    }

    pub fn add_u32(&mut self, kind: AttributeKind, value: u32) -> Result<()> {
        self.add_attribute(kind, AttributeValue::U32(value))
    }

    pub fn add_text(
        &mut self,
        kind: AttributeKind,
        value: impl Into<String>,
        printable: bool,
    ) -> Result<()> {
        self.add_attribute(
            kind,
            AttributeValue::Text {
                value: value.into(),
                printable,
            },
        )
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn attributes(&self) -> &[DnAttribute] {
        &self.attributes
    }

    /// Derive the certificate type from the identity-defining attributes.
    pub fn certificate_type(&self) -> Result<CertificateType> {
        let mut cert_type = CertificateType::Unspecified;
        let mut has_fabric_id = false;

        for attr in &self.attributes {
            let implied = match attr.kind {
                AttributeKind::NodeId => CertificateType::OperationalNode,
                AttributeKind::FirmwareSigningId => CertificateType::FirmwareSigning,
                AttributeKind::IntermediateCaId => CertificateType::IntermediateCa,
                AttributeKind::RootCaId => CertificateType::Root,
                AttributeKind::FabricId => {
                    has_fabric_id = true;
                    continue;
                }
                _ => continue,
            };
            if cert_type != CertificateType::Unspecified {
                return Err(CaseTrustError::MalformedIdentity(
                    "more than one identity-defining attribute".into(),
                ));
            }
            cert_type = implied;
        }

        if cert_type == CertificateType::OperationalNode && !has_fabric_id {
            return Err(CaseTrustError::MalformedIdentity(
                "operational node DN without a fabric id".into(),
            ));
        }
        Ok(cert_type)
    }

    pub fn node_id(&self) -> Option<u64> {
        self.find_u64(AttributeKind::NodeId)
    }

    pub fn fabric_id(&self) -> Option<u64> {
        self.find_u64(AttributeKind::FabricId)
    }

    pub fn case_auth_tags(&self) -> Vec<u32> {
        self.attributes
            .iter()
            .filter_map(|a| match (a.kind, &a.value) {
                (AttributeKind::CaseAuthTag, AttributeValue::U32(tag)) => Some(*tag),
                _ => None,
            })
            .collect()
    }

    fn find_u64(&self, kind: AttributeKind) -> Option<u64> {
        self.attributes.iter().find_map(|a| match a.value {
            AttributeValue::U64(v) if a.kind == kind => Some(v),
            _ => None,
        })
    }

    /// Append the encoded attributes to `buf`.
    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        for attr in &self.attributes {
            match &attr.value {
                AttributeValue::U64(v) => put_element(buf, attr.kind as u8, &v.to_le_bytes())?,
                AttributeValue::U32(v) => put_element(buf, attr.kind as u8, &v.to_le_bytes())?,
                AttributeValue::Text { value, printable } => {
                    let tag = if *printable {
                        attr.kind as u8 | PRINTABLE_FLAG
                    } else {
                        attr.kind as u8
                    };
                    put_element(buf, tag, value.as_bytes())?;
                }
            }
        }
        Ok(())
    }

    /// Decode a DN from the value of an issuer / subject element.
    pub(crate) fn decode(mut data: &[u8]) -> Result<Self> {
        let mut dn = Self::new();
        while !data.is_empty() {
            let (tag, value) = read_element(&mut data)?;
            let printable = tag & PRINTABLE_FLAG != 0;
            let kind = AttributeKind::try_from(tag & !PRINTABLE_FLAG)?;

            let value = match kind.shape() {
                ValueShape::Text => AttributeValue::Text {
                    value: String::from_utf8(value.to_vec()).map_err(|e| {
                        CaseTrustError::UnsupportedFormat(format!("DN text is not UTF-8: {e}"))
                    })?,
                    printable,
                },
                _ if printable => {
                    return Err(CaseTrustError::UnsupportedFormat(format!(
                        "printable flag on numeric attribute {kind:?}"
                    )));
                }
                ValueShape::U64 => {
                    let raw: [u8; 8] = value.try_into().map_err(|_| {
                        CaseTrustError::UnsupportedFormat(format!("{kind:?} must be 8 bytes"))
                    })?;
                    AttributeValue::U64(u64::from_le_bytes(raw))
                }
                ValueShape::U32 => {
                    let raw: [u8; 4] = value.try_into().map_err(|_| {
                        CaseTrustError::UnsupportedFormat(format!("{kind:?} must be 4 bytes"))
                    })?;
                    AttributeValue::U32(u32::from_le_bytes(raw))
                }
            };
            dn.add_attribute(kind, value)?;
        }
        Ok(dn)
    }
}
