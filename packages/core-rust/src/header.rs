//! Protocol header carried in every envelope.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::envelope::{IDENTIFIERS_NS, SOAP_ENV_NS, XROAD_NS};
use crate::error::ParseError;
use crate::identity::{CentralServiceIdentity, ClientIdentity, ObjectType, ServiceIdentity};
use crate::xml::Element;

/// Protocol version filled in when a header leaves it empty.
pub const DEFAULT_PROTOCOL_VERSION: &str = "4.0";

/// Identity and routing fields of one request or response.
///
/// A valid invocation header names exactly one of `service` and
/// `central_service`; see [`MessageHeader::target`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub central_service: Option<CentralServiceIdentity>,
    #[serde(default)]
    pub client: ClientIdentity,
}

/// The operation a header invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Service(&'a ServiceIdentity),
    Central(&'a CentralServiceIdentity),
}

impl Target<'_> {
    #[must_use]
    pub fn service_code(&self) -> &str {
        match self {
            Self::Service(s) => &s.service_code,
            Self::Central(c) => &c.service_code,
        }
    }
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(s) => write!(f, "service {s}"),
            Self::Central(c) => write!(f, "centralService {c}"),
        }
    }
}

impl MessageHeader {
    /// Starts a builder seeded with this header's values.
    #[must_use]
    pub fn to_builder(&self) -> HeaderBuilder {
        HeaderBuilder {
            header: self.clone(),
        }
    }

    /// Resolves which operation this header invokes.
    ///
    /// When both `service` and `central_service` are present the central
    /// service wins and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Header`] when neither is present.
    pub fn target(&self) -> Result<Target<'_>, ParseError> {
        match (&self.service, &self.central_service) {
            (Some(service), Some(central)) => {
                warn!(
                    id = %self.id,
                    service = %service,
                    central_service = %central,
                    "header names both service and centralService, using centralService"
                );
                Ok(Target::Central(central))
            }
            (None, Some(central)) => Ok(Target::Central(central)),
            (Some(service), None) => Ok(Target::Service(service)),
            (None, None) => Err(ParseError::Header(
                "one of service or centralService is required".into(),
            )),
        }
    }

    pub(crate) fn to_element(&self) -> Element {
        let mut header = Element::new(Some(SOAP_ENV_NS), "Header")
            .with_child(text_element("protocolVersion", &self.protocol_version))
            .with_child(text_element("id", &self.id))
            .with_child(text_element("userId", &self.user_id));
        if let Some(target_user_id) = &self.target_user_id {
            header.push_child(text_element("targetUserId", target_user_id));
        }
        if let Some(issue) = &self.issue {
            header.push_child(text_element("issue", issue));
        }
        if let Some(service) = &self.service {
            header.push_child(service_element(service));
        }
        if let Some(central) = &self.central_service {
            header.push_child(central_element(central));
        }
        header.with_child(client_element(&self.client))
    }

    /// Decodes the SOAP `Header` element. Elements outside the protocol
    /// namespace with unknown names are ignored; protocol field names in the
    /// wrong namespace are rejected.
    pub(crate) fn from_element(el: &Element) -> Result<Self, ParseError> {
        let mut header = Self::default();
        for child in el.elements() {
            if !is_header_field(&child.name) {
                continue;
            }
            expect_ns(child, XROAD_NS)?;
            match child.name.as_str() {
                "protocolVersion" => header.protocol_version = child.text(),
                "id" => header.id = child.text(),
                "userId" => header.user_id = child.text(),
                "targetUserId" => header.target_user_id = Some(child.text()),
                "issue" => header.issue = Some(child.text()),
                "service" => header.service = Some(parse_service(child)?),
                "centralService" => header.central_service = Some(parse_central(child)?),
                "client" => header.client = parse_client(child)?,
                _ => {}
            }
        }
        Ok(header)
    }
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v: {}, id: {}, userId: {}, client: [{}]",
            self.protocol_version, self.id, self.user_id, self.client
        )?;
        if let Some(service) = &self.service {
            write!(f, ", service: [{service}]")?;
        }
        if let Some(central) = &self.central_service {
            write!(f, ", centralService: [{central}]")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HeaderBuilder
// ---------------------------------------------------------------------------

/// Derives a new header from a base plus overrides.
///
/// The base is copied on construction, so a header shared between callers is
/// never modified.
#[derive(Debug, Clone, Default)]
pub struct HeaderBuilder {
    header: MessageHeader,
}

impl HeaderBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.header.protocol_version = version.into();
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.header.id = id.into();
        self
    }

    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.header.user_id = user_id.into();
        self
    }

    #[must_use]
    pub fn target_user_id(mut self, target_user_id: impl Into<String>) -> Self {
        self.header.target_user_id = Some(target_user_id.into());
        self
    }

    #[must_use]
    pub fn issue(mut self, issue: impl Into<String>) -> Self {
        self.header.issue = Some(issue.into());
        self
    }

    #[must_use]
    pub fn client(mut self, client: ClientIdentity) -> Self {
        self.header.client = client;
        self
    }

    /// Targets a member service and clears any central service.
    #[must_use]
    pub fn service(mut self, service: ServiceIdentity) -> Self {
        self.header.service = Some(service);
        self.header.central_service = None;
        self
    }

    /// Targets a central service and clears any member service.
    #[must_use]
    pub fn central_service(mut self, central: CentralServiceIdentity) -> Self {
        self.header.central_service = Some(central);
        self.header.service = None;
        self
    }

    /// Overrides the code of the member service, keeping its provider.
    /// Any central service target is dropped.
    #[must_use]
    pub fn service_code(mut self, code: impl Into<String>) -> Self {
        self.member_service().service_code = code.into();
        self
    }

    #[must_use]
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.member_service().service_version = version.into();
        self
    }

    fn member_service(&mut self) -> &mut ServiceIdentity {
        self.header.central_service = None;
        self.header.service.get_or_insert_with(ServiceIdentity::default)
    }

    /// Finishes the header, filling an empty protocol version.
    #[must_use]
    pub fn build(mut self) -> MessageHeader {
        if self.header.protocol_version.is_empty() {
            self.header.protocol_version = DEFAULT_PROTOCOL_VERSION.to_string();
        }
        self.header
    }
}

impl From<&MessageHeader> for HeaderBuilder {
    fn from(header: &MessageHeader) -> Self {
        header.to_builder()
    }
}

// ---------------------------------------------------------------------------
// XML helpers
// ---------------------------------------------------------------------------

fn is_header_field(name: &str) -> bool {
    matches!(
        name,
        "protocolVersion"
            | "id"
            | "userId"
            | "targetUserId"
            | "issue"
            | "service"
            | "centralService"
            | "client"
    )
}

fn expect_ns(el: &Element, expected: &'static str) -> Result<(), ParseError> {
    if el.ns.as_deref() == Some(expected) {
        Ok(())
    } else {
        Err(ParseError::Namespace {
            name: el.name.clone(),
            expected,
            found: el.ns.clone().unwrap_or_default(),
        })
    }
}

fn text_element(name: &str, value: &str) -> Element {
    Element::new(Some(XROAD_NS), name).with_text(value)
}

fn id_element(name: &str, value: &str) -> Element {
    Element::new(Some(IDENTIFIERS_NS), name).with_text(value)
}

fn identity_element(name: &str, object_type: ObjectType) -> Element {
    Element::new(Some(XROAD_NS), name).with_attr(
        Some(IDENTIFIERS_NS),
        "objectType",
        object_type.as_str(),
    )
}

fn client_element(client: &ClientIdentity) -> Element {
    let mut el = identity_element("client", client.object_type)
        .with_child(id_element("xRoadInstance", &client.instance))
        .with_child(id_element("memberClass", &client.member_class))
        .with_child(id_element("memberCode", &client.member_code));
    if !client.subsystem_code.is_empty() {
        el.push_child(id_element("subsystemCode", &client.subsystem_code));
    }
    el
}

fn service_element(service: &ServiceIdentity) -> Element {
    let mut el = identity_element("service", service.object_type)
        .with_child(id_element("xRoadInstance", &service.instance))
        .with_child(id_element("memberClass", &service.member_class))
        .with_child(id_element("memberCode", &service.member_code));
    if !service.subsystem_code.is_empty() {
        el.push_child(id_element("subsystemCode", &service.subsystem_code));
    }
    el.push_child(id_element("serviceCode", &service.service_code));
    if !service.service_version.is_empty() {
        el.push_child(id_element("serviceVersion", &service.service_version));
    }
    el
}

fn central_element(central: &CentralServiceIdentity) -> Element {
    identity_element("centralService", ObjectType::CentralService)
        .with_child(id_element("xRoadInstance", &central.instance))
        .with_child(id_element("serviceCode", &central.service_code))
}

/// Collects the identifier fields of an identity element.
struct IdentityFields {
    object_type: Option<ObjectType>,
    instance: String,
    member_class: String,
    member_code: String,
    subsystem_code: String,
    service_code: String,
    service_version: String,
}

fn identity_fields(el: &Element) -> Result<IdentityFields, ParseError> {
    let object_type = el
        .attr(Some(IDENTIFIERS_NS), "objectType")
        .map(str::parse::<ObjectType>)
        .transpose()?;
    let mut fields = IdentityFields {
        object_type,
        instance: String::new(),
        member_class: String::new(),
        member_code: String::new(),
        subsystem_code: String::new(),
        service_code: String::new(),
        service_version: String::new(),
    };
    for child in el.elements() {
        let slot = match child.name.as_str() {
            "xRoadInstance" => &mut fields.instance,
            "memberClass" => &mut fields.member_class,
            "memberCode" => &mut fields.member_code,
            "subsystemCode" => &mut fields.subsystem_code,
            "serviceCode" => &mut fields.service_code,
            "serviceVersion" => &mut fields.service_version,
            _ => continue,
        };
        expect_ns(child, IDENTIFIERS_NS)?;
        *slot = child.text();
    }
    Ok(fields)
}

fn parse_client(el: &Element) -> Result<ClientIdentity, ParseError> {
    let f = identity_fields(el)?;
    let default_type = if f.subsystem_code.is_empty() {
        ObjectType::Member
    } else {
        ObjectType::Subsystem
    };
    Ok(ClientIdentity {
        object_type: f.object_type.unwrap_or(default_type),
        instance: f.instance,
        member_class: f.member_class,
        member_code: f.member_code,
        subsystem_code: f.subsystem_code,
    })
}

fn parse_service(el: &Element) -> Result<ServiceIdentity, ParseError> {
    let f = identity_fields(el)?;
    Ok(ServiceIdentity {
        object_type: f.object_type.unwrap_or(ObjectType::Service),
        instance: f.instance,
        member_class: f.member_class,
        member_code: f.member_code,
        subsystem_code: f.subsystem_code,
        service_code: f.service_code,
        service_version: f.service_version,
    })
}

fn parse_central(el: &Element) -> Result<CentralServiceIdentity, ParseError> {
    let f = identity_fields(el)?;
    Ok(CentralServiceIdentity {
        instance: f.instance,
        service_code: f.service_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientIdentity {
        ClientIdentity::new("FI", "GOV", "1", "consumer")
    }

    fn service() -> ServiceIdentity {
        ServiceIdentity::parse("FI/COM/2/provider/testService/v1").unwrap()
    }

    #[test]
    fn builder_leaves_base_untouched() {
        let base = HeaderBuilder::new()
            .client(client())
            .service(service())
            .user_id("alice")
            .build();
        let derived = base.to_builder().service_code("other").id("abc").build();

        assert_eq!(base.service.as_ref().unwrap().service_code, "testService");
        assert!(base.id.is_empty());
        assert_eq!(derived.service.as_ref().unwrap().service_code, "other");
        assert_eq!(derived.service.as_ref().unwrap().member_code, "2");
        assert_eq!(derived.id, "abc");
        assert_eq!(derived.user_id, "alice");
    }

    #[test]
    fn build_fills_protocol_version() {
        assert_eq!(HeaderBuilder::new().build().protocol_version, "4.0");
        assert_eq!(
            HeaderBuilder::new().protocol_version("4.1").build().protocol_version,
            "4.1"
        );
    }

    #[test]
    fn service_and_central_service_are_exclusive_in_builder() {
        let header = HeaderBuilder::new()
            .service(service())
            .central_service(CentralServiceIdentity::new("FI", "central"))
            .build();
        assert!(header.service.is_none());
        assert_eq!(header.target().unwrap().service_code(), "central");
    }

    #[test]
    fn service_code_retargets_central_header_to_member_service() {
        let central_base = HeaderBuilder::new()
            .client(client())
            .central_service(CentralServiceIdentity::new("FI", "central"))
            .build();
        let header = HeaderBuilder::from(&central_base)
            .service_code("member-op")
            .service_version("v1")
            .build();

        assert!(header.central_service.is_none());
        let target = header.target().unwrap();
        assert_eq!(target.service_code(), "member-op");
        assert!(matches!(target, Target::Service(s) if s.service_version == "v1"));
        assert!(central_base.central_service.is_some());
    }

    #[test]
    fn target_prefers_central_service() {
        let header = MessageHeader {
            service: Some(service()),
            central_service: Some(CentralServiceIdentity::new("FI", "central")),
            ..MessageHeader::default()
        };
        assert!(matches!(header.target(), Ok(Target::Central(c)) if c.service_code == "central"));
    }

    #[test]
    fn target_requires_one_identity() {
        assert!(matches!(
            MessageHeader::default().target(),
            Err(ParseError::Header(_))
        ));
    }

    #[test]
    fn element_round_trip() {
        let header = HeaderBuilder::new()
            .client(client())
            .service(service())
            .id("id-1")
            .user_id("EE12345")
            .target_user_id("EE999")
            .issue("ticket-7")
            .build();
        let decoded = MessageHeader::from_element(&header.to_element()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.client.object_type, ObjectType::Subsystem);
    }

    #[test]
    fn field_in_wrong_namespace_is_rejected() {
        let el = Element::new(Some(SOAP_ENV_NS), "Header")
            .with_child(Element::new(Some("urn:other"), "userId").with_text("x"));
        assert!(matches!(
            MessageHeader::from_element(&el),
            Err(ParseError::Namespace { name, .. }) if name == "userId"
        ));
    }

    #[test]
    fn foreign_header_blocks_are_ignored() {
        let el = Element::new(Some(SOAP_ENV_NS), "Header")
            .with_child(Element::new(Some("urn:other"), "securityToken").with_text("x"))
            .with_child(text_element("userId", "bob"));
        assert_eq!(MessageHeader::from_element(&el).unwrap().user_id, "bob");
    }

    #[test]
    fn member_client_without_subsystem() {
        let member = ClientIdentity {
            object_type: ObjectType::Member,
            ..ClientIdentity::new("FI", "GOV", "1", "")
        };
        let parsed = parse_client(&client_element(&member)).unwrap();
        assert_eq!(parsed.object_type, ObjectType::Member);
        assert!(parsed.subsystem_code.is_empty());
    }

    #[test]
    fn deserializes_config_style_json() {
        let json = r#"{
            "protocolVersion": "4.0",
            "userId": "u",
            "client": {"xRoadInstance":"FI","memberClass":"GOV","memberCode":"1","subsystemCode":"c"},
            "service": {"xRoadInstance":"FI","memberClass":"COM","memberCode":"2","subsystemCode":"p"}
        }"#;
        let header: MessageHeader = serde_json::from_str(json).unwrap();
        assert_eq!(header.client.fqdn(), "FI/GOV/1/c");
        assert_eq!(header.service.unwrap().object_type, ObjectType::Service);
        assert!(header.central_service.is_none());
    }
}
