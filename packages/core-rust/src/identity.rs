//! Member, subsystem and service identifiers.
//!
//! # Canonical string form
//!
//! Identifiers use `/` as the segment delimiter and never carry the
//! `objectType` in the string:
//!
//! - client: `INSTANCE/MEMBER_CLASS/MEMBER_CODE/SUBSYSTEM_CODE`
//! - service: `INSTANCE/MEMBER_CLASS/MEMBER_CODE/SUBSYSTEM_CODE/SERVICE_CODE/SERVICE_VERSION`
//! - central service: `INSTANCE/SERVICE_CODE`
//!
//! Segments must be non-empty and cannot contain `/`. The dotted convention
//! seen in some deployments is not accepted.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const DELIMITER: char = '/';

/// The `objectType` attribute carried by every identity element on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Member,
    #[default]
    Subsystem,
    Service,
    #[serde(rename = "CENTRALSERVICE")]
    CentralService,
}

impl ObjectType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Member => "MEMBER",
            Self::Subsystem => "SUBSYSTEM",
            Self::Service => "SERVICE",
            Self::CentralService => "CENTRALSERVICE",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MEMBER" => Ok(Self::Member),
            "SUBSYSTEM" => Ok(Self::Subsystem),
            "SERVICE" => Ok(Self::Service),
            "CENTRALSERVICE" => Ok(Self::CentralService),
            other => Err(ValidationError::ObjectType(other.to_string())),
        }
    }
}

/// Splits `input` into exactly `N` non-empty segments.
fn split_segments<'a, const N: usize>(
    kind: &'static str,
    input: &'a str,
) -> Result<[&'a str; N], ValidationError> {
    let parts: Vec<&str> = input.split(DELIMITER).collect();
    let segments: [&str; N] =
        parts
            .as_slice()
            .try_into()
            .map_err(|_| ValidationError::SegmentCount {
                kind,
                input: input.to_string(),
                expected: N,
                found: parts.len(),
            })?;
    if let Some(index) = segments.iter().position(|s| s.is_empty()) {
        return Err(ValidationError::EmptySegment {
            kind,
            input: input.to_string(),
            index,
        });
    }
    Ok(segments)
}

// ---------------------------------------------------------------------------
// ClientIdentity
// ---------------------------------------------------------------------------

/// A member organization's subsystem acting as caller or service owner.
///
/// Equality compares the four identity fields and ignores `object_type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    #[serde(default)]
    pub object_type: ObjectType,
    #[serde(rename = "xRoadInstance")]
    pub instance: String,
    pub member_class: String,
    pub member_code: String,
    #[serde(default)]
    pub subsystem_code: String,
}

impl ClientIdentity {
    #[must_use]
    pub fn new(
        instance: impl Into<String>,
        member_class: impl Into<String>,
        member_code: impl Into<String>,
        subsystem_code: impl Into<String>,
    ) -> Self {
        Self {
            object_type: ObjectType::Subsystem,
            instance: instance.into(),
            member_class: member_class.into(),
            member_code: member_code.into(),
            subsystem_code: subsystem_code.into(),
        }
    }

    /// Parses `INSTANCE/MEMBER_CLASS/MEMBER_CODE/SUBSYSTEM_CODE`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the segment count is not 4 or a
    /// segment is empty.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let [instance, class, code, subsystem] = split_segments::<4>("client", s)?;
        Ok(Self::new(instance, class, code, subsystem))
    }

    /// Canonical `/`-separated form, the inverse of [`ClientIdentity::parse`].
    #[must_use]
    pub fn fqdn(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.instance, self.member_class, self.member_code, self.subsystem_code
        )
    }

    /// True when both identities belong to the same member organization.
    #[must_use]
    pub fn same_member(&self, other: &Self) -> bool {
        self.instance == other.instance
            && self.member_class == other.member_class
            && self.member_code == other.member_code
    }
}

impl PartialEq for ClientIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.same_member(other) && self.subsystem_code == other.subsystem_code
    }
}

impl Eq for ClientIdentity {}

impl Hash for ClientIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.instance.hash(state);
        self.member_class.hash(state);
        self.member_code.hash(state);
        self.subsystem_code.hash(state);
    }
}

impl FromStr for ClientIdentity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqdn())
    }
}

// ---------------------------------------------------------------------------
// ServiceIdentity
// ---------------------------------------------------------------------------

/// An operation offered by a provider subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceIdentity {
    #[serde(default = "service_object_type")]
    pub object_type: ObjectType,
    #[serde(rename = "xRoadInstance")]
    pub instance: String,
    pub member_class: String,
    pub member_code: String,
    #[serde(default)]
    pub subsystem_code: String,
    #[serde(default)]
    pub service_code: String,
    #[serde(default)]
    pub service_version: String,
}

fn service_object_type() -> ObjectType {
    ObjectType::Service
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            object_type: ObjectType::Service,
            instance: String::new(),
            member_class: String::new(),
            member_code: String::new(),
            subsystem_code: String::new(),
            service_code: String::new(),
            service_version: String::new(),
        }
    }
}

impl ServiceIdentity {
    #[must_use]
    pub fn new(
        provider: &ClientIdentity,
        service_code: impl Into<String>,
        service_version: impl Into<String>,
    ) -> Self {
        Self {
            object_type: ObjectType::Service,
            instance: provider.instance.clone(),
            member_class: provider.member_class.clone(),
            member_code: provider.member_code.clone(),
            subsystem_code: provider.subsystem_code.clone(),
            service_code: service_code.into(),
            service_version: service_version.into(),
        }
    }

    /// Parses the six-segment service form.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the segment count is not 6 or a
    /// segment is empty.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let [instance, class, code, subsystem, service_code, version] =
            split_segments::<6>("service", s)?;
        Ok(Self::new(
            &ClientIdentity::new(instance, class, code, subsystem),
            service_code,
            version,
        ))
    }

    #[must_use]
    pub fn fqdn(&self) -> String {
        format!(
            "{}/{}/{}",
            self.provider().fqdn(),
            self.service_code,
            self.service_version
        )
    }

    /// The subsystem that owns this service.
    #[must_use]
    pub fn provider(&self) -> ClientIdentity {
        ClientIdentity::new(
            self.instance.clone(),
            self.member_class.clone(),
            self.member_code.clone(),
            self.subsystem_code.clone(),
        )
    }
}

impl PartialEq for ServiceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.provider() == other.provider()
            && self.service_code == other.service_code
            && self.service_version == other.service_version
    }
}

impl Eq for ServiceIdentity {}

impl FromStr for ServiceIdentity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqdn())
    }
}

// ---------------------------------------------------------------------------
// CentralServiceIdentity
// ---------------------------------------------------------------------------

/// A shared service addressed by instance, not routed to a single member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CentralServiceIdentity {
    #[serde(rename = "xRoadInstance")]
    pub instance: String,
    pub service_code: String,
}

impl CentralServiceIdentity {
    #[must_use]
    pub fn new(instance: impl Into<String>, service_code: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            service_code: service_code.into(),
        }
    }

    /// Parses `INSTANCE/SERVICE_CODE`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the segment count is not 2 or a
    /// segment is empty.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let [instance, service_code] = split_segments::<2>("central service", s)?;
        Ok(Self::new(instance, service_code))
    }

    #[must_use]
    pub fn fqdn(&self) -> String {
        format!("{}/{}", self.instance, self.service_code)
    }
}

impl FromStr for CentralServiceIdentity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CentralServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqdn())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parses_client_fqdn() {
        let client = ClientIdentity::parse("FI/GOV/0245437-2/ServiceProvider").unwrap();
        assert_eq!(client.instance, "FI");
        assert_eq!(client.member_class, "GOV");
        assert_eq!(client.member_code, "0245437-2");
        assert_eq!(client.subsystem_code, "ServiceProvider");
        assert_eq!(client.object_type, ObjectType::Subsystem);
    }

    #[test]
    fn client_rejects_wrong_segment_count() {
        let err = ClientIdentity::parse("FI/GOV/0245437-2").unwrap_err();
        assert_eq!(
            err,
            ValidationError::SegmentCount {
                kind: "client",
                input: "FI/GOV/0245437-2".to_string(),
                expected: 4,
                found: 3,
            }
        );
        assert!(ClientIdentity::parse("FI/GOV/1/a/b").is_err());
        assert!(ClientIdentity::parse("").is_err());
    }

    #[test]
    fn dotted_form_is_not_accepted() {
        assert!(ClientIdentity::parse("FI.GOV.0245437-2.ServiceProvider").is_err());
    }

    #[test]
    fn client_rejects_empty_segment() {
        let err = ClientIdentity::parse("FI//1/sub").unwrap_err();
        assert!(matches!(err, ValidationError::EmptySegment { index: 1, .. }));
    }

    #[test]
    fn parses_service_fqdn() {
        let svc = ServiceIdentity::parse("FI/COM/111/Provider/getRandom/v1").unwrap();
        assert_eq!(svc.service_code, "getRandom");
        assert_eq!(svc.service_version, "v1");
        assert_eq!(svc.object_type, ObjectType::Service);
        assert_eq!(svc.provider(), ClientIdentity::new("FI", "COM", "111", "Provider"));
    }

    #[test]
    fn service_rejects_client_arity() {
        assert!(matches!(
            ServiceIdentity::parse("FI/COM/111/Provider"),
            Err(ValidationError::SegmentCount { expected: 6, found: 4, .. })
        ));
    }

    #[test]
    fn central_service_round_trips() {
        let central = CentralServiceIdentity::parse("FI/populationRegister").unwrap();
        assert_eq!(central.service_code, "populationRegister");
        assert_eq!(central.to_string(), "FI/populationRegister");
    }

    #[test]
    fn same_member_ignores_subsystem() {
        let a = ClientIdentity::new("FI", "GOV", "1", "a");
        let b = ClientIdentity::new("FI", "GOV", "1", "b");
        let c = ClientIdentity::new("FI", "COM", "1", "a");
        assert!(a.same_member(&b));
        assert_ne!(a, b);
        assert!(!a.same_member(&c));
    }

    #[test]
    fn equality_ignores_object_type() {
        let a = ClientIdentity::new("FI", "GOV", "1", "a");
        let mut b = a.clone();
        b.object_type = ObjectType::Member;
        assert_eq!(a, b);
    }

    #[test]
    fn object_type_parses_wire_names() {
        assert_eq!("CENTRALSERVICE".parse::<ObjectType>().unwrap(), ObjectType::CentralService);
        assert!("subsystem".parse::<ObjectType>().is_err());
    }

    #[test]
    fn client_deserializes_from_config_json() {
        let json = r#"{"objectType":"SUBSYSTEM","xRoadInstance":"FI","memberClass":"GOV","memberCode":"1","subsystemCode":"sub"}"#;
        let client: ClientIdentity = serde_json::from_str(json).unwrap();
        assert_eq!(client.fqdn(), "FI/GOV/1/sub");
    }

    fn segment() -> impl Strategy<Value = String> {
        "[A-Za-z0-9._-]{1,12}"
    }

    proptest! {
        #[test]
        fn client_format_inverts_parse(parts in prop::collection::vec(segment(), 4)) {
            let s = parts.join("/");
            let client = ClientIdentity::parse(&s).unwrap();
            prop_assert_eq!(client.to_string(), s);
        }

        #[test]
        fn service_format_inverts_parse(parts in prop::collection::vec(segment(), 6)) {
            let s = parts.join("/");
            let svc = ServiceIdentity::parse(&s).unwrap();
            prop_assert_eq!(svc.to_string(), s);
        }

        #[test]
        fn wrong_arity_never_parses(parts in prop::collection::vec(segment(), 1..10usize)) {
            let s = parts.join("/");
            prop_assert_eq!(ClientIdentity::parse(&s).is_ok(), parts.len() == 4);
            prop_assert_eq!(ServiceIdentity::parse(&s).is_ok(), parts.len() == 6);
        }
    }
}
