//! SOAP envelope codec.
//!
//! Envelope, `Header` and `Body` live in the SOAP 1.1 envelope namespace,
//! header fields in the X-Road protocol namespace and identifier fields in
//! the identifiers namespace.

use std::io::Write;

use crate::error::{EncodeError, ParseError};
use crate::fault::Fault;
use crate::header::MessageHeader;
use crate::xml::{parse_document, Element, FromXml, ToXml, XmlWriter};
use crate::xop::XOP_NS;

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const XROAD_NS: &str = "http://x-road.eu/xsd/xroad.xsd";
pub const IDENTIFIERS_NS: &str = "http://x-road.eu/xsd/identifiers";

/// Prefixes used when writing envelopes.
pub const PREFIXES: &[(&str, &str)] = &[
    (SOAP_ENV_NS, "soap"),
    (XROAD_NS, "xrd"),
    (IDENTIFIERS_NS, "id"),
    (XOP_NS, "xop"),
];

/// One request or response: header plus a body of type `B`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<B> {
    pub header: MessageHeader,
    pub body: B,
}

impl<B> Envelope<B> {
    #[must_use]
    pub fn new(header: MessageHeader, body: B) -> Self {
        Self { header, body }
    }

    /// A response envelope echoing this envelope's header.
    #[must_use]
    pub fn reply<R>(&self, body: R) -> Envelope<R> {
        Envelope {
            header: self.header.clone(),
            body,
        }
    }

    pub fn map_body<R>(self, f: impl FnOnce(B) -> R) -> Envelope<R> {
        Envelope {
            header: self.header,
            body: f(self.body),
        }
    }
}

impl<B: ToXml> Envelope<B> {
    /// Builds the `Envelope` element tree.
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut body = Element::new(Some(SOAP_ENV_NS), "Body");
        for child in self.body.to_xml() {
            body.push_child(child);
        }
        Element::new(Some(SOAP_ENV_NS), "Envelope")
            .with_child(self.header.to_element())
            .with_child(body)
    }

    /// Writes the envelope as a UTF-8 XML document.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] when the writer fails.
    pub fn write_to<W: Write>(&self, out: W) -> Result<(), EncodeError> {
        write_envelope_element(&self.to_element(), out)
    }

    /// # Errors
    ///
    /// Returns [`EncodeError`] when serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }
}

impl<B: FromXml> Envelope<B> {
    /// Decodes an envelope document.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] on malformed XML, a namespace mismatch on the
    /// envelope structure or header fields, or a body rejected by `B`.
    pub fn decode(input: &[u8]) -> Result<Self, ParseError> {
        let root = parse_document(input)?;
        Self::from_element(&root)
    }

    /// # Errors
    ///
    /// See [`Envelope::decode`].
    pub fn from_element(root: &Element) -> Result<Self, ParseError> {
        expect_envelope_element(root, "Envelope")?;

        let mut header = None;
        let mut body = None;
        for child in root.elements() {
            match child.name.as_str() {
                "Header" => {
                    expect_envelope_element(child, "Header")?;
                    header = Some(MessageHeader::from_element(child)?);
                }
                "Body" => {
                    expect_envelope_element(child, "Body")?;
                    body = Some(child);
                }
                _ => {}
            }
        }
        let body = body.ok_or(ParseError::MissingElement("Body"))?;
        Ok(Self {
            header: header.unwrap_or_default(),
            body: B::from_xml(body)?,
        })
    }
}

/// Writes an already built `Envelope` element as a document.
pub(crate) fn write_envelope_element<W: Write>(root: &Element, out: W) -> Result<(), EncodeError> {
    XmlWriter::new(out, PREFIXES).write_document(root, &[SOAP_ENV_NS, XROAD_NS, IDENTIFIERS_NS])
}

fn expect_envelope_element(el: &Element, name: &'static str) -> Result<(), ParseError> {
    if el.is(Some(SOAP_ENV_NS), name) {
        Ok(())
    } else {
        Err(ParseError::UnexpectedElement {
            expected_ns: SOAP_ENV_NS,
            expected: name,
            found: el.qualified_name(),
        })
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// A response body that is either the expected shape or a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<B> {
    Body(B),
    Fault(Fault),
}

impl<B> Reply<B> {
    /// # Errors
    ///
    /// Returns the fault when the peer answered with one.
    pub fn into_result(self) -> Result<B, Fault> {
        match self {
            Self::Body(body) => Ok(body),
            Self::Fault(fault) => Err(fault),
        }
    }
}

impl<B: FromXml> FromXml for Reply<B> {
    fn from_xml(body: &Element) -> Result<Self, ParseError> {
        match body.child(Some(SOAP_ENV_NS), "Fault") {
            Some(fault) => Ok(Self::Fault(Fault::from_element(fault)?)),
            None => Ok(Self::Body(B::from_xml(body)?)),
        }
    }
}

impl<B: ToXml> ToXml for Reply<B> {
    fn to_xml(&self) -> Vec<Element> {
        match self {
            Self::Body(body) => body.to_xml(),
            Self::Fault(fault) => fault.to_xml(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HeaderBuilder;
    use crate::identity::{ClientIdentity, ServiceIdentity};
    use crate::xml::RawBody;

    const APP_NS: &str = "http://test.x-road.fi/producer";

    fn header() -> MessageHeader {
        HeaderBuilder::new()
            .client(ClientIdentity::new("FI", "GOV", "1", "consumer"))
            .service(ServiceIdentity::parse("FI/COM/2/provider/testService/v1").unwrap())
            .id("4894e35d-bf0f-44a6-867a-8e51f1daa7e0")
            .user_id("EE1234567890")
            .build()
    }

    fn body() -> RawBody {
        RawBody(vec![Element::new(Some(APP_NS), "testService")
            .with_child(Element::new(None, "msg").with_text("hi"))])
    }

    #[test]
    fn encode_uses_namespace_prefixes() {
        let xml = String::from_utf8(Envelope::new(header(), body()).encode().unwrap()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<soap:Envelope"));
        assert!(xml.contains(&format!("xmlns:xrd=\"{XROAD_NS}\"")));
        assert!(xml.contains("<xrd:userId>EE1234567890</xrd:userId>"));
        assert!(xml.contains("<xrd:client id:objectType=\"SUBSYSTEM\">"));
        assert!(xml.contains("<id:serviceCode>testService</id:serviceCode>"));
        assert!(xml.contains(&format!("<testService xmlns=\"{APP_NS}\">")));
    }

    #[test]
    fn round_trip_preserves_header_and_body() {
        let envelope = Envelope::new(header(), body());
        let decoded = Envelope::<RawBody>::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn decodes_foreign_prefixes() {
        let doc = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="{SOAP_ENV_NS}" xmlns:x="{XROAD_NS}" xmlns:iden="{IDENTIFIERS_NS}">
  <SOAP-ENV:Header>
    <x:client iden:objectType="SUBSYSTEM">
      <iden:xRoadInstance>FI</iden:xRoadInstance>
      <iden:memberClass>GOV</iden:memberClass>
      <iden:memberCode>1</iden:memberCode>
      <iden:subsystemCode>consumer</iden:subsystemCode>
    </x:client>
    <x:centralService iden:objectType="CENTRALSERVICE">
      <iden:xRoadInstance>FI</iden:xRoadInstance>
      <iden:serviceCode>register</iden:serviceCode>
    </x:centralService>
    <x:id>abc</x:id>
    <x:protocolVersion>4.0</x:protocolVersion>
  </SOAP-ENV:Header>
  <SOAP-ENV:Body><ns1:register xmlns:ns1="urn:app"/></SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#
        );
        let env = Envelope::<RawBody>::decode(doc.as_bytes()).unwrap();
        assert_eq!(env.header.id, "abc");
        assert_eq!(env.header.client.fqdn(), "FI/GOV/1/consumer");
        assert_eq!(env.header.target().unwrap().service_code(), "register");
        assert!(env.body.0[0].is(Some("urn:app"), "register"));
    }

    #[test]
    fn wrong_envelope_namespace_is_rejected() {
        let doc = br#"<Envelope xmlns="http://www.w3.org/2003/05/soap-envelope"><Body/></Envelope>"#;
        assert!(matches!(
            Envelope::<RawBody>::decode(doc),
            Err(ParseError::UnexpectedElement { expected: "Envelope", .. })
        ));
    }

    #[test]
    fn body_is_required() {
        let doc = format!(r#"<s:Envelope xmlns:s="{SOAP_ENV_NS}"><s:Header/></s:Envelope>"#);
        assert!(matches!(
            Envelope::<RawBody>::decode(doc.as_bytes()),
            Err(ParseError::MissingElement("Body"))
        ));
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        assert!(matches!(
            Envelope::<RawBody>::decode(b"<soap:Envelope"),
            Err(ParseError::Xml(_))
        ));
    }

    #[test]
    fn fault_round_trips_as_sole_body_content() {
        let fault = Fault::server("Service not found").with_detail("testService");
        let envelope = Envelope::new(header(), fault.clone());
        let xml = envelope.encode().unwrap();
        let text = String::from_utf8(xml.clone()).unwrap();
        assert!(text.contains("<soap:Fault><faultcode>soap:Server</faultcode>"));

        let decoded = Envelope::<Reply<RawBody>>::decode(&xml).unwrap();
        assert_eq!(decoded.body, Reply::Fault(fault));
    }

    #[test]
    fn reply_decodes_regular_body() {
        let xml = Envelope::new(header(), body()).encode().unwrap();
        let decoded = Envelope::<Reply<RawBody>>::decode(&xml).unwrap();
        assert_eq!(decoded.body.into_result().unwrap(), body());
    }
}
