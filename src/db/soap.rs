//! XMLA SOAP envelopes.
//!
//! Builds `Execute`/`Discover` requests with session headers and scans
//! responses for session ids, faults, errors and warnings.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{BridgeError, Result};

pub(crate) const XMLA_NS: &str = "urn:schemas-microsoft-com:xml-analysis";
const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Session header carried by a request.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SessionHeader<'a> {
    /// No session; used when the server did not hand one out.
    None,
    Begin,
    Session(&'a str),
    End(&'a str),
}

impl SessionHeader<'_> {
    fn render(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::Begin => {
                format!(r#"<BeginSession soap:mustUnderstand="1" xmlns="{XMLA_NS}"/>"#)
            }
            Self::Session(id) => format!(
                r#"<Session soap:mustUnderstand="1" SessionId="{}" xmlns="{XMLA_NS}"/>"#,
                escape(*id)
            ),
            Self::End(id) => format!(
                r#"<EndSession soap:mustUnderstand="1" SessionId="{}" xmlns="{XMLA_NS}"/>"#,
                escape(*id)
            ),
        }
    }
}

fn envelope(header: SessionHeader<'_>, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><soap:Envelope xmlns:soap="{SOAP_NS}"><soap:Header>{}</soap:Header><soap:Body>{body}</soap:Body></soap:Envelope>"#,
        header.render()
    )
}

fn element_list(items: &[(&str, &str)]) -> String {
    items
        .iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", escape(*value)))
        .collect()
}

/// Builds an `Execute` request for a statement (query text or TMSL command).
pub(crate) fn execute_envelope(
    header: SessionHeader<'_>,
    statement: &str,
    properties: &[(&str, &str)],
) -> String {
    let body = format!(
        r#"<Execute xmlns="{XMLA_NS}"><Command><Statement>{}</Statement></Command><Properties><PropertyList>{}</PropertyList></Properties></Execute>"#,
        escape(statement),
        element_list(properties)
    );
    envelope(header, &body)
}

/// Builds a `Discover` request for a schema rowset.
pub(crate) fn discover_envelope(
    header: SessionHeader<'_>,
    request_type: &str,
    restrictions: &[(&str, &str)],
    properties: &[(&str, &str)],
) -> String {
    let body = format!(
        r#"<Discover xmlns="{XMLA_NS}"><RequestType>{request_type}</RequestType><Restrictions><RestrictionList>{}</RestrictionList></Restrictions><Properties><PropertyList>{}</PropertyList></Properties></Discover>"#,
        element_list(restrictions),
        element_list(properties)
    );
    envelope(header, &body)
}

/// What a response says about the session and about failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ResponseInfo {
    /// Session id from the response's `Session` header.
    pub session_id: Option<String>,
    /// `faultstring` of a SOAP fault.
    pub fault: Option<String>,
    /// `Description` of every `Error` element.
    pub errors: Vec<String>,
    /// `Description` of every `Warning` element.
    pub warnings: Vec<String>,
}

impl ResponseInfo {
    /// The engine's diagnostic text, if the response reports a failure.
    ///
    /// Error descriptions take precedence over the generic fault string.
    pub fn failure(&self) -> Option<String> {
        if !self.errors.is_empty() {
            return Some(self.errors.join("\n"));
        }
        self.fault.clone()
    }
}

/// Scans a SOAP response body.
pub(crate) fn scan_response(body: &str) -> Result<ResponseInfo> {
    let mut reader = Reader::from_str(body);
    let mut info = ResponseInfo::default();
    let mut in_header = false;
    let mut in_faultstring = false;
    let mut faultstring = String::new();

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    b"Header" if !is_empty => in_header = true,
                    b"Session" if in_header => {
                        info.session_id = attribute(e, b"SessionId")?;
                    }
                    b"Fault" => info.fault = Some(String::new()),
                    b"faultstring" if !is_empty => in_faultstring = true,
                    b"Error" => {
                        if let Some(description) = attribute(e, b"Description")? {
                            info.errors.push(description);
                        }
                    }
                    b"Warning" => {
                        if let Some(description) = attribute(e, b"Description")? {
                            info.warnings.push(description);
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) if in_faultstring => {
                faultstring.push_str(&t.unescape().map_err(xml_error)?);
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"Header" => in_header = false,
                b"faultstring" => in_faultstring = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if info.fault.is_some() {
        info.fault = Some(faultstring.trim().to_string());
    }
    Ok(info)
}

/// Reads an attribute by local name, unescaped.
pub(crate) fn attribute(element: &BytesStart<'_>, local_name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.local_name().as_ref() == local_name {
            let value = attr.unescape_value().map_err(xml_error)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

pub(crate) fn xml_error(error: impl std::fmt::Display) -> BridgeError {
    BridgeError::protocol(format!("malformed XMLA response: {error}"))
}
