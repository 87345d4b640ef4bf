//! In-process HTTP responder that answers XMLA requests with canned SOAP.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A request as the responder received it.
#[derive(Debug, Clone)]
pub struct Request {
    pub soap_action: String,
    pub authorization: Option<String>,
    pub body: String,
}

type Handler = dyn Fn(&Request) -> (u16, String) + Send + Sync;

/// Serves one response per connection until dropped.
pub struct Responder {
    pub url: String,
    requests: Arc<Mutex<Vec<Request>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Responder {
    /// Starts listening on a free local port.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/xmla", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let log = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = handler.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, handler, log).await;
                });
            }
        });

        Self {
            url,
            requests,
            task,
        }
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of `EndSession` requests received so far.
    pub fn end_sessions(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.body.contains("<EndSession"))
            .count()
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    handler: Arc<Handler>,
    log: Arc<Mutex<Vec<Request>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let header = |name: &str| {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    };
    let length: usize = header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = (header_end + length).min(buf.len());

    let request = Request {
        soap_action: header("soapaction").unwrap_or_default(),
        authorization: header("authorization"),
        body: String::from_utf8_lossy(&buf[header_end..end]).into_owned(),
    };
    let (status, body) = handler(&request);
    log.lock().unwrap().push(request);

    let reason = match status {
        200 => "OK",
        401 => "Unauthorized",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/xml; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Wraps a SOAP body, with an optional session header.
pub fn envelope(session: Option<&str>, body: &str) -> String {
    let header = session
        .map(|id| {
            format!(
                r#"<soap:Header><Session xmlns="urn:schemas-microsoft-com:xml-analysis" SessionId="{id}"/></soap:Header>"#
            )
        })
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">{header}<soap:Body>{body}</soap:Body></soap:Envelope>"#
    )
}

/// A tabular rowset response. Columns are `(name, xsd type)`; element names
/// are derived from the column names.
pub fn rowset(session: Option<&str>, columns: &[(&str, &str)], rows: &[Vec<Option<&str>>]) -> String {
    let elements: Vec<String> = columns.iter().map(|(name, _)| element_name(name)).collect();

    let schema: String = columns
        .iter()
        .zip(&elements)
        .map(|((name, ty), element)| {
            format!(
                r#"<xsd:element sql:field="{name}" name="{element}" type="{ty}" minOccurs="0"/>"#
            )
        })
        .collect();

    let body_rows: String = rows
        .iter()
        .map(|row| {
            let cells: String = row
                .iter()
                .zip(&elements)
                .filter_map(|(cell, element)| {
                    cell.map(|text| format!("<{element}>{}</{element}>", xml_escape(text)))
                })
                .collect();
            format!("<row>{cells}</row>")
        })
        .collect();

    envelope(
        session,
        &format!(
            r#"<ExecuteResponse xmlns="urn:schemas-microsoft-com:xml-analysis"><return><root xmlns="urn:schemas-microsoft-com:xml-analysis:rowset" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:sql="urn:schemas-microsoft-com:xml-sql"><xsd:schema targetNamespace="urn:schemas-microsoft-com:xml-analysis:rowset" elementFormDefault="qualified"><xsd:element name="root"><xsd:complexType><xsd:sequence minOccurs="0" maxOccurs="unbounded"><xsd:element name="row" type="row"/></xsd:sequence></xsd:complexType></xsd:element><xsd:complexType name="row"><xsd:sequence>{schema}</xsd:sequence></xsd:complexType></xsd:schema>{body_rows}</root></return></ExecuteResponse>"#
        ),
    )
}

/// An empty command result, optionally carrying `Messages`.
pub fn empty_result(session: Option<&str>, messages: &str) -> String {
    envelope(
        session,
        &format!(
            r#"<ExecuteResponse xmlns="urn:schemas-microsoft-com:xml-analysis"><return><root xmlns="urn:schemas-microsoft-com:xml-analysis:empty"><Messages xmlns="urn:schemas-microsoft-com:xml-analysis:exception">{messages}</Messages></root></return></ExecuteResponse>"#
        ),
    )
}

/// A SOAP fault carrying one engine error.
pub fn fault(description: &str) -> String {
    envelope(
        None,
        &format!(
            r#"<soap:Fault><faultcode>XMLAnalysisError.0xc10b0004</faultcode><faultstring>The following system error occurred: </faultstring><detail><Error ErrorCode="3238133764" Description="{}" Source="Microsoft SQL Server Analysis Services"/></detail></soap:Fault>"#,
            xml_escape(description)
        ),
    )
}

/// Element name for a column: anything outside `[A-Za-z0-9_]` becomes `_xHHHH_`.
fn element_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_string()
            } else {
                format!("_x{:04X}_", c as u32)
            }
        })
        .collect()
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
