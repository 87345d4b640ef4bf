//! Streaming reader for XMLA tabular rowsets.
//!
//! A rowset response carries an inline XML schema describing the `row`
//! element, followed by one `row` element per result row. Absent cells and
//! `xsi:nil="true"` cells are nulls.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::Cursor;

use super::soap::{attribute, xml_error};
use super::{NativeCell, NativeColumn, NativeRow, NativeType};
use crate::error::{BridgeError, Result};

/// Declared type used when a schema element carries no `type` attribute.
const UNTYPED: &str = "anyType";

#[derive(Debug, Clone)]
struct RowsetColumn {
    /// XML element name used for the column's cells.
    element: String,
    /// Column name as the engine reports it.
    name: String,
    native_type: NativeType,
}

/// Pull reader over an owned response body.
pub(crate) struct RowsetReader {
    reader: Reader<Cursor<Vec<u8>>>,
    columns: Vec<RowsetColumn>,
    positions: HashMap<String, usize>,
    finished: bool,
}

impl RowsetReader {
    /// Reads up to the end of the rowset schema, leaving rows unread.
    pub fn new(body: String) -> Result<Self> {
        let mut rowset = Self {
            reader: Reader::from_reader(Cursor::new(body.into_bytes())),
            columns: Vec::new(),
            positions: HashMap::new(),
            finished: false,
        };
        rowset.seek_root()?;
        if !rowset.finished {
            rowset.read_schema()?;
        }
        rowset.positions = rowset
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.element.clone(), i))
            .collect();
        Ok(rowset)
    }

    /// Columns declared by the schema, in order.
    pub fn columns(&self) -> Vec<NativeColumn> {
        self.columns
            .iter()
            .map(|c| NativeColumn::new(c.name.clone(), c.native_type.clone()))
            .collect()
    }

    /// Reads the next row, or `None` at the end of the rowset.
    pub fn next_row(&mut self) -> Result<Option<NativeRow>> {
        while !self.finished {
            match self.next_event()? {
                Event::Start(e) if e.local_name().as_ref() == b"row" => {
                    return self.read_row_cells().map(Some);
                }
                Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                    return Ok(Some(vec![NativeCell::Null; self.columns.len()]));
                }
                Event::Start(_) => self.skip_element()?,
                Event::End(e) if e.local_name().as_ref() == b"root" => self.finished = true,
                Event::Eof => self.finished = true,
                _ => {}
            }
        }
        Ok(None)
    }

    fn next_event(&mut self) -> Result<Event<'static>> {
        let mut buf = Vec::new();
        let event = self.reader.read_event_into(&mut buf).map_err(xml_error)?;
        Ok(event.into_owned())
    }

    /// Advances to the inside of the rowset `root` element.
    fn seek_root(&mut self) -> Result<()> {
        loop {
            match self.next_event()? {
                Event::Start(e) if e.local_name().as_ref() == b"root" => return Ok(()),
                // <root/>: a response with no rowset at all
                Event::Empty(e) if e.local_name().as_ref() == b"root" => {
                    self.finished = true;
                    return Ok(());
                }
                Event::Eof => {
                    return Err(BridgeError::protocol(
                        "response does not contain a rowset",
                    ));
                }
                _ => {}
            }
        }
    }

    /// Reads the inline schema, collecting the elements of the `row` complex type.
    fn read_schema(&mut self) -> Result<()> {
        loop {
            match self.next_event()? {
                Event::Start(e) if e.local_name().as_ref() == b"schema" => break,
                Event::Start(e) if e.local_name().as_ref() == b"row" => {
                    return Err(BridgeError::protocol(
                        "rowset rows arrived before the schema",
                    ));
                }
                Event::Start(_) => self.skip_element()?,
                Event::End(e) if e.local_name().as_ref() == b"root" => {
                    self.finished = true;
                    return Ok(());
                }
                Event::Eof => return Err(BridgeError::protocol("unterminated rowset")),
                _ => {}
            }
        }

        let mut in_row_type = false;
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_event()? {
                Event::Start(e) => {
                    depth += 1;
                    if e.local_name().as_ref() == b"complexType" {
                        in_row_type = attribute(&e, b"name")?.as_deref() == Some("row");
                    } else if in_row_type && e.local_name().as_ref() == b"element" {
                        self.columns.push(schema_column(&e)?);
                    }
                }
                Event::Empty(e) => {
                    if in_row_type && e.local_name().as_ref() == b"element" {
                        self.columns.push(schema_column(&e)?);
                    }
                }
                Event::End(e) => {
                    depth -= 1;
                    if e.local_name().as_ref() == b"complexType" {
                        in_row_type = false;
                    }
                }
                Event::Eof => return Err(BridgeError::protocol("unterminated rowset schema")),
                _ => {}
            }
        }
        Ok(())
    }

    /// Reads the cells of a `row` element whose start tag was just consumed.
    fn read_row_cells(&mut self) -> Result<NativeRow> {
        let mut row = vec![NativeCell::Null; self.columns.len()];
        loop {
            match self.next_event()? {
                Event::Start(e) => {
                    let index = self.position(&e)?;
                    let nil = is_nil(&e)?;
                    let text = self.read_text()?;
                    row[index] = if nil {
                        NativeCell::Null
                    } else {
                        NativeCell::Text(text)
                    };
                }
                Event::Empty(e) => {
                    let index = self.position(&e)?;
                    row[index] = if is_nil(&e)? {
                        NativeCell::Null
                    } else {
                        NativeCell::Text(String::new())
                    };
                }
                Event::End(_) => return Ok(row),
                Event::Eof => return Err(BridgeError::protocol("unterminated rowset row")),
                _ => {}
            }
        }
    }

    fn position(&self, element: &BytesStart<'_>) -> Result<usize> {
        let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
        self.positions.get(&name).copied().ok_or_else(|| {
            BridgeError::protocol(format!("row cell '{name}' is not declared in the schema"))
        })
    }

    /// Collects the text content of a cell element up to its end tag.
    fn read_text(&mut self) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.next_event()? {
                Event::Text(t) => text.push_str(&t.unescape().map_err(xml_error)?),
                Event::CData(c) => text.push_str(std::str::from_utf8(&c).map_err(xml_error)?),
                Event::End(_) => return Ok(text),
                Event::Start(_) => {
                    return Err(BridgeError::protocol("row cells must not contain elements"));
                }
                Event::Eof => return Err(BridgeError::protocol("unterminated row cell")),
                _ => {}
            }
        }
    }

    /// Skips an element whose start tag was just consumed.
    fn skip_element(&mut self) -> Result<()> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_event()? {
                Event::Start(_) => depth += 1,
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(BridgeError::protocol("unterminated element")),
                _ => {}
            }
        }
        Ok(())
    }
}

fn schema_column(element: &BytesStart<'_>) -> Result<RowsetColumn> {
    let element_name = attribute(element, b"name")?
        .ok_or_else(|| BridgeError::protocol("rowset schema element without a name"))?;
    let name = match attribute(element, b"field")? {
        Some(field) => field,
        None => decode_xml_name(&element_name),
    };
    let native_type = NativeType::new(
        attribute(element, b"type")?
            .as_deref()
            .unwrap_or(UNTYPED),
    );
    Ok(RowsetColumn {
        element: element_name,
        name,
        native_type,
    })
}

fn is_nil(element: &BytesStart<'_>) -> Result<bool> {
    Ok(attribute(element, b"nil")?.as_deref() == Some("true"))
}

/// Decodes `_xHHHH_` escapes used to turn arbitrary column names into XML names.
fn decode_xml_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(start) = rest.find("_x") {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let decoded = candidate
            .get(2..6)
            .filter(|_| candidate.as_bytes().get(6) == Some(&b'_'))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32);
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &candidate[7..];
            }
            None => {
                out.push_str("_x");
                rest = &candidate[2..];
            }
        }
    }
    out.push_str(rest);
    out
}
