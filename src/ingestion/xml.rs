//! XML conversion.
//!
//! Mapping rules:
//!
//! - Elements are keyed by their local name (namespace prefixes are dropped).
//! - An element without child elements becomes its trimmed text content.
//! - An element with children becomes an object; a tag that repeats under the same parent
//!   collapses into an array in document order.
//! - Attributes, comments and processing instructions are ignored.
//! - The root element's value is the top-level JSON value (the root name itself is only
//!   reported through [`ConversionMetadata::Xml`]).

use std::io::{Read, Seek};

use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use serde_json::map::Entry;
use serde_json::{Map, Value};

use crate::error::{IngestionError, IngestionResult};
use crate::types::ConversionMetadata;

use super::unified::ConversionHints;
use super::{decode_text, peek_to_end};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XmlConverter;

impl XmlConverter {
    pub fn validate<R: Read + Seek>(&self, stream: &mut R, hints: &ConversionHints) -> bool {
        let Ok(bytes) = peek_to_end(stream) else {
            return false;
        };
        match decode_text(&bytes, hints.encoding.as_deref()) {
            Ok(d) if !d.had_errors => parse_document(&d.text).is_ok(),
            _ => false,
        }
    }

    pub fn convert<R: Read + Seek>(&self, stream: &mut R, hints: &ConversionHints) -> IngestionResult<String> {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        let decoded = decode_text(&bytes, hints.encoding.as_deref())?;
        xml_to_json_string(&decoded.text)
    }

    pub fn extract_metadata<R: Read + Seek>(
        &self,
        stream: &mut R,
        hints: &ConversionHints,
    ) -> IngestionResult<ConversionMetadata> {
        let bytes = peek_to_end(stream)?;
        let decoded = decode_text(&bytes, hints.encoding.as_deref())?;
        let doc = parse_document(&decoded.text)?;
        Ok(ConversionMetadata::Xml {
            root_element: doc.root.name,
            encoding: doc
                .declared_encoding
                .unwrap_or_else(|| decoded.encoding.name().to_string()),
            has_namespace: doc.has_namespace,
        })
    }
}

/// Convert an XML document held in memory into a canonical JSON string.
pub fn xml_to_json_string(input: &str) -> IngestionResult<String> {
    let doc = parse_document(input)?;
    serde_json::to_string(&node_to_value(doc.root)).map_err(|e| IngestionError::format("xml", e))
}

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    children: Vec<XmlNode>,
    text: String,
}

#[derive(Debug)]
struct ParsedDocument {
    root: XmlNode,
    has_namespace: bool,
    declared_encoding: Option<String>,
}

fn parse_document(input: &str) -> IngestionResult<ParsedDocument> {
    let mut reader = NsReader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;
    let mut has_namespace = false;
    let mut declared_encoding = None;

    loop {
        let pos = reader.buffer_position();
        let (bound, event) = match reader.read_resolved_event() {
            Ok((ns, ev)) => (matches!(ns, ResolveResult::Bound(_)), ev),
            Err(e) => return Err(xml_error(pos, e)),
        };

        match event {
            Event::Decl(decl) => {
                if let Some(Ok(enc)) = decl.encoding() {
                    declared_encoding = Some(String::from_utf8_lossy(&enc).into_owned());
                }
            }
            Event::Start(start) => {
                if stack.is_empty() {
                    ensure_single_root(&root, pos)?;
                    has_namespace = bound;
                }
                stack.push(XmlNode {
                    name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
                    ..XmlNode::default()
                });
            }
            Event::Empty(start) => {
                if stack.is_empty() {
                    ensure_single_root(&root, pos)?;
                    has_namespace = bound;
                }
                let node = XmlNode {
                    name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
                    ..XmlNode::default()
                };
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                // The reader already rejects mismatched end tags.
                let node = stack
                    .pop()
                    .ok_or_else(|| xml_error(pos, "unexpected closing tag"))?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(text) => {
                let unescaped = text.unescape().map_err(|e| xml_error(pos, e))?;
                push_text(&mut stack, &unescaped, pos)?;
            }
            Event::CData(cdata) => {
                push_text(&mut stack, &String::from_utf8_lossy(&cdata), pos)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(IngestionError::format(
            "xml",
            format!("unexpected end of document: <{}> is not closed", stack[stack.len() - 1].name),
        ));
    }
    let root = root.ok_or_else(|| IngestionError::format("xml", "document has no root element"))?;
    Ok(ParsedDocument {
        root,
        has_namespace,
        declared_encoding,
    })
}

fn ensure_single_root(root: &Option<XmlNode>, pos: u64) -> IngestionResult<()> {
    match root {
        Some(first) => Err(xml_error(
            pos,
            format!("multiple root elements (first root was <{}>)", first.name),
        )),
        None => Ok(()),
    }
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => *root = Some(node),
    }
}

fn push_text(stack: &mut [XmlNode], text: &str, pos: u64) -> IngestionResult<()> {
    match stack.last_mut() {
        Some(node) => {
            node.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(xml_error(pos, "text content outside of the root element")),
    }
}

fn xml_error(pos: u64, message: impl std::fmt::Display) -> IngestionError {
    IngestionError::format("xml", format!("{message} (near byte {pos})"))
}

fn node_to_value(node: XmlNode) -> Value {
    if node.children.is_empty() {
        return Value::String(node.text.trim().to_string());
    }

    let mut obj = Map::new();
    for child in node.children {
        let key = child.name.clone();
        let value = node_to_value(child);
        match obj.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if let Value::Array(items) = existing {
                    items.push(value);
                } else {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            }
        }
    }
    Value::Object(obj)
}
