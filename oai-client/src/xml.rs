//! Minimal element tree over quick-xml events.
//!
//! OAI-PMH responses are small, namespaced documents; names are kept as local
//! names (prefix stripped) and text is unescaped and trimmed.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use oxomo_core::ProtocolError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Text of the named child, empty if absent.
    pub fn child_text(&self, name: &str) -> &str {
        self.child(name).map(|c| c.text.as_str()).unwrap_or_default()
    }
}

pub(crate) fn parse(xml: &str) -> Result<Element, ProtocolError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            ProtocolError::malformed_with_source(
                format!("invalid XML at byte {}", reader.error_position()),
                e,
            )
        })?;
        match event {
            Event::Start(start) => stack.push(open(&start)?),
            Event::Empty(start) => {
                let element = open(&start)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let Some(element) = stack.pop() else {
                    return Err(ProtocolError::malformed("unbalanced closing tag"));
                };
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| {
                    ProtocolError::malformed_with_source("invalid escape in text", e)
                })?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(text.trim());
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(String::from_utf8_lossy(&data.into_inner()).trim());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ProtocolError::malformed("unexpected end of document"));
    }
    root.ok_or_else(|| ProtocolError::malformed("empty document"))
}

fn open(start: &BytesStart<'_>) -> Result<Element, ProtocolError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr
            .map_err(|e| ProtocolError::malformed_with_source("invalid attribute", e))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| ProtocolError::malformed_with_source("invalid attribute value", e))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        name,
        attrs,
        ..Element::default()
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}
