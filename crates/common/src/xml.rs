// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! A small one-document-at-a-time element DOM on top of xml-rs.
//!
//! Every BOSH response body is one well-formed XML document, and the
//! configuration file is another; both are tiny, so a full DOM per document is
//! cheaper than it sounds and much easier to route on than a pull stream.
//! Unknown children are preserved and left for the caller to skip.

use thiserror::Error;
use xml::ParserConfig;
use xml::reader::XmlEvent;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Malformed(#[from] xml::reader::Error),
    #[error("document has no root element")]
    NoRoot,
}

/// One parsed XML element: local name, namespace, attributes, character data,
/// and child elements in document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    namespace: Option<String>,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    /// Parse a complete document and return its root element.
    pub fn parse(input: &[u8]) -> Result<Element, XmlError> {
        let reader = ParserConfig::new()
            .trim_whitespace(true)
            .ignore_comments(true)
            .create_reader(input);

        let mut stack: Vec<Element> = Vec::new();
        for event in reader {
            match event? {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => {
                    stack.push(Element {
                        name: name.local_name,
                        namespace: name.namespace,
                        attrs: attributes
                            .into_iter()
                            .map(|a| (a.name.local_name, a.value))
                            .collect(),
                        children: Vec::new(),
                        text: String::new(),
                    });
                }
                XmlEvent::EndElement { .. } => {
                    let done = stack.pop().ok_or(XmlError::NoRoot)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => return Ok(done),
                    }
                }
                XmlEvent::Characters(data) | XmlEvent::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&data);
                    }
                }
                _ => {}
            }
        }
        Err(XmlError::NoRoot)
    }

    /// The namespace URI this element resolved to, if any.
    pub fn ns(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter()
    }

    /// First direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Depth-first search for the first descendant with the given local name,
    /// the way DOM `getElementsByTagName(..)[0]` finds it.
    pub fn descendant(&self, name: &str) -> Option<&Element> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.descendant(name) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants with the given local name, in document order.
    pub fn descendants(&self, name: &str) -> Vec<&Element> {
        let mut out = Vec::new();
        self.collect_descendants(name, &mut out);
        out
    }

    fn collect_descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.collect_descendants(name, out);
        }
    }
}
