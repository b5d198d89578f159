// 🌳 XML Document Model
// Builds a small element tree from an xml-rs event stream.
// Lookups are soft: a missing tag or attribute is None, never an error.

use crate::error::FlattenError;
use std::collections::HashMap;
use std::io::Read;
use xml::reader::{EventReader, XmlEvent};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: HashMap<String, String>,
    pub text: Option<String>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parse a whole document and return its root element
    pub fn parse(xml_data: &str) -> Result<XmlNode, FlattenError> {
        Self::from_reader(xml_data.as_bytes())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<XmlNode, FlattenError> {
        let parser = EventReader::new(reader);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        for event in parser {
            match event.map_err(|e| FlattenError::Syntax(e.to_string()))? {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => {
                    let mut node = XmlNode {
                        name: name.local_name,
                        ..Default::default()
                    };
                    for attr in attributes {
                        node.attributes.insert(attr.name.local_name, attr.value);
                    }
                    stack.push(node);
                }
                XmlEvent::EndElement { .. } => {
                    if let Some(node) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(node);
                        } else {
                            root = Some(node);
                        }
                    }
                }
                XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                    if let Some(node) = stack.last_mut() {
                        node.text.get_or_insert_with(String::new).push_str(&text);
                    }
                }
                _ => {}
            }
        }

        root.ok_or_else(|| FlattenError::Syntax("document has no root element".to_string()))
    }

    /// First direct child with the given tag
    pub fn find(&self, tag: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == tag)
    }

    /// All direct children with the given tag, in document order
    pub fn find_all<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == tag)
    }

    /// Follow a slash-separated path of first matches, e.g. "statistics/ratings"
    pub fn find_path(&self, path: &str) -> Option<&XmlNode> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.find(segment))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Attribute of the first child with `tag`
    pub fn child_attr(&self, tag: &str, attribute: &str) -> Option<&str> {
        self.find(tag).and_then(|child| child.attr(attribute))
    }

    /// Text of the first child with `tag`
    pub fn child_text(&self, tag: &str) -> Option<&str> {
        self.find(tag).and_then(|child| child.text())
    }
}
