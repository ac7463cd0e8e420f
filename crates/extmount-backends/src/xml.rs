//! Minimal element tree for the XML bodies of S3 and WebDAV responses.
//!
//! Namespaces are dropped: elements are matched by local name only, which is
//! how both protocols are consumed in practice (`d:href`, `D:href` and
//! `href` in the default namespace all mean the same thing).

use extmount_core::storage::StorageError;
use extmount_core::StorageResult;
use quick_xml::Reader;
use quick_xml::events::Event;

/// One element with its text and children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    /// Local name
    pub name: String,
    /// Concatenated text content
    pub text: String,
    /// Child elements in document order
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn new(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Self::default()
        }
    }

    /// First child with this local name
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with this local name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the first child with this name
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// First descendant with this name, depth first
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        self.children
            .iter()
            .find_map(|c| if c.name == name { Some(c) } else { c.find(name) })
    }
}

fn malformed(e: impl std::fmt::Display) -> StorageError {
    StorageError::protocol(format!("malformed XML response: {e}"))
}

/// Parse a document and return its root element
pub fn parse(input: &str) -> StorageResult<XmlNode> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);
    let mut stack = vec![XmlNode::default()];

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => stack.push(XmlNode::new(e.local_name().as_ref())),
            Event::Empty(e) => {
                let node = XmlNode::new(e.local_name().as_ref());
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| malformed("unbalanced end tag"))?;
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| malformed("unbalanced end tag"))?;
                parent.children.push(node);
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(malformed)?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(malformed("unclosed element"));
    }
    stack
        .pop()
        .and_then(|doc| doc.children.into_iter().next())
        .ok_or_else(|| malformed("empty document"))
}

/// Escape text for inclusion in an XML body
pub fn escape(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespaced() {
        let doc = r#"<?xml version="1.0"?>
            <d:multistatus xmlns:d="DAV:">
              <d:response><d:href>/a%20b/</d:href><d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat></d:response>
              <d:response><d:href>/c.txt</d:href></d:response>
            </d:multistatus>"#;
        let root = parse(doc).unwrap();
        assert_eq!(root.name, "multistatus");
        let hrefs: Vec<&str> = root
            .children_named("response")
            .filter_map(|r| r.child_text("href"))
            .collect();
        assert_eq!(hrefs, vec!["/a%20b/", "/c.txt"]);
        assert!(root.find("collection").is_some());
    }

    #[test]
    fn test_entities_unescaped() {
        let root = parse("<Key>a&amp;b</Key>").unwrap();
        assert_eq!(root.text, "a&b");
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(parse("<a><b></a>").is_err());
        assert!(parse("").is_err());
        assert!(parse("<a>").is_err());
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a<b&c"), "a&lt;b&amp;c");
    }
}
