use bytes::Bytes;
use std::collections::BTreeMap;

/// A unit of data flowing through a pass: immutable content plus attributes.
///
/// Content is reference counted, so cloning a payload for fan-out copies only
/// the attribute map. Every "mutator" consumes `self` and hands back a new
/// payload; a payload already queued for a downstream node can never be
/// changed behind its back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    content: Bytes,
    attributes: BTreeMap<String, String>,
}

impl Payload {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn without_attribute(mut self, key: &str) -> Self {
        self.attributes.remove(key);
        self
    }

    /// Replace the content, keeping every attribute.
    pub fn with_content(self, content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            attributes: self.attributes,
        }
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn content_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::new(s)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::new(v)
    }
}
