use async_trait::async_trait;
use statelesscore::{
    Node, NodeContext, NodeError, NodeOutput, NodeSchema, Payload, PropertyDescriptor, PropertyKind,
    PropertyMap,
};
use statelessruntime::NodeFactory;
use std::collections::BTreeMap;

pub const TEXT_SPLIT: &str = "text.split";
pub const ATTRIBUTE_UPDATE: &str = "attribute.update";
pub const JSON_EXTRACT: &str = "json.extract";

pub const FRAGMENT_INDEX: &str = "fragment.index";
pub const FRAGMENT_COUNT: &str = "fragment.count";
pub const MIME_TYPE: &str = "mime.type";

/// Split text content into fragments of at most `lines_per_split` lines.
pub struct SplitTextNode {
    lines_per_split: usize,
}

#[async_trait]
impl Node for SplitTextNode {
    fn node_type(&self) -> &str {
        TEXT_SPLIT
    }

    async fn on_trigger(&self, ctx: &NodeContext, input: Option<Payload>) -> Result<NodeOutput, NodeError> {
        let payload = input.unwrap_or_default();
        let text = payload
            .content_str()
            .ok_or_else(|| NodeError::failed("content is not valid UTF-8"))?;

        // Line endings stay with their lines so the splits concatenate back
        // to the original content.
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let chunks: Vec<String> = lines
            .chunks(self.lines_per_split)
            .map(|chunk| chunk.concat())
            .collect();
        let count = chunks.len();

        let mut output = NodeOutput::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            output.push(
                "splits",
                payload
                    .clone()
                    .with_content(chunk)
                    .with_attribute(FRAGMENT_INDEX, index.to_string())
                    .with_attribute(FRAGMENT_COUNT, count.to_string()),
            );
        }
        tracing::debug!("{}: {} lines into {} splits", ctx.node_id, lines.len(), count);

        output.push("original", payload);
        Ok(output)
    }
}

pub struct SplitTextNodeFactory;

impl NodeFactory for SplitTextNodeFactory {
    fn create(&self, properties: &PropertyMap) -> Result<Box<dyn Node>, NodeError> {
        let lines = properties.integer("Lines Per Split")?;
        if lines < 1 {
            return Err(NodeError::InvalidProperty {
                name: "Lines Per Split".to_string(),
                reason: format!("must be at least 1, got {}", lines),
            });
        }
        Ok(Box::new(SplitTextNode {
            lines_per_split: lines as usize,
        }))
    }

    fn node_type(&self) -> &str {
        TEXT_SPLIT
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(TEXT_SPLIT)
            .describe("Splits text content into fragments of N lines")
            .property(
                PropertyDescriptor::new("Lines Per Split", PropertyKind::Integer)
                    .describe("Maximum number of lines in each fragment")
                    .required(),
            )
            .relationship("splits", "One payload per fragment")
            .relationship("original", "The unsplit input")
    }
}

/// Set attributes from dynamic properties, then drop the ones listed in
/// "Delete Attributes".
pub struct UpdateAttributeNode {
    updates: BTreeMap<String, String>,
    deletes: Vec<String>,
}

#[async_trait]
impl Node for UpdateAttributeNode {
    fn node_type(&self) -> &str {
        ATTRIBUTE_UPDATE
    }

    async fn on_trigger(&self, _ctx: &NodeContext, input: Option<Payload>) -> Result<NodeOutput, NodeError> {
        let payload = self
            .deletes
            .iter()
            .fold(input.unwrap_or_default(), |p, name| p.without_attribute(name))
            .with_attributes(self.updates.clone());

        Ok(NodeOutput::new().transfer("success", payload))
    }
}

pub struct UpdateAttributeNodeFactory;

impl NodeFactory for UpdateAttributeNodeFactory {
    fn create(&self, properties: &PropertyMap) -> Result<Box<dyn Node>, NodeError> {
        let deletes = properties
            .get_or("Delete Attributes", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Box::new(UpdateAttributeNode {
            updates: properties.dynamic().clone(),
            deletes,
        }))
    }

    fn node_type(&self) -> &str {
        ATTRIBUTE_UPDATE
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(ATTRIBUTE_UPDATE)
            .describe("Sets each dynamic property as an attribute")
            .string_property("Delete Attributes", None)
            .with_dynamic_properties()
            .relationship("success", "Every payload, updated")
    }
}

/// Replace JSON content with the value found at a JSON pointer.
pub struct ExtractJsonNode {
    pointer: String,
}

#[async_trait]
impl Node for ExtractJsonNode {
    fn node_type(&self) -> &str {
        JSON_EXTRACT
    }

    async fn on_trigger(&self, ctx: &NodeContext, input: Option<Payload>) -> Result<NodeOutput, NodeError> {
        let payload = input.unwrap_or_default();

        let document: serde_json::Value = match serde_json::from_slice(payload.content()) {
            Ok(document) => document,
            Err(e) => {
                ctx.bulletins.warn(format!("content is not JSON: {}", e));
                return Ok(NodeOutput::new().transfer("failure", payload));
            }
        };

        match document.pointer(&self.pointer) {
            Some(value) => {
                let extracted = serde_json::to_vec(value)
                    .map_err(|e| NodeError::failed(format!("JSON stringify error: {}", e)))?;
                Ok(NodeOutput::new().transfer(
                    "matched",
                    payload
                        .with_content(extracted)
                        .with_attribute(MIME_TYPE, "application/json"),
                ))
            }
            None => Ok(NodeOutput::new().transfer("unmatched", payload)),
        }
    }
}

pub struct ExtractJsonNodeFactory;

impl NodeFactory for ExtractJsonNodeFactory {
    fn create(&self, properties: &PropertyMap) -> Result<Box<dyn Node>, NodeError> {
        let pointer = properties.require("Path")?;
        if !(pointer.is_empty() || pointer.starts_with('/')) {
            return Err(NodeError::InvalidProperty {
                name: "Path".to_string(),
                reason: format!("'{}' is not a JSON pointer", pointer),
            });
        }
        Ok(Box::new(ExtractJsonNode {
            pointer: pointer.to_string(),
        }))
    }

    fn node_type(&self) -> &str {
        JSON_EXTRACT
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(JSON_EXTRACT)
            .describe("Replaces JSON content with the value at a JSON pointer")
            .property(
                PropertyDescriptor::new("Path", PropertyKind::String)
                    .describe("JSON pointer, e.g. /user/name")
                    .required(),
            )
            .relationship("matched", "The extracted value")
            .relationship("unmatched", "Nothing at the pointer")
            .relationship("failure", "Content is not JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, properties};
    use statelesscore::{BulletinCollector, Severity};

    #[tokio::test]
    async fn splits_into_chunks_and_keeps_original() {
        let node = SplitTextNodeFactory
            .create(&properties(&[("Lines Per Split", "2")], &[]))
            .unwrap();
        let ctx = context(&BulletinCollector::new(Severity::Warn), &[]);
        let input = Payload::from("a\nb\nc\nd\ne\n").with_attribute("source", "test");

        let output = node.on_trigger(&ctx, Some(input)).await.unwrap();
        let splits: Vec<&Payload> = output
            .transfers
            .iter()
            .filter(|(rel, _)| rel == "splits")
            .map(|(_, p)| p)
            .collect();

        assert_eq!(splits.len(), 3);
        assert_eq!(splits[0].content_str(), Some("a\nb\n"));
        assert_eq!(splits[2].content_str(), Some("e\n"));
        assert_eq!(splits[1].attribute(FRAGMENT_INDEX), Some("1"));
        assert_eq!(splits[1].attribute(FRAGMENT_COUNT), Some("3"));
        assert_eq!(splits[1].attribute("source"), Some("test"));
        assert_eq!(output.transfers.last().unwrap().0, "original");
    }

    #[test]
    fn split_requires_positive_line_count() {
        let err = SplitTextNodeFactory
            .create(&properties(&[("Lines Per Split", "0")], &[]))
            .err()
            .unwrap();
        assert!(matches!(err, NodeError::InvalidProperty { .. }));
    }

    #[tokio::test]
    async fn updates_and_deletes_attributes() {
        let node = UpdateAttributeNodeFactory
            .create(&properties(&[("Delete Attributes", "old, stale")], &[("desired.port", "B")]))
            .unwrap();
        let ctx = context(&BulletinCollector::new(Severity::Warn), &[]);
        let input = Payload::from("x").with_attribute("old", "1").with_attribute("keep", "2");

        let output = node.on_trigger(&ctx, Some(input)).await.unwrap();
        let updated = &output.transfers[0].1;
        assert_eq!(updated.attribute("desired.port"), Some("B"));
        assert_eq!(updated.attribute("keep"), Some("2"));
        assert_eq!(updated.attribute("old"), None);
    }

    #[tokio::test]
    async fn extracts_value_at_pointer() {
        let node = ExtractJsonNodeFactory
            .create(&properties(&[("Path", "/name")], &[]))
            .unwrap();
        let collector = BulletinCollector::new(Severity::Warn);
        let ctx = context(&collector, &[]);

        let output = node
            .on_trigger(&ctx, Some(Payload::from(r#"{"name":"John","age":30}"#)))
            .await
            .unwrap();
        assert_eq!(output.transfers[0].0, "matched");
        assert_eq!(output.transfers[0].1.content_str(), Some("\"John\""));

        let output = node.on_trigger(&ctx, Some(Payload::from("{}"))).await.unwrap();
        assert_eq!(output.transfers[0].0, "unmatched");

        let output = node.on_trigger(&ctx, Some(Payload::from("not json"))).await.unwrap();
        assert_eq!(output.transfers[0].0, "failure");
        assert_eq!(collector.surfaced().len(), 1);
    }
}
