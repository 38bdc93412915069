use async_trait::async_trait;
use statelesscore::{
    Node, NodeContext, NodeError, NodeOutput, NodeSchema, Payload, PropertyDescriptor, PropertyKind,
    PropertyMap,
};
use statelessruntime::NodeFactory;
use std::collections::BTreeMap;

pub const GENERATE_PAYLOAD: &str = "generate.payload";

/// Produce fresh payloads, typically as a source with no incoming connection.
///
/// Dynamic properties become attributes of every generated payload. An
/// incoming payload only acts as a trigger and is not forwarded.
pub struct GeneratePayloadNode {
    content: String,
    batch_size: usize,
    attributes: BTreeMap<String, String>,
}

#[async_trait]
impl Node for GeneratePayloadNode {
    fn node_type(&self) -> &str {
        GENERATE_PAYLOAD
    }

    async fn on_trigger(&self, ctx: &NodeContext, _input: Option<Payload>) -> Result<NodeOutput, NodeError> {
        let mut output = NodeOutput::new();
        for _ in 0..self.batch_size {
            ctx.check_cancelled()?;
            output.push(
                "success",
                Payload::new(self.content.clone()).with_attributes(self.attributes.clone()),
            );
        }
        Ok(output)
    }
}

pub struct GeneratePayloadNodeFactory;

impl NodeFactory for GeneratePayloadNodeFactory {
    fn create(&self, properties: &PropertyMap) -> Result<Box<dyn Node>, NodeError> {
        let batch_size = properties.integer("Batch Size")?;
        if batch_size < 0 {
            return Err(NodeError::InvalidProperty {
                name: "Batch Size".to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        Ok(Box::new(GeneratePayloadNode {
            content: properties.get_or("Content", "").to_string(),
            batch_size: batch_size as usize,
            attributes: properties.dynamic().clone(),
        }))
    }

    fn node_type(&self) -> &str {
        GENERATE_PAYLOAD
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(GENERATE_PAYLOAD)
            .describe("Generates payloads with fixed content")
            .string_property("Content", Some(""))
            .property(
                PropertyDescriptor::new("Batch Size", PropertyKind::Integer)
                    .describe("Payloads produced per trigger")
                    .default_value("1"),
            )
            .with_dynamic_properties()
            .relationship("success", "Generated payloads")
    }
}
