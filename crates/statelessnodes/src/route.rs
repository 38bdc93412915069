use async_trait::async_trait;
use statelesscore::{Node, NodeContext, NodeError, NodeOutput, NodeSchema, Payload, PropertyMap};
use statelessruntime::NodeFactory;
use std::collections::BTreeMap;

pub const ROUTE_ATTRIBUTE: &str = "route.attribute";

/// Route on the value of one attribute.
///
/// Each dynamic property names a relationship; its value is the attribute
/// value that selects it. A payload matching several routes goes to all of
/// them, one matching none goes to "unmatched".
pub struct RouteOnAttributeNode {
    attribute: String,
    routes: BTreeMap<String, String>,
}

#[async_trait]
impl Node for RouteOnAttributeNode {
    fn node_type(&self) -> &str {
        ROUTE_ATTRIBUTE
    }

    async fn on_trigger(&self, ctx: &NodeContext, input: Option<Payload>) -> Result<NodeOutput, NodeError> {
        let payload = input.unwrap_or_default();
        let value = payload.attribute(&self.attribute);

        let mut output = NodeOutput::new();
        for (relationship, expected) in &self.routes {
            if value == Some(expected.as_str()) {
                output.push(relationship.clone(), payload.clone());
            }
        }

        if output.is_empty() {
            tracing::debug!(
                "{}: '{}' = {:?} matched no route",
                ctx.node_id,
                self.attribute,
                value
            );
            output.push("unmatched", payload);
        }
        Ok(output)
    }
}

pub struct RouteOnAttributeNodeFactory;

impl NodeFactory for RouteOnAttributeNodeFactory {
    fn create(&self, properties: &PropertyMap) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(RouteOnAttributeNode {
            attribute: properties.get_or("Routing Attribute", "desired.port").to_string(),
            routes: properties.dynamic().clone(),
        }))
    }

    fn node_type(&self) -> &str {
        ROUTE_ATTRIBUTE
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(ROUTE_ATTRIBUTE)
            .describe("Routes payloads by the value of an attribute")
            .string_property("Routing Attribute", Some("desired.port"))
            .with_dynamic_relationships()
            .relationship("unmatched", "Payloads matching no route")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, properties};
    use statelesscore::{BulletinCollector, Severity};

    #[tokio::test]
    async fn routes_by_attribute_value() {
        let node = RouteOnAttributeNodeFactory
            .create(&properties(&[], &[("A", "A"), ("B", "B"), ("Other", "Other")]))
            .unwrap();
        let ctx = context(&BulletinCollector::new(Severity::Warn), &[]);

        let output = node
            .on_trigger(&ctx, Some(Payload::from("x").with_attribute("desired.port", "B")))
            .await
            .unwrap();
        assert_eq!(output.transfers.len(), 1);
        assert_eq!(output.transfers[0].0, "B");

        let output = node
            .on_trigger(&ctx, Some(Payload::from("x").with_attribute("desired.port", "b")))
            .await
            .unwrap();
        assert_eq!(output.transfers[0].0, "unmatched");
    }
}
