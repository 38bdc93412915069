use async_trait::async_trait;
use statelesscore::{
    Node, NodeContext, NodeError, NodeOutput, NodeSchema, Payload, PropertyDescriptor, PropertyKind,
    PropertyMap, Severity,
};
use statelessruntime::NodeFactory;

pub const DEBUG_LOG: &str = "debug.log";
pub const FAULT_FAIL: &str = "fault.fail";

/// Raises a bulletin for every payload and passes it on unchanged
pub struct DebugNode {
    level: Severity,
    message: Option<String>,
}

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        DEBUG_LOG
    }

    async fn on_trigger(&self, ctx: &NodeContext, input: Option<Payload>) -> Result<NodeOutput, NodeError> {
        let payload = input.unwrap_or_default();
        let message = match &self.message {
            Some(message) => message.clone(),
            None => format!(
                "payload of {} bytes with {} attributes",
                payload.size(),
                payload.attributes().len()
            ),
        };

        ctx.bulletins.emit(self.level, message);
        for (key, value) in payload.attributes() {
            tracing::debug!("  {}: {}", key, value);
        }

        Ok(NodeOutput::new().transfer("success", payload))
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(&self, properties: &PropertyMap) -> Result<Box<dyn Node>, NodeError> {
        let level = properties
            .get_or("Log Level", "info")
            .parse::<Severity>()
            .map_err(|reason| NodeError::InvalidProperty {
                name: "Log Level".to_string(),
                reason,
            })?;
        let message = properties
            .get("Log Message")
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        Ok(Box::new(DebugNode { level, message }))
    }

    fn node_type(&self) -> &str {
        DEBUG_LOG
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(DEBUG_LOG)
            .describe("Raises a bulletin for each payload")
            .property(
                PropertyDescriptor::new("Log Level", PropertyKind::String)
                    .describe("Bulletin severity: info, warn or error")
                    .default_value("info"),
            )
            .string_property("Log Message", None)
            .relationship("success", "Every payload, unchanged")
    }
}

/// Fails every trigger; used to exercise failure draining.
pub struct FaultNode {
    reason: String,
}

#[async_trait]
impl Node for FaultNode {
    fn node_type(&self) -> &str {
        FAULT_FAIL
    }

    async fn on_trigger(&self, _ctx: &NodeContext, _input: Option<Payload>) -> Result<NodeOutput, NodeError> {
        Err(NodeError::failed(self.reason.clone()))
    }
}

pub struct FaultNodeFactory;

impl NodeFactory for FaultNodeFactory {
    fn create(&self, properties: &PropertyMap) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(FaultNode {
            reason: properties.get_or("Reason", "forced failure").to_string(),
        }))
    }

    fn node_type(&self) -> &str {
        FAULT_FAIL
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(FAULT_FAIL)
            .describe("Raises a processing error for every payload")
            .string_property("Reason", Some("forced failure"))
            .relationship("success", "Never used")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;
    use statelesscore::BulletinCollector;

    #[tokio::test]
    async fn debug_emits_at_configured_level() {
        let collector = BulletinCollector::new(Severity::Info);
        let ctx = context(&collector, &[]);
        let node = DebugNodeFactory
            .create(&PropertyMap::new(
                [("Log Level".to_string(), "warn".to_string())].into(),
                Default::default(),
            ))
            .unwrap();

        let output = node.on_trigger(&ctx, Some(Payload::from("abc"))).await.unwrap();
        assert_eq!(output.transfers.len(), 1);
        assert_eq!(output.transfers[0].1.content_str(), Some("abc"));

        let events = collector.surfaced();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warn);
        assert!(events[0].message.contains("3 bytes"));
    }

    #[test]
    fn debug_rejects_unknown_level() {
        let err = DebugNodeFactory
            .create(&PropertyMap::new(
                [("Log Level".to_string(), "loud".to_string())].into(),
                Default::default(),
            ))
            .err()
            .unwrap();
        assert!(matches!(err, NodeError::InvalidProperty { .. }));
    }

    #[tokio::test]
    async fn fault_always_fails() {
        let collector = BulletinCollector::new(Severity::Info);
        let node = FaultNodeFactory.create(&PropertyMap::default()).unwrap();
        let err = node
            .on_trigger(&context(&collector, &[]), Some(Payload::from("x")))
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::failed("forced failure"));
    }
}
