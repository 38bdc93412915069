use async_trait::async_trait;
use statelesscore::{
    Node, NodeContext, NodeError, NodeOutput, NodeSchema, Payload, PropertyDescriptor, PropertyKind,
    PropertyMap,
};
use statelessruntime::NodeFactory;
use tokio::time::{sleep, Duration};

pub const TIME_SLEEP: &str = "time.sleep";

/// Hold each payload for a fixed duration, then pass it on
pub struct SleepNode {
    duration: Duration,
}

#[async_trait]
impl Node for SleepNode {
    fn node_type(&self) -> &str {
        TIME_SLEEP
    }

    async fn on_trigger(&self, ctx: &NodeContext, input: Option<Payload>) -> Result<NodeOutput, NodeError> {
        tracing::debug!("{}: sleeping for {}ms", ctx.node_id, self.duration.as_millis());

        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
            _ = sleep(self.duration) => {
                Ok(NodeOutput::new().transfer("success", input.unwrap_or_default()))
            }
        }
    }
}

pub struct SleepNodeFactory;

impl NodeFactory for SleepNodeFactory {
    fn create(&self, properties: &PropertyMap) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(SleepNode {
            duration: properties.duration("Duration")?,
        }))
    }

    fn node_type(&self) -> &str {
        TIME_SLEEP
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(TIME_SLEEP)
            .describe("Delays each payload")
            .property(
                PropertyDescriptor::new("Duration", PropertyKind::Duration)
                    .describe("How long to hold each payload, e.g. '250 millis'")
                    .default_value("1 sec")
                    .required(),
            )
            .relationship("success", "Every payload after the delay")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;
    use statelesscore::{BulletinCollector, Severity};
    use std::time::Instant;

    fn sleeper(duration: &str) -> Box<dyn Node> {
        SleepNodeFactory
            .create(&PropertyMap::new(
                [("Duration".to_string(), duration.to_string())].into(),
                Default::default(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn passes_payload_after_delay() {
        let ctx = context(&BulletinCollector::new(Severity::Warn), &[]);
        let start = Instant::now();
        let output = sleeper("20 millis")
            .on_trigger(&ctx, Some(Payload::from("x")))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(output.transfers[0].0, "success");
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let ctx = context(&BulletinCollector::new(Severity::Warn), &[]);
        ctx.cancellation.cancel();
        let err = sleeper("5 sec")
            .on_trigger(&ctx, Some(Payload::from("x")))
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::Cancelled);
    }
}
