use crate::{BulletinEmitter, NodeError, Payload, PropertyMap};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core trait that every extension type implements.
///
/// One instance is created per invocation and dropped when the pass ends.
#[async_trait]
pub trait Node: Send + Sync {
    /// Extension type identifier (e.g. "text.split", "json.extract")
    fn node_type(&self) -> &str;

    /// Process one payload, or produce payloads from nothing when the node
    /// has no incoming connection (`input` is `None`).
    async fn on_trigger(
        &self,
        ctx: &NodeContext,
        input: Option<Payload>,
    ) -> Result<NodeOutput, NodeError>;

    /// Optional: acquire resources before the first trigger
    async fn initialize(&mut self) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Execution context passed to each trigger
#[derive(Clone)]
pub struct NodeContext {
    /// Processor id from the flow document
    pub node_id: String,

    /// Validated properties with parameters and defaults applied
    pub properties: Arc<PropertyMap>,

    /// Bulletins raised here are collected for the invocation
    pub bulletins: BulletinEmitter,

    /// Cancelled when the invocation deadline expires
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn property(&self, name: &str) -> Result<&str, NodeError> {
        self.properties.require(name)
    }

    /// Fails with [`NodeError::Cancelled`] once the deadline has passed.
    pub fn check_cancelled(&self) -> Result<(), NodeError> {
        if self.cancellation.is_cancelled() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Payloads produced by one trigger, each tagged with a relationship.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    pub transfers: Vec<(String, Payload)>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfer(mut self, relationship: impl Into<String>, payload: Payload) -> Self {
        self.transfers.push((relationship.into(), payload));
        self
    }

    pub fn push(&mut self, relationship: impl Into<String>, payload: Payload) {
        self.transfers.push((relationship.into(), payload));
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}
