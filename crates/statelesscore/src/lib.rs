//! Core abstractions for the stateless flow engine
//!
//! This crate provides the vocabulary every other crate shares: payloads,
//! the flow document model, the node trait and its schema, bulletins and
//! errors. It has no runtime of its own.

mod bulletin;
mod error;
mod node;
mod payload;
mod property;
mod schema;
mod spec;

pub use bulletin::{BulletinCollector, BulletinEmitter, BulletinEvent, Severity};
pub use error::{FlowError, NodeError, ResolveWarning};
pub use node::{Node, NodeContext, NodeOutput};
pub use payload::Payload;
pub use property::{
    parse_duration, substitute_parameters, PropertyDescriptor, PropertyKind, PropertyMap,
};
pub use schema::{NodeSchema, RelationshipDescriptor};
pub use spec::{
    ConnectionSpec, EndpointKind, EndpointRef, FlowSpecification, PortSpec, ProcessGroup,
    ProcessorSpec,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
