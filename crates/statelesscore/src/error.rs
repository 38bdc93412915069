use thiserror::Error;

/// Errors surfaced to the caller of an invocation.
///
/// Everything here is raised before the first node runs; failures that
/// happen inside a pass are contained as [`NodeError`]s and reported as
/// outcomes instead.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Malformed specification: {0}")]
    MalformedSpecification(String),

    #[error("Unresolved extension: {0}")]
    UnresolvedExtension(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    pub fn malformed(message: impl Into<String>) -> Self {
        FlowError::MalformedSpecification(message.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required property: {0}")]
    MissingProperty(String),

    #[error("Invalid value for property '{name}': {reason}")]
    InvalidProperty { name: String, reason: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Relationship '{0}' is not declared by this node")]
    UndeclaredRelationship(String),

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::ExecutionFailed(message.into())
    }
}

/// Non-fatal findings produced while resolving extensions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveWarning {
    #[error(
        "Extension '{type_id}' is provided by both {chosen} and {shadowed}; using {chosen}"
    )]
    DirectoryResolutionConflict {
        type_id: String,
        chosen: String,
        shadowed: String,
    },
}
