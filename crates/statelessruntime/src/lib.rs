//! Stateless flow execution runtime
//!
//! Turns a flow specification into a function over one payload: the loader
//! flattens the process-group tree into a connection graph, the bundle
//! resolver binds every extension type to an isolated bundle, and each
//! invocation drives one pass of fresh node instances under a deadline
//! before the outcome router classifies whatever reached the output ports.

mod bundle;
mod config;
mod executor;
mod governor;
mod loader;
mod registry;
mod router;
mod runtime;

pub use bundle::{
    BundleCatalog, BundleManifest, BundleProvider, BundleResolver, IndexedBundle, LibraryIndex,
    LoadedBundle, ResolvedExtensions,
};
pub use config::{EngineConfig, SpecificationStrategy};
pub use executor::{PassExecutor, PassOutput, PassResult};
pub use governor::{DeadlineGovernor, GovernedPass};
pub use loader::{BoundFlow, BoundProcessor, FlowGraph, FlowLoader, DEFAULT_BACK_PRESSURE_THRESHOLD};
pub use registry::{NodeFactory, NodeRegistry};
pub use router::{
    FailurePorts, Outcome, PortOutcomeRouter, RoutedPayload, TerminalPayload, FAILURE_NODE_ID_ATTRIBUTE,
    FAILURE_NODE_TYPE_ATTRIBUTE, FAILURE_PORT_ATTRIBUTE, FAILURE_REASON_ATTRIBUTE,
};
pub use runtime::{InvocationResult, InvocationStatus, PreparedFlow, StatelessEngine};
