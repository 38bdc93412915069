use crate::bundle::{BundleCatalog, BundleResolver, ResolvedExtensions};
use crate::config::EngineConfig;
use crate::executor::PassExecutor;
use crate::governor::{DeadlineGovernor, GovernedPass};
use crate::loader::{BoundFlow, FlowGraph, FlowLoader};
use crate::router::{Outcome, PortOutcomeRouter, RoutedPayload};
use petgraph::graph::NodeIndex;
use serde::Serialize;
use statelesscore::{BulletinCollector, BulletinEvent, FlowError, Payload};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationStatus {
    Completed,
    TimedOut,
}

/// Everything one invocation produced.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub invocation_id: Uuid,
    pub status: InvocationStatus,
    pub outcomes: Vec<RoutedPayload>,
    pub bulletins: Vec<BulletinEvent>,
    pub duration: Duration,
}

impl InvocationResult {
    pub fn payloads<'a>(&'a self, matches: impl Fn(&Outcome) -> bool + 'a) -> impl Iterator<Item = &'a Payload> + 'a {
        self.outcomes
            .iter()
            .filter(move |r| matches(&r.outcome))
            .map(|r| &r.payload)
    }

    pub fn outputs(&self) -> Vec<&Payload> {
        self.payloads(|o| *o == Outcome::Output).collect()
    }

    pub fn originals(&self) -> Vec<&Payload> {
        self.payloads(|o| *o == Outcome::Original).collect()
    }

    /// FAILURE payloads, both port-routed and unrouted.
    pub fn failures(&self) -> Vec<&Payload> {
        self.payloads(Outcome::is_failure).collect()
    }

    pub fn timeouts(&self) -> Vec<&Payload> {
        self.payloads(|o| *o == Outcome::Timeout).collect()
    }

    pub fn is_timed_out(&self) -> bool {
        self.status == InvocationStatus::TimedOut
    }
}

/// A flow that has been loaded, resolved and bound, ready to invoke.
pub struct PreparedFlow {
    pub graph: Arc<FlowGraph>,
    pub flow: Arc<BoundFlow>,
    pub extensions: Arc<ResolvedExtensions>,
}

/// Runs one flow specification as a function: payload in, outcomes out.
///
/// Preparation (loading, validation, resolution, binding) happens once,
/// on first use. Every invocation then gets fresh node instances, fresh
/// queues and its own bulletin collector, so invocations share nothing.
pub struct StatelessEngine {
    config: EngineConfig,
    resolver: BundleResolver,
    router: PortOutcomeRouter,
    governor: DeadlineGovernor,
    prepared: Mutex<Option<Arc<PreparedFlow>>>,
}

impl StatelessEngine {
    pub fn new(config: EngineConfig, catalog: Arc<BundleCatalog>) -> Self {
        let router = PortOutcomeRouter::new(config.failure_port_names.clone());
        let governor = DeadlineGovernor::new(config.timeout_duration);
        Self {
            config,
            resolver: BundleResolver::new(catalog),
            router,
            governor,
            prepared: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &BundleResolver {
        &self.resolver
    }

    /// Load, validate, resolve and bind the flow without running it.
    pub async fn validate(&self) -> Result<Arc<PreparedFlow>, FlowError> {
        self.prepare().await
    }

    async fn prepare(&self) -> Result<Arc<PreparedFlow>, FlowError> {
        let mut slot = self.prepared.lock().await;
        if let Some(prepared) = slot.as_ref() {
            return Ok(prepared.clone());
        }

        let document = self.config.load_document().await?;
        let graph = Arc::new(FlowLoader::load(&document)?);

        if let Some(name) = &self.config.input_port_name {
            if graph.root_input_port(name).is_none() {
                return Err(FlowError::malformed(format!(
                    "flow '{}' has no input port named '{}' (available: {})",
                    graph.name,
                    name,
                    graph.root_input_port_names().join(", ")
                )));
            }
        }

        let extensions = self
            .resolver
            .resolve(
                graph.required_types(),
                &self.config.library_directory,
                &self.config.additional_library_directories,
            )
            .await?;

        let flow = Arc::new(graph.bind(&extensions, &self.config.parameters)?);
        tracing::info!(
            "Prepared flow '{}' with {} processors",
            graph.name,
            flow.processors.len()
        );

        let prepared = Arc::new(PreparedFlow {
            graph,
            flow,
            extensions,
        });
        *slot = Some(prepared.clone());
        Ok(prepared)
    }

    /// Run one pass with at most one input payload.
    pub async fn invoke(&self, input: Option<Payload>) -> Result<InvocationResult, FlowError> {
        let prepared = self.prepare().await?;
        let invocation_id = Uuid::new_v4();
        let start = Instant::now();

        let seed = match &input {
            Some(payload) => Some((self.input_port(&prepared.graph)?, payload.clone())),
            None => None,
        };

        tracing::info!("Invocation {} of '{}' started", invocation_id, prepared.graph.name);

        let bulletins = BulletinCollector::new(self.config.bulletin_level);
        let cancellation = CancellationToken::new();
        let pass = {
            let flow = prepared.flow.clone();
            let bulletins = bulletins.clone();
            let cancellation = cancellation.clone();
            async move { PassExecutor::new(&flow, bulletins, cancellation).run(seed).await }
        };

        let (status, outcomes) = match self.governor.govern(pass, cancellation).await? {
            GovernedPass::Finished(output) => (
                InvocationStatus::Completed,
                self.router
                    .route(input, output.terminal, output.unrouted_failures),
            ),
            GovernedPass::TimedOut => (InvocationStatus::TimedOut, self.router.timed_out(input)),
        };

        let duration = start.elapsed();
        tracing::info!(
            "Invocation {} finished {:?} in {}ms with {} outcomes",
            invocation_id,
            status,
            duration.as_millis(),
            outcomes.len()
        );

        Ok(InvocationResult {
            invocation_id,
            status,
            outcomes,
            bulletins: bulletins.surfaced(),
            duration,
        })
    }

    /// The configured input port, or the only root input port when none is named.
    fn input_port(&self, graph: &FlowGraph) -> Result<NodeIndex, FlowError> {
        match &self.config.input_port_name {
            Some(name) => graph
                .root_input_port(name)
                .ok_or_else(|| FlowError::malformed(format!("no input port named '{}'", name))),
            None => match graph.root_input_port_names().as_slice() {
                [only] => graph
                    .root_input_port(only)
                    .ok_or_else(|| FlowError::malformed(format!("no input port named '{}'", only))),
                [] => Err(FlowError::Configuration(format!(
                    "flow '{}' takes no input but one was supplied",
                    graph.name
                ))),
                _ => Err(FlowError::Configuration(
                    "input-port-name is required when the flow has several input ports".to_string(),
                )),
            },
        }
    }

    /// Drop the prepared flow and all cached bundle resolutions.
    pub async fn shutdown(&self) {
        self.prepared.lock().await.take();
        self.resolver.clear();
        tracing::info!("Engine shut down");
    }
}
