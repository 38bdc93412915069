use crate::loader::{BoundFlow, VertexKind};
use crate::router::{
    TerminalPayload, FAILURE_NODE_ID_ATTRIBUTE, FAILURE_NODE_TYPE_ATTRIBUTE, FAILURE_REASON_ATTRIBUTE,
};
use futures::FutureExt;
use petgraph::graph::{EdgeIndex, NodeIndex};
use statelesscore::{BulletinCollector, Node, NodeContext, NodeError, NodeOutput, Payload};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Raw results of one completed pass, before outcome routing.
#[derive(Debug, Default)]
pub struct PassOutput {
    pub terminal: Vec<TerminalPayload>,
    /// Payloads drained by node failures
    pub unrouted_failures: Vec<Payload>,
    pub invocations: usize,
}

#[derive(Debug)]
pub enum PassResult {
    Completed(PassOutput),
    Cancelled,
}

struct Instance {
    node: Box<dyn Node>,
    ctx: NodeContext,
}

/// Drives one pass of a bound flow for at most one input payload.
///
/// Nodes run one at a time. The most downstream node with queued work is
/// always picked next, so queues drain before upstream nodes add to them and
/// every node with pending work runs before the pass declares quiescence.
pub struct PassExecutor<'a> {
    flow: &'a BoundFlow,
    bulletins: BulletinCollector,
    cancellation: CancellationToken,
}

impl<'a> PassExecutor<'a> {
    pub fn new(flow: &'a BoundFlow, bulletins: BulletinCollector, cancellation: CancellationToken) -> Self {
        Self {
            flow,
            bulletins,
            cancellation,
        }
    }

    /// Run the pass, seeding `input` at the given root input port.
    pub async fn run(self, input: Option<(NodeIndex, Payload)>) -> PassResult {
        let start = Instant::now();
        let mut pass = Pass::new(self.flow, &self.bulletins);
        let nodes = self.instantiate(&mut pass).await;

        if let Some((port, payload)) = input {
            pass.forward(port, payload);
        }

        let graph = &self.flow.graph;
        for &ix in &graph.topo_order {
            if !nodes.contains_key(&ix) || graph.has_incoming(ix) {
                continue;
            }
            let result = self.invoke(&nodes, ix, None).await;
            if self.cancellation.is_cancelled() {
                return PassResult::Cancelled;
            }
            pass.complete(ix, None, result);
        }

        while let Some((ix, edge)) = pass.next_ready() {
            if self.cancellation.is_cancelled() {
                return PassResult::Cancelled;
            }
            let Some(payload) = pass.queues.get_mut(&edge).and_then(VecDeque::pop_front) else {
                continue;
            };
            let held = payload.clone();
            let result = self.invoke(&nodes, ix, Some(payload)).await;
            if self.cancellation.is_cancelled() {
                return PassResult::Cancelled;
            }
            pass.complete(ix, Some(held), result);
        }

        let output = pass.finish();
        tracing::info!(
            "Pass over '{}' finished in {}ms: {} invocations, {} terminal, {} failed",
            graph.name,
            start.elapsed().as_millis(),
            output.invocations,
            output.terminal.len(),
            output.unrouted_failures.len()
        );
        PassResult::Completed(output)
    }

    /// Create fresh node instances; a node that cannot start is failed up front.
    async fn instantiate(&self, pass: &mut Pass<'_>) -> HashMap<NodeIndex, Instance> {
        let mut nodes = HashMap::new();

        for (&ix, bound) in &self.flow.processors {
            let created = match bound.factory.create(&bound.properties) {
                Ok(mut node) => match node.initialize().await {
                    Ok(()) => Ok(node),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            match created {
                Ok(node) => {
                    let ctx = NodeContext {
                        node_id: bound.id.clone(),
                        properties: bound.properties.clone(),
                        bulletins: self.bulletins.emitter(&bound.id, &bound.type_id),
                        cancellation: self.cancellation.clone(),
                    };
                    nodes.insert(ix, Instance { node, ctx });
                }
                Err(e) => pass.fail_node(ix, &e, None),
            }
        }

        nodes
    }

    async fn invoke(
        &self,
        nodes: &HashMap<NodeIndex, Instance>,
        ix: NodeIndex,
        input: Option<Payload>,
    ) -> Result<NodeOutput, NodeError> {
        let instance = nodes
            .get(&ix)
            .ok_or_else(|| NodeError::failed("node was not instantiated"))?;
        tracing::debug!(
            "Triggering {} ({}){}",
            instance.ctx.node_id,
            instance.node.node_type(),
            if input.is_some() { "" } else { " as source" }
        );

        let start = Instant::now();
        let call = AssertUnwindSafe(instance.node.on_trigger(&instance.ctx, input)).catch_unwind();
        let result = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(NodeError::Cancelled),
            result = call => result.unwrap_or_else(|_| Err(NodeError::failed("node panicked"))),
        };

        tracing::debug!(
            "{} returned in {}ms",
            instance.ctx.node_id,
            start.elapsed().as_millis()
        );
        result
    }
}

/// Mutable state of one pass: connection queues, failed nodes and results.
struct Pass<'a> {
    flow: &'a BoundFlow,
    bulletins: &'a BulletinCollector,
    queues: HashMap<EdgeIndex, VecDeque<Payload>>,
    failed: HashMap<NodeIndex, String>,
    output: PassOutput,
}

impl<'a> Pass<'a> {
    fn new(flow: &'a BoundFlow, bulletins: &'a BulletinCollector) -> Self {
        Self {
            flow,
            bulletins,
            queues: HashMap::new(),
            failed: HashMap::new(),
            output: PassOutput::default(),
        }
    }

    /// Most downstream processor with queued input and room downstream.
    fn next_ready(&self) -> Option<(NodeIndex, EdgeIndex)> {
        let graph = &self.flow.graph;

        for &ix in graph.topo_order.iter().rev() {
            if !self.flow.processors.contains_key(&ix) || self.failed.contains_key(&ix) {
                continue;
            }
            let Some(edge) = graph
                .incoming_edges(ix)
                .into_iter()
                .find(|e| self.queued(*e) > 0)
            else {
                continue;
            };
            let has_room = graph
                .outgoing(ix)
                .all(|(e, _, weight)| self.queued(e) < weight.back_pressure_threshold);
            if has_room {
                return Some((ix, edge));
            }
        }

        None
    }

    fn queued(&self, edge: EdgeIndex) -> usize {
        self.queues.get(&edge).map_or(0, VecDeque::len)
    }

    fn complete(&mut self, ix: NodeIndex, held: Option<Payload>, result: Result<NodeOutput, NodeError>) {
        self.output.invocations += 1;
        let bound = &self.flow.processors[&ix];

        match result {
            Ok(output) => {
                if let Some((relationship, _)) = output
                    .transfers
                    .iter()
                    .find(|(rel, _)| !bound.relationships.contains(rel))
                {
                    let error = NodeError::UndeclaredRelationship(relationship.clone());
                    self.fail_node(ix, &error, held);
                    return;
                }
                for (relationship, payload) in output.transfers {
                    self.route(ix, &relationship, payload);
                }
            }
            // A failed source trigger still counts as one failed payload.
            Err(error) => self.fail_node(ix, &error, held.or_else(|| Some(Payload::empty()))),
        }
    }

    /// Send a node's output along every connection carrying `relationship`.
    fn route(&mut self, ix: NodeIndex, relationship: &str, payload: Payload) {
        let targets: Vec<(EdgeIndex, NodeIndex)> = self
            .flow
            .graph
            .outgoing(ix)
            .filter(|(_, _, edge)| edge.relationships.contains(relationship))
            .map(|(e, t, _)| (e, t))
            .collect();

        if targets.is_empty() {
            tracing::debug!(
                "{}: relationship '{}' is auto-terminated",
                self.flow.graph.graph[ix].id,
                relationship
            );
            return;
        }
        self.fan_out(targets, payload);
    }

    /// Pass a payload through a port.
    fn forward(&mut self, port: NodeIndex, payload: Payload) {
        let targets: Vec<(EdgeIndex, NodeIndex)> = self
            .flow
            .graph
            .outgoing(port)
            .map(|(e, t, _)| (e, t))
            .collect();
        if !targets.is_empty() {
            self.fan_out(targets, payload);
            return;
        }

        let vertex = &self.flow.graph.graph[port];
        match &vertex.kind {
            VertexKind::OutputPort { name } => self.output.terminal.push(TerminalPayload {
                port_name: name.clone(),
                payload,
            }),
            _ => tracing::warn!(
                "Dropping payload at '{}': nothing is connected downstream",
                vertex.id
            ),
        }
    }

    /// Every target gets its own copy.
    fn fan_out(&mut self, targets: Vec<(EdgeIndex, NodeIndex)>, payload: Payload) {
        for (edge, target) in targets {
            self.deliver(edge, target, payload.clone());
        }
    }

    fn deliver(&mut self, edge: EdgeIndex, target: NodeIndex, payload: Payload) {
        match self.flow.graph.graph[target].kind {
            VertexKind::Processor(_) if self.failed.contains_key(&target) => {
                self.drain(target, payload)
            }
            VertexKind::Processor(_) => self.queues.entry(edge).or_default().push_back(payload),
            _ => self.forward(target, payload),
        }
    }

    fn fail_node(&mut self, ix: NodeIndex, error: &NodeError, held: Option<Payload>) {
        let bound = &self.flow.processors[&ix];
        let reason = error.to_string();
        self.bulletins
            .emitter(&bound.id, &bound.type_id)
            .error(format!("{} failed: {}", bound.id, reason));
        self.failed.insert(ix, reason);

        if let Some(payload) = held {
            self.drain(ix, payload);
        }
        for edge in self.flow.graph.incoming_edges(ix) {
            if let Some(queue) = self.queues.remove(&edge) {
                for payload in queue {
                    self.drain(ix, payload);
                }
            }
        }
    }

    fn drain(&mut self, ix: NodeIndex, payload: Payload) {
        let bound = &self.flow.processors[&ix];
        let reason = self.failed.get(&ix).cloned().unwrap_or_default();
        self.output.unrouted_failures.push(
            payload
                .with_attribute(FAILURE_NODE_ID_ATTRIBUTE, bound.id.clone())
                .with_attribute(FAILURE_NODE_TYPE_ATTRIBUTE, bound.type_id.clone())
                .with_attribute(FAILURE_REASON_ATTRIBUTE, reason),
        );
    }

    fn finish(self) -> PassOutput {
        let stranded: usize = self.queues.values().map(VecDeque::len).sum();
        if stranded > 0 {
            tracing::warn!("{} payload(s) left queued when the pass went quiet", stranded);
        }
        self.output
    }
}
