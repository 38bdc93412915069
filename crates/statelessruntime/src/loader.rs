//! Flow specification loading and validation.
//!
//! Loading is pure: it parses the document, checks every structural rule and
//! flattens the group hierarchy into one directed graph of processors and
//! ports. Binding happens after extension resolution and checks processor
//! properties and relationships against each node schema.

use crate::bundle::ResolvedExtensions;
use crate::registry::NodeFactory;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use statelesscore::{
    substitute_parameters, EndpointKind, EndpointRef, FlowError, FlowSpecification, NodeSchema,
    ProcessGroup, ProcessorSpec, PropertyMap,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_BACK_PRESSURE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
pub enum VertexKind {
    Processor(ProcessorSpec),
    InputPort { name: String },
    OutputPort { name: String },
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: String,
    pub group_id: String,
    pub kind: VertexKind,
}

impl Vertex {
    pub fn endpoint_kind(&self) -> EndpointKind {
        match self.kind {
            VertexKind::Processor(_) => EndpointKind::Processor,
            VertexKind::InputPort { .. } => EndpointKind::InputPort,
            VertexKind::OutputPort { .. } => EndpointKind::OutputPort,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub id: String,
    /// Empty when the source is a port
    pub relationships: BTreeSet<String>,
    pub back_pressure_threshold: usize,
}

/// A validated flow, flattened into one graph of processors and ports.
#[derive(Debug)]
pub struct FlowGraph {
    pub name: String,
    pub graph: DiGraph<Vertex, Edge>,
    /// Every vertex, upstream before downstream
    pub topo_order: Vec<NodeIndex>,
    root_input_ports: HashMap<String, NodeIndex>,
    required_types: BTreeSet<String>,
}

impl FlowGraph {
    pub fn root_input_port(&self, name: &str) -> Option<NodeIndex> {
        self.root_input_ports.get(name).copied()
    }

    pub fn root_input_port_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.root_input_ports.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn required_types(&self) -> &BTreeSet<String> {
        &self.required_types
    }

    pub fn processors(&self) -> impl Iterator<Item = (NodeIndex, &ProcessorSpec)> {
        self.graph.node_indices().filter_map(move |ix| match &self.graph[ix].kind {
            VertexKind::Processor(spec) => Some((ix, spec)),
            _ => None,
        })
    }

    pub fn has_incoming(&self, ix: NodeIndex) -> bool {
        self.graph
            .edges_directed(ix, Direction::Incoming)
            .next()
            .is_some()
    }

    pub fn outgoing(&self, ix: NodeIndex) -> impl Iterator<Item = (EdgeIndex, NodeIndex, &Edge)> {
        self.graph
            .edges_directed(ix, Direction::Outgoing)
            .map(|e| (e.id(), e.target(), e.weight()))
    }

    pub fn incoming_edges(&self, ix: NodeIndex) -> Vec<EdgeIndex> {
        let mut edges: Vec<EdgeIndex> = self
            .graph
            .edges_directed(ix, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        edges.sort();
        edges
    }

    /// Check processors against their schemas and prepare their properties.
    pub fn bind(
        self: &Arc<Self>,
        extensions: &ResolvedExtensions,
        parameters: &HashMap<String, String>,
    ) -> Result<BoundFlow, FlowError> {
        let mut processors = HashMap::new();

        for (ix, spec) in self.processors() {
            let factory = extensions
                .factory(&spec.type_id)
                .ok_or_else(|| FlowError::UnresolvedExtension(spec.type_id.clone()))?
                .clone();
            let schema = factory.schema();
            let properties = bind_properties(spec, &schema, parameters)?;

            for (_, _, edge) in self.outgoing(ix) {
                for relationship in &edge.relationships {
                    let dynamic = schema.dynamic_relationships
                        && properties.dynamic().contains_key(relationship);
                    if !schema.declares_relationship(relationship) && !dynamic {
                        return Err(FlowError::malformed(format!(
                            "connection '{}' uses relationship '{}', which {} ({}) does not declare",
                            edge.id,
                            relationship,
                            spec.display_name(),
                            spec.type_id
                        )));
                    }
                }
            }

            let mut relationships: BTreeSet<String> =
                schema.relationships.iter().map(|r| r.name.clone()).collect();
            if schema.dynamic_relationships {
                relationships.extend(properties.dynamic().keys().cloned());
            }

            processors.insert(
                ix,
                BoundProcessor {
                    id: spec.id.clone(),
                    type_id: spec.type_id.clone(),
                    factory,
                    properties: Arc::new(properties),
                    relationships,
                },
            );
        }

        Ok(BoundFlow {
            graph: self.clone(),
            processors,
        })
    }
}

fn bind_properties(
    spec: &ProcessorSpec,
    schema: &NodeSchema,
    parameters: &HashMap<String, String>,
) -> Result<PropertyMap, FlowError> {
    let invalid = |name: &str, reason: String| {
        FlowError::malformed(format!(
            "property '{}' of {}: {}",
            name,
            spec.display_name(),
            reason
        ))
    };

    let mut values = HashMap::new();
    let mut dynamic = BTreeMap::new();
    for (name, raw) in &spec.properties {
        let value = substitute_parameters(raw, parameters).map_err(|e| invalid(name, e))?;
        match schema.descriptor(name) {
            Some(descriptor) => {
                descriptor.kind.check(&value).map_err(|e| invalid(name, e))?;
                values.insert(name.clone(), value);
            }
            None if schema.dynamic_properties => {
                dynamic.insert(name.clone(), value);
            }
            None => return Err(invalid(name, "not a supported property".to_string())),
        }
    }

    for descriptor in &schema.properties {
        if values.contains_key(&descriptor.name) {
            continue;
        }
        match &descriptor.default {
            Some(default) => {
                values.insert(descriptor.name.clone(), default.clone());
            }
            None if descriptor.required => {
                return Err(invalid(&descriptor.name, "required but not set".to_string()))
            }
            None => {}
        }
    }

    Ok(PropertyMap::new(values, dynamic))
}

/// A processor ready to be instantiated for an invocation.
pub struct BoundProcessor {
    pub id: String,
    pub type_id: String,
    pub factory: Arc<dyn NodeFactory>,
    pub properties: Arc<PropertyMap>,
    /// Declared relationships plus any dynamic ones
    pub relationships: BTreeSet<String>,
}

/// A flow bound to resolved extensions; shared read-only by invocations.
pub struct BoundFlow {
    pub graph: Arc<FlowGraph>,
    pub processors: HashMap<NodeIndex, BoundProcessor>,
}

pub struct FlowLoader;

impl FlowLoader {
    pub fn load(document: &str) -> Result<FlowGraph, FlowError> {
        let spec = FlowSpecification::from_json_str(document)
            .map_err(|e| FlowError::malformed(format!("cannot parse flow document: {}", e)))?;
        Self::validate(&spec)
    }

    pub fn validate(spec: &FlowSpecification) -> Result<FlowGraph, FlowError> {
        let mut builder = GraphBuilder::default();
        builder.add_group(&spec.root_group, &mut Vec::new())?;
        for port in &spec.root_group.input_ports {
            let vertex = builder.index_of[&port.id];
            builder.root_input_ports.insert(port.name.clone(), vertex);
        }
        builder.connect_group(&spec.root_group)?;

        let topo_order = toposort(&builder.graph, None).map_err(|cycle| {
            FlowError::malformed(format!(
                "connections form a cycle through '{}'",
                builder.graph[cycle.node_id()].id
            ))
        })?;

        tracing::debug!(
            "Loaded flow '{}': {} vertices, {} connections",
            spec.name,
            builder.graph.node_count(),
            builder.graph.edge_count()
        );

        Ok(FlowGraph {
            name: spec.name.clone(),
            graph: builder.graph,
            topo_order,
            root_input_ports: builder.root_input_ports,
            required_types: spec.required_types(),
        })
    }
}

#[derive(Default)]
struct GraphBuilder {
    graph: DiGraph<Vertex, Edge>,
    index_of: HashMap<String, NodeIndex>,
    root_input_ports: HashMap<String, NodeIndex>,
    group_ids: HashSet<String>,
}

impl GraphBuilder {
    fn add_group(&mut self, group: &ProcessGroup, ancestors: &mut Vec<String>) -> Result<(), FlowError> {
        if ancestors.contains(&group.id) {
            return Err(FlowError::malformed(format!("group '{}' nests itself", group.id)));
        }
        if !self.group_ids.insert(group.id.clone()) || self.index_of.contains_key(&group.id) {
            return Err(FlowError::malformed(format!("duplicate id '{}'", group.id)));
        }

        for (ports, input) in [(&group.input_ports, true), (&group.output_ports, false)] {
            let mut names = HashSet::new();
            for port in ports {
                if !names.insert(port.name.as_str()) {
                    return Err(FlowError::malformed(format!(
                        "group '{}' has two {} ports named '{}'",
                        group.id,
                        if input { "input" } else { "output" },
                        port.name
                    )));
                }
                let kind = if input {
                    VertexKind::InputPort { name: port.name.clone() }
                } else {
                    VertexKind::OutputPort { name: port.name.clone() }
                };
                self.add_vertex(&port.id, &group.id, kind)?;
            }
        }

        for processor in &group.processors {
            self.add_vertex(&processor.id, &group.id, VertexKind::Processor(processor.clone()))?;
        }

        ancestors.push(group.id.clone());
        for child in &group.process_groups {
            self.add_group(child, ancestors)?;
        }
        ancestors.pop();
        Ok(())
    }

    fn add_vertex(&mut self, id: &str, group_id: &str, kind: VertexKind) -> Result<(), FlowError> {
        if self.index_of.contains_key(id) || self.group_ids.contains(id) {
            return Err(FlowError::malformed(format!("duplicate id '{}'", id)));
        }
        let ix = self.graph.add_node(Vertex {
            id: id.to_string(),
            group_id: group_id.to_string(),
            kind,
        });
        self.index_of.insert(id.to_string(), ix);
        Ok(())
    }

    fn connect_group(&mut self, group: &ProcessGroup) -> Result<(), FlowError> {
        let children: HashSet<&str> = group.process_groups.iter().map(|g| g.id.as_str()).collect();

        for (position, conn) in group.connections.iter().enumerate() {
            let id = conn
                .id
                .clone()
                .unwrap_or_else(|| format!("{}#{}", group.id, position));
            let source = self.endpoint(&id, &conn.source)?;
            let destination = self.endpoint(&id, &conn.destination)?;

            let source_vertex = &self.graph[source];
            let source_ok = match source_vertex.kind {
                VertexKind::Processor(_) | VertexKind::InputPort { .. } => source_vertex.group_id == group.id,
                VertexKind::OutputPort { .. } => children.contains(source_vertex.group_id.as_str()),
            };
            let destination_vertex = &self.graph[destination];
            let destination_ok = match destination_vertex.kind {
                VertexKind::Processor(_) | VertexKind::OutputPort { .. } => {
                    destination_vertex.group_id == group.id
                }
                VertexKind::InputPort { .. } => children.contains(destination_vertex.group_id.as_str()),
            };
            if !source_ok || !destination_ok {
                return Err(FlowError::malformed(format!(
                    "connection '{}' in group '{}' joins '{}' and '{}', which are not reachable from that group in that direction",
                    id, group.id, conn.source.id, conn.destination.id
                )));
            }

            let from_processor = matches!(source_vertex.kind, VertexKind::Processor(_));
            if from_processor && conn.relationships.is_empty() {
                return Err(FlowError::malformed(format!(
                    "connection '{}' leaves processor '{}' without naming a relationship",
                    id, conn.source.id
                )));
            }
            if !from_processor && !conn.relationships.is_empty() {
                return Err(FlowError::malformed(format!(
                    "connection '{}' leaves port '{}' but names relationships",
                    id, conn.source.id
                )));
            }

            let threshold = conn
                .back_pressure_object_threshold
                .unwrap_or(DEFAULT_BACK_PRESSURE_THRESHOLD);
            if threshold == 0 {
                return Err(FlowError::malformed(format!(
                    "connection '{}' has a zero back-pressure threshold",
                    id
                )));
            }

            self.graph.add_edge(
                source,
                destination,
                Edge {
                    id,
                    relationships: conn.relationships.iter().cloned().collect(),
                    back_pressure_threshold: threshold,
                },
            );
        }

        for child in &group.process_groups {
            self.connect_group(child)?;
        }
        Ok(())
    }

    fn endpoint(&self, connection_id: &str, endpoint: &EndpointRef) -> Result<NodeIndex, FlowError> {
        let ix = *self.index_of.get(&endpoint.id).ok_or_else(|| {
            FlowError::malformed(format!(
                "connection '{}' references unknown component '{}'",
                connection_id, endpoint.id
            ))
        })?;
        let actual = self.graph[ix].endpoint_kind();
        if actual != endpoint.kind {
            return Err(FlowError::malformed(format!(
                "connection '{}' declares '{}' as {:?} but it is {:?}",
                connection_id, endpoint.id, endpoint.kind, actual
            )));
        }
        Ok(ix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statelesscore::{ConnectionSpec, EndpointRef as E, ProcessGroup, ProcessorSpec};

    fn spec(root: ProcessGroup) -> FlowSpecification {
        FlowSpecification::new("test", root)
    }

    fn expect_malformed(root: ProcessGroup, fragment: &str) {
        match FlowLoader::validate(&spec(root)) {
            Err(FlowError::MalformedSpecification(message)) => {
                assert!(message.contains(fragment), "unexpected message: {}", message)
            }
            Err(other) => panic!("expected malformed specification, got {:?}", other),
            Ok(_) => panic!("expected malformed specification"),
        }
    }

    #[test]
    fn flattens_nested_groups() {
        let inner = ProcessGroup::new("inner", "Inner")
            .with_input_port("inner-in", "in")
            .with_output_port("inner-out", "failure")
            .with_processor(ProcessorSpec::new("fail", "fault.fail"))
            .connect(E::input_port("inner-in"), E::processor("fail"), Vec::<String>::new())
            .connect(E::processor("fail"), E::output_port("inner-out"), ["success"]);
        let root = ProcessGroup::new("root", "Root")
            .with_input_port("in", "In")
            .with_group(inner)
            .connect(E::input_port("in"), E::input_port("inner-in"), Vec::<String>::new());

        let graph = FlowLoader::validate(&spec(root)).unwrap();
        assert_eq!(graph.graph.node_count(), 4);
        assert_eq!(graph.graph.edge_count(), 3);
        assert_eq!(graph.root_input_port_names(), vec!["In"]);
        assert!(graph.required_types().contains("fault.fail"));

        let position = |id: &str| {
            graph
                .topo_order
                .iter()
                .position(|ix| graph.graph[*ix].id == id)
                .unwrap()
        };
        assert!(position("in") < position("fail"));
        assert!(position("fail") < position("inner-out"));
    }

    #[test]
    fn rejects_unknown_endpoint() {
        let root = ProcessGroup::new("root", "Root")
            .with_input_port("in", "In")
            .connect(E::input_port("in"), E::output_port("nowhere"), Vec::<String>::new());
        expect_malformed(root, "unknown component 'nowhere'");
    }

    #[test]
    fn rejects_mismatched_endpoint_kind() {
        let root = ProcessGroup::new("root", "Root")
            .with_input_port("in", "In")
            .with_output_port("out", "Out")
            .connect(E::input_port("in"), E::processor("out"), Vec::<String>::new());
        expect_malformed(root, "declares 'out' as Processor");
    }

    #[test]
    fn rejects_wrong_direction_ports() {
        let root = ProcessGroup::new("root", "Root")
            .with_input_port("in", "In")
            .with_output_port("out", "Out")
            .connect(E::output_port("out"), E::input_port("in"), Vec::<String>::new());
        expect_malformed(root, "not reachable");
    }

    #[test]
    fn rejects_connection_into_grandchild() {
        let grandchild = ProcessGroup::new("gc", "GC").with_input_port("gc-in", "in");
        let child = ProcessGroup::new("child", "Child").with_group(grandchild);
        let root = ProcessGroup::new("root", "Root")
            .with_input_port("in", "In")
            .with_group(child)
            .connect(E::input_port("in"), E::input_port("gc-in"), Vec::<String>::new());
        expect_malformed(root, "not reachable");
    }

    #[test]
    fn rejects_duplicate_port_names_and_ids() {
        let root = ProcessGroup::new("root", "Root")
            .with_output_port("a", "Out")
            .with_output_port("b", "Out");
        expect_malformed(root, "two output ports named 'Out'");

        let root = ProcessGroup::new("root", "Root")
            .with_input_port("x", "In")
            .with_output_port("x", "Out");
        expect_malformed(root, "duplicate id 'x'");
    }

    #[test]
    fn rejects_self_nesting_group() {
        let root = ProcessGroup::new("root", "Root").with_group(ProcessGroup::new("root", "Again"));
        expect_malformed(root, "nests itself");
    }

    #[test]
    fn rejects_cycles() {
        let root = ProcessGroup::new("root", "Root")
            .with_processor(ProcessorSpec::new("a", "debug.log"))
            .with_processor(ProcessorSpec::new("b", "debug.log"))
            .connect(E::processor("a"), E::processor("b"), ["success"])
            .connect(E::processor("b"), E::processor("a"), ["success"]);
        expect_malformed(root, "cycle");
    }

    #[test]
    fn processor_connections_need_relationships() {
        let root = ProcessGroup::new("root", "Root")
            .with_output_port("out", "Out")
            .with_processor(ProcessorSpec::new("a", "debug.log"))
            .connect(E::processor("a"), E::output_port("out"), Vec::<String>::new());
        expect_malformed(root, "without naming a relationship");
    }

    #[test]
    fn back_pressure_threshold_defaults_and_must_be_positive() {
        let connection = |threshold: Option<usize>| {
            let conn = ConnectionSpec {
                id: Some("in-out".to_string()),
                source: E::input_port("in"),
                destination: E::output_port("out"),
                relationships: Vec::new(),
                back_pressure_object_threshold: None,
            };
            let conn = match threshold {
                Some(t) => conn.with_back_pressure(t),
                None => conn,
            };
            ProcessGroup::new("root", "Root")
                .with_input_port("in", "In")
                .with_output_port("out", "Out")
                .with_connection(conn)
        };

        let threshold = |root| {
            let graph = FlowLoader::validate(&spec(root)).unwrap();
            let edge = graph.graph.edge_indices().next().unwrap();
            graph.graph[edge].back_pressure_threshold
        };
        assert_eq!(threshold(connection(None)), DEFAULT_BACK_PRESSURE_THRESHOLD);
        assert_eq!(threshold(connection(Some(3))), 3);
        expect_malformed(connection(Some(0)), "zero back-pressure threshold");
    }

    #[test]
    fn unparseable_document_is_malformed() {
        assert!(matches!(
            FlowLoader::load("{ not json"),
            Err(FlowError::MalformedSpecification(_))
        ));
    }
}
