use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A flow document: one root process group and everything nested in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSpecification {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub root_group: ProcessGroup,
}

impl FlowSpecification {
    pub fn new(name: impl Into<String>, root_group: ProcessGroup) -> Self {
        Self {
            name: name.into(),
            description: None,
            root_group,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Every extension type referenced anywhere in the flow.
    pub fn required_types(&self) -> BTreeSet<String> {
        let mut types = BTreeSet::new();
        self.root_group.walk(&mut |group| {
            types.extend(group.processors.iter().map(|p| p.type_id.clone()));
        });
        types
    }
}

/// A group of processors, ports, connections and child groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub input_ports: Vec<PortSpec>,
    #[serde(default)]
    pub output_ports: Vec<PortSpec>,
    #[serde(default)]
    pub processors: Vec<ProcessorSpec>,
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
    #[serde(default)]
    pub process_groups: Vec<ProcessGroup>,
}

impl ProcessGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_input_port(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.input_ports.push(PortSpec::new(id, name));
        self
    }

    pub fn with_output_port(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.output_ports.push(PortSpec::new(id, name));
        self
    }

    pub fn with_processor(mut self, processor: ProcessorSpec) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn with_group(mut self, group: ProcessGroup) -> Self {
        self.process_groups.push(group);
        self
    }

    pub fn with_connection(mut self, connection: ConnectionSpec) -> Self {
        self.connections.push(connection);
        self
    }

    /// Connect two endpoints, optionally restricted to processor relationships.
    pub fn connect<I, S>(mut self, source: EndpointRef, destination: EndpointRef, relationships: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = format!("{}-{}", source.id, destination.id);
        self.connections.push(ConnectionSpec {
            id: Some(id),
            source,
            destination,
            relationships: relationships.into_iter().map(Into::into).collect(),
            back_pressure_object_threshold: None,
        });
        self
    }

    /// Visit this group and every nested group, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a ProcessGroup)) {
        visit(self);
        for child in &self.process_groups {
            child.walk(visit);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    pub id: String,
    pub name: String,
}

impl PortSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A processing node: an extension type plus its configured properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ProcessorSpec {
    pub fn new(id: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            name: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: EndpointRef,
    pub destination: EndpointRef,
    /// Processor relationships carried by this connection; empty for ports.
    #[serde(default)]
    pub relationships: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_pressure_object_threshold: Option<usize>,
}

impl ConnectionSpec {
    pub fn with_back_pressure(mut self, threshold: usize) -> Self {
        self.back_pressure_object_threshold = Some(threshold);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointKind {
    Processor,
    InputPort,
    OutputPort,
}

/// One end of a connection. Ids are unique across the whole flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EndpointKind,
}

impl EndpointRef {
    pub fn processor(id: impl Into<String>) -> Self {
        Self { id: id.into(), kind: EndpointKind::Processor }
    }

    pub fn input_port(id: impl Into<String>) -> Self {
        Self { id: id.into(), kind: EndpointKind::InputPort }
    }

    pub fn output_port(id: impl Into<String>) -> Self {
        Self { id: id.into(), kind: EndpointKind::OutputPort }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_document_with_nested_group() {
        let json = r#"{
            "name": "inner",
            "rootGroup": {
                "id": "root",
                "inputPorts": [{"id": "in", "name": "In"}],
                "outputPorts": [{"id": "out", "name": "failure"}],
                "processors": [{"id": "p", "type": "fault.fail", "properties": {"Message": "x"}}],
                "connections": [
                    {"source": {"id": "in", "type": "INPUT_PORT"}, "destination": {"id": "p", "type": "PROCESSOR"}}
                ],
                "processGroups": [{"id": "child", "processors": [{"id": "q", "type": "debug.log"}]}]
            }
        }"#;

        let spec = FlowSpecification::from_json_str(json).unwrap();
        assert_eq!(spec.root_group.input_ports[0].name, "In");
        assert_eq!(spec.root_group.connections[0].destination.kind, EndpointKind::Processor);
        assert_eq!(
            spec.required_types().into_iter().collect::<Vec<_>>(),
            vec!["debug.log".to_string(), "fault.fail".to_string()]
        );
    }

    #[test]
    fn builder_round_trips_through_json() {
        let root = ProcessGroup::new("root", "Root")
            .with_input_port("in", "In")
            .with_output_port("out", "Out")
            .connect(EndpointRef::input_port("in"), EndpointRef::output_port("out"), Vec::<String>::new());
        let spec = FlowSpecification::new("passthrough", root);

        let json = spec.to_json_string().unwrap();
        let back = FlowSpecification::from_json_str(&json).unwrap();
        assert_eq!(back.root_group.connections.len(), 1);
        assert_eq!(back.root_group.connections[0].id.as_deref(), Some("in-out"));
        assert!(back.required_types().is_empty());
    }
}
