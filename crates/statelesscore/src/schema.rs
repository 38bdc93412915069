use crate::{PropertyDescriptor, PropertyKind};

/// Declared shape of an extension type: its properties and relationships.
///
/// Processor configuration and connections are checked against the schema
/// before a pass starts.
#[derive(Debug, Clone)]
pub struct NodeSchema {
    pub type_id: String,
    pub description: String,
    pub properties: Vec<PropertyDescriptor>,
    pub relationships: Vec<RelationshipDescriptor>,
    /// Accept properties that are not declared.
    pub dynamic_properties: bool,
    /// Every dynamic property also names a relationship.
    pub dynamic_relationships: bool,
}

#[derive(Debug, Clone)]
pub struct RelationshipDescriptor {
    pub name: String,
    pub description: String,
}

impl NodeSchema {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            description: String::new(),
            properties: Vec::new(),
            relationships: Vec::new(),
            dynamic_properties: false,
            dynamic_relationships: false,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn property(mut self, descriptor: PropertyDescriptor) -> Self {
        self.properties.push(descriptor);
        self
    }

    pub fn string_property(self, name: &str, default: Option<&str>) -> Self {
        let mut descriptor = PropertyDescriptor::new(name, PropertyKind::String);
        descriptor.default = default.map(str::to_string);
        self.property(descriptor)
    }

    pub fn relationship(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.relationships.push(RelationshipDescriptor {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    pub fn with_dynamic_properties(mut self) -> Self {
        self.dynamic_properties = true;
        self
    }

    pub fn with_dynamic_relationships(mut self) -> Self {
        self.dynamic_properties = true;
        self.dynamic_relationships = true;
        self
    }

    pub fn descriptor(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn declares_relationship(&self, name: &str) -> bool {
        self.relationships.iter().any(|r| r.name == name)
    }
}
