//! Node type registry.
//!
//! Maps type names to constructors so graphs can be rebuilt from serialized
//! properties, and node types back to the name they were registered under.
//! The registry is an explicit object injected into the driver; there is no
//! process-wide state.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};

use crate::error::GraphError;
use crate::graph::node::Node;

type Factory = Box<dyn Fn() -> Box<dyn Node> + Send + Sync>;

struct RegistryEntry {
    description: String,
    type_id: TypeId,
    factory: Factory,
}

#[derive(Default)]
pub struct NodeRegistry {
    entries: BTreeMap<String, RegistryEntry>,
    type_names: HashMap<TypeId, String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry::default()
    }

    /// Registers `type_name`. A previous registration under the same name is
    /// replaced.
    pub fn register<N: Node + 'static>(
        &mut self,
        type_name: impl Into<String>,
        description: impl Into<String>,
        factory: impl Fn() -> N + Send + Sync + 'static,
    ) {
        let type_name = type_name.into();
        let entry = RegistryEntry {
            description: description.into(),
            type_id: TypeId::of::<N>(),
            factory: Box::new(move || Box::new(factory())),
        };
        if let Some(replaced) = self.entries.insert(type_name.clone(), entry) {
            self.type_names.remove(&replaced.type_id);
        }
        self.type_names.insert(TypeId::of::<N>(), type_name);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn create(&self, type_name: &str) -> Result<Box<dyn Node>, GraphError> {
        self.entries
            .get(type_name)
            .map(|e| (e.factory)())
            .ok_or_else(|| GraphError::UnknownType(type_name.to_string()))
    }

    pub fn description(&self, type_name: &str) -> Option<&str> {
        self.entries.get(type_name).map(|e| e.description.as_str())
    }

    /// The name a node type was registered under.
    pub fn type_name_of(&self, type_id: TypeId) -> Option<&str> {
        self.type_names.get(&type_id).map(String::as_str)
    }

    /// Registered type names, sorted.
    pub fn node_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}
