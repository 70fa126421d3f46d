//! Message type descriptors and topic hierarchies.
//!
//! Applications register their message contracts once at startup. Each type's
//! topic list (the type itself, its base-type chain and every interface, walked
//! to the root) is computed at build time and never again.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Declared shape of one message type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTypeDescriptor {
    /// Stable full type name; this is the type's topic
    pub full_name: String,
    pub base_type: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

impl MessageTypeDescriptor {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            base_type: None,
            interfaces: Vec::new(),
        }
    }

    pub fn extends(mut self, base_type: impl Into<String>) -> Self {
        self.base_type = Some(base_type.into());
        self
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }
}

/// Precomputed topic hierarchies for every registered message type
#[derive(Debug, Clone, Default)]
pub struct MessageTypeRegistry {
    topics: HashMap<String, Vec<String>>,
}

impl MessageTypeRegistry {
    pub fn builder() -> MessageTypeRegistryBuilder {
        MessageTypeRegistryBuilder::default()
    }

    /// The type's own topic first, then its ancestors. Unregistered types map
    /// to their own topic only.
    pub fn topics_for(&self, message_type: &str) -> Vec<String> {
        self.topics
            .get(message_type)
            .cloned()
            .unwrap_or_else(|| vec![message_type.to_string()])
    }

    pub fn is_registered(&self, message_type: &str) -> bool {
        self.topics.contains_key(message_type)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct MessageTypeRegistryBuilder {
    descriptors: HashMap<String, MessageTypeDescriptor>,
}

impl MessageTypeRegistryBuilder {
    pub fn register(mut self, descriptor: MessageTypeDescriptor) -> Self {
        self.descriptors
            .insert(descriptor.full_name.clone(), descriptor);
        self
    }

    pub fn build(self) -> MessageTypeRegistry {
        let topics = self
            .descriptors
            .keys()
            .map(|name| (name.clone(), self.walk(name)))
            .collect();
        MessageTypeRegistry { topics }
    }

    /// Depth-first walk: base-type chain before interfaces, each topic once
    fn walk(&self, root: &str) -> Vec<String> {
        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root.to_string()];

        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(descriptor) = self.descriptors.get(&name) {
                // Pushed in reverse so the base type is visited first
                for interface in descriptor.interfaces.iter().rev() {
                    stack.push(interface.clone());
                }
                if let Some(base) = &descriptor.base_type {
                    stack.push(base.clone());
                }
            }
            ordered.push(name);
        }

        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MessageTypeRegistry {
        MessageTypeRegistry::builder()
            .register(MessageTypeDescriptor::new("Events.IOrderEvent"))
            .register(MessageTypeDescriptor::new("Events.IAuditable"))
            .register(
                MessageTypeDescriptor::new("Events.OrderEventBase")
                    .implements("Events.IOrderEvent"),
            )
            .register(
                MessageTypeDescriptor::new("Events.OrderPlaced")
                    .extends("Events.OrderEventBase")
                    .implements("Events.IAuditable")
                    .implements("Events.IOrderEvent"),
            )
            .build()
    }

    #[test]
    fn test_topics_walk_full_hierarchy() {
        let topics = registry().topics_for("Events.OrderPlaced");
        assert_eq!(topics[0], "Events.OrderPlaced");
        assert_eq!(topics[1], "Events.OrderEventBase");
        assert!(topics.contains(&"Events.IOrderEvent".to_string()));
        assert!(topics.contains(&"Events.IAuditable".to_string()));
        assert_eq!(topics.len(), 4, "interfaces reached twice appear once: {topics:?}");
    }

    #[test]
    fn test_leaf_type_topics() {
        assert_eq!(
            registry().topics_for("Events.IAuditable"),
            vec!["Events.IAuditable".to_string()]
        );
    }

    #[test]
    fn test_unregistered_type_is_its_own_topic() {
        let registry = registry();
        assert!(!registry.is_registered("Other.Thing"));
        assert_eq!(registry.topics_for("Other.Thing"), vec!["Other.Thing".to_string()]);
    }

    #[test]
    fn test_cycles_terminate() {
        let registry = MessageTypeRegistry::builder()
            .register(MessageTypeDescriptor::new("A").implements("B"))
            .register(MessageTypeDescriptor::new("B").implements("A"))
            .build();
        assert_eq!(registry.topics_for("A"), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(registry.len(), 2);
    }
}
