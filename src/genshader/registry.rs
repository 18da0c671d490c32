use std::collections::HashMap;

use super::ShaderGenerator;
use super::nodes::ShaderNodeImpl;

pub type ImplementationFactory = fn() -> Box<dyn ShaderNodeImpl>;

/// Native implementations keyed by implementation element name.
#[derive(Debug, Default)]
pub struct ImplementationRegistry {
    factories: HashMap<String, ImplementationFactory>,
}

impl ImplementationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding everything `generator` provides natively.
    pub fn for_generator(generator: &dyn ShaderGenerator) -> Self {
        let mut registry = Self::new();
        generator.register_implementations(&mut registry);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: ImplementationFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn register_all<I, S>(&mut self, names: I, factory: ImplementationFactory)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.register(name, factory);
        }
    }

    pub fn factory(&self, name: &str) -> Option<ImplementationFactory> {
        self.factories.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
