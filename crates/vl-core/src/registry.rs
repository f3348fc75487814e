//! Name-based factory registries
//!
//! Tasks register model pipelines and data loaders under string names; the
//! launcher resolves the names found in the config.

use crate::{Config, Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Constructor stored in a registry
pub type Factory<T> = Box<dyn Fn(&Config) -> Result<T> + Send + Sync>;

/// Mapping from identifiers to factories producing `T`
pub struct Registry<T> {
    name: &'static str,
    factories: BTreeMap<String, Factory<T>>,
}

impl<T> Registry<T> {
    /// Create an empty registry; `name` appears in lookup errors
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            factories: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a factory under `key`
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&Config) -> Result<T> + Send + Sync + 'static,
    {
        let key = key.into();
        if self.factories.contains_key(&key) {
            return Err(Error::Internal {
                message: format!("{} already has an entry named `{}`", self.name, key),
            });
        }
        debug!(registry = self.name, key = %key, "Registered factory");
        self.factories.insert(key, Box::new(factory));
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registered identifiers in sorted order
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Fail with [`Error::UnknownIdentifier`] unless `key` is registered
    pub fn ensure(&self, key: &str) -> Result<()> {
        self.lookup(key).map(|_| ())
    }

    fn lookup(&self, key: &str) -> Result<&Factory<T>> {
        self.factories
            .get(key)
            .ok_or_else(|| Error::UnknownIdentifier {
                registry: self.name.to_string(),
                name: key.to_string(),
                available: self.names(),
            })
    }

    /// Construct the entry registered under `key`
    pub fn build(&self, key: &str, cfg: &Config) -> Result<T> {
        let factory = self.lookup(key)?;
        factory(cfg)
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("entries", &self.names())
            .finish()
    }
}

/// Construct `name` from `registry` with the full config
pub fn build_from_cfg<T>(name: &str, cfg: &Config, registry: &Registry<T>) -> Result<T> {
    registry.build(name, cfg)
}
