//! The plugin manager resolves plugin names to task implementations.
//!
//! Dynamic loading is outside the scheduler core; implementations register a
//! factory per plugin name (optionally scoped to a package) and the graph
//! loader instantiates nodes through [`PluginManager::create()`].

use std::collections::HashMap;

use anyhow::Result;

use crate::task::{Task, TaskKind};
use crate::Error;

type TaskFactory = Box<dyn Fn() -> TaskKind + Send + Sync>;

/// Registry mapping plugin names to task factories.
#[derive(Default)]
pub struct PluginManager {
    // package "" holds plugins registered without a package
    packages: HashMap<String, HashMap<String, TaskFactory>>,
}

impl PluginManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin factory in the default package.
    pub fn register<F>(&mut self, plugin: impl Into<String>, factory: F)
    where
        F: Fn() -> TaskKind + Send + Sync + 'static, {
        self.register_in_package("", plugin, factory);
    }

    /// Register a plugin factory under a package name.
    pub fn register_in_package<F>(&mut self, package: impl Into<String>, plugin: impl Into<String>, factory: F)
    where
        F: Fn() -> TaskKind + Send + Sync + 'static, {
        self.packages
            .entry(package.into())
            .or_default()
            .insert(plugin.into(), Box::new(factory));
    }

    /// True if a factory is registered under `plugin` in the default package.
    pub fn is_available(&self, plugin: &str) -> bool {
        self.packages
            .get("")
            .map(|plugins| plugins.contains_key(plugin))
            .unwrap_or(false)
    }

    /// All plugin names in the default package.
    pub fn list(&self) -> Vec<&str> {
        self.packages
            .get("")
            .map(|plugins| plugins.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Instantiate a task from a registered plugin.
    /// # Errors
    /// - Fails with [`Error::PluginNotFound`] if no factory is registered
    ///   under the requested name.
    pub fn create(&self, package: Option<&str>, plugin: &str, identifier: &str) -> Result<Task> {
        let package = package.unwrap_or("");
        let factory = self
            .packages
            .get(package)
            .and_then(|plugins| plugins.get(plugin))
            .ok_or_else(|| Error::PluginNotFound(plugin.to_string()))?;
        let task = Task::new(plugin, identifier, factory())?;
        Ok(match package {
            "" => task,
            name => task.with_package(name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::builtin::DummyTask;

    #[test]
    fn unknown_plugin_is_reported() {
        let manager = PluginManager::new();
        let err = manager.create(None, "missing", "m").unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::PluginNotFound(name)) if name == "missing"));
    }

    #[test]
    fn packaged_plugins_resolve() {
        let mut manager = PluginManager::new();
        manager.register_in_package("base", "dummy", DummyTask::kind);
        let task = manager.create(Some("base"), "dummy", "d").unwrap();
        assert_eq!(task.package_name(), Some("base"));
        assert_eq!(task.plugin_name(), "dummy");
        assert!(manager.create(None, "dummy", "d").is_err());
    }
}
