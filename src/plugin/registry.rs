//! Priority-tolerant storage and lifecycle management for plugins.
//!
//! Grounded primarily on the teacher's `resolver::ResolverRegistry`
//! (ordered storage, `register()`, iteration helpers) and on
//! `aniplux/core/plugin_manager.py::PluginManager` for the lifecycle
//! semantics the teacher's stateless resolvers never needed: plugins here
//! can be disabled and reloaded at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{instrument, warn};

use crate::model::SourceConfig;
use crate::plugin::Plugin;

/// An entry in the registry: the plugin itself plus its enabled/disabled flag.
struct Entry {
    plugin: Arc<dyn Plugin>,
    enabled: bool,
}

/// Ordered collection of active/inactive plugins.
#[derive(Default)]
pub struct PluginRegistry {
    entries: Vec<Entry>,
    index_by_name: HashMap<String, usize>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugin_count", &self.entries.len())
            .finish()
    }
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a set of plugins, applying `config`'s
    /// disabled-set as the initial enabled/disabled state.
    #[must_use]
    pub fn with_config(plugins: Vec<Arc<dyn Plugin>>, config: &SourceConfig) -> Self {
        let mut registry = Self::new();
        for plugin in plugins {
            let name = plugin.metadata().name.clone();
            registry.register(plugin);
            if config.is_disabled(&name) {
                // Registration always enables; explicitly honor the config.
                let _ = registry.disable(&name);
            }
        }
        registry
    }

    /// Registers a plugin, enabled by default. Warns and replaces on a
    /// duplicate name rather than panicking (mirrors the teacher's
    /// construction-failure-tolerant registration: one bad/duplicate plugin
    /// never prevents the rest of the registry from being usable).
    #[instrument(skip(self, plugin), fields(name))]
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.metadata().name.clone();
        tracing::Span::current().record("name", &name);

        if let Some(&idx) = self.index_by_name.get(&name) {
            warn!(name = %name, "replacing previously registered plugin with same name");
            self.entries[idx] = Entry {
                plugin,
                enabled: true,
            };
            return;
        }

        self.index_by_name.insert(name, self.entries.len());
        self.entries.push(Entry {
            plugin,
            enabled: true,
        });
    }

    /// Removes a plugin entirely.
    pub fn unregister(&mut self, name: &str) -> bool {
        let Some(idx) = self.index_by_name.remove(name) else {
            return false;
        };
        self.entries.remove(idx);
        // Re-index everything after the removed entry.
        for (_, i) in self.index_by_name.iter_mut() {
            if *i > idx {
                *i -= 1;
            }
        }
        true
    }

    /// Marks a registered plugin as enabled. Returns `false` if unknown.
    pub fn enable(&mut self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    /// Marks a registered plugin as disabled. Returns `false` if unknown.
    pub fn disable(&mut self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let Some(&idx) = self.index_by_name.get(name) else {
            return false;
        };
        self.entries[idx].enabled = enabled;
        true
    }

    /// Replaces a named plugin's instance in place without disturbing the
    /// rest of the registry or its position.
    ///
    /// "Reload" here means re-running the plugin's constructor: there is
    /// no dynamic-library loading, plugins are compiled in. The operation
    /// exists so the orchestrator/CLI can recover one wedged plugin (e.g.
    /// after a `validate_connection()` failure) without restarting.
    pub fn reload(&mut self, name: &str, replacement: Arc<dyn Plugin>) -> bool {
        let Some(&idx) = self.index_by_name.get(name) else {
            return false;
        };
        let was_enabled = self.entries[idx].enabled;
        self.entries[idx] = Entry {
            plugin: replacement,
            enabled: was_enabled,
        };
        true
    }

    /// All plugins currently enabled, in registration order.
    #[must_use]
    pub fn active_plugins(&self) -> Vec<&dyn Plugin> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.plugin.as_ref())
            .collect()
    }

    /// Returns an owned handle to the named plugin, if registered and
    /// enabled. Used by the download engine, which spawns one `'static`
    /// Tokio task per download and therefore needs an owned `Arc`, not a
    /// borrow tied to the registry.
    #[must_use]
    pub fn plugin_handle(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let &idx = self.index_by_name.get(name)?;
        let entry = &self.entries[idx];
        entry.enabled.then(|| Arc::clone(&entry.plugin))
    }

    /// Returns active plugins matching `source_name` when given, or all
    /// active plugins when `None`.
    #[must_use]
    pub fn find_handlers(&self, source_name: Option<&str>) -> Vec<&dyn Plugin> {
        match source_name {
            Some(name) => self
                .active_plugins()
                .into_iter()
                .filter(|p| p.metadata().name == name)
                .collect(),
            None => self.active_plugins(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn plugin_count(&self) -> usize {
        self.entries.len()
    }
}
