//! Standard-keyed plugin registry

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::StandardPlugin;
use crate::error::{IntelligenceError, IntelligenceResult};

/// Registered plugins, keyed by lower-cased standard label
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn StandardPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any plugin for the same standard
    pub fn register(&mut self, plugin: Arc<dyn StandardPlugin>) {
        let key = plugin.standard().to_ascii_lowercase();
        if self.plugins.contains_key(&key) {
            warn!(standard = plugin.standard(), "Replacing registered plugin");
        } else {
            debug!(
                standard = plugin.standard(),
                priority = plugin.priority(),
                "Registered plugin"
            );
        }
        self.plugins.insert(key, plugin);
    }

    /// Builder-style [`register`](Self::register)
    pub fn with_plugin(mut self, plugin: Arc<dyn StandardPlugin>) -> Self {
        self.register(plugin);
        self
    }

    pub fn get(&self, standard: &str) -> Option<Arc<dyn StandardPlugin>> {
        self.plugins.get(&standard.to_ascii_lowercase()).cloned()
    }

    /// Plugin for `standard` or `NoPluginForStandard`
    pub fn require(&self, standard: &str) -> IntelligenceResult<Arc<dyn StandardPlugin>> {
        self.get(standard)
            .ok_or_else(|| IntelligenceError::no_plugin(standard))
    }

    /// Registered standard labels, sorted
    pub fn standards(&self) -> Vec<String> {
        self.plugins
            .values()
            .map(|p| p.standard().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins accepting `message`, ordered by priority (highest first) then
    /// standard label
    pub fn compatible_plugins(&self, message: &str) -> Vec<Arc<dyn StandardPlugin>> {
        let mut compatible: Vec<_> = self
            .plugins
            .values()
            .filter(|p| p.can_analyze(message))
            .cloned()
            .collect();
        compatible.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.standard().cmp(b.standard()))
        });
        compatible
    }

    /// Best plugin for `message`, if any accepts it
    pub fn classify(&self, message: &str) -> Option<Arc<dyn StandardPlugin>> {
        self.compatible_plugins(message).into_iter().next()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("standards", &self.standards())
            .finish()
    }
}
