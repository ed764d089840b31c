//! Semantic field name resolution

use std::sync::Arc;

use tracing::debug;

use crate::error::{IntelligenceError, IntelligenceResult};
use crate::plugin::PluginRegistry;

/// Maps semantic names such as `patient.lastname` to a concrete field
/// address in a standard (`PID.5.1`, `Patient.name.family`)
#[derive(Debug, Clone)]
pub struct FieldPathResolver {
    registry: Arc<PluginRegistry>,
    default_standard: Option<String>,
}

impl FieldPathResolver {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            default_standard: None,
        }
    }

    /// Standard used when a call does not name one
    pub fn with_default_standard(mut self, standard: impl Into<String>) -> Self {
        self.default_standard = Some(standard.into());
        self
    }

    /// Resolve `semantic_name` in `standard` (or the default standard).
    ///
    /// Returns `Ok(None)` when the plugin does not know the name.
    pub fn resolve(
        &self,
        semantic_name: &str,
        standard: Option<&str>,
    ) -> IntelligenceResult<Option<String>> {
        let semantic_name = semantic_name.trim();
        if semantic_name.is_empty() {
            return Err(IntelligenceError::validation("Semantic field name is empty"));
        }
        let standard = standard
            .or(self.default_standard.as_deref())
            .ok_or_else(|| {
                IntelligenceError::validation("No standard given and no default configured")
            })?;

        let plugin = self.registry.require(standard)?;
        let Some(paths) = plugin.field_paths() else {
            debug!(standard, "Plugin has no field path mapping");
            return Ok(None);
        };
        Ok(paths.resolve_field_path(&semantic_name.to_ascii_lowercase()))
    }

    /// Semantic names known for `standard`, sorted
    pub fn semantic_names(&self, standard: &str) -> IntelligenceResult<Vec<String>> {
        let plugin = self.registry.require(standard)?;
        let mut names = plugin
            .field_paths()
            .map(|paths| paths.semantic_names())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{FhirJsonPlugin, Hl7v2Plugin};

    fn resolver() -> FieldPathResolver {
        let registry = PluginRegistry::new()
            .with_plugin(Arc::new(Hl7v2Plugin::new()))
            .with_plugin(Arc::new(FhirJsonPlugin::new()));
        FieldPathResolver::new(Arc::new(registry)).with_default_standard("HL7v23")
    }

    #[test]
    fn test_resolve_default_standard() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve("Patient.LastName", None).unwrap().as_deref(),
            Some("PID.5.1")
        );
        assert_eq!(
            resolver
                .resolve("patient.lastname", Some("FHIR R4"))
                .unwrap()
                .as_deref(),
            Some("Patient.name.family")
        );
        assert!(resolver.resolve("patient.shoe_size", None).unwrap().is_none());
    }

    #[test]
    fn test_resolve_errors() {
        let resolver = resolver();
        assert!(matches!(
            resolver.resolve("", None),
            Err(IntelligenceError::Validation(_))
        ));
        assert_eq!(
            resolver.resolve("patient.lastname", Some("X12")).unwrap_err(),
            IntelligenceError::no_plugin("X12")
        );

        let bare = FieldPathResolver::new(Arc::new(PluginRegistry::new()));
        assert!(matches!(
            bare.resolve("patient.lastname", None),
            Err(IntelligenceError::Validation(_))
        ));
    }
}
