//! Reference standard plugins
//!
//! - [`Hl7v2Plugin`]: pipe-delimited HL7 v2.x messages
//! - [`FhirJsonPlugin`]: FHIR R4 resources and bundles in JSON

pub mod fhir;
pub mod hl7v2;

use std::sync::Arc;

use crate::plugin::PluginRegistry;

pub use fhir::{FHIR_R4, FhirJsonPlugin};
pub use hl7v2::{HL7V23, Hl7v2Plugin};

/// Registry with both reference plugins registered
pub fn default_registry() -> PluginRegistry {
    PluginRegistry::new()
        .with_plugin(Arc::new(Hl7v2Plugin::new()))
        .with_plugin(Arc::new(FhirJsonPlugin::new()))
}
