//! Plugin-orchestrating analysis services
//!
//! Each service routes a query to the plugin registered for a standard and
//! normalizes what comes back. No standard-specific logic lives here.

mod confidence;
mod deviations;
mod field_patterns;
mod multi_standard;
mod vendor;

pub use confidence::ConfidenceCalculationService;
pub use deviations::FormatDeviationDetector;
pub use field_patterns::FieldPatternAnalysisService;
pub use multi_standard::{MultiStandardVendorDetectionService, StandardGroups};
pub use vendor::VendorDetectionService;

use crate::error::IntelligenceError;

/// Normalize an error returned by a plugin capability.
///
/// Cancellation and validation errors pass through; anything else is
/// reported as an analysis failure of `stage`.
pub(crate) fn plugin_failure(stage: &str, error: IntelligenceError) -> IntelligenceError {
    match error {
        IntelligenceError::Cancelled
        | IntelligenceError::Validation(_)
        | IntelligenceError::Analysis { .. } => error,
        other => IntelligenceError::analysis(stage, other.to_string()),
    }
}

/// Error for a plugin that lacks the capability a stage needs
pub(crate) fn missing_capability(standard: &str, capability: &str) -> IntelligenceError {
    IntelligenceError::analysis(
        capability,
        format!("plugin for '{standard}' does not support {capability}"),
    )
}
