//! Data model for vendor configuration intelligence

pub mod address;
pub mod configuration;
pub mod deviation;
pub mod patterns;
pub mod specification;
pub mod validation;
pub mod vendor;

pub use address::ConfigurationAddress;
pub use configuration::{
    ChangeLog, ChangeType, ConfigurationChange, ConfigurationMetadata, UNKNOWN_VENDOR,
    UNKNOWN_VENDOR_CONFIDENCE, VendorConfiguration, VendorSignature,
};
pub use deviation::{DeviationType, FormatDeviation, Severity, merge_deviations};
pub use patterns::{
    ComponentPattern, FieldFrequency, FieldPatterns, MessagePattern, SegmentPattern,
    population_rate,
};
pub use specification::{
    DetectionInfo, FieldSpec, FieldUsage, MessageTypeSpec, SegmentSpec, SpecificationInfo,
    VendorSpecification,
};
pub use validation::{CatalogStatistics, LOW_CONFIDENCE_THRESHOLD, MessageValidationResult};
pub use vendor::{DetectionRule, MatchType, VendorDetectionPattern, VendorMatch};
