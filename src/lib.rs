//! Pidgeon Intelligence - vendor configuration inference for healthcare messages
//!
//! Provides:
//! - A plugin contract for message standards (HL7 v2.x, FHIR, ...)
//! - Field pattern, format deviation and vendor detection analysis
//! - Configuration inference, merging and an in-memory catalog
//! - File-backed repositories for vendor detection patterns and specifications
//! - Semantic field path resolution

pub mod analysis;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod error;
pub mod inference;
pub mod models;
pub mod plugin;
pub mod plugins;
pub mod repository;
pub mod resolver;
pub mod storage;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use catalog::{CatalogSnapshot, ConfigurationCatalog};
pub use config::{ConfidenceConfig, InferenceOptions, RepositoryConfig, VendorDetectionPolicy};
pub use error::{ErrorKind, IntelligenceError, IntelligenceResult};
pub use inference::{ConfigurationInferenceOrchestrator, PatternMergeService};
pub use resolver::FieldPathResolver;

// Plugins
pub use plugin::{
    FieldAnalysis, FieldPathMapping, FormatAnalysis, PluginRegistry, StandardPlugin,
    VendorDetection, WrappedSegments,
};
pub use plugins::{FhirJsonPlugin, Hl7v2Plugin, default_registry};

// Storage and repositories
pub use repository::{StorageLocation, VendorPatternRepository, VendorSpecificationRepository};
#[cfg(feature = "native-fs")]
pub use storage::FileSystemDocumentStore;
pub use storage::{DocumentStore, MemoryDocumentStore, StorageError};

// Re-export models
pub use models::{
    ConfigurationAddress, DeviationType, FieldPatterns, FormatDeviation, MessageValidationResult,
    Severity, VendorConfiguration, VendorDetectionPattern, VendorSignature, VendorSpecification,
};
