//! Standard plugin contract
//!
//! A plugin adapts one protocol family (HL7 v2.x, FHIR, NCPDP, ...) to the
//! orchestration core. Capabilities are composed rather than inherited: a
//! plugin exposes whichever of [`FieldAnalysis`], [`FormatAnalysis`],
//! [`VendorDetection`] and [`FieldPathMapping`] it implements, and the core
//! degrades gracefully when one is missing or fails.
//!
//! New protocol families are added by registering a plugin in a
//! [`PluginRegistry`]; orchestration code never changes.

mod registry;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::config::InferenceOptions;
use crate::error::IntelligenceResult;
use crate::models::{FieldPatterns, FormatDeviation, VendorConfiguration, VendorMatch};

pub use registry::PluginRegistry;

/// Entry point of a standard-specific plugin
pub trait StandardPlugin: Send + Sync {
    /// Standard label, e.g. `"HL7v23"`; the registry key
    fn standard(&self) -> &str;

    /// Tie-break ordering when several plugins accept a message; higher first
    fn priority(&self) -> i32 {
        0
    }

    /// Cheap structural check whether `message` belongs to this standard
    fn can_analyze(&self, message: &str) -> bool;

    /// Message type as written in the message (e.g. `ADT^A01`, `Patient`)
    fn message_type(&self, _message: &str) -> Option<String> {
        None
    }

    fn field_analysis(&self) -> Option<&dyn FieldAnalysis> {
        None
    }

    fn format_analysis(&self) -> Option<&dyn FormatAnalysis> {
        None
    }

    fn vendor_detection(&self) -> Option<&dyn VendorDetection> {
        None
    }

    fn field_paths(&self) -> Option<&dyn FieldPathMapping> {
        None
    }
}

/// Per-field population statistics over a corpus
#[async_trait]
pub trait FieldAnalysis: Send + Sync {
    /// Count populated vs. total occurrences for every field position of
    /// every segment type observed in `messages` (repeats included), keep the
    /// top `options.max_common_values` literal values per field and, when
    /// enabled, recurse one level into composite fields.
    async fn analyze_field_patterns(
        &self,
        messages: &[String],
        message_type: &str,
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<FieldPatterns>;

    /// Wrap isolated segments in minimal valid messages of `message_type`
    fn wrap_segments(
        &self,
        segments: &[String],
        message_type: &str,
    ) -> IntelligenceResult<WrappedSegments>;

    /// Wrap raw values of one field position in minimal valid messages
    fn wrap_field_values(
        &self,
        segment_id: &str,
        field_index: usize,
        values: &[String],
        message_type: &str,
    ) -> IntelligenceResult<WrappedSegments>;
}

/// Synthetic messages built around isolated segments or values
#[derive(Debug, Clone, Default)]
pub struct WrappedSegments {
    pub messages: Vec<String>,
    /// Segment ids that came from the caller; everything else in `messages`
    /// is wrapper scaffolding
    pub segment_ids: BTreeSet<String>,
}

/// Deviation detection against the nominal standard
#[async_trait]
pub trait FormatAnalysis: Send + Sync {
    async fn detect_encoding_deviations(
        &self,
        messages: &[String],
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>>;

    async fn detect_structural_deviations(
        &self,
        messages: &[String],
        message_type: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>>;

    async fn detect_field_format_deviations(
        &self,
        messages: &[String],
        segment_type: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>>;

    /// Comprehensive scan; a superset of the three targeted queries
    async fn detect_all_deviations(
        &self,
        messages: &[String],
        message_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>>;
}

/// Vendor fingerprinting
#[async_trait]
pub trait VendorDetection: Send + Sync {
    /// Candidate vendors for one message, in no particular order
    async fn detect_vendor_candidates(
        &self,
        message: &str,
        baselines: &[VendorConfiguration],
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorMatch>>;

    /// Known vendor configurations this plugin ships or was configured with
    async fn baseline_vendor_configurations(
        &self,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorConfiguration>>;
}

/// Semantic field name → concrete field address
pub trait FieldPathMapping: Send + Sync {
    /// Resolve `semantic_name` (e.g. `"patient.lastname"`), case-insensitive
    fn resolve_field_path(&self, semantic_name: &str) -> Option<String>;

    /// Semantic names this plugin knows
    fn semantic_names(&self) -> Vec<String>;
}
