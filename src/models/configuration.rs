//! Inferred vendor configurations

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::address::ConfigurationAddress;
use super::deviation::FormatDeviation;
use super::patterns::FieldPatterns;
use super::vendor::VendorMatch;

/// Confidence assigned to the fallback signature
pub const UNKNOWN_VENDOR_CONFIDENCE: f64 = 0.3;

/// Vendor name used when detection produced nothing
pub const UNKNOWN_VENDOR: &str = "Unknown";

/// Fingerprint of the system that produced a corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorSignature {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub sending_application: Option<String>,
    #[serde(default)]
    pub sending_facility: Option<String>,
    pub confidence: f64,
    pub detection_method: String,
    #[serde(default)]
    pub deviations: Vec<FormatDeviation>,
}

impl VendorSignature {
    /// Fallback used whenever detection fails or finds nothing
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_VENDOR.to_string(),
            version: None,
            sending_application: None,
            sending_facility: None,
            confidence: UNKNOWN_VENDOR_CONFIDENCE,
            detection_method: "fallback".to_string(),
            deviations: Vec::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN_VENDOR
    }
}

impl From<VendorMatch> for VendorSignature {
    fn from(m: VendorMatch) -> Self {
        Self {
            name: m.vendor_name,
            version: m.version,
            sending_application: m.sending_application,
            sending_facility: m.sending_facility,
            confidence: m.confidence.clamp(0.0, 1.0),
            detection_method: m.detection_method,
            deviations: m.deviations,
        }
    }
}

/// Kind of audit log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Created,
    Merged,
    Stored,
    Imported,
}

/// One immutable audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationChange {
    pub id: Uuid,
    pub change_type: ChangeType,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    /// Signed confidence delta caused by this change
    pub confidence_impact: f64,
}

impl ConfigurationChange {
    pub fn new(change_type: ChangeType, description: impl Into<String>, impact: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            change_type,
            description: description.into(),
            timestamp: Utc::now(),
            confidence_impact: impact,
        }
    }
}

/// Append-only audit log. Entries can be added and read, never edited.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeLog {
    entries: Vec<ConfigurationChange>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, change: ConfigurationChange) {
        self.entries.push(change);
    }

    pub fn entries(&self) -> &[ConfigurationChange] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ConfigurationChange> {
        self.entries.last()
    }

    /// Entries no older than `window`, relative to now
    pub fn within(&self, window: Duration) -> Vec<ConfigurationChange> {
        let cutoff = Utc::now() - window;
        self.entries
            .iter()
            .filter(|c| c.timestamp >= cutoff)
            .cloned()
            .collect()
    }
}

/// Bookkeeping for one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationMetadata {
    pub messages_sampled: usize,
    pub confidence: f64,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Incremented on every merge
    pub version: u32,
    #[serde(default)]
    pub changes: ChangeLog,
}

impl ConfigurationMetadata {
    /// Metadata for a freshly inferred configuration, with its `Created` entry
    pub fn created(messages_sampled: usize, confidence: f64) -> Self {
        let now = Utc::now();
        let confidence = confidence.clamp(0.0, 1.0);
        let mut changes = ChangeLog::new();
        changes.append(ConfigurationChange::new(
            ChangeType::Created,
            format!(
                "Configuration inferred from {messages_sampled} messages with confidence {confidence:.2}"
            ),
            confidence,
        ));
        Self {
            messages_sampled,
            confidence,
            first_seen: now,
            last_updated: now,
            version: 1,
            changes,
        }
    }
}

/// Aggregate root: statistical and fingerprint model for one address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorConfiguration {
    pub address: ConfigurationAddress,
    pub signature: VendorSignature,
    pub field_patterns: FieldPatterns,
    #[serde(default)]
    pub format_deviations: Vec<FormatDeviation>,
    pub metadata: ConfigurationMetadata,
}

impl VendorConfiguration {
    pub fn confidence(&self) -> f64 {
        self.metadata.confidence
    }

    pub fn messages_sampled(&self) -> usize {
        self.metadata.messages_sampled
    }

    /// Copy of this configuration with one more change recorded
    pub fn with_change(mut self, change: ConfigurationChange) -> Self {
        self.metadata.last_updated = change.timestamp;
        self.metadata.changes.append(change);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_signature() {
        let signature = VendorSignature::unknown();
        assert!(signature.is_unknown());
        assert_eq!(signature.confidence, 0.3);
    }

    #[test]
    fn test_created_metadata_has_single_entry() {
        let metadata = ConfigurationMetadata::created(10, 0.85);
        assert_eq!(metadata.messages_sampled, 10);
        assert_eq!(metadata.changes.len(), 1);

        let entry = metadata.changes.last().unwrap();
        assert_eq!(entry.change_type, ChangeType::Created);
        assert!(entry.description.contains("10 messages"));
    }

    #[test]
    fn test_metadata_confidence_clamped() {
        assert_eq!(ConfigurationMetadata::created(1, 2.0).confidence, 1.0);
        assert_eq!(ConfigurationMetadata::created(1, -1.0).confidence, 0.0);
    }

    #[test]
    fn test_change_log_window() {
        let mut log = ChangeLog::new();
        let mut old = ConfigurationChange::new(ChangeType::Created, "old", 0.5);
        old.timestamp = Utc::now() - Duration::days(3);
        log.append(old);
        log.append(ConfigurationChange::new(ChangeType::Merged, "recent", 0.1));

        let recent = log.within(Duration::hours(1));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].description, "recent");
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_signature_from_match() {
        let m = VendorMatch::new("Epic", 0.9, "application-pattern");
        let signature = VendorSignature::from(m);
        assert_eq!(signature.name, "Epic");
        assert_eq!(signature.detection_method, "application-pattern");
    }
}
