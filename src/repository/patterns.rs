//! Vendor detection pattern repository

use std::sync::Arc;

use super::{Document, JsonRepository, default_patterns};
use crate::cancel::CancellationToken;
use crate::config::RepositoryConfig;
use crate::error::IntelligenceResult;
use crate::models::VendorDetectionPattern;
use crate::storage::DocumentStore;

impl Document for VendorDetectionPattern {
    const KIND: &'static str = "vendor pattern";

    fn document_id(&self) -> &str {
        &self.id
    }
}

/// Detection patterns, one JSON document per pattern
#[derive(Debug)]
pub struct VendorPatternRepository {
    inner: JsonRepository<VendorDetectionPattern>,
}

impl VendorPatternRepository {
    pub fn new(store: Arc<dyn DocumentStore>, config: RepositoryConfig) -> Self {
        Self {
            inner: JsonRepository::new(store, config, default_patterns),
        }
    }

    /// Repository over the resolved patterns directory
    #[cfg(feature = "native-fs")]
    pub fn from_location(location: &super::StorageLocation, config: RepositoryConfig) -> Self {
        Self::new(
            Arc::new(crate::storage::FileSystemDocumentStore::new(
                &location.patterns_dir,
            )),
            config,
        )
    }

    /// Every pattern, ordered by id
    pub async fn load_all_patterns(
        &self,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorDetectionPattern>> {
        Ok(self.inner.load_all(cancel).await?.values().cloned().collect())
    }

    pub async fn get_pattern(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Option<VendorDetectionPattern>> {
        self.inner.get(id, cancel).await
    }

    /// Patterns applicable to `standard`
    pub async fn find_by_standard(
        &self,
        standard: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorDetectionPattern>> {
        Ok(self
            .inner
            .load_all(cancel)
            .await?
            .values()
            .filter(|p| p.supports_standard(standard))
            .cloned()
            .collect())
    }

    pub async fn save_pattern(
        &self,
        pattern: &VendorDetectionPattern,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<()> {
        pattern.validate()?;
        self.inner.save(pattern, cancel).await
    }

    pub async fn delete_pattern(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<bool> {
        self.inner.delete(id, cancel).await
    }

    pub async fn refresh(&self, cancel: &CancellationToken) -> IntelligenceResult<()> {
        self.inner.refresh(cancel).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDocumentStore;

    fn repository(seed: bool) -> VendorPatternRepository {
        let config = RepositoryConfig {
            seed_defaults: seed,
            ..Default::default()
        };
        VendorPatternRepository::new(Arc::new(MemoryDocumentStore::new()), config)
    }

    #[tokio::test]
    async fn test_seeded_on_first_load() {
        let repository = repository(true);
        let cancel = CancellationToken::new();
        let patterns = repository.load_all_patterns(&cancel).await.unwrap();
        assert!(patterns.iter().any(|p| p.vendor_name == "Epic"));
        assert!(
            repository
                .get_pattern("epic", &cancel)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_save_find_delete() {
        let repository = repository(false);
        let cancel = CancellationToken::new();
        assert!(repository.load_all_patterns(&cancel).await.unwrap().is_empty());

        let mut pattern = VendorDetectionPattern::new("meditech", "Meditech");
        pattern.supported_standards.insert("HL7v23".to_string());
        repository.save_pattern(&pattern, &cancel).await.unwrap();

        assert_eq!(
            repository.find_by_standard("HL7", &cancel).await.unwrap().len(),
            1
        );
        assert!(
            repository
                .find_by_standard("FHIR R4", &cancel)
                .await
                .unwrap()
                .is_empty()
        );

        assert!(repository.delete_pattern("meditech", &cancel).await.unwrap());
        assert!(!repository.delete_pattern("meditech", &cancel).await.unwrap());
        assert!(
            repository
                .get_pattern("meditech", &cancel)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_invalid_regex_rejected() {
        let repository = repository(false);
        let mut pattern = VendorDetectionPattern::new("broken", "Broken");
        pattern
            .application_patterns
            .push(crate::models::DetectionRule::new(crate::models::MatchType::Regex, "[", 0.1));
        assert!(
            repository
                .save_pattern(&pattern, &CancellationToken::new())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_empty_id_rejected() {
        let repository = repository(false);
        let pattern = VendorDetectionPattern::new(" ", "Nobody");
        assert!(
            repository
                .save_pattern(&pattern, &CancellationToken::new())
                .await
                .is_err()
        );
    }
}
