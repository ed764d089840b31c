//! Vendor interface specification repository

use std::sync::Arc;

use super::{Document, JsonRepository, default_specifications};
use crate::cancel::CancellationToken;
use crate::config::RepositoryConfig;
use crate::error::IntelligenceResult;
use crate::models::{VendorDetectionPattern, VendorSpecification};
use crate::storage::DocumentStore;

impl Document for VendorSpecification {
    const KIND: &'static str = "vendor specification";

    fn document_id(&self) -> &str {
        &self.id
    }
}

/// Vendor interface specifications, one JSON document per interface
#[derive(Debug)]
pub struct VendorSpecificationRepository {
    inner: JsonRepository<VendorSpecification>,
}

impl VendorSpecificationRepository {
    pub fn new(store: Arc<dyn DocumentStore>, config: RepositoryConfig) -> Self {
        Self {
            inner: JsonRepository::new(store, config, default_specifications),
        }
    }

    #[cfg(feature = "native-fs")]
    pub fn from_location(location: &super::StorageLocation, config: RepositoryConfig) -> Self {
        Self::new(
            Arc::new(crate::storage::FileSystemDocumentStore::new(
                &location.specs_dir,
            )),
            config,
        )
    }

    pub async fn load_all(
        &self,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorSpecification>> {
        Ok(self.inner.load_all(cancel).await?.values().cloned().collect())
    }

    pub async fn get_specification(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Option<VendorSpecification>> {
        self.inner.get(id, cancel).await
    }

    /// Specifications for a vendor, matched case-insensitively
    pub async fn find_by_vendor(
        &self,
        vendor: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorSpecification>> {
        Ok(self
            .inner
            .load_all(cancel)
            .await?
            .values()
            .filter(|s| s.vendor_name().eq_ignore_ascii_case(vendor))
            .cloned()
            .collect())
    }

    pub async fn find_by_standard(
        &self,
        standard: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorSpecification>> {
        Ok(self
            .inner
            .load_all(cancel)
            .await?
            .values()
            .filter(|s| s.standard().eq_ignore_ascii_case(standard))
            .cloned()
            .collect())
    }

    pub async fn save_specification(
        &self,
        specification: &VendorSpecification,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<()> {
        self.inner.save(specification, cancel).await
    }

    pub async fn refresh(&self, cancel: &CancellationToken) -> IntelligenceResult<()> {
        self.inner.refresh(cancel).await.map(|_| ())
    }

    /// Detection patterns derived from every specification
    pub async fn detection_patterns(
        &self,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorDetectionPattern>> {
        Ok(self
            .inner
            .load_all(cancel)
            .await?
            .values()
            .map(VendorSpecification::to_detection_pattern)
            .collect())
    }
}
