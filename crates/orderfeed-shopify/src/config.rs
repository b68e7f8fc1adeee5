//! Pipeline configuration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use orderfeed_core::RetryPolicy;
use orderfeed_store::{BlobStore, CheckpointStore, GcsBlobStore, LocalBlobStore, TokenSource};

use crate::api::ShopifyClient;
use crate::gender::GenderRules;
use crate::publish::{OutputLayout, Publisher};
use crate::runner::{Pipeline, RunOptions};
use crate::transform::Transformer;
use crate::writer::OutputWriter;

/// Where published files and the checkpoint live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    Gcs {
        bucket: String,
        token: TokenSource,
        /// Override for emulators
        api_base: Option<String>,
    },
    Local(PathBuf),
}

impl StorageTarget {
    pub fn open(&self) -> anyhow::Result<Arc<dyn BlobStore>> {
        Ok(match self {
            Self::Gcs {
                bucket,
                token,
                api_base,
            } => {
                anyhow::ensure!(!bucket.is_empty(), "storage.bucket is required for gcs");
                let mut store = GcsBlobStore::new(bucket.clone(), token.clone());
                if let Some(base) = api_base {
                    store = store.with_api_base(base.clone());
                }
                Arc::new(store)
            }
            Self::Local(dir) => Arc::new(
                LocalBlobStore::new(dir)
                    .with_context(|| format!("Cannot create local store {}", dir.display()))?,
            ),
        })
    }
}

/// Runtime configuration for one pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Shop handle (`club21`) or domain (`club21.myshopify.com`)
    pub store: String,
    pub access_token: String,
    pub api_version: String,
    pub page_size: u32,
    pub storage: StorageTarget,
    pub checkpoint_prefix: String,
    pub layout: OutputLayout,
    pub staging_dir: PathBuf,
    pub gender: GenderRules,
    pub fulfillment_statuses: Vec<String>,
    pub initial_lookback_days: Option<u32>,
    pub publish_raw: bool,
    pub page_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store: String::new(),
            access_token: String::new(),
            api_version: "2025-04".to_string(),
            page_size: 25,
            storage: StorageTarget::Local(PathBuf::from("bucket")),
            checkpoint_prefix: "LatestOrder".to_string(),
            layout: OutputLayout::default(),
            staging_dir: PathBuf::from("staging"),
            gender: GenderRules::default(),
            fulfillment_statuses: Vec::new(),
            initial_lookback_days: None,
            publish_raw: false,
            page_delay: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Wire up the Shopify client, blob store and stages.
    pub fn build(&self) -> anyhow::Result<Pipeline> {
        anyhow::ensure!(!self.store.is_empty(), "shopify.store is required");
        anyhow::ensure!(
            !self.access_token.is_empty(),
            "shopify.access_token is required (set SHOPIFY_ACCESS_TOKEN)"
        );
        let source = ShopifyClient::new(&self.store, &self.api_version, self.access_token.clone())
            .page_size(self.page_size);
        log::debug!("Shopify endpoint: {}", source.endpoint());
        self.build_with_source(Arc::new(source))
    }

    /// Like [`build`](Self::build) with a caller-supplied order source.
    pub fn build_with_source(
        &self,
        source: Arc<dyn crate::fetch::OrderSource>,
    ) -> anyhow::Result<Pipeline> {
        let blobs = self.storage.open()?;
        let checkpoints = CheckpointStore::new(blobs.clone(), &self.checkpoint_prefix, self.retry);
        let writer = OutputWriter::new(&self.staging_dir).with_context(|| {
            format!("Cannot prepare staging dir {}", self.staging_dir.display())
        })?;
        let transformer = Transformer::new(self.gender.clone())
            .with_fulfillment_statuses(&self.fulfillment_statuses);
        let publisher = Publisher::new(blobs, self.layout.clone(), self.retry);
        let options = RunOptions {
            retry: self.retry,
            page_delay: self.page_delay,
            initial_lookback_days: self.initial_lookback_days,
            publish_raw: self.publish_raw,
            keep_staging: false,
            cancel: None,
        };
        Ok(Pipeline::new(
            source,
            checkpoints,
            transformer,
            writer,
            publisher,
            options,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.api_version, "2025-04");
        assert_eq!(config.checkpoint_prefix, "LatestOrder");
        assert_eq!(config.layout.file_prefix, "ORDERS");
        assert!(!config.publish_raw);
    }

    #[test]
    fn build_requires_credentials() {
        let config = PipelineConfig {
            store: "club21".into(),
            ..PipelineConfig::default()
        };
        let err = config.build().unwrap_err();
        assert!(err.to_string().contains("access_token"));
    }

    #[test]
    fn gcs_requires_bucket() {
        let target = StorageTarget::Gcs {
            bucket: String::new(),
            token: TokenSource::Anonymous,
            api_base: None,
        };
        assert!(target.open().is_err());
    }

    #[test]
    fn build_local_pipeline() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            store: "club21".into(),
            access_token: "shpat_test".into(),
            storage: StorageTarget::Local(dir.path().join("bucket")),
            staging_dir: dir.path().join("staging"),
            ..PipelineConfig::default()
        };
        let pipeline = config.build().unwrap();
        assert_eq!(pipeline.checkpoints().key(), "LatestOrder/last_order.json");
        assert!(dir.path().join("staging").is_dir());
    }
}
