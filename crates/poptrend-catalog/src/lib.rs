//! Catalog source contract + dataset normalization.
//!
//! The catalog collaborator supplies paginated listings under a chosen
//! ranking; the normalizer shapes each raw entry into the uniform
//! [`DatasetRecord`] schema and asks the classifier for its category.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poptrend_classify::{Classifier, ClassifyError, TextGenerator};
use poptrend_core::{DatasetRecord, RankingType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "poptrend-catalog";

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Tag object as the catalog API returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTag {
    pub name: String,
}

/// One listing as returned by the catalog API, prior to normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDatasetEntry {
    pub title: String,
    #[serde(rename = "ref")]
    pub dataset_ref: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub creator_name: String,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    pub download_count: u64,
    pub usability_rating: f64,
    #[serde(default)]
    pub tags: Vec<RawTag>,
    pub last_updated: DateTime<Utc>,
}

impl RawDatasetEntry {
    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|tag| tag.name.clone()).collect()
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("catalog returned status {status} for {url}")]
    Status { status: u16, url: String },
}

/// Paginated catalog listing collaborator.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn list_page(
        &self,
        ranking: RankingType,
        page: u32,
    ) -> Result<Vec<RawDatasetEntry>, CatalogError>;
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

/// reqwest-backed catalog client.
#[derive(Debug)]
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(config: CatalogConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building catalog client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn list_page(
        &self,
        ranking: RankingType,
        page: u32,
    ) -> Result<Vec<RawDatasetEntry>, CatalogError> {
        let url = format!("{}/datasets/list", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("sortBy", ranking.catalog_sort_key()),
                ("page", &page.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let entries: Vec<RawDatasetEntry> = response.json().await?;
        info!(%ranking, page, count = entries.len(), "fetched catalog page");
        Ok(entries)
    }
}

/// Byte count → megabytes rounded to two decimals. A missing byte count stays
/// absent, never zero.
pub fn bytes_to_megabytes(total_bytes: Option<u64>) -> Option<f64> {
    total_bytes.map(|bytes| (bytes as f64 / BYTES_PER_MEGABYTE * 100.0).round() / 100.0)
}

/// Shapes one raw catalog entry into the uniform record schema, asking the
/// classifier for its category. A classification failure aborts this record;
/// no partial record is produced.
pub async fn normalize<G: TextGenerator>(
    classifier: &Classifier<G>,
    raw: &RawDatasetEntry,
) -> Result<DatasetRecord, ClassifyError> {
    let description = raw.subtitle.clone().unwrap_or_default();
    let tags = raw.tag_names();
    let category = classifier.classify(&raw.title, &description, &tags).await?;

    Ok(DatasetRecord {
        title: raw.title.clone(),
        dataset_ref: raw.dataset_ref.clone(),
        description,
        creator: raw.creator_name.clone(),
        size_mb: bytes_to_megabytes(raw.total_bytes),
        download_count: raw.download_count,
        usability_rating: raw.usability_rating,
        tags,
        last_updated: raw.last_updated,
        category,
    })
}

/// Normalizes a whole batch in catalog order, blocking on each record's
/// classification before moving to the next.
pub async fn normalize_batch<G: TextGenerator>(
    classifier: &Classifier<G>,
    entries: &[RawDatasetEntry],
) -> Result<Vec<DatasetRecord>, ClassifyError> {
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        records.push(normalize(classifier, entry).await?);
    }
    Ok(records)
}
