//! Daily batch orchestration: fetch + normalize each ranking, export, then
//! aggregate the two exports into a trend log row.
//!
//! The pipeline is fully sequential; each record blocks on its classification
//! call before the next one starts, so catalog page order is preserved in the
//! export files. Any failure aborts the run and surfaces to the caller.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use poptrend_catalog::{normalize_batch, CatalogConfig, CatalogSource, HttpCatalog};
use poptrend_classify::{
    Classifier, ClassifierConfig, GeneratorConfig, HttpGenerator, TextGenerator,
};
use poptrend_core::RankingType;
use poptrend_trends::{
    load_export, merge, proportions, write_export, AppendOutcome, CsvTrendStore, TrendStore,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "poptrend-pipeline";

pub const TREND_LOG_FILE_NAME: &str = "cate_trends.csv";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_key: String,
    pub data_dir: PathBuf,
    pub page_count: u32,
    pub catalog_url: String,
    pub generate_url: String,
    pub backoff_secs: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            // GOOGLE_API_KEY kept as a fallback for existing deployments.
            api_key: std::env::var("POPTREND_API_KEY")
                .or_else(|_| std::env::var("GOOGLE_API_KEY"))
                .unwrap_or_default(),
            data_dir: std::env::var("POPTREND_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            page_count: std::env::var("POPTREND_PAGE_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            catalog_url: std::env::var("POPTREND_CATALOG_URL")
                .unwrap_or_else(|_| "https://www.kaggle.com/api/v1".to_string()),
            generate_url: std::env::var("POPTREND_GENERATE_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
                    .to_string()
            }),
            backoff_secs: std::env::var("POPTREND_BACKOFF_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            http_timeout_secs: std::env::var("POPTREND_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: std::env::var("POPTREND_USER_AGENT")
                .unwrap_or_else(|_| "poptrend-bot/0.1".to_string()),
        }
    }

    pub fn trend_log_path(&self) -> PathBuf {
        self.data_dir.join(TREND_LOG_FILE_NAME)
    }

    pub fn export_path(&self, ranking: RankingType) -> PathBuf {
        self.data_dir.join(ranking.export_file_name())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    pub ranking: RankingType,
    pub pages: u32,
    pub records: usize,
    pub export_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateSummary {
    pub merged_records: usize,
    pub categories: usize,
    pub outcome: AppendOutcome,
    pub trend_log: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetches: Vec<FetchSummary>,
    pub aggregate: AggregateSummary,
}

impl RunSummary {
    pub fn total_records(&self) -> usize {
        self.fetches.iter().map(|fetch| fetch.records).sum()
    }
}

pub struct Pipeline<C, G> {
    config: PipelineConfig,
    catalog: C,
    classifier: Classifier<G>,
    store: Box<dyn TrendStore>,
}

impl Pipeline<HttpCatalog, HttpGenerator> {
    /// Builds the production pipeline from config. Fails up front when the
    /// classification credential is missing, before any network call.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.http_timeout_secs);
        let catalog = HttpCatalog::new(CatalogConfig {
            base_url: config.catalog_url.clone(),
            timeout,
            user_agent: config.user_agent.clone(),
        })?;
        let generator = HttpGenerator::new(GeneratorConfig {
            endpoint: config.generate_url.clone(),
            api_key: config.api_key.clone(),
            timeout,
        })?;
        let classifier = Classifier::new(
            ClassifierConfig {
                api_key: config.api_key.clone(),
                backoff: Duration::from_secs(config.backoff_secs),
                ..ClassifierConfig::default()
            },
            generator,
        )
        .context("configuring classifier")?;
        let store = Box::new(CsvTrendStore::new(config.trend_log_path()));
        Ok(Self {
            config,
            catalog,
            classifier,
            store,
        })
    }
}

impl<C: CatalogSource, G: TextGenerator> Pipeline<C, G> {
    pub fn new(
        config: PipelineConfig,
        catalog: C,
        classifier: Classifier<G>,
        store: Box<dyn TrendStore>,
    ) -> Self {
        Self {
            config,
            catalog,
            classifier,
            store,
        }
    }

    /// Fetches and normalizes every page of one ranking, then writes the
    /// batch as that ranking's export file.
    pub async fn fetch_ranking(&self, ranking: RankingType) -> Result<FetchSummary> {
        let mut records = Vec::new();
        for page in 1..=self.config.page_count {
            info!(%ranking, page, "fetching catalog page");
            let entries = self
                .catalog
                .list_page(ranking, page)
                .await
                .with_context(|| format!("listing {ranking} page {page}"))?;
            let mut normalized = normalize_batch(&self.classifier, &entries)
                .await
                .with_context(|| format!("normalizing {ranking} page {page}"))?;
            records.append(&mut normalized);
        }

        let export_path = self.config.export_path(ranking);
        write_export(&export_path, &records)?;
        Ok(FetchSummary {
            ranking,
            pages: self.config.page_count,
            records: records.len(),
            export_path: export_path.display().to_string(),
        })
    }

    /// Merges the two export files, computes category proportions, and
    /// appends today's snapshot to the trend log.
    pub fn aggregate(&self) -> Result<AggregateSummary> {
        let hottest = load_export(self.config.export_path(RankingType::Hottest))?;
        let upvoted = load_export(self.config.export_path(RankingType::Upvoted))?;
        let combined = merge(hottest, upvoted);
        let snapshot = proportions(&combined);

        let outcome = self
            .store
            .append_if_new(&snapshot, Local::now().naive_local())
            .context("appending trend row")?;

        Ok(AggregateSummary {
            merged_records: combined.len(),
            categories: snapshot.len(),
            outcome,
            trend_log: self.config.trend_log_path().display().to_string(),
        })
    }

    /// One full daily batch: both rankings, then the aggregate append.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "starting pipeline run");

        let mut fetches = Vec::new();
        for ranking in [RankingType::Upvoted, RankingType::Hottest] {
            fetches.push(self.fetch_ranking(ranking).await?);
        }
        let aggregate = self.aggregate()?;

        let finished_at = Utc::now();
        info!(
            %run_id,
            records = fetches.iter().map(|fetch| fetch.records).sum::<usize>(),
            outcome = aggregate.outcome.as_str(),
            "pipeline run finished"
        );
        Ok(RunSummary {
            run_id,
            started_at,
            finished_at,
            fetches,
            aggregate,
        })
    }
}

pub async fn run_once_from_env() -> Result<RunSummary> {
    let pipeline = Pipeline::from_config(PipelineConfig::from_env())?;
    pipeline.run_once().await
}
