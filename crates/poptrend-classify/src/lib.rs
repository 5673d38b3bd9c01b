//! Category assignment via an external text-generation service.
//!
//! Wraps a single generation call per dataset with bounded retry on
//! rate-limit failures. The service's response text is stored verbatim as
//! the category; membership in the fixed label set is not enforced.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use poptrend_core::CATEGORY_LABELS;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, warn};

pub const CRATE_NAME: &str = "poptrend-classify";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("generation endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("generation response had no candidate text")]
    EmptyResponse,
    #[error("{0}")]
    Message(String),
}

/// External text-generation collaborator. Takes a prompt, returns free text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classification credential is not configured")]
    MissingCredential,
    #[error("rate limited on every attempt, gave up after {attempts} calls")]
    RetryExhausted { attempts: usize },
    #[error(transparent)]
    Generator(#[from] GenerateError),
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub api_key: String,
    /// Fixed wait between rate-limited attempts.
    pub backoff: Duration,
    /// Retries after the initial attempt; the call fails on attempt
    /// `max_retries + 1`.
    pub max_retries: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            backoff: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Builds the classification prompt embedding the six fixed labels.
pub fn build_prompt(title: &str, description: &str, tags: &[String]) -> String {
    let categories = CATEGORY_LABELS.join(", ");
    let tag_list = tags.join(", ");
    format!(
        "You are a content classification assistant trained to assign datasets \
         to specific pop culture categories.\n\n\
         Here are the 6 available categories:\n{categories}\n\n\
         Your job is to return exactly one category name that best matches the \
         dataset based on its title, description, and tags.\n\n\
         Dataset Info:\n\
         - Title: {title}\n\
         - Description: {description}\n\
         - Tags: {tag_list}\n\n\
         Reply with one category name only, and do not explain your answer."
    )
}

/// Rate-limit failures are recognized by their message text, matching the
/// generation service's documented failure signatures.
fn is_rate_limit(err: &GenerateError) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    text.contains("429") || text.contains("resource_exhausted")
}

pub struct Classifier<G> {
    config: ClassifierConfig,
    generator: G,
}

impl<G: TextGenerator> Classifier<G> {
    /// Fails with `MissingCredential` when the configured key is empty, before
    /// any network traffic.
    pub fn new(config: ClassifierConfig, generator: G) -> Result<Self, ClassifyError> {
        if config.api_key.trim().is_empty() {
            return Err(ClassifyError::MissingCredential);
        }
        Ok(Self { config, generator })
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Assigns a category to one dataset.
    ///
    /// Rate-limited attempts back off for the configured interval and retry,
    /// up to `max_retries` retries. Any other generator failure is logged and
    /// propagated without retry.
    pub async fn classify(
        &self,
        title: &str,
        description: &str,
        tags: &[String],
    ) -> Result<String, ClassifyError> {
        let prompt = build_prompt(title, description, tags);

        for attempt in 0..=self.config.max_retries {
            match self.generator.generate(&prompt).await {
                Ok(text) => return Ok(text.trim().to_string()),
                Err(err) if is_rate_limit(&err) => {
                    if attempt == self.config.max_retries {
                        warn!(attempts = attempt + 1, "rate limited on final attempt");
                        return Err(ClassifyError::RetryExhausted {
                            attempts: attempt + 1,
                        });
                    }
                    warn!(
                        attempt = attempt + 1,
                        backoff_secs = self.config.backoff.as_secs(),
                        "rate limited, backing off before retry: {err}"
                    );
                    tokio::time::sleep(self.config.backoff).await;
                }
                Err(err) => {
                    error!("classification call failed: {err}");
                    return Err(err.into());
                }
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// reqwest-backed generator speaking the generateContent wire format.
#[derive(Debug)]
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl HttpGenerator {
    pub fn new(config: GeneratorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building generation client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint,
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerateError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .filter(|text| !text.is_empty())
            .ok_or(GenerateError::EmptyResponse)
    }
}
