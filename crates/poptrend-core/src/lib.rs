//! Core domain model for the pop-culture dataset trend tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "poptrend-core";

/// The fixed pop-culture category labels embedded in the classification prompt.
pub const CATEGORY_LABELS: [&str; 6] = [
    "Film & Television Media",
    "Music & Audio Trends",
    "Gaming & Interactive Media",
    "Internet & Digital Culture",
    "Lifestyle & Consumer Aesthetics",
    "Fandoms & Cultural Expression",
];

/// Returns true if `label` is one of the six fixed category labels.
///
/// Classification responses are stored as-is without enforcing membership;
/// this exists so callers can observe free-text drift.
pub fn is_known_category(label: &str) -> bool {
    CATEGORY_LABELS.iter().any(|known| *known == label)
}

/// Which catalog ranking a batch was fetched under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingType {
    Hottest,
    Upvoted,
}

impl RankingType {
    /// Sort key the catalog API expects for this ranking.
    pub fn catalog_sort_key(self) -> &'static str {
        match self {
            RankingType::Hottest => "hottest",
            RankingType::Upvoted => "votes",
        }
    }

    pub fn export_file_name(self) -> &'static str {
        match self {
            RankingType::Hottest => "hottest_datasets.json",
            RankingType::Upvoted => "most_votes_datasets.json",
        }
    }
}

impl std::fmt::Display for RankingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RankingType::Hottest => f.write_str("hottest"),
            RankingType::Upvoted => f.write_str("upvoted"),
        }
    }
}

/// Normalized catalog listing with its assigned category.
///
/// Produced once by the normalizer and immutable afterwards. `size_mb` is
/// `None` when the catalog did not report a byte size, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRecord {
    pub title: String,
    #[serde(rename = "ref")]
    pub dataset_ref: String,
    pub description: String,
    pub creator: String,
    #[serde(rename = "sizeMB")]
    pub size_mb: Option<f64>,
    pub download_count: u64,
    pub usability_rating: f64,
    pub tags: Vec<String>,
    pub last_updated: DateTime<Utc>,
    pub category: String,
}

/// A record tagged with the ranking it came from, produced when merging batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRecord {
    pub ranking_type: RankingType,
    #[serde(flatten)]
    pub record: DatasetRecord,
}

/// Per-category fraction of a merged batch, keys in first-observed order.
///
/// Fractions over all present categories sum to 1.0 for a non-empty batch;
/// absent categories are omitted rather than reported as zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoryProportions {
    entries: Vec<(String, f64)>,
}

impl CategoryProportions {
    pub fn new(entries: Vec<(String, f64)>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, category: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(label, _)| label == category)
            .map(|(_, fraction)| *fraction)
    }

    /// Category labels in the order they were first observed.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(label, _)| label.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries
            .iter()
            .map(|(label, fraction)| (label.as_str(), *fraction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_categories_match_prompt_labels() {
        assert!(is_known_category("Gaming & Interactive Media"));
        assert!(!is_known_category("gaming & interactive media"));
        assert!(!is_known_category("Sports"));
    }

    #[test]
    fn ranking_sort_keys_match_catalog_api() {
        assert_eq!(RankingType::Hottest.catalog_sort_key(), "hottest");
        assert_eq!(RankingType::Upvoted.catalog_sort_key(), "votes");
    }

    #[test]
    fn proportions_preserve_first_observed_order() {
        let props = CategoryProportions::new(vec![
            ("Music & Audio Trends".to_string(), 0.25),
            ("Gaming & Interactive Media".to_string(), 0.75),
        ]);
        let labels: Vec<_> = props.labels().collect();
        assert_eq!(
            labels,
            vec!["Music & Audio Trends", "Gaming & Interactive Media"]
        );
        assert_eq!(props.get("Music & Audio Trends"), Some(0.25));
        assert_eq!(props.get("Sports"), None);
    }

    #[test]
    fn dataset_record_serializes_with_catalog_field_names() {
        let record = DatasetRecord {
            title: "Panda".to_string(),
            dataset_ref: "zoo/panda".to_string(),
            description: "Panda population stats".to_string(),
            creator: "zoo".to_string(),
            size_mb: Some(1.0),
            download_count: 12,
            usability_rating: 0.88,
            tags: vec!["animal".to_string()],
            last_updated: chrono::Utc::now(),
            category: "Internet & Digital Culture".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("ref").is_some());
        assert!(json.get("sizeMB").is_some());
        assert!(json.get("downloadCount").is_some());
        assert!(json.get("usabilityRating").is_some());
    }
}
