//! Ranking-batch aggregation and the category-trend log.
//!
//! The aggregator concatenates the two ranking batches, tagging each record
//! with its origin, and computes per-category proportions. The trend store
//! appends one proportions row per calendar day to a flat CSV log, refusing
//! rows whose column set differs from the one fixed at file creation.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use poptrend_core::{CategoryProportions, DatasetRecord, RankedRecord, RankingType};
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "poptrend-trends";

const RECORD_TIME_COLUMN: &str = "record_time";
const RECORD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Concatenates the two ranking batches, all of `hottest` then all of
/// `upvoted`, tagging each record with its origin. No deduplication: a
/// dataset present in both rankings appears twice.
pub fn merge(
    hottest: Vec<DatasetRecord>,
    upvoted: Vec<DatasetRecord>,
) -> Vec<RankedRecord> {
    let mut combined = Vec::with_capacity(hottest.len() + upvoted.len());
    combined.extend(hottest.into_iter().map(|record| RankedRecord {
        ranking_type: RankingType::Hottest,
        record,
    }));
    combined.extend(upvoted.into_iter().map(|record| RankedRecord {
        ranking_type: RankingType::Upvoted,
        record,
    }));
    combined
}

/// Fraction of the combined batch in each category, keyed in first-observed
/// order. An empty batch yields an empty mapping.
pub fn proportions(combined: &[RankedRecord]) -> CategoryProportions {
    if combined.is_empty() {
        return CategoryProportions::default();
    }

    let mut counts: Vec<(String, usize)> = Vec::new();
    for ranked in combined {
        match counts
            .iter_mut()
            .find(|(label, _)| *label == ranked.record.category)
        {
            Some((_, count)) => *count += 1,
            None => counts.push((ranked.record.category.clone(), 1)),
        }
    }

    let total = combined.len() as f64;
    CategoryProportions::new(
        counts
            .into_iter()
            .map(|(label, count)| (label, count as f64 / total))
            .collect(),
    )
}

/// Writes a ranking batch as a pretty-printed JSON array.
pub fn write_export(path: impl AsRef<Path>, records: &[DatasetRecord]) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating export directory {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(records).context("serializing dataset export")?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), count = records.len(), "wrote dataset export");
    Ok(())
}

/// Reads a ranking batch back from its JSON export file.
pub fn load_export(path: impl AsRef<Path>) -> anyhow::Result<Vec<DatasetRecord>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Error)]
pub enum TrendLogError {
    #[error("trend log columns changed: existing {existing:?}, new row {new:?}")]
    SchemaMismatch {
        existing: Vec<String>,
        new: Vec<String>,
    },
    #[error("trend log row has unparsable record_time {value:?}")]
    BadTimestamp { value: String },
    #[error("trend log io: {0}")]
    Io(#[from] std::io::Error),
    #[error("trend log csv: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendOutcome {
    /// Log did not exist; created with header and first row.
    Created,
    /// Row appended after the existing rows.
    Appended,
    /// A row for the same calendar date already exists; nothing written.
    SkippedSameDay,
}

impl AppendOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AppendOutcome::Created => "created",
            AppendOutcome::Appended => "appended",
            AppendOutcome::SkippedSameDay => "skipped-same-day",
        }
    }
}

/// One parsed trend log row. `values` is aligned with the log's category
/// columns; blank cells load as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendRow {
    pub record_time: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

/// Full trend log contents: the category columns fixed at creation plus all
/// rows in append order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrendLog {
    pub columns: Vec<String>,
    pub rows: Vec<TrendRow>,
}

/// Storage seam for the trend log so the flat-file format can change without
/// touching the aggregator.
pub trait TrendStore: Send + Sync {
    fn load(&self) -> Result<TrendLog, TrendLogError>;

    /// Appends a proportions snapshot stamped with `now`, at most once per
    /// calendar day. Never rewrites existing rows.
    fn append_if_new(
        &self,
        proportions: &CategoryProportions,
        now: NaiveDateTime,
    ) -> Result<AppendOutcome, TrendLogError>;
}

/// Append-only CSV trend log, `record_time` as the final column.
#[derive(Debug, Clone)]
pub struct CsvTrendStore {
    path: PathBuf,
}

impl CsvTrendStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn new_row_columns(proportions: &CategoryProportions) -> Vec<String> {
        let mut columns: Vec<String> = proportions.labels().map(str::to_string).collect();
        columns.push(RECORD_TIME_COLUMN.to_string());
        columns
    }

    fn create(
        &self,
        proportions: &CategoryProportions,
        now: NaiveDateTime,
    ) -> Result<AppendOutcome, TrendLogError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(Self::new_row_columns(proportions))?;
        let mut row: Vec<String> = proportions
            .iter()
            .map(|(_, fraction)| fraction.to_string())
            .collect();
        row.push(now.format(RECORD_TIME_FORMAT).to_string());
        writer.write_record(&row)?;
        writer.flush()?;
        info!(path = %self.path.display(), "created trend log");
        Ok(AppendOutcome::Created)
    }
}

fn parse_record_time(value: &str) -> Result<NaiveDateTime, TrendLogError> {
    NaiveDateTime::parse_from_str(value.trim(), RECORD_TIME_FORMAT).map_err(|_| {
        TrendLogError::BadTimestamp {
            value: value.to_string(),
        }
    })
}

fn latest_row_date(log: &TrendLog) -> Option<NaiveDate> {
    log.rows.iter().map(|row| row.record_time.date()).max()
}

fn same_column_set(existing: &[String], new: &[String]) -> bool {
    existing.len() == new.len() && new.iter().all(|column| existing.contains(column))
}

impl TrendStore for CsvTrendStore {
    fn load(&self) -> Result<TrendLog, TrendLogError> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let header: Vec<String> = reader
            .headers()?
            .iter()
            .map(str::to_string)
            .collect();
        let time_index = header
            .iter()
            .position(|column| column == RECORD_TIME_COLUMN)
            .ok_or_else(|| TrendLogError::BadTimestamp {
                value: format!("missing {RECORD_TIME_COLUMN} column"),
            })?;

        let columns: Vec<String> = header
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != time_index)
            .map(|(_, column)| column.clone())
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let time_cell = record.get(time_index).unwrap_or_default();
            let record_time = parse_record_time(time_cell)?;
            let values = record
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != time_index)
                .map(|(_, cell)| cell.trim().parse::<f64>().ok())
                .collect();
            rows.push(TrendRow {
                record_time,
                values,
            });
        }

        Ok(TrendLog { columns, rows })
    }

    fn append_if_new(
        &self,
        proportions: &CategoryProportions,
        now: NaiveDateTime,
    ) -> Result<AppendOutcome, TrendLogError> {
        if !self.path.exists() {
            return self.create(proportions, now);
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let existing_columns: Vec<String> =
            reader.headers()?.iter().map(str::to_string).collect();

        let mut latest: Option<NaiveDate> = None;
        let time_index = existing_columns
            .iter()
            .position(|column| column == RECORD_TIME_COLUMN);
        for result in reader.records() {
            let record = result?;
            let Some(index) = time_index else { break };
            let cell = record.get(index).unwrap_or_default();
            let date = parse_record_time(cell)?.date();
            latest = Some(latest.map_or(date, |current| current.max(date)));
        }

        if latest == Some(now.date()) {
            info!(path = %self.path.display(), date = %now.date(), "trend row for today already present, skipping");
            return Ok(AppendOutcome::SkippedSameDay);
        }

        let new_columns = Self::new_row_columns(proportions);
        if !same_column_set(&existing_columns, &new_columns) {
            return Err(TrendLogError::SchemaMismatch {
                existing: existing_columns,
                new: new_columns,
            });
        }

        // Reorder the new row to the column order fixed at file creation.
        let row: Vec<String> = existing_columns
            .iter()
            .map(|column| {
                if column == RECORD_TIME_COLUMN {
                    now.format(RECORD_TIME_FORMAT).to_string()
                } else {
                    proportions
                        .get(column)
                        .map(|fraction| fraction.to_string())
                        .unwrap_or_default()
                }
            })
            .collect();

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(&row)?;
        writer.flush()?;
        info!(path = %self.path.display(), date = %now.date(), "appended trend row");
        Ok(AppendOutcome::Appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use tempfile::tempdir;

    fn record(category: &str) -> DatasetRecord {
        DatasetRecord {
            title: format!("{category} dataset"),
            dataset_ref: "acme/sample".to_string(),
            description: String::new(),
            creator: "acme".to_string(),
            size_mb: None,
            download_count: 0,
            usability_rating: 0.5,
            tags: Vec::new(),
            last_updated: Utc::now(),
            category: category.to_string(),
        }
    }

    fn props(entries: &[(&str, f64)]) -> CategoryProportions {
        CategoryProportions::new(
            entries
                .iter()
                .map(|(label, fraction)| (label.to_string(), *fraction))
                .collect(),
        )
    }

    fn stamp(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn file_line_count(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count()
    }

    #[test]
    fn merge_keeps_hottest_first_and_tags_origins() {
        let combined = merge(
            vec![record("Gaming & Interactive Media")],
            vec![record("Music & Audio Trends"), record("Gaming & Interactive Media")],
        );
        assert_eq!(combined.len(), 3);
        assert_eq!(combined[0].ranking_type, RankingType::Hottest);
        assert_eq!(combined[1].ranking_type, RankingType::Upvoted);
        assert_eq!(combined[2].ranking_type, RankingType::Upvoted);
        assert_eq!(combined[0].record.category, "Gaming & Interactive Media");
    }

    #[test]
    fn duplicate_datasets_across_rankings_appear_twice() {
        let combined = merge(
            vec![record("Internet & Digital Culture")],
            vec![record("Internet & Digital Culture")],
        );
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].record.title, combined[1].record.title);
    }

    #[test]
    fn proportions_sum_to_one_with_positive_values() {
        let combined = merge(
            vec![record("Gaming & Interactive Media")],
            vec![
                record("Gaming & Interactive Media"),
                record("Music & Audio Trends"),
            ],
        );
        let props = proportions(&combined);
        let total: f64 = props.iter().map(|(_, fraction)| fraction).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(props.iter().all(|(_, fraction)| fraction > 0.0));
        assert!((props.get("Gaming & Interactive Media").unwrap() - 0.667).abs() < 0.01);
        assert!((props.get("Music & Audio Trends").unwrap() - 0.333).abs() < 0.01);
    }

    #[test]
    fn empty_batch_yields_empty_proportions() {
        let props = proportions(&[]);
        assert!(props.is_empty());
    }

    #[test]
    fn export_round_trips_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("most_votes_datasets.json");
        let records = vec![record("Music & Audio Trends")];
        write_export(&path, &records).unwrap();
        let loaded = load_export(&path).unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn first_append_creates_log_with_observed_column_order() {
        let dir = tempdir().unwrap();
        let store = CsvTrendStore::new(dir.path().join("cate_trends.csv"));
        let outcome = store
            .append_if_new(
                &props(&[
                    ("Music & Audio Trends", 0.25),
                    ("Gaming & Interactive Media", 0.75),
                ]),
                stamp(2026, 8, 29, 6, 0),
            )
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Created);

        let header = std::fs::read_to_string(store.path())
            .unwrap()
            .lines()
            .next()
            .unwrap()
            .to_string();
        assert_eq!(
            header,
            "Music & Audio Trends,Gaming & Interactive Media,record_time"
        );
        assert_eq!(file_line_count(store.path()), 2);
    }

    #[test]
    fn second_same_day_append_is_a_no_op() {
        let dir = tempdir().unwrap();
        let store = CsvTrendStore::new(dir.path().join("cate_trends.csv"));
        let snapshot = props(&[("Music & Audio Trends", 1.0)]);
        store
            .append_if_new(&snapshot, stamp(2026, 8, 29, 6, 0))
            .unwrap();
        let outcome = store
            .append_if_new(&snapshot, stamp(2026, 8, 29, 18, 30))
            .unwrap();
        assert_eq!(outcome, AppendOutcome::SkippedSameDay);
        assert_eq!(file_line_count(store.path()), 2);
    }

    #[test]
    fn next_day_append_reorders_to_existing_columns() {
        let dir = tempdir().unwrap();
        let store = CsvTrendStore::new(dir.path().join("cate_trends.csv"));
        store
            .append_if_new(
                &props(&[
                    ("Music & Audio Trends", 0.4),
                    ("Gaming & Interactive Media", 0.6),
                ]),
                stamp(2026, 8, 28, 6, 0),
            )
            .unwrap();

        // Same column set, observed in the opposite order.
        let outcome = store
            .append_if_new(
                &props(&[
                    ("Gaming & Interactive Media", 0.1),
                    ("Music & Audio Trends", 0.9),
                ]),
                stamp(2026, 8, 29, 6, 0),
            )
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Appended);

        let log = store.load().unwrap();
        assert_eq!(
            log.columns,
            vec![
                "Music & Audio Trends".to_string(),
                "Gaming & Interactive Media".to_string()
            ]
        );
        assert_eq!(log.rows.len(), 2);
        assert_eq!(log.rows[1].values, vec![Some(0.9), Some(0.1)]);
        assert_eq!(
            log.rows[1].record_time,
            stamp(2026, 8, 29, 6, 0)
        );
    }

    #[test]
    fn changed_column_set_fails_without_touching_rows() {
        let dir = tempdir().unwrap();
        let store = CsvTrendStore::new(dir.path().join("cate_trends.csv"));
        store
            .append_if_new(
                &props(&[("Music & Audio Trends", 1.0)]),
                stamp(2026, 8, 28, 6, 0),
            )
            .unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        let err = store
            .append_if_new(
                &props(&[("Fandoms & Cultural Expression", 1.0)]),
                stamp(2026, 8, 29, 6, 0),
            )
            .err()
            .unwrap();
        assert!(matches!(err, TrendLogError::SchemaMismatch { .. }));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn load_parses_rows_in_append_order() {
        let dir = tempdir().unwrap();
        let store = CsvTrendStore::new(dir.path().join("cate_trends.csv"));
        store
            .append_if_new(
                &props(&[("Music & Audio Trends", 0.5), ("Internet & Digital Culture", 0.5)]),
                stamp(2026, 8, 27, 6, 0),
            )
            .unwrap();
        store
            .append_if_new(
                &props(&[("Music & Audio Trends", 0.2), ("Internet & Digital Culture", 0.8)]),
                stamp(2026, 8, 28, 6, 0),
            )
            .unwrap();

        let log = store.load().unwrap();
        assert_eq!(log.rows.len(), 2);
        assert!(log.rows[0].record_time < log.rows[1].record_time);
        assert_eq!(log.rows[0].values, vec![Some(0.5), Some(0.5)]);
    }
}
