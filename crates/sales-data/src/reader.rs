//! Batch discovery and CSV loading.
//!
//! Lists dated batch files in the source directory and converts their rows
//! into [`Record`]s, mapping category codes on the way in.

use std::path::Path;

use chrono::NaiveDate;
use sales_core::error::{MonitorError, Result};
use sales_core::models::{BatchFile, Record};
use sales_core::time_utils::{extract_date_from_filename, parse_record_date};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Columns every batch file must carry.
pub const REQUIRED_COLUMNS: &[&str] = &["Date", "Region", "Product Category", "Product", "Sales"];

// ── Discovery ─────────────────────────────────────────────────────────────────

/// List candidate batches directly under `dir`.
///
/// A file is a candidate when its extension equals `extension` and its name
/// embeds a `YYYY-MM-DD` date; everything else is ignored. The listing is
/// taken in file-name order and then stably sorted by embedded date, so
/// batches sharing a date keep their listing order.
pub fn discover_batches(dir: &Path, extension: &str) -> Result<Vec<BatchFile>> {
    if !dir.is_dir() {
        return Err(MonitorError::DataPathNotFound(dir.to_path_buf()));
    }

    let mut batches = Vec::new();
    let mut ignored = 0usize;

    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| MonitorError::FileRead {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let has_extension = entry
            .path()
            .extension()
            .map(|ext| ext == extension)
            .unwrap_or(false);
        let Some(name) = entry.file_name().to_str() else {
            ignored += 1;
            continue;
        };

        match extract_date_from_filename(name) {
            Some(date) if has_extension => batches.push(BatchFile {
                name: name.to_string(),
                path: entry.path().to_path_buf(),
                date,
            }),
            _ => ignored += 1,
        }
    }

    batches.sort_by_key(|b| b.date);

    debug!(
        "Discovered {} batch files in {} ({} ignored)",
        batches.len(),
        dir.display(),
        ignored
    );
    Ok(batches)
}

/// Keep batches dated strictly after `since`; `None` keeps everything.
pub fn batches_since(batches: Vec<BatchFile>, since: Option<NaiveDate>) -> Vec<BatchFile> {
    match since {
        Some(cutoff) => batches.into_iter().filter(|b| b.date > cutoff).collect(),
        None => batches,
    }
}

/// Batches already covered by a watermark on `last` dated `date`.
///
/// Everything dated before `date`, plus same-date batches listed at or
/// before `last`. Same-date batches listed after it arrived once the
/// watermark was written and were never merged.
pub fn batches_through(batches: Vec<BatchFile>, date: NaiveDate, last: &str) -> Vec<BatchFile> {
    batches
        .into_iter()
        .filter(|b| b.date < date || (b.date == date && b.name.as_str() <= last))
        .collect()
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// One CSV row as written by the point-of-sale export.
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Region")]
    region: String,
    #[serde(rename = "Product Category")]
    category: String,
    #[serde(rename = "Product")]
    product: String,
    #[serde(rename = "Sales")]
    sales: String,
}

/// Read a single batch into typed records, in file order.
///
/// Fails when the file cannot be opened or lacks a required column. Rows
/// that cannot be decoded or whose `Sales` cell is not numeric are skipped
/// with a warning. Unparseable dates are kept as `None`.
pub fn load_batch(batch: &BatchFile) -> Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(&batch.path)
        .map_err(|e| csv_error(&batch.path, e))?;

    let headers = reader
        .headers()
        .map_err(|e| csv_error(&batch.path, e))?
        .clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == *column) {
            return Err(MonitorError::MissingColumn {
                path: batch.path.clone(),
                column: (*column).to_string(),
            });
        }
    }

    let mut records = Vec::new();
    let mut skipped = 0u64;

    for (line, row) in reader.deserialize::<RawRow>().enumerate() {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                warn!(batch = %batch.name, line = line + 2, error = %e, "skipping undecodable row");
                skipped += 1;
                continue;
            }
        };

        let sales_amount = match row.sales.parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                warn!(
                    batch = %batch.name,
                    line = line + 2,
                    "skipping row with non-numeric sales value \"{}\"",
                    row.sales
                );
                skipped += 1;
                continue;
            }
        };

        records.push(Record::new(
            parse_record_date(&row.date),
            row.region,
            row.category,
            row.product,
            sales_amount,
        ));
    }

    debug!(
        "Batch {}: {} rows loaded, {} skipped",
        batch.name,
        records.len(),
        skipped
    );
    Ok(records)
}

/// Load `batches` in order and concatenate their rows.
///
/// Stops at the first batch that fails to load.
pub fn load_batches(batches: &[BatchFile]) -> Result<Vec<Record>> {
    let mut all = Vec::new();
    for batch in batches {
        let records = load_batch(batch)?;
        info!(batch = %batch.name, rows = records.len(), "batch loaded");
        all.extend(records);
    }
    Ok(all)
}

fn csv_error(path: &Path, err: csv::Error) -> MonitorError {
    if err.is_io_error() {
        if let csv::ErrorKind::Io(source) = err.into_kind() {
            return MonitorError::FileRead {
                path: path.to_path_buf(),
                source,
            };
        }
        return MonitorError::BatchParse {
            path: path.to_path_buf(),
            message: "I/O error".to_string(),
        };
    }
    MonitorError::BatchParse {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const HEADER: &str = "Date,Region,Product Category,Product,Sales";

    fn write_batch(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut content = String::from(HEADER);
        for row in rows {
            content.push('\n');
            content.push_str(row);
        }
        content.push('\n');
        std::fs::write(&path, content).unwrap();
        path
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn batch(dir: &Path, name: &str) -> BatchFile {
        BatchFile {
            name: name.to_string(),
            path: dir.join(name),
            date: extract_date_from_filename(name).unwrap(),
        }
    }

    // ── discover_batches ──────────────────────────────────────────────────────

    #[test]
    fn test_discover_sorted_by_date() {
        let dir = TempDir::new().unwrap();
        write_batch(dir.path(), "sales_2024-01-10.csv", &[]);
        write_batch(dir.path(), "sales_2024-01-01.csv", &[]);
        write_batch(dir.path(), "export_2024-01-05.csv", &[]);

        let batches = discover_batches(dir.path(), "csv").unwrap();
        let names: Vec<&str> = batches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "sales_2024-01-01.csv",
                "export_2024-01-05.csv",
                "sales_2024-01-10.csv"
            ]
        );
        assert_eq!(batches[0].date, ymd(2024, 1, 1));
    }

    #[test]
    fn test_discover_same_date_keeps_listing_order() {
        let dir = TempDir::new().unwrap();
        write_batch(dir.path(), "b_2024-01-01.csv", &[]);
        write_batch(dir.path(), "a_2024-01-01.csv", &[]);
        write_batch(dir.path(), "c_2023-12-31.csv", &[]);

        let names: Vec<String> = discover_batches(dir.path(), "csv")
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(
            names,
            vec!["c_2023-12-31.csv", "a_2024-01-01.csv", "b_2024-01-01.csv"]
        );
    }

    #[test]
    fn test_discover_ignores_undated_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        write_batch(dir.path(), "sales_2024-01-01.csv", &[]);
        write_batch(dir.path(), "notes.csv", &[]);
        std::fs::write(dir.path().join("sales_2024-01-02.txt"), "x").unwrap();
        std::fs::write(dir.path().join("last_processed.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("report_archive")).unwrap();
        let sub = dir.path().join("nested");
        std::fs::create_dir(&sub).unwrap();
        write_batch(&sub, "sales_2024-02-01.csv", &[]);

        let batches = discover_batches(dir.path(), "csv").unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].name, "sales_2024-01-01.csv");
    }

    #[test]
    fn test_discover_missing_directory() {
        let err = discover_batches(Path::new("/tmp/no-such-sales-dir-xyz"), "csv").unwrap_err();
        assert!(matches!(err, MonitorError::DataPathNotFound(_)));
    }

    #[test]
    fn test_discover_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(discover_batches(dir.path(), "csv").unwrap().is_empty());
    }

    // ── batches_since / batches_through ───────────────────────────────────────

    #[test]
    fn test_batches_since_is_strict() {
        let dir = TempDir::new().unwrap();
        let all = vec![
            batch(dir.path(), "a_2024-01-01.csv"),
            batch(dir.path(), "b_2024-01-05.csv"),
            batch(dir.path(), "c_2024-01-05.csv"),
            batch(dir.path(), "d_2024-01-10.csv"),
        ];

        let newer = batches_since(all.clone(), Some(ymd(2024, 1, 5)));
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].name, "d_2024-01-10.csv");

        assert_eq!(batches_since(all.clone(), None).len(), 4);

    }

    #[test]
    fn test_batches_through_stops_at_watermark_name() {
        let dir = TempDir::new().unwrap();
        let all = vec![
            batch(dir.path(), "a_2024-01-01.csv"),
            batch(dir.path(), "b_2024-01-05.csv"),
            batch(dir.path(), "c_2024-01-05.csv"),
            batch(dir.path(), "d_2024-01-10.csv"),
        ];

        let names = |v: Vec<BatchFile>| v.into_iter().map(|b| b.name).collect::<Vec<_>>();

        assert_eq!(
            names(batches_through(all.clone(), ymd(2024, 1, 5), "b_2024-01-05.csv")),
            vec!["a_2024-01-01.csv", "b_2024-01-05.csv"]
        );
        assert_eq!(
            names(batches_through(all.clone(), ymd(2024, 1, 5), "c_2024-01-05.csv")),
            vec!["a_2024-01-01.csv", "b_2024-01-05.csv", "c_2024-01-05.csv"]
        );
        assert!(batches_through(all, ymd(2023, 12, 31), "z.csv").is_empty());
    }

    // ── load_batch ────────────────────────────────────────────────────────────

    #[test]
    fn test_load_batch_basic() {
        let dir = TempDir::new().unwrap();
        write_batch(
            dir.path(),
            "sales_2024-01-01.csv",
            &["2024-01-01,North,AA,Cola,100", "2024-01-01,South,AB,Oat Latte,200.5"],
        );

        let records = load_batch(&batch(dir.path(), "sales_2024-01-01.csv")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].region, "North");
        assert_eq!(records[0].category_label.as_deref(), Some("Carbonated Drink"));
        assert_eq!(records[0].date, Some(ymd(2024, 1, 1)));
        assert_eq!(records[1].sales_amount, 200.5);
        assert_eq!(records[1].category_label.as_deref(), Some("Plant-Based Drink"));
        assert!(records.iter().all(|r| !r.is_anomaly));
    }

    #[test]
    fn test_load_batch_column_order_and_extra_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sales_2024-01-01.csv");
        std::fs::write(
            &path,
            "Sales,Store,Product,Product Category,Region,Date\n42,7,Cola,AA,East,2024-01-01\n",
        )
        .unwrap();

        let records = load_batch(&batch(dir.path(), "sales_2024-01-01.csv")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].region, "East");
        assert_eq!(records[0].sales_amount, 42.0);
    }

    #[test]
    fn test_load_batch_missing_column() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("sales_2024-01-01.csv"),
            "Date,Region,Product,Sales\n2024-01-01,North,Cola,1\n",
        )
        .unwrap();

        let err = load_batch(&batch(dir.path(), "sales_2024-01-01.csv")).unwrap_err();
        match err {
            MonitorError::MissingColumn { column, .. } => assert_eq!(column, "Product Category"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_batch_skips_bad_sales_keeps_bad_dates() {
        let dir = TempDir::new().unwrap();
        write_batch(
            dir.path(),
            "sales_2024-01-01.csv",
            &[
                "2024-01-01,North,AA,Cola,abc",
                "not-a-date,North,AA,Cola,10",
                "2024-01-01,North,ZZ,Mystery,5",
            ],
        );

        let records = load_batch(&batch(dir.path(), "sales_2024-01-01.csv")).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].date.is_none());
        assert!(records[1].category_label.is_none());
    }

    #[test]
    fn test_load_batch_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_batch(&batch(dir.path(), "sales_2024-01-01.csv")).unwrap_err();
        assert!(matches!(err, MonitorError::FileRead { .. }));
    }

    #[test]
    fn test_load_batches_preserves_order() {
        let dir = TempDir::new().unwrap();
        write_batch(dir.path(), "a_2024-01-01.csv", &["2024-01-01,North,AA,Cola,1"]);
        write_batch(dir.path(), "b_2024-01-02.csv", &["2024-01-02,South,AB,Oat,2"]);

        let records = load_batches(&[
            batch(dir.path(), "a_2024-01-01.csv"),
            batch(dir.path(), "b_2024-01-02.csv"),
        ])
        .unwrap();
        let sales: Vec<f64> = records.iter().map(|r| r.sales_amount).collect();
        assert_eq!(sales, vec![1.0, 2.0]);
    }
}
