//! ✂️ Cutting big CSVs into upload-sized parts.
//!
//! `Opportunity_ABC.csv` above the threshold becomes
//! `Opportunity_ABC.csv__PART__1`, `__PART__2`, ... each with the header row,
//! and the original goes away. Rows are never split across parts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use super::csv_writer;

/// 📁 `<file>__PART__<n>`, n from 1.
pub fn part_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!("__PART__{n}"));
    PathBuf::from(name)
}

/// 📏 Bytes a record takes once every field is quoted, comma separated and CRLF terminated.
fn quoted_size(record: &csv::ByteRecord) -> u64 {
    let fields: u64 = record
        .iter()
        .map(|field| field.len() as u64 + 2 + field.iter().filter(|b| **b == b'"').count() as u64)
        .sum();
    fields + record.len().saturating_sub(1) as u64 + 2
}

/// ✂️ Returns the files that now hold the data: the original, or its parts.
pub fn split_csv(path: &Path, threshold_bytes: u64) -> Result<Vec<PathBuf>> {
    let size = fs::metadata(path)
        .with_context(|| format!("💀 {} vanished before it could be measured", path.display()))?
        .len();
    if size <= threshold_bytes {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("💀 Could not reopen {} for splitting", path.display()))?;
    let header = reader.byte_headers()?.clone();
    let header_size = quoted_size(&header);

    let mut parts = vec![part_path(path, 1)];
    let mut writer = csv_writer(&parts[0])?;
    writer.write_byte_record(&header)?;
    let mut current = header_size;
    let mut wrote_rows = false;

    for record in reader.byte_records() {
        let record = record.with_context(|| format!("💀 {} has a broken row", path.display()))?;
        let row_size = quoted_size(&record);
        if wrote_rows && current + row_size > threshold_bytes {
            writer.flush()?;
            let next = part_path(path, parts.len() + 1);
            writer = csv_writer(&next)?;
            writer.write_byte_record(&header)?;
            parts.push(next);
            current = header_size;
        }
        writer.write_byte_record(&record)?;
        current += row_size;
        wrote_rows = true;
    }
    writer.flush()?;
    drop(writer);

    fs::remove_file(path)
        .with_context(|| format!("💀 Split {} but could not remove the original", path.display()))?;
    info!("✂️ split {} into {} parts", path.display(), parts.len());
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a_csv(dir: &Path, rows: usize) -> Result<PathBuf> {
        let path = dir.join("Opportunity_ABC.csv");
        let mut writer = csv_writer(&path)?;
        writer.write_record(["Stage", "Amount"])?;
        for i in 0..rows {
            writer.write_record([format!("Stage{i:03}"), format!("{i:05}")])?;
        }
        writer.flush()?;
        Ok(path)
    }

    #[test]
    fn the_one_where_a_small_file_is_left_alone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = a_csv(dir.path(), 3)?;
        assert_eq!(split_csv(&path, 1_000_000)?, vec![path.clone()]);
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn the_one_where_every_part_gets_the_header() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = a_csv(dir.path(), 30)?;
        // -- header is 18 bytes, every row 20: four rows per part
        let parts = split_csv(&path, 100)?;
        assert!(!path.exists());
        assert_eq!(parts.len(), 8);
        assert_eq!(parts[0], dir.path().join("Opportunity_ABC.csv__PART__1"));

        let mut rows = 0;
        for part in &parts {
            assert!(fs::metadata(part)?.len() <= 100, "{}", part.display());
            let mut reader = csv::Reader::from_path(part)?;
            assert_eq!(reader.headers()?.iter().collect::<Vec<_>>(), vec!["Stage", "Amount"]);
            rows += reader.records().count();
        }
        assert_eq!(rows, 30);
        Ok(())
    }
}
