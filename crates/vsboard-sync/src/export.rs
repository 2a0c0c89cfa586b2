//! Parquet snapshots of the classification store, with a checksummed manifest.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use vsboard_core::ClassificationResult;
use vsboard_storage::{sha256_hex, JsonlStore};

use crate::config::DataPaths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub rows: usize,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Write `results.parquet`, `themes.parquet` and `manifest.json` into `out_dir`.
/// Returns the manifest path.
pub async fn export_results_parquet(paths: &DataPaths, out_dir: &Path) -> Result<PathBuf> {
    let results: Vec<ClassificationResult> = JsonlStore::new(&paths.analysis).scan_all().await?;
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let results_path = out_dir.join("results.parquet");
    let themes_path = out_dir.join("themes.parquet");
    write_results_parquet(&results_path, &results)?;
    write_themes_parquet(&themes_path, &results)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        rows: results.len(),
        files: vec![
            manifest_entry("results", out_dir, &results_path)?,
            manifest_entry("themes", out_dir, &themes_path)?,
        ],
    };
    let manifest_path = out_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    tokio::fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn utf8<'a>(values: impl Iterator<Item = &'a str>) -> StringArray {
    StringArray::from(values.map(Some).collect::<Vec<_>>())
}

fn write_results_parquet(path: &Path, results: &[ClassificationResult]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("comment_id", DataType::Utf8, false),
        ArrowField::new("post_id", DataType::Utf8, false),
        ArrowField::new("subreddit", DataType::Utf8, false),
        ArrowField::new("comparison", DataType::Utf8, false),
        ArrowField::new("claude_code_sentiment", DataType::Utf8, false),
        ArrowField::new("codex_sentiment", DataType::Utf8, false),
        ArrowField::new("quote_worthy", DataType::Boolean, false),
        ArrowField::new("quote", DataType::Utf8, true),
        ArrowField::new("score", DataType::Int64, false),
        ArrowField::new("model", DataType::Utf8, false),
        ArrowField::new("analyzed_at", DataType::Utf8, false),
    ]));

    let analyzed_at = results
        .iter()
        .map(|r| r.analyzed_at.to_rfc3339())
        .collect::<Vec<_>>();
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(utf8(results.iter().map(|r| r.comment_id.as_str()))),
            Arc::new(utf8(results.iter().map(|r| r.post_id.as_str()))),
            Arc::new(utf8(results.iter().map(|r| r.subreddit.as_str()))),
            Arc::new(utf8(results.iter().map(|r| r.comparison.as_str()))),
            Arc::new(utf8(results.iter().map(|r| r.claude_code_sentiment.as_str()))),
            Arc::new(utf8(results.iter().map(|r| r.codex_sentiment.as_str()))),
            Arc::new(BooleanArray::from(
                results.iter().map(|r| r.quote_worthy).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                results.iter().map(|r| r.quote.as_deref()).collect::<Vec<_>>(),
            )),
            Arc::new(Int64Array::from(results.iter().map(|r| r.score).collect::<Vec<_>>())),
            Arc::new(utf8(results.iter().map(|r| r.model.as_str()))),
            Arc::new(utf8(analyzed_at.iter().map(String::as_str))),
        ],
    )
    .context("building results record batch")?;
    write_parquet(path, batch)
}

fn write_themes_parquet(path: &Path, results: &[ClassificationResult]) -> Result<()> {
    let rows = results
        .iter()
        .flat_map(|r| r.themes.iter().map(move |t| (r.comment_id.as_str(), t.as_str())))
        .collect::<Vec<_>>();
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("comment_id", DataType::Utf8, false),
        ArrowField::new("theme", DataType::Utf8, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(utf8(rows.iter().map(|(id, _)| *id))),
            Arc::new(utf8(rows.iter().map(|(_, t)| *t))),
        ],
    )
    .context("building themes record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, root: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path.strip_prefix(root).unwrap_or(path).display().to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vsboard_core::{Comparison, Sentiment};

    fn result(id: &str, themes: &[&str]) -> ClassificationResult {
        ClassificationResult {
            comment_id: id.to_string(),
            post_id: "p".to_string(),
            subreddit: "codex".to_string(),
            permalink: format!("/r/codex/comments/p/s/{id}/"),
            comparison: Comparison::Equal,
            claude_code_sentiment: Sentiment::Positive,
            codex_sentiment: Sentiment::Positive,
            reasoning: String::new(),
            themes: themes.iter().map(|t| t.to_string()).collect(),
            quote_worthy: false,
            quote: None,
            score: 4,
            model: "m".to_string(),
            analyzed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn export_writes_files_and_manifest_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        let store = JsonlStore::new(&paths.analysis);
        store.append(&result("a", &["speed", "cost"])).await.unwrap();
        store.append(&result("b", &[])).await.unwrap();

        let out = dir.path().join("export");
        let manifest_path = export_results_parquet(&paths, &out).await.unwrap();
        let manifest: ParquetManifest =
            serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
        assert_eq!(manifest.rows, 2);
        assert_eq!(manifest.files.len(), 2);
        for file in &manifest.files {
            let bytes = std::fs::read(out.join(&file.path)).unwrap();
            assert_eq!(file.sha256, sha256_hex(&bytes));
            assert_eq!(file.bytes, bytes.len() as u64);
        }
    }
}
