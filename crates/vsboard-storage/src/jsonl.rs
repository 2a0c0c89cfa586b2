//! Line-delimited JSON store. One record per line, append-only.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JsonlStore<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonlStore<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Append one record as a single line. The whole line goes out in one
    /// `write_all` on an append-mode handle, so a reader never sees half a record
    /// written by this process. A torn last line left by a crash is terminated
    /// first so the new record starts on a line of its own.
    pub async fn append(&self, record: &T) -> anyhow::Result<()> {
        let encoded = serde_json::to_string(record)
            .with_context(|| format!("serializing record for {}", self.path.display()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating store directory {}", parent.display()))?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {} for append", self.path.display()))?;

        let mut line = String::with_capacity(encoded.len() + 2);
        if ends_without_newline(&mut file)
            .await
            .with_context(|| format!("checking tail of {}", self.path.display()))?
        {
            warn!(path = %self.path.display(), "terminating torn last line before append");
            line.push('\n');
        }
        line.push_str(&encoded);
        line.push('\n');

        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("appending to {}", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing {}", self.path.display()))?;
        Ok(())
    }

    /// Lazy scan. Calling it again restarts from the first line.
    pub fn iter(&self) -> anyhow::Result<RecordIter<T>> {
        open_records(&self.path)
    }

    /// Read every parseable record. A missing file reads as empty.
    pub async fn scan_all(&self) -> anyhow::Result<Vec<T>> {
        let path = self.path.clone();
        let (records, skipped) = tokio::task::spawn_blocking(move || {
            let mut iter = open_records::<T>(&path)?;
            let records: Vec<T> = iter.by_ref().collect();
            anyhow::Ok((records, iter.skipped()))
        })
        .await
        .with_context(|| format!("scanning {}", self.path.display()))??;

        if skipped > 0 {
            debug!(path = %self.path.display(), skipped, "skipped unparseable store lines");
        }
        Ok(records)
    }

    /// Collect the key of every stored record into a set.
    pub async fn keys<F>(&self, key: F) -> anyhow::Result<HashSet<String>>
    where
        F: Fn(&T) -> String,
    {
        Ok(self.scan_all().await?.iter().map(key).collect())
    }
}

async fn ends_without_newline(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

fn open_records<T>(path: &Path) -> anyhow::Result<RecordIter<T>> {
    let reader = match File::open(path) {
        Ok(file) => Some(BufReader::new(file)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(err).with_context(|| format!("opening {}", path.display())),
    };
    Ok(RecordIter {
        reader,
        buf: Vec::new(),
        skipped: 0,
        _record: PhantomData,
    })
}

enum LineOutcome<T> {
    Record(T),
    Blank,
    Corrupt,
}

/// Lines are decoded from raw bytes, so invalid UTF-8 is just another corrupt line.
fn parse_line<T: DeserializeOwned>(line: &[u8]) -> LineOutcome<T> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return LineOutcome::Blank;
    }
    match serde_json::from_slice(trimmed) {
        Ok(record) => LineOutcome::Record(record),
        Err(_) => LineOutcome::Corrupt,
    }
}

pub struct RecordIter<T> {
    reader: Option<BufReader<File>>,
    buf: Vec<u8>,
    skipped: usize,
    _record: PhantomData<fn() -> T>,
}

impl<T> RecordIter<T> {
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<T: DeserializeOwned> Iterator for RecordIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let reader = self.reader.as_mut()?;
        loop {
            self.buf.clear();
            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "store read failed, ending scan");
                    return None;
                }
            }
            match parse_line::<T>(&self.buf) {
                LineOutcome::Record(record) => return Some(record),
                LineOutcome::Blank => {}
                LineOutcome::Corrupt => self.skipped += 1,
            }
        }
    }
}

/// Replace the file at `path` with `records` using a temp file and rename, so
/// readers see either the old or the new content.
pub async fn rewrite_atomically<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record).context("serializing record")?);
        body.push('\n');
    }

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), records.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(body.as_bytes())
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: String,
        n: u32,
    }

    fn row(id: &str, n: u32) -> Row {
        Row { id: id.into(), n }
    }

    #[tokio::test]
    async fn append_then_scan_preserves_order() {
        let dir = tempdir().expect("tempdir");
        let store = JsonlStore::<Row>::new(dir.path().join("nested/rows.jsonl"));
        store.append(&row("a", 1)).await.unwrap();
        store.append(&row("b", 2)).await.unwrap();

        let rows = store.scan_all().await.unwrap();
        assert_eq!(rows, vec![row("a", 1), row("b", 2)]);

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn missing_file_scans_empty() {
        let dir = tempdir().expect("tempdir");
        let store = JsonlStore::<Row>::new(dir.path().join("absent.jsonl"));
        assert!(!store.exists());
        assert!(store.scan_all().await.unwrap().is_empty());
        assert_eq!(store.iter().unwrap().count(), 0);
    }

    #[tokio::test]
    async fn corrupt_and_blank_lines_are_skipped() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("rows.jsonl");
        std::fs::write(
            &path,
            "{\"id\":\"a\",\"n\":1}\n\n{not json\n{\"id\":\"b\"}\n{\"id\":\"c\",\"n\":3}\n",
        )
        .unwrap();
        let store = JsonlStore::<Row>::new(&path);

        let rows = store.scan_all().await.unwrap();
        assert_eq!(rows, vec![row("a", 1), row("c", 3)]);

        let mut iter = store.iter().unwrap();
        let lazy: Vec<Row> = iter.by_ref().collect();
        assert_eq!(lazy, rows);
        assert_eq!(iter.skipped(), 2);

        // restartable
        assert_eq!(store.iter().unwrap().count(), 2);
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_abort_scan() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("rows.jsonl");
        let mut bytes = b"{\"id\":\"a\",\"n\":1}\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        bytes.extend_from_slice(b"{\"id\":\"b\",\"n\":2}\n");
        std::fs::write(&path, bytes).unwrap();
        let store = JsonlStore::<Row>::new(&path);

        assert_eq!(store.scan_all().await.unwrap(), vec![row("a", 1), row("b", 2)]);
        let keys = store.keys(|r| r.id.clone()).await.unwrap();
        assert_eq!(keys.len(), 2);

        let mut iter = store.iter().unwrap();
        assert_eq!(iter.by_ref().count(), 2);
        assert_eq!(iter.skipped(), 1);
    }

    #[tokio::test]
    async fn append_after_torn_line_starts_a_new_line() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("rows.jsonl");
        std::fs::write(&path, "{\"id\":\"a\",\"n\":1}\n{\"id\":\"cra").unwrap();
        let store = JsonlStore::<Row>::new(&path);

        store.append(&row("b", 2)).await.unwrap();
        store.append(&row("c", 3)).await.unwrap();
        assert_eq!(
            store.scan_all().await.unwrap(),
            vec![row("a", 1), row("b", 2), row("c", 3)]
        );

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(!text.contains("\n\n"));
    }

    #[tokio::test]
    async fn keys_collects_each_record_key() {
        let dir = tempdir().expect("tempdir");
        let store = JsonlStore::<Row>::new(dir.path().join("rows.jsonl"));
        store.append(&row("a", 1)).await.unwrap();
        store.append(&row("b", 2)).await.unwrap();
        store.append(&row("a", 3)).await.unwrap();

        let keys = store.keys(|r| r.id.clone()).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("a") && keys.contains("b"));
    }

    #[tokio::test]
    async fn rewrite_replaces_content() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("rows.jsonl");
        let store = JsonlStore::<Row>::new(&path);
        store.append(&row("a", 1)).await.unwrap();
        store.append(&row("b", 2)).await.unwrap();

        rewrite_atomically(&path, &[row("b", 2)]).await.unwrap();
        assert_eq!(store.scan_all().await.unwrap(), vec![row("b", 2)]);

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
