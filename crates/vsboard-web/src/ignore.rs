//! Advisory exclusions. Ignoring a reply or thread hides it from aggregation
//! but never touches the result store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing::warn;
use vsboard_core::ClassificationResult;

pub const IGNORED_COMMENTS_KEY: &str = "ignoredComments";
pub const IGNORED_THREADS_KEY: &str = "ignoredPosts";

/// Synchronous string key-value persistence.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A single JSON object on disk, rewritten via temp file + rename on every `set`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(map) => Ok(map),
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "ignore file is corrupt; starting empty");
                    Ok(BTreeMap::new())
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err).with_context(|| format!("reading {}", self.path.display())),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("ignore file lock poisoned"))?;
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("ignore file lock poisoned"))?;
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let tmp = dir.join(format!(".ignored.{}.tmp", std::process::id()));
        let bytes = serde_json::to_vec_pretty(&map).context("serializing ignore file")?;
        let mut file =
            std::fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    comments: BTreeSet<String>,
    threads: BTreeSet<String>,
}

impl IgnoreSet {
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        Ok(Self {
            comments: load_ids(store, IGNORED_COMMENTS_KEY)?,
            threads: load_ids(store, IGNORED_THREADS_KEY)?,
        })
    }

    pub fn is_ignored(&self, result: &ClassificationResult) -> bool {
        self.comments.contains(&result.comment_id) || self.threads.contains(&result.post_id)
    }

    pub fn contains_comment(&self, id: &str) -> bool {
        self.comments.contains(id)
    }

    pub fn contains_thread(&self, id: &str) -> bool {
        self.threads.contains(id)
    }

    pub fn len(&self) -> usize {
        self.comments.len() + self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty() && self.threads.is_empty()
    }

    /// Flip the reply's ignore flag and persist it. Returns the new state.
    pub fn toggle_comment(&mut self, id: &str, store: &dyn KeyValueStore) -> Result<bool> {
        let now_ignored = toggle(&mut self.comments, id);
        save_ids(store, IGNORED_COMMENTS_KEY, &self.comments)?;
        Ok(now_ignored)
    }

    pub fn toggle_thread(&mut self, id: &str, store: &dyn KeyValueStore) -> Result<bool> {
        let now_ignored = toggle(&mut self.threads, id);
        save_ids(store, IGNORED_THREADS_KEY, &self.threads)?;
        Ok(now_ignored)
    }
}

fn toggle(set: &mut BTreeSet<String>, id: &str) -> bool {
    if set.remove(id) {
        false
    } else {
        set.insert(id.to_string());
        true
    }
}

fn load_ids(store: &dyn KeyValueStore, key: &str) -> Result<BTreeSet<String>> {
    let Some(raw) = store.get(key)? else {
        return Ok(BTreeSet::new());
    };
    match serde_json::from_str::<BTreeSet<String>>(&raw) {
        Ok(ids) => Ok(ids),
        Err(err) => {
            warn!(key, error = %err, "ignoring unreadable ignore list");
            Ok(BTreeSet::new())
        }
    }
}

fn save_ids(store: &dyn KeyValueStore, key: &str, ids: &BTreeSet<String>) -> Result<()> {
    let raw = serde_json::to_string(ids).context("serializing ignore list")?;
    store.set(key, &raw)
}
