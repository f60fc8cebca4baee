use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct Entry<V> {
    k: String,
    v: V,
}

/// Durable request -> response map, stored as one JSON object per line.
///
/// The file is read once on [`JsonCache::open`]; every insert appends a line
/// and syncs it before returning, so an interrupted batch keeps everything it
/// already paid for. Later lines win when a key repeats.
#[derive(Debug)]
pub struct JsonCache<V> {
    path: PathBuf,
    entries: BTreeMap<String, V>,
    log: File,
}

impl<V: Serialize + DeserializeOwned> JsonCache<V> {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("[remote::cache] create dir {}", dir.display()))?;
        }

        let mut entries = BTreeMap::new();
        let mut torn = false;
        if path.exists() {
            let file = File::open(path)
                .with_context(|| format!("[remote::cache] Failed to open cache: {}", path.display()))?;
            let mut reader = BufReader::new(file);
            let mut line = String::new();
            let mut lineno = 0;
            while reader.read_line(&mut line)
                .with_context(|| format!("[remote::cache] Failed to read {}", path.display()))? > 0
            {
                lineno += 1;
                torn = !line.ends_with('\n');
                if !line.trim().is_empty() {
                    match serde_json::from_str::<Entry<V>>(line.trim_end()) {
                        Ok(entry) => { entries.insert(entry.k, entry.v); }
                        // A torn final line from an interrupted write
                        Err(err) => warn!(path = %path.display(), line = lineno, %err, "ignoring unreadable cache line"),
                    }
                }
                line.clear();
            }
        }

        let mut log = OpenOptions::new().create(true).append(true).open(path)
            .with_context(|| format!("[remote::cache] Failed to open cache for append: {}", path.display()))?;
        if torn {
            log.write_all(b"\n")
                .with_context(|| format!("[remote::cache] Failed to append to {}", path.display()))?;
        }
        debug!(path = %path.display(), entries = entries.len(), "opened cache");

        Ok(Self { path: path.to_path_buf(), entries, log })
    }

    #[inline] pub fn path(&self) -> &Path { &self.path }

    #[inline] pub fn len(&self) -> usize { self.entries.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    #[inline] pub fn get(&self, key: &str) -> Option<&V> { self.entries.get(key) }

    #[inline] pub fn contains(&self, key: &str) -> bool { self.entries.contains_key(key) }

    /// Record `value` under `key` and persist it before returning.
    pub fn insert(&mut self, key: &str, value: V) -> Result<()> {
        let entry = Entry { k: key.to_string(), v: value };
        let mut line = serde_json::to_vec(&entry).context("[remote::cache] Failed to encode cache entry")?;
        line.push(b'\n');
        self.log.write_all(&line)
            .and_then(|_| self.log.sync_data())
            .with_context(|| format!("[remote::cache] Failed to append to {}", self.path.display()))?;
        self.entries.insert(entry.k, entry.v);
        Ok(())
    }
}
