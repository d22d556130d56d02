use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::ErrorKind;
use crate::text::normalize_for_key;

/// Identity of one translation request. Different engines never share keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub text_hash: String,
    pub source_lang: String,
    pub target_lang: String,
    pub engine_id: String,
}

impl CacheKey {
    pub fn new(text: &str, source_lang: &str, target_lang: &str, engine_id: &str) -> Self {
        let digest = md5::compute(normalize_for_key(text).as_bytes());
        Self {
            text_hash: format!("{:x}", digest),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            engine_id: engine_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub text: String,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalLine {
    #[serde(flatten)]
    key: CacheKey,
    text: String,
    created_at: i64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
}

/// Shared translation cache. Reads run concurrently; inserts are
/// write-once per key and, when a journal is attached, appended to it
/// before they become visible.
pub struct TranslationCache {
    state: RwLock<CacheState>,
    capacity: usize,
    max_age: Option<Duration>,
    journal: Option<PathBuf>,
}

impl TranslationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            capacity: capacity.max(1),
            max_age: None,
            journal: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Opens (or starts) a journal-backed cache at `path`.
    pub fn load(path: &Path, capacity: usize, max_age: Option<Duration>) -> Result<Self> {
        let cache = Self {
            state: RwLock::new(CacheState::default()),
            capacity: capacity.max(1),
            max_age,
            journal: Some(path.to_path_buf()),
        };
        if !path.exists() {
            return Ok(cache);
        }

        let file = fs::File::open(path)
            .with_context(|| format!("failed to open cache journal: {}", path.display()))?;
        let now = now_unix();
        let mut loaded = 0usize;
        {
            let mut state = cache.write_state().map_err(|err| anyhow!(err))?;
            for (idx, line) in BufReader::new(file).lines().enumerate() {
                let line = line.with_context(|| {
                    format!("failed to read cache journal: {}", path.display())
                })?;
                if line.trim().is_empty() {
                    continue;
                }
                let parsed: JournalLine = serde_json::from_str(&line).with_context(|| {
                    format!("corrupt cache journal {} at line {}", path.display(), idx + 1)
                })?;
                if is_expired(parsed.created_at, now, cache.max_age) {
                    continue;
                }
                if state.entries.contains_key(&parsed.key) {
                    continue;
                }
                state.order.push_back(parsed.key.clone());
                state.entries.insert(
                    parsed.key,
                    CacheEntry {
                        text: parsed.text,
                        created_at: parsed.created_at,
                    },
                );
                loaded += 1;
            }
            evict(&mut state, cache.capacity);
        }
        info!("loaded {} cached translations from {}", loaded, path.display());
        Ok(cache)
    }

    pub fn get(&self, key: &CacheKey) -> Result<Option<String>, ErrorKind> {
        let state = self.read_state()?;
        let Some(entry) = state.entries.get(key) else {
            return Ok(None);
        };
        if is_expired(entry.created_at, now_unix(), self.max_age) {
            return Ok(None);
        }
        Ok(Some(entry.text.clone()))
    }

    /// Stores `text` under `key` unless the key already holds a live value,
    /// and returns whichever value the cache holds afterwards. An expired
    /// value is replaced and moves to the back of the eviction order.
    pub fn insert(&self, key: CacheKey, text: String) -> Result<String, ErrorKind> {
        let now = now_unix();
        let mut state = self.write_state()?;
        if let Some(existing) = state.entries.get(&key) {
            if !is_expired(existing.created_at, now, self.max_age) {
                return Ok(existing.text.clone());
            }
            state.entries.remove(&key);
            state.order.retain(|queued| *queued != key);
        }
        let entry = CacheEntry {
            text,
            created_at: now,
        };
        if let Some(path) = &self.journal {
            append_journal(path, &key, &entry).map_err(|err| {
                ErrorKind::Fatal(format!("translation cache unavailable: {:#}", err))
            })?;
        }
        debug!(engine = %key.engine_id, "cached translation {}", key.text_hash);
        let value = entry.text.clone();
        state.order.push_back(key.clone());
        state.entries.insert(key, entry);
        evict(&mut state, self.capacity);
        Ok(value)
    }

    /// Ages every entry by `secs`.
    #[cfg(test)]
    pub(crate) fn backdate(&self, secs: i64) {
        if let Ok(mut state) = self.state.write() {
            for entry in state.entries.values_mut() {
                entry.created_at -= secs;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read_state()
            .map(|state| state.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes every live entry to `path` in insertion order.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let state = self.read_state().map_err(|err| anyhow!(err))?;
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create cache directory: {}", dir.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| "failed to create temp file for cache")?;
        for key in &state.order {
            if let Some(entry) = state.entries.get(key) {
                let line = JournalLine {
                    key: key.clone(),
                    text: entry.text.clone(),
                    created_at: entry.created_at,
                };
                serde_json::to_writer(&mut tmp, &line)?;
                tmp.write_all(b"\n")?;
            }
        }
        tmp.flush()?;
        tmp.persist(path)
            .map_err(|err| anyhow!("failed to write cache {}: {}", path.display(), err))?;
        Ok(())
    }

    /// Rewrites the attached journal without duplicates or evicted entries.
    pub fn compact(&self) -> Result<()> {
        match &self.journal {
            Some(path) => self.persist(path),
            None => Ok(()),
        }
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, CacheState>, ErrorKind> {
        self.state
            .read()
            .map_err(|_| ErrorKind::Fatal("translation cache lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, CacheState>, ErrorKind> {
        self.state
            .write()
            .map_err(|_| ErrorKind::Fatal("translation cache lock poisoned".to_string()))
    }
}

fn append_journal(path: &Path, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
    let line = serde_json::to_string(&JournalLine {
        key: key.clone(),
        text: entry.text.clone(),
        created_at: entry.created_at,
    })?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open cache journal: {}", path.display()))?;
    writeln!(file, "{}", line)
        .with_context(|| format!("failed to append cache journal: {}", path.display()))?;
    Ok(())
}

fn evict(state: &mut CacheState, capacity: usize) {
    while state.entries.len() > capacity {
        let Some(oldest) = state.order.pop_front() else {
            break;
        };
        state.entries.remove(&oldest);
    }
}

fn is_expired(created_at: i64, now: i64, max_age: Option<Duration>) -> bool {
    match max_age {
        Some(max_age) => now.saturating_sub(created_at) > max_age.as_secs() as i64,
        None => false,
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_uses_normalized_text() {
        let a = CacheKey::new("Hello", "en", "zh-CN", "basic");
        let b = CacheKey::new("  hello ", "en", "zh-CN", "basic");
        assert_eq!(a, b);
        assert_eq!(a.text_hash, format!("{:x}", md5::compute("hello")));
    }

    #[test]
    fn engines_are_separate_partitions() {
        let cache = TranslationCache::new(16);
        cache
            .insert(CacheKey::new("Hello", "en", "zh-CN", "basic"), "你好".into())
            .unwrap();
        let premium = CacheKey::new("Hello", "en", "zh-CN", "premium");
        assert_eq!(cache.get(&premium).unwrap(), None);
    }

    #[test]
    fn insert_never_overwrites() {
        let cache = TranslationCache::new(16);
        let key = CacheKey::new("Hello", "en", "ja", "basic");
        assert_eq!(cache.insert(key.clone(), "こんにちは".into()).unwrap(), "こんにちは");
        assert_eq!(cache.insert(key.clone(), "やあ".into()).unwrap(), "こんにちは");
        assert_eq!(cache.get(&key).unwrap().as_deref(), Some("こんにちは"));
    }

    #[test]
    fn expired_entry_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        let cache = TranslationCache::load(&path, 16, Some(Duration::from_secs(60))).unwrap();
        let key = CacheKey::new("Hello", "en", "fr", "basic");
        cache.insert(key.clone(), "Salut".into()).unwrap();
        cache.backdate(120);
        assert_eq!(cache.get(&key).unwrap(), None);

        assert_eq!(cache.insert(key.clone(), "Bonjour".into()).unwrap(), "Bonjour");
        assert_eq!(cache.get(&key).unwrap().as_deref(), Some("Bonjour"));
        assert_eq!(cache.len(), 1);

        let journal = fs::read_to_string(&path).unwrap();
        assert_eq!(journal.lines().count(), 2);
        assert!(journal.lines().last().unwrap().contains("Bonjour"));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache = TranslationCache::new(2);
        let keys: Vec<_> = ["one", "two", "three"]
            .iter()
            .map(|text| CacheKey::new(text, "en", "fr", "basic"))
            .collect();
        for key in &keys {
            cache.insert(key.clone(), "x".into()).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&keys[0]).unwrap(), None);
        assert!(cache.get(&keys[2]).unwrap().is_some());
    }

    #[test]
    fn journal_round_trips_exact_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        let key = CacheKey::new("Quote \"this\"\n", "en", "de", "premium");
        {
            let cache = TranslationCache::load(&path, 100, None).unwrap();
            cache
                .insert(key.clone(), "Zitat „dies“ \t mit Tab".into())
                .unwrap();
        }
        let reloaded = TranslationCache::load(&path, 100, None).unwrap();
        assert_eq!(
            reloaded.get(&key).unwrap().as_deref(),
            Some("Zitat „dies“ \t mit Tab")
        );
    }

    #[test]
    fn persist_and_load_in_memory_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.jsonl");
        let cache = TranslationCache::new(100);
        let key = CacheKey::new("Hello", "en", "zh-CN", "basic");
        cache.insert(key.clone(), "你好".into()).unwrap();
        cache.persist(&path).unwrap();

        let reloaded = TranslationCache::load(&path, 100, None).unwrap();
        assert_eq!(reloaded.get(&key).unwrap().as_deref(), Some("你好"));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn corrupt_journal_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        fs::write(&path, "{not json}\n").unwrap();
        let err = TranslationCache::load(&path, 10, None).err().unwrap();
        assert!(format!("{:#}", err).contains("corrupt cache journal"));
    }

    #[test]
    fn unwritable_journal_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("cache.jsonl");
        let cache = TranslationCache::load(&path, 10, None).unwrap();
        let err = cache
            .insert(CacheKey::new("Hello", "en", "fr", "basic"), "Bonjour".into())
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(cache.is_empty());
    }
}
