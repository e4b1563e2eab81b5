//! Append-only on-disk script history.
//!
//! Layout under the root directory:
//!
//! ```text
//! <id>/
//!     20261019T101500.123456Z.src        raw script text
//!     20261019T101500.123456Z.meta.json  id, timestamp, version, valid, notes
//! ```
//!
//! File stems sort lexicographically in save order. Concurrent writers to
//! the same id are not coordinated here.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::HistoryError;
use crate::model::{ScriptVersionRecord, Version};

const CONTENT_EXT: &str = "src";
const META_EXT: &str = "meta.json";
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Deterministic id of a script: leading 16 hex digits of its SHA-256.
pub fn content_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Whether `id` has the shape [`content_id`] produces. Anything else could
/// name a path outside the history root.
fn is_content_id(id: &str) -> bool {
    id.len() == 16 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Naive positional line diff.
///
/// Lines are compared by index only: where they differ the old line is
/// reported as `- old` and the new one as `+ new`. This is not a minimal
/// edit script.
pub fn compare_versions(old: &str, new: &str) -> Vec<String> {
    let old: Vec<&str> = old.lines().collect();
    let new: Vec<&str> = new.lines().collect();
    let mut out = Vec::new();
    for i in 0..old.len().max(new.len()) {
        let (before, after) = (old.get(i), new.get(i));
        if before == after {
            continue;
        }
        if let Some(line) = before {
            out.push(format!("- {line}"));
        }
        if let Some(line) = after {
            out.push(format!("+ {line}"));
        }
    }
    out
}

/// Metadata half of a stored entry; the content lives in the `.src` file.
#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    id: String,
    timestamp: DateTime<Utc>,
    version: Version,
    valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

pub struct History {
    root: PathBuf,
    cache: Mutex<HashMap<String, Vec<ScriptVersionRecord>>>,
}

impl History {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> HistoryError + '_ {
        move |source| HistoryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Append a snapshot of `content` and return the stored record.
    pub fn append(
        &self,
        content: &str,
        version: Version,
        valid: bool,
        notes: Option<String>,
    ) -> Result<ScriptVersionRecord, HistoryError> {
        let id = content_id(content);
        let dir = self.root.join(&id);
        fs::create_dir_all(&dir).map_err(Self::io_err(&dir))?;

        // one entry per microsecond; bump until the name is free
        let mut timestamp = Utc::now().trunc_subsecs(6);
        let mut stem = timestamp.format(STAMP_FORMAT).to_string();
        while dir.join(format!("{stem}.{META_EXT}")).exists() || dir.join(format!("{stem}.{CONTENT_EXT}")).exists() {
            timestamp += chrono::Duration::microseconds(1);
            stem = timestamp.format(STAMP_FORMAT).to_string();
        }

        let record = ScriptVersionRecord {
            id: id.clone(),
            timestamp,
            content: content.to_string(),
            version,
            valid,
            notes,
        };

        // content first: an entry only counts once its metadata exists
        let src_path = dir.join(format!("{stem}.{CONTENT_EXT}"));
        fs::write(&src_path, content).map_err(Self::io_err(&src_path))?;

        let meta = Meta {
            id: id.clone(),
            timestamp,
            version,
            valid,
            notes: record.notes.clone(),
        };
        let meta_path = dir.join(format!("{stem}.{META_EXT}"));
        let json = serde_json::to_string_pretty(&meta).map_err(|source| HistoryError::Json {
            path: meta_path.clone(),
            source,
        })?;
        fs::write(&meta_path, json).map_err(Self::io_err(&meta_path))?;

        if let Some(entries) = self.cache.lock().get_mut(&id) {
            entries.push(record.clone());
        }
        debug!(%id, %stem, "history entry written");
        Ok(record)
    }

    /// Every stored entry for `id`, oldest first.
    pub fn entries(&self, id: &str) -> Result<Vec<ScriptVersionRecord>, HistoryError> {
        if !is_content_id(id) {
            return Err(HistoryError::NotFound(id.to_string()));
        }
        if let Some(cached) = self.cache.lock().get(id) {
            return Ok(cached.clone());
        }
        let entries = self.load(id)?;
        self.cache.lock().insert(id.to_string(), entries.clone());
        Ok(entries)
    }

    /// Entry `index` of `id`, or the latest one.
    pub fn entry(&self, id: &str, index: Option<usize>) -> Result<ScriptVersionRecord, HistoryError> {
        let entries = self.entries(id)?;
        let len = entries.len();
        let index = index.unwrap_or(len.saturating_sub(1));
        entries
            .into_iter()
            .nth(index)
            .ok_or_else(|| HistoryError::NoSuchVersion {
                id: id.to_string(),
                index,
                len,
            })
    }

    /// Positional diff between two stored entries of `id`.
    pub fn diff(&self, id: &str, a: usize, b: usize) -> Result<Vec<String>, HistoryError> {
        let old = self.entry(id, Some(a))?;
        let new = self.entry(id, Some(b))?;
        Ok(compare_versions(&old.content, &new.content))
    }

    fn load(&self, id: &str) -> Result<Vec<ScriptVersionRecord>, HistoryError> {
        let dir = self.root.join(id);
        if !dir.is_dir() {
            return Err(HistoryError::NotFound(id.to_string()));
        }

        let mut stems: Vec<String> = fs::read_dir(&dir)
            .map_err(Self::io_err(&dir))?
            .filter_map(|entry| {
                let name = entry.ok()?.file_name().into_string().ok()?;
                name.strip_suffix(&format!(".{META_EXT}")).map(str::to_string)
            })
            .collect();
        stems.sort();

        let mut records = Vec::with_capacity(stems.len());
        for stem in stems {
            let meta_path = dir.join(format!("{stem}.{META_EXT}"));
            let raw = fs::read_to_string(&meta_path).map_err(Self::io_err(&meta_path))?;
            let meta: Meta = serde_json::from_str(&raw).map_err(|source| HistoryError::Json {
                path: meta_path.clone(),
                source,
            })?;

            let src_path = dir.join(format!("{stem}.{CONTENT_EXT}"));
            let content = fs::read_to_string(&src_path).map_err(Self::io_err(&src_path))?;

            records.push(ScriptVersionRecord {
                id: meta.id,
                timestamp: meta.timestamp,
                content,
                version: meta.version,
                valid: meta.valid,
                notes: meta.notes,
            });
        }
        debug!(%id, entries = records.len(), "history loaded");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_content_id() {
        let id = content_id("a");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, content_id("a"));
        assert_ne!(id, content_id("b"));
        // sha256("abc") = ba7816bf8f01cfea…
        assert_eq!(content_id("abc"), "ba7816bf8f01cfea");
    }

    #[test]
    fn test_compare_versions() {
        let test_cases = vec![
            ("a\nb\nc", "a\nX\nc", vec!["- b", "+ X"]),
            ("a\nb", "a\nb", vec![]),
            ("a", "a\nb", vec!["+ b"]),
            ("a\nb", "b", vec!["- a", "+ b", "- b"]),
        ];
        for (old, new, expected) in test_cases {
            assert_eq!(compare_versions(old, new), expected, "{old:?} -> {new:?}");
        }
    }

    #[test]
    fn test_append_and_reload() {
        let dir = TempDir::new().unwrap();
        let history = History::new(dir.path());

        let first = history.append("x = 1", Version::V5, true, None).unwrap();
        let second = history
            .append("x = 1", Version::V5, false, Some("second".to_string()))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.timestamp > first.timestamp);

        // a fresh store sees the same files
        let reopened = History::new(dir.path());
        let entries = reopened.entries(&first.id).unwrap();
        assert_eq!(entries, vec![first.clone(), second.clone()]);
        assert_eq!(reopened.entry(&first.id, None).unwrap(), second);
        assert_eq!(reopened.entry(&first.id, Some(0)).unwrap(), first);

        let files = fs::read_dir(dir.path().join(&first.id)).unwrap().count();
        assert_eq!(files, 4);
    }

    #[test]
    fn test_cache_follows_appends() {
        let dir = TempDir::new().unwrap();
        let history = History::new(dir.path());
        let record = history.append("y = 2", Version::V6, true, None).unwrap();
        assert_eq!(history.entries(&record.id).unwrap().len(), 1);
        history.append("y = 2", Version::V6, true, None).unwrap();
        assert_eq!(history.entries(&record.id).unwrap().len(), 2);
    }

    #[test]
    fn test_rejects_ids_that_are_not_content_ids() {
        let dir = TempDir::new().unwrap();
        let history = History::new(dir.path().join("history"));
        std::fs::create_dir_all(dir.path().join("history").join("..").join("elsewhere")).unwrap();

        let test_cases = vec!["..", "../elsewhere", "../..", "BA7816BF8F01CFEA", "ba7816bf8f01cfe", "ba7816bf8f01cfea/..", ""];
        for id in test_cases {
            assert!(
                matches!(history.entries(id), Err(HistoryError::NotFound(_))),
                "id {id:?}"
            );
        }
        assert!(is_content_id(&content_id("abc")));
    }

    #[test]
    fn test_missing_entries() {
        let dir = TempDir::new().unwrap();
        let history = History::new(dir.path());
        assert!(matches!(history.entries("deadbeefdeadbeef"), Err(HistoryError::NotFound(_))));

        let record = history.append("z", Version::V4, true, None).unwrap();
        let err = history.entry(&record.id, Some(3)).unwrap_err();
        assert!(matches!(err, HistoryError::NoSuchVersion { index: 3, len: 1, .. }));
    }
}
