//! CV store.
//!
//! Loads one free-text CV document per source from the CV directory.
//! File names follow a template such as `{source_id}_native.md`.

use crate::error::LoadError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// In-memory map of source id to CV text.
#[derive(Debug, Clone, Default)]
pub struct CvStore {
    documents: BTreeMap<String, String>,
    /// CV files that exist but could not be read, with the read error.
    unreadable: BTreeMap<String, String>,
}

impl CvStore {
    /// Load every CV in `dir` whose file name matches `template`.
    ///
    /// A missing directory yields an empty store; the sources found in the
    /// daily files then surface as missing-CV faults. A CV file that cannot
    /// be read is kept as that source's fault and loading continues.
    pub fn load(dir: &Path, template: &str) -> Result<Self, LoadError> {
        let mut store = Self::default();

        if !dir.exists() {
            warn!("CV directory does not exist: {}", dir.display());
            return Ok(store);
        }

        let (prefix, suffix) = split_template(template);

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| LoadError::CvDir {
                path: dir.to_path_buf(),
                detail: e.to_string(),
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            let Some(source_id) = source_id_from_name(&name, prefix, suffix) else {
                debug!("Skipping non-CV file: {}", name);
                continue;
            };

            let path: PathBuf = entry.path().to_path_buf();
            match fs::read_to_string(&path) {
                Ok(text) => {
                    debug!("Loaded CV for source {} ({} bytes)", source_id, text.len());
                    store.documents.insert(source_id, text);
                }
                Err(e) => {
                    warn!("Cannot read CV {}: {}", path.display(), e);
                    store
                        .unreadable
                        .insert(source_id, format!("failed to read {}: {}", path.display(), e));
                }
            }
        }

        Ok(store)
    }

    /// Build a store from in-memory documents.
    #[cfg(test)]
    pub fn from_documents<I, K, V>(docs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            documents: docs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            unreadable: BTreeMap::new(),
        }
    }

    pub fn get(&self, source_id: &str) -> Option<&str> {
        self.documents.get(source_id).map(String::as_str)
    }

    /// Why the CV for `source_id` exists but could not be read.
    pub fn read_error(&self, source_id: &str) -> Option<&str> {
        self.unreadable.get(source_id).map(String::as_str)
    }

    /// Source ids with a CV file, readable or not, in ascending order.
    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.documents
            .keys()
            .chain(self.unreadable.keys())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.unreadable.is_empty()
    }
}

/// Split `{source_id}_native.md` into (`""`, `"_native.md"`).
fn split_template(template: &str) -> (&str, &str) {
    match template.split_once("{source_id}") {
        Some((prefix, suffix)) => (prefix, suffix),
        None => ("", template),
    }
}

fn source_id_from_name(name: &str, prefix: &str, suffix: &str) -> Option<String> {
    let id = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_matches_template() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("195385_native.md"), "# Settlement").unwrap();
        fs::write(temp_dir.path().join("220504_native.md"), "# Payments").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignore me").unwrap();

        let store = CvStore::load(temp_dir.path(), "{source_id}_native.md").unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("195385"), Some("# Settlement"));
        let ids: Vec<_> = store.source_ids().collect();
        assert_eq!(ids, vec!["195385", "220504"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = CvStore::load(&temp_dir.path().join("nope"), "{source_id}_native.md").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_unreadable_cv_does_not_stop_loading() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("1_native.md"), "# Good").unwrap();
        fs::write(temp_dir.path().join("2_native.md"), [0xff, 0xfe, 0x00]).unwrap();

        let store = CvStore::load(temp_dir.path(), "{source_id}_native.md").unwrap();

        assert_eq!(store.get("1"), Some("# Good"));
        assert_eq!(store.get("2"), None);
        assert!(store.read_error("2").unwrap().contains("2_native.md"));
        assert_eq!(store.read_error("1"), None);
        let ids: Vec<_> = store.source_ids().collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_source_id_from_name() {
        assert_eq!(
            source_id_from_name("cv_12.txt", "cv_", ".txt"),
            Some("12".to_string())
        );
        assert_eq!(source_id_from_name("_native.md", "", "_native.md"), None);
        assert_eq!(source_id_from_name("12.md", "", "_native.md"), None);
    }
}
