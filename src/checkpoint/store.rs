//! Checkpoint store for atomic saves and loads keyed by name.
//!
//! Each checkpoint lives in its own file, `<base_dir>/<prefix><name>`. The
//! base directory is made absolute when the store is created, so the same
//! name always maps to the same file regardless of the working directory.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::Checkpoint;
use crate::error::{GuardError, GuardResult};
use crate::name::CheckpointName;

/// Default prefix for checkpoint file names.
pub const DEFAULT_FILE_PREFIX: &str = ".resumable_";

/// Suffix of the temporary file used during atomic saves.
const TEMP_SUFFIX: &str = ".tmp";

/// File-backed storage for checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    /// Absolute directory holding checkpoint files.
    base_dir: PathBuf,
    /// Prefix prepended to every checkpoint name.
    prefix: String,
}

impl CheckpointStore {
    /// Create a store rooted at `base_dir` using the default file prefix.
    ///
    /// Creates the directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(base_dir: impl Into<PathBuf>) -> GuardResult<Self> {
        Self::with_prefix(base_dir, DEFAULT_FILE_PREFIX)
    }

    /// Create a store with a custom file prefix.
    ///
    /// The prefix follows the same rules as checkpoint names: it must be
    /// non-empty and may not consist only of dots.
    pub fn with_prefix(base_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> GuardResult<Self> {
        let prefix = prefix.into();
        CheckpointName::parse(&prefix).map_err(|_| GuardError::InvalidName {
            name: prefix.clone(),
            reason: "file prefix must be non-empty, not only dots, and use letters, digits, '_', '.', '-'"
                .to_string(),
        })?;

        let base_dir = base_dir.into();
        let base_dir = if base_dir.is_absolute() {
            base_dir
        } else {
            env::current_dir()
                .map_err(|e| GuardError::storage(&base_dir, e))?
                .join(base_dir)
        };

        fs::create_dir_all(&base_dir).map_err(|e| GuardError::storage(&base_dir, e))?;

        Ok(Self { base_dir, prefix })
    }

    /// Path of the checkpoint file for `name`.
    pub fn path_for(&self, name: &CheckpointName) -> PathBuf {
        self.base_dir.join(format!("{}{}", self.prefix, name))
    }

    /// Check if a checkpoint exists for `name`.
    pub fn exists(&self, name: &CheckpointName) -> bool {
        self.path_for(name).is_file()
    }

    /// Load the checkpoint stored for `name`.
    ///
    /// # Errors
    ///
    /// Returns `StorageIo` if the file cannot be read (including when it does
    /// not exist) and `CorruptCheckpoint` if its content cannot be decoded.
    pub fn load<T: DeserializeOwned>(&self, name: &CheckpointName) -> GuardResult<Checkpoint<T>> {
        self.load_if_present(name)?.ok_or_else(|| {
            GuardError::storage(
                self.path_for(name),
                io::Error::new(io::ErrorKind::NotFound, "no checkpoint stored under this name"),
            )
        })
    }

    /// Load the checkpoint stored for `name`, or `None` if there is none.
    ///
    /// Only a missing file counts as absent. Any other read failure, such as
    /// a permission error or a directory in the checkpoint's place, is
    /// returned as `StorageIo`.
    pub fn load_if_present<T: DeserializeOwned>(
        &self,
        name: &CheckpointName,
    ) -> GuardResult<Option<Checkpoint<T>>> {
        let path = self.path_for(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GuardError::storage(&path, e)),
        };
        let checkpoint: Checkpoint<T> = serde_json::from_str(&content)
            .map_err(|source| GuardError::CorruptCheckpoint {
                path: path.clone(),
                source,
            })?;

        debug!(name = %name, path = %path.display(), items = checkpoint.items.len(), "loaded checkpoint");
        Ok(Some(checkpoint))
    }

    /// Load a checkpoint without knowing its item type.
    pub fn inspect(&self, name: &CheckpointName) -> GuardResult<Checkpoint<serde_json::Value>> {
        self.load(name)
    }

    /// Save a checkpoint atomically, replacing any existing one.
    ///
    /// The encoded checkpoint is decoded again before anything is written;
    /// if the items do not come back equal (a NaN float, or a `Some(None)`
    /// that JSON flattens to `null`) nothing is written. Otherwise it goes to
    /// a temporary file first, which is then renamed over the final location.
    ///
    /// # Errors
    ///
    /// Returns `LossyCheckpoint` if the items would not read back unchanged
    /// and `StorageIo` if any file operation fails.
    pub fn save<T>(&self, name: &CheckpointName, checkpoint: &Checkpoint<T>) -> GuardResult<()>
    where
        T: Serialize + DeserializeOwned + PartialEq,
    {
        let path = self.path_for(name);
        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| GuardError::storage(&path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        verify_round_trip(&path, checkpoint, &json)?;

        let temp_path = self.temp_path_for(name);
        write_synced(&temp_path, json.as_bytes()).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            GuardError::storage(&temp_path, e)
        })?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            GuardError::storage(&path, e)
        })?;

        debug!(name = %name, path = %path.display(), items = checkpoint.items.len(), "saved checkpoint");
        Ok(())
    }

    /// Remove the checkpoint for `name`. Removing a missing checkpoint succeeds.
    pub fn delete(&self, name: &CheckpointName) -> GuardResult<()> {
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(name = %name, path = %path.display(), "deleted checkpoint");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GuardError::storage(path, e)),
        }
    }

    /// Names of all checkpoints currently stored, sorted.
    pub fn list(&self) -> GuardResult<Vec<String>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GuardError::storage(&self.base_dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GuardError::storage(&self.base_dir, e))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            if let Some(name) = file_name.strip_prefix(&self.prefix) {
                if CheckpointName::parse(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Directory holding the checkpoint files.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Prefix prepended to checkpoint names.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn temp_path_for(&self, name: &CheckpointName) -> PathBuf {
        self.base_dir
            .join(format!("{}{}{}", self.prefix, name, TEMP_SUFFIX))
    }
}

fn verify_round_trip<T>(path: &Path, checkpoint: &Checkpoint<T>, json: &str) -> GuardResult<()>
where
    T: DeserializeOwned + PartialEq,
{
    let lossy = |reason: String| GuardError::LossyCheckpoint {
        path: path.to_path_buf(),
        reason,
    };
    let reloaded: Checkpoint<T> = serde_json::from_str(json).map_err(|e| lossy(e.to_string()))?;
    if reloaded.items != checkpoint.items {
        return Err(lossy("items differ after decoding".to_string()));
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn name(s: &str) -> CheckpointName {
        CheckpointName::parse(s).unwrap()
    }

    #[test]
    fn test_new_creates_base_directory() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("nested").join("state");

        let store = CheckpointStore::new(&base).unwrap();

        assert!(base.is_dir());
        assert_eq!(store.base_dir(), base.as_path());
        assert_eq!(
            store.path_for(&name("jobs")),
            base.join(".resumable_jobs")
        );
    }

    #[test]
    fn test_relative_base_dir_is_made_absolute() {
        let store = CheckpointStore::new("target").unwrap();
        assert!(store.base_dir().is_absolute());
        assert!(store.path_for(&name("x")).is_absolute());
    }

    #[test]
    fn test_custom_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::with_prefix(temp_dir.path(), "ckpt-").unwrap();
        assert_eq!(store.prefix(), "ckpt-");
        assert_eq!(
            store.path_for(&name("jobs")),
            temp_dir.path().join("ckpt-jobs")
        );
    }

    #[test]
    fn test_prefix_with_separator_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let result = CheckpointStore::with_prefix(temp_dir.path(), "../escape");
        assert!(matches!(result, Err(GuardError::InvalidName { .. })));
    }

    #[test]
    fn test_empty_or_dot_prefix_rejected() {
        let temp_dir = TempDir::new().unwrap();
        for prefix in ["", ".", ".."] {
            let result = CheckpointStore::with_prefix(temp_dir.path(), prefix);
            assert!(
                matches!(result, Err(GuardError::InvalidName { .. })),
                "expected InvalidName for prefix {:?}",
                prefix
            );
        }
    }

    #[test]
    fn test_paths_stay_inside_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::with_prefix(temp_dir.path(), "_").unwrap();
        for n in ["a", ".a", "a..", "-"] {
            let path = store.path_for(&name(n));
            assert_eq!(path.parent(), Some(store.base_dir()));
        }
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        let checkpoint = Checkpoint::new(true, vec![2, 3, 4]);
        store.save(&name("jobs"), &checkpoint).unwrap();

        let loaded: Checkpoint<i32> = store.load(&name("jobs")).unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_load_missing_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        let result = store.load::<i32>(&name("missing"));
        assert!(matches!(result, Err(GuardError::StorageIo { .. })));
    }

    #[test]
    fn test_load_invalid_json_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        fs::write(store.path_for(&name("jobs")), "{ invalid json }").unwrap();

        let result = store.load::<i32>(&name("jobs"));
        assert!(matches!(result, Err(GuardError::CorruptCheckpoint { .. })));
    }

    #[test]
    fn test_load_wrong_item_type_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        store
            .save(&name("jobs"), &Checkpoint::new(false, vec!["a".to_string(), "b".to_string()]))
            .unwrap();

        let result = store.load::<u64>(&name("jobs"));
        assert!(matches!(result, Err(GuardError::CorruptCheckpoint { .. })));
    }

    #[test]
    fn test_delete_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        store.save(&name("jobs"), &Checkpoint::new(false, vec![1])).unwrap();
        assert!(store.exists(&name("jobs")));

        store.delete(&name("jobs")).unwrap();
        assert!(!store.exists(&name("jobs")));
    }

    #[test]
    fn test_delete_nonexistent_succeeds() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        store.delete(&name("jobs")).unwrap();
        store.delete(&name("jobs")).unwrap();
    }

    #[test]
    fn test_save_overwrites_existing() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        store
            .save(&name("jobs"), &Checkpoint::new(true, vec![1, 2, 3]))
            .unwrap();
        store
            .save(&name("jobs"), &Checkpoint::new(true, vec![3]))
            .unwrap();

        let loaded: Checkpoint<i32> = store.load(&name("jobs")).unwrap();
        assert_eq!(loaded.items, vec![3]);
    }

    #[test]
    fn test_atomic_save_cleans_up_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        store.save(&name("jobs"), &Checkpoint::new(false, vec![1])).unwrap();

        assert!(!store.temp_path_for(&name("jobs")).exists());
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path().join("gone")).unwrap();
        fs::remove_dir(store.base_dir()).unwrap();

        let result = store.save(&name("jobs"), &Checkpoint::new(false, vec![1]));
        assert!(matches!(result, Err(GuardError::StorageIo { .. })));
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();
        let target = store.path_for(&name("jobs"));
        fs::create_dir(&target).unwrap();
        fs::write(target.join("occupied"), "x").unwrap();

        let result = store.save(&name("jobs"), &Checkpoint::new(false, vec![1]));

        assert!(matches!(result, Err(GuardError::StorageIo { .. })));
        assert!(!store.temp_path_for(&name("jobs")).exists());
    }

    #[test]
    fn test_save_rejects_nan() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        let result = store.save(&name("jobs"), &Checkpoint::new(true, vec![f64::NAN, 3.0]));

        assert!(matches!(result, Err(GuardError::LossyCheckpoint { .. })));
        assert!(!store.path_for(&name("jobs")).exists());
        assert!(!store.temp_path_for(&name("jobs")).exists());
    }

    #[test]
    fn test_save_rejects_flattened_nested_option() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();
        let items: Vec<Option<Option<i32>>> = vec![Some(Some(1)), Some(None), None];

        let result = store.save(&name("jobs"), &Checkpoint::new(false, items));

        assert!(matches!(result, Err(GuardError::LossyCheckpoint { .. })));
        assert!(!store.path_for(&name("jobs")).exists());
    }

    #[test]
    fn test_save_keeps_previous_checkpoint_when_lossy() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();
        store
            .save(&name("jobs"), &Checkpoint::new(false, vec![1.5, 2.5]))
            .unwrap();

        let result = store.save(&name("jobs"), &Checkpoint::new(true, vec![f64::NAN]));

        assert!(result.is_err());
        let loaded: Checkpoint<f64> = store.load(&name("jobs")).unwrap();
        assert_eq!(loaded.items, vec![1.5, 2.5]);
    }

    #[test]
    fn test_load_if_present() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        assert!(store.load_if_present::<i32>(&name("jobs")).unwrap().is_none());

        store.save(&name("jobs"), &Checkpoint::new(true, vec![4])).unwrap();
        let loaded = store.load_if_present::<i32>(&name("jobs")).unwrap();
        assert_eq!(loaded.map(|c| c.items), Some(vec![4]));
    }

    #[test]
    fn test_load_if_present_reports_unreadable_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();
        fs::create_dir(store.path_for(&name("jobs"))).unwrap();

        let result = store.load_if_present::<i32>(&name("jobs"));
        assert!(matches!(result, Err(GuardError::StorageIo { .. })));
    }

    #[test]
    fn test_list_returns_stored_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        assert!(store.list().unwrap().is_empty());

        store.save(&name("beta"), &Checkpoint::new(false, vec![1])).unwrap();
        store.save(&name("alpha"), &Checkpoint::new(false, vec![2])).unwrap();
        fs::write(temp_dir.path().join("unrelated.txt"), "x").unwrap();
        fs::write(temp_dir.path().join(".resumable_gamma.tmp"), "x").unwrap();

        assert_eq!(store.list().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_inspect_untyped() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();

        store
            .save(&name("jobs"), &Checkpoint::new(true, vec![Some(1), None]))
            .unwrap();

        let raw = store.inspect(&name("jobs")).unwrap();
        assert!(raw.in_flight);
        assert_eq!(raw.items, vec![serde_json::json!(1), serde_json::Value::Null]);
    }
}
