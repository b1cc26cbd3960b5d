use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::result;
use std::sync::Mutex;

use fs2::FileExt;
use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use super::StoreError;
use crate::comment::Comment;
use crate::publish::Publication;
use crate::user::UserRecord;

/// One named top-level JSON mapping persisted to one file.
///
/// The whole collection is loaded into memory on every operation, mutated,
/// and rewritten back - whole-file document store semantics, no partial or
/// streaming access. The mutex serializes in-process read-modify-write
/// cycles; cross-process exclusion is advisory only (see
/// [`Store::cross_process_safe`]).
pub struct Collection<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned,
{
    fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(name),
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Load the full mapping. A missing file or unparseable content yields
    /// an empty mapping - reads never fail to the caller.
    pub fn load(&self) -> HashMap<String, T> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.load_unlocked()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.load().remove(key)
    }

    /// Serialize the full mapping and atomically replace the file.
    /// On failure the previous file content is untouched.
    pub fn save(&self, mapping: &HashMap<String, T>) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.save_unlocked(mapping)
    }

    /// One read-modify-write cycle under the collection lock.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, T>) -> R,
    ) -> Result<R, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut mapping = self.load_unlocked();
        let result = f(&mut mapping);
        self.save_unlocked(&mapping)?;

        Ok(result)
    }

    /// Like [`update`](Self::update), but nothing is written back when the
    /// closure rejects the modification.
    pub fn try_update<R, E>(
        &self,
        f: impl FnOnce(&mut HashMap<String, T>) -> result::Result<R, E>,
    ) -> Result<result::Result<R, E>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut mapping = self.load_unlocked();
        match f(&mut mapping) {
            Ok(r) => {
                self.save_unlocked(&mapping)?;
                Ok(Ok(r))
            }
            Err(e) => Ok(Err(e)),
        }
    }

    fn load_unlocked(&self) -> HashMap<String, T> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!("open {:?}: {e}, treating as empty", self.path);
                return HashMap::new();
            }
        };

        // Advisory shared lock against concurrent writers in other
        // processes; skipped where unsupported.
        let _ = file.lock_shared();

        let loaded = serde_json::from_reader(&file);
        let _ = file.unlock();

        match loaded {
            Ok(mapping) => mapping,
            Err(e) => {
                warn!("unparseable {:?}: {e}, treating as empty", self.path);
                HashMap::new()
            }
        }
    }

    fn save_unlocked(&self, mapping: &HashMap<String, T>) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        // Write to a temp file in the same directory, then rename over the
        // destination, so readers never observe a half-written file.
        let tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&tmp, mapping)?;

        tmp.persist(&self.path).map_err(|e| {
            error!("replace {:?}: {}", self.path, e.error);
            StoreError::Io(e.error)
        })?;

        Ok(())
    }
}

/// The document store: comments, users and publishes collections under one
/// data directory, injected at construction.
pub struct Store {
    pub comments: Collection<Vec<Comment>>,
    pub users: Collection<UserRecord>,
    pub publishes: Collection<Publication>,
    cross_process_safe: bool,
}

impl Store {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            comments: Collection::new(data_dir, "comments.json"),
            users: Collection::new(data_dir, "users.json"),
            publishes: Collection::new(data_dir, "publishes.json"),
            cross_process_safe: probe_file_locking(data_dir),
        }
    }

    /// Whether advisory file locking works on the data directory. When
    /// false, concurrent processes can race on write; within one process
    /// the collection mutexes still serialize all cycles.
    pub fn cross_process_safe(&self) -> bool {
        self.cross_process_safe
    }
}

fn probe_file_locking(dir: &Path) -> bool {
    if let Err(e) = fs::create_dir_all(dir) {
        warn!("create {dir:?}: {e}");
        return false;
    }

    let probe = dir.join(".lock");
    let file = match OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&probe)
    {
        Ok(f) => f,
        Err(e) => {
            warn!("open lock probe {probe:?}: {e}");
            return false;
        }
    };

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.unlock();
            true
        }
        Err(e) => {
            warn!("file locking unsupported on {dir:?}: {e}");
            false
        }
    }
}
