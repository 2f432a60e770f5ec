use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

pub const FIT_RESULT: &str = "fit_result";
pub const BOOTSTRAP_RESULT: &str = "bootstrap_result";
pub const MCMC_RESULT: &str = "mcmc_result";
pub const CONFIG: &str = "config";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
}

/// A single-file key-value container for fit results.
///
/// The file holds a `bincode`-encoded map from key to an encoded payload. Each
/// [`OutputStore::update`] reads the existing map, replaces one key and writes the whole map to a
/// temporary file in the same directory which then atomically replaces the original, so a
/// failed update leaves the previous file untouched. Updates through one store are serialized.
#[derive(Debug)]
pub struct OutputStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OutputStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        match File::open(&self.path) {
            Ok(file) => Ok(bincode::deserialize_from(BufReader::new(file))?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, Vec<u8>>) -> Result<(), StoreError> {
        let encoded = bincode::serialize(map)?;
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = NamedTempFile::new_in(directory)?;
        staged.write_all(&encoded)?;
        staged.as_file().sync_all()?;
        staged.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Stored keys in sorted order. A missing file has no keys.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.read_map()?.into_keys().collect())
    }

    /// Reads and decodes the value under `key`, or `None` if the key (or the file) is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let _guard = self.lock.lock();
        self.read_map()?
            .get(key)
            .map(|bytes| bincode::deserialize(bytes))
            .transpose()
            .map_err(StoreError::from)
    }

    /// Stores `value` under `key`, keeping every other key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the value cannot be encoded or the file cannot be read or
    /// replaced. The file on disk is unchanged in either case.
    pub fn update<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let payload = bincode::serialize(value)?;
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        map.insert(key.to_string(), payload);
        self.write_map(&map)?;
        debug!("Stored {key:?} in {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde::Serializer;
    use tempfile::tempdir;

    struct Unserializable;
    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("refusing to serialize"))
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path().join("fit.zlmfit"));
        assert!(store.keys().unwrap().is_empty());
        assert_eq!(store.get::<u32>(FIT_RESULT).unwrap(), None);
    }

    #[test]
    fn updates_accumulate() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path().join("fit.zlmfit"));
        store.update(FIT_RESULT, &vec![1.0, 2.0]).unwrap();
        store.update(BOOTSTRAP_RESULT, &"resamples").unwrap();
        assert_eq!(store.keys().unwrap(), [BOOTSTRAP_RESULT, FIT_RESULT]);
        assert_eq!(
            store.get::<Vec<f64>>(FIT_RESULT).unwrap(),
            Some(vec![1.0, 2.0])
        );
        assert_eq!(
            store.get::<String>(BOOTSTRAP_RESULT).unwrap().as_deref(),
            Some("resamples")
        );
        store.update(FIT_RESULT, &vec![3.0]).unwrap();
        assert_eq!(store.get::<Vec<f64>>(FIT_RESULT).unwrap(), Some(vec![3.0]));
        assert_eq!(store.keys().unwrap().len(), 2);
    }

    #[test]
    fn failed_update_keeps_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fit.zlmfit");
        let store = OutputStore::new(&path);
        store.update(FIT_RESULT, &42u32).unwrap();
        let before = std::fs::read(&path).unwrap();
        assert!(matches!(
            store.update(MCMC_RESULT, &Unserializable),
            Err(StoreError::Encoding(_))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(store.get::<u32>(FIT_RESULT).unwrap(), Some(42));
    }

    #[test]
    fn corrupt_file_is_reported_and_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fit.zlmfit");
        std::fs::write(&path, [0xff; 3]).unwrap();
        let store = OutputStore::new(&path);
        assert!(store.update(FIT_RESULT, &1u8).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), [0xff; 3]);
    }

    #[test]
    fn no_temporary_files_are_left_behind() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path().join("fit.zlmfit"));
        store.update(FIT_RESULT, &1u8).unwrap();
        store.update(CONFIG, &2u8).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
