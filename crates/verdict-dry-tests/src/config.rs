// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use verdict_config::{ConfigError, ConfigStore};

/// [`ConfigStore`] backed by a shared map, with call counters and injectable
/// failures.
///
/// Clones share storage, so a test can hand one clone to a
/// [`ConfigService`](verdict_config::ConfigService) and inspect the other.
///
/// ```
/// use verdict_config::ConfigService;
/// use verdict_core::EngineConfig;
/// use verdict_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// let config: EngineConfig = service.load_or_init("engine").unwrap();
///
/// assert_eq!(config, EngineConfig::default());
/// assert!(store.raw("engine").is_some());
/// ```
#[derive(Clone, Default, Debug)]
pub struct InMemoryConfigStore {
    shared: Arc<Mutex<Shared>>,
}

#[derive(Default, Debug)]
struct Shared {
    blobs: BTreeMap<String, Vec<u8>>,
    loads: usize,
    saves: usize,
    fail_load: bool,
    fail_save: bool,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `value` serialized as JSON under `key`.
    pub fn with_value<T: Serialize>(key: &str, value: &T) -> Self {
        let blob = serde_json::to_vec(value).expect("fixture value serializes");
        Self::with_entry(key, &blob)
    }

    /// Store holding raw `data` under `key`.
    pub fn with_entry(key: &str, data: &[u8]) -> Self {
        let store = Self::new();
        store.shared().blobs.insert(key.to_owned(), data.to_vec());
        store
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every later `load_raw` fail.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.shared().fail_load = fail;
    }

    /// Make every later `save_raw` fail.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.shared().fail_save = fail;
    }

    /// `load_raw` calls so far, failed ones included.
    pub fn load_count(&self) -> usize {
        self.shared().loads
    }

    /// `save_raw` calls so far, failed ones included.
    pub fn save_count(&self) -> usize {
        self.shared().saves
    }

    /// Raw blob under `key`.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.shared().blobs.get(key).cloned()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut shared = self.shared();
        shared.loads += 1;
        if shared.fail_load {
            return Err(ConfigError::Other(format!("simulated load failure for {key}")));
        }
        shared.blobs.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut shared = self.shared();
        shared.saves += 1;
        if shared.fail_save {
            return Err(ConfigError::Other(format!("simulated save failure for {key}")));
        }
        shared.blobs.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}
