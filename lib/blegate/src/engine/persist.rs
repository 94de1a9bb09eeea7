// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! List persistence.
//!
//! Each address list is stored as a multi-valued string record under
//! a well-known key, one textual address per value. The absence of a
//! key is the canonical empty form: an empty list is never written
//! out, it is expressed by deleting the key.

use crate::api::ListRole;
use crate::engine::list::AddressList;
use crate::sync::ShortMutex;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use thiserror::Error;

/// A failure in the backing store itself.
#[derive(Clone, Debug, Error)]
#[error("store access failed: {0}")]
pub struct StoreError(pub String);

/// A failure to turn stored state back into a runtime list.
#[derive(Clone, Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("bad stored record: {0}")]
    Parse(String),
}

/// Where the address lists persist across restarts.
///
/// Implementations sit over whatever the platform offers (a registry
/// hive, a flat file, an SMF property group). All methods are called
/// from the control path and the flush worker, never from the packet
/// path, so they may block.
pub trait ListStore: Send + Sync {
    /// Fetch the values stored under `key`, or `None` if the key does
    /// not exist.
    fn get_multi(&self, key: &str) -> Result<Option<Vec<String>>, StoreError>;

    /// Replace the values stored under `key`, creating it if needed.
    fn set_multi(
        &self,
        key: &str,
        values: &[String],
    ) -> Result<(), StoreError>;

    /// Remove `key` entirely. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Load the stored list for `role`. A missing key yields an empty
/// list; a present but unparseable one is an error, which the caller
/// decides how to tolerate.
pub fn load_list(
    store: &dyn ListStore,
    role: ListRole,
) -> Result<AddressList, LoadError> {
    let records = match store.get_multi(role.store_key())? {
        Some(recs) => recs,
        None => return Ok(AddressList::new(role)),
    };
    AddressList::from_string_records(role, &records)
        .map_err(|e| LoadError::Parse(format!("{e:?}")))
}

/// Write `records` out for `role`. Writing an empty record set is a
/// no-op; see the module comment.
pub fn save_records(
    store: &dyn ListStore,
    role: ListRole,
    records: &[String],
) -> Result<(), StoreError> {
    if records.is_empty() {
        return Ok(());
    }
    store.set_multi(role.store_key(), records)
}

/// Drop the stored form of `role`'s list.
pub fn purge_stored(
    store: &dyn ListStore,
    role: ListRole,
) -> Result<(), StoreError> {
    store.delete(role.store_key())
}

/// A [`ListStore`] backed by a map. The reference store for tests and
/// simulations; write failures can be injected to exercise the flush
/// retry path.
pub struct MemStore {
    map: ShortMutex<BTreeMap<String, Vec<String>>>,
    fail_writes: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, `set_multi` and `delete` fail until cleared.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self {
            map: ShortMutex::new(BTreeMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }
}

impl ListStore for MemStore {
    fn get_multi(&self, key: &str) -> Result<Option<Vec<String>>, StoreError> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn set_multi(
        &self,
        key: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.map.lock().insert(key.to_string(), values.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.map.lock().remove(key);
        Ok(())
    }
}
