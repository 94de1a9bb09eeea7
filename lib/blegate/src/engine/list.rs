// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The runtime address lists.
//!
//! The gateway keeps two of these: the trust list of external devices
//! allowed to originate traffic toward the mesh, and the mesh list of
//! devices reachable over the side channel. Each list lives behind its
//! own short lock and is scanned, never mutated, on the packet path.

use crate::api::AddressEntry;
use crate::api::GatewayError;
use crate::api::Ipv6Addr;
use crate::api::ListRole;
use crate::sync::ShortMutex;

/// An ordered set of address entries for one list role.
///
/// Insertion order is newest-first and duplicates are rejected.
/// `Vec`-backed; lists hold tens of entries and membership checks are
/// linear scans.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressList {
    role: ListRole,
    entries: Vec<AddressEntry>,
}

impl AddressList {
    pub fn new(role: ListRole) -> Self {
        Self { role, entries: Vec::new() }
    }

    pub fn role(&self) -> ListRole {
        self.role
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if the list holds exactly `entry`, scope included.
    pub fn contains(&self, entry: &AddressEntry) -> bool {
        self.entries.iter().any(|e| e == entry)
    }

    /// True if any entry carries `addr`, regardless of scope. This is
    /// the comparison the packet path uses.
    pub fn contains_addr(&self, addr: &Ipv6Addr) -> bool {
        self.entries.iter().any(|e| e.addr == *addr)
    }

    /// Add `entry` at the head of the list.
    pub fn insert(&mut self, entry: AddressEntry) -> Result<(), GatewayError> {
        if self.contains(&entry) {
            return Err(GatewayError::DuplicateEntry(entry.to_string()));
        }
        self.entries.insert(0, entry);
        Ok(())
    }

    /// Remove the entry equal to `entry`.
    pub fn remove(&mut self, entry: &AddressEntry) -> Result<(), GatewayError> {
        match self.entries.iter().position(|e| e == entry) {
            Some(idx) => {
                self.entries.remove(idx);
                Ok(())
            }
            None => Err(GatewayError::EntryNotFound(entry.to_string())),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddressEntry> {
        self.entries.iter()
    }

    /// The list in its stored form: one textual record per entry, in
    /// list order.
    pub fn to_string_records(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// Rebuild a list from stored records. Any unparseable or
    /// duplicate record fails the whole load; partial loads are not
    /// tolerated.
    pub fn from_string_records(
        role: ListRole,
        records: &[String],
    ) -> Result<Self, GatewayError> {
        let mut list = Self::new(role);
        for rec in records {
            let entry =
                rec.parse::<AddressEntry>().map_err(GatewayError::BadAddr)?;
            if list.contains(&entry) {
                return Err(GatewayError::DuplicateEntry(rec.clone()));
            }
            list.entries.push(entry);
        }
        Ok(list)
    }
}

struct ListState {
    list: AddressList,
    dirty: bool,
}

/// An [`AddressList`] shared between the admin surface, the packet
/// path, and the flush worker.
///
/// The list and its dirty flag live under one [`ShortMutex`] so that
/// a mutation and the flag recording it are a single atomic step: the
/// flusher can never observe a changed list with a clean flag. The
/// flag is cleared only when a flush takes its snapshot, and the
/// flusher re-sets it if the save fails, so unsaved changes are
/// never reported clean.
pub struct SharedList {
    state: ShortMutex<ListState>,
}

impl SharedList {
    pub fn new(list: AddressList) -> Self {
        Self { state: ShortMutex::new(ListState { list, dirty: false }) }
    }

    pub fn role(&self) -> ListRole {
        self.state.lock().list.role()
    }

    pub fn len(&self) -> usize {
        self.state.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().list.is_empty()
    }

    pub fn contains(&self, entry: &AddressEntry) -> bool {
        self.state.lock().list.contains(entry)
    }

    pub fn contains_addr(&self, addr: &Ipv6Addr) -> bool {
        self.state.lock().list.contains_addr(addr)
    }

    /// Insert `entry` and mark the list dirty.
    pub fn add(&self, entry: AddressEntry) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.list.insert(entry)?;
        state.dirty = true;
        Ok(())
    }

    /// Remove `entry` and mark the list dirty. Returns true when the
    /// removal left the list empty.
    pub fn remove(&self, entry: &AddressEntry) -> Result<bool, GatewayError> {
        let mut state = self.state.lock();
        state.list.remove(entry)?;
        state.dirty = true;
        Ok(state.list.is_empty())
    }

    /// Drop every entry. The stored copy is the caller's problem.
    pub fn clear(&self) {
        self.state.lock().list.clear();
    }

    pub fn snapshot_records(&self) -> Vec<String> {
        self.state.lock().list.to_string_records()
    }

    pub fn snapshot_addrs(&self) -> Vec<Ipv6Addr> {
        self.state.lock().list.iter().map(|e| e.addr).collect()
    }

    /// Report whether the list has unsaved changes, clearing the flag
    /// in the same step.
    pub fn take_dirty_and_clear(&self) -> bool {
        let mut state = self.state.lock();
        let was_dirty = state.dirty;
        state.dirty = false;
        was_dirty
    }

    /// The flusher's entry point: if the list is dirty, clear the
    /// flag and snapshot the records under one hold of the lock, so
    /// no mutation can slip between the two.
    pub fn take_dirty_snapshot(&self) -> Option<Vec<String>> {
        let mut state = self.state.lock();
        if !state.dirty {
            return None;
        }
        state.dirty = false;
        Some(state.list.to_string_records())
    }

    /// Re-flag unsaved changes, used when a save attempt fails.
    pub fn mark_dirty(&self) {
        self.state.lock().dirty = true;
    }
}
