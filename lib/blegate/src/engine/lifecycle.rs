// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Classifier registration lifecycle.
//!
//! The engine hooks the host's packet stream only while there is
//! traffic the hooks could redirect. On a gateway that means both
//! address lists are occupied; with either list empty the hooks come
//! down. A node hooks the stream unconditionally at startup, no lists
//! involved. This module owns that state and the transitions between
//! its two halves.

use crate::api::Direction;
use crate::api::Ipv6Addr;
use crate::api::NodeRole;
use crate::sync::ShortMutex;
use slog::Logger;
use std::fmt;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use thiserror::Error;

/// Identifies one installed classifier with its provider.
pub type ClassifierId = u64;

/// Identifies one installed match filter with its provider.
pub type FilterId = u64;

/// The registration states.
///
/// ```text
///                     occupancy gained /
///                     node startup
///     Unregistered ----------------------> Registered
///          ^                                   |
///          |        occupancy lost /           |
///          |        shutdown                   |
///          +-----------------------------------+
/// ```
///
/// Occupancy means both lists hold at least one entry. Registration
/// is all or nothing: a partial install is rolled back and the state
/// stays `Unregistered`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegState {
    Unregistered,
    Registered,
}

impl Display for RegState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RegState::Unregistered => "unregistered",
            RegState::Registered => "registered",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, Error)]
pub enum RegistrationError {
    #[error("classifier install failed ({dir}): {reason}")]
    Classifier { dir: Direction, reason: String },

    #[error("match filter install failed ({dir} {addr}): {reason}")]
    Filter { dir: Direction, addr: Ipv6Addr, reason: String },
}

/// The platform's classifier hook point.
///
/// `install_classifier` attaches a packet inspection point for one
/// direction of traffic; `add_match_filter` narrows which packets
/// reach it. For an inbound filter the address keys the remote
/// source; for an outbound filter it keys the destination. The
/// unspecified address (`::`) matches everything.
///
/// Removal is best-effort. A provider that cannot remove something
/// should log it and move on; the engine does not retry.
pub trait ClassifierProvider: Send + Sync {
    fn install_classifier(
        &self,
        dir: Direction,
    ) -> Result<ClassifierId, RegistrationError>;

    fn add_match_filter(
        &self,
        dir: Direction,
        addr: Ipv6Addr,
    ) -> Result<FilterId, RegistrationError>;

    fn remove_match_filter(&self, id: FilterId);

    fn uninstall_classifier(&self, id: ClassifierId);
}

/// Tracks what is installed with the provider and moves between
/// [`RegState`]s as list occupancy changes.
pub struct FilterLifecycle {
    role: NodeRole,
    provider: Arc<dyn ClassifierProvider>,
    state: RegState,
    classifiers: Vec<ClassifierId>,
    filters: Vec<FilterId>,
    log: Logger,
}

impl FilterLifecycle {
    pub fn new(
        role: NodeRole,
        provider: Arc<dyn ClassifierProvider>,
        log: Logger,
    ) -> Self {
        Self {
            role,
            provider,
            state: RegState::Unregistered,
            classifiers: Vec::new(),
            filters: Vec::new(),
            log,
        }
    }

    pub fn state(&self) -> RegState {
        self.state
    }

    /// Bring the lifecycle up when the engine starts.
    ///
    /// A node registers its catch-all outbound hook here and never
    /// touches it again until shutdown. A gateway defers to the usual
    /// occupancy rule, so starting with a missing or empty list means
    /// starting unregistered.
    pub fn startup(
        &mut self,
        trust: &[Ipv6Addr],
        mesh: &[Ipv6Addr],
    ) -> Result<(), RegistrationError> {
        match self.role {
            NodeRole::Node => self.register(&[], &[]),
            NodeRole::Gateway => self.reevaluate(trust, mesh),
        }
    }

    /// Recompute the desired state after a list mutation and move to
    /// it.
    ///
    /// # States
    ///
    /// - `Unregistered` and occupied: register.
    /// - `Registered` and occupied: re-register, so the installed
    ///   match filters track the current entries.
    /// - `Registered` and not occupied: unregister.
    /// - Otherwise: nothing to do.
    ///
    /// On a node this is a no-op; node hooks are not entry-derived.
    pub fn reevaluate(
        &mut self,
        trust: &[Ipv6Addr],
        mesh: &[Ipv6Addr],
    ) -> Result<(), RegistrationError> {
        if self.role == NodeRole::Node {
            return Ok(());
        }

        let occupied = !trust.is_empty() && !mesh.is_empty();
        match (self.state, occupied) {
            (RegState::Unregistered, true) => self.register(trust, mesh),
            (RegState::Registered, true) => {
                self.unregister();
                self.register(trust, mesh)
            }
            (RegState::Registered, false) => {
                self.unregister();
                Ok(())
            }
            (RegState::Unregistered, false) => Ok(()),
        }
    }

    /// Install the full classifier plan for this role. Any failure
    /// rolls back everything installed so far and leaves the state
    /// `Unregistered`.
    fn register(
        &mut self,
        trust: &[Ipv6Addr],
        mesh: &[Ipv6Addr],
    ) -> Result<(), RegistrationError> {
        debug_assert_eq!(self.state, RegState::Unregistered);

        let mut classifiers = Vec::new();
        let mut filters = Vec::new();

        match self.install_plan(trust, mesh, &mut classifiers, &mut filters)
        {
            Ok(()) => {
                info!(
                    self.log, "classifiers registered";
                    "classifiers" => classifiers.len(),
                    "filters" => filters.len(),
                );
                self.classifiers = classifiers;
                self.filters = filters;
                self.state = RegState::Registered;
                Ok(())
            }
            Err(e) => {
                for id in filters {
                    self.provider.remove_match_filter(id);
                }
                for id in classifiers {
                    self.provider.uninstall_classifier(id);
                }
                warn!(
                    self.log, "registration failed, rolled back";
                    "error" => %e,
                );
                Err(e)
            }
        }
    }

    fn install_plan(
        &self,
        trust: &[Ipv6Addr],
        mesh: &[Ipv6Addr],
        classifiers: &mut Vec<ClassifierId>,
        filters: &mut Vec<FilterId>,
    ) -> Result<(), RegistrationError> {
        match self.role {
            // A node redirects everything it originates; one hook,
            // one catch-all filter.
            NodeRole::Node => {
                classifiers
                    .push(self.provider.install_classifier(Direction::Out)?);
                filters.push(
                    self.provider
                        .add_match_filter(Direction::Out, Ipv6Addr::ANY_ADDR)?,
                );
            }
            // A gateway inspects both directions, narrowed to the
            // listed devices: inbound traffic from each trusted
            // external source, outbound traffic to each mesh
            // destination.
            NodeRole::Gateway => {
                classifiers
                    .push(self.provider.install_classifier(Direction::In)?);
                classifiers
                    .push(self.provider.install_classifier(Direction::Out)?);
                for addr in trust {
                    filters.push(
                        self.provider
                            .add_match_filter(Direction::In, *addr)?,
                    );
                }
                for addr in mesh {
                    filters.push(
                        self.provider
                            .add_match_filter(Direction::Out, *addr)?,
                    );
                }
            }
        }
        Ok(())
    }

    /// Tear down everything installed. Safe to call in any state.
    pub fn unregister(&mut self) {
        if self.state == RegState::Unregistered {
            return;
        }
        for id in self.filters.drain(..) {
            self.provider.remove_match_filter(id);
        }
        for id in self.classifiers.drain(..) {
            self.provider.uninstall_classifier(id);
        }
        self.state = RegState::Unregistered;
        info!(self.log, "classifiers unregistered");
    }
}

#[derive(Default)]
struct RecordingState {
    classifiers: Vec<(ClassifierId, Direction)>,
    filters: Vec<(FilterId, Direction, Ipv6Addr)>,
    installs: usize,
    allowed: Option<usize>,
}

/// A [`ClassifierProvider`] that records installs without touching
/// any platform. The reference provider for tests and simulations;
/// installs can be made to fail after a set number of successes to
/// exercise the rollback path.
pub struct RecordingProvider {
    next_id: AtomicU64,
    state: ShortMutex<RecordingState>,
}

impl Default for RecordingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: ShortMutex::new(RecordingState::default()),
        }
    }

    /// Let `n` further installs succeed, then fail the rest.
    pub fn fail_after(&self, n: usize) {
        let mut state = self.state.lock();
        state.installs = 0;
        state.allowed = Some(n);
    }

    /// Lift any install limit set by [`Self::fail_after`].
    pub fn allow_all(&self) {
        self.state.lock().allowed = None;
    }

    pub fn classifier_count(&self) -> usize {
        self.state.lock().classifiers.len()
    }

    pub fn filter_count(&self) -> usize {
        self.state.lock().filters.len()
    }

    /// The filter addresses currently installed for `dir`.
    pub fn filters_for(&self, dir: Direction) -> Vec<Ipv6Addr> {
        self.state
            .lock()
            .filters
            .iter()
            .filter(|(_, d, _)| *d == dir)
            .map(|(_, _, addr)| *addr)
            .collect()
    }

    fn take_install_slot(&self) -> bool {
        let mut state = self.state.lock();
        if let Some(allowed) = state.allowed {
            if state.installs >= allowed {
                return false;
            }
        }
        state.installs += 1;
        true
    }
}

impl ClassifierProvider for RecordingProvider {
    fn install_classifier(
        &self,
        dir: Direction,
    ) -> Result<ClassifierId, RegistrationError> {
        if !self.take_install_slot() {
            return Err(RegistrationError::Classifier {
                dir,
                reason: "injected install failure".to_string(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().classifiers.push((id, dir));
        Ok(id)
    }

    fn add_match_filter(
        &self,
        dir: Direction,
        addr: Ipv6Addr,
    ) -> Result<FilterId, RegistrationError> {
        if !self.take_install_slot() {
            return Err(RegistrationError::Filter {
                dir,
                addr,
                reason: "injected install failure".to_string(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().filters.push((id, dir, addr));
        Ok(id)
    }

    fn remove_match_filter(&self, id: FilterId) {
        self.state.lock().filters.retain(|(fid, _, _)| *fid != id);
    }

    fn uninstall_classifier(&self, id: ClassifierId) {
        self.state.lock().classifiers.retain(|(cid, _)| *cid != id);
    }
}
