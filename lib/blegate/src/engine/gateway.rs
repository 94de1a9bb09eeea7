// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The gateway engine hub.
//!
//! One [`Gateway`] exists per host. It owns the lists, the listen
//! queue, and the classifier lifecycle, and every surface of the
//! engine reaches shared state through it; there are no process-wide
//! statics. All methods take `&self`; interior locks are scoped per
//! concern.

use core::fmt;

use crate::api::API_VERSION;
use crate::api::AddEntryReq;
use crate::api::AddressEntry;
use crate::api::CmdEnvelope;
use crate::api::CmdOk;
use crate::api::Direction;
use crate::api::DumpListReq;
use crate::api::DumpListResp;
use crate::api::GatewayCmd;
use crate::api::GatewayError;
use crate::api::InjectPacketReq;
use crate::api::Ipv6Addr;
use crate::api::ListRole;
use crate::api::ListenReq;
use crate::api::MIN_INJECT_LEN;
use crate::api::NoResp;
use crate::api::NodeRole;
use crate::api::PurgeListReq;
use crate::api::QueryRoleReq;
use crate::api::QueryRoleResp;
use crate::api::RemoveEntryReq;
use crate::api::SIDE_CHANNEL_MTU;
use crate::engine::lifecycle::ClassifierProvider;
use crate::engine::lifecycle::FilterLifecycle;
use crate::engine::lifecycle::RegState;
use crate::engine::list::AddressList;
use crate::engine::list::SharedList;
use crate::engine::persist;
use crate::engine::persist::ListStore;
use crate::engine::pkt::SegPacket;
use crate::engine::queue::ListenOutcome;
use crate::engine::queue::ListenQueue;
use crate::engine::queue::RequestId;
use crate::sync::AdminMutex;
use crate::sync::ShortMutex;
use serde::Deserialize;
use slog::Logger;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use thiserror::Error;

/// How often the flush worker wakes to write dirty lists out.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Static configuration the engine is created with.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub role: NodeRole,
    pub flush_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Node,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl GatewayConfig {
    /// Build a config from the raw role integer the host's
    /// provisioning hands us: 1 is a gateway, 0 is a node, anything
    /// else is a provisioning bug.
    pub fn with_role_value(value: u32) -> Result<Self, GatewayError> {
        let role = NodeRole::try_from(value)
            .map_err(|_| GatewayError::BadRoleValue(value))?;
        Ok(Self { role, ..Default::default() })
    }
}

#[derive(Clone, Debug, Error)]
#[error("packet injection failed: {0}")]
pub struct InjectError(pub String);

/// The platform's packet re-entry point. Packets received over the
/// side channel are handed back to the local stack through this
/// trait.
pub trait PacketInjector: Send + Sync {
    /// Deliver a packet to the local stack as though it had arrived
    /// from the network.
    fn inject_inbound(&self, pkt: SegPacket) -> Result<(), InjectError>;

    /// Hand a packet to the local stack for ordinary forwarding
    /// toward the external network.
    fn inject_outbound(&self, pkt: SegPacket) -> Result<(), InjectError>;
}

#[derive(Default)]
struct InjectedPackets {
    inbound: Vec<Vec<u8>>,
    outbound: Vec<Vec<u8>>,
}

/// A [`PacketInjector`] that keeps the packets it is given. The
/// reference injector for tests and simulations.
pub struct RecordingInjector {
    state: ShortMutex<InjectedPackets>,
}

impl Default for RecordingInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self { state: ShortMutex::new(InjectedPackets::default()) }
    }

    pub fn inbound(&self) -> Vec<Vec<u8>> {
        self.state.lock().inbound.clone()
    }

    pub fn outbound(&self) -> Vec<Vec<u8>> {
        self.state.lock().outbound.clone()
    }
}

impl PacketInjector for RecordingInjector {
    fn inject_inbound(&self, mut pkt: SegPacket) -> Result<(), InjectError> {
        let bytes = pkt
            .to_wire_bytes(0)
            .map_err(|e| InjectError(e.to_string()))?;
        self.state.lock().inbound.push(bytes);
        Ok(())
    }

    fn inject_outbound(&self, mut pkt: SegPacket) -> Result<(), InjectError> {
        let bytes = pkt
            .to_wire_bytes(0)
            .map_err(|e| InjectError(e.to_string()))?;
        self.state.lock().outbound.push(bytes);
        Ok(())
    }
}

/// The engine.
///
/// Lock ordering: the list locks and the lifecycle lock are never
/// held together. Every path that needs both snapshots the lists
/// first, drops their locks, and only then takes the lifecycle lock.
pub struct Gateway {
    log: Logger,
    role: NodeRole,
    trust: SharedList,
    mesh: SharedList,
    lifecycle: AdminMutex<FilterLifecycle>,
    queue: ListenQueue,
    store: Arc<dyn ListStore>,
    injector: Arc<dyn PacketInjector>,
    flush_interval: Duration,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("role", &self.role)
            .field("flush_interval", &self.flush_interval)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Bring the engine up.
    ///
    /// A gateway restores its lists from the store first; a stored
    /// list that cannot be loaded is logged and treated as empty
    /// rather than keeping the engine down. Classifier registration
    /// then follows the lifecycle rules for the role. A registration
    /// failure here, unlike one at runtime, is fatal.
    pub fn new(
        cfg: GatewayConfig,
        store: Arc<dyn ListStore>,
        provider: Arc<dyn ClassifierProvider>,
        injector: Arc<dyn PacketInjector>,
        log: Logger,
    ) -> Result<Self, GatewayError> {
        let role = cfg.role;

        let (trust, mesh) = match role {
            NodeRole::Gateway => (
                Self::load_or_empty(&*store, ListRole::Trust, &log),
                Self::load_or_empty(&*store, ListRole::MeshDestination, &log),
            ),
            // A node holds no lists; they stay empty for its
            // lifetime.
            NodeRole::Node => (
                AddressList::new(ListRole::Trust),
                AddressList::new(ListRole::MeshDestination),
            ),
        };

        let mut lifecycle = FilterLifecycle::new(
            role,
            provider,
            log.new(o!("unit" => "lifecycle")),
        );
        let trust_addrs: Vec<Ipv6Addr> =
            trust.iter().map(|e| e.addr).collect();
        let mesh_addrs: Vec<Ipv6Addr> =
            mesh.iter().map(|e| e.addr).collect();
        lifecycle
            .startup(&trust_addrs, &mesh_addrs)
            .map_err(|e| GatewayError::Registration(e.to_string()))?;

        info!(
            log, "gateway engine online";
            "role" => %role,
            "trust_entries" => trust.len(),
            "mesh_entries" => mesh.len(),
            "state" => %lifecycle.state(),
        );

        Ok(Self {
            log,
            role,
            trust: SharedList::new(trust),
            mesh: SharedList::new(mesh),
            lifecycle: AdminMutex::new(lifecycle),
            queue: ListenQueue::new(),
            store,
            injector,
            flush_interval: cfg.flush_interval,
        })
    }

    fn load_or_empty(
        store: &dyn ListStore,
        role: ListRole,
        log: &Logger,
    ) -> AddressList {
        match persist::load_list(store, role) {
            Ok(list) => list,
            Err(e) => {
                warn!(
                    log, "stored list unusable, starting empty";
                    "list" => %role,
                    "error" => %e,
                );
                AddressList::new(role)
            }
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn reg_state(&self) -> RegState {
        self.lifecycle.lock().state()
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Outstanding listen requests.
    pub fn pending_listens(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn log(&self) -> &Logger {
        &self.log
    }

    pub(crate) fn queue(&self) -> &ListenQueue {
        &self.queue
    }

    pub(crate) fn mesh_contains(&self, addr: &Ipv6Addr) -> bool {
        self.mesh.contains_addr(addr)
    }

    fn list(&self, role: ListRole) -> &SharedList {
        match role {
            ListRole::Trust => &self.trust,
            ListRole::MeshDestination => &self.mesh,
        }
    }

    /// Validate `entry` and add it to the `role` list.
    ///
    /// The new entry takes effect on the packet path immediately. If
    /// the classifier re-registration that follows fails, the entry
    /// stays in the list and the error is returned; the next
    /// successful registration picks the entry up.
    pub fn add_entry(
        &self,
        role: ListRole,
        entry: &str,
    ) -> Result<(), GatewayError> {
        let parsed =
            entry.parse::<AddressEntry>().map_err(GatewayError::BadAddr)?;
        self.list(role).add(parsed)?;
        info!(
            self.log, "list entry added";
            "list" => %role,
            "entry" => %parsed,
        );
        self.reevaluate()
    }

    /// Remove `entry` from the `role` list.
    ///
    /// Removing the last entry also drops the list's stored form;
    /// an empty list's canonical stored shape is an absent key.
    pub fn remove_entry(
        &self,
        role: ListRole,
        entry: &str,
    ) -> Result<(), GatewayError> {
        let parsed =
            entry.parse::<AddressEntry>().map_err(GatewayError::BadAddr)?;
        let now_empty = self.list(role).remove(&parsed)?;
        info!(
            self.log, "list entry removed";
            "list" => %role,
            "entry" => %parsed,
            "now_empty" => now_empty,
        );
        if now_empty {
            self.drop_stored(role);
        }
        self.reevaluate()
    }

    /// Empty the `role` list, runtime and stored forms both.
    pub fn purge_list(&self, role: ListRole) -> Result<(), GatewayError> {
        self.list(role).clear();
        self.reevaluate()?;
        if self.role == NodeRole::Gateway {
            persist::purge_stored(&*self.store, role)
                .map_err(|e| GatewayError::Store(e.to_string()))?;
        }
        info!(self.log, "list purged"; "list" => %role);
        Ok(())
    }

    /// Best-effort removal of a list's stored form. Failure leaves a
    /// stale key behind, which the next flush of a non-empty list
    /// overwrites.
    fn drop_stored(&self, role: ListRole) {
        if self.role != NodeRole::Gateway {
            return;
        }
        if let Err(e) = persist::purge_stored(&*self.store, role) {
            warn!(
                self.log, "failed to drop stored list";
                "list" => %role,
                "error" => %e,
            );
        }
    }

    pub fn dump_list(&self, role: ListRole) -> DumpListResp {
        DumpListResp { role, entries: self.list(role).snapshot_records() }
    }

    pub fn query_role(&self) -> QueryRoleResp {
        QueryRoleResp { role: self.role }
    }

    /// Park a listen request; see [`ListenQueue::listen`].
    pub fn listen(
        &self,
        capacity: usize,
    ) -> Result<(RequestId, mpsc::Receiver<ListenOutcome>), GatewayError>
    {
        let (id, rx) = self.queue.listen(capacity)?;
        debug!(self.log, "listen request parked"; "request" => id);
        Ok((id, rx))
    }

    /// Inject a side-channel packet toward the local stack.
    pub fn inject_inbound(
        &self,
        packet: Vec<u8>,
    ) -> Result<(), GatewayError> {
        self.inject(Direction::In, packet)
    }

    /// Inject a side-channel packet toward the external network.
    pub fn inject_outbound(
        &self,
        packet: Vec<u8>,
    ) -> Result<(), GatewayError> {
        self.inject(Direction::Out, packet)
    }

    fn inject(
        &self,
        dir: Direction,
        packet: Vec<u8>,
    ) -> Result<(), GatewayError> {
        let length = packet.len();
        if length < MIN_INJECT_LEN {
            return Err(GatewayError::PacketTooSmall {
                length,
                min: MIN_INJECT_LEN,
            });
        }
        if length > SIDE_CHANNEL_MTU {
            return Err(GatewayError::PacketTooBig {
                length,
                max: SIDE_CHANNEL_MTU,
            });
        }

        let pkt = SegPacket::from_wire_bytes(packet);
        let res = match dir {
            Direction::In => self.injector.inject_inbound(pkt),
            Direction::Out => self.injector.inject_outbound(pkt),
        };
        res.map_err(|e| GatewayError::Inject(e.to_string()))?;
        debug!(
            self.log, "packet injected";
            "dir" => %dir,
            "bytes" => length,
        );
        Ok(())
    }

    /// Write any dirty list back to the store. Runs on the flush
    /// worker's cadence, and once more at shutdown; harmless to call
    /// directly.
    ///
    /// A failed save re-marks the list dirty, so the change is
    /// retried on the next pass rather than silently lost.
    pub fn flush_lists(&self) {
        if self.role != NodeRole::Gateway {
            return;
        }
        for list in [&self.trust, &self.mesh] {
            let Some(records) = list.take_dirty_snapshot() else {
                continue;
            };
            let role = list.role();
            match persist::save_records(&*self.store, role, &records) {
                Ok(()) => {
                    debug!(
                        self.log, "list flushed";
                        "list" => %role,
                        "entries" => records.len(),
                    );
                }
                Err(e) => {
                    warn!(
                        self.log, "list flush failed, will retry";
                        "list" => %role,
                        "error" => %e,
                    );
                    list.mark_dirty();
                }
            }
        }
    }

    /// Flush outstanding changes and tear the classifiers down.
    pub fn shutdown(&self) {
        self.flush_lists();
        self.lifecycle.lock().unregister();
        info!(self.log, "gateway engine shut down");
    }

    /// Re-derive the desired classifier state from current list
    /// occupancy. List locks are released before the lifecycle lock
    /// is taken.
    fn reevaluate(&self) -> Result<(), GatewayError> {
        let trust = self.trust.snapshot_addrs();
        let mesh = self.mesh.snapshot_addrs();
        self.lifecycle
            .lock()
            .reevaluate(&trust, &mesh)
            .map_err(|e| GatewayError::Registration(e.to_string()))
    }

    /// Execute one serialized command envelope and return the
    /// serialized success response.
    ///
    /// Listen requests cannot complete synchronously and so cannot
    /// travel this path; the transport hands them to [`Gateway::listen`]
    /// and gets [`GatewayError::PendedCmd`] if it sends one here.
    pub fn run_cmd(&self, bytes: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let env: CmdEnvelope = postcard::from_bytes(bytes)
            .map_err(|e| GatewayError::DeserCmdReq(e.to_string()))?;
        if env.api_version != API_VERSION {
            return Err(GatewayError::BadApiVersion {
                user: env.api_version,
                engine: API_VERSION,
            });
        }

        match env.cmd {
            GatewayCmd::ListenForPacket => {
                // Make sure the request at least parses before
                // refusing it.
                let _req: ListenReq = deser(&env.body)?;
                Err(GatewayError::PendedCmd)
            }
            GatewayCmd::InjectInbound => {
                let req: InjectPacketReq = deser(&env.body)?;
                self.inject_inbound(req.packet)?;
                ser(&NoResp::default())
            }
            GatewayCmd::InjectOutbound => {
                let req: InjectPacketReq = deser(&env.body)?;
                self.inject_outbound(req.packet)?;
                ser(&NoResp::default())
            }
            GatewayCmd::AddListEntry => {
                let req: AddEntryReq = deser(&env.body)?;
                self.add_entry(req.role, &req.entry)?;
                ser(&NoResp::default())
            }
            GatewayCmd::RemoveListEntry => {
                let req: RemoveEntryReq = deser(&env.body)?;
                self.remove_entry(req.role, &req.entry)?;
                ser(&NoResp::default())
            }
            GatewayCmd::PurgeList => {
                let req: PurgeListReq = deser(&env.body)?;
                self.purge_list(req.role)?;
                ser(&NoResp::default())
            }
            GatewayCmd::DumpList => {
                let req: DumpListReq = deser(&env.body)?;
                ser(&self.dump_list(req.role))
            }
            GatewayCmd::QueryRole => {
                let _req: QueryRoleReq = deser(&env.body)?;
                ser(&self.query_role())
            }
        }
    }
}

fn deser<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, GatewayError> {
    postcard::from_bytes(body)
        .map_err(|e| GatewayError::DeserCmdReq(e.to_string()))
}

fn ser<T: CmdOk>(resp: &T) -> Result<Vec<u8>, GatewayError> {
    postcard::to_allocvec(resp)
        .map_err(|e| GatewayError::SerCmdResp(e.to_string()))
}
