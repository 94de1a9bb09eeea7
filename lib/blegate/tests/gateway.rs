// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Integration tests.
//!
//! These drive a whole engine the way an embedding daemon would: in
//! through the admin surface and the serialized command envelope,
//! packets through the classifier entry points, with the in-memory
//! store, provider, and injector standing in for the platform.

use blegate::api::AddEntryReq;
use blegate::api::CmdEnvelope;
use blegate::api::Direction;
use blegate::api::DumpListReq;
use blegate::api::DumpListResp;
use blegate::api::GatewayCmd;
use blegate::api::GatewayError;
use blegate::api::Ipv6Addr;
use blegate::api::ListRole;
use blegate::api::ListenReq;
use blegate::api::MIN_INJECT_LEN;
use blegate::api::NoResp;
use blegate::api::NodeRole;
use blegate::api::QueryRoleReq;
use blegate::api::QueryRoleResp;
use blegate::api::SIDE_CHANNEL_MTU;
use blegate::engine::classify::ClassifyCtx;
use blegate::engine::classify::PktFlags;
use blegate::engine::classify::Verdict;
use blegate::engine::classify::classify_inbound;
use blegate::engine::classify::classify_outbound;
use blegate::engine::flush::FlushWorker;
use blegate::engine::gateway::Gateway;
use blegate::engine::gateway::GatewayConfig;
use blegate::engine::gateway::RecordingInjector;
use blegate::engine::lifecycle::RecordingProvider;
use blegate::engine::lifecycle::RegState;
use blegate::engine::persist::ListStore;
use blegate::engine::persist::MemStore;
use blegate::engine::pkt::SegPacket;
use slog::Drain;
use slog::Logger;
use slog::o;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

fn test_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

struct Harness {
    store: Arc<MemStore>,
    provider: Arc<RecordingProvider>,
    injector: Arc<RecordingInjector>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemStore::new()),
            provider: Arc::new(RecordingProvider::new()),
            injector: Arc::new(RecordingInjector::new()),
        }
    }

    fn gateway(&self, role: NodeRole) -> Gateway {
        self.try_gateway(role).unwrap()
    }

    fn try_gateway(&self, role: NodeRole) -> Result<Gateway, GatewayError> {
        let cfg = GatewayConfig {
            role,
            flush_interval: Duration::from_millis(25),
        };
        Gateway::new(
            cfg,
            self.store.clone(),
            self.provider.clone(),
            self.injector.clone(),
            test_logger(),
        )
    }
}

/// An IPv6+UDP packet to `dst` with `payload_len` bytes of payload.
fn v6_udp_packet(dst: Ipv6Addr, payload_len: usize) -> Vec<u8> {
    let src = Ipv6Addr::from_const([0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x99]);
    let udp_len = 8 + payload_len;
    let mut bytes = Vec::with_capacity(40 + udp_len);
    bytes.push(0x60);
    bytes.extend_from_slice(&[0, 0, 0]);
    bytes.extend_from_slice(&(udp_len as u16).to_be_bytes());
    bytes.push(17); // UDP
    bytes.push(64);
    bytes.extend_from_slice(&src.bytes());
    bytes.extend_from_slice(&dst.bytes());
    bytes.extend_from_slice(&7777u16.to_be_bytes());
    bytes.extend_from_slice(&8888u16.to_be_bytes());
    bytes.extend_from_slice(&(udp_len as u16).to_be_bytes());
    bytes.extend_from_slice(&0u16.to_be_bytes());
    bytes.resize(40 + udp_len, 0xa5);
    bytes
}

fn inbound_ctx() -> ClassifyCtx {
    ClassifyCtx {
        flags: PktFlags::ACTION_WRITE,
        ip_header_len: 40,
        transport_header_len: 8,
    }
}

fn outbound_ctx() -> ClassifyCtx {
    ClassifyCtx {
        flags: PktFlags::ACTION_WRITE,
        ip_header_len: 0,
        transport_header_len: 8,
    }
}

fn envelope(cmd: GatewayCmd, body: Vec<u8>) -> Vec<u8> {
    postcard::to_allocvec(&CmdEnvelope::new(cmd, body)).unwrap()
}

#[test]
fn redirect_after_list_add() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);

    gw.add_entry(ListRole::Trust, "2001:db8::10").unwrap();
    gw.add_entry(ListRole::MeshDestination, "fe80::77%2").unwrap();
    assert_eq!(gw.reg_state(), RegState::Registered);
    assert_eq!(
        h.provider.filters_for(Direction::In),
        vec!["2001:db8::10".parse::<Ipv6Addr>().unwrap()]
    );
    assert_eq!(
        h.provider.filters_for(Direction::Out),
        vec!["fe80::77".parse::<Ipv6Addr>().unwrap()]
    );

    let (_, rx) = gw.listen(SIDE_CHANNEL_MTU).unwrap();

    // Inbound from the external side, destined for the mesh device.
    // Scope is registration metadata; the wire address alone decides.
    let dst: Ipv6Addr = "fe80::77".parse().unwrap();
    let wire = v6_udp_packet(dst, 64);
    let mut pkt = SegPacket::from_segments(vec![wire.clone()], 40);
    assert_eq!(classify_inbound(&gw, &inbound_ctx(), &mut pkt), Verdict::Absorb);
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap(), wire);

    // Outbound from this host toward the same device.
    let (_, rx) = gw.listen(SIDE_CHANNEL_MTU).unwrap();
    let wire = v6_udp_packet(dst, 16);
    let mut pkt = SegPacket::from_wire_bytes(wire.clone());
    assert_eq!(
        classify_outbound(&gw, &outbound_ctx(), &mut pkt),
        Verdict::Absorb
    );
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap(), wire);
}

#[test]
fn trusted_peer_traffic_passes_while_mesh_is_empty() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);
    gw.add_entry(ListRole::Trust, "2001:db8::1").unwrap();
    assert_eq!(gw.reg_state(), RegState::Unregistered);

    let (_, _rx) = gw.listen(SIDE_CHANNEL_MTU).unwrap();
    let wire = v6_udp_packet("2001:db8::1".parse().unwrap(), 24);
    let mut pkt = SegPacket::from_segments(vec![wire], 40);
    assert_eq!(classify_inbound(&gw, &inbound_ctx(), &mut pkt), Verdict::Permit);
    assert_eq!(gw.pending_listens(), 1);
    assert_eq!(gw.reg_state(), RegState::Unregistered);
}

#[test]
fn minimal_packet_delivers_exactly() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);
    gw.add_entry(ListRole::Trust, "2001:db8::10").unwrap();
    gw.add_entry(ListRole::MeshDestination, "fe80::9").unwrap();

    let (_, rx) = gw.listen(SIDE_CHANNEL_MTU).unwrap();

    // Bare IPv6 header plus bare UDP header, nothing else.
    let wire = v6_udp_packet("fe80::9".parse().unwrap(), 0);
    assert_eq!(wire.len(), MIN_INJECT_LEN);
    let mut pkt = SegPacket::from_segments(vec![wire.clone()], 40);
    assert_eq!(classify_inbound(&gw, &inbound_ctx(), &mut pkt), Verdict::Absorb);
    let got = rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
    assert_eq!(got.len(), MIN_INJECT_LEN);
    assert_eq!(got, wire);
}

#[test]
fn registration_tracks_occupancy_at_every_step() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);

    let check = |gw: &Gateway| {
        let occupied = !gw.dump_list(ListRole::Trust).entries.is_empty()
            && !gw.dump_list(ListRole::MeshDestination).entries.is_empty();
        let expect =
            if occupied { RegState::Registered } else { RegState::Unregistered };
        assert_eq!(gw.reg_state(), expect);
    };

    check(&gw);
    gw.add_entry(ListRole::Trust, "2001:db8::1").unwrap();
    check(&gw);
    gw.add_entry(ListRole::MeshDestination, "fe80::1").unwrap();
    check(&gw);
    gw.add_entry(ListRole::MeshDestination, "fe80::2").unwrap();
    check(&gw);
    gw.remove_entry(ListRole::MeshDestination, "fe80::1").unwrap();
    check(&gw);
    gw.remove_entry(ListRole::MeshDestination, "fe80::2").unwrap();
    check(&gw);
    gw.remove_entry(ListRole::Trust, "2001:db8::1").unwrap();
    check(&gw);
    gw.add_entry(ListRole::MeshDestination, "fe80::3").unwrap();
    check(&gw);
}

#[test]
fn duplicate_and_missing_entries() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);

    gw.add_entry(ListRole::Trust, "2001:db8::10").unwrap();
    assert!(matches!(
        gw.add_entry(ListRole::Trust, "2001:db8::10"),
        Err(GatewayError::DuplicateEntry(_))
    ));
    assert!(matches!(
        gw.remove_entry(ListRole::Trust, "2001:db8::ff"),
        Err(GatewayError::EntryNotFound(_))
    ));
    assert_eq!(gw.dump_list(ListRole::Trust).entries.len(), 1);
}

#[test]
fn removal_to_empty_unregisters_and_drops_stored() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);

    gw.add_entry(ListRole::Trust, "2001:db8::10").unwrap();
    gw.add_entry(ListRole::MeshDestination, "fe80::1").unwrap();
    gw.flush_lists();
    assert!(
        h.store
            .get_multi(ListRole::MeshDestination.store_key())
            .unwrap()
            .is_some()
    );
    assert_eq!(gw.reg_state(), RegState::Registered);

    gw.remove_entry(ListRole::MeshDestination, "fe80::1").unwrap();
    assert_eq!(gw.reg_state(), RegState::Unregistered);
    assert_eq!(h.provider.classifier_count(), 0);
    assert_eq!(
        h.store.get_multi(ListRole::MeshDestination.store_key()).unwrap(),
        None
    );
    // The other list's stored form is untouched.
    assert!(
        h.store.get_multi(ListRole::Trust.store_key()).unwrap().is_some()
    );
}

#[test]
fn lists_survive_restart() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);
    gw.add_entry(ListRole::Trust, "2001:db8::10").unwrap();
    gw.add_entry(ListRole::MeshDestination, "fe80::1").unwrap();
    gw.add_entry(ListRole::MeshDestination, "fe80::2").unwrap();
    let mesh_before = gw.dump_list(ListRole::MeshDestination).entries;
    gw.shutdown();
    drop(gw);

    let gw = h.gateway(NodeRole::Gateway);
    assert_eq!(gw.dump_list(ListRole::MeshDestination).entries, mesh_before);
    assert_eq!(
        gw.dump_list(ListRole::Trust).entries,
        vec!["2001:db8::10".to_string()]
    );
    // Both lists came back occupied, so the engine hooked the stack
    // by itself.
    assert_eq!(gw.reg_state(), RegState::Registered);
}

#[test]
fn corrupt_store_starts_empty() {
    let h = Harness::new();
    h.store
        .set_multi(
            ListRole::Trust.store_key(),
            &["fe80::1".to_string(), "garbage".to_string()],
        )
        .unwrap();
    h.store
        .set_multi(ListRole::MeshDestination.store_key(), &["fe80::2".to_string()])
        .unwrap();

    // The engine still comes up; the bad list is empty, and with one
    // list empty nothing registers.
    let gw = h.gateway(NodeRole::Gateway);
    assert!(gw.dump_list(ListRole::Trust).entries.is_empty());
    assert_eq!(
        gw.dump_list(ListRole::MeshDestination).entries,
        vec!["fe80::2".to_string()]
    );
    assert_eq!(gw.reg_state(), RegState::Unregistered);
}

#[test]
fn startup_registration_failure_is_fatal() {
    let h = Harness::new();
    h.store
        .set_multi(ListRole::Trust.store_key(), &["2001:db8::10".to_string()])
        .unwrap();
    h.store
        .set_multi(ListRole::MeshDestination.store_key(), &["fe80::1".to_string()])
        .unwrap();
    h.provider.fail_after(1);

    let err = h.try_gateway(NodeRole::Gateway).unwrap_err();
    assert!(matches!(err, GatewayError::Registration(_)));
    // The partial install was rolled back.
    assert_eq!(h.provider.classifier_count(), 0);
    assert_eq!(h.provider.filter_count(), 0);
}

#[test]
fn runtime_registration_failure_keeps_entry() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);
    gw.add_entry(ListRole::Trust, "2001:db8::10").unwrap();

    // The mesh add makes both lists occupied and triggers
    // registration, which fails.
    h.provider.fail_after(0);
    let err = gw.add_entry(ListRole::MeshDestination, "fe80::1").unwrap_err();
    assert!(matches!(err, GatewayError::Registration(_)));
    assert_eq!(gw.reg_state(), RegState::Unregistered);
    // The entry itself was accepted.
    assert_eq!(
        gw.dump_list(ListRole::MeshDestination).entries,
        vec!["fe80::1".to_string()]
    );

    // Once the provider recovers, the next mutation registers.
    h.provider.allow_all();
    gw.add_entry(ListRole::MeshDestination, "fe80::2").unwrap();
    assert_eq!(gw.reg_state(), RegState::Registered);
}

#[test]
fn purge_clears_runtime_and_stored() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);
    gw.add_entry(ListRole::Trust, "2001:db8::10").unwrap();
    gw.add_entry(ListRole::MeshDestination, "fe80::1").unwrap();
    gw.add_entry(ListRole::MeshDestination, "fe80::2").unwrap();
    gw.flush_lists();

    gw.purge_list(ListRole::MeshDestination).unwrap();
    assert!(gw.dump_list(ListRole::MeshDestination).entries.is_empty());
    assert_eq!(
        h.store.get_multi(ListRole::MeshDestination.store_key()).unwrap(),
        None
    );
    assert_eq!(gw.reg_state(), RegState::Unregistered);
    assert_eq!(
        gw.dump_list(ListRole::Trust).entries,
        vec!["2001:db8::10".to_string()]
    );
}

#[test]
fn flush_retries_after_store_failure() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);
    gw.add_entry(ListRole::Trust, "2001:db8::10").unwrap();

    h.store.fail_writes(true);
    gw.flush_lists();
    assert_eq!(h.store.get_multi(ListRole::Trust.store_key()).unwrap(), None);

    // The failed save left the list dirty, so the next pass saves it
    // with no further mutation.
    h.store.fail_writes(false);
    gw.flush_lists();
    assert_eq!(
        h.store.get_multi(ListRole::Trust.store_key()).unwrap(),
        Some(vec!["2001:db8::10".to_string()])
    );
}

#[test]
fn flush_worker_cadence() {
    let h = Harness::new();
    let gw = Arc::new(h.gateway(NodeRole::Gateway));
    let worker = FlushWorker::spawn(gw.clone(), gw.flush_interval()).unwrap();

    gw.add_entry(ListRole::Trust, "2001:db8::10").unwrap();

    let key = ListRole::Trust.store_key();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if h.store.get_multi(key).unwrap().is_some() {
            break;
        }
        assert!(Instant::now() < deadline, "flush worker never flushed");
        thread::sleep(Duration::from_millis(10));
    }

    worker.shutdown();
}

#[test]
fn node_engine_lifecycle() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Node);

    // A node hooks the stack at startup: one outbound classifier
    // with a catch-all filter.
    assert_eq!(gw.reg_state(), RegState::Registered);
    assert_eq!(h.provider.classifier_count(), 1);
    assert_eq!(
        h.provider.filters_for(Direction::Out),
        vec![Ipv6Addr::ANY_ADDR]
    );

    // Everything it originates goes to the side channel.
    let (_, rx) = gw.listen(SIDE_CHANNEL_MTU).unwrap();
    let wire = v6_udp_packet("2001:db8::1".parse().unwrap(), 32);
    let mut pkt = SegPacket::from_wire_bytes(wire.clone());
    assert_eq!(
        classify_outbound(&gw, &outbound_ctx(), &mut pkt),
        Verdict::Absorb
    );
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap(), wire);

    gw.shutdown();
    assert_eq!(h.provider.classifier_count(), 0);
    assert_eq!(h.provider.filter_count(), 0);
}

#[test]
fn listen_capacity_enforced() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);
    assert!(matches!(
        gw.listen(SIDE_CHANNEL_MTU - 1),
        Err(GatewayError::BadListenCapacity { .. })
    ));
    assert!(matches!(
        gw.listen(SIDE_CHANNEL_MTU + 1),
        Err(GatewayError::BadListenCapacity { .. })
    ));
    assert_eq!(gw.pending_listens(), 0);
}

#[test]
fn inject_surfaces() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);

    let wire = v6_udp_packet("2001:db8::5".parse().unwrap(), 8);
    gw.inject_inbound(wire.clone()).unwrap();
    gw.inject_outbound(wire.clone()).unwrap();
    assert_eq!(h.injector.inbound(), vec![wire.clone()]);
    assert_eq!(h.injector.outbound(), vec![wire]);

    assert!(matches!(
        gw.inject_inbound(vec![0u8; MIN_INJECT_LEN - 1]),
        Err(GatewayError::PacketTooSmall { .. })
    ));
    assert!(matches!(
        gw.inject_outbound(vec![0u8; SIDE_CHANNEL_MTU + 1]),
        Err(GatewayError::PacketTooBig { .. })
    ));
}

#[test]
fn command_envelope() {
    let h = Harness::new();
    let gw = h.gateway(NodeRole::Gateway);

    // Add an entry through the serialized surface.
    let body = postcard::to_allocvec(&AddEntryReq {
        role: ListRole::MeshDestination,
        entry: "fe80::7".to_string(),
    })
    .unwrap();
    let resp = gw.run_cmd(&envelope(GatewayCmd::AddListEntry, body)).unwrap();
    let _: NoResp = postcard::from_bytes(&resp).unwrap();

    // And read it back.
    let body = postcard::to_allocvec(&DumpListReq {
        role: ListRole::MeshDestination,
    })
    .unwrap();
    let resp = gw.run_cmd(&envelope(GatewayCmd::DumpList, body)).unwrap();
    let dump: DumpListResp = postcard::from_bytes(&resp).unwrap();
    assert_eq!(dump.entries, vec!["fe80::7".to_string()]);

    let body = postcard::to_allocvec(&QueryRoleReq { unused: 0 }).unwrap();
    let resp = gw.run_cmd(&envelope(GatewayCmd::QueryRole, body)).unwrap();
    let role: QueryRoleResp = postcard::from_bytes(&resp).unwrap();
    assert_eq!(role.role, NodeRole::Gateway);

    // Listen cannot complete synchronously.
    let body = postcard::to_allocvec(&ListenReq { capacity: SIDE_CHANNEL_MTU })
        .unwrap();
    assert!(matches!(
        gw.run_cmd(&envelope(GatewayCmd::ListenForPacket, body)),
        Err(GatewayError::PendedCmd)
    ));

    // Version skew is refused before the body is touched.
    let mut env = CmdEnvelope::new(
        GatewayCmd::QueryRole,
        postcard::to_allocvec(&QueryRoleReq { unused: 0 }).unwrap(),
    );
    env.api_version += 1;
    let err =
        gw.run_cmd(&postcard::to_allocvec(&env).unwrap()).unwrap_err();
    assert!(matches!(err, GatewayError::BadApiVersion { .. }));

    // Garbage is refused, not panicked over.
    assert!(matches!(
        gw.run_cmd(&[0xff, 0xfe]),
        Err(GatewayError::DeserCmdReq(_))
    ));
}

#[test]
fn numeric_command_mapping() {
    // Transports that carry a raw command number use this mapping.
    assert_eq!(GatewayCmd::try_from(1u64), Ok(GatewayCmd::ListenForPacket));
    assert_eq!(GatewayCmd::try_from(20u64), Ok(GatewayCmd::AddListEntry));
    assert_eq!(GatewayCmd::try_from(30u64), Ok(GatewayCmd::QueryRole));
    assert!(GatewayCmd::try_from(99u64).is_err());
}
