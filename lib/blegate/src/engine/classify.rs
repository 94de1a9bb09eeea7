// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Packet classification.
//!
//! This is the hot path. The platform hands every packet that crossed
//! an installed classifier to [`classify_inbound`] or
//! [`classify_outbound`] along with a little per-packet metadata, and
//! gets back a [`Verdict`] telling it what became of the packet. A
//! redirected packet is absorbed: the platform drops its copy and the
//! bytes travel the BLE side channel instead.

use crate::api::Direction;
use crate::api::GatewayError;
use crate::api::Ipv6Addr;
use crate::api::NodeRole;
use crate::engine::gateway::Gateway;
use crate::engine::pkt::SegPacket;
use bitflags::bitflags;

/// Offset of the destination address within an IPv6 header.
const IP6_DST_OFFSET: usize = 24;

/// The only transport header length the side channel carries.
const UDP_HDR_LEN: usize = 8;

bitflags! {
    /// Per-packet facts the platform knows and the classifier needs.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct PktFlags: u32 {
        /// The platform permits acting on this packet. Without it the
        /// classifier is an observer only.
        const ACTION_WRITE = 1 << 0;

        /// This engine injected the packet itself. Classifying it
        /// again would redirect it in a loop.
        const INJECTED_BY_SELF = 1 << 1;

        /// The packet is looped back and never left the host.
        const LOOPBACK = 1 << 2;
    }
}

/// Metadata accompanying one packet into classification.
#[derive(Clone, Copy, Debug)]
pub struct ClassifyCtx {
    pub flags: PktFlags,

    /// Bytes of IP header the stack consumed before handing the
    /// packet over. Zero on the outbound path, where the packet
    /// arrives still positioned at its IP header.
    pub ip_header_len: usize,

    /// Length of the transport header as parsed by the stack.
    pub transport_header_len: usize,
}

/// What the platform should do with the packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// The classifier expressed no opinion; whatever the platform
    /// was going to do still stands.
    Untouched,

    /// Let the packet continue through the normal stack.
    Permit,

    /// The engine consumed the packet; the platform drops its copy.
    Absorb,
}

pub fn classify_inbound(
    gw: &Gateway,
    ctx: &ClassifyCtx,
    pkt: &mut SegPacket,
) -> Verdict {
    classify(gw, Direction::In, ctx, pkt)
}

pub fn classify_outbound(
    gw: &Gateway,
    ctx: &ClassifyCtx,
    pkt: &mut SegPacket,
) -> Verdict {
    classify(gw, Direction::Out, ctx, pkt)
}

fn classify(
    gw: &Gateway,
    dir: Direction,
    ctx: &ClassifyCtx,
    pkt: &mut SegPacket,
) -> Verdict {
    if !ctx.flags.contains(PktFlags::ACTION_WRITE) {
        return Verdict::Untouched;
    }

    // Our own injections and loopback traffic go to the stack
    // untouched.
    if ctx.flags.intersects(PktFlags::INJECTED_BY_SELF | PktFlags::LOOPBACK)
    {
        return Verdict::Permit;
    }

    // A packet whose destination cannot be read is not ours to judge.
    let Some(dst) = read_dst(ctx, pkt) else {
        return Verdict::Permit;
    };

    // On a gateway only traffic for a known mesh device is
    // interesting. A node's catch-all hook made the decision already.
    if gw.role() == NodeRole::Gateway && !gw.mesh_contains(&dst) {
        return Verdict::Permit;
    }

    // The side channel carries UDP datagrams only; anything else
    // addressed to the mesh stops here.
    if ctx.transport_header_len != UDP_HDR_LEN {
        debug!(
            gw.log(), "non-UDP packet for mesh device dropped";
            "dir" => %dir,
            "dst" => %dst,
            "transport_header_len" => ctx.transport_header_len,
        );
        return Verdict::Absorb;
    }

    let Some(req) = gw.queue().try_dequeue() else {
        warn!(
            gw.log(), "redirected packet dropped, no listener";
            "dir" => %dir,
            "dst" => %dst,
        );
        return Verdict::Absorb;
    };

    let outcome = marshal_for(req.capacity(), ctx, pkt);
    if let Err(e) = &outcome {
        warn!(
            gw.log(), "redirect failed";
            "dir" => %dir,
            "dst" => %dst,
            "request" => req.id(),
            "error" => ?e,
        );
    }
    if !req.complete(outcome) {
        debug!(
            gw.log(), "listener went away before completion";
            "dir" => %dir,
        );
    }

    Verdict::Absorb
}

/// Read the destination address out of the IP header, retreating over
/// any consumed header bytes first and restoring the cursor after.
fn read_dst(ctx: &ClassifyCtx, pkt: &mut SegPacket) -> Option<Ipv6Addr> {
    if pkt.retreat(ctx.ip_header_len).is_err() {
        return None;
    }
    let mut bytes = [0u8; 16];
    let res = pkt.read_at(IP6_DST_OFFSET, &mut bytes);
    pkt.advance(ctx.ip_header_len);
    match res {
        Ok(()) => Some(Ipv6Addr::from(bytes)),
        Err(_) => None,
    }
}

/// Flatten the packet for delivery, IP header included, and enforce
/// the listener's buffer capacity.
fn marshal_for(
    capacity: usize,
    ctx: &ClassifyCtx,
    pkt: &mut SegPacket,
) -> Result<Vec<u8>, GatewayError> {
    let bytes = pkt
        .to_wire_bytes(ctx.ip_header_len)
        .map_err(|e| GatewayError::Marshal(e.to_string()))?;
    if bytes.len() > capacity {
        return Err(GatewayError::PacketTooBig {
            length: bytes.len(),
            max: capacity,
        });
    }
    Ok(bytes)
}
