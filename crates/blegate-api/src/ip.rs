// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv6 address and list-entry types.

use alloc::string::String;
use core::fmt;
use core::ops::Deref;
use core::result;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// An IPv6 address.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    FromBytes,
    Hash,
    Immutable,
    IntoBytes,
    KnownLayout,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Unaligned,
)]
#[repr(C)]
pub struct Ipv6Addr {
    inner: [u8; 16],
}

impl Ipv6Addr {
    /// The unspecified address, `::`.
    pub const ANY_ADDR: Self = Self { inner: [0; 16] };

    /// The loopback address, `::1`.
    pub const LOOPBACK: Self =
        Self::from_const([0, 0, 0, 0, 0, 0, 0, 0x0001]);

    /// Create an `Ipv6Addr` from an array of 16-bit words.
    pub const fn from_const(words: [u16; 8]) -> Self {
        let mut inner = [0u8; 16];
        let mut i = 0;
        while i < 8 {
            let bytes = words[i].to_be_bytes();
            inner[2 * i] = bytes[0];
            inner[2 * i + 1] = bytes[1];
            i += 1;
        }
        Self { inner }
    }

    /// Return the bytes of the address.
    pub fn bytes(&self) -> [u8; 16] {
        self.inner
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::ANY_ADDR
    }

    pub fn is_loopback(&self) -> bool {
        *self == Self::LOOPBACK
    }
}

impl fmt::Display for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sip6 = smoltcp::wire::Ipv6Address(self.bytes());
        write!(f, "{sip6}")
    }
}

impl From<[u8; 16]> for Ipv6Addr {
    fn from(bytes: [u8; 16]) -> Ipv6Addr {
        Ipv6Addr { inner: bytes }
    }
}

impl From<[u16; 8]> for Ipv6Addr {
    fn from(words: [u16; 8]) -> Ipv6Addr {
        Self::from_const(words)
    }
}

impl From<Ipv6Addr> for [u8; 16] {
    fn from(ip6: Ipv6Addr) -> [u8; 16] {
        ip6.inner
    }
}

impl From<core::net::Ipv6Addr> for Ipv6Addr {
    fn from(ip6: core::net::Ipv6Addr) -> Self {
        Self { inner: ip6.octets() }
    }
}

impl From<Ipv6Addr> for core::net::Ipv6Addr {
    fn from(ip6: Ipv6Addr) -> Self {
        Self::from(ip6.inner)
    }
}

impl From<smoltcp::wire::Ipv6Address> for Ipv6Addr {
    fn from(ip: smoltcp::wire::Ipv6Address) -> Self {
        // Safety: We assume the `smoltcp` type is well-formed, with at
        // least 16 octets in the correct order.
        let bytes: [u8; 16] = ip.as_bytes().try_into().unwrap();
        Self::from(bytes)
    }
}

impl From<Ipv6Addr> for smoltcp::wire::Ipv6Address {
    fn from(ip: Ipv6Addr) -> Self {
        // Safety: This panics, but we know bytes is exactly 16 octets.
        Self::from_bytes(&ip)
    }
}

impl AsRef<[u8]> for Ipv6Addr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl Deref for Ipv6Addr {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl FromStr for Ipv6Addr {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        let ip = val
            .parse::<smoltcp::wire::Ipv6Address>()
            .map_err(|_| String::from("Invalid IPv6 address"))?;
        Ok(ip.into())
    }
}

/// Quick shape check on an address string before it is handed to the
/// full parser: a textual IPv6 address is between 3 and 39 characters
/// long and contains between 2 and 7 colons. Anything outside those
/// bounds cannot be an IPv6 address, no matter what the characters are.
///
/// Note this runs on the address portion only; a scope suffix must be
/// split off first.
pub fn looks_like_ipv6(val: &str) -> bool {
    let len = val.len();
    if !(3..=39).contains(&len) {
        return false;
    }
    let colons = val.chars().filter(|c| *c == ':').count();
    (2..=7).contains(&colons)
}

/// An entry in one of the gateway's address lists: an IPv6 address
/// plus the interface scope it was registered against. A scope of zero
/// means no scope was given.
///
/// Two entries are equal only if both address and scope match; the
/// data path compares addresses alone.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
)]
#[repr(C)]
pub struct AddressEntry {
    pub addr: Ipv6Addr,
    pub scope_id: u32,
}

impl AddressEntry {
    pub fn new(addr: Ipv6Addr, scope_id: u32) -> Self {
        Self { addr, scope_id }
    }
}

impl fmt::Display for AddressEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.scope_id == 0 {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{}%{}", self.addr, self.scope_id)
        }
    }
}

impl FromStr for AddressEntry {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        let (addr_s, scope_s) = match val.split_once('%') {
            Some((a, s)) => (a, Some(s)),
            None => (val, None),
        };

        if !looks_like_ipv6(addr_s) {
            return Err(format!("not an IPv6 address: {val}"));
        }

        let addr = addr_s.parse::<Ipv6Addr>()?;
        let scope_id = match scope_s {
            Some(s) => {
                s.parse::<u32>().map_err(|_| format!("bad scope id: {s}"))?
            }
            None => 0,
        };

        Ok(Self { addr, scope_id })
    }
}

/// Which of the two gateway address lists an entry or command refers
/// to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ListRole {
    /// External devices trusted to originate traffic toward the mesh.
    Trust,

    /// Mesh-local devices reachable over the BLE side channel.
    MeshDestination,
}

impl ListRole {
    /// The key under which this list is persisted in the backing
    /// store.
    pub fn store_key(&self) -> &'static str {
        match self {
            ListRole::Trust => "TrustedExternalDeviceWhiteList",
            ListRole::MeshDestination => "MeshDeviceList",
        }
    }
}

impl fmt::Display for ListRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ListRole::Trust => "trust",
            ListRole::MeshDestination => "mesh",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ListRole {
    type Err = String;

    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trust" => Ok(ListRole::Trust),
            "mesh" => Ok(ListRole::MeshDestination),
            _ => Err(format!("invalid list role: {s}")),
        }
    }
}

/// The role this host plays in the IPv6-over-BLE network.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum NodeRole {
    /// A mesh device: traffic is caught wholesale and handed to the
    /// side channel.
    Node = 0,

    /// The border gateway: traffic is filtered against the address
    /// lists before redirection.
    Gateway = 1,
}

impl TryFrom<u32> for NodeRole {
    type Error = String;

    fn try_from(value: u32) -> result::Result<Self, Self::Error> {
        match value {
            0 => Ok(NodeRole::Node),
            1 => Ok(NodeRole::Gateway),
            _ => Err(format!("invalid role value: {value}")),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            NodeRole::Node => "node",
            NodeRole::Gateway => "gateway",
        };
        write!(f, "{name}")
    }
}
