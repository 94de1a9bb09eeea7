// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The gateway command interface.

use crate::API_VERSION;
use crate::ip::ListRole;
use crate::ip::NodeRole;
use alloc::string::String;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// The MTU of the BLE side channel. A redirected packet larger than
/// this cannot be delivered and the transfer carrying it fails.
pub const SIDE_CHANNEL_MTU: usize = 1280;

/// The smallest packet the inject surface accepts: an IPv6 header
/// plus an eight byte transport header.
pub const MIN_INJECT_LEN: usize = 48;

/// A command sent to the gateway engine.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(C)]
pub enum GatewayCmd {
    /// Park a request on the listen queue, to be completed with the
    /// next redirected packet.
    ListenForPacket = 1,

    /// Hand the engine a packet received over the side channel and
    /// destined for this host's network stack.
    InjectInbound = 10,

    /// Hand the engine a packet received over the side channel and
    /// destined for the external network.
    InjectOutbound = 11,

    /// Add an address to one of the lists.
    AddListEntry = 20,

    /// Remove an address from one of the lists.
    RemoveListEntry = 21,

    /// Remove every entry from one of the lists, runtime and stored.
    PurgeList = 22,

    /// Return the current contents of one of the lists.
    DumpList = 23,

    /// Ask which role this host is provisioned as.
    QueryRole = 30,
}

impl TryFrom<u64> for GatewayCmd {
    type Error = ();

    fn try_from(num: u64) -> Result<Self, Self::Error> {
        match num {
            1 => Ok(Self::ListenForPacket),
            10 => Ok(Self::InjectInbound),
            11 => Ok(Self::InjectOutbound),
            20 => Ok(Self::AddListEntry),
            21 => Ok(Self::RemoveListEntry),
            22 => Ok(Self::PurgeList),
            23 => Ok(Self::DumpList),
            30 => Ok(Self::QueryRole),
            _ => Err(()),
        }
    }
}

/// A marker trait indicating a success response type that is returned
/// from a command.
pub trait CmdOk: core::fmt::Debug + Serialize {}

impl CmdOk for () {}

/// A response for the case where only success/failure needs to be
/// communicated.
#[derive(Debug, Deserialize, Serialize)]
pub struct NoResp {
    pub unused: u64,
}

impl Default for NoResp {
    fn default() -> Self {
        Self { unused: 99 }
    }
}

impl CmdOk for NoResp {}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum GatewayError {
    BadApiVersion { user: u64, engine: u64 },
    BadAddr(String),
    BadListenCapacity { given: usize, needed: usize },
    BadRoleValue(u32),
    DeserCmdReq(String),
    DuplicateEntry(String),
    EntryNotFound(String),
    Inject(String),
    Marshal(String),
    PacketTooBig { length: usize, max: usize },
    PacketTooSmall { length: usize, min: usize },
    PendedCmd,
    Registration(String),
    SerCmdResp(String),
    Store(String),
}

/// The serialized envelope in which every command travels. The engine
/// rejects an envelope whose `api_version` does not match its own
/// before it looks at the body.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CmdEnvelope {
    pub api_version: u64,
    pub cmd: GatewayCmd,
    pub body: Vec<u8>,
}

impl CmdEnvelope {
    pub fn new(cmd: GatewayCmd, body: Vec<u8>) -> Self {
        Self { api_version: API_VERSION, cmd, body }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AddEntryReq {
    pub role: ListRole,
    /// Textual address, optionally with a `%scope` suffix. Validation
    /// happens in the engine.
    pub entry: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RemoveEntryReq {
    pub role: ListRole,
    pub entry: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct PurgeListReq {
    pub role: ListRole,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct DumpListReq {
    pub role: ListRole,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DumpListResp {
    pub role: ListRole,
    pub entries: Vec<String>,
}

impl CmdOk for DumpListResp {}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct QueryRoleReq {
    pub unused: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct QueryRoleResp {
    pub role: NodeRole,
}

impl CmdOk for QueryRoleResp {}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InjectPacketReq {
    pub packet: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct ListenReq {
    /// Capacity of the buffer the caller has set aside for the
    /// redirected packet. Must be exactly [`SIDE_CHANNEL_MTU`].
    pub capacity: usize,
}
