// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! API types for interacting with the IPv6-over-BLE gateway engine.
//!
//! This crate is `no_std` so that the same command and address types
//! can be shared between the host-side engine, provisioning tools, and
//! constrained embedded consumers. The `std` feature enables a few
//! conveniences for std contexts; the engine enables it, node firmware
//! does not.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod cmd;
pub mod ip;

pub use cmd::*;
pub use ip::*;

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The API version.
///
/// Any time versioned structures are modified, this number must be
/// bumped. Commands carry the caller's version so that the engine can
/// reject requests built against a different revision of these types.
pub const API_VERSION: u64 = 1;

/// Major version of the gateway package.
pub const MAJOR_VERSION: u64 = 0;

/// The direction of a packet relative to the host the engine runs on.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Direction {
    /// The packet arrives from an external network.
    In = 1,

    /// The packet originates on this host and leaves it.
    Out = 2,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            _ => Err(format!("invalid direction: {s}")),
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        };
        write!(f, "{dirstr}")
    }
}
