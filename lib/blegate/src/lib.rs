// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The IPv6-over-BLE gateway engine.
//!
//! This library holds the host side of an IPv6-over-BLE network: it
//! classifies IPv6 traffic crossing the host, redirects packets bound
//! for the BLE mesh to a listening side-channel consumer, and keeps
//! the pair of address lists that drive the classification. Platform
//! specifics (how classifiers hook the local stack, how packets are
//! re-injected, where the lists persist) enter through the traits in
//! [`engine::lifecycle`], [`engine::gateway`], and [`engine::persist`],
//! so the engine itself stays host-neutral.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[macro_use]
extern crate slog;

pub mod api;
pub mod engine;
pub mod sync;
