// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The packet-redirection engine.
//!
//! [`gateway::Gateway`] is the hub: it owns the two address lists,
//! the listen queue, and the classifier lifecycle, and it exposes the
//! administrative command surface. The packet path enters through
//! [`classify`], which consults the lists and hands redirected
//! packets to waiting listeners. [`flush`] writes dirty lists back to
//! the store on a timer.

pub mod classify;
pub mod flush;
pub mod gateway;
pub mod lifecycle;
pub mod list;
pub mod persist;
pub mod pkt;
pub mod queue;
