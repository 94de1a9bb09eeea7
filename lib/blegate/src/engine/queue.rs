// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The listen-request queue.
//!
//! A side-channel consumer parks listen requests here ahead of time;
//! the classifier completes them one per redirected packet, oldest
//! first. Nothing in the engine ever buffers a packet for a future
//! listener: a packet that finds the queue empty is dropped, so the
//! consumer keeps the queue primed with as many requests as it wants
//! packets in flight.

use crate::api::GatewayError;
use crate::api::SIDE_CHANNEL_MTU;
use crate::sync::ShortMutex;
use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc;

/// Identifies one listen request in logs and completions.
pub type RequestId = u64;

/// How a listen request ended: the redirected packet, or the error
/// that killed the transfer.
pub type ListenOutcome = Result<Vec<u8>, GatewayError>;

/// One parked listen request.
pub struct PendingListen {
    id: RequestId,
    capacity: usize,
    tx: mpsc::Sender<ListenOutcome>,
}

impl PendingListen {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The size of the buffer the consumer set aside for this
    /// request.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Deliver the outcome to the waiting consumer. Returns false if
    /// the consumer stopped waiting, in which case the outcome is
    /// dropped on the floor.
    pub fn complete(self, outcome: ListenOutcome) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

/// A FIFO of [`PendingListen`] requests shared between the admin
/// surface (which enqueues) and the classifier (which dequeues on the
/// packet path).
pub struct ListenQueue {
    next_id: AtomicU64,
    pending: ShortMutex<VecDeque<PendingListen>>,
}

impl Default for ListenQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenQueue {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: ShortMutex::new(VecDeque::new()),
        }
    }

    /// Park a new listen request whose buffer holds `capacity` bytes.
    ///
    /// The capacity must be exactly [`SIDE_CHANNEL_MTU`]: a smaller
    /// buffer could truncate a redirected packet, and a partial
    /// packet is useless to the mesh. The caller gets the request id
    /// and the channel on which the outcome will arrive.
    pub fn listen(
        &self,
        capacity: usize,
    ) -> Result<(RequestId, mpsc::Receiver<ListenOutcome>), GatewayError>
    {
        if capacity != SIDE_CHANNEL_MTU {
            return Err(GatewayError::BadListenCapacity {
                given: capacity,
                needed: SIDE_CHANNEL_MTU,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.pending.lock().push_back(PendingListen { id, capacity, tx });
        Ok((id, rx))
    }

    /// Pop the oldest pending request, if any.
    pub fn try_dequeue(&self) -> Option<PendingListen> {
        self.pending.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
