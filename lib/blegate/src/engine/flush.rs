// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The list flush worker.
//!
//! List mutations happen on the admin path but the store may be slow,
//! so saves are decoupled: mutations mark the list dirty and this
//! worker writes dirty lists out on a fixed cadence. The cost of the
//! scheme is a bounded window (one interval) in which a crash loses
//! the latest mutations; [`FlushWorker::shutdown`] closes that window
//! for orderly exits with a final pass.

use crate::engine::gateway::Gateway;
use std::sync::Arc;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;

/// Handle to the background flusher. Dropping it stops the thread
/// after one final flush.
pub struct FlushWorker {
    tx: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FlushWorker {
    /// Spawn the worker, waking every `interval` to flush `gw`'s
    /// lists.
    pub fn spawn(
        gw: Arc<Gateway>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let log = gw.log().new(o!("unit" => "flush"));

        let handle = thread::Builder::new()
            .name("blegate-flush".to_string())
            .spawn(move || {
                debug!(
                    log, "flush worker running";
                    "interval_ms" => interval.as_millis() as u64,
                );
                loop {
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => gw.flush_lists(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                // One final pass so nothing dirty is left behind.
                gw.flush_lists();
                debug!(log, "flush worker stopped");
            })?;

        Ok(Self { tx, handle: Some(handle) })
    }

    /// Stop the worker and wait for its final flush to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(());
            let _ = handle.join();
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
