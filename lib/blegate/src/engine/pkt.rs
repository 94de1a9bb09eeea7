// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Segmented packet buffers.
//!
//! Packets arrive from the platform as a chain of buffer segments
//! with a cursor marking how much leading header the stack has
//! already consumed. The classifier needs to look backward past that
//! cursor (the IP header holds the destination) and the redirector
//! needs to flatten the whole packet, headers included, into the
//! single contiguous buffer a listener supplied. [`SegPacket`] is
//! that view: cheap cursor motion over the chain, plus one copy at
//! the very end.

use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum MarshalError {
    #[error("cannot retreat {wanted} bytes, headroom is {headroom}")]
    NoHeadroom { wanted: usize, headroom: usize },

    #[error("packet length overflows")]
    LengthOverflow,

    #[error("read of {wanted} bytes at offset {offset} runs past the end")]
    OutOfBounds { offset: usize, wanted: usize },
}

/// A packet as a chain of owned segments plus a cursor.
///
/// The cursor is a logical offset into the concatenation of all
/// segments; bytes before it are consumed headers, bytes at and after
/// it are the visible payload. `retreat` moves the cursor toward the
/// front of the packet, re-exposing header bytes; `advance` moves it
/// back. Neither copies anything.
#[derive(Clone, Debug)]
pub struct SegPacket {
    segs: Vec<Vec<u8>>,
    cursor: usize,
}

impl SegPacket {
    /// Wrap a contiguous wire-format packet. The cursor starts at the
    /// front, with no consumed header.
    pub fn from_wire_bytes(bytes: Vec<u8>) -> Self {
        Self { segs: vec![bytes], cursor: 0 }
    }

    /// Build a packet out of `segs` with `cursor` bytes of already
    /// consumed header. A cursor past the end is clamped to it.
    pub fn from_segments(segs: Vec<Vec<u8>>, cursor: usize) -> Self {
        let total: usize = segs.iter().map(Vec::len).sum();
        Self { segs, cursor: cursor.min(total) }
    }

    fn total_len(&self) -> usize {
        self.segs.iter().map(Vec::len).sum()
    }

    /// The number of visible bytes, cursor to end of chain.
    pub fn byte_len(&self) -> usize {
        self.total_len() - self.cursor
    }

    /// The number of consumed header bytes the cursor can retreat
    /// over.
    pub fn headroom(&self) -> usize {
        self.cursor
    }

    /// Move the cursor `n` bytes toward the front of the packet. On
    /// failure the cursor does not move.
    pub fn retreat(&mut self, n: usize) -> Result<(), MarshalError> {
        match self.cursor.checked_sub(n) {
            Some(cursor) => {
                self.cursor = cursor;
                Ok(())
            }
            None => Err(MarshalError::NoHeadroom {
                wanted: n,
                headroom: self.cursor,
            }),
        }
    }

    /// Move the cursor `n` bytes toward the end of the packet,
    /// clamping at the end of the chain.
    pub fn advance(&mut self, n: usize) {
        let total = self.total_len();
        debug_assert!(self.cursor.saturating_add(n) <= total);
        self.cursor = self.cursor.saturating_add(n).min(total);
    }

    /// Copy `out.len()` bytes starting `offset` bytes past the
    /// cursor, crossing segment boundaries as needed.
    pub fn read_at(
        &self,
        offset: usize,
        out: &mut [u8],
    ) -> Result<(), MarshalError> {
        let mut pos = self
            .cursor
            .checked_add(offset)
            .ok_or(MarshalError::LengthOverflow)?;
        let mut copied = 0;

        for seg in &self.segs {
            if copied == out.len() {
                break;
            }
            if pos >= seg.len() {
                pos -= seg.len();
                continue;
            }
            let take = usize::min(seg.len() - pos, out.len() - copied);
            out[copied..copied + take]
                .copy_from_slice(&seg[pos..pos + take]);
            copied += take;
            pos = 0;
        }

        if copied == out.len() {
            Ok(())
        } else {
            Err(MarshalError::OutOfBounds { offset, wanted: out.len() })
        }
    }

    /// Flatten the packet into a single contiguous buffer, first
    /// reclaiming `header_reclaim` bytes of consumed header so the
    /// output starts at the IP header.
    ///
    /// The output is allocated zeroed at the exact final size, with
    /// every length computed by checked arithmetic, and is filled
    /// segment by segment in chain order. The cursor is restored
    /// before returning, on success and failure alike.
    pub fn to_wire_bytes(
        &mut self,
        header_reclaim: usize,
    ) -> Result<Vec<u8>, MarshalError> {
        self.retreat(header_reclaim)?;
        let res = self.copy_visible();
        self.advance(header_reclaim);
        res
    }

    fn copy_visible(&self) -> Result<Vec<u8>, MarshalError> {
        let total = self.segs.iter().try_fold(0usize, |acc, seg| {
            acc.checked_add(seg.len()).ok_or(MarshalError::LengthOverflow)
        })?;
        // cursor <= total always holds, so this cannot underflow.
        let len = total - self.cursor;
        let mut out = vec![0u8; len];

        let mut pos = self.cursor;
        let mut copied = 0;
        for seg in &self.segs {
            if pos >= seg.len() {
                pos -= seg.len();
                continue;
            }
            let take = seg.len() - pos;
            out[copied..copied + take].copy_from_slice(&seg[pos..]);
            copied += take;
            pos = 0;
        }

        Ok(out)
    }
}
