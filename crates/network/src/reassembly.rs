// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Sockline Developers. All rights reserved.
//  https://github.com/sockline/sockline
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Fixed-capacity read buffer and packet reassembly.
//!
//! Reads land directly in the spare tail of a single contiguous buffer. After every read the
//! delegate is asked where the next packet ends; complete packets are handed over as slices of
//! the buffer and the unread suffix is moved to the front, so no byte is lost or duplicated
//! across read boundaries.
//!
//! # Behavior
//!
//! - The buffer never grows. Its capacity is the hard ceiling on a single undelivered packet.
//! - A declared length above capacity is fatal ([`FramingError::Oversize`]) and nothing of
//!   that packet is delivered.
//! - A buffer that fills up without a deliverable packet is fatal ([`FramingError::BufferFull`]).
//! - Packets are delivered by length as `[offset, offset + len)`. The buffer contents are
//!   never patched.

use crate::{
    connection::{Connection, SocketEvent},
    error::FramingError,
};

/// The default read buffer capacity (8 KiB).
pub const DEFAULT_READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// A fixed-capacity receive buffer with a cursor marking the end of unconsumed bytes.
#[derive(Debug)]
pub struct ReadBuffer {
    data: Box<[u8]>,
    read_pos: usize,
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_READ_BUFFER_CAPACITY)
    }
}

impl ReadBuffer {
    /// Creates a new [`ReadBuffer`] instance.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            read_pos: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Returns the number of buffered, not yet consumed bytes.
    #[inline]
    #[must_use]
    pub const fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Returns the buffered, not yet consumed bytes.
    #[inline]
    #[must_use]
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.read_pos]
    }

    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.read_pos >= self.data.len()
    }

    /// Returns the free tail of the buffer, the target of the next read.
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.read_pos..]
    }

    /// Discards all buffered bytes.
    #[inline]
    pub const fn reset(&mut self) {
        self.read_pos = 0;
    }

    /// Handles the completion of a read of `nread` bytes into [`Self::spare_mut`].
    ///
    /// Fires [`SocketEvent::Recv`], advances the cursor and runs the reassembly loop.
    /// Returns the number of packets delivered. A zero-length read is ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`FramingError`] when the connection must be torn down.
    ///
    /// A `nread` larger than the spare capacity is clamped to it.
    pub fn on_read<C>(&mut self, nread: usize, conn: &C) -> Result<usize, FramingError>
    where
        C: Connection + ?Sized,
    {
        if nread == 0 {
            return Ok(0);
        }
        let spare = self.data.len() - self.read_pos;
        if nread > spare {
            tracing::warn!(
                "Read of {nread} bytes exceeds spare capacity {spare}, clamping at {}/{}",
                self.read_pos,
                self.data.len()
            );
        }

        conn.process_event(SocketEvent::Recv);
        self.read_pos += nread.min(spare);
        self.process(conn)
    }

    /// Extracts every complete packet currently buffered.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Oversize`] if the delegate declares a packet longer than the
    /// capacity, and [`FramingError::BufferFull`] if the buffer is left full.
    pub fn process<C>(&mut self, conn: &C) -> Result<usize, FramingError>
    where
        C: Connection + ?Sized,
    {
        let capacity = self.data.len();
        let mut offset = 0;
        let mut delivered = 0;

        while offset < self.read_pos {
            let available = &self.data[offset..self.read_pos];
            let len = match conn.process_package(available) {
                Some(len) if len > capacity => {
                    tracing::error!(
                        "Single packet size ({len}) exceeds buffer capacity ({capacity}), closing connection"
                    );
                    return Err(FramingError::Oversize {
                        declared: len,
                        capacity,
                    });
                }
                Some(len) if len > 0 => len,
                _ => break,
            };

            if len > available.len() {
                // Incomplete packet, wait for more data
                break;
            }

            tracing::trace!(
                "Extracted packet of {len} bytes at offset {offset}, read pos {}",
                self.read_pos
            );
            conn.process_data(&available[..len]);
            offset += len;
            delivered += 1;
        }

        if offset == self.read_pos {
            self.read_pos = 0;
        } else if offset > 0 {
            tracing::trace!("Moving {} bytes to buffer front", self.read_pos - offset);
            self.data.copy_within(offset..self.read_pos, 0);
            self.read_pos -= offset;
        }

        if self.is_full() {
            tracing::warn!(
                "Read buffer of {capacity} bytes is full without a complete packet, closing connection"
            );
            return Err(FramingError::BufferFull { capacity });
        }

        Ok(delivered)
    }
}
