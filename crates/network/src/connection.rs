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

//! The delegate interface through which the engine hands control to the application.
//!
//! The engine never interprets packet contents. It sequences calls on a [`Connection`]:
//! the delegate locates packet boundaries, consumes packet payloads, decides whether a
//! dropped connection should be kept for a reconnect, and gives up its back-reference to
//! the engine when the engine reaches its terminal status.
//!
//! Every method is invoked on the engine's home thread.

use strum::{AsRefStr, Display};

/// Observer notifications fired by the engine.
#[derive(Clone, Copy, Debug, Display, Hash, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SocketEvent {
    /// The connection was established; fired once, before the first read is armed.
    Connect,
    /// Bytes were received; fired once per read completion, before reassembly.
    Recv,
    /// The connection went down; fired once per teardown.
    Disconnect,
}

/// The connection object driven by a [`crate::socket::SocketEngine`].
///
/// Implementations use interior mutability: the engine shares the delegate through an
/// `Arc` and calls it by shared reference.
pub trait Connection: Send + Sync + 'static {
    /// Observes a lifecycle or I/O event.
    fn process_event(&self, event: SocketEvent);

    /// Returns the length of the next packet at the start of `data`.
    ///
    /// - `None` (or `Some(0)`): not enough data yet.
    /// - `Some(len)` with `len <= capacity`: a packet of `len` bytes starts at `data[0]`, it may
    ///   not be fully buffered yet.
    /// - `Some(len)` with `len > capacity`: fatal framing error, the connection is closed.
    fn process_package(&self, data: &[u8]) -> Option<usize>;

    /// Consumes exactly one packet.
    fn process_data(&self, packet: &[u8]);

    /// Delegate-driven teardown, fired on a fatal framing error.
    fn close(&self);

    /// Asked once per teardown: keep this delegate for a new connection instead of releasing it.
    fn need_reconnect(&self) -> bool {
        false
    }

    /// Fired exactly once when the engine reaches CLOSED, right before the engine drops its
    /// reference. Implementations drop any handle they hold on the engine here.
    fn release(&self) {}
}
