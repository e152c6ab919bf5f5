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

use std::sync::atomic::{AtomicU8, Ordering};

use strum::{AsRefStr, Display, EnumString};

/// Lifecycle status of a [`crate::socket::SocketEngine`].
///
/// The status is stored in an `AtomicU8` so that any thread can observe it, while only the
/// home thread performs transitions (apart from the force-close entry point, which marks
/// `Closing` from the calling thread).
///
/// ```text
/// IDLE -> INIT -> OPEN -> CLOSING -> RECONNECT | CLOSED
///          ^                            |
///          +-------- connect() ---------+
/// ```
#[derive(Clone, Copy, Debug, Default, Display, Hash, PartialEq, Eq, AsRefStr, EnumString)]
#[repr(u8)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SocketStatus {
    /// Not yet constructed for use.
    #[default]
    Idle = 0,
    /// Constructed, no connection established yet.
    Init = 1,
    /// Connected with a read armed; the only status in which I/O is issued freely.
    Open = 2,
    /// A forced close was requested and teardown is in progress.
    Closing = 3,
    /// The delegate asked to keep itself for a new connection.
    Reconnect = 4,
    /// Terminal. The handle is closed and the delegate released.
    Closed = 5,
}

impl SocketStatus {
    /// Convert a u8 to [`SocketStatus`], useful when loading from an `AtomicU8`.
    ///
    /// # Panics
    ///
    /// Panics if `value` does not correspond to a status.
    #[inline]
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Init,
            2 => Self::Open,
            3 => Self::Closing,
            4 => Self::Reconnect,
            5 => Self::Closed,
            _ => panic!("Invalid `SocketStatus` value: {value}"),
        }
    }

    #[inline]
    pub fn from_atomic(value: &AtomicU8) -> Self {
        Self::from_u8(value.load(Ordering::SeqCst))
    }

    /// Convert a [`SocketStatus`] to a u8, useful when storing to an `AtomicU8`.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn store(self, value: &AtomicU8) {
        value.store(self.as_u8(), Ordering::SeqCst);
    }

    #[inline]
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true once teardown has started or finished; further close requests are no-ops.
    #[inline]
    #[must_use]
    pub const fn is_closing_or_closed(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Returns true if a new connection may be issued from this status.
    #[inline]
    #[must_use]
    pub const fn can_connect(&self) -> bool {
        matches!(self, Self::Idle | Self::Init | Self::Reconnect)
    }
}
