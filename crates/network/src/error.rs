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

//! Error types for the socket engine.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors returned by the [`crate::socket::SocketEngine`] surface.
///
/// Faults that happen *after* an operation was issued (read or write errors, framing errors)
/// are never returned here: they are funneled through the engine's close routine and
/// observed by the delegate as a `DISCONNECT` event.
#[derive(Debug, Error)]
pub enum SocketError {
    /// No live handle: never connected, or the handle has been closed.
    #[error("socket is not open")]
    NotOpen,

    /// `connect` was called while a connection is established or being established.
    #[error("socket is already connected")]
    AlreadyConnected,

    /// The engine reached the terminal CLOSED status and released its delegate.
    #[error("socket is closed")]
    Closed,

    /// Reconnect was requested before any connect target was recorded.
    #[error("no connect target recorded")]
    NoTarget,

    /// The local bind address could not be parsed.
    #[error("invalid local address '{addr}'")]
    InvalidAddress { addr: String },

    /// Name resolution failed or produced no usable address.
    #[error("failed to resolve '{target}': {source}")]
    Resolve {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Binding the local endpoint failed.
    #[error("failed to bind local endpoint {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The engine configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Any other I/O failure raised synchronously.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal framing outcomes of the reassembly loop.
///
/// Both variants tear the connection down: a single packet can never exceed the read buffer
/// capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FramingError {
    /// The delegate declared a packet longer than the read buffer can hold.
    #[error("declared packet length {declared} exceeds buffer capacity {capacity}")]
    Oversize { declared: usize, capacity: usize },

    /// The buffer filled up without the delegate ever locating a complete packet.
    #[error("read buffer of {capacity} bytes is full without a complete packet")]
    BufferFull { capacity: usize },
}
