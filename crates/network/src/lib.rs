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

//! Asynchronous TCP connection engine for the sockline project.
//!
//! The `sockline-network` crate provides a reusable, per-connection TCP engine which turns a
//! raw byte stream into discrete application packets:
//!
//! - A home-thread [`EventLoop`](event_loop::EventLoop) running all I/O for a group of engines.
//! - A [`SocketEngine`](socket::SocketEngine) with lifecycle tracking, active connect with
//!   optional local bind, and exactly-once teardown with delegate-selected reconnect.
//! - Packet reassembly over a fixed-capacity buffer, with boundaries located by a
//!   [`Connection`](connection::Connection) delegate.
//! - Thread-safe sends through a double-buffered pending queue, plus multi-field sends of
//!   fixed-width scalars and byte strings.
//! - Exponential backoff with jitter for delegate-driven reconnects.

#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod backoff;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod reassembly;
pub mod socket;
pub mod status;

pub use crate::{
    codec::WireValue,
    config::SocketConfig,
    connection::{Connection, SocketEvent},
    error::{FramingError, SocketError},
    event_loop::EventLoop,
    socket::SocketEngine,
    status::SocketStatus,
};
