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

//! Configuration for socket engines.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    backoff::ExponentialBackoff, error::SocketError, reassembly::DEFAULT_READ_BUFFER_CAPACITY,
};

/// Configuration for a [`crate::socket::SocketEngine`].
///
/// Every field has a default, so a partial TOML or JSON document deserializes into a complete
/// configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketConfig {
    /// The read buffer capacity, also the maximum size of a single packet.
    pub read_buffer_capacity: usize,
    /// The initial reservation (bytes) of the pending and in-flight send buffers.
    pub send_buffer_reserve: usize,
    /// Whether to set `TCP_NODELAY` on established connections.
    pub tcp_nodelay: bool,
    /// The optional timeout (milliseconds) for each connect attempt.
    pub connect_timeout_ms: Option<u64>,
    /// The initial reconnection delay (milliseconds) for reconnects.
    pub reconnect_delay_initial_ms: u64,
    /// The maximum reconnect delay (milliseconds) for exponential backoff.
    pub reconnect_delay_max_ms: u64,
    /// The exponential backoff factor for reconnection delays.
    pub reconnect_backoff_factor: f64,
    /// The maximum jitter (milliseconds) added to reconnection delays.
    pub reconnect_jitter_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            read_buffer_capacity: DEFAULT_READ_BUFFER_CAPACITY,
            send_buffer_reserve: 1024,
            tcp_nodelay: false,
            connect_timeout_ms: None,
            reconnect_delay_initial_ms: 2_000,
            reconnect_delay_max_ms: 30_000,
            reconnect_backoff_factor: 1.5,
            reconnect_jitter_ms: 100,
        }
    }
}

impl SocketConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), SocketError> {
        if self.read_buffer_capacity == 0 {
            return Err(SocketError::Config(
                "read_buffer_capacity must be positive".to_string(),
            ));
        }
        if !(1.0..=100.0).contains(&self.reconnect_backoff_factor) {
            return Err(SocketError::Config(format!(
                "reconnect_backoff_factor must be in [1.0, 100.0], was {}",
                self.reconnect_backoff_factor
            )));
        }
        if self.reconnect_delay_initial_ms > self.reconnect_delay_max_ms {
            return Err(SocketError::Config(format!(
                "reconnect_delay_initial_ms ({}) exceeds reconnect_delay_max_ms ({})",
                self.reconnect_delay_initial_ms, self.reconnect_delay_max_ms
            )));
        }
        Ok(())
    }

    /// Returns the connect timeout, if any.
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Builds a fresh backoff from the reconnect settings, immediate on first use.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.reconnect_delay_initial_ms),
            Duration::from_millis(self.reconnect_delay_max_ms),
            self.reconnect_backoff_factor,
            self.reconnect_jitter_ms,
            true, // immediate-first
        )
    }
}
