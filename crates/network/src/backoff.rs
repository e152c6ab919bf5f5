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

//! Exponential backoff with jitter for delegate-driven reconnects.
//!
//! The engine never retries on its own. A delegate which answers `need_reconnect() == true`
//! leaves the engine in RECONNECT, and whoever owns the retry policy asks an
//! [`ExponentialBackoff`] how long to wait before the next
//! [`crate::socket::SocketEngine::schedule_reconnect`].
//!
//! Delays grow by a factor up to a cap, with random jitter added to spread out reconnect
//! storms. With `immediate_first` the first attempt after a (re)start happens without delay.

use std::time::Duration;

use rand::Rng;

/// Computes successive reconnect delays.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    /// The initial backoff delay.
    delay_initial: Duration,
    /// The maximum delay to cap the backoff.
    delay_max: Duration,
    /// The current backoff delay.
    delay_current: Duration,
    /// The factor to multiply the delay on each iteration.
    factor: f64,
    /// The maximum random jitter to add (in milliseconds).
    jitter_ms: u64,
    /// Whether the first delay after construction or [`Self::reset`] is zero.
    immediate_first: bool,
    immediate_pending: bool,
    attempts: u32,
}

impl ExponentialBackoff {
    /// Creates a new [`ExponentialBackoff`] instance.
    #[must_use]
    pub const fn new(
        delay_initial: Duration,
        delay_max: Duration,
        factor: f64,
        jitter_ms: u64,
        immediate_first: bool,
    ) -> Self {
        Self {
            delay_initial,
            delay_max,
            delay_current: delay_initial,
            factor,
            jitter_ms,
            immediate_first,
            immediate_pending: immediate_first,
            attempts: 0,
        }
    }

    /// Returns the next delay with jitter and advances the internal state.
    pub fn next_duration(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);

        if self.immediate_pending {
            self.immediate_pending = false;
            return Duration::ZERO;
        }

        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.jitter_ms)
        };
        let delay_with_jitter = self.delay_current + Duration::from_millis(jitter);

        let next_nanos = (self.delay_current.as_nanos() as f64 * self.factor) as u128;
        self.delay_current = Duration::from_nanos(
            next_nanos.min(self.delay_max.as_nanos()).min(u128::from(u64::MAX)) as u64,
        );

        delay_with_jitter
    }

    /// Resets the backoff to its initial state, typically after a successful reconnect.
    pub const fn reset(&mut self) {
        self.delay_current = self.delay_initial;
        self.immediate_pending = self.immediate_first;
        self.attempts = 0;
    }

    /// Returns the base delay (without jitter) the next call will use.
    #[must_use]
    pub const fn current_delay(&self) -> Duration {
        self.delay_current
    }

    /// Returns the number of delays handed out since construction or the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}
