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

//! Common test related helper functions.

use std::{
    future::Future,
    thread,
    time::{Duration, Instant},
};

use crate::logging::init_tracing_with_filter;

/// Installs a tracing subscriber for tests, defaulting to `debug` when `RUST_LOG` is unset.
///
/// # Errors
///
/// Returns an error if the filter directives taken from `RUST_LOG` are invalid.
pub fn init_tracing_for_testing() -> anyhow::Result<()> {
    let directives = std::env::var(crate::logging::LOG_ENV_VAR).unwrap_or_else(|_| "debug".into());
    init_tracing_with_filter(&directives)
}

/// Repeatedly evaluates a condition with a delay until it becomes true or a timeout occurs.
///
/// # Panics
///
/// This function will panic if the timeout duration is exceeded without the condition being met.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, Instant};
/// use sockline_common::testing::wait_until;
///
/// let start_time = Instant::now();
/// let timeout = Duration::from_secs(5);
///
/// wait_until(|| start_time.elapsed() > Duration::from_millis(200), timeout);
/// ```
///
/// In the above example, the `wait_until` function will block for at least 200 milliseconds,
/// as that's how long it takes for the condition to be met.
pub fn wait_until<F>(mut condition: F, timeout: Duration)
where
    F: FnMut() -> bool,
{
    let start_time = Instant::now();

    loop {
        if condition() {
            break;
        }

        assert!(
            start_time.elapsed() <= timeout,
            "Timeout waiting for condition"
        );

        thread::sleep(Duration::from_millis(10));
    }
}

/// Async variant of [`wait_until`] which yields to the runtime between evaluations.
///
/// # Panics
///
/// This function will panic if the timeout duration is exceeded without the condition being met.
pub async fn wait_until_async<F, Fut>(mut condition: F, timeout: Duration)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start_time = Instant::now();

    loop {
        if condition().await {
            break;
        }

        assert!(
            start_time.elapsed() <= timeout,
            "Timeout waiting for condition"
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
