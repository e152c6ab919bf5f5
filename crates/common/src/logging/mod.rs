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

//! Tracing initialization for sockline processes.
//!
//! The engine crates log exclusively through the [`tracing`] facade, so the installed
//! subscriber is the only sink: nothing in the engine writes to stdout or a file directly.

use std::{
    env,
    sync::atomic::{AtomicBool, Ordering},
};

use tracing_subscriber::EnvFilter;

/// The environment variable holding the tracing filter directives.
pub const LOG_ENV_VAR: &str = "RUST_LOG";

pub const RECV: &str = "<--";
pub const SEND: &str = "-->";

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Returns whether a tracing subscriber was installed by [`init_tracing`].
pub fn tracing_is_initialized() -> bool {
    TRACING_INITIALIZED.load(Ordering::Relaxed)
}

/// Initialize tracing.
///
/// Filters are taken from the `RUST_LOG` environment variable, e.g.
/// `RUST_LOG=sockline_network=debug`. When the variable is not set this is a no-op.
///
/// # Errors
///
/// Returns an error if the filter directives are invalid or a global subscriber has
/// already been installed by someone else.
pub fn init_tracing() -> anyhow::Result<()> {
    // Skip tracing initialization if `RUST_LOG` is not set
    if let Ok(v) = env::var(LOG_ENV_VAR) {
        init_tracing_with_filter(&v)?;
    }
    Ok(())
}

/// Initialize tracing with explicit filter directives.
///
/// Calling this more than once is harmless: later calls return `Ok(())` without touching
/// the subscriber installed first.
///
/// # Errors
///
/// Returns an error if `directives` cannot be parsed or the global subscriber is already
/// owned by another library.
pub fn init_tracing_with_filter(directives: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(directives)
        .map_err(|e| anyhow::anyhow!("Invalid tracing filter '{directives}': {e}"))?;

    if TRACING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))?;

    tracing::debug!("Initialized tracing logs with {LOG_ENV_VAR}={directives}");
    Ok(())
}
