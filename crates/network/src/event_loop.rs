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

//! The home thread of a group of socket engines.
//!
//! An [`EventLoop`] owns one OS thread driving a current-thread Tokio runtime. Every task
//! spawned on it (reads, writes, close continuations, work posted by other threads) runs on
//! that single thread, which gives the engines their single-threaded, cooperative execution
//! model: nothing scheduled here ever runs concurrently with anything else scheduled here.

use std::{
    fmt::Debug,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle, ThreadId},
};

use tokio::{runtime::Handle, sync::oneshot, task};

/// A single-threaded reactor running on a dedicated thread.
pub struct EventLoop {
    name: String,
    handle: Handle,
    thread_id: ThreadId,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(EventLoop))
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

impl EventLoop {
    /// Starts a new event loop thread named `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built or the thread cannot be spawned.
    pub fn start(name: &str) -> std::io::Result<Arc<Self>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                tracing::debug!("Started event loop '{thread_name}'");
                // Resolves on shutdown, or when the sender is dropped with the loop
                let _ = runtime.block_on(shutdown_rx);
                tracing::debug!("Stopped event loop '{thread_name}'");
            })?;

        Ok(Arc::new(Self {
            name: name.to_string(),
            handle,
            thread_id: thread.thread().id(),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// Returns the name of the loop thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the identity of the home thread.
    #[must_use]
    pub const fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Returns a handle to the loop's runtime.
    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Returns true when called from the home thread.
    #[inline]
    #[must_use]
    pub fn is_in_loop(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Posts `future` to run on the home thread.
    ///
    /// Never runs the future inline, even when called from the home thread.
    pub fn spawn<F>(&self, future: F) -> task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs `f` on the home thread: inline when already there, posted otherwise.
    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_in_loop() {
            f();
        } else {
            self.handle.spawn(async move { f() });
        }
    }

    /// Stops the loop and waits for its thread to exit. Pending tasks are dropped.
    ///
    /// Calling this from the home thread only signals the loop, it cannot wait for itself.
    pub fn shutdown(&self) {
        if let Some(tx) = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }

        if self.is_in_loop() {
            return;
        }

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread
            && thread.join().is_err()
        {
            tracing::error!("Event loop '{}' thread panicked", self.name);
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
