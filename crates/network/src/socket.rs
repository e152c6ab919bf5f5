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

//! Asynchronous TCP connection engine with delegate-driven packet reassembly.
//!
//! **Key features**:
//! - Lifecycle tracking (IDLE/INIT/OPEN/CLOSING/RECONNECT/CLOSED) in an atomic status
//! - Active connect with optional local bind and per-endpoint fallback
//! - Fixed-capacity read buffer with reassembly delegated to a [`Connection`]
//! - Thread-safe writes through a double-buffered pending queue
//! - Exactly-once teardown with delegate-selected reconnect
//!
//! **Design**:
//! - Every engine is bound to one [`EventLoop`] thread (its home thread) which runs all I/O,
//!   state transitions and delegate callbacks
//! - Read half runs in a dedicated task on the home thread
//! - Write half runs in a dedicated task on the home thread, fed by an ordered command channel
//! - Foreign threads append to the pending buffer under a short lock and post a flush; the
//!   writer swaps the whole buffer out in O(1) and writes it without holding the lock
//! - Every task holds an `Arc` to the engine, so an engine outlives all its pending I/O
//! - Closing the handle aborts the read task and cancels the writer, even mid-write, so no task
//!   outlives the handle
//!
//! **Write ordering**: home-thread sends are written in call order, and so are the sends of any
//! single foreign thread. Buffered bytes are written when the writer processes the next flush,
//! so bytes of the two paths are ordered by when the writer observes them, not by call time.

use std::{
    fmt::Debug,
    io,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    sync::{
        Arc, Mutex, PoisonError, TryLockError,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use sockline_common::logging::{RECV, SEND};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpSocket, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    backoff::ExponentialBackoff,
    codec::{WireValue, encode_values},
    config::SocketConfig,
    connection::{Connection, SocketEvent},
    error::{FramingError, SocketError},
    event_loop::EventLoop,
    reassembly::ReadBuffer,
    status::SocketStatus,
};

type TcpReader = OwnedReadHalf;
type TcpWriter = OwnedWriteHalf;

/// Represents a command for the writer task.
///
/// The writer stops when its channel closes or when its connection is cancelled, whichever
/// comes first. Cancellation interrupts a write in progress.
#[derive(Debug)]
pub enum WriterCommand {
    /// Write bytes submitted on the home thread.
    Send(Bytes),
    /// Drain the pending buffer.
    Flush,
}

/// The arguments of the last `connect`, reused by `reconnect`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ConnectTarget {
    host: String,
    port: u16,
    local_addr: String,
    local_port: u16,
}

#[derive(Debug, Default)]
struct HandleState {
    read_task: Option<JoinHandle<()>>,
    writer_cancel: Option<oneshot::Sender<()>>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

/// A reusable, per-connection TCP engine.
///
/// The engine owns the socket, drives reads into a fixed-capacity buffer, asks its delegate
/// where packets end, and serializes writes from any thread into one ordered byte stream.
/// Create it with [`SocketEngine::new`], then call [`SocketEngine::connect`].
pub struct SocketEngine<C: Connection> {
    event_loop: Arc<EventLoop>,
    config: SocketConfig,
    status: AtomicU8,
    handle_open: AtomicBool,
    connecting: AtomicBool,
    teardown: AtomicBool,
    flush_scheduled: AtomicBool,
    epoch: AtomicU64,
    connection: Mutex<Option<Arc<C>>>,
    send_buffer: Mutex<BytesMut>,
    writer_tx: Mutex<Option<mpsc::UnboundedSender<WriterCommand>>>,
    handle: Mutex<HandleState>,
    target: Mutex<Option<ConnectTarget>>,
}

impl<C: Connection> Debug for SocketEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(SocketEngine))
            .field("event_loop", &self.event_loop.name())
            .field("status", &self.status())
            .field("handle_open", &self.handle_open.load(Ordering::SeqCst))
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<C: Connection> SocketEngine<C> {
    /// Creates a new engine in INIT status, bound to `event_loop` and driving `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Config`] if `config` is invalid.
    pub fn new(
        event_loop: Arc<EventLoop>,
        config: SocketConfig,
        connection: Arc<C>,
    ) -> Result<Arc<Self>, SocketError> {
        config.validate()?;

        let reserve = config.send_buffer_reserve;
        Ok(Arc::new(Self {
            event_loop,
            config,
            status: AtomicU8::new(SocketStatus::Init.as_u8()),
            handle_open: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            teardown: AtomicBool::new(false),
            flush_scheduled: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            connection: Mutex::new(Some(connection)),
            send_buffer: Mutex::new(BytesMut::with_capacity(reserve)),
            writer_tx: Mutex::new(None),
            handle: Mutex::new(HandleState::default()),
            target: Mutex::new(None),
        }))
    }

    /// Returns the current lifecycle status.
    #[must_use]
    pub fn status(&self) -> SocketStatus {
        SocketStatus::from_atomic(&self.status)
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Returns the home event loop.
    #[must_use]
    pub const fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    /// Returns true when called from the home thread.
    #[inline]
    #[must_use]
    pub fn is_in_loop(&self) -> bool {
        self.event_loop.is_in_loop()
    }

    /// Check if the connection is usable for send/receive decisions.
    ///
    /// Returns `true` only when the handle is open *and* the status is exactly OPEN.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle_open.load(Ordering::SeqCst) && self.status().is_open()
    }

    /// Returns the number of bytes waiting in the pending buffer.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.send_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns the local endpoint of the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::NotOpen`] if there is no live handle.
    pub fn local_endpoint(&self) -> Result<SocketAddr, SocketError> {
        if !self.handle_open.load(Ordering::SeqCst) {
            return Err(SocketError::NotOpen);
        }
        self.lock_handle().local_addr.ok_or(SocketError::NotOpen)
    }

    /// Returns the remote endpoint of the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::NotOpen`] if there is no live handle.
    pub fn remote_endpoint(&self) -> Result<SocketAddr, SocketError> {
        if !self.handle_open.load(Ordering::SeqCst) {
            return Err(SocketError::NotOpen);
        }
        self.lock_handle().peer_addr.ok_or(SocketError::NotOpen)
    }

    /// Runs `f` on the home thread: inline when already there, posted otherwise.
    ///
    /// Use this to mutate delegate state safely from other threads.
    pub fn run_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.event_loop.dispatch(f);
    }

    /// Builds a reconnect backoff from the engine configuration.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        self.config.backoff()
    }

    fn connection(&self) -> Option<Arc<C>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, HandleState> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------------------------------
    // Connect
    // ---------------------------------------------------------------------------------------

    /// Connect to `host:port`, optionally binding `local_addr:local_port` first.
    ///
    /// The name is resolved on the calling thread. When `local_port > 0` the local endpoint is
    /// bound before connecting and only remote addresses of the same family are tried. The
    /// connect itself runs on the home thread, trying each resolved address in turn.
    ///
    /// `Ok(())` means the attempt was *issued*. Success is signalled to the delegate by a
    /// [`SocketEvent::Connect`]; on failure no event fires and the status is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is closed or already connected, the local address is
    /// invalid, resolution fails, or the local bind fails.
    pub fn connect(
        self: &Arc<Self>,
        host: &str,
        port: u16,
        local_addr: &str,
        local_port: u16,
    ) -> Result<(), SocketError> {
        let status = self.status();
        if status == SocketStatus::Closed {
            return Err(SocketError::Closed);
        }
        if !status.can_connect() || self.connecting.swap(true, Ordering::SeqCst) {
            return Err(SocketError::AlreadyConnected);
        }

        let target = ConnectTarget {
            host: host.to_string(),
            port,
            local_addr: local_addr.to_string(),
            local_port,
        };

        match prepare_connect(&target) {
            Ok((addrs, local, socket)) => {
                *self.target.lock().unwrap_or_else(PoisonError::into_inner) = Some(target);
                let engine = self.clone();
                self.event_loop.spawn(async move {
                    engine.run_connect(addrs, local, socket).await;
                });
                Ok(())
            }
            Err(e) => {
                self.connecting.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Re-issues [`Self::connect`] with the arguments of the last call.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::NoTarget`] if `connect` was never called, otherwise any error
    /// of [`Self::connect`].
    pub fn reconnect(self: &Arc<Self>) -> Result<(), SocketError> {
        let target = self
            .target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SocketError::NoTarget)?;
        tracing::debug!("Reconnecting to {}:{}", target.host, target.port);
        self.connect(&target.host, target.port, &target.local_addr, target.local_port)
    }

    /// Runs [`Self::reconnect`] on the home thread after `delay`.
    ///
    /// Intended for delegates which answered `need_reconnect() == true`, typically with a
    /// delay taken from [`Self::backoff`].
    pub fn schedule_reconnect(self: &Arc<Self>, delay: Duration) {
        let engine = self.clone();
        self.event_loop.spawn(async move {
            if !delay.is_zero() {
                tracing::debug!("Reconnecting in {}s", delay.as_secs_f64());
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = engine.reconnect() {
                tracing::warn!("Reconnect attempt failed: {e}");
            }
        });
    }

    async fn run_connect(
        self: Arc<Self>,
        addrs: Vec<SocketAddr>,
        local: Option<SocketAddr>,
        first: TcpSocket,
    ) {
        let timeout = self.config.connect_timeout();
        let mut socket = Some(first);

        for addr in &addrs {
            let attempt = match socket.take() {
                Some(socket) => socket,
                None => match open_socket(*addr, local) {
                    Ok(socket) => socket,
                    Err(e) => {
                        tracing::warn!("Cannot open socket for {addr}: {e}");
                        break;
                    }
                },
            };

            match connect_socket(attempt, *addr, timeout).await {
                Ok(stream) => {
                    tracing::debug!("Connected to {addr}");
                    self.connecting.store(false, Ordering::SeqCst);
                    self.on_connected(stream);
                    return;
                }
                Err(e) => tracing::debug!("Connect to {addr} failed: {e}"),
            }
        }

        tracing::error!("Connect failed, tried {} address(es)", addrs.len());
        self.connecting.store(false, Ordering::SeqCst);
    }

    fn on_connected(self: &Arc<Self>, stream: TcpStream) {
        let status = self.status();
        if status.is_closing_or_closed() {
            tracing::debug!("Discarding connection established in {status} status");
            return;
        }

        if self.config.tcp_nodelay
            && let Err(e) = stream.set_nodelay(true)
        {
            tracing::warn!("Failed to set TCP_NODELAY: {e}");
        }

        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        *self.writer_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(writer_tx);
        self.spawn_write_task(epoch, writer, writer_rx, cancel_rx);

        {
            let mut handle = self.lock_handle();
            handle.writer_cancel = Some(cancel_tx);
            handle.local_addr = local_addr;
            handle.peer_addr = peer_addr;
        }
        self.teardown.store(false, Ordering::SeqCst);
        self.flush_scheduled.store(false, Ordering::SeqCst);
        self.handle_open.store(true, Ordering::SeqCst);

        self.init_read(epoch, reader);

        // Bytes buffered while disconnected go out on the new connection
        if self.pending_len() > 0 {
            self.request_flush();
        }
    }

    fn init_read(self: &Arc<Self>, epoch: u64, reader: TcpReader) {
        let Some(conn) = self.connection() else {
            tracing::warn!("No connection delegate, not reading");
            return;
        };

        conn.process_event(SocketEvent::Connect);

        // The delegate may have closed us from its CONNECT handler
        if !self.handle_open.load(Ordering::SeqCst) || self.status().is_closing_or_closed() {
            return;
        }

        SocketStatus::Open.store(&self.status);
        let read_task = self.spawn_read_task(epoch, reader);
        self.lock_handle().read_task = Some(read_task);
    }

    // ---------------------------------------------------------------------------------------
    // Read
    // ---------------------------------------------------------------------------------------

    fn spawn_read_task(self: &Arc<Self>, epoch: u64, mut reader: TcpReader) -> JoinHandle<()> {
        tracing::debug!("Started task 'read'");
        let engine = self.clone();

        self.event_loop.spawn(async move {
            let mut buffer = ReadBuffer::new(engine.config.read_buffer_capacity);

            loop {
                match reader.read(buffer.spare_mut()).await {
                    Ok(0) => {
                        tracing::debug!("Connection closed by peer");
                        engine.close_on_error(epoch);
                        break;
                    }
                    Err(e) => {
                        tracing::debug!("Read error, closing connection: {e}");
                        engine.close_on_error(epoch);
                        break;
                    }
                    Ok(nread) => {
                        tracing::trace!("{RECV} {nread} bytes");
                        let Some(conn) = engine.connection() else {
                            break;
                        };

                        match buffer.on_read(nread, &*conn) {
                            Ok(_) => {}
                            Err(FramingError::Oversize { .. }) => {
                                conn.close();
                                engine.close_on_error(epoch);
                                break;
                            }
                            Err(FramingError::BufferFull { .. }) => {
                                engine.close_on_error(epoch);
                                break;
                            }
                        }
                    }
                }
            }

            tracing::debug!("Completed task 'read'");
        })
    }

    // ---------------------------------------------------------------------------------------
    // Write
    // ---------------------------------------------------------------------------------------

    /// Sends `data` to the peer.
    ///
    /// On the home thread the bytes are handed straight to the writer. On any other thread
    /// they are appended to the pending buffer and a flush is posted to the home thread. The
    /// call never waits for the network. `Ok(())` means accepted, not delivered.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::NotOpen`] if there is no live handle.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<(), SocketError> {
        if !self.handle_open.load(Ordering::SeqCst) {
            return Err(SocketError::NotOpen);
        }

        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }

        if self.is_in_loop() {
            self.send_command(WriterCommand::Send(data))
        } else {
            self.push_values(std::slice::from_ref(&WireValue::Bytes(data)));
            Ok(())
        }
    }

    /// Sends `values` concatenated in order, scalars in their native fixed-width form.
    ///
    /// Nothing is sent when the first value is an empty byte string.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::NotOpen`] if there is no live handle.
    pub fn send_fields(&self, values: &[WireValue]) -> Result<(), SocketError> {
        if !self.handle_open.load(Ordering::SeqCst) {
            return Err(SocketError::NotOpen);
        }

        match values.first() {
            None => return Ok(()),
            Some(first) if first.is_empty() => return Ok(()),
            Some(_) => {}
        }

        if self.is_in_loop() {
            let mut buf = BytesMut::new();
            encode_values(values, &mut buf);
            self.send_command(WriterCommand::Send(buf.freeze()))
        } else {
            self.push_values(values);
            Ok(())
        }
    }

    fn push_values(&self, values: &[WireValue]) {
        {
            let mut pending = self
                .send_buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            encode_values(values, &mut pending);
        }
        self.request_flush();
    }

    fn request_flush(&self) {
        if self.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.send_command(WriterCommand::Flush).is_err() {
            // No writer, the bytes stay pending until the next connection
            self.flush_scheduled.store(false, Ordering::SeqCst);
        }
    }

    fn send_command(&self, cmd: WriterCommand) -> Result<(), SocketError> {
        let writer_tx = self.writer_tx.lock().unwrap_or_else(PoisonError::into_inner);
        match writer_tx.as_ref() {
            Some(tx) => tx.send(cmd).map_err(|_| SocketError::NotOpen),
            None => Err(SocketError::NotOpen),
        }
    }

    fn spawn_write_task(
        self: &Arc<Self>,
        epoch: u64,
        mut writer: TcpWriter,
        mut writer_rx: mpsc::UnboundedReceiver<WriterCommand>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        tracing::debug!("Started task 'write'");
        let engine = self.clone();

        self.event_loop.spawn(async move {
            let mut cache_buffer = BytesMut::with_capacity(engine.config.send_buffer_reserve);
            let mut failed = false;

            loop {
                let cmd = tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    cmd = writer_rx.recv() => match cmd {
                        Some(cmd) => cmd,
                        None => break,
                    },
                };

                if failed {
                    continue;
                }

                // Every write races the cancellation, a stalled peer cannot hold the handle open
                let result = match cmd {
                    WriterCommand::Send(data) => tokio::select! {
                        biased;
                        _ = &mut cancel_rx => break,
                        result = writer.write_all(&data) => {
                            if result.is_ok() {
                                tracing::trace!("{SEND} {} bytes", data.len());
                            }
                            result
                        }
                    },
                    WriterCommand::Flush => tokio::select! {
                        biased;
                        _ = &mut cancel_rx => break,
                        result = engine.drain(&mut writer, &mut cache_buffer) => result,
                    },
                };

                if let Err(e) = result {
                    tracing::debug!("Write failed, closing connection: {e}");
                    failed = true;
                    cache_buffer.clear();
                    engine.close_on_error(epoch);
                }
            }

            // Shutdown of the write half does not wait for the peer,
            // we ignore any error as the writer may already be closed.
            _ = writer.shutdown().await;

            tracing::debug!("Completed task 'write'");
        });
    }

    /// Drains the pending buffer through the in-flight buffer until both are empty.
    async fn drain(&self, writer: &mut TcpWriter, cache_buffer: &mut BytesMut) -> io::Result<()> {
        loop {
            self.flush_scheduled.store(false, Ordering::SeqCst);

            if cache_buffer.is_empty() && !self.swap_send_buffer(cache_buffer) {
                // Held only for an append, retry once the holder is done
                tracing::trace!("Send buffer contended, retrying drain");
                tokio::task::yield_now().await;
                continue;
            }

            if cache_buffer.is_empty() {
                return Ok(());
            }

            writer.write_all(cache_buffer).await?;
            tracing::trace!("{SEND} {} bytes", cache_buffer.len());
            cache_buffer.clear();
        }
    }

    /// Swaps the pending buffer with `cache_buffer`, returns `false` if the lock is contended.
    fn swap_send_buffer(&self, cache_buffer: &mut BytesMut) -> bool {
        match self.send_buffer.try_lock() {
            Ok(mut pending) => std::mem::swap(&mut *pending, cache_buffer),
            Err(TryLockError::Poisoned(e)) => std::mem::swap(&mut *e.into_inner(), cache_buffer),
            Err(TryLockError::WouldBlock) => return false,
        }
        true
    }

    // ---------------------------------------------------------------------------------------
    // Close
    // ---------------------------------------------------------------------------------------

    /// Force-closes the connection from any thread.
    ///
    /// Marks CLOSING, requests a last flush of pending output, then on the home thread fires
    /// [`SocketEvent::Disconnect`] and moves to RECONNECT or CLOSED as the delegate decides.
    ///
    /// The last flush is best effort: output still in flight when the handle closes is dropped,
    /// and pending output is discarded on CLOSED.
    pub fn close(self: &Arc<Self>) {
        self.do_close(true);
    }

    fn close_on_error(self: &Arc<Self>, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) != epoch || !self.handle_open.load(Ordering::SeqCst) {
            tracing::debug!("Ignoring error from a closed connection");
            return;
        }
        self.do_close(false);
    }

    fn do_close(self: &Arc<Self>, force: bool) {
        let status = self.status();
        if status.is_closing_or_closed() {
            tracing::debug!("Already in {status} status");
            return;
        }

        if force {
            SocketStatus::Closing.store(&self.status);
        }

        if self.teardown.swap(true, Ordering::SeqCst) {
            tracing::debug!("Teardown already scheduled");
            return;
        }

        if self.pending_len() > 0 {
            // Best effort, the writer may be cancelled before it gets to this
            self.request_flush();
        }

        let engine = self.clone();
        self.event_loop.spawn(async move {
            engine.finish_close();
        });
    }

    fn finish_close(&self) {
        match self.connection() {
            Some(conn) => {
                conn.process_event(SocketEvent::Disconnect);

                if conn.need_reconnect() {
                    tracing::debug!("Connection requested reconnect");
                    self.close_handle();
                    SocketStatus::Reconnect.store(&self.status);
                    self.teardown.store(false, Ordering::SeqCst);
                } else {
                    SocketStatus::Closed.store(&self.status);
                    self.close_handle();
                    self.discard_pending();
                    self.release_connection();
                }
            }
            None => {
                SocketStatus::Closed.store(&self.status);
                self.close_handle();
                self.discard_pending();
            }
        }
        tracing::debug!("Closed, status {}", self.status());
    }

    /// Closes the live handle, at most once per connection.
    fn close_handle(&self) {
        if !self.handle_open.swap(false, Ordering::SeqCst) {
            return;
        }

        let (read_task, writer_cancel) = {
            let mut handle = self.lock_handle();
            (handle.read_task.take(), handle.writer_cancel.take())
        };

        if let Some(read_task) = read_task {
            read_task.abort();
            tracing::debug!("Aborted task 'read'");
        }

        // Interrupts a write in progress, the final flush is best effort
        if let Some(cancel) = writer_cancel {
            let _ = cancel.send(());
        }
        self.writer_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        tracing::debug!("Closed handle");
    }

    fn discard_pending(&self) {
        let mut pending = self
            .send_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !pending.is_empty() {
            tracing::debug!("Discarding {} pending bytes", pending.len());
        }
        *pending = BytesMut::new();
    }

    fn release_connection(&self) {
        let released = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = released {
            conn.release();
            tracing::debug!("Released connection delegate");
        }
    }
}

fn prepare_connect(
    target: &ConnectTarget,
) -> Result<(Vec<SocketAddr>, Option<SocketAddr>, TcpSocket), SocketError> {
    let local_ip: IpAddr = target
        .local_addr
        .parse()
        .map_err(|_| SocketError::InvalidAddress {
            addr: target.local_addr.clone(),
        })?;
    let local = (target.local_port > 0).then(|| SocketAddr::new(local_ip, target.local_port));

    let target_str = format!("{}:{}", target.host, target.port);
    tracing::debug!("Connecting to {target_str}");

    let mut addrs: Vec<SocketAddr> = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| SocketError::Resolve {
            target: target_str.clone(),
            source: e,
        })?
        .collect();

    if let Some(local) = local {
        addrs.retain(|addr| addr.is_ipv4() == local.is_ipv4());
    }

    let Some(first) = addrs.first().copied() else {
        return Err(SocketError::Resolve {
            target: target_str,
            source: io::Error::new(io::ErrorKind::NotFound, "no usable address"),
        });
    };

    let socket = open_socket(first, local)?;
    Ok((addrs, local, socket))
}

fn open_socket(addr: SocketAddr, local: Option<SocketAddr>) -> Result<TcpSocket, SocketError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    if let Some(local) = local {
        socket.set_reuseaddr(true)?;
        socket.bind(local).map_err(|e| SocketError::Bind {
            addr: local,
            source: e,
        })?;
    }

    Ok(socket)
}

async fn connect_socket(
    socket: TcpSocket,
    addr: SocketAddr,
    timeout: Option<Duration>,
) -> io::Result<TcpStream> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, socket.connect(addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {}s", timeout.as_secs_f64()),
                )
            })?,
        None => socket.connect(addr).await,
    }
}
