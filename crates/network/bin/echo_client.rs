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

//! Line-oriented echo client.
//!
//! Connects to `<host>:<port>`, sends every stdin line to the peer and logs every line
//! received back. Reconnects with exponential backoff until interrupted.
//!
//! Usage: `sockline-echo-client <host> <port> [config.json]`

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Context;
use sockline_common::logging::{RECV, init_tracing};
use sockline_network::{
    backoff::ExponentialBackoff,
    config::SocketConfig,
    connection::{Connection, SocketEvent},
    event_loop::EventLoop,
    socket::SocketEngine,
};
use tokio::sync::mpsc;

#[derive(Debug)]
struct LineConnection {
    engine: Mutex<Option<Arc<SocketEngine<Self>>>>,
    backoff: Mutex<ExponentialBackoff>,
    reconnect: AtomicBool,
}

impl LineConnection {
    fn engine(&self) -> Option<Arc<SocketEngine<Self>>> {
        self.engine.lock().ok().and_then(|engine| engine.clone())
    }
}

impl Connection for LineConnection {
    fn process_event(&self, event: SocketEvent) {
        match event {
            SocketEvent::Connect => {
                if let Ok(mut backoff) = self.backoff.lock() {
                    backoff.reset();
                }
                if let Some(engine) = self.engine() {
                    tracing::info!("Connected to {:?}", engine.remote_endpoint().ok());
                }
            }
            SocketEvent::Disconnect => tracing::info!("Disconnected"),
            SocketEvent::Recv => {}
        }
    }

    fn process_package(&self, data: &[u8]) -> Option<usize> {
        memchr::memchr(b'\n', data).map(|pos| pos + 1)
    }

    fn process_data(&self, packet: &[u8]) {
        let line = String::from_utf8_lossy(packet);
        tracing::info!("{RECV} {}", line.trim_end());
    }

    fn close(&self) {
        tracing::warn!("Line exceeds read buffer capacity");
    }

    fn need_reconnect(&self) -> bool {
        if !self.reconnect.load(Ordering::SeqCst) {
            return false;
        }

        // Runs once the engine has moved to RECONNECT
        if let (Some(engine), Ok(mut backoff)) = (self.engine(), self.backoff.lock()) {
            engine.schedule_reconnect(backoff.next_duration());
        }
        true
    }

    fn release(&self) {
        if let Ok(mut engine) = self.engine.lock() {
            engine.take();
        }
    }
}

fn load_config(path: Option<&String>) -> anyhow::Result<SocketConfig> {
    let Some(path) = path else {
        return Ok(SocketConfig::default());
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let config = serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let args: Vec<String> = std::env::args().collect();
    let (Some(host), Some(port)) = (args.get(1), args.get(2)) else {
        anyhow::bail!("usage: sockline-echo-client <host> <port> [config.json]");
    };
    let port: u16 = port.parse().context("invalid port")?;
    let config = load_config(args.get(3))?;

    let connection = Arc::new(LineConnection {
        engine: Mutex::new(None),
        backoff: Mutex::new(config.backoff()),
        reconnect: AtomicBool::new(true),
    });
    let event_loop = EventLoop::start("echo-client")?;
    let engine = SocketEngine::new(event_loop.clone(), config, connection.clone())?;
    if let Ok(mut slot) = connection.engine.lock() {
        *slot = Some(engine.clone());
    }

    engine.connect(host, port, "0.0.0.0", 0)?;

    // Stdin is read on a plain thread, lines are sent from this (foreign) thread
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            line = line_rx.recv() => {
                let Some(mut line) = line else { break };
                line.push('\n');
                if let Err(e) = engine.send(line) {
                    tracing::warn!("Dropped line: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    connection.reconnect.store(false, Ordering::SeqCst);
    engine.close();
    event_loop.shutdown();
    Ok(())
}
