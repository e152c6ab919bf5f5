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

//! Loopback tests for the socket engine against a real TCP peer.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use rstest::rstest;
use sockline_common::testing::{init_tracing_for_testing, wait_until_async};
use sockline_network::{
    codec::WireValue,
    config::SocketConfig,
    connection::{Connection, SocketEvent},
    error::SocketError,
    event_loop::EventLoop,
    socket::SocketEngine,
    status::SocketStatus,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Frames packets by a one byte header holding the total packet length.
#[derive(Debug, Default)]
struct TestConnection {
    events: Mutex<Vec<SocketEvent>>,
    packets: Mutex<Vec<Vec<u8>>>,
    closes: AtomicUsize,
    releases: AtomicUsize,
    reconnect: AtomicBool,
    greeting: Option<Vec<u8>>,
    engine: Mutex<Option<Arc<SocketEngine<Self>>>>,
}

impl TestConnection {
    fn count(&self, event: SocketEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == event)
            .count()
    }

    fn packets(&self) -> Vec<Vec<u8>> {
        self.packets.lock().unwrap().clone()
    }
}

impl Connection for TestConnection {
    fn process_event(&self, event: SocketEvent) {
        self.events.lock().unwrap().push(event);

        if event == SocketEvent::Connect
            && let Some(greeting) = &self.greeting
            && let Some(engine) = self.engine.lock().unwrap().clone()
        {
            engine.send(greeting.clone()).unwrap();
        }
    }

    fn process_package(&self, data: &[u8]) -> Option<usize> {
        data.first().map(|len| *len as usize)
    }

    fn process_data(&self, packet: &[u8]) {
        self.packets.lock().unwrap().push(packet.to_vec());
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn need_reconnect(&self) -> bool {
        self.reconnect.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.engine.lock().unwrap().take();
    }
}

fn start_engine(
    connection: &Arc<TestConnection>,
    config: SocketConfig,
) -> Arc<SocketEngine<TestConnection>> {
    init_tracing_for_testing().unwrap();
    let event_loop = EventLoop::start("engine-test").unwrap();
    let engine = SocketEngine::new(event_loop, config, connection.clone()).unwrap();
    *connection.engine.lock().unwrap() = Some(engine.clone());
    engine
}

async fn bind_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn accept(listener: &TcpListener) -> (TcpStream, SocketAddr) {
    tokio::time::timeout(TIMEOUT, listener.accept())
        .await
        .expect("accept timed out")
        .unwrap()
}

async fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();
    buf
}

/// Connects `engine` to the listener and waits until it is open.
async fn connect_open(
    engine: &Arc<SocketEngine<TestConnection>>,
    listener: &TcpListener,
    port: u16,
) -> (TcpStream, SocketAddr) {
    engine.connect("127.0.0.1", port, "0.0.0.0", 0).unwrap();
    let accepted = accept(listener).await;
    wait_until_async(|| async { engine.is_open() }, TIMEOUT).await;
    accepted
}

#[rstest]
#[tokio::test]
async fn test_connect_fires_connect_then_opens() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());

    let (_peer, peer_addr) = connect_open(&engine, &listener, port).await;

    assert_eq!(engine.status(), SocketStatus::Open);
    assert_eq!(*connection.events.lock().unwrap(), vec![SocketEvent::Connect]);
    assert_eq!(engine.remote_endpoint().unwrap().port(), port);
    assert_eq!(engine.local_endpoint().unwrap(), peer_addr);
}

#[rstest]
#[tokio::test]
async fn test_connect_when_open_returns_already_connected() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (_peer, _) = connect_open(&engine, &listener, port).await;

    let result = engine.connect("127.0.0.1", port, "0.0.0.0", 0);

    assert!(matches!(result, Err(SocketError::AlreadyConnected)));
}

#[rstest]
#[tokio::test]
async fn test_connect_with_local_bind() {
    let local_port = {
        let scratch = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        scratch.local_addr().unwrap().port()
    };
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());

    engine
        .connect("127.0.0.1", port, "127.0.0.1", local_port)
        .unwrap();
    let (_peer, peer_addr) = accept(&listener).await;

    assert_eq!(peer_addr.port(), local_port);
    wait_until_async(|| async { engine.is_open() }, TIMEOUT).await;
    assert_eq!(engine.local_endpoint().unwrap().port(), local_port);
}

#[rstest]
#[tokio::test]
async fn test_connect_failure_leaves_status_unchanged() {
    let port = {
        let scratch = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        scratch.local_addr().unwrap().port()
    };
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());

    engine.connect("127.0.0.1", port, "0.0.0.0", 0).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(engine.status(), SocketStatus::Init);
    assert!(connection.events.lock().unwrap().is_empty());

    // A failed attempt does not block the next one
    let (listener, port) = bind_listener().await;
    let (_peer, _) = connect_open(&engine, &listener, port).await;
    assert_eq!(connection.count(SocketEvent::Connect), 1);
}

#[rstest]
#[tokio::test]
async fn test_two_packets_across_three_writes_with_small_buffer() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let config = SocketConfig {
        read_buffer_capacity: 16,
        ..Default::default()
    };
    let engine = start_engine(&connection, config);
    let (mut peer, _) = connect_open(&engine, &listener, port).await;

    let first = vec![5, b'a', b'b', b'c', b'd'];
    let second = vec![7, b'e', b'f', b'g', b'h', b'i', b'j'];
    let stream = [first.clone(), second.clone()].concat();

    for chunk in [&stream[..3], &stream[3..9], &stream[9..]] {
        peer.write_all(chunk).await.unwrap();
        peer.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    wait_until_async(|| async { connection.packets().len() == 2 }, TIMEOUT).await;
    assert_eq!(connection.packets(), vec![first, second]);
    assert_eq!(connection.packets().concat(), stream);
    assert!(connection.count(SocketEvent::Recv) >= 1);
    assert!(engine.is_open());
}

#[rstest]
#[tokio::test]
async fn test_packet_filling_whole_buffer_is_delivered() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let config = SocketConfig {
        read_buffer_capacity: 16,
        ..Default::default()
    };
    let engine = start_engine(&connection, config);
    let (mut peer, _) = connect_open(&engine, &listener, port).await;

    let mut packet = vec![16u8];
    packet.extend(1..16u8);
    peer.write_all(&packet).await.unwrap();

    wait_until_async(|| async { connection.packets().len() == 1 }, TIMEOUT).await;
    assert_eq!(connection.packets(), vec![packet]);
    assert!(engine.is_open());
}

#[rstest]
#[tokio::test]
async fn test_oversize_packet_closes_via_delegate() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let config = SocketConfig {
        read_buffer_capacity: 16,
        ..Default::default()
    };
    let engine = start_engine(&connection, config);
    let (mut peer, _) = connect_open(&engine, &listener, port).await;

    peer.write_all(&[200, 1, 2, 3]).await.unwrap();

    wait_until_async(
        || async { engine.status() == SocketStatus::Closed },
        TIMEOUT,
    )
    .await;
    assert_eq!(connection.closes.load(Ordering::SeqCst), 1);
    assert_eq!(connection.count(SocketEvent::Disconnect), 1);
    assert_eq!(connection.releases.load(Ordering::SeqCst), 1);
    assert!(connection.packets().is_empty());
}

#[rstest]
#[tokio::test]
async fn test_delegate_sends_greeting_on_connect() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection {
        greeting: Some(b"hello".to_vec()),
        ..Default::default()
    });
    let engine = start_engine(&connection, SocketConfig::default());

    let (mut peer, _) = connect_open(&engine, &listener, port).await;

    assert_eq!(read_exact(&mut peer, 5).await, b"hello");
}

#[rstest]
#[tokio::test]
async fn test_home_thread_sends_arrive_in_call_order() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (mut peer, _) = connect_open(&engine, &listener, port).await;

    let engine_in_loop = engine.clone();
    engine.run_in_loop(move || {
        assert!(engine_in_loop.is_in_loop());
        for i in 0..=u8::MAX {
            engine_in_loop.send(vec![i]).unwrap();
        }
    });

    let expected: Vec<u8> = (0..=u8::MAX).collect();
    assert_eq!(read_exact(&mut peer, expected.len()).await, expected);
}

#[rstest]
#[tokio::test]
async fn test_foreign_thread_sends_arrive_in_call_order() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (mut peer, _) = connect_open(&engine, &listener, port).await;

    assert!(!engine.is_in_loop());
    for i in 0..1_000u32 {
        engine.send_fields(&[WireValue::U32(i)]).unwrap();
    }

    let received = read_exact(&mut peer, 4_000).await;
    let values: Vec<u32> = received
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes(chunk.try_into().unwrap()))
        .collect();
    assert_eq!(values, (0..1_000u32).collect::<Vec<_>>());
}

#[rstest]
#[tokio::test]
async fn test_concurrent_producers_keep_per_thread_order() {
    const PRODUCERS: u8 = 4;
    const MESSAGES: u32 = 500;

    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (mut peer, _) = connect_open(&engine, &listener, port).await;

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|id| {
            let engine = engine.clone();
            thread::spawn(move || {
                for seq in 0..MESSAGES {
                    engine
                        .send_fields(&[WireValue::U8(id), WireValue::U32(seq)])
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let received = read_exact(&mut peer, usize::from(PRODUCERS) * MESSAGES as usize * 5).await;
    let mut next_seq = vec![0u32; usize::from(PRODUCERS)];
    for record in received.chunks_exact(5) {
        let id = usize::from(record[0]);
        let seq = u32::from_ne_bytes(record[1..5].try_into().unwrap());
        assert_eq!(seq, next_seq[id], "producer {id} out of order");
        next_seq[id] += 1;
    }
    assert!(next_seq.iter().all(|n| *n == MESSAGES));
}

#[rstest]
#[tokio::test]
async fn test_foreign_send_does_not_wait_for_peer() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (_peer, _) = connect_open(&engine, &listener, port).await;

    // The peer never reads, so most of this stays pending
    let chunk = vec![0xAB; 64 * 1024];
    let start = Instant::now();
    for _ in 0..128 {
        engine.send(chunk.clone()).unwrap();
    }

    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(engine.is_open());
}

#[rstest]
#[tokio::test]
async fn test_send_fields_with_empty_first_field_sends_nothing() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (mut peer, _) = connect_open(&engine, &listener, port).await;

    engine
        .send_fields(&[WireValue::from(""), WireValue::U8(1)])
        .unwrap();
    engine
        .send_fields(&[WireValue::from("ab"), WireValue::U8(b'c')])
        .unwrap();

    assert_eq!(read_exact(&mut peer, 3).await, b"abc");
}

#[rstest]
#[tokio::test]
async fn test_peer_close_fires_single_disconnect_and_releases() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (peer, _) = connect_open(&engine, &listener, port).await;

    drop(peer);

    wait_until_async(
        || async { engine.status() == SocketStatus::Closed },
        TIMEOUT,
    )
    .await;
    engine.close();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!engine.is_open());
    assert_eq!(connection.count(SocketEvent::Disconnect), 1);
    assert_eq!(connection.releases.load(Ordering::SeqCst), 1);
    assert!(connection.engine.lock().unwrap().is_none());
    assert!(matches!(engine.send(&b"late"[..]), Err(SocketError::NotOpen)));
    assert!(matches!(engine.remote_endpoint(), Err(SocketError::NotOpen)));
}

#[rstest]
#[tokio::test]
async fn test_concurrent_close_tears_down_once() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (_peer, _) = connect_open(&engine, &listener, port).await;

    let closers: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.close())
        })
        .collect();
    let engine_in_loop = engine.clone();
    engine.run_in_loop(move || engine_in_loop.close());
    for closer in closers {
        closer.join().unwrap();
    }

    wait_until_async(
        || async { engine.status() == SocketStatus::Closed },
        TIMEOUT,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(connection.count(SocketEvent::Disconnect), 1);
    assert_eq!(connection.releases.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn test_close_flushes_pending_output() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (mut peer, _) = connect_open(&engine, &listener, port).await;

    engine.send(&b"last words"[..]).unwrap();
    engine.close();

    let mut received = Vec::new();
    tokio::time::timeout(TIMEOUT, peer.read_to_end(&mut received))
        .await
        .expect("read timed out")
        .unwrap();
    assert_eq!(received, b"last words");
}

#[rstest]
#[tokio::test]
async fn test_need_reconnect_keeps_delegate_for_next_connection() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    connection.reconnect.store(true, Ordering::SeqCst);
    let engine = start_engine(&connection, SocketConfig::default());
    let (peer, _) = connect_open(&engine, &listener, port).await;

    drop(peer);
    wait_until_async(
        || async { engine.status() == SocketStatus::Reconnect },
        TIMEOUT,
    )
    .await;

    assert!(!engine.is_open());
    assert_eq!(connection.count(SocketEvent::Disconnect), 1);
    assert_eq!(connection.releases.load(Ordering::SeqCst), 0);

    engine.reconnect().unwrap();
    let (mut peer, _) = accept(&listener).await;
    wait_until_async(|| async { engine.is_open() }, TIMEOUT).await;

    assert_eq!(connection.count(SocketEvent::Connect), 2);
    engine.send(&b"again"[..]).unwrap();
    assert_eq!(read_exact(&mut peer, 5).await, b"again");
}

#[rstest]
#[tokio::test]
async fn test_schedule_reconnect_connects_after_delay() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    connection.reconnect.store(true, Ordering::SeqCst);
    let engine = start_engine(&connection, SocketConfig::default());
    let (peer, _) = connect_open(&engine, &listener, port).await;

    drop(peer);
    wait_until_async(
        || async { engine.status() == SocketStatus::Reconnect },
        TIMEOUT,
    )
    .await;

    engine.schedule_reconnect(Duration::from_millis(50));
    let (_peer, _) = accept(&listener).await;
    wait_until_async(|| async { engine.is_open() }, TIMEOUT).await;

    // Closing while the delegate opts out ends in CLOSED
    connection.reconnect.store(false, Ordering::SeqCst);
    engine.close();
    wait_until_async(
        || async { engine.status() == SocketStatus::Closed },
        TIMEOUT,
    )
    .await;
    assert_eq!(connection.count(SocketEvent::Disconnect), 2);
    assert_eq!(connection.releases.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn test_mixed_home_and_foreign_sends_keep_per_path_order() {
    const MESSAGES: u32 = 500;

    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (mut peer, _) = connect_open(&engine, &listener, port).await;

    for seq in 0..MESSAGES {
        engine
            .send_fields(&[WireValue::U8(b'F'), WireValue::U32(seq)])
            .unwrap();

        let engine_in_loop = engine.clone();
        engine.run_in_loop(move || {
            engine_in_loop
                .send_fields(&[WireValue::U8(b'H'), WireValue::U32(seq)])
                .unwrap();
        });
    }

    let received = read_exact(&mut peer, 2 * MESSAGES as usize * 5).await;
    let mut next_home = 0u32;
    let mut next_foreign = 0u32;
    for record in received.chunks_exact(5) {
        let seq = u32::from_ne_bytes(record[1..5].try_into().unwrap());
        match record[0] {
            b'H' => {
                assert_eq!(seq, next_home, "home-thread send out of order");
                next_home += 1;
            }
            b'F' => {
                assert_eq!(seq, next_foreign, "buffered send out of order");
                next_foreign += 1;
            }
            tag => panic!("corrupted record with tag {tag}"),
        }
    }
    assert_eq!(next_home, MESSAGES);
    assert_eq!(next_foreign, MESSAGES);
}

#[rstest]
#[tokio::test]
async fn test_close_with_stalled_peer_cancels_write_in_flight() {
    const CHUNKS: usize = 64;
    const CHUNK_LEN: usize = 1024 * 1024;

    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (mut peer, _) = connect_open(&engine, &listener, port).await;

    // The peer does not read until after the close, so the writer stalls
    let chunk = vec![0x5A; CHUNK_LEN];
    for _ in 0..CHUNKS {
        engine.send(chunk.clone()).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    engine.close();
    wait_until_async(
        || async { engine.status() == SocketStatus::Closed },
        TIMEOUT,
    )
    .await;

    // No task keeps the engine alive once the handle is closed
    wait_until_async(|| async { Arc::strong_count(&engine) == 1 }, TIMEOUT).await;
    assert_eq!(engine.pending_len(), 0);

    let mut received = Vec::new();
    tokio::time::timeout(TIMEOUT, peer.read_to_end(&mut received))
        .await
        .expect("read timed out")
        .unwrap();
    assert!(received.len() < CHUNKS * CHUNK_LEN);
    assert_eq!(connection.count(SocketEvent::Disconnect), 1);
    assert_eq!(connection.releases.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn test_peer_reset_during_sends_tears_down_once() {
    let (listener, port) = bind_listener().await;
    let connection = Arc::new(TestConnection::default());
    let engine = start_engine(&connection, SocketConfig::default());
    let (peer, _) = connect_open(&engine, &listener, port).await;

    // Sends on both paths until the engine refuses them
    let producer = {
        let engine = engine.clone();
        thread::spawn(move || {
            let chunk = vec![0xC3; 4 * 1024];
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                if engine.send(chunk.clone()).is_err() {
                    break;
                }
                let engine_in_loop = engine.clone();
                let home_chunk = chunk.clone();
                engine.run_in_loop(move || {
                    let _ = engine_in_loop.send(home_chunk);
                });
                thread::yield_now();
            }
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Linger of zero makes the drop send a reset instead of a FIN
    #[allow(deprecated)]
    peer.set_linger(Some(Duration::ZERO)).unwrap();
    drop(peer);

    let closer = {
        let engine = engine.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(1));
            engine.close();
        })
    };

    wait_until_async(
        || async { engine.status() == SocketStatus::Closed },
        TIMEOUT,
    )
    .await;
    closer.join().unwrap();
    producer.join().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!engine.is_open());
    assert_eq!(connection.count(SocketEvent::Disconnect), 1);
    assert_eq!(connection.releases.load(Ordering::SeqCst), 1);
    wait_until_async(|| async { Arc::strong_count(&engine) == 1 }, TIMEOUT).await;
}
