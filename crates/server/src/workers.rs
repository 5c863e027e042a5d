//! Per-instance ingress and egress threads.
//!
//! The receive worker decodes and routes inbound traffic into the tick
//! loop's queues and watches per-endpoint silence. The send worker owns all
//! outbound traffic: direct sends, broadcasts to the registered client set,
//! and a rate-limited snapshot publish slot that coalesces to the latest
//! payload when the tick loop outpaces the send rate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use riptide::net::protocol::MAX_UDP_PAYLOAD;
use riptide::{
    InputFrame, IpEndpoint, Message, NetworkStats, PacketDirection, UdpTransport, WorkQueue,
};

const IDLE_SLEEP: Duration = Duration::from_millis(1);
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ReceivedInput {
    pub endpoint: IpEndpoint,
    pub frame: InputFrame,
    pub sequence_id: u16,
    pub tick_id: u32,
}

#[derive(Debug, Clone)]
pub struct ControlEvent {
    pub endpoint: IpEndpoint,
    /// Request sequence, echoed back in the reply.
    pub sequence_id: u16,
    pub kind: ControlKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlKind {
    Hello,
    JoinRequest,
    Ready,
    Ping { timestamp_ms: u64 },
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeoutEvent {
    pub endpoint: IpEndpoint,
}

pub struct ReceiveWorker {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl ReceiveWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        transport: UdpTransport,
        inputs: Arc<WorkQueue<ReceivedInput>>,
        control: Arc<WorkQueue<ControlEvent>>,
        timeouts: Arc<WorkQueue<ClientTimeoutEvent>>,
        stats: Arc<Mutex<NetworkStats>>,
        stop: Arc<AtomicBool>,
        client_timeout: Duration,
        name: String,
    ) -> std::io::Result<Self> {
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new().name(name).spawn(move || {
            run_receive_loop(
                transport,
                inputs,
                control,
                timeouts,
                stats,
                thread_stop,
                client_timeout,
            );
        })?;
        Ok(Self {
            handle: Some(handle),
            stop,
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_receive_loop(
    transport: UdpTransport,
    inputs: Arc<WorkQueue<ReceivedInput>>,
    control: Arc<WorkQueue<ControlEvent>>,
    timeouts: Arc<WorkQueue<ClientTimeoutEvent>>,
    stats: Arc<Mutex<NetworkStats>>,
    running: Arc<AtomicBool>,
    client_timeout: Duration,
) {
    let mut buf = [0u8; MAX_UDP_PAYLOAD];
    let mut last_seen: HashMap<String, (IpEndpoint, Instant)> = HashMap::new();
    let mut last_sweep = Instant::now();

    while running.load(Ordering::SeqCst) {
        match transport.recv_from(&mut buf) {
            Ok((size, from)) => {
                match Message::decode(&buf[..size], PacketDirection::ClientToServer) {
                    Ok((header, message)) => {
                        {
                            let mut stats = stats.lock().unwrap_or_else(|e| e.into_inner());
                            stats.record_receive(size);
                        }
                        last_seen.insert(from.key(), (from, Instant::now()));
                        route(message, header.sequence_id, header.tick_id, from, &inputs, &control);
                    }
                    Err(err) => {
                        // Malformed traffic never stops the worker.
                        let mut stats = stats.lock().unwrap_or_else(|e| e.into_inner());
                        stats.record_malformed();
                        log::debug!("[Net] dropping malformed packet from {from}: {err}");
                    }
                }
            }
            Err(e) if e.is_transient() => thread::sleep(IDLE_SLEEP),
            Err(e) => {
                log::error!("[Net] receive failed: {e}");
                thread::sleep(IDLE_SLEEP);
            }
        }

        if last_sweep.elapsed() >= TIMEOUT_SWEEP_INTERVAL {
            last_sweep = Instant::now();
            let expired: Vec<String> = last_seen
                .iter()
                .filter(|(_, (_, seen))| seen.elapsed() > client_timeout)
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                if let Some((endpoint, _)) = last_seen.remove(&key) {
                    timeouts.push(ClientTimeoutEvent { endpoint });
                }
            }
        }
    }
}

fn route(
    message: Message,
    sequence_id: u16,
    tick_id: u32,
    from: IpEndpoint,
    inputs: &WorkQueue<ReceivedInput>,
    control: &WorkQueue<ControlEvent>,
) {
    let kind = match message {
        Message::ClientInput(frame) => {
            inputs.push(ReceivedInput {
                endpoint: from,
                frame,
                sequence_id,
                tick_id,
            });
            return;
        }
        Message::ClientHello => ControlKind::Hello,
        Message::ClientJoinRequest => ControlKind::JoinRequest,
        Message::ClientReady => ControlKind::Ready,
        Message::Ping { timestamp_ms } => ControlKind::Ping { timestamp_ms },
        Message::ClientDisconnect => ControlKind::Disconnect,
        other => {
            log::debug!("[Net] ignoring {:?} on game port", other.message_type());
            return;
        }
    };
    control.push(ControlEvent {
        endpoint: from,
        sequence_id,
        kind,
    });
}

enum SendCommand {
    To { bytes: Vec<u8>, to: IpEndpoint },
    Broadcast { bytes: Vec<u8> },
    Register(IpEndpoint),
    Unregister(IpEndpoint),
    Publish { datagrams: Vec<(IpEndpoint, Vec<u8>)> },
}

/// Cloneable front end to the send worker.
#[derive(Clone)]
pub struct SendHandle {
    inbox: Arc<WorkQueue<SendCommand>>,
}

impl SendHandle {
    pub fn send_to(&self, bytes: Vec<u8>, to: IpEndpoint) {
        self.inbox.push(SendCommand::To { bytes, to });
    }

    pub fn broadcast(&self, bytes: Vec<u8>) {
        self.inbox.push(SendCommand::Broadcast { bytes });
    }

    pub fn register(&self, endpoint: IpEndpoint) {
        self.inbox.push(SendCommand::Register(endpoint));
    }

    pub fn unregister(&self, endpoint: IpEndpoint) {
        self.inbox.push(SendCommand::Unregister(endpoint));
    }

    /// Queues the latest snapshot datagrams. Safe to call faster than the
    /// send rate: a newer publish replaces an unsent one.
    pub fn publish(&self, datagrams: Vec<(IpEndpoint, Vec<u8>)>) {
        self.inbox.push(SendCommand::Publish { datagrams });
    }
}

pub struct SendWorker {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl SendWorker {
    pub fn spawn(
        transport: UdpTransport,
        stats: Arc<Mutex<NetworkStats>>,
        stop: Arc<AtomicBool>,
        snapshot_hz: u32,
        name: String,
    ) -> std::io::Result<(Self, SendHandle)> {
        let inbox: Arc<WorkQueue<SendCommand>> = Arc::new(WorkQueue::new(4096));
        let handle = SendHandle {
            inbox: Arc::clone(&inbox),
        };

        let thread_stop = Arc::clone(&stop);
        let join = thread::Builder::new().name(name).spawn(move || {
            run_send_loop(transport, inbox, stats, thread_stop, snapshot_hz);
        })?;

        Ok((
            Self {
                handle: Some(join),
                stop,
            },
            handle,
        ))
    }

    pub fn stop(&mut self) {
        self.stop.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_send_loop(
    transport: UdpTransport,
    inbox: Arc<WorkQueue<SendCommand>>,
    stats: Arc<Mutex<NetworkStats>>,
    running: Arc<AtomicBool>,
    snapshot_hz: u32,
) {
    let publish_interval = Duration::from_secs_f64(1.0 / snapshot_hz.max(1) as f64);
    let mut clients: Vec<IpEndpoint> = Vec::new();
    let mut latest: Option<Vec<(IpEndpoint, Vec<u8>)>> = None;
    let mut last_publish = Instant::now() - publish_interval;

    let send = |bytes: &[u8], to: IpEndpoint, stats: &Mutex<NetworkStats>| {
        match transport.send_to(bytes, to) {
            Ok(sent) => {
                let mut stats = stats.lock().unwrap_or_else(|e| e.into_inner());
                stats.record_send(sent);
            }
            Err(e) if e.is_transient() => {}
            Err(e) => log::warn!("[Net] send to {to} failed: {e}"),
        }
    };

    while running.load(Ordering::SeqCst) {
        while let Some(command) = inbox.try_pop() {
            match command {
                SendCommand::To { bytes, to } => send(&bytes, to, &stats),
                SendCommand::Broadcast { bytes } => {
                    for &client in &clients {
                        send(&bytes, client, &stats);
                    }
                }
                SendCommand::Register(endpoint) => {
                    if !clients.contains(&endpoint) {
                        clients.push(endpoint);
                    }
                }
                SendCommand::Unregister(endpoint) => {
                    clients.retain(|&c| c != endpoint);
                }
                SendCommand::Publish { datagrams } => {
                    // Coalesce: only the freshest snapshot survives.
                    latest = Some(datagrams);
                }
            }
        }

        if latest.is_some() && last_publish.elapsed() >= publish_interval {
            last_publish = Instant::now();
            if let Some(datagrams) = latest.take() {
                for (to, bytes) in datagrams {
                    send(&bytes, to, &stats);
                }
            }
        }

        thread::sleep(IDLE_SLEEP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_local() -> UdpTransport {
        UdpTransport::open(IpEndpoint::localhost(0)).unwrap()
    }

    fn recv_with_timeout(transport: &UdpTransport, ms: u64) -> Option<Vec<u8>> {
        let mut buf = [0u8; 2048];
        let deadline = Instant::now() + Duration::from_millis(ms);
        while Instant::now() < deadline {
            match transport.recv_from(&mut buf) {
                Ok((size, _)) => return Some(buf[..size].to_vec()),
                Err(e) if e.is_transient() => thread::sleep(Duration::from_millis(1)),
                Err(_) => return None,
            }
        }
        None
    }

    #[test]
    fn receive_worker_routes_input_and_control() {
        let server = open_local();
        let server_ep = server.local_endpoint();

        let inputs = Arc::new(WorkQueue::new(64));
        let control = Arc::new(WorkQueue::new(64));
        let timeouts = Arc::new(WorkQueue::new(64));
        let stats = Arc::new(Mutex::new(NetworkStats::default()));
        let stop = Arc::new(AtomicBool::new(true));

        let mut worker = ReceiveWorker::spawn(
            server,
            Arc::clone(&inputs),
            Arc::clone(&control),
            Arc::clone(&timeouts),
            Arc::clone(&stats),
            Arc::clone(&stop),
            Duration::from_secs(30),
            "test-recv".into(),
        )
        .unwrap();

        let client = open_local();
        client
            .send_to(&Message::ClientHello.encode(0, 0), server_ep)
            .unwrap();
        client
            .send_to(
                &Message::ClientInput(InputFrame {
                    x: 1.0,
                    y: 0.0,
                    angle: 0.0,
                    buttons: Default::default(),
                })
                .encode(4, 0),
                server_ep,
            )
            .unwrap();
        // Garbage must be counted, not crash anything.
        client.send_to(b"not a packet", server_ep).unwrap();

        let deadline = Instant::now() + Duration::from_millis(500);
        while (inputs.is_empty() || control.is_empty()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let event = control.try_pop().expect("no control event");
        assert_eq!(event.kind, ControlKind::Hello);
        let input = inputs.try_pop().expect("no input event");
        assert_eq!(input.sequence_id, 4);

        let deadline = Instant::now() + Duration::from_millis(500);
        while stats
            .lock()
            .unwrap()
            .malformed_packets
            == 0
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stats.lock().unwrap().malformed_packets, 1);

        worker.stop();
    }

    #[test]
    fn send_worker_broadcasts_to_registered_clients() {
        let out = open_local();
        let a = open_local();
        let b = open_local();

        let stats = Arc::new(Mutex::new(NetworkStats::default()));
        let stop = Arc::new(AtomicBool::new(true));
        let (mut worker, handle) =
            SendWorker::spawn(out, stats, Arc::clone(&stop), 60, "test-send".into()).unwrap();

        handle.register(a.local_endpoint());
        handle.register(b.local_endpoint());
        handle.broadcast(Message::GameStart.encode(0, 1));

        assert!(recv_with_timeout(&a, 500).is_some());
        assert!(recv_with_timeout(&b, 500).is_some());

        handle.unregister(b.local_endpoint());
        handle.broadcast(Message::GameStart.encode(0, 2));
        assert!(recv_with_timeout(&a, 500).is_some());
        assert!(recv_with_timeout(&b, 200).is_none());

        worker.stop();
    }

    #[test]
    fn publish_coalesces_to_latest() {
        let out = open_local();
        let client = open_local();

        let stats = Arc::new(Mutex::new(NetworkStats::default()));
        let stop = Arc::new(AtomicBool::new(true));
        // 1 Hz so both publishes land inside one interval.
        let (mut worker, handle) =
            SendWorker::spawn(out, stats, Arc::clone(&stop), 1, "test-pub".into()).unwrap();

        // First publish goes out immediately (interval already elapsed);
        // the next two race the interval and only the newest survives.
        handle.publish(vec![(client.local_endpoint(), Message::GameStart.encode(0, 1))]);
        assert!(recv_with_timeout(&client, 500).is_some());

        handle.publish(vec![(client.local_endpoint(), Message::GameStart.encode(0, 2))]);
        handle.publish(vec![(client.local_endpoint(), Message::GameStart.encode(0, 3))]);

        let next = recv_with_timeout(&client, 1500).expect("no coalesced publish");
        let (header, _) = Message::decode(&next, PacketDirection::ServerToClient).unwrap();
        assert_eq!(header.tick_id, 3);
        assert!(recv_with_timeout(&client, 300).is_none());

        worker.stop();
    }
}
