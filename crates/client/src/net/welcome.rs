//! The welcome loop: once a second, push the handshake forward until the
//! server declares the game started.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use riptide::{IpEndpoint, Message, UdpTransport};

use super::pipeline::ClientFlags;

const WELCOME_INTERVAL: Duration = Duration::from_secs(1);
const POLL_SLICE: Duration = Duration::from_millis(50);

pub struct WelcomeLoop {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl WelcomeLoop {
    pub fn spawn(
        transport: UdpTransport,
        server: IpEndpoint,
        flags: Arc<ClientFlags>,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("client-welcome".into())
            .spawn(move || run_welcome(transport, server, flags, flag))?;
        Ok(Self {
            handle: Some(handle),
            running,
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WelcomeLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run_welcome(
    transport: UdpTransport,
    server: IpEndpoint,
    flags: Arc<ClientFlags>,
    running: Arc<AtomicBool>,
) {
    let mut seq: u16 = 0;
    let mut send = |message: Message, seq: &mut u16| {
        let bytes = message.encode(*seq, 0);
        *seq = seq.wrapping_add(1);
        if let Err(e) = transport.send_to(&bytes, server) {
            if !e.is_transient() {
                log::warn!("[Net] welcome send failed: {e}");
            }
        }
    };

    while running.load(Ordering::SeqCst) && !flags.handshake_done() {
        if flags.join_denied.load(Ordering::SeqCst)
            || flags.disconnected.load(Ordering::SeqCst)
        {
            break;
        }

        send(Message::ClientHello, &mut seq);
        if !flags.join_accepted.load(Ordering::SeqCst) {
            send(Message::ClientJoinRequest, &mut seq);
        } else {
            send(Message::ClientReady, &mut seq);
        }
        send(
            Message::Ping {
                timestamp_ms: now_ms(),
            },
            &mut seq,
        );

        // Sleep in slices so cancellation and handshake completion are
        // noticed promptly.
        let mut waited = Duration::ZERO;
        while waited < WELCOME_INTERVAL
            && running.load(Ordering::SeqCst)
            && !flags.handshake_done()
        {
            thread::sleep(POLL_SLICE);
            waited += POLL_SLICE;
        }
    }
    log::debug!("[Net] welcome loop finished");
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
