//! The client's single receiver thread: raw datagrams off the socket into a
//! queue the pipeline drains on the game thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use riptide::net::protocol::MAX_UDP_PAYLOAD;
use riptide::{IpEndpoint, UdpTransport, WorkQueue};

const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub struct Receiver {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    pub raw: Arc<WorkQueue<(Vec<u8>, IpEndpoint)>>,
}

impl Receiver {
    pub fn spawn(transport: UdpTransport, running: Arc<AtomicBool>) -> std::io::Result<Self> {
        let raw: Arc<WorkQueue<(Vec<u8>, IpEndpoint)>> = Arc::new(WorkQueue::new(1024));

        let queue = Arc::clone(&raw);
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("client-recv".into())
            .spawn(move || {
                let mut buf = [0u8; MAX_UDP_PAYLOAD];
                while flag.load(Ordering::SeqCst) {
                    match transport.recv_from(&mut buf) {
                        Ok((size, from)) => queue.push((buf[..size].to_vec(), from)),
                        Err(e) if e.is_transient() => thread::sleep(IDLE_SLEEP),
                        Err(e) => {
                            log::error!("[Net] receive failed: {e}");
                            thread::sleep(IDLE_SLEEP);
                        }
                    }
                }
            })?;

        Ok(Self {
            handle: Some(handle),
            running,
            raw,
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}
