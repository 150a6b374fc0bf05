//! RX multiplexer: one dispatcher thread per registered NIO, pulling inbound
//! frames and handing them to a per-NIO handler once the ingress filter
//! chain has passed them.
//!
//! Each NIO's transport reads with a bounded poll timeout (see
//! [`crate::transport`]), so a listener thread can notice removal promptly
//! without any `poll(2)`/epoll plumbing: the stop flag is checked once per
//! timeout tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::filter::FilterAction;
use crate::transport::RecvOutcome;
use crate::NioEndpoint;

struct Listener {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the RX dispatch threads for every NIO currently subscribed to
/// delivery. Dropping it stops and joins all listeners.
#[derive(Default)]
pub struct RxMultiplexer {
    listeners: Mutex<HashMap<String, Listener>>,
}

impl RxMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `nio` for delivery: frames are filtered (RX then BOTH) and,
    /// if they pass, handed to `handler`. If a listener with the same NIO
    /// name already exists it is replaced.
    pub fn add_listener(
        &self,
        nio: Arc<NioEndpoint>,
        handler: impl Fn(Vec<u8>) + Send + 'static,
    ) {
        self.remove_listener(nio.name());
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let name = nio.name().to_string();
        let handle = std::thread::Builder::new()
            .name(format!("nio-rx-{name}"))
            .spawn(move || dispatch_loop(nio, thread_stop, handler))
            .expect("spawn nio rx listener");
        self.listeners
            .lock()
            .unwrap()
            .insert(name, Listener { stop, handle });
    }

    /// Stops and joins the listener for `nio_name`, if any. Deterministic:
    /// once this returns, the listener thread is guaranteed to have exited
    /// and will never again dereference the NIO.
    pub fn remove_listener(&self, nio_name: &str) {
        let removed = self.listeners.lock().unwrap().remove(nio_name);
        if let Some(listener) = removed {
            listener.stop.store(true, Ordering::SeqCst);
            let _ = listener.handle.join();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

impl Drop for RxMultiplexer {
    fn drop(&mut self) {
        let names: Vec<String> = self.listeners.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.remove_listener(&name);
        }
    }
}

fn dispatch_loop(nio: Arc<NioEndpoint>, stop: Arc<AtomicBool>, handler: impl Fn(Vec<u8>)) {
    while !stop.load(Ordering::SeqCst) {
        match nio.recv_raw() {
            Ok(RecvOutcome::Frame(frame)) => {
                nio.stats().record_rx(frame.len());
                if nio.filters().run_ingress(&frame) == FilterAction::Pass {
                    handler(frame);
                }
            }
            Ok(RecvOutcome::WouldBlock) => continue,
            Ok(RecvOutcome::Closed) => {
                tracing::debug!(nio = nio.name(), "nio: transport closed, stopping listener");
                return;
            }
            Err(e) => {
                tracing::warn!(nio = nio.name(), error = %e, "nio: recv error, stopping listener");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::UdpTransport;
    use crate::NioEndpoint;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn listener_delivers_and_removal_is_deterministic() {
        let server_port = 30500;
        let client_port = 30501;
        let server = UdpTransport::bind(
            server_port,
            format!("127.0.0.1:{client_port}").parse().unwrap(),
        )
        .unwrap();
        let client = UdpTransport::bind(
            client_port,
            format!("127.0.0.1:{server_port}").parse().unwrap(),
        )
        .unwrap();

        let nio = Arc::new(NioEndpoint::new("rx-test", Box::new(server)));
        let (tx, rx) = mpsc::channel();
        let mux = RxMultiplexer::new();
        mux.add_listener(nio.clone(), move |frame| {
            let _ = tx.send(frame);
        });

        let client_nio = NioEndpoint::new("tx-test", Box::new(client));
        client_nio.send(b"hello").unwrap();

        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got, b"hello");

        assert_eq!(mux.listener_count(), 1);
        mux.remove_listener("rx-test");
        assert_eq!(mux.listener_count(), 0);
    }
}
