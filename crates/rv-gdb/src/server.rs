//! The per-VM GDB listener: accepts (typically one) debugger client and
//! drives it against a [`GdbTarget`] using the packet framing from
//! [`crate::packet`] and the command dispatch from [`crate::commands`].

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::commands::handle;
use crate::packet::{encode_packet, read_event, PacketEvent};
use crate::target::GdbTarget;

const ACCEPT_POLL: Duration = Duration::from_millis(200);

pub struct GdbServer {
    accept_thread: Option<JoinHandle<()>>,
    active: Arc<std::sync::atomic::AtomicBool>,
    local_addr: std::net::SocketAddr,
}

impl GdbServer {
    pub fn bind(addr: &str, target: Arc<Mutex<dyn GdbTarget>>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let active = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let loop_active = active.clone();
        let accept_thread = std::thread::spawn(move || accept_loop(listener, target, loop_active));
        Ok(Self {
            accept_thread: Some(accept_thread),
            active,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn join(mut self) {
        self.active.store(false, std::sync::atomic::Ordering::SeqCst);
        if let Some(h) = self.accept_thread.take() {
            let _ = h.join();
        }
    }
}

impl Drop for GdbServer {
    fn drop(&mut self) {
        self.active.store(false, std::sync::atomic::Ordering::SeqCst);
        if let Some(h) = self.accept_thread.take() {
            let _ = h.join();
        }
    }
}

fn accept_loop(listener: TcpListener, target: Arc<Mutex<dyn GdbTarget>>, active: Arc<std::sync::atomic::AtomicBool>) {
    tracing::info!(addr = ?listener.local_addr(), "gdb: listening");
    let mut clients = Vec::new();
    while active.load(std::sync::atomic::Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "gdb: client connected");
                let client_target = target.clone();
                clients.push(std::thread::spawn(move || handle_client(stream, client_target)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "gdb: accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    for handle in clients {
        let _ = handle.join();
    }
    tracing::info!("gdb: accept loop stopped");
}

fn handle_client(stream: TcpStream, target: Arc<Mutex<dyn GdbTarget>>) {
    let mut reader = stream.try_clone().expect("clone gdb client stream");
    let mut writer = stream;
    loop {
        let event = match read_event(&mut reader) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "gdb: packet read error");
                break;
            }
        };
        match event {
            PacketEvent::Eof => break,
            PacketEvent::ChecksumMismatch => {
                let _ = writer.write_all(b"-");
                let _ = writer.flush();
            }
            PacketEvent::Break => {
                target.lock().unwrap().interrupt();
                let reply = encode_packet("T05thread:01;");
                let _ = writer.write_all(b"+");
                let _ = writer.write_all(&reply);
                let _ = writer.flush();
            }
            PacketEvent::Packet(payload) => {
                let _ = writer.write_all(b"+");
                let reply = handle(&mut *target.lock().unwrap(), &payload);
                if let Some(reply) = reply {
                    let encoded = encode_packet(&reply);
                    let _ = writer.write_all(&encoded);
                }
                let _ = writer.flush();
            }
        }
    }
    tracing::debug!("gdb: client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MockTarget;
    use std::io::Read;

    #[test]
    fn version_query_round_trips_over_tcp() {
        let target: Arc<Mutex<dyn GdbTarget>> = Arc::new(Mutex::new(MockTarget::new(16, 64)));
        let server = GdbServer::bind("127.0.0.1:0", target).unwrap();
        let addr = server.local_addr();
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(&encode_packet("?")).unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).unwrap();
        let received = String::from_utf8_lossy(&buf[..n]);
        assert!(received.contains("$T05thread:01;#"));
        let _ = stream.shutdown(std::net::Shutdown::Both);
        drop(stream);
        server.join();
    }

    #[test]
    fn break_byte_outside_packet_gets_t05_stop_reply() {
        let target: Arc<Mutex<dyn GdbTarget>> = Arc::new(Mutex::new(MockTarget::new(16, 64)));
        let server = GdbServer::bind("127.0.0.1:0", target).unwrap();
        let addr = server.local_addr();
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(&[0x03]).unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).unwrap();
        let received = String::from_utf8_lossy(&buf[..n]);
        assert!(received.contains("$T05thread:01;#"));
        let _ = stream.shutdown(std::net::Shutdown::Both);
        drop(stream);
        server.join();
    }
}
