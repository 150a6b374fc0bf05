//! Concrete byte-frame transports pluggable into a [`crate::NioEndpoint`].
//!
//! Every transport here is read with a short timeout rather than blocking
//! forever, so a listener thread can cooperatively observe a stop flag
//! without needing raw `poll(2)`/self-pipe plumbing. TAP, raw-Ethernet, and
//! libpcap transports are genuine physical network drivers and are out of
//! scope for this core (see the top-level non-goals); [`Transport::Tap`] and
//! [`Transport::RawEth`] are kept as named variants so NIO descriptor parsing
//! (`slot:port:type[:args]`) round-trips, but constructing one returns
//! [`NioError::UnsupportedTransport`] on this build.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::unix::net::UnixDatagram;
use std::time::Duration;

use crate::NioError;

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Result of one poll-timeout-bounded receive attempt.
pub enum RecvOutcome {
    Frame(Vec<u8>),
    /// Nothing arrived before the poll timeout; the caller should re-check
    /// its stop flag and try again.
    WouldBlock,
    /// The peer end is gone (EOF on a stream transport). The caller should
    /// remove this NIO from its listener.
    Closed,
}

pub trait Transport: Send {
    fn send(&mut self, frame: &[u8]) -> Result<(), NioError>;
    fn recv(&mut self) -> Result<RecvOutcome, NioError>;
}

/// Discards everything sent and never produces inbound data. Useful as a
/// placeholder port binding.
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&mut self, _frame: &[u8]) -> Result<(), NioError> {
        Ok(())
    }
    fn recv(&mut self) -> Result<RecvOutcome, NioError> {
        std::thread::sleep(POLL_TIMEOUT);
        Ok(RecvOutcome::WouldBlock)
    }
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(local_port: u16, remote: SocketAddr) -> Result<Self, NioError> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))?;
        socket.connect(remote)?;
        socket.set_read_timeout(Some(POLL_TIMEOUT))?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), NioError> {
        self.socket.send(frame)?;
        Ok(())
    }

    fn recv(&mut self) -> Result<RecvOutcome, NioError> {
        let mut buf = vec![0u8; 65535];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(RecvOutcome::Frame(buf))
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                Ok(RecvOutcome::WouldBlock)
            }
            Err(e) => Err(NioError::Io(e)),
        }
    }
}

pub struct UnixTransport {
    socket: UnixDatagram,
}

impl UnixTransport {
    pub fn connected(local_path: &str, peer_path: &str) -> Result<Self, NioError> {
        let _ = std::fs::remove_file(local_path);
        let socket = UnixDatagram::bind(local_path)?;
        socket.connect(peer_path)?;
        socket.set_read_timeout(Some(POLL_TIMEOUT))?;
        Ok(Self { socket })
    }
}

impl Transport for UnixTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), NioError> {
        self.socket.send(frame)?;
        Ok(())
    }

    fn recv(&mut self) -> Result<RecvOutcome, NioError> {
        let mut buf = vec![0u8; 65535];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(RecvOutcome::Frame(buf))
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                Ok(RecvOutcome::WouldBlock)
            }
            Err(e) => Err(NioError::Io(e)),
        }
    }
}

fn write_framed(stream: &mut TcpStream, frame: &[u8]) -> Result<(), NioError> {
    let len = (frame.len() as u32).to_be_bytes();
    stream.write_all(&len)?;
    stream.write_all(frame)?;
    Ok(())
}

fn read_framed(stream: &mut TcpStream) -> Result<RecvOutcome, NioError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
            return Ok(RecvOutcome::WouldBlock);
        }
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(RecvOutcome::Closed),
        Err(e) => return Err(NioError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(RecvOutcome::Frame(payload))
}

/// TCP client: connects once at construction, then exchanges
/// length-prefixed frames.
pub struct TcpClientTransport {
    stream: TcpStream,
}

impl TcpClientTransport {
    pub fn connect(remote: SocketAddr) -> Result<Self, NioError> {
        let stream = TcpStream::connect(remote)?;
        stream.set_read_timeout(Some(POLL_TIMEOUT))?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }
}

impl Transport for TcpClientTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), NioError> {
        write_framed(&mut self.stream, frame)
    }
    fn recv(&mut self) -> Result<RecvOutcome, NioError> {
        read_framed(&mut self.stream)
    }
}

/// TCP server: accepts at most one client at a time. Frames sent before any
/// client has connected are silently dropped, matching "single accepted
/// client" semantics.
pub struct TcpServerTransport {
    listener: TcpListener,
    client: Option<TcpStream>,
}

impl TcpServerTransport {
    pub fn bind(local_port: u16) -> Result<Self, NioError> {
        let listener = TcpListener::bind(("0.0.0.0", local_port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            client: None,
        })
    }

    fn accept_if_needed(&mut self) -> Result<(), NioError> {
        if self.client.is_some() {
            return Ok(());
        }
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_read_timeout(Some(POLL_TIMEOUT))?;
                stream.set_nodelay(true).ok();
                self.client = Some(stream);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(NioError::Io(e)),
        }
        Ok(())
    }
}

impl Transport for TcpServerTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), NioError> {
        self.accept_if_needed()?;
        if let Some(stream) = self.client.as_mut() {
            write_framed(stream, frame)?;
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<RecvOutcome, NioError> {
        self.accept_if_needed()?;
        let Some(stream) = self.client.as_mut() else {
            std::thread::sleep(POLL_TIMEOUT);
            return Ok(RecvOutcome::WouldBlock);
        };
        match read_framed(stream)? {
            RecvOutcome::Closed => {
                let _ = stream.shutdown(Shutdown::Both);
                self.client = None;
                Ok(RecvOutcome::WouldBlock)
            }
            other => Ok(other),
        }
    }
}
