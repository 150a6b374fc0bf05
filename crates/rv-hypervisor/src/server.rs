//! The TCP line server: one accept loop, one reader thread per connected
//! client, line tokenizing and dispatch, and the `NNN[-| ]text\r\n` reply
//! framing.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::context::HypervisorContext;
use crate::core_module;
use crate::parser::parse_command;
use crate::status::HypervisorStatus;

const ACCEPT_POLL: Duration = Duration::from_millis(200);

pub struct HypervisorServer {
    accept_thread: Option<JoinHandle<()>>,
    ctx: Arc<HypervisorContext>,
    local_addr: std::net::SocketAddr,
}

impl HypervisorServer {
    /// Binds `addr` and starts accepting clients on a background thread.
    /// Each accepted client gets its own reader thread; the whole server
    /// stops accepting once `ctx.request_stop()` (e.g. via the `hypervisor
    /// stop` command) has been called.
    pub fn bind(addr: &str, ctx: Arc<HypervisorContext>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let accept_ctx = ctx.clone();
        let accept_thread = std::thread::spawn(move || accept_loop(listener, accept_ctx));
        Ok(Self {
            accept_thread: Some(accept_thread),
            ctx,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<HypervisorContext> {
        &self.ctx
    }

    /// Requests shutdown and waits for the accept loop (and therefore every
    /// connection it spawned having already observed the flag) to exit.
    pub fn join(mut self) {
        self.ctx.request_stop();
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HypervisorServer {
    fn drop(&mut self) {
        self.ctx.request_stop();
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: TcpListener, ctx: Arc<HypervisorContext>) {
    tracing::info!(addr = ?listener.local_addr(), "hypervisor: accepting connections");
    let mut clients = Vec::new();
    while ctx.is_active() {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "hypervisor: client connected");
                let client_ctx = ctx.clone();
                clients.push(std::thread::spawn(move || handle_client(stream, client_ctx)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "hypervisor: accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    for handle in clients {
        let _ = handle.join();
    }
    tracing::info!("hypervisor: accept loop stopped");
}

fn handle_client(stream: TcpStream, ctx: Arc<HypervisorContext>) {
    let mut writer = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "hypervisor: failed to clone client stream");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let n = match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "hypervisor: client read error");
                break;
            }
        };
        let _ = n;
        let trimmed = line.trim_end_matches(['\r', '\n']);

        let command = match parse_command(trimmed) {
            Ok(None) => continue,
            Ok(Some(cmd)) => cmd,
            Err(e) => {
                let _ = write_reply(&mut writer, e.status, &[e.message]);
                continue;
            }
        };

        let reply = {
            let modules = ctx.modules.lock().unwrap();
            modules.dispatch(&ctx, &command.module, &command.command, &command.args)
        };

        let terminating = core_module::is_connection_terminating(&command.module, &command.command);
        match reply {
            Ok(lines) => {
                let _ = write_reply(&mut writer, HypervisorStatus::InfoOk, &lines);
            }
            Err(e) => {
                let _ = write_reply(&mut writer, e.status, &[e.message]);
            }
        }
        if terminating {
            break;
        }
        if !ctx.is_active() {
            break;
        }
    }
    tracing::debug!("hypervisor: client connection closed");
}

fn write_reply(writer: &mut TcpStream, status: HypervisorStatus, lines: &[String]) -> std::io::Result<()> {
    let code = status.code();
    if lines.is_empty() {
        let text = if status.is_error() { "error" } else { "OK" };
        return write!(writer, "{code} {text}\r\n").and_then(|_| writer.flush());
    }
    for line in &lines[..lines.len() - 1] {
        write!(writer, "{code}-{line}\r\n")?;
    }
    write!(writer, "{code} {}\r\n", lines[lines.len() - 1])?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_module;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;
    use std::sync::Arc;

    fn test_server() -> HypervisorServer {
        let ctx = Arc::new(HypervisorContext::new("1.0.0", "uuid-1".into(), Arc::new(rv_registry::Registry::new())));
        ctx.register_module(core_module::build());
        HypervisorServer::bind("127.0.0.1:0", ctx).unwrap()
    }

    #[test]
    fn version_command_round_trips_over_tcp() {
        let server = test_server();
        let addr = server.local_addr();
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"hypervisor version\r\n").unwrap();
        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, "100 1.0.0\r\n");
        server.join();
    }

    #[test]
    fn unknown_module_returns_error_status_line() {
        let server = test_server();
        let addr = server.local_addr();
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"bogus anything\r\n").unwrap();
        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).unwrap();
        assert!(reply.starts_with("200 "));
        server.join();
    }

    #[test]
    fn close_command_ends_only_that_connection() {
        let server = test_server();
        let addr = server.local_addr();
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"hypervisor close\r\n").unwrap();
        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, "100 OK\r\n");
        // a second client can still connect after the first closed
        let mut stream2 = TcpStream::connect(addr).unwrap();
        stream2.write_all(b"hypervisor version\r\n").unwrap();
        let mut reader2 = BufReader::new(stream2);
        let mut reply2 = String::new();
        reader2.read_line(&mut reply2).unwrap();
        assert_eq!(reply2, "100 1.0.0\r\n");
        server.join();
    }

    #[test]
    fn stop_command_eventually_stops_the_accept_loop() {
        let server = test_server();
        let addr = server.local_addr();
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"hypervisor stop\r\n").unwrap();
        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, "100 OK\r\n");
        server.join();
        assert!(TcpStream::connect(addr).is_err());
    }
}
