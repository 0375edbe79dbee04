//! Request/reply transport over blocking UDP.
//!
//! Every send opens a fresh socket bound to an ephemeral port; the socket is
//! dropped (and its port released) at the end of the call. The transport
//! keeps no ordering or deduplication state of its own — that lives in the
//! client cache and the server's reply history.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::{CodecError, Message};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed reply: {0}")]
    Codec(#[from] CodecError),
}

/// Single-use "drop the next outgoing datagram" switch, for failure-injection
/// tests. Armed with [`DropHook::arm`]; a send consults [`DropHook::take`]
/// once and, if it was armed, silently discards the datagram instead of
/// putting it on the wire.
#[derive(Debug, Default)]
pub struct DropHook {
    armed: AtomicBool,
}

impl DropHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Returns whether the hook was armed, disarming it either way.
    fn take(&self) -> bool {
        self.armed.swap(false, Ordering::SeqCst)
    }
}

/// Sends `msg` to `addr` and waits for a reply, retrying up to
/// `max_attempts` times with `per_attempt_timeout` between sends. Returns
/// `None` if every attempt times out (the "no reply" sentinel — callers must
/// treat the operation's outcome as unknown).
pub fn send_request(
    msg: &Message,
    addr: SocketAddr,
    max_attempts: u32,
    per_attempt_timeout: Duration,
    drop_hook: &DropHook,
) -> Result<Option<Message>, TransportError> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(per_attempt_timeout))?;
    debug!(local = ?socket.local_addr()?, "opened request socket");

    let outgoing = msg.encode();
    let mut buf = [0u8; 65536];

    for attempt in 0..max_attempts {
        if drop_hook.take() {
            debug!("dropping outgoing datagram per test hook");
            std::thread::sleep(per_attempt_timeout);
            continue;
        }

        socket.send_to(&outgoing, addr)?;
        debug!(attempt, %addr, "sent request");

        match socket.recv(&mut buf) {
            Ok(n) => {
                let reply = Message::decode(&buf[..n])?;
                debug!(%addr, "received reply");
                return Ok(Some(reply));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                warn!(attempt, "attempt timed out waiting for a response");
            }
            Err(e) => return Err(e.into()),
        }
    }

    warn!(max_attempts, "no reply received after exhausting attempts");
    Ok(None)
}

/// Sends `msg` to `addr` and returns immediately without waiting for a reply.
/// Used by the server for replies and update notifications, which are
/// one-shot and unacknowledged.
pub fn send_oneway(msg: &Message, addr: SocketAddr, drop_hook: &DropHook) -> Result<(), TransportError> {
    if drop_hook.take() {
        debug!("dropping outgoing datagram per test hook");
        return Ok(());
    }

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let outgoing = msg.encode();
    socket.send_to(&outgoing, addr)?;
    debug!(%addr, "sent one-way message");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DeleteFileRequest, DeleteFileResponse};
    use std::net::Ipv4Addr;
    use uuid::Uuid;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn send_request_receives_reply_from_echo_server() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();

        let reply = Message::DeleteFileResponse(DeleteFileResponse {
            reply_id: Uuid::new_v4(),
            success: true,
        });
        let reply_bytes = reply.clone().encode();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 1024];
            let (n, from) = server.recv_from(&mut buf).unwrap();
            assert!(n > 0);
            server.send_to(&reply_bytes, from).unwrap();
        });

        let request = Message::DeleteFileRequest(DeleteFileRequest {
            request_id: Uuid::new_v4(),
            file_name: "x.txt".to_string(),
        });
        let hook = DropHook::new();
        let response = send_request(&request, server_addr, 3, Duration::from_secs(2), &hook).unwrap();
        assert_eq!(response, Some(reply));
        handle.join().unwrap();
    }

    #[test]
    fn send_request_exhausts_attempts_against_silent_peer() {
        // Bind a socket nobody replies on, to exercise timeout-exhaustion.
        let dead_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dead_addr = dead_socket.local_addr().unwrap();
        drop(dead_socket);

        let request = Message::DeleteFileRequest(DeleteFileRequest {
            request_id: Uuid::new_v4(),
            file_name: "x.txt".to_string(),
        });
        let hook = DropHook::new();
        let response = send_request(&request, loopback(dead_addr.port()), 2, Duration::from_millis(100), &hook)
            .unwrap();
        assert_eq!(response, None);
    }

    #[test]
    fn drop_hook_discards_exactly_one_send() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
        let server_addr = server.local_addr().unwrap();

        let hook = DropHook::new();
        hook.arm();
        send_oneway(
            &Message::DeleteFileResponse(DeleteFileResponse {
                reply_id: Uuid::new_v4(),
                success: true,
            }),
            server_addr,
            &hook,
        )
        .unwrap();

        let mut buf = [0u8; 1024];
        assert!(server.recv_from(&mut buf).is_err(), "dropped datagram must never arrive");
        assert!(!hook.take(), "hook disarms itself after firing once");
    }
}
