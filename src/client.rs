//! Client core: orchestrates reads/writes/appends/deletes/subscriptions over
//! [`crate::transport`], keeping [`crate::cache::Cache`] in sync.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{Cache, CacheError};
use crate::codec::{
    AppendFileRequest, CodecError, DeleteFileRequest, Message, ModifiedTimestampRequest,
    ReadFileRequest, SubscribeToUpdatesRequest, WriteFileRequest,
};
use crate::config::ClientConfig;
use crate::transport::{self, DropHook, TransportError};

fn slice_bounded(bytes: &[u8], offset: usize, nbytes: usize) -> Vec<u8> {
    let start = offset.min(bytes.len());
    let end = start.saturating_add(nbytes).min(bytes.len());
    bytes[start..end].to_vec()
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("server sent an unexpected reply variant")]
    UnexpectedReply,
}

/// The outcome of a mutating or querying operation that may have timed out
/// after exhausting retries. A `NoReply` leaves the operation's effect on the
/// server unknown to the caller — important under at-least-once semantics
/// for non-idempotent operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Reply(T),
    NoReply,
}

pub struct Client {
    config: ClientConfig,
    cache: Cache,
    drop_hook: DropHook,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let cache_dir = config.cache_dir.clone();
        Self {
            config,
            cache: Cache::new(cache_dir),
            drop_hook: DropHook::new(),
        }
    }

    /// Test-only: arms the client-side drop hook for the next outgoing send.
    pub fn drop_hook(&self) -> &DropHook {
        &self.drop_hook
    }

    fn send_request(&self, msg: &Message) -> Result<Option<Message>, ClientError> {
        Ok(transport::send_request(
            msg,
            self.config.server_addr,
            self.config.max_attempts,
            self.config.per_attempt_timeout,
            &self.drop_hook,
        )?)
    }

    /// Reads `path[offset..offset+nbytes]`, consulting the cache-freshness
    /// protocol (§4.4) before falling back to the server.
    pub fn read(&mut self, path: &str, offset: usize, nbytes: usize) -> Result<Outcome<Vec<u8>>, ClientError> {
        let now = now_unix();

        if self.cache.is_cached(path) {
            let validation_ts = self.cache.validation_ts(path).unwrap();
            if now.saturating_sub(validation_ts) < self.config.freshness_interval.as_secs() {
                info!(path, "serving read from cache: within freshness interval");
                return Ok(Outcome::Reply(slice_bounded(&self.cache.read(path)?, offset, nbytes)));
            }

            match self.fetch_mtime(path)? {
                Outcome::NoReply => return Ok(Outcome::NoReply),
                Outcome::Reply(server_mtime) => {
                    if Some(server_mtime) == self.cache.modification_ts(path) {
                        self.cache.validate(path, now);
                        info!(path, "serving read from cache: mtime unchanged");
                        return Ok(Outcome::Reply(slice_bounded(&self.cache.read(path)?, offset, nbytes)));
                    }
                }
            }
        }

        let request_id = Uuid::new_v4();
        let reply = self.send_request(&Message::ReadFileRequest(ReadFileRequest {
            request_id,
            file_name: path.to_string(),
        }))?;

        match reply {
            None => Ok(Outcome::NoReply),
            Some(Message::ReadFileResponse(resp)) => {
                self.cache.put(path, &resp.content, now, resp.mtime)?;
                Ok(Outcome::Reply(slice_bounded(&self.cache.read(path)?, offset, nbytes)))
            }
            Some(_) => Err(ClientError::UnexpectedReply),
        }
    }

    fn fetch_mtime(&self, path: &str) -> Result<Outcome<u32>, ClientError> {
        let request_id = Uuid::new_v4();
        let reply = self.send_request(&Message::ModifiedTimestampRequest(ModifiedTimestampRequest {
            request_id,
            file_path: path.to_string(),
        }))?;
        match reply {
            None => Ok(Outcome::NoReply),
            Some(Message::ModifiedTimestampResponse(resp)) => Ok(Outcome::Reply(resp.mtime)),
            Some(_) => Err(ClientError::UnexpectedReply),
        }
    }

    pub fn get_modified_timestamp(&self, path: &str) -> Result<Outcome<u32>, ClientError> {
        self.fetch_mtime(path)
    }

    /// Writes `content` at `offset`. On a successful reply, patches the cache
    /// in place (if the path is cached) without refreshing timestamps.
    pub fn write(&mut self, path: &str, offset: u32, content: &[u8]) -> Result<Outcome<bool>, ClientError> {
        let request_id = Uuid::new_v4();
        let reply = self.send_request(&Message::WriteFileRequest(WriteFileRequest {
            request_id,
            offset,
            file_name: path.to_string(),
            content: content.to_vec(),
        }))?;

        match reply {
            None => Ok(Outcome::NoReply),
            Some(Message::WriteFileResponse(resp)) => {
                if resp.success && self.cache.is_cached(path) {
                    self.cache.update_after_write(path, offset, content)?;
                }
                Ok(Outcome::Reply(resp.success))
            }
            Some(_) => Err(ClientError::UnexpectedReply),
        }
    }

    pub fn append(&mut self, path: &str, content: &[u8]) -> Result<Outcome<bool>, ClientError> {
        let request_id = Uuid::new_v4();
        let reply = self.send_request(&Message::AppendFileRequest(AppendFileRequest {
            request_id,
            file_name: path.to_string(),
            content: content.to_vec(),
        }))?;

        match reply {
            None => Ok(Outcome::NoReply),
            Some(Message::AppendFileResponse(resp)) => {
                if resp.success && self.cache.is_cached(path) {
                    self.cache.update_after_append(path, content)?;
                }
                Ok(Outcome::Reply(resp.success))
            }
            Some(_) => Err(ClientError::UnexpectedReply),
        }
    }

    /// Deletes `path` on the server and evicts the local cache entry on
    /// success (a correction over the source, which leaves stale entries
    /// behind after a delete).
    pub fn delete(&mut self, path: &str) -> Result<Outcome<bool>, ClientError> {
        let request_id = Uuid::new_v4();
        let reply = self.send_request(&Message::DeleteFileRequest(DeleteFileRequest {
            request_id,
            file_name: path.to_string(),
        }))?;

        match reply {
            None => Ok(Outcome::NoReply),
            Some(Message::DeleteFileResponse(resp)) => {
                if resp.success {
                    self.cache.remove(path)?;
                }
                Ok(Outcome::Reply(resp.success))
            }
            Some(_) => Err(ClientError::UnexpectedReply),
        }
    }

    /// Registers interest in `path`'s updates, then blocks in
    /// [`Client::listen_for_updates`] for `monitoring_interval_secs`.
    ///
    /// Binds the listening socket *before* sending the subscribe request so
    /// the `client_port` the server is told to notify is the port the OS
    /// actually assigned (the configured port may be `0`, meaning "pick an
    /// ephemeral port") rather than the literal configured value, which would
    /// otherwise never match where this client is actually listening.
    pub fn subscribe(&mut self, path: &str, monitoring_interval_secs: u32) -> Result<Outcome<bool>, ClientError> {
        let bind_addr: SocketAddr =
            format!("{}:{}", self.config.client_ip(), self.config.client_port).parse().expect("valid socket address");
        let socket = UdpSocket::bind(bind_addr)?;
        let listen_port = socket.local_addr()?.port();

        let request_id = Uuid::new_v4();
        let reply = self.send_request(&Message::SubscribeToUpdatesRequest(SubscribeToUpdatesRequest {
            request_id,
            client_ip: self.config.client_ip(),
            client_port: listen_port as u32,
            monitoring_interval: monitoring_interval_secs,
            file_name: path.to_string(),
        }))?;

        match reply {
            None => Ok(Outcome::NoReply),
            Some(Message::SubscribeToUpdatesResponse(resp)) => {
                if resp.success {
                    self.listen_for_updates(&socket, monitoring_interval_secs)?;
                }
                Ok(Outcome::Reply(resp.success))
            }
            Some(_) => Err(ClientError::UnexpectedReply),
        }
    }

    /// Applies every incoming `UpdateNotification` on `socket` to the cache
    /// until the monitoring window elapses with no datagram pending.
    pub fn listen_for_updates(&mut self, socket: &UdpSocket, monitoring_interval_secs: u32) -> Result<(), ClientError> {
        socket.set_read_timeout(Some(std::time::Duration::from_secs(monitoring_interval_secs as u64)))?;

        let deadline = now_unix().saturating_add(monitoring_interval_secs as u64);
        let mut buf = [0u8; 65536];
        loop {
            if now_unix() >= deadline {
                break;
            }
            match socket.recv(&mut buf) {
                Ok(n) => match Message::decode(&buf[..n]) {
                    Ok(Message::UpdateNotification(notif)) => {
                        info!(path = notif.file_name, "applying update notification");
                        self.cache.put(&notif.file_name, &notif.content, now_unix(), notif.mtime)?;
                    }
                    Ok(_) => warn!("ignoring non-notification datagram on update listener"),
                    Err(CodecError::UnknownTag(tag)) => warn!(tag, "ignoring malformed update datagram"),
                    Err(e) => warn!(error = %e, "ignoring malformed update datagram"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn test_config(server_addr: SocketAddr, cache_dir: std::path::PathBuf) -> ClientConfig {
        ClientConfig {
            client_port: 0,
            server_addr,
            cache_dir,
            freshness_interval: Duration::from_secs(10),
            max_attempts: 3,
            per_attempt_timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn read_populates_cache_on_first_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            let (n, from) = server.recv_from(&mut buf).unwrap();
            let req = Message::decode(&buf[..n]).unwrap();
            let request_id = req.request_id().unwrap();
            let reply = Message::ReadFileResponse(crate::codec::ReadFileResponse {
                reply_id: Uuid::new_v4(),
                mtime: 42,
                content: b"ABCDEFGHIJKLMNOPQRSTUVWXYZ".to_vec(),
            });
            let _ = request_id;
            server.send_to(&reply.encode(), from).unwrap();
        });

        let mut client = Client::new(test_config(server_addr, dir.path().to_path_buf()));
        let outcome = client.read("english_alphabets.txt", 4, 4).unwrap();
        assert_eq!(outcome, Outcome::Reply(b"EFGH".to_vec()));
        assert!(client.cache.is_cached("english_alphabets.txt"));
        handle.join().unwrap();
    }

    #[test]
    fn read_within_freshness_interval_issues_no_network_call() {
        let dir = tempfile::tempdir().unwrap();
        // Bind then drop: any send here would go nowhere, proving the
        // second read never touches the network.
        let placeholder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = placeholder.local_addr().unwrap();
        drop(placeholder);

        let mut client = Client::new(test_config(server_addr, dir.path().to_path_buf()));
        client.cache.put("digits.txt", b"0123456789", now_unix(), 1).unwrap();

        let outcome = client.read("digits.txt", 0, 4).unwrap();
        assert_eq!(outcome, Outcome::Reply(b"0123".to_vec()));
    }

    #[test]
    fn delete_evicts_cache_entry_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            let (n, from) = server.recv_from(&mut buf).unwrap();
            let _ = Message::decode(&buf[..n]).unwrap();
            let reply = Message::DeleteFileResponse(crate::codec::DeleteFileResponse {
                reply_id: Uuid::new_v4(),
                success: true,
            });
            server.send_to(&reply.encode(), from).unwrap();
        });

        let mut client = Client::new(test_config(server_addr, dir.path().to_path_buf()));
        client.cache.put("gone.txt", b"x", now_unix(), 1).unwrap();
        let outcome = client.delete("gone.txt").unwrap();
        assert_eq!(outcome, Outcome::Reply(true));
        assert!(!client.cache.is_cached("gone.txt"));
        handle.join().unwrap();
    }

    #[test]
    fn no_reply_after_exhausting_attempts_is_surfaced_as_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let dead_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dead_addr = dead_socket.local_addr().unwrap();
        drop(dead_socket);

        let mut config = test_config(dead_addr, dir.path().to_path_buf());
        config.max_attempts = 2;
        config.per_attempt_timeout = Duration::from_millis(100);
        let mut client = Client::new(config);

        let outcome = client.write("a.txt", 0, b"x").unwrap();
        assert_eq!(outcome, Outcome::NoReply);
    }

    #[test]
    fn client_ip_defaults_to_loopback() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config("127.0.0.1:9".parse().unwrap(), dir.path().to_path_buf());
        assert_eq!(config.client_ip(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn subscribe_with_default_zero_port_still_receives_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            let (n, from) = server.recv_from(&mut buf).unwrap();
            let req = match Message::decode(&buf[..n]).unwrap() {
                Message::SubscribeToUpdatesRequest(req) => req,
                other => panic!("unexpected message: {other:?}"),
            };
            assert_ne!(req.client_port, 0, "client must report its real bound port, not the configured 0");

            let ack = Message::SubscribeToUpdatesResponse(crate::codec::SubscribeToUpdatesResponse {
                reply_id: Uuid::new_v4(),
                success: true,
            });
            server.send_to(&ack.encode(), from).unwrap();

            let notify_addr: SocketAddr = format!("127.0.0.1:{}", req.client_port).parse().unwrap();
            let notification = Message::UpdateNotification(crate::codec::UpdateNotification {
                file_name: "watched.txt".to_string(),
                mtime: 99,
                content: b"fresh content".to_vec(),
            });
            server.send_to(&notification.encode(), notify_addr).unwrap();
        });

        // `test_config` uses the documented default of `client_port: 0`, i.e.
        // "pick an ephemeral port" — the bug this test guards against.
        let mut client = Client::new(test_config(server_addr, dir.path().to_path_buf()));
        let outcome = client.subscribe("watched.txt", 2).unwrap();
        assert_eq!(outcome, Outcome::Reply(true));
        assert_eq!(client.cache.read("watched.txt").unwrap(), b"fresh content");
        handle.join().unwrap();
    }
}
