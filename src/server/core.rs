//! Dispatcher: decodes datagrams, applies at-most-once reply caching,
//! executes the requested file operation, replies, and fans out update
//! notifications on successful mutations.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec::{
    AppendFileResponse, CodecError, DeleteFileResponse, Message, ModifiedTimestampResponse,
    ReadFileResponse, SubscribeToUpdatesResponse, UpdateNotification, WriteFileResponse,
};
use crate::config::{InvocationSemantics, ServerConfig};
use crate::server::file_adapter::{now_unix, FileAdapter, FileAdapterError};
use crate::transport::{self, DropHook, TransportError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("file adapter error: {0}")]
    FileAdapter(#[from] FileAdapterError),
}

/// A clonable reference to a running [`Server`] used to request a cooperative
/// shutdown from another thread.
#[derive(Clone)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct Server {
    config: ServerConfig,
    file_adapter: FileAdapter,
    reply_history: HashMap<Uuid, Message>,
    running: Arc<AtomicBool>,
    drop_hook: DropHook,
}

impl Server {
    pub fn new(config: ServerConfig, file_adapter: FileAdapter) -> Self {
        Self {
            config,
            file_adapter,
            reply_history: HashMap::new(),
            running: Arc::new(AtomicBool::new(false)),
            drop_hook: DropHook::new(),
        }
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            running: self.running.clone(),
        }
    }

    /// Test-only: arms the server-side drop hook for the next outgoing
    /// datagram (a reply or an update notification).
    pub fn drop_hook(&self) -> &DropHook {
        &self.drop_hook
    }

    /// Binds and serves until [`ServerHandle::stop`] is called. The recv
    /// timeout bounds how long a shutdown request takes to be observed.
    pub fn listen(&mut self) -> Result<(), ServerError> {
        let socket = UdpSocket::bind(self.config.bind_addr)?;
        socket.set_read_timeout(Some(self.config.recv_timeout))?;
        self.running.store(true, Ordering::SeqCst);
        info!(addr = %self.config.bind_addr, "server listening");

        let mut buf = [0u8; 65536];
        while self.running.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    debug!(bytes = n, %from, "received datagram");
                    self.handle_datagram(&buf[..n], from);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!("server stopped listening");
        Ok(())
    }

    fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        let message = match Message::decode(datagram) {
            Ok(m) => m,
            Err(CodecError::UnknownTag(tag)) => {
                warn!(tag, "dropping datagram with unknown class tag");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed datagram");
                return;
            }
        };

        if let Err(e) = self.dispatch(message, from) {
            error!(error = %e, "dispatch failed; continuing to serve");
        }
    }

    fn dispatch(&mut self, message: Message, from: SocketAddr) -> Result<(), ServerError> {
        if self.config.invocation_semantics == InvocationSemantics::AtMostOnce {
            if let Some(request_id) = message.request_id() {
                if let Some(cached_reply) = self.reply_history.get(&request_id) {
                    info!(%request_id, "duplicate request; replaying cached reply");
                    transport::send_oneway(cached_reply, from, &self.drop_hook)?;
                    return Ok(());
                }
            }
        }

        match message {
            Message::ReadFileRequest(req) => {
                let content = self.file_adapter.read(&req.file_name)?;
                let (content, mtime) = match content {
                    Some(bytes) => {
                        let mtime = self.file_adapter.mtime(&req.file_name)?.unwrap_or(0);
                        (bytes, mtime)
                    }
                    None => (Vec::new(), 0),
                };
                let reply = Message::ReadFileResponse(ReadFileResponse {
                    reply_id: Uuid::new_v4(),
                    mtime,
                    content,
                });
                self.reply_and_remember(req.request_id, reply, from)?;
            }

            Message::WriteFileRequest(req) => {
                let success = self.file_adapter.write(&req.file_name, req.offset, &req.content)?;
                let mtime = if success {
                    self.file_adapter.mtime(&req.file_name)?.unwrap_or(0)
                } else {
                    0
                };
                let reply = Message::WriteFileResponse(WriteFileResponse {
                    reply_id: Uuid::new_v4(),
                    success,
                    mtime,
                });
                self.reply_and_remember(req.request_id, reply, from)?;
                if success {
                    self.fan_out(&req.file_name, mtime)?;
                }
            }

            Message::AppendFileRequest(req) => {
                let success = self.file_adapter.append(&req.file_name, &req.content)?;
                let mtime = if success {
                    self.file_adapter.mtime(&req.file_name)?.unwrap_or(0)
                } else {
                    0
                };
                let reply = Message::AppendFileResponse(AppendFileResponse {
                    reply_id: Uuid::new_v4(),
                    success,
                    mtime,
                });
                self.reply_and_remember(req.request_id, reply, from)?;
                if success {
                    self.fan_out(&req.file_name, mtime)?;
                }
            }

            Message::DeleteFileRequest(req) => {
                let success = self.file_adapter.delete(&req.file_name)?;
                let reply = Message::DeleteFileResponse(DeleteFileResponse {
                    reply_id: Uuid::new_v4(),
                    success,
                });
                self.reply_and_remember(req.request_id, reply, from)?;
                // No subscriber fan-out on delete (preserved source behavior).
            }

            Message::SubscribeToUpdatesRequest(req) => {
                // Registers the client's self-reported address (wire field),
                // not the observed sender address.
                let success = self.file_adapter.subscribe(
                    req.client_ip,
                    req.client_port as u16,
                    req.monitoring_interval,
                    &req.file_name,
                    now_unix(),
                );
                let reply = Message::SubscribeToUpdatesResponse(SubscribeToUpdatesResponse {
                    reply_id: Uuid::new_v4(),
                    success,
                });
                self.reply_and_remember(req.request_id, reply, from)?;
            }

            Message::ModifiedTimestampRequest(req) => {
                let mtime = self.file_adapter.mtime(&req.file_path)?;
                let success = mtime.is_some();
                if !success {
                    error!(path = req.file_path, "mtime check failed: file does not exist");
                }
                let reply = Message::ModifiedTimestampResponse(ModifiedTimestampResponse {
                    reply_id: Uuid::new_v4(),
                    success,
                    mtime: mtime.unwrap_or(0),
                });
                self.reply_and_remember(req.request_id, reply, from)?;
            }

            // Replies and notifications are never sent to the server.
            Message::ReadFileResponse(_)
            | Message::WriteFileResponse(_)
            | Message::SubscribeToUpdatesResponse(_)
            | Message::UpdateNotification(_)
            | Message::ModifiedTimestampResponse(_)
            | Message::DeleteFileResponse(_)
            | Message::AppendFileResponse(_) => {
                warn!("dropping reply/notification variant received at server");
            }
        }
        Ok(())
    }

    fn reply_and_remember(&mut self, request_id: Uuid, reply: Message, from: SocketAddr) -> Result<(), ServerError> {
        transport::send_oneway(&reply, from, &self.drop_hook)?;
        if self.config.invocation_semantics == InvocationSemantics::AtMostOnce {
            self.reply_history.insert(request_id, reply);
        }
        Ok(())
    }

    /// Sends an `UpdateNotification` to every non-expired subscriber of
    /// `path`, in subscription order, carrying the post-mutation whole-file
    /// content.
    fn fan_out(&self, path: &str, mtime: u32) -> Result<(), ServerError> {
        let now = now_unix();
        let subscribers = self.file_adapter.subscribers(path, now);
        if subscribers.is_empty() {
            return Ok(());
        }
        let content = self.file_adapter.read(path)?.unwrap_or_default();
        for subscriber in subscribers {
            let notification = Message::UpdateNotification(UpdateNotification {
                file_name: path.to_string(),
                mtime,
                content: content.clone(),
            });
            let addr = SocketAddr::new(IpAddr::V4(subscriber.client_ip), subscriber.client_port);
            if let Err(e) = transport::send_oneway(&notification, addr, &self.drop_hook) {
                warn!(%addr, error = %e, "failed to deliver update notification");
            }
        }
        Ok(())
    }
}
