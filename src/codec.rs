//! Wire protocol — tagged request/reply/notification messages.
//!
//! Every message is framed as `class_tag(4B, big-endian) || body`. There is
//! no envelope length field: one UDP datagram carries exactly one message,
//! and the whole datagram payload is the message. The tag uniquely
//! determines how the body is parsed; an unknown tag is a [`CodecError`].

use std::net::Ipv4Addr;

use thiserror::Error;
use uuid::Uuid;

const TAG_READ_FILE_REQUEST: u32 = 1;
const TAG_WRITE_FILE_REQUEST: u32 = 2;
const TAG_SUBSCRIBE_REQUEST: u32 = 3;
const TAG_READ_FILE_RESPONSE: u32 = 4;
const TAG_WRITE_FILE_RESPONSE: u32 = 5;
const TAG_SUBSCRIBE_RESPONSE: u32 = 6;
const TAG_UPDATE_NOTIFICATION: u32 = 7;
const TAG_MTIME_REQUEST: u32 = 8;
const TAG_MTIME_RESPONSE: u32 = 9;
const TAG_DELETE_REQUEST: u32 = 10;
const TAG_DELETE_RESPONSE: u32 = 11;
const TAG_APPEND_REQUEST: u32 = 12;
const TAG_APPEND_RESPONSE: u32 = 13;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("datagram ran out of bytes while parsing")]
    Truncated,
    #[error("unknown class tag {0}")]
    UnknownTag(u32),
    #[error("file name is not valid utf-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFileRequest {
    pub request_id: Uuid,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFileRequest {
    pub request_id: Uuid,
    pub offset: u32,
    pub file_name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeToUpdatesRequest {
    pub request_id: Uuid,
    pub client_ip: Ipv4Addr,
    pub client_port: u32,
    pub monitoring_interval: u32,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFileResponse {
    pub reply_id: Uuid,
    pub mtime: u32,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFileResponse {
    pub reply_id: Uuid,
    pub success: bool,
    pub mtime: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeToUpdatesResponse {
    pub reply_id: Uuid,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateNotification {
    pub file_name: String,
    pub mtime: u32,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedTimestampRequest {
    pub request_id: Uuid,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedTimestampResponse {
    pub reply_id: Uuid,
    pub success: bool,
    pub mtime: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFileRequest {
    pub request_id: Uuid,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFileResponse {
    pub reply_id: Uuid,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendFileRequest {
    pub request_id: Uuid,
    pub file_name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendFileResponse {
    pub reply_id: Uuid,
    pub success: bool,
    pub mtime: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ReadFileRequest(ReadFileRequest),
    WriteFileRequest(WriteFileRequest),
    SubscribeToUpdatesRequest(SubscribeToUpdatesRequest),
    ReadFileResponse(ReadFileResponse),
    WriteFileResponse(WriteFileResponse),
    SubscribeToUpdatesResponse(SubscribeToUpdatesResponse),
    UpdateNotification(UpdateNotification),
    ModifiedTimestampRequest(ModifiedTimestampRequest),
    ModifiedTimestampResponse(ModifiedTimestampResponse),
    DeleteFileRequest(DeleteFileRequest),
    DeleteFileResponse(DeleteFileResponse),
    AppendFileRequest(AppendFileRequest),
    AppendFileResponse(AppendFileResponse),
}

impl Message {
    /// The request_id carried by this message, if it is a request that
    /// participates in at-most-once reply caching.
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            Message::ReadFileRequest(m) => Some(m.request_id),
            Message::WriteFileRequest(m) => Some(m.request_id),
            Message::SubscribeToUpdatesRequest(m) => Some(m.request_id),
            Message::ModifiedTimestampRequest(m) => Some(m.request_id),
            Message::DeleteFileRequest(m) => Some(m.request_id),
            Message::AppendFileRequest(m) => Some(m.request_id),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let tag = match self {
            Message::ReadFileRequest(_) => TAG_READ_FILE_REQUEST,
            Message::WriteFileRequest(_) => TAG_WRITE_FILE_REQUEST,
            Message::SubscribeToUpdatesRequest(_) => TAG_SUBSCRIBE_REQUEST,
            Message::ReadFileResponse(_) => TAG_READ_FILE_RESPONSE,
            Message::WriteFileResponse(_) => TAG_WRITE_FILE_RESPONSE,
            Message::SubscribeToUpdatesResponse(_) => TAG_SUBSCRIBE_RESPONSE,
            Message::UpdateNotification(_) => TAG_UPDATE_NOTIFICATION,
            Message::ModifiedTimestampRequest(_) => TAG_MTIME_REQUEST,
            Message::ModifiedTimestampResponse(_) => TAG_MTIME_RESPONSE,
            Message::DeleteFileRequest(_) => TAG_DELETE_REQUEST,
            Message::DeleteFileResponse(_) => TAG_DELETE_RESPONSE,
            Message::AppendFileRequest(_) => TAG_APPEND_REQUEST,
            Message::AppendFileResponse(_) => TAG_APPEND_RESPONSE,
        };
        push_u32(&mut out, tag);
        match self {
            Message::ReadFileRequest(m) => {
                push_uuid(&mut out, m.request_id);
                push_string(&mut out, &m.file_name);
            }
            Message::WriteFileRequest(m) => {
                push_uuid(&mut out, m.request_id);
                push_u32(&mut out, m.offset);
                push_u32(&mut out, m.file_name.len() as u32);
                push_u32(&mut out, m.content.len() as u32);
                out.extend_from_slice(m.file_name.as_bytes());
                out.extend_from_slice(&m.content);
            }
            Message::SubscribeToUpdatesRequest(m) => {
                push_uuid(&mut out, m.request_id);
                out.extend_from_slice(&m.client_ip.octets());
                push_u32(&mut out, m.client_port);
                push_u32(&mut out, m.monitoring_interval);
                push_string(&mut out, &m.file_name);
            }
            Message::ReadFileResponse(m) => {
                push_uuid(&mut out, m.reply_id);
                push_u32(&mut out, m.mtime);
                out.extend_from_slice(&m.content);
            }
            Message::WriteFileResponse(m) => {
                push_uuid(&mut out, m.reply_id);
                push_bool(&mut out, m.success);
                push_u32(&mut out, m.mtime);
            }
            Message::SubscribeToUpdatesResponse(m) => {
                push_uuid(&mut out, m.reply_id);
                push_bool(&mut out, m.success);
            }
            Message::UpdateNotification(m) => {
                push_u32(&mut out, m.file_name.len() as u32);
                out.extend_from_slice(m.file_name.as_bytes());
                push_u32(&mut out, m.mtime);
                push_u32(&mut out, m.content.len() as u32);
                out.extend_from_slice(&m.content);
            }
            Message::ModifiedTimestampRequest(m) => {
                push_uuid(&mut out, m.request_id);
                out.extend_from_slice(m.file_path.as_bytes());
            }
            Message::ModifiedTimestampResponse(m) => {
                push_uuid(&mut out, m.reply_id);
                push_bool(&mut out, m.success);
                push_u32(&mut out, m.mtime);
            }
            Message::DeleteFileRequest(m) => {
                push_uuid(&mut out, m.request_id);
                push_string(&mut out, &m.file_name);
            }
            Message::DeleteFileResponse(m) => {
                push_uuid(&mut out, m.reply_id);
                push_bool(&mut out, m.success);
            }
            Message::AppendFileRequest(m) => {
                push_uuid(&mut out, m.request_id);
                push_u32(&mut out, m.file_name.len() as u32);
                push_u32(&mut out, m.content.len() as u32);
                out.extend_from_slice(m.file_name.as_bytes());
                out.extend_from_slice(&m.content);
            }
            Message::AppendFileResponse(m) => {
                push_uuid(&mut out, m.reply_id);
                push_bool(&mut out, m.success);
                push_u32(&mut out, m.mtime);
            }
        }
        out
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(datagram);
        let tag = r.u32()?;
        match tag {
            TAG_READ_FILE_REQUEST => Ok(Message::ReadFileRequest(ReadFileRequest {
                request_id: r.uuid()?,
                file_name: r.string_len_prefixed()?,
            })),
            TAG_WRITE_FILE_REQUEST => {
                let request_id = r.uuid()?;
                let offset = r.u32()?;
                let name_len = r.u32()? as usize;
                let content_len = r.u32()? as usize;
                let file_name = r.string(name_len)?;
                let content = r.take(content_len)?.to_vec();
                Ok(Message::WriteFileRequest(WriteFileRequest {
                    request_id,
                    offset,
                    file_name,
                    content,
                }))
            }
            TAG_SUBSCRIBE_REQUEST => {
                let request_id = r.uuid()?;
                let client_ip = r.ipv4()?;
                let client_port = r.u32()?;
                let monitoring_interval = r.u32()?;
                let file_name = r.string_len_prefixed()?;
                Ok(Message::SubscribeToUpdatesRequest(SubscribeToUpdatesRequest {
                    request_id,
                    client_ip,
                    client_port,
                    monitoring_interval,
                    file_name,
                }))
            }
            TAG_READ_FILE_RESPONSE => {
                let reply_id = r.uuid()?;
                let mtime = r.u32()?;
                let content = r.rest().to_vec();
                Ok(Message::ReadFileResponse(ReadFileResponse {
                    reply_id,
                    mtime,
                    content,
                }))
            }
            TAG_WRITE_FILE_RESPONSE => Ok(Message::WriteFileResponse(WriteFileResponse {
                reply_id: r.uuid()?,
                success: r.bool_()?,
                mtime: r.u32()?,
            })),
            TAG_SUBSCRIBE_RESPONSE => Ok(Message::SubscribeToUpdatesResponse(SubscribeToUpdatesResponse {
                reply_id: r.uuid()?,
                success: r.bool_()?,
            })),
            TAG_UPDATE_NOTIFICATION => {
                let name_len = r.u32()? as usize;
                let file_name = r.string(name_len)?;
                let mtime = r.u32()?;
                let content_len = r.u32()? as usize;
                let content = r.take(content_len)?.to_vec();
                Ok(Message::UpdateNotification(UpdateNotification {
                    file_name,
                    mtime,
                    content,
                }))
            }
            TAG_MTIME_REQUEST => {
                let request_id = r.uuid()?;
                let file_path = String::from_utf8(r.rest().to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Message::ModifiedTimestampRequest(ModifiedTimestampRequest {
                    request_id,
                    file_path,
                }))
            }
            TAG_MTIME_RESPONSE => Ok(Message::ModifiedTimestampResponse(ModifiedTimestampResponse {
                reply_id: r.uuid()?,
                success: r.bool_()?,
                mtime: r.u32()?,
            })),
            TAG_DELETE_REQUEST => Ok(Message::DeleteFileRequest(DeleteFileRequest {
                request_id: r.uuid()?,
                file_name: r.string_len_prefixed()?,
            })),
            TAG_DELETE_RESPONSE => Ok(Message::DeleteFileResponse(DeleteFileResponse {
                reply_id: r.uuid()?,
                success: r.bool_()?,
            })),
            TAG_APPEND_REQUEST => {
                let request_id = r.uuid()?;
                let name_len = r.u32()? as usize;
                let content_len = r.u32()? as usize;
                let file_name = r.string(name_len)?;
                let content = r.take(content_len)?.to_vec();
                Ok(Message::AppendFileRequest(AppendFileRequest {
                    request_id,
                    file_name,
                    content,
                }))
            }
            TAG_APPEND_RESPONSE => Ok(Message::AppendFileResponse(AppendFileResponse {
                reply_id: r.uuid()?,
                success: r.bool_()?,
                mtime: r.u32()?,
            })),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn push_bool(out: &mut Vec<u8>, v: bool) {
    out.push(v as u8);
}

fn push_uuid(out: &mut Vec<u8>, v: Uuid) {
    out.extend_from_slice(v.as_bytes());
}

fn push_string(out: &mut Vec<u8>, s: &str) {
    push_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

/// Bounds-checked cursor over a decoded datagram.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated)?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn bool_(&mut self) -> Result<bool, CodecError> {
        Ok(self.take(1)?[0] != 0)
    }

    fn uuid(&mut self) -> Result<Uuid, CodecError> {
        let bytes = self.take(16)?;
        Ok(Uuid::from_slice(bytes).expect("16 bytes is always a valid slice length"))
    }

    fn ipv4(&mut self) -> Result<Ipv4Addr, CodecError> {
        let bytes = self.take(4)?;
        Ok(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
    }

    fn string(&mut self, len: usize) -> Result<String, CodecError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn string_len_prefixed(&mut self) -> Result<String, CodecError> {
        let len = self.u32()? as usize;
        self.string(len)
    }
}
