//! Translation of file operations against a server root directory, plus the
//! subscription registry. Stateless over the filesystem itself: every method
//! resolves `server_root / relative_path` and talks directly to the OS.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum FileAdapterError {
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct SubscribedClient {
    pub client_ip: Ipv4Addr,
    pub client_port: u16,
    pub expiration_ts: u64,
}

pub struct FileAdapter {
    server_root: PathBuf,
    subscriptions: HashMap<String, Vec<SubscribedClient>>,
}

impl FileAdapter {
    pub fn new(server_root: PathBuf) -> Self {
        Self {
            server_root,
            subscriptions: HashMap::new(),
        }
    }

    fn resolve(&self, relative_path: &str) -> PathBuf {
        self.server_root.join(relative_path)
    }

    /// `None` if the file does not exist.
    pub fn read(&self, relative_path: &str) -> Result<Option<Vec<u8>>, FileAdapterError> {
        let full_path = self.resolve(relative_path);
        if !full_path.exists() {
            warn!(path = relative_path, "read: file does not exist");
            return Ok(None);
        }
        Ok(Some(fs::read(full_path)?))
    }

    /// `None` if the file does not exist.
    pub fn mtime(&self, relative_path: &str) -> Result<Option<u32>, FileAdapterError> {
        let full_path = self.resolve(relative_path);
        if !full_path.exists() {
            warn!(path = relative_path, "mtime: file does not exist");
            return Ok(None);
        }
        let metadata = fs::metadata(full_path)?;
        let modified = metadata.modified()?;
        let secs = modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Ok(Some(secs as u32))
    }

    /// Writes `content` at `offset`, a single atomic seek+write. Returns
    /// `false` (not an error) if the target file does not already exist.
    pub fn write(&self, relative_path: &str, offset: u32, content: &[u8]) -> Result<bool, FileAdapterError> {
        use std::io::{Seek, SeekFrom, Write};
        let full_path = self.resolve(relative_path);
        if !full_path.exists() {
            warn!(path = relative_path, "write: file does not exist");
            return Ok(false);
        }
        let mut file = fs::OpenOptions::new().write(true).open(full_path)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(content)?;
        Ok(true)
    }

    /// Returns `false` (not an error) if the target file does not already
    /// exist.
    pub fn append(&self, relative_path: &str, content: &[u8]) -> Result<bool, FileAdapterError> {
        use std::io::Write;
        let full_path = self.resolve(relative_path);
        if !full_path.exists() {
            warn!(path = relative_path, "append: file does not exist");
            return Ok(false);
        }
        let mut file = fs::OpenOptions::new().append(true).open(full_path)?;
        file.write_all(content)?;
        Ok(true)
    }

    pub fn delete(&self, relative_path: &str) -> Result<bool, FileAdapterError> {
        let full_path = self.resolve(relative_path);
        if !full_path.exists() {
            return Ok(false);
        }
        fs::remove_file(full_path)?;
        Ok(true)
    }

    /// Registers a subscription, always succeeding (matches the source
    /// behavior: subscribing to a not-yet-existing path is allowed, since a
    /// file may be created after the subscription is registered).
    pub fn subscribe(
        &mut self,
        client_ip: Ipv4Addr,
        client_port: u16,
        monitoring_interval_secs: u32,
        relative_path: &str,
        now: u64,
    ) -> bool {
        let expiration_ts = now.saturating_add(monitoring_interval_secs as u64);
        self.subscriptions
            .entry(relative_path.to_string())
            .or_default()
            .push(SubscribedClient {
                client_ip,
                client_port,
                expiration_ts,
            });
        info!(path = relative_path, %client_ip, client_port, "subscribed to updates");
        true
    }

    /// Non-expired subscribers for `relative_path`, in subscription order.
    pub fn subscribers(&self, relative_path: &str, now: u64) -> Vec<&SubscribedClient> {
        self.subscriptions
            .get(relative_path)
            .into_iter()
            .flatten()
            .filter(|s| s.expiration_ts > now)
            .collect()
    }
}

pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
