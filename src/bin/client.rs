//! `remotefs-client` — a thin entry point around [`remotefs::client::Client`].
//!
//! Deliberately not a REPL: each invocation performs exactly one operation
//! and prints its result.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use remotefs::client::Client;
use remotefs::client::Outcome;
use remotefs::config::ClientConfig;

#[derive(Parser)]
#[command(name = "remotefs-client", version, about = "Remote file service client")]
struct Args {
    /// Address of the server to talk to.
    #[arg(long, default_value = "127.0.0.1:9000")]
    server_addr: SocketAddr,

    /// Local UDP port this client binds to for replies and subscriptions.
    #[arg(long, default_value_t = 0)]
    client_port: u16,

    /// Directory backing the local content cache.
    #[arg(long, default_value = "./client_cache")]
    cache_dir: PathBuf,

    /// Seconds a cached entry is served without consulting the server.
    #[arg(long, default_value_t = 10)]
    freshness_interval_secs: u64,

    /// Retransmission attempts before giving up on a reply.
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Per-attempt receive timeout, in seconds.
    #[arg(long, default_value_t = 5)]
    per_attempt_timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a byte range from a file.
    Read {
        path: String,
        #[arg(default_value_t = 0)]
        offset: usize,
        #[arg(default_value_t = usize::MAX)]
        nbytes: usize,
    },
    /// Overwrite bytes at an offset.
    Write { path: String, offset: u32, content: String },
    /// Append bytes to a file.
    Append { path: String, content: String },
    /// Delete a file.
    Delete { path: String },
    /// Subscribe to update notifications for a duration.
    Subscribe { path: String, monitoring_interval_secs: u32 },
    /// Query the server's last-known modification time for a file.
    Stat { path: String },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    std::fs::create_dir_all(&args.cache_dir)?;

    let config = ClientConfig {
        client_port: args.client_port,
        server_addr: args.server_addr,
        cache_dir: args.cache_dir,
        freshness_interval: Duration::from_secs(args.freshness_interval_secs),
        max_attempts: args.max_attempts,
        per_attempt_timeout: Duration::from_secs(args.per_attempt_timeout_secs),
    };
    let mut client = Client::new(config);

    match args.command {
        Command::Read { path, offset, nbytes } => match client.read(&path, offset, nbytes) {
            Ok(Outcome::Reply(bytes)) => println!("{}", String::from_utf8_lossy(&bytes)),
            Ok(Outcome::NoReply) => eprintln!("no reply from server"),
            Err(e) => eprintln!("read failed: {e}"),
        },
        Command::Write { path, offset, content } => match client.write(&path, offset, content.as_bytes()) {
            Ok(Outcome::Reply(success)) => println!("success={success}"),
            Ok(Outcome::NoReply) => eprintln!("no reply from server"),
            Err(e) => eprintln!("write failed: {e}"),
        },
        Command::Append { path, content } => match client.append(&path, content.as_bytes()) {
            Ok(Outcome::Reply(success)) => println!("success={success}"),
            Ok(Outcome::NoReply) => eprintln!("no reply from server"),
            Err(e) => eprintln!("append failed: {e}"),
        },
        Command::Delete { path } => match client.delete(&path) {
            Ok(Outcome::Reply(success)) => println!("success={success}"),
            Ok(Outcome::NoReply) => eprintln!("no reply from server"),
            Err(e) => eprintln!("delete failed: {e}"),
        },
        Command::Subscribe { path, monitoring_interval_secs } => {
            match client.subscribe(&path, monitoring_interval_secs) {
                Ok(Outcome::Reply(success)) => println!("subscribed={success}"),
                Ok(Outcome::NoReply) => eprintln!("no reply from server"),
                Err(e) => eprintln!("subscribe failed: {e}"),
            }
        }
        Command::Stat { path } => match client.get_modified_timestamp(&path) {
            Ok(Outcome::Reply(mtime)) => println!("mtime={mtime}"),
            Ok(Outcome::NoReply) => eprintln!("no reply from server"),
            Err(e) => eprintln!("stat failed: {e}"),
        },
    }

    Ok(())
}
