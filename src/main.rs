//! `remotefs-server` — a thin entry point around [`remotefs::server`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use remotefs::config::{InvocationSemantics, ServerConfig};
use remotefs::server::{FileAdapter, Server};

#[derive(Parser)]
#[command(name = "remotefs-server", version, about = "Remote file service server")]
struct Args {
    /// Address to bind the UDP socket on.
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    bind_addr: SocketAddr,

    /// Root directory served to clients.
    #[arg(short = 'r', long, default_value = "./server_root")]
    server_root: PathBuf,

    /// Invocation semantics: "at-least-once" or "at-most-once".
    #[arg(short, long, default_value = "at-least-once")]
    invocation_method: String,

    /// Seconds between checks of the shutdown flag.
    #[arg(long, default_value_t = 5)]
    recv_timeout_secs: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let invocation_semantics = match args.invocation_method.as_str() {
        "at-least-once" => InvocationSemantics::AtLeastOnce,
        "at-most-once" => InvocationSemantics::AtMostOnce,
        other => {
            eprintln!("unknown invocation method {other:?}; expected at-least-once or at-most-once");
            std::process::exit(2);
        }
    };

    std::fs::create_dir_all(&args.server_root)?;

    let config = ServerConfig {
        bind_addr: args.bind_addr,
        server_root: args.server_root.clone(),
        invocation_semantics,
        recv_timeout: Duration::from_secs(args.recv_timeout_secs),
    };

    info!(root = %args.server_root.display(), addr = %args.bind_addr, "starting remotefs-server");

    let file_adapter = FileAdapter::new(args.server_root);
    let mut server = Server::new(config, file_adapter);
    server.listen()?;
    Ok(())
}
