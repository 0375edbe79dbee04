pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod server;
pub mod transport;

pub use cache::{Cache, CacheError};
pub use client::{Client, ClientError, Outcome};
pub use codec::{CodecError, Message};
pub use config::{ClientConfig, InvocationSemantics, ServerConfig};
pub use server::{Server, ServerError};
pub use transport::{DropHook, TransportError};
