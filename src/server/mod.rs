pub mod core;
pub mod file_adapter;

pub use core::{Server, ServerError, ServerHandle};
pub use file_adapter::{FileAdapter, FileAdapterError, SubscribedClient};
