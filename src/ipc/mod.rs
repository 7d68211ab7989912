//! Control socket of the service and the `freeform msg` client.

pub mod client;
pub mod server;

pub use server::IpcServer;
