#[macro_use]
extern crate tracing;

pub mod backend;
pub mod cli;
pub mod client;
pub mod display;
pub mod error;
pub mod ipc;
pub mod service;
pub mod services;
pub mod utils;
pub mod window;

pub use error::{Error, Result};
