pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod worker;

pub use client::WorkerClient;
pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use handler::{HandlerResult, MessageHandler};
pub use worker::Worker;
