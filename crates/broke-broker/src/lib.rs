pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod scanner;
pub mod worker_registry;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use dispatcher::{Dispatcher, Producer};
pub use error::{BrokerError, Result};
pub use scanner::TimeoutScanner;
