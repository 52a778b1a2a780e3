pub mod activation;
pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod installer;
pub mod process_monitor;
pub mod protocol;  // 데몬 와이어 프로토콜 (NDJSON v1)
pub mod resolver;
pub mod subscription;
pub mod supervisor;
pub mod utils;

pub use activation::{Activation, ActivationOptions};
pub use dispatcher::CommandDispatcher;
pub use error::{BridgeError, Result};
pub use supervisor::ProcessSupervisor;
