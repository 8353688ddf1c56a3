//! Configuration, paths, and logging setup for the mailroom services.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Backend, Config, DEFAULT_BATCH_SIZE, DEFAULT_BIND_ADDR, DEFAULT_LOG_LEVEL,
    DEFAULT_RESEND_API_URL, MAX_BATCH_SIZE,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_to_file, parse_level};
pub use paths::Paths;
