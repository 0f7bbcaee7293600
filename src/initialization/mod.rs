//! Startup plumbing: logger initialization.

mod logger;

pub use logger::init_logger_with;
