// Public modules
pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod git;
pub mod hooks;
pub mod options;
pub mod paths;
pub mod queue;
pub mod release;
pub mod remote;
pub mod ssh;
pub mod storage;
pub mod strategy;
pub mod targets;
pub mod tasks;

// Internal modules - not part of public API
pub(crate) mod local_files;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
