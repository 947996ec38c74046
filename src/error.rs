//! Error types for render-pacer.
//!
//! The engine itself never fails: probe gaps are `Unknown` signals, timing
//! anomalies are clamped and subscriber panics are caught. The errors here
//! cover the surfaces around it: configuration files, logging setup and
//! the host driver.

use thiserror::Error;

/// Errors related to configuration management.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at '{0}'")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to write configuration: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Errors related to logging initialization.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Could not determine a data directory for log files")]
    HomeDirectoryNotFound,

    #[error("Failed to create log directory '{path}': {source}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create log file appender: {0}")]
    AppenderCreationFailed(String),

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInstall(String),
}

/// Errors raised by the headless host driver.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("Host runtime error: {0}")]
    Runtime(String),
}

/// Top-level errors.
#[derive(Error, Debug)]
pub enum PacerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}
