//! Error types for daemon startup.

use flowbot_flows::StoreError;
use std::fmt;
use std::path::PathBuf;

/// Errors loading a seed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedError {
    /// The file could not be read.
    Read { path: PathBuf, reason: String },
    /// The file is not a valid seed document.
    Parse { path: PathBuf, reason: String },
    /// An edge references a node the flow does not have.
    DanglingEdge {
        flow: String,
        source_node: String,
        target_node: String,
    },
    /// The store rejected a seeded row.
    Store(StoreError),
}

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, reason } => {
                write!(f, "failed to read seed file '{}': {}", path.display(), reason)
            }
            Self::Parse { path, reason } => {
                write!(f, "invalid seed file '{}': {}", path.display(), reason)
            }
            Self::DanglingEdge {
                flow,
                source_node,
                target_node,
            } => write!(
                f,
                "flow '{flow}' has an edge {source_node} -> {target_node} to an unknown node"
            ),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SeedError {}

impl From<StoreError> for SeedError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors that stop the daemon from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration could not be loaded.
    Config { details: String },
    /// The seed file could not be applied.
    Seed { details: String },
    /// Waiting for the shutdown signal failed.
    Signal { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "failed to load configuration: {details}"),
            Self::Seed { details } => write!(f, "failed to seed flows: {details}"),
            Self::Signal { details } => write!(f, "failed to listen for shutdown: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}
